/*!
 * Record normalization
 *
 * Converts loosely-typed source rows into [`ProviderRecord`] and
 * [`ClaimRecord`] values with a guaranteed shape: list fields are always
 * lists, NPIs are canonical digit strings, unparsable dates become `None`,
 * and claims that cannot be attributed to a prescriber are dropped.
 */

use std::collections::HashSet;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::data_types::*;
use crate::Result;

/// Provider row as delivered by a loader (CSV, JSON, ...)
///
/// Every field is optional and loosely typed; list columns usually arrive
/// as JSON text (`["NEUROLOGY"]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProviderRow {
    #[serde(alias = "npi")]
    pub type_1_npi: Option<Value>,
    pub name: Option<Value>,
    pub first_name: Option<Value>,
    pub middle_name: Option<Value>,
    pub last_name: Option<Value>,
    pub gender: Option<Value>,
    pub email: Option<Value>,
    pub specialties: Option<Value>,
    pub states: Option<Value>,
    pub hospital_names: Option<Value>,
    pub system_names: Option<Value>,
    pub conditions: Option<Value>,
    pub affiliations: Option<Value>,
    pub org_type: Option<Value>,
    pub num_publications: Option<Value>,
    pub num_clinical_trials: Option<Value>,
    pub num_payments: Option<Value>,
    pub has_linkedin: Option<Value>,
    pub has_twitter: Option<Value>,
    pub has_youtube: Option<Value>,
    pub has_podcast: Option<Value>,
    pub linkedin: Option<Value>,
    pub twitter: Option<Value>,
}

/// Claim row as delivered by a loader, keyed by source column names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawClaimRow {
    #[serde(rename = "RX_CLAIM_NBR", alias = "claim_id")]
    pub claim_id: Option<Value>,
    #[serde(rename = "PATIENT_ID", alias = "patient_id")]
    pub patient_id: Option<Value>,
    #[serde(rename = "SERVICE_DATE_DD", alias = "service_date")]
    pub service_date: Option<Value>,
    #[serde(rename = "DATE_PRESCRIPTION_WRITTEN_DD", alias = "prescription_written_date")]
    pub prescription_written_date: Option<Value>,
    #[serde(rename = "TRANSACTION_DATE_DD", alias = "transaction_date")]
    pub transaction_date: Option<Value>,
    #[serde(rename = "PRESCRIBER_NPI_NBR", alias = "prescriber_npi")]
    pub prescriber_npi: Option<Value>,
    #[serde(rename = "NDC", alias = "ndc")]
    pub ndc: Option<Value>,
    #[serde(rename = "NDC_GENERIC_NM", alias = "generic_name")]
    pub generic_name: Option<Value>,
    #[serde(rename = "NDC_PREFERRED_BRAND_NM", alias = "brand_name")]
    pub brand_name: Option<Value>,
    #[serde(rename = "NDC_DESC", alias = "drug_description")]
    pub drug_description: Option<Value>,
    #[serde(rename = "PHARMACY_NPI_NM", alias = "pharmacy_name")]
    pub pharmacy_name: Option<Value>,
    #[serde(rename = "PHARMACY_TYPE", alias = "pharmacy_type")]
    pub pharmacy_type: Option<Value>,
    #[serde(rename = "PHARMACY_STATE", alias = "pharmacy_state")]
    pub pharmacy_state: Option<Value>,
    #[serde(rename = "PAYER_PAYER_NM", alias = "payer_name")]
    pub payer_name: Option<Value>,
    #[serde(rename = "TOTAL_PAID_AMT", alias = "total_paid")]
    pub total_paid: Option<Value>,
    #[serde(rename = "PATIENT_TO_PAY_AMT", alias = "patient_pay")]
    pub patient_pay: Option<Value>,
    #[serde(rename = "GENERIC_COST_AMT", alias = "generic_cost")]
    pub generic_cost: Option<Value>,
    #[serde(rename = "DISPENSED_QUANTITY_VAL", alias = "quantity")]
    pub quantity: Option<Value>,
    #[serde(rename = "DAYS_SUPPLY_VAL", alias = "days_supply")]
    pub days_supply: Option<Value>,
    #[serde(rename = "CLAIM_STATUS", alias = "status")]
    pub status: Option<Value>,
}

/// Counts reported by a normalization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub accepted: usize,
    pub dropped_invalid_npi: usize,
    pub dropped_duplicates: usize,
}

/// Parse a list-valued source field.
///
/// Arrays pass through; JSON (or single-quoted) array text is parsed;
/// anything else, including null, empty or malformed text, yields an empty list.
/// Apostrophes inside single-quoted items (`['O'Connor Hospital']`) survive.
pub fn parse_list_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => clean_items(items),
        Some(Value::String(text)) => {
            let text = text.trim();
            if !text.starts_with('[') {
                return Vec::new();
            }
            match serde_json::from_str::<Vec<Value>>(text) {
                Ok(items) => clean_items(&items),
                Err(_) => split_quoted_list(text).unwrap_or_default(),
            }
        }
        _ => Vec::new(),
    }
}

/// Split `['a', "b", ...]` text whose items are quoted with either quote
/// character. A comma separates items only between a closing and an opening
/// quote. `None` when the text is not a bracketed list of quoted items.
fn split_quoted_list(text: &str) -> Option<Vec<String>> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }
    let is_quote = |c: char| c == '\'' || c == '"';

    let pieces: Vec<&str> = inner.split(',').collect();
    let mut raw_items = Vec::new();
    let mut current = String::new();
    for (i, piece) in pieces.iter().enumerate() {
        current.push_str(piece);
        let closes = current.trim_end().ends_with(is_quote);
        let next_opens = pieces.get(i + 1).map_or(true, |next| next.trim_start().starts_with(is_quote));
        if closes && next_opens {
            raw_items.push(std::mem::take(&mut current));
        } else {
            current.push(',');
        }
    }
    if !current.is_empty() {
        return None;
    }

    raw_items.iter()
        .map(|item| {
            let item = item.trim();
            let quoted = item.len() >= 2 && item.starts_with(is_quote) && item.ends_with(is_quote);
            quoted.then(|| item[1..item.len() - 1].trim().to_string())
        })
        .filter(|item| item.as_ref().map_or(true, |s| !s.is_empty()))
        .collect()
}

fn clean_items(items: &[Value]) -> Vec<String> {
    items.iter()
        .filter_map(scalar_text)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trimmed text of a scalar value; `None` for null, empty text and containers
pub fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("nan") || text.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(text)
    }
}

fn text_field(value: Option<&Value>) -> Option<String> {
    value.and_then(scalar_text)
}

/// Parse a non-negative count; missing or malformed values become 0
pub fn parse_count(value: Option<&Value>) -> u64 {
    parse_number(value)
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.floor() as u64)
        .unwrap_or(0)
}

/// Parse a numeric field, tolerating currency formatting
pub fn parse_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != '$' && *c != ',').collect();
            cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Parse a boolean presence flag
pub fn parse_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" | "1.0" => Some(true),
            "false" | "f" | "no" | "n" | "0" | "0.0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a date in any of the layouts seen in claim extracts
pub fn parse_date(value: Option<&Value>) -> Option<NaiveDate> {
    let text = text_field(value)?;
    parse_date_str(&text)
}

/// Parse a date string; `None` when no known layout matches
pub fn parse_date_str(text: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%Y%m%d", "%d-%b-%Y"];
    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"];

    let text = text.trim();
    DATE_FORMATS.iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS.iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            // RFC 3339 and other timestamp suffixes
            text.get(..10).and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

/// Normalize one provider row
pub fn normalize_provider(raw: &RawProviderRow) -> Result<ProviderRecord> {
    let npi_text = text_field(raw.type_1_npi.as_ref()).unwrap_or_default();
    let npi = Npi::new(&npi_text)?;

    let name = text_field(raw.name.as_ref()).unwrap_or_else(|| {
        [raw.first_name.as_ref(), raw.last_name.as_ref()]
            .into_iter()
            .filter_map(text_field)
            .collect::<Vec<_>>()
            .join(" ")
    });

    let mut record = ProviderRecord::new(npi, name);
    record.gender = text_field(raw.gender.as_ref());
    record.email = text_field(raw.email.as_ref());
    record.specialties = parse_list_field(raw.specialties.as_ref());
    record.states = parse_list_field(raw.states.as_ref());
    record.hospital_names = parse_list_field(raw.hospital_names.as_ref());
    record.system_names = parse_list_field(raw.system_names.as_ref());
    record.conditions = parse_list_field(raw.conditions.as_ref());
    record.affiliations = parse_list_field(raw.affiliations.as_ref());
    record.org_type = text_field(raw.org_type.as_ref());
    record.num_publications = parse_count(raw.num_publications.as_ref());
    record.num_clinical_trials = parse_count(raw.num_clinical_trials.as_ref());
    record.num_payments = parse_count(raw.num_payments.as_ref());

    // A profile URL implies presence when the flag column is absent
    record.has_linkedin = parse_flag(raw.has_linkedin.as_ref())
        .unwrap_or_else(|| text_field(raw.linkedin.as_ref()).is_some());
    record.has_twitter = parse_flag(raw.has_twitter.as_ref())
        .unwrap_or_else(|| text_field(raw.twitter.as_ref()).is_some());
    record.has_youtube = parse_flag(raw.has_youtube.as_ref()).unwrap_or(false);
    record.has_podcast = parse_flag(raw.has_podcast.as_ref()).unwrap_or(false);

    Ok(record)
}

/// Normalize provider rows, skipping rows without a usable NPI and
/// keeping the first row for each NPI.
pub fn normalize_providers(rows: &[RawProviderRow]) -> (Vec<ProviderRecord>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());

    for (idx, raw) in rows.iter().enumerate() {
        match normalize_provider(raw) {
            Ok(record) => {
                if seen.insert(record.npi.clone()) {
                    records.push(record);
                } else {
                    stats.dropped_duplicates += 1;
                    debug!(row = idx, npi = %record.npi, "duplicate provider NPI skipped");
                }
            }
            Err(e) => {
                stats.dropped_invalid_npi += 1;
                debug!(row = idx, error = %e, "provider row skipped");
            }
        }
    }

    stats.accepted = records.len();
    if stats.dropped_invalid_npi + stats.dropped_duplicates > 0 {
        warn!(
            accepted = stats.accepted,
            invalid = stats.dropped_invalid_npi,
            duplicates = stats.dropped_duplicates,
            "provider rows dropped during normalization"
        );
    }
    (records, stats)
}

/// Normalize one claim row; fails when the prescriber NPI is empty or zero
pub fn normalize_claim(raw: &RawClaimRow, row_index: usize) -> Result<ClaimRecord> {
    let npi_text = text_field(raw.prescriber_npi.as_ref()).unwrap_or_default();
    let prescriber_npi = Npi::new(&npi_text)?;

    let claim_id = text_field(raw.claim_id.as_ref())
        .unwrap_or_else(|| format!("row-{}", row_index));

    let mut claim = ClaimRecord::new(claim_id, prescriber_npi);
    claim.patient_id = text_field(raw.patient_id.as_ref());
    claim.service_date = parse_date(raw.service_date.as_ref());
    claim.prescription_written_date = parse_date(raw.prescription_written_date.as_ref());
    claim.transaction_date = parse_date(raw.transaction_date.as_ref());
    claim.ndc = text_field(raw.ndc.as_ref());
    claim.generic_name = text_field(raw.generic_name.as_ref());
    claim.brand_name = text_field(raw.brand_name.as_ref());
    claim.drug_description = text_field(raw.drug_description.as_ref());
    claim.pharmacy_name = text_field(raw.pharmacy_name.as_ref());
    claim.pharmacy_type = text_field(raw.pharmacy_type.as_ref());
    claim.pharmacy_state = text_field(raw.pharmacy_state.as_ref());
    claim.payer_name = text_field(raw.payer_name.as_ref());
    claim.total_paid = parse_number(raw.total_paid.as_ref());
    claim.patient_pay = parse_number(raw.patient_pay.as_ref());
    claim.generic_cost = parse_number(raw.generic_cost.as_ref());
    claim.quantity = parse_number(raw.quantity.as_ref());
    claim.days_supply = parse_number(raw.days_supply.as_ref());
    claim.status = text_field(raw.status.as_ref())
        .map(|s| ClaimStatus::from_code(&s))
        .unwrap_or_default();
    claim.refresh_drug_names();

    Ok(claim)
}

/// Normalize claim rows, dropping any claim whose prescriber NPI is empty or zero
pub fn normalize_claims(rows: &[RawClaimRow]) -> (Vec<ClaimRecord>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut claims = Vec::with_capacity(rows.len());

    for (idx, raw) in rows.iter().enumerate() {
        match normalize_claim(raw, idx) {
            Ok(claim) => claims.push(claim),
            Err(_) => stats.dropped_invalid_npi += 1,
        }
    }

    stats.accepted = claims.len();
    if stats.dropped_invalid_npi > 0 {
        debug!(
            accepted = stats.accepted,
            dropped = stats.dropped_invalid_npi,
            "claims without an attributable prescriber dropped"
        );
    }
    (claims, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_fields_never_null() {
        assert!(parse_list_field(None).is_empty());
        assert!(parse_list_field(Some(&Value::Null)).is_empty());
        assert!(parse_list_field(Some(&json!(""))).is_empty());
        assert!(parse_list_field(Some(&json!("not a list"))).is_empty());
        assert!(parse_list_field(Some(&json!("[\"unterminated"))).is_empty());
        assert!(parse_list_field(Some(&json!(42))).is_empty());
        assert_eq!(
            parse_list_field(Some(&json!("[\"NEUROLOGY\", \"\", \" PAIN \"]"))),
            vec!["NEUROLOGY".to_string(), "PAIN".to_string()]
        );
        assert_eq!(
            parse_list_field(Some(&json!("['CA', 'NV']"))),
            vec!["CA".to_string(), "NV".to_string()]
        );
        assert_eq!(parse_list_field(Some(&json!(["TX"]))), vec!["TX".to_string()]);
    }

    #[test]
    fn test_single_quoted_items_keep_apostrophes() {
        assert_eq!(
            parse_list_field(Some(&json!("['O'Connor Hospital', 'Mercy, Inc']"))),
            vec!["O'Connor Hospital".to_string(), "Mercy, Inc".to_string()]
        );
        assert_eq!(
            parse_list_field(Some(&json!("[\"St. Mary's\"]"))),
            vec!["St. Mary's".to_string()]
        );
        assert!(parse_list_field(Some(&json!("[unquoted, items]"))).is_empty());
    }

    #[test]
    fn test_provider_normalization() {
        let raw = RawProviderRow {
            type_1_npi: Some(json!(1033439047.0)),
            first_name: Some(json!("ANDREW")),
            last_name: Some(json!("GROSSBACH")),
            specialties: Some(json!("[\"NEUROLOGICAL SURGERY\"]")),
            states: None,
            num_publications: Some(json!("52")),
            num_payments: Some(json!(-3)),
            has_linkedin: Some(json!("True")),
            twitter: Some(json!("@drg")),
            ..Default::default()
        };
        let record = normalize_provider(&raw).unwrap();
        assert_eq!(record.npi.as_str(), "1033439047");
        assert_eq!(record.name, "ANDREW GROSSBACH");
        assert_eq!(record.specialties, vec!["NEUROLOGICAL SURGERY".to_string()]);
        assert!(record.states.is_empty());
        assert!(record.hospital_names.is_empty());
        assert_eq!(record.num_publications, 52);
        assert_eq!(record.num_payments, 0);
        assert!(record.has_linkedin);
        assert!(record.has_twitter);
        assert!(!record.has_youtube);
    }

    #[test]
    fn test_claims_without_prescriber_are_dropped() {
        let rows = vec![
            RawClaimRow { claim_id: Some(json!("a")), prescriber_npi: Some(json!("1")), ..Default::default() },
            RawClaimRow { claim_id: Some(json!("b")), prescriber_npi: Some(json!("0")), ..Default::default() },
            RawClaimRow { claim_id: Some(json!("c")), prescriber_npi: None, ..Default::default() },
            RawClaimRow { claim_id: Some(json!("d")), prescriber_npi: Some(json!(0.0)), ..Default::default() },
        ];
        let (claims, stats) = normalize_claims(&rows);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].claim_id, "a");
        assert_eq!(stats.dropped_invalid_npi, 3);
        assert!(claims.iter().all(|c| !c.prescriber_npi.as_str().is_empty() && c.prescriber_npi.as_str() != "0"));
    }

    #[test]
    fn test_unparsable_dates_become_none() {
        let raw = RawClaimRow {
            prescriber_npi: Some(json!("7")),
            service_date: Some(json!("2023-10-30")),
            prescription_written_date: Some(json!("last tuesday")),
            transaction_date: Some(json!("10/16/2023")),
            total_paid: Some(json!("$1,250.75")),
            status: Some(json!("REJECTED")),
            ..Default::default()
        };
        let claim = normalize_claim(&raw, 9).unwrap();
        assert_eq!(claim.claim_id, "row-9");
        assert_eq!(claim.service_date, NaiveDate::from_ymd_opt(2023, 10, 30));
        assert_eq!(claim.prescription_written_date, None);
        assert_eq!(claim.transaction_date, NaiveDate::from_ymd_opt(2023, 10, 16));
        assert_eq!(claim.total_paid, Some(1250.75));
        assert_eq!(claim.status, ClaimStatus::Rejected);
    }

    #[test]
    fn test_duplicate_providers_keep_first() {
        let rows = vec![
            RawProviderRow { type_1_npi: Some(json!("5")), name: Some(json!("First")), ..Default::default() },
            RawProviderRow { type_1_npi: Some(json!("5")), name: Some(json!("Second")), ..Default::default() },
            RawProviderRow { type_1_npi: Some(json!("")), ..Default::default() },
        ];
        let (records, stats) = normalize_providers(&rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "First");
        assert_eq!(stats.dropped_duplicates, 1);
        assert_eq!(stats.dropped_invalid_npi, 1);
    }
}
