/*!
 * Schema definitions for provider and claim files
 *
 * Column names as they appear in the source extracts, the subset that must
 * be present for a file to be usable, and the columns exposed in query
 * results.
 */

use std::path::Path;

/// Provider file schema
pub struct ProviderSchema;

impl ProviderSchema {
    /// Source columns understood by the loader
    pub fn column_names() -> Vec<&'static str> {
        vec![
            "type_1_npi",
            "name",
            "first_name",
            "middle_name",
            "last_name",
            "gender",
            "email",
            "specialties",
            "states",
            "hospital_names",
            "system_names",
            "conditions",
            "affiliations",
            "org_type",
            "num_publications",
            "num_clinical_trials",
            "num_payments",
            "has_linkedin",
            "has_twitter",
            "has_youtube",
            "has_podcast",
            "linkedin",
            "twitter",
        ]
    }

    /// Required columns; each entry lists accepted spellings
    pub fn required_columns() -> &'static [&'static [&'static str]] {
        &[&["type_1_npi", "npi"]]
    }

    /// Columns of a provider result row, in default order
    pub fn output_columns() -> Vec<&'static str> {
        vec![
            "npi",
            "name",
            "gender",
            "email",
            "specialties",
            "states",
            "hospital_names",
            "system_names",
            "conditions",
            "affiliations",
            "org_type",
            "num_publications",
            "num_clinical_trials",
            "num_payments",
            "has_linkedin",
            "has_twitter",
            "has_youtube",
            "has_podcast",
        ]
    }

    pub fn validate_headers(headers: &[String], file: Option<&Path>) -> crate::Result<()> {
        validate_required(headers, Self::required_columns(), file)
    }
}

/// Claims file schema
pub struct ClaimSchema;

impl ClaimSchema {
    /// Source column name paired with its snake_case alias
    pub const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("RX_CLAIM_NBR", "claim_id"),
        ("PATIENT_ID", "patient_id"),
        ("SERVICE_DATE_DD", "service_date"),
        ("DATE_PRESCRIPTION_WRITTEN_DD", "prescription_written_date"),
        ("TRANSACTION_DATE_DD", "transaction_date"),
        ("PRESCRIBER_NPI_NBR", "prescriber_npi"),
        ("NDC", "ndc"),
        ("NDC_GENERIC_NM", "generic_name"),
        ("NDC_PREFERRED_BRAND_NM", "brand_name"),
        ("NDC_DESC", "drug_description"),
        ("PHARMACY_NPI_NM", "pharmacy_name"),
        ("PHARMACY_TYPE", "pharmacy_type"),
        ("PHARMACY_STATE", "pharmacy_state"),
        ("PAYER_PAYER_NM", "payer_name"),
        ("TOTAL_PAID_AMT", "total_paid"),
        ("PATIENT_TO_PAY_AMT", "patient_pay"),
        ("GENERIC_COST_AMT", "generic_cost"),
        ("DISPENSED_QUANTITY_VAL", "quantity"),
        ("DAYS_SUPPLY_VAL", "days_supply"),
        ("CLAIM_STATUS", "status"),
    ];

    pub fn column_names() -> Vec<&'static str> {
        Self::COLUMNS.iter().map(|(source, _)| *source).collect()
    }

    pub fn required_columns() -> &'static [&'static [&'static str]] {
        &[&["PRESCRIBER_NPI_NBR", "prescriber_npi"]]
    }

    /// Resolve either spelling of a claim column to its source name
    pub fn canonical_column(name: &str) -> Option<&'static str> {
        let name = name.trim();
        Self::COLUMNS.iter()
            .find(|(source, alias)| source.eq_ignore_ascii_case(name) || alias.eq_ignore_ascii_case(name))
            .map(|(source, _)| *source)
    }

    pub fn validate_headers(headers: &[String], file: Option<&Path>) -> crate::Result<()> {
        validate_required(headers, Self::required_columns(), file)
    }
}

fn validate_required(
    headers: &[String],
    required: &[&[&str]],
    file: Option<&Path>,
) -> crate::Result<()> {
    let missing: Vec<String> = required.iter()
        .filter(|spellings| {
            !spellings.iter().any(|s| headers.iter().any(|h| h.trim() == *s))
        })
        .map(|spellings| spellings[0].to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(crate::PlanError::missing_columns(missing, file.map(Path::to_path_buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_provider_columns() {
        let headers = vec!["npi".to_string(), "name".to_string()];
        assert!(ProviderSchema::validate_headers(&headers, None).is_ok());

        let headers = vec!["name".to_string()];
        match ProviderSchema::validate_headers(&headers, None) {
            Err(crate::PlanError::SchemaMismatch { missing_columns, .. }) => {
                assert_eq!(missing_columns, vec!["type_1_npi".to_string()]);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_claim_column_spellings() {
        assert_eq!(ClaimSchema::canonical_column("generic_name"), Some("NDC_GENERIC_NM"));
        assert_eq!(ClaimSchema::canonical_column("TOTAL_PAID_AMT"), Some("TOTAL_PAID_AMT"));
        assert_eq!(ClaimSchema::canonical_column("nope"), None);
        assert_eq!(ClaimSchema::column_names().len(), ClaimSchema::COLUMNS.len());
    }
}
