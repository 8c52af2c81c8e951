/*!
 * Plan documents
 *
 * A plan is a JSON object produced by an external planner. This module
 * validates its top-level shape and converts every filter entry into a
 * tagged predicate. Filter values of the wrong type are logged and dropped
 * so one bad field never aborts the whole plan; unknown keys are ignored.
 */

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::data_types::{ClaimRecord, CountField, ListField, SocialPlatform};
use crate::normalize::parse_date_str;
use crate::schema::ClaimSchema;
use crate::{PlanError, Result};

/// Top-level fields every plan must carry
pub const REQUIRED_FIELDS: [&str; 4] = ["query_type", "filters", "projection", "limit"];

/// Correlation mode of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    #[default]
    Hcp,
    ClaimsOnly,
    ClaimsByDoctor,
    HcpWithClaims,
}

impl QueryType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "hcp" => Some(QueryType::Hcp),
            "claims_only" => Some(QueryType::ClaimsOnly),
            "claims_by_doctor" => Some(QueryType::ClaimsByDoctor),
            "hcp_with_claims" => Some(QueryType::HcpWithClaims),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Hcp => "hcp",
            QueryType::ClaimsOnly => "claims_only",
            QueryType::ClaimsByDoctor => "claims_by_doctor",
            QueryType::HcpWithClaims => "hcp_with_claims",
        }
    }

    /// Whether result rows are claims (or claim aggregates) rather than providers
    pub fn returns_claims(&self) -> bool {
        matches!(self, QueryType::ClaimsOnly | QueryType::ClaimsByDoctor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One `"<field> ASC|DESC"` ordering entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    /// Parse an ordering entry; the direction defaults to ascending
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split_whitespace();
        let column = parts.next()?.to_string();
        let direction = match parts.next().map(str::to_uppercase).as_deref() {
            Some("DESC") | Some("DESCENDING") => SortDirection::Desc,
            _ => SortDirection::Asc,
        };
        Some(Self { column, direction })
    }
}

/// How a list of requested terms combines against a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Some term matches
    Any,
    /// Every term matches (possibly through different list elements)
    All,
    /// No term matches
    Exclude,
}

/// Order in which provider predicates are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterStage {
    Categorical,
    Numeric,
    Percentile,
    Text,
}

/// A single provider-side predicate
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPredicate {
    ListMembership { field: ListField, mode: MatchMode, terms: Vec<String> },
    OrgType(Vec<String>),
    Gender(String),
    NameContains(Vec<String>),
    EmailDomain(Vec<String>),
    Flag { platform: SocialPlatform, value: bool },
    SocialMedia { mode: MatchMode, platforms: Vec<SocialPlatform> },
    Academic,
    Community,
    Rural,
    CountRange { field: CountField, min: Option<f64>, max: Option<f64> },
    TopPercentile { field: CountField, percentile: f64 },
    TextSearch(Vec<String>),
}

impl ProviderPredicate {
    pub fn stage(&self) -> FilterStage {
        match self {
            ProviderPredicate::CountRange { .. } => FilterStage::Numeric,
            ProviderPredicate::TopPercentile { .. } => FilterStage::Percentile,
            ProviderPredicate::TextSearch(_) => FilterStage::Text,
            _ => FilterStage::Categorical,
        }
    }
}

/// Provider predicates in canonical application order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderFilters {
    predicates: Vec<ProviderPredicate>,
}

const LIST_KEYS: [(&str, ListField); 5] = [
    ("specialty", ListField::Specialties),
    ("state", ListField::States),
    ("hospital", ListField::Hospitals),
    ("system", ListField::Systems),
    ("conditions", ListField::Conditions),
];

const COUNT_KEYS: [(&str, CountField); 3] = [
    ("publications", CountField::Publications),
    ("clinical_trials", CountField::ClinicalTrials),
    ("payments", CountField::Payments),
];

const MODES: [(&str, MatchMode); 3] = [
    ("any", MatchMode::Any),
    ("all", MatchMode::All),
    ("exclude", MatchMode::Exclude),
];

impl ProviderFilters {
    /// Build from predicates; they are stably sorted into stage order
    pub fn new(mut predicates: Vec<ProviderPredicate>) -> Self {
        predicates.sort_by_key(ProviderPredicate::stage);
        Self { predicates }
    }

    /// Convert a `filters` value; null or a non-object yields no predicates
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Null => Self::default(),
            other => {
                warn!(value = %other, "filters must be an object; ignoring");
                Self::default()
            }
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut predicates = Vec::new();
        let mut known: Vec<String> = Vec::new();
        let mut take = |key: &str| {
            known.push(key.to_string());
            map.get(key).filter(|v| !v.is_null())
        };

        for (prefix, field) in LIST_KEYS {
            for (suffix, mode) in MODES {
                let key = format!("{prefix}_{suffix}");
                if let Some(terms) = take(&key).and_then(|v| terms(&key, v)) {
                    predicates.push(ProviderPredicate::ListMembership { field, mode, terms });
                }
            }
        }

        if let Some(terms) = take("org_type_any").and_then(|v| terms("org_type_any", v)) {
            predicates.push(ProviderPredicate::OrgType(terms));
        }
        if let Some(gender) = take("gender").and_then(|v| text("gender", v)) {
            predicates.push(ProviderPredicate::Gender(gender));
        }
        if let Some(terms) = take("name_contains").and_then(|v| terms("name_contains", v)) {
            predicates.push(ProviderPredicate::NameContains(terms));
        }
        if let Some(terms) = take("email_domain").and_then(|v| terms("email_domain", v)) {
            predicates.push(ProviderPredicate::EmailDomain(terms));
        }

        for platform in SocialPlatform::ALL {
            let key = platform.flag_column();
            if let Some(value) = take(key).and_then(|v| flag(key, v)) {
                predicates.push(ProviderPredicate::Flag { platform, value });
            }
        }
        for (key, mode) in [("social_media_any", MatchMode::Any), ("social_media_all", MatchMode::All)] {
            if let Some(names) = take(key).and_then(|v| terms(key, v)) {
                let platforms: Vec<SocialPlatform> = names.iter()
                    .filter_map(|n| {
                        let platform = SocialPlatform::from_name(n);
                        if platform.is_none() {
                            debug!(key, platform = %n, "unknown social platform ignored");
                        }
                        platform
                    })
                    .collect();
                if !platforms.is_empty() {
                    predicates.push(ProviderPredicate::SocialMedia { mode, platforms });
                }
            }
        }

        for (key, predicate) in [
            ("academic_only", ProviderPredicate::Academic),
            ("community_only", ProviderPredicate::Community),
            ("rural_only", ProviderPredicate::Rural),
        ] {
            if take(key).and_then(|v| flag(key, v)) == Some(true) {
                predicates.push(predicate);
            }
        }

        for (name, field) in COUNT_KEYS {
            let min_key = format!("{name}_min");
            let max_key = format!("{name}_max");
            let range_key = format!("{name}_range");
            let min = take(&min_key).and_then(|v| number(&min_key, v));
            let max = take(&max_key).and_then(|v| number(&max_key, v));
            if min.is_some() || max.is_some() {
                predicates.push(ProviderPredicate::CountRange { field, min, max });
            }
            if let Some((min, max)) = take(&range_key).and_then(|v| range(&range_key, v)) {
                predicates.push(ProviderPredicate::CountRange { field, min, max });
            }
        }

        for (name, field) in COUNT_KEYS {
            let key = format!("top_percentile_{name}");
            if let Some(p) = take(&key).and_then(|v| number(&key, v)) {
                if p > 0.0 && p <= 100.0 {
                    predicates.push(ProviderPredicate::TopPercentile { field, percentile: p });
                } else {
                    warn!(key = %key, percentile = p, "percentile must be in (0, 100]; ignoring");
                }
            }
        }

        if let Some(terms) = take("text_search").and_then(|v| terms("text_search", v)) {
            predicates.push(ProviderPredicate::TextSearch(terms));
        }

        for key in map.keys().filter(|k| !known.contains(*k)) {
            debug!(key = %key, "unknown provider filter ignored");
        }

        Self::new(predicates)
    }

    pub fn predicates(&self) -> &[ProviderPredicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }
}

/// Claim date part used by calendar filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarPart {
    Year,
    Quarter,
    Month,
    /// 0 = Monday
    Weekday,
}

/// Numeric claim columns usable in min/max filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmountField {
    TotalCost,
    PatientPay,
    GenericCost,
    Quantity,
    DaysSupply,
}

impl AmountField {
    pub const ALL: [(&'static str, AmountField); 5] = [
        ("total_cost", AmountField::TotalCost),
        ("patient_pay", AmountField::PatientPay),
        ("generic_cost", AmountField::GenericCost),
        ("quantity", AmountField::Quantity),
        ("days_supply", AmountField::DaysSupply),
    ];

    /// Column value; missing amounts count as zero
    pub fn value(&self, claim: &ClaimRecord) -> f64 {
        let value = match self {
            AmountField::TotalCost => claim.total_paid,
            AmountField::PatientPay => claim.patient_pay,
            AmountField::GenericCost => claim.generic_cost,
            AmountField::Quantity => claim.quantity,
            AmountField::DaysSupply => claim.days_supply,
        };
        value.unwrap_or(0.0)
    }
}

/// A single claim-side predicate
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimPredicate {
    /// Last N calendar months up to the reference date
    RelativeMonths(u32),
    DateRange { start: Option<NaiveDate>, end: Option<NaiveDate> },
    Calendar { part: CalendarPart, value: u32 },
    Drugs { mode: MatchMode, terms: Vec<String> },
    DrugClasses(Vec<String>),
    PayerNames(Vec<String>),
    PayerTypes(Vec<String>),
    PharmacyNames(Vec<String>),
    PharmacyTypes(Vec<String>),
    PharmacyStates(Vec<String>),
    Amount { field: AmountField, min: Option<f64>, max: Option<f64> },
}

/// Claim predicates plus the flags that shape claim correlation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimsFilters {
    /// Keep rejected claims as well as dispensed ones
    pub include_rejected: bool,
    /// Invert the correlation ("did not prescribe")
    pub negate: bool,
    pub predicates: Vec<ClaimPredicate>,
    /// Bounds on per-prescriber claim counts, applied after aggregation
    pub prescription_count_min: Option<u64>,
    pub prescription_count_max: Option<u64>,
}

impl ClaimsFilters {
    pub fn new(predicates: Vec<ClaimPredicate>) -> Self {
        Self { predicates, ..Default::default() }
    }

    pub fn with_negate(mut self, negate: bool) -> Self {
        self.negate = negate;
        self
    }

    pub fn with_include_rejected(mut self, include: bool) -> Self {
        self.include_rejected = include;
        self
    }

    /// Convert a `claims_filters` value; null yields `None`
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from_map(map)),
            Value::Null => None,
            other => {
                warn!(value = %other, "claims_filters must be an object; ignoring");
                None
            }
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut filters = ClaimsFilters::default();
        let mut known: Vec<String> = Vec::new();
        let mut take = |key: &str| {
            known.push(key.to_string());
            map.get(key).filter(|v| !v.is_null())
        };
        let predicates = &mut filters.predicates;

        filters.include_rejected = take("include_rejected").and_then(|v| flag("include_rejected", v)).unwrap_or(false);
        filters.negate = take("negate").and_then(|v| flag("negate", v)).unwrap_or(false);

        if let Some(months) = take("date_range_months").and_then(|v| unsigned("date_range_months", v)) {
            // windows longer than u32::MAX months reach back to the earliest date anyway
            predicates.push(ClaimPredicate::RelativeMonths(u32::try_from(months).unwrap_or(u32::MAX)));
        }
        let start = take("date_range_start").and_then(|v| date("date_range_start", v));
        let end = take("date_range_end").and_then(|v| date("date_range_end", v));
        if start.is_some() || end.is_some() {
            predicates.push(ClaimPredicate::DateRange { start, end });
        }
        for (key, part, valid) in [
            ("year", CalendarPart::Year, 1..=9999u64),
            ("quarter", CalendarPart::Quarter, 1..=4),
            ("month", CalendarPart::Month, 1..=12),
            ("weekday", CalendarPart::Weekday, 0..=6),
        ] {
            if let Some(value) = take(key).and_then(|v| unsigned(key, v)) {
                if valid.contains(&value) {
                    predicates.push(ClaimPredicate::Calendar { part, value: value as u32 });
                } else {
                    warn!(key, value, "calendar filter out of range; ignoring");
                }
            }
        }

        // `drug_any` is the planner's older spelling of `drugs_any`
        let mut drugs_any = take("drugs_any").and_then(|v| terms("drugs_any", v)).unwrap_or_default();
        if let Some(legacy) = take("drug_any").and_then(|v| terms("drug_any", v)) {
            drugs_any.extend(legacy);
        }
        if !drugs_any.is_empty() {
            predicates.push(ClaimPredicate::Drugs { mode: MatchMode::Any, terms: drugs_any });
        }
        for (key, mode) in [("drugs_all", MatchMode::All), ("drugs_exclude", MatchMode::Exclude)] {
            if let Some(terms) = take(key).and_then(|v| terms(key, v)) {
                predicates.push(ClaimPredicate::Drugs { mode, terms });
            }
        }
        for key in ["drug_classes_any", "drug_groups_any"] {
            if let Some(terms) = take(key).and_then(|v| terms(key, v)) {
                predicates.push(ClaimPredicate::DrugClasses(terms));
            }
        }

        let term_predicates: [(&str, fn(Vec<String>) -> ClaimPredicate); 5] = [
            ("payer_any", ClaimPredicate::PayerNames),
            ("payer_types", ClaimPredicate::PayerTypes),
            ("pharmacy_any", ClaimPredicate::PharmacyNames),
            ("pharmacy_types", ClaimPredicate::PharmacyTypes),
            ("pharmacy_states", ClaimPredicate::PharmacyStates),
        ];
        for (key, build) in term_predicates {
            if let Some(terms) = take(key).and_then(|v| terms(key, v)) {
                predicates.push(build(terms));
            }
        }

        for (name, field) in AmountField::ALL {
            let min_key = format!("{name}_min");
            let max_key = format!("{name}_max");
            let min = take(&min_key).and_then(|v| number(&min_key, v));
            let max = take(&max_key).and_then(|v| number(&max_key, v));
            if min.is_some() || max.is_some() {
                predicates.push(ClaimPredicate::Amount { field, min, max });
            }
        }

        filters.prescription_count_min = take("prescription_count_min")
            .and_then(|v| unsigned("prescription_count_min", v));
        filters.prescription_count_max = take("prescription_count_max")
            .and_then(|v| unsigned("prescription_count_max", v));

        for key in map.keys().filter(|k| !known.contains(*k)) {
            debug!(key = %key, "unknown claims filter ignored");
        }

        filters
    }

    /// Whether per-prescriber count bounds are set
    pub fn has_count_bounds(&self) -> bool {
        self.prescription_count_min.is_some() || self.prescription_count_max.is_some()
    }
}

/// Grouping column for claim aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupBy {
    PrescriberNpi,
    PayerName,
    PharmacyName,
    GenericName,
    BrandName,
}

impl GroupBy {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = ClaimSchema::canonical_column(name).unwrap_or(name);
        match name.trim().to_lowercase().as_str() {
            "prescriber_npi_nbr" | "npi" | "prescriber" => Some(GroupBy::PrescriberNpi),
            "payer_payer_nm" | "payer" => Some(GroupBy::PayerName),
            "pharmacy_npi_nm" | "pharmacy" => Some(GroupBy::PharmacyName),
            "ndc_generic_nm" | "drug" => Some(GroupBy::GenericName),
            "ndc_preferred_brand_nm" | "brand" => Some(GroupBy::BrandName),
            _ => None,
        }
    }

    /// Output column holding the group key
    pub fn column(&self) -> &'static str {
        match self {
            GroupBy::PrescriberNpi => "prescriber_npi",
            GroupBy::PayerName => "payer_name",
            GroupBy::PharmacyName => "pharmacy_name",
            GroupBy::GenericName => "generic_name",
            GroupBy::BrandName => "brand_name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationSpec {
    pub group_by: GroupBy,
}

impl AggregationSpec {
    /// `{"group_by": "<column>"}` or a bare column name
    pub fn from_value(value: &Value) -> Option<Self> {
        let name = match value {
            Value::Null => return None,
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => match map.get("group_by") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(items)) => items.first().and_then(Value::as_str).map(str::to_string),
                _ => None,
            },
            _ => None,
        };
        let spec = name.as_deref().and_then(GroupBy::from_name).map(|group_by| Self { group_by });
        if spec.is_none() {
            warn!(value = %value, "unrecognized aggregation; ignoring");
        }
        spec
    }
}

/// Metrics blended into the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeSpec {
    pub publications: bool,
    pub clinical_trials: bool,
}

impl Default for CompositeSpec {
    fn default() -> Self {
        Self { publications: true, clinical_trials: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsSpec {
    pub rank_by: Option<String>,
    pub composite: Option<CompositeSpec>,
    pub categorize: Vec<String>,
}

impl AnalyticsSpec {
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => return None,
            other => {
                warn!(value = %other, "analytics must be an object; ignoring");
                return None;
            }
        };

        let rank_by = map.get("rank_by").and_then(|v| text("rank_by", v));
        let composite = match map.get("composite_score") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::Bool(true)) => Some(CompositeSpec::default()),
            Some(Value::Object(parts)) => {
                let enabled = |key: &str| parts.get(key).and_then(Value::as_bool).unwrap_or(false);
                let spec = CompositeSpec {
                    publications: enabled("publications"),
                    clinical_trials: enabled("clinical_trials"),
                };
                (spec.publications || spec.clinical_trials).then_some(spec)
            }
            Some(other) => {
                warn!(value = %other, "composite_score must be a bool or object; ignoring");
                None
            }
        };
        let categorize = map.get("categorize")
            .filter(|v| !v.is_null())
            .and_then(|v| terms("categorize", v))
            .unwrap_or_default();

        let spec = Self { rank_by, composite, categorize };
        (spec != Self::default()).then_some(spec)
    }
}

/// A validated plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDocument {
    pub query_type: QueryType,
    pub filters: ProviderFilters,
    pub claims_filters: Option<ClaimsFilters>,
    pub aggregation: Option<AggregationSpec>,
    pub analytics: Option<AnalyticsSpec>,
    pub projection: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: usize,
    pub plan_notes: Option<String>,
}

impl PlanDocument {
    /// A plan of the given type with no filters
    pub fn new(query_type: QueryType, limit: usize) -> Self {
        Self {
            query_type,
            filters: ProviderFilters::default(),
            claims_filters: None,
            aggregation: None,
            analytics: None,
            projection: Vec::new(),
            order_by: Vec::new(),
            limit: limit.max(1),
            plan_notes: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Validate and convert a plan value
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_object()
            .ok_or_else(|| PlanError::invalid_plan("plan must be a JSON object"))?;
        validate(map)?;

        let query_type = map.get("query_type")
            .and_then(Value::as_str)
            .and_then(QueryType::from_name)
            .ok_or_else(|| PlanError::invalid_plan("unknown query_type"))?;
        let limit = parse_limit(map.get("limit"))?;

        let projection = map.get("projection")
            .filter(|v| !v.is_null())
            .and_then(|v| terms("projection", v))
            .unwrap_or_default();
        let order_by = map.get("order_by")
            .filter(|v| !v.is_null())
            .and_then(|v| terms("order_by", v))
            .unwrap_or_default()
            .iter()
            .filter_map(|s| OrderBy::parse(s))
            .collect();

        Ok(Self {
            query_type,
            filters: map.get("filters").map(ProviderFilters::from_value).unwrap_or_default(),
            claims_filters: map.get("claims_filters").and_then(ClaimsFilters::from_value),
            aggregation: map.get("aggregation").and_then(AggregationSpec::from_value),
            analytics: map.get("analytics").and_then(AnalyticsSpec::from_value),
            projection,
            order_by,
            limit,
            plan_notes: map.get("plan_notes").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// Check required fields, `query_type` and `limit` before any data access
pub fn validate(map: &Map<String, Value>) -> Result<()> {
    let missing: Vec<String> = REQUIRED_FIELDS.iter()
        .filter(|f| !map.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PlanError::missing_plan_fields(missing));
    }

    let query_type = map.get("query_type").unwrap_or(&Value::Null);
    if query_type.as_str().and_then(QueryType::from_name).is_none() {
        return Err(PlanError::invalid_plan(format!(
            "unknown query_type {}; expected one of hcp, claims_only, claims_by_doctor, hcp_with_claims",
            query_type
        )));
    }

    parse_limit(map.get("limit")).map(|_| ())
}

fn parse_limit(value: Option<&Value>) -> Result<usize> {
    let invalid = || PlanError::InvalidLimit {
        limit: value.map(Value::to_string).unwrap_or_else(|| "null".to_string()),
    };
    let n = match value {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => n,
            None => n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 1.0)
                .map(|f| f as u64)
                .ok_or_else(invalid)?,
        },
        _ => return Err(invalid()),
    };
    if n == 0 {
        return Err(invalid());
    }
    usize::try_from(n).map_err(|_| invalid())
}

// Boundary conversions: wrong types are logged and dropped

fn terms(key: &str, value: &Value) -> Option<Vec<String>> {
    let terms: Vec<String> = match value {
        Value::String(s) => vec![s.trim().to_string()],
        Value::Array(items) => items.iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Null => None,
                other => {
                    warn!(key, value = %other, "non-text list element dropped");
                    None
                }
            })
            .collect(),
        Value::Null => return None,
        other => {
            warn!(key, value = %other, "expected a string or list of strings; filter dropped");
            return None;
        }
    };
    let terms: Vec<String> = terms.into_iter().filter(|t| !t.is_empty()).collect();
    (!terms.is_empty()).then_some(terms)
}

fn text(key: &str, value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::String(_) | Value::Null => None,
        other => {
            warn!(key, value = %other, "expected a string; filter dropped");
            None
        }
    }
}

fn number(key: &str, value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let parsed = parsed.filter(|n| n.is_finite());
    if parsed.is_none() {
        warn!(key, value = %value, "expected a number; filter dropped");
    }
    parsed
}

fn unsigned(key: &str, value: &Value) -> Option<u64> {
    let parsed = number(key, value)?;
    if parsed >= 0.0 && parsed.fract() == 0.0 {
        Some(parsed as u64)
    } else {
        warn!(key, value = parsed, "expected a non-negative integer; filter dropped");
        None
    }
}

fn flag(key: &str, value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        other => {
            warn!(key, value = %other, "expected a boolean; filter dropped");
            None
        }
    }
}

fn range(key: &str, value: &Value) -> Option<(Option<f64>, Option<f64>)> {
    let bound = |v: Option<&Value>| match v {
        None | Some(Value::Null) => Some(None),
        Some(v) => number(key, v).map(Some),
    };
    let (min, max) = match value {
        Value::Array(items) if items.len() == 2 => (bound(items.first())?, bound(items.get(1))?),
        Value::Object(map) => (bound(map.get("min"))?, bound(map.get("max"))?),
        other => {
            warn!(key, value = %other, "expected [min, max]; filter dropped");
            return None;
        }
    };
    (min.is_some() || max.is_some()).then_some((min, max))
}

fn date(key: &str, value: &Value) -> Option<NaiveDate> {
    let parsed = value.as_str().and_then(parse_date_str);
    if parsed.is_none() {
        warn!(key, value = %value, "expected an ISO date; filter dropped");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_plan() -> Value {
        json!({
            "query_type": "hcp",
            "filters": {},
            "projection": ["npi", "name"],
            "limit": 10
        })
    }

    #[test]
    fn test_missing_fields_reported_together() {
        let err = PlanDocument::from_value(&json!({"query_type": "hcp"})).unwrap_err();
        match err {
            PlanError::PlanValidation { missing_fields, .. } => {
                assert_eq!(missing_fields, vec!["filters", "projection", "limit"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_limit_must_be_positive() {
        for bad in [json!(0), json!(-3), json!(2.5), json!("ten"), Value::Null] {
            let mut plan = base_plan();
            plan["limit"] = bad;
            assert!(matches!(PlanDocument::from_value(&plan), Err(PlanError::InvalidLimit { .. })));
        }
        let mut plan = base_plan();
        plan["limit"] = json!(25.0);
        assert_eq!(PlanDocument::from_value(&plan).unwrap().limit, 25);
    }

    #[test]
    fn test_unknown_query_type_rejected() {
        let mut plan = base_plan();
        plan["query_type"] = json!("sql");
        assert!(matches!(PlanDocument::from_value(&plan), Err(PlanError::PlanValidation { .. })));
    }

    #[test]
    fn test_canonical_filter_order() {
        let filters = ProviderFilters::from_value(&json!({
            "text_search": "spine",
            "top_percentile_publications": 10,
            "publications_min": 5,
            "specialty_any": ["Neurology"],
        }));
        let stages: Vec<FilterStage> = filters.predicates().iter().map(|p| p.stage()).collect();
        assert_eq!(stages, vec![
            FilterStage::Categorical,
            FilterStage::Numeric,
            FilterStage::Percentile,
            FilterStage::Text,
        ]);
    }

    #[test]
    fn test_wrong_types_are_dropped() {
        let filters = ProviderFilters::from_value(&json!({
            "specialty_any": 42,
            "publications_min": "many",
            "has_linkedin": "yes",
            "state_any": ["CA"],
            "totally_unknown": true,
            "hospital_any": null,
        }));
        assert_eq!(filters.predicates(), &[ProviderPredicate::ListMembership {
            field: ListField::States,
            mode: MatchMode::Any,
            terms: vec!["CA".to_string()],
        }]);
    }

    #[test]
    fn test_range_and_legacy_keys() {
        let filters = ProviderFilters::from_value(&json!({
            "payments_range": [1, 10],
            "clinical_trials_min": 2,
        }));
        assert!(filters.predicates().contains(&ProviderPredicate::CountRange {
            field: CountField::Payments, min: Some(1.0), max: Some(10.0),
        }));
        assert!(filters.predicates().contains(&ProviderPredicate::CountRange {
            field: CountField::ClinicalTrials, min: Some(2.0), max: None,
        }));

        let claims = ClaimsFilters::from_value(&json!({
            "drug_any": ["Mounjaro"],
            "negate": true,
            "date_range_months": 6,
            "prescription_count_min": 3,
        })).unwrap();
        assert!(claims.negate);
        assert!(!claims.include_rejected);
        assert_eq!(claims.prescription_count_min, Some(3));
        assert!(claims.predicates.contains(&ClaimPredicate::Drugs {
            mode: MatchMode::Any,
            terms: vec!["Mounjaro".to_string()],
        }));
        assert!(claims.predicates.contains(&ClaimPredicate::RelativeMonths(6)));
    }

    #[test]
    fn test_oversized_month_window_saturates() {
        let claims = ClaimsFilters::from_value(&json!({"date_range_months": 4294967298u64})).unwrap();
        assert_eq!(claims.predicates, vec![ClaimPredicate::RelativeMonths(u32::MAX)]);
    }

    #[test]
    fn test_order_by_parsing() {
        assert_eq!(OrderBy::parse("num_publications DESC"), Some(OrderBy {
            column: "num_publications".to_string(),
            direction: SortDirection::Desc,
        }));
        assert_eq!(OrderBy::parse("name").map(|o| o.direction), Some(SortDirection::Asc));
        assert_eq!(OrderBy::parse("   "), None);
    }

    #[test]
    fn test_analytics_and_aggregation() {
        let analytics = AnalyticsSpec::from_value(&json!({
            "rank_by": "num_publications",
            "composite_score": {"publications": true},
            "categorize": "num_clinical_trials",
        })).unwrap();
        assert_eq!(analytics.rank_by.as_deref(), Some("num_publications"));
        assert_eq!(analytics.composite, Some(CompositeSpec { publications: true, clinical_trials: false }));
        assert_eq!(analytics.categorize, vec!["num_clinical_trials".to_string()]);
        assert_eq!(AnalyticsSpec::from_value(&json!({})), None);

        let agg = AggregationSpec::from_value(&json!({"group_by": "PAYER_PAYER_NM"})).unwrap();
        assert_eq!(agg.group_by, GroupBy::PayerName);
        assert_eq!(AggregationSpec::from_value(&json!({"group_by": "color"})), None);
    }
}
