/*!
 * Data type definitions for provider and claim records
 *
 * Typed representations of the two linked collections. Records are produced
 * by the normalizer and never mutated afterwards; list-valued fields are
 * always present (possibly empty) so multi-valued matching never has to
 * special-case a missing list.
 */

use serde::{Deserialize, Serialize};
use chrono::NaiveDate;

/// NPI (National Provider Identifier) in canonical digit-string form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Npi(pub String);

impl Npi {
    /// Canonicalize and validate an NPI.
    ///
    /// Accepts plain digit strings as well as the float renderings that
    /// spreadsheet exports produce (`"1033439047.0"`, `"1.033439047E9"`).
    /// Empty and all-zero identifiers are rejected.
    pub fn new(npi: impl AsRef<str>) -> Result<Self, crate::PlanError> {
        let raw = npi.as_ref();
        let canonical = canonical_digits(raw.trim())
            .ok_or_else(|| crate::PlanError::invalid_npi(raw))?;

        if canonical.trim_start_matches('0').is_empty() {
            return Err(crate::PlanError::invalid_npi(raw));
        }

        Ok(Npi(canonical))
    }

    /// Get the NPI as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Npi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn canonical_digits(value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return Some(value.to_string());
    }
    // "1033439047.0" -> integral part, only when the fraction is all zeros
    if let Some((int_part, frac)) = value.split_once('.') {
        if !int_part.is_empty()
            && int_part.chars().all(|c| c.is_ascii_digit())
            && frac.chars().all(|c| c == '0')
        {
            return Some(int_part.to_string());
        }
    }
    // Scientific notation from float columns
    if value.contains(['e', 'E']) {
        let parsed: f64 = value.parse().ok()?;
        if parsed.is_finite() && parsed >= 0.0 && parsed.fract() == 0.0 && parsed < 1e16 {
            return Some(format!("{}", parsed as u64));
        }
    }
    None
}

/// Numeric provider columns usable in range and percentile filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountField {
    Publications,
    ClinicalTrials,
    Payments,
}

impl CountField {
    pub const ALL: [CountField; 3] = [
        CountField::Publications,
        CountField::ClinicalTrials,
        CountField::Payments,
    ];

    /// Output column name for this count
    pub fn column(&self) -> &'static str {
        match self {
            CountField::Publications => "num_publications",
            CountField::ClinicalTrials => "num_clinical_trials",
            CountField::Payments => "num_payments",
        }
    }

    /// Resolve a column name (`num_publications` or `publications`)
    pub fn from_column(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "num_publications" | "publications" => Some(CountField::Publications),
            "num_clinical_trials" | "clinical_trials" => Some(CountField::ClinicalTrials),
            "num_payments" | "payments" => Some(CountField::Payments),
            _ => None,
        }
    }
}

/// List-valued provider columns usable in membership filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListField {
    Specialties,
    States,
    Hospitals,
    Systems,
    Conditions,
}

impl ListField {
    pub fn column(&self) -> &'static str {
        match self {
            ListField::Specialties => "specialties",
            ListField::States => "states",
            ListField::Hospitals => "hospital_names",
            ListField::Systems => "system_names",
            ListField::Conditions => "conditions",
        }
    }
}

/// Social platforms with a presence flag on the provider record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialPlatform {
    Linkedin,
    Twitter,
    Youtube,
    Podcast,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 4] = [
        SocialPlatform::Linkedin,
        SocialPlatform::Twitter,
        SocialPlatform::Youtube,
        SocialPlatform::Podcast,
    ];

    /// Case-insensitive lookup; `x` is accepted for twitter.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "linkedin" => Some(SocialPlatform::Linkedin),
            "twitter" | "x" => Some(SocialPlatform::Twitter),
            "youtube" => Some(SocialPlatform::Youtube),
            "podcast" | "podcasts" => Some(SocialPlatform::Podcast),
            _ => None,
        }
    }

    pub fn flag_column(&self) -> &'static str {
        match self {
            SocialPlatform::Linkedin => "has_linkedin",
            SocialPlatform::Twitter => "has_twitter",
            SocialPlatform::Youtube => "has_youtube",
            SocialPlatform::Podcast => "has_podcast",
        }
    }
}

/// Healthcare provider record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub npi: Npi,
    pub name: String,
    pub gender: Option<String>,
    pub email: Option<String>,

    // Multi-valued fields, never null
    pub specialties: Vec<String>,
    pub states: Vec<String>,
    pub hospital_names: Vec<String>,
    pub system_names: Vec<String>,
    pub conditions: Vec<String>,
    pub affiliations: Vec<String>,

    pub org_type: Option<String>,

    // Counts, missing source values are stored as 0
    pub num_publications: u64,
    pub num_clinical_trials: u64,
    pub num_payments: u64,

    // Social presence flags
    pub has_linkedin: bool,
    pub has_twitter: bool,
    pub has_youtube: bool,
    pub has_podcast: bool,
}

impl ProviderRecord {
    /// Create a record with empty lists and zero counts
    pub fn new(npi: Npi, name: impl Into<String>) -> Self {
        Self {
            npi,
            name: name.into(),
            gender: None,
            email: None,
            specialties: Vec::new(),
            states: Vec::new(),
            hospital_names: Vec::new(),
            system_names: Vec::new(),
            conditions: Vec::new(),
            affiliations: Vec::new(),
            org_type: None,
            num_publications: 0,
            num_clinical_trials: 0,
            num_payments: 0,
            has_linkedin: false,
            has_twitter: false,
            has_youtube: false,
            has_podcast: false,
        }
    }

    /// Get a numeric count column
    pub fn count(&self, field: CountField) -> u64 {
        match field {
            CountField::Publications => self.num_publications,
            CountField::ClinicalTrials => self.num_clinical_trials,
            CountField::Payments => self.num_payments,
        }
    }

    /// Get a list-valued column
    pub fn list(&self, field: ListField) -> &[String] {
        match field {
            ListField::Specialties => &self.specialties,
            ListField::States => &self.states,
            ListField::Hospitals => &self.hospital_names,
            ListField::Systems => &self.system_names,
            ListField::Conditions => &self.conditions,
        }
    }

    /// Presence flag for a social platform
    pub fn has_platform(&self, platform: SocialPlatform) -> bool {
        match platform {
            SocialPlatform::Linkedin => self.has_linkedin,
            SocialPlatform::Twitter => self.has_twitter,
            SocialPlatform::Youtube => self.has_youtube,
            SocialPlatform::Podcast => self.has_podcast,
        }
    }
}

/// Claim processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    #[default]
    Dispensed,
    Rejected,
}

impl ClaimStatus {
    /// Parse a source status value; unknown text is treated as dispensed
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "rejected" | "reject" | "r" | "denied" | "reversed" => ClaimStatus::Rejected,
            _ => ClaimStatus::Dispensed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Dispensed => "dispensed",
            ClaimStatus::Rejected => "rejected",
        }
    }
}

/// Date columns on a claim, in filter priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimDateField {
    Service,
    PrescriptionWritten,
    Transaction,
}

impl ClaimDateField {
    pub const PRIORITY: [ClaimDateField; 3] = [
        ClaimDateField::Service,
        ClaimDateField::PrescriptionWritten,
        ClaimDateField::Transaction,
    ];
}

/// Prescription claim record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: String,
    pub patient_id: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub prescription_written_date: Option<NaiveDate>,
    pub transaction_date: Option<NaiveDate>,
    pub prescriber_npi: Npi,

    // Drug fields
    pub ndc: Option<String>,
    pub generic_name: Option<String>,
    pub brand_name: Option<String>,
    pub drug_description: Option<String>,
    /// Lower-cased concatenation of generic, brand and description
    pub all_drug_names: String,

    pub pharmacy_name: Option<String>,
    pub pharmacy_type: Option<String>,
    pub pharmacy_state: Option<String>,
    pub payer_name: Option<String>,

    // Money and quantities
    pub total_paid: Option<f64>,
    pub patient_pay: Option<f64>,
    pub generic_cost: Option<f64>,
    pub quantity: Option<f64>,
    pub days_supply: Option<f64>,

    pub status: ClaimStatus,
}

impl ClaimRecord {
    /// Create a dispensed claim with no optional fields set
    pub fn new(claim_id: impl Into<String>, prescriber_npi: Npi) -> Self {
        Self {
            claim_id: claim_id.into(),
            patient_id: None,
            service_date: None,
            prescription_written_date: None,
            transaction_date: None,
            prescriber_npi,
            ndc: None,
            generic_name: None,
            brand_name: None,
            drug_description: None,
            all_drug_names: String::new(),
            pharmacy_name: None,
            pharmacy_type: None,
            pharmacy_state: None,
            payer_name: None,
            total_paid: None,
            patient_pay: None,
            generic_cost: None,
            quantity: None,
            days_supply: None,
            status: ClaimStatus::Dispensed,
        }
    }

    /// Get a date column
    pub fn date(&self, field: ClaimDateField) -> Option<NaiveDate> {
        match field {
            ClaimDateField::Service => self.service_date,
            ClaimDateField::PrescriptionWritten => self.prescription_written_date,
            ClaimDateField::Transaction => self.transaction_date,
        }
    }

    /// Rebuild the concatenated drug-name field from the drug columns
    pub fn refresh_drug_names(&mut self) {
        self.all_drug_names = [&self.generic_name, &self.brand_name, &self.drug_description]
            .iter()
            .filter_map(|v| v.as_deref())
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(" | ");
    }

    /// Preferred display name of the dispensed drug
    pub fn drug_name(&self) -> Option<&str> {
        self.generic_name.as_deref()
            .or(self.brand_name.as_deref())
            .or(self.drug_description.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npi_canonicalization() {
        assert_eq!(Npi::new("1033439047").unwrap().as_str(), "1033439047");
        assert_eq!(Npi::new(" 1033439047.0 ").unwrap().as_str(), "1033439047");
        assert_eq!(Npi::new("1.033439047E9").unwrap().as_str(), "1033439047");
        assert!(Npi::new("").is_err());
        assert!(Npi::new("0").is_err());
        assert!(Npi::new("0.0").is_err());
        assert!(Npi::new("12AB").is_err());
        assert!(Npi::new("12.5").is_err());
    }

    #[test]
    fn test_drug_names_concatenation() {
        let mut claim = ClaimRecord::new("a", Npi::new("1").unwrap());
        claim.generic_name = Some("Tirzepatide".into());
        claim.brand_name = Some("Mounjaro".into());
        claim.refresh_drug_names();
        assert_eq!(claim.all_drug_names, "tirzepatide | mounjaro");
        assert_eq!(claim.drug_name(), Some("Tirzepatide"));
    }

    #[test]
    fn test_social_platform_lookup() {
        assert_eq!(SocialPlatform::from_name("LinkedIn"), Some(SocialPlatform::Linkedin));
        assert_eq!(SocialPlatform::from_name("X"), Some(SocialPlatform::Twitter));
        assert_eq!(SocialPlatform::from_name("myspace"), None);
    }
}
