/*!
 * CSV reader for provider and claim extracts
 *
 * Reads the two source files into raw rows, validates their headers and
 * hands the rows to the normalizer. Every cell is kept as text so that
 * identifiers with leading zeros survive until normalization.
 */

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use csv::{ReaderBuilder, StringRecord};
use serde_json::Value;
use tracing::{debug, info, warn};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    Result, PlanError, ErrorContext,
    data_types::{ClaimRecord, ProviderRecord},
    normalize::{self, NormalizeStats, RawClaimRow, RawProviderRow},
    schema::{ClaimSchema, ProviderSchema},
};

/// Maximum number of skipped rows reported individually
const MAX_REPORTED_SKIPS: usize = 10;

/// Header name to column position
struct HeaderIndex(HashMap<String, usize>);

impl HeaderIndex {
    fn new(headers: &StringRecord) -> Self {
        Self(headers.iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect())
    }

    fn headers(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Non-empty cell for the first spelling present in the header
    fn field(&self, record: &StringRecord, names: &[&str]) -> Option<Value> {
        names.iter()
            .find_map(|name| self.0.get(*name))
            .and_then(|&idx| record.get(idx))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
    }
}

/// CSV reader for the provider and claims collections
pub struct RecordReader {
    /// Whether to validate CSV headers against the required columns
    validate_headers: bool,
    /// Whether to skip invalid records (true) or fail on first error (false)
    skip_invalid_records: bool,
    /// Whether to show a progress bar while reading
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordReader {
    pub fn new() -> Self {
        Self {
            validate_headers: true,
            skip_invalid_records: true,
            #[cfg(feature = "progress")]
            show_progress_bar: false,
        }
    }

    /// Enable or disable header validation
    pub fn with_header_validation(mut self, validate: bool) -> Self {
        self.validate_headers = validate;
        self
    }

    /// Enable or disable skipping invalid records
    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    /// Enable or disable the progress bar
    #[cfg(feature = "progress")]
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    /// Load and normalize the provider file
    pub fn load_providers<P: AsRef<Path>>(&self, path: P) -> Result<(Vec<ProviderRecord>, NormalizeStats)> {
        let path = path.as_ref();
        let rows = self.load_provider_rows(path)?;
        self.finish_providers(rows, Some(path))
    }

    /// Load and normalize claims; claims without a prescriber are dropped
    pub fn load_claims<P: AsRef<Path>>(&self, path: P) -> Result<(Vec<ClaimRecord>, NormalizeStats)> {
        let rows = self.load_claim_rows(path)?;
        Ok(normalize::normalize_claims(&rows))
    }

    /// Read provider rows from any CSV source
    pub fn providers_from_reader<R: Read>(&self, source: R) -> Result<(Vec<ProviderRecord>, NormalizeStats)> {
        let rows = self.read_rows(source, None, 0, ProviderSchema::validate_headers, provider_row)?;
        self.finish_providers(rows, None)
    }

    /// Read claim rows from any CSV source
    pub fn claims_from_reader<R: Read>(&self, source: R) -> Result<(Vec<ClaimRecord>, NormalizeStats)> {
        let rows = self.read_rows(source, None, 0, ClaimSchema::validate_headers, claim_row)?;
        Ok(normalize::normalize_claims(&rows))
    }

    /// Load raw provider rows without normalizing them
    pub fn load_provider_rows<P: AsRef<Path>>(&self, path: P) -> Result<Vec<RawProviderRow>> {
        let path = path.as_ref();
        let (file, size) = open(path)?;
        self.read_rows(file, Some(path), size, ProviderSchema::validate_headers, provider_row)
    }

    /// Load raw claim rows without normalizing them
    pub fn load_claim_rows<P: AsRef<Path>>(&self, path: P) -> Result<Vec<RawClaimRow>> {
        let path = path.as_ref();
        let (file, size) = open(path)?;
        self.read_rows(file, Some(path), size, ClaimSchema::validate_headers, claim_row)
    }

    fn finish_providers(
        &self,
        rows: Vec<RawProviderRow>,
        path: Option<&Path>,
    ) -> Result<(Vec<ProviderRecord>, NormalizeStats)> {
        if !self.skip_invalid_records {
            if let Some((idx, err)) = rows.iter()
                .enumerate()
                .find_map(|(idx, row)| normalize::normalize_provider(row).err().map(|e| (idx, e)))
            {
                return Err(PlanError::CsvParse {
                    message: err.to_string(),
                    line: Some(idx + 2),
                    context: ErrorContext {
                        file_path: path.map(Path::to_path_buf),
                        line_number: Some(idx + 2),
                        column_name: Some("type_1_npi".to_string()),
                        ..Default::default()
                    },
                });
            }
        }
        Ok(normalize::normalize_providers(&rows))
    }

    fn read_rows<R, T>(
        &self,
        source: R,
        path: Option<&Path>,
        size_hint: u64,
        validate: fn(&[String], Option<&Path>) -> Result<()>,
        build: fn(&StringRecord, &HeaderIndex) -> T,
    ) -> Result<Vec<T>>
    where
        R: Read,
    {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let index = HeaderIndex::new(reader.headers()?);
        if self.validate_headers {
            validate(&index.headers(), path)?;
        }

        #[cfg(feature = "progress")]
        let progress_bar = (self.show_progress_bar && size_hint > 0).then(|| {
            let pb = ProgressBar::new(size_hint);
            let style = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .map(|s| s.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb
        });
        #[cfg(not(feature = "progress"))]
        let _ = size_hint;

        let start_time = Instant::now();
        let mut rows = Vec::new();
        let mut invalid_count = 0;
        let mut record = StringRecord::new();

        loop {
            match reader.read_record(&mut record) {
                Ok(true) => rows.push(build(&record, &index)),
                Ok(false) => break,
                Err(e) => {
                    let line = e.position().map(|p| p.line() as usize);
                    let error = PlanError::CsvParse {
                        message: e.to_string(),
                        line,
                        context: ErrorContext {
                            file_path: path.map(Path::to_path_buf),
                            line_number: line,
                            ..Default::default()
                        },
                    };
                    if !self.skip_invalid_records {
                        return Err(error);
                    }
                    invalid_count += 1;
                    if invalid_count <= MAX_REPORTED_SKIPS {
                        warn!("Skipping invalid record: {}", error);
                    }
                }
            }

            #[cfg(feature = "progress")]
            if let Some(ref pb) = progress_bar {
                if rows.len() % 1000 == 0 {
                    pb.set_position(reader.position().byte());
                }
            }
        }

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_with_message("Loading complete");
        }

        let elapsed = start_time.elapsed();
        info!(
            rows = rows.len(),
            skipped = invalid_count,
            file = %path.map(|p| p.display().to_string()).unwrap_or_else(|| "<reader>".to_string()),
            "Loaded rows in {:.2}s",
            elapsed.as_secs_f64()
        );

        Ok(rows)
    }
}

fn open(path: &Path) -> Result<(File, u64)> {
    if !path.exists() {
        return Err(PlanError::file_not_found_with_suggestion(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    debug!(path = %path.display(), bytes = size, "opened source file");
    Ok((file, size))
}

fn provider_row(record: &StringRecord, index: &HeaderIndex) -> RawProviderRow {
    let get_field = |names: &[&str]| index.field(record, names);

    RawProviderRow {
        type_1_npi: get_field(&["type_1_npi", "npi"]),
        name: get_field(&["name"]),
        first_name: get_field(&["first_name"]),
        middle_name: get_field(&["middle_name"]),
        last_name: get_field(&["last_name"]),
        gender: get_field(&["gender"]),
        email: get_field(&["email"]),
        specialties: get_field(&["specialties"]),
        states: get_field(&["states"]),
        hospital_names: get_field(&["hospital_names"]),
        system_names: get_field(&["system_names"]),
        conditions: get_field(&["conditions"]),
        affiliations: get_field(&["affiliations"]),
        org_type: get_field(&["org_type"]),
        num_publications: get_field(&["num_publications"]),
        num_clinical_trials: get_field(&["num_clinical_trials"]),
        num_payments: get_field(&["num_payments"]),
        has_linkedin: get_field(&["has_linkedin"]),
        has_twitter: get_field(&["has_twitter"]),
        has_youtube: get_field(&["has_youtube"]),
        has_podcast: get_field(&["has_podcast"]),
        linkedin: get_field(&["linkedin"]),
        twitter: get_field(&["twitter"]),
    }
}

fn claim_row(record: &StringRecord, index: &HeaderIndex) -> RawClaimRow {
    let get_field = |source: &str| {
        let alias = ClaimSchema::COLUMNS.iter()
            .find(|(s, _)| *s == source)
            .map(|(_, alias)| *alias)
            .unwrap_or(source);
        index.field(record, &[source, alias])
    };

    RawClaimRow {
        claim_id: get_field("RX_CLAIM_NBR"),
        patient_id: get_field("PATIENT_ID"),
        service_date: get_field("SERVICE_DATE_DD"),
        prescription_written_date: get_field("DATE_PRESCRIPTION_WRITTEN_DD"),
        transaction_date: get_field("TRANSACTION_DATE_DD"),
        prescriber_npi: get_field("PRESCRIBER_NPI_NBR"),
        ndc: get_field("NDC"),
        generic_name: get_field("NDC_GENERIC_NM"),
        brand_name: get_field("NDC_PREFERRED_BRAND_NM"),
        drug_description: get_field("NDC_DESC"),
        pharmacy_name: get_field("PHARMACY_NPI_NM"),
        pharmacy_type: get_field("PHARMACY_TYPE"),
        pharmacy_state: get_field("PHARMACY_STATE"),
        payer_name: get_field("PAYER_PAYER_NM"),
        total_paid: get_field("TOTAL_PAID_AMT"),
        patient_pay: get_field("PATIENT_TO_PAY_AMT"),
        generic_cost: get_field("GENERIC_COST_AMT"),
        quantity: get_field("DISPENSED_QUANTITY_VAL"),
        days_supply: get_field("DAYS_SUPPLY_VAL"),
        status: get_field("CLAIM_STATUS"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PROVIDERS: &str = "\
type_1_npi,first_name,last_name,specialties,states,num_publications,has_linkedin
1033439047,ANDREW,GROSSBACH,\"[\"\"NEUROLOGICAL SURGERY\"\"]\",\"[\"\"OH\"\"]\",52,True
0,NO,ONE,[],[],,
1790717296.0,ELIZABETH,MATHIS,,\"['TX']\",3,false
";

    const CLAIMS: &str = "\
RX_CLAIM_NBR,PATIENT_ID,SERVICE_DATE_DD,PRESCRIBER_NPI_NBR,NDC_GENERIC_NM,NDC_PREFERRED_BRAND_NM,TOTAL_PAID_AMT
00017,p1,2024-01-10,1033439047,TIRZEPATIDE,MOUNJARO,1023.50
c2,p2,2024-01-11,0,SEMAGLUTIDE,OZEMPIC,900
c3,p1,01/12/2024,1790717296,TIRZEPATIDE,ZEPBOUND,
";

    #[test]
    fn test_read_providers() {
        let reader = RecordReader::new();
        let (providers, stats) = reader.providers_from_reader(PROVIDERS.as_bytes()).unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(stats.dropped_invalid_npi, 1);
        assert_eq!(providers[0].name, "ANDREW GROSSBACH");
        assert_eq!(providers[0].specialties, vec!["NEUROLOGICAL SURGERY".to_string()]);
        assert!(providers[0].has_linkedin);
        assert_eq!(providers[1].npi.as_str(), "1790717296");
        assert_eq!(providers[1].states, vec!["TX".to_string()]);
        assert!(providers[1].specialties.is_empty());
    }

    #[test]
    fn test_strict_mode_rejects_bad_provider() {
        let reader = RecordReader::new().with_skip_invalid_records(false);
        let err = reader.providers_from_reader(PROVIDERS.as_bytes()).unwrap_err();
        assert!(matches!(err, PlanError::CsvParse { line: Some(3), .. }));
    }

    #[test]
    fn test_read_claims_keeps_identifier_text() {
        let reader = RecordReader::new();
        let (claims, stats) = reader.claims_from_reader(CLAIMS.as_bytes()).unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(stats.dropped_invalid_npi, 1);
        assert_eq!(claims[0].claim_id, "00017");
        assert_eq!(claims[0].total_paid, Some(1023.5));
        assert_eq!(claims[1].service_date, chrono::NaiveDate::from_ymd_opt(2024, 1, 12));
        assert_eq!(claims[1].total_paid, None);
    }

    #[test]
    fn test_missing_required_column() {
        let reader = RecordReader::new();
        let err = reader.claims_from_reader("RX_CLAIM_NBR,PATIENT_ID\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, PlanError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CLAIMS.as_bytes()).unwrap();
        let (claims, _) = RecordReader::new().load_claims(file.path()).unwrap();
        assert_eq!(claims.len(), 2);

        let missing = RecordReader::new().load_claims("/nonexistent/claims.csv");
        assert!(matches!(missing, Err(PlanError::FileNotFound { .. })));
    }
}
