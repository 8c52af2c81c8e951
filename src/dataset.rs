/*!
 * Immutable dataset snapshot
 *
 * Holds the normalized provider and claim collections together with the
 * indices derived from them. A snapshot is built once and never mutated;
 * reloading data means building a new snapshot and swapping it in.
 */

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::ProviderAnalytics;
use crate::catalog::Catalogs;
use crate::config::{EngineConfig, TextSearchConfig};
use crate::data_types::*;
use crate::normalize::{self, NormalizeStats, RawClaimRow, RawProviderRow};
use crate::provider_filters::PercentileCache;
use crate::reader::RecordReader;
use crate::text_search::TextSearch;
use crate::{PlanError, Result};

enum Source<R, T> {
    None,
    Path(PathBuf),
    Rows(Vec<R>),
    Records(Vec<T>),
}

/// Builder for a [`Dataset`] snapshot
///
/// # Example
/// ```no_run
/// # use hcp_targeting::dataset::DatasetBuilder;
/// let dataset = DatasetBuilder::new()
///     .providers_path("data/providers.csv")
///     .claims_path("data/claims.csv")
///     .skip_invalid_records(true)
///     .build()?;
/// # Ok::<(), hcp_targeting::PlanError>(())
/// ```
pub struct DatasetBuilder {
    providers: Source<RawProviderRow, ProviderRecord>,
    claims: Source<RawClaimRow, ClaimRecord>,
    catalogs: Option<Arc<Catalogs>>,
    text_search: TextSearchConfig,
    skip_invalid_records: bool,
    #[cfg(feature = "progress")]
    show_progress: bool,
}

impl Default for DatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self {
            providers: Source::None,
            claims: Source::None,
            catalogs: None,
            text_search: TextSearchConfig::default(),
            skip_invalid_records: true,
            #[cfg(feature = "progress")]
            show_progress: false,
        }
    }

    /// Builder preloaded with the paths and options of `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut builder = Self::new()
            .text_search(config.text_search.clone())
            .skip_invalid_records(config.skip_invalid_records);
        #[cfg(feature = "progress")]
        {
            builder = builder.show_progress(config.show_progress);
        }
        if let Some(path) = &config.providers_path {
            builder = builder.providers_path(path);
        }
        if let Some(path) = &config.claims_path {
            builder = builder.claims_path(path);
        }
        builder
    }

    /// Provider CSV file
    pub fn providers_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.providers = Source::Path(path.as_ref().to_path_buf());
        self
    }

    /// Claims CSV file
    pub fn claims_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.claims = Source::Path(path.as_ref().to_path_buf());
        self
    }

    /// Raw provider rows, normalized during build
    pub fn provider_rows(mut self, rows: Vec<RawProviderRow>) -> Self {
        self.providers = Source::Rows(rows);
        self
    }

    /// Raw claim rows, normalized during build
    pub fn claim_rows(mut self, rows: Vec<RawClaimRow>) -> Self {
        self.claims = Source::Rows(rows);
        self
    }

    /// Already-normalized provider records
    pub fn providers(mut self, providers: Vec<ProviderRecord>) -> Self {
        self.providers = Source::Records(providers);
        self
    }

    /// Already-normalized claim records
    pub fn claims(mut self, claims: Vec<ClaimRecord>) -> Self {
        self.claims = Source::Records(claims);
        self
    }

    /// Synonym catalogs shared by every snapshot; the built-in set by default
    pub fn catalogs(mut self, catalogs: Arc<Catalogs>) -> Self {
        self.catalogs = Some(catalogs);
        self
    }

    pub fn text_search(mut self, config: TextSearchConfig) -> Self {
        self.text_search = config;
        self
    }

    /// Skip invalid rows (true) or fail the load on the first one (false)
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    #[cfg(feature = "progress")]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn reader(&self) -> RecordReader {
        let reader = RecordReader::new().with_skip_invalid_records(self.skip_invalid_records);
        #[cfg(feature = "progress")]
        let reader = reader.with_progress_bar(self.show_progress);
        reader
    }

    /// Load, normalize and index both collections
    pub fn build(self) -> Result<Dataset> {
        if matches!((&self.providers, &self.claims), (Source::None, Source::None)) {
            return Err(PlanError::Custom {
                message: "No provider or claims data specified".to_string(),
                suggestion: Some("Use .providers_path() or .claims_path() to specify the source files".to_string()),
            });
        }

        let reader = self.reader();
        let (providers, provider_stats) = match self.providers {
            Source::None => (Vec::new(), NormalizeStats::default()),
            Source::Path(path) => {
                info!(path = %path.display(), "loading providers");
                reader.load_providers(&path)?
            }
            Source::Rows(rows) => normalize::normalize_providers(&rows),
            Source::Records(records) => dedupe_providers(records),
        };
        let (claims, claim_stats) = match self.claims {
            Source::None => (Vec::new(), NormalizeStats::default()),
            Source::Path(path) => {
                info!(path = %path.display(), "loading claims");
                reader.load_claims(&path)?
            }
            Source::Rows(rows) => normalize::normalize_claims(&rows),
            Source::Records(records) => {
                let stats = NormalizeStats { accepted: records.len(), ..Default::default() };
                (records, stats)
            }
        };

        let catalogs = self.catalogs.unwrap_or_else(|| Arc::new(Catalogs::standard()));
        let dataset = Dataset::assemble(providers, claims, catalogs, &self.text_search, provider_stats, claim_stats);
        info!(
            providers = dataset.providers.len(),
            claims = dataset.claims.len(),
            text_index = dataset.text_search.has_index(),
            "dataset ready"
        );
        Ok(dataset)
    }
}

/// Keep the first record for each NPI
fn dedupe_providers(records: Vec<ProviderRecord>) -> (Vec<ProviderRecord>, NormalizeStats) {
    let mut seen: HashSet<Npi> = HashSet::new();
    let mut stats = NormalizeStats::default();
    let providers: Vec<ProviderRecord> = records.into_iter()
        .filter(|p| {
            let fresh = seen.insert(p.npi.clone());
            if !fresh {
                stats.dropped_duplicates += 1;
            }
            fresh
        })
        .collect();
    if stats.dropped_duplicates > 0 {
        warn!(dropped = stats.dropped_duplicates, "duplicate provider NPIs dropped");
    }
    stats.accepted = providers.len();
    (providers, stats)
}

/// One immutable snapshot of both collections and their indices
pub struct Dataset {
    providers: Vec<ProviderRecord>,
    claims: Vec<ClaimRecord>,
    catalogs: Arc<Catalogs>,

    npi_index: HashMap<Npi, usize>,
    specialty_index: HashMap<String, Vec<usize>>,
    state_index: HashMap<String, Vec<usize>>,
    hospital_index: HashMap<String, Vec<usize>>,
    prescriber_index: HashMap<Npi, Vec<usize>>,

    percentiles: PercentileCache,
    text_search: TextSearch,

    provider_stats: NormalizeStats,
    claim_stats: NormalizeStats,
}

impl Dataset {
    /// Snapshot over already-normalized records with the built-in catalogs
    pub fn new(providers: Vec<ProviderRecord>, claims: Vec<ClaimRecord>) -> Self {
        let (providers, provider_stats) = dedupe_providers(providers);
        let claim_stats = NormalizeStats { accepted: claims.len(), ..Default::default() };
        Self::assemble(
            providers,
            claims,
            Arc::new(Catalogs::standard()),
            &TextSearchConfig::default(),
            provider_stats,
            claim_stats,
        )
    }

    /// An empty snapshot
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    fn assemble(
        providers: Vec<ProviderRecord>,
        claims: Vec<ClaimRecord>,
        catalogs: Arc<Catalogs>,
        text_config: &TextSearchConfig,
        provider_stats: NormalizeStats,
        claim_stats: NormalizeStats,
    ) -> Self {
        let text_search = if providers.is_empty() {
            TextSearch::keyword_only()
        } else {
            TextSearch::build(&providers, text_config)
        };
        let mut dataset = Self {
            percentiles: PercentileCache::build(&providers),
            text_search,
            providers,
            claims,
            catalogs,
            npi_index: HashMap::new(),
            specialty_index: HashMap::new(),
            state_index: HashMap::new(),
            hospital_index: HashMap::new(),
            prescriber_index: HashMap::new(),
            provider_stats,
            claim_stats,
        };
        dataset.build_indexes();
        dataset
    }

    fn build_indexes(&mut self) {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.npi_index = self.providers
                .par_iter()
                .enumerate()
                .map(|(idx, provider)| (provider.npi.clone(), idx))
                .collect();
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.npi_index = self.providers.iter()
                .enumerate()
                .map(|(idx, provider)| (provider.npi.clone(), idx))
                .collect();
        }

        for (idx, provider) in self.providers.iter().enumerate() {
            for specialty in &provider.specialties {
                push_unique(&mut self.specialty_index, lower_key(specialty), idx);
            }
            for state in &provider.states {
                push_unique(&mut self.state_index, self.catalogs.state_code(state).unwrap_or_else(|| state_key(state)), idx);
            }
            for hospital in provider.hospital_names.iter().chain(&provider.system_names) {
                push_unique(&mut self.hospital_index, lower_key(hospital), idx);
            }
        }

        for (idx, claim) in self.claims.iter().enumerate() {
            self.prescriber_index.entry(claim.prescriber_npi.clone()).or_default().push(idx);
        }
    }

    pub fn providers(&self) -> &[ProviderRecord] {
        &self.providers
    }

    pub fn claims(&self) -> &[ClaimRecord] {
        &self.claims
    }

    pub fn catalogs(&self) -> &Catalogs {
        &self.catalogs
    }

    /// Shared handle to the catalogs, for building the next snapshot
    pub fn catalogs_handle(&self) -> Arc<Catalogs> {
        Arc::clone(&self.catalogs)
    }

    pub fn text_search(&self) -> &TextSearch {
        &self.text_search
    }

    pub fn percentiles(&self) -> &PercentileCache {
        &self.percentiles
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_stats(&self) -> &NormalizeStats {
        &self.provider_stats
    }

    pub fn claim_stats(&self) -> &NormalizeStats {
        &self.claim_stats
    }

    /// Get a provider by NPI
    pub fn get_by_npi(&self, npi: &Npi) -> Option<&ProviderRecord> {
        self.npi_index.get(npi).and_then(|&idx| self.providers.get(idx))
    }

    /// Providers listing exactly this specialty (case-insensitive)
    pub fn get_by_specialty(&self, specialty: &str) -> Vec<&ProviderRecord> {
        self.lookup(&self.specialty_index, &lower_key(specialty))
    }

    /// Providers practicing in a state, by name or code
    pub fn get_by_state(&self, state: &str) -> Vec<&ProviderRecord> {
        let key = self.catalogs.state_code(state).unwrap_or_else(|| state_key(state));
        self.lookup(&self.state_index, &key)
    }

    /// Providers affiliated with a hospital or health system (case-insensitive)
    pub fn get_by_hospital(&self, hospital: &str) -> Vec<&ProviderRecord> {
        self.lookup(&self.hospital_index, &lower_key(hospital))
    }

    /// Claims written by one prescriber, in collection order
    pub fn claims_for_prescriber(&self, npi: &Npi) -> Vec<&ClaimRecord> {
        self.prescriber_index.get(npi)
            .map(|indices| indices.iter().filter_map(|&idx| self.claims.get(idx)).collect())
            .unwrap_or_default()
    }

    fn lookup(&self, index: &HashMap<String, Vec<usize>>, key: &str) -> Vec<&ProviderRecord> {
        index.get(key)
            .map(|indices| indices.iter().filter_map(|&idx| self.providers.get(idx)).collect())
            .unwrap_or_default()
    }

    pub fn statistics(&self) -> DatasetStatistics {
        DatasetStatistics::from_dataset(self)
    }

    /// Counting helpers over the provider collection
    pub fn analytics(&self) -> ProviderAnalytics<'_> {
        ProviderAnalytics::new(&self.providers)
    }
}

fn lower_key(value: &str) -> String {
    value.trim().to_lowercase()
}

fn state_key(value: &str) -> String {
    value.trim().to_uppercase()
}

fn push_unique(index: &mut HashMap<String, Vec<usize>>, key: String, idx: usize) {
    if key.is_empty() {
        return;
    }
    let entries = index.entry(key).or_default();
    if entries.last() != Some(&idx) {
        entries.push(idx);
    }
}

/// Dataset statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DatasetStatistics {
    pub total_providers: usize,
    pub total_claims: usize,
    pub dispensed_claims: usize,
    pub rejected_claims: usize,
    pub unique_specialties: usize,
    pub states_represented: usize,
    pub unique_hospitals: usize,
    pub unique_prescribers: usize,
    pub prescribers_with_provider_record: usize,
    pub dropped_provider_rows: usize,
    pub dropped_claim_rows: usize,
}

impl DatasetStatistics {
    /// Calculate statistics from a dataset
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let rejected_claims = dataset.claims.iter()
            .filter(|c| c.status == ClaimStatus::Rejected)
            .count();
        let prescribers_with_provider_record = dataset.prescriber_index.keys()
            .filter(|npi| dataset.npi_index.contains_key(*npi))
            .count();

        Self {
            total_providers: dataset.providers.len(),
            total_claims: dataset.claims.len(),
            dispensed_claims: dataset.claims.len() - rejected_claims,
            rejected_claims,
            unique_specialties: dataset.specialty_index.len(),
            states_represented: dataset.state_index.len(),
            unique_hospitals: dataset.hospital_index.len(),
            unique_prescribers: dataset.prescriber_index.len(),
            prescribers_with_provider_record,
            dropped_provider_rows: dataset.provider_stats.dropped_invalid_npi + dataset.provider_stats.dropped_duplicates,
            dropped_claim_rows: dataset.claim_stats.dropped_invalid_npi,
        }
    }

    /// Print a formatted summary of the statistics
    pub fn print_summary(&self) {
        let share = |part: usize, total: usize| {
            if total == 0 { 0.0 } else { part as f64 / total as f64 * 100.0 }
        };
        println!("=== Dataset Statistics ===");
        println!("Total Providers: {}", self.total_providers);
        println!("  Specialties: {}", self.unique_specialties);
        println!("  States Represented: {}", self.states_represented);
        println!("  Hospitals / Systems: {}", self.unique_hospitals);
        println!("Total Claims: {}", self.total_claims);
        println!("  Dispensed: {} ({:.1}%)",
            self.dispensed_claims,
            share(self.dispensed_claims, self.total_claims)
        );
        println!("  Rejected: {} ({:.1}%)",
            self.rejected_claims,
            share(self.rejected_claims, self.total_claims)
        );
        println!("Prescribers: {} ({} with a provider record)",
            self.unique_prescribers,
            self.prescribers_with_provider_record
        );

        if self.dropped_provider_rows > 0 {
            println!("Dropped Provider Rows: {}", self.dropped_provider_rows);
        }
        if self.dropped_claim_rows > 0 {
            println!("Dropped Claim Rows: {}", self.dropped_claim_rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(npi: &str, specialty: &str, state: &str) -> ProviderRecord {
        let mut p = ProviderRecord::new(Npi::new(npi).unwrap(), format!("Dr {npi}"));
        p.specialties = vec![specialty.to_string()];
        p.states = vec![state.to_string()];
        p.hospital_names = vec!["Mayo Clinic".to_string()];
        p
    }

    #[test]
    fn test_lookups() {
        let dataset = Dataset::new(
            vec![provider("1", "Neurology", "California"), provider("2", "Cardiology", "CA")],
            vec![ClaimRecord::new("a", Npi::new("2").unwrap())],
        );
        assert_eq!(dataset.get_by_npi(&Npi::new("2").unwrap()).map(|p| p.name.as_str()), Some("Dr 2"));
        assert_eq!(dataset.get_by_specialty("neurology").len(), 1);
        assert_eq!(dataset.get_by_state("ca").len(), 2);
        assert_eq!(dataset.get_by_state("California").len(), 2);
        assert_eq!(dataset.get_by_hospital("MAYO CLINIC").len(), 2);
        assert_eq!(dataset.claims_for_prescriber(&Npi::new("2").unwrap()).len(), 1);
        assert!(dataset.claims_for_prescriber(&Npi::new("1").unwrap()).is_empty());
    }

    #[test]
    fn test_duplicate_providers_keep_first() {
        let dataset = Dataset::new(
            vec![provider("1", "Neurology", "CA"), provider("1", "Cardiology", "TX")],
            Vec::new(),
        );
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.providers()[0].specialties, vec!["Neurology".to_string()]);
        assert_eq!(dataset.statistics().dropped_provider_rows, 1);
    }

    #[test]
    fn test_statistics() {
        let mut rejected = ClaimRecord::new("b", Npi::new("9").unwrap());
        rejected.status = ClaimStatus::Rejected;
        let dataset = Dataset::new(
            vec![provider("1", "Neurology", "CA")],
            vec![ClaimRecord::new("a", Npi::new("1").unwrap()), rejected],
        );
        let stats = dataset.statistics();
        assert_eq!(stats.total_claims, 2);
        assert_eq!(stats.rejected_claims, 1);
        assert_eq!(stats.unique_prescribers, 2);
        assert_eq!(stats.prescribers_with_provider_record, 1);
    }

    #[test]
    fn test_builder_requires_a_source() {
        assert!(DatasetBuilder::new().build().is_err());
    }
}
