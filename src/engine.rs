/*!
 * Plan engine
 *
 * Entry point for executing plans. The engine owns the current dataset
 * snapshot behind an [`ArcSwap`]: every plan runs against the snapshot it
 * loaded when it started, and a reload swaps in a new snapshot atomically
 * without blocking plans already in flight.
 */

use std::sync::Arc;
use arc_swap::ArcSwap;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

use crate::config::EngineConfig;
use crate::dataset::{Dataset, DatasetBuilder};
use crate::executor::{Deadline, PlanExecutor};
use crate::plan::PlanDocument;
use crate::result::QueryResult;
use crate::Result;

/// Executes plans against a swappable dataset snapshot
///
/// # Example
/// ```no_run
/// # use hcp_targeting::prelude::*;
/// # fn main() -> Result<()> {
/// let config = ConfigBuilder::new()
///     .providers_path("data/providers.csv")
///     .claims_path("data/claims.csv")
///     .build();
/// let engine = PlanEngine::from_config(config)?;
/// let result = engine.execute_json(r#"{
///     "query_type": "hcp",
///     "filters": {"specialty_any": ["neurology"], "publications_min": 20},
///     "projection": ["npi", "name"],
///     "limit": 10
/// }"#)?;
/// println!("{} providers", result.len());
/// # Ok(())
/// # }
/// ```
pub struct PlanEngine {
    snapshot: ArcSwap<Dataset>,
    config: EngineConfig,
}

impl PlanEngine {
    pub fn new(dataset: Dataset, config: EngineConfig) -> Self {
        Self { snapshot: ArcSwap::from_pointee(dataset), config }
    }

    /// Load the files named by `config` and build the first snapshot
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let dataset = DatasetBuilder::from_config(&config).build()?;
        Ok(Self::new(dataset, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The snapshot new plans currently run against
    pub fn snapshot(&self) -> Arc<Dataset> {
        self.snapshot.load_full()
    }

    /// Swap in a new snapshot; plans already running keep the old one
    pub fn reload(&self, dataset: Dataset) {
        info!(providers = dataset.len(), claims = dataset.claims().len(), "swapping dataset snapshot");
        self.snapshot.store(Arc::new(dataset));
    }

    /// Rebuild from the configured files and swap the result in
    pub fn reload_from_config(&self) -> Result<()> {
        let dataset = DatasetBuilder::from_config(&self.config)
            .catalogs(self.snapshot.load().catalogs_handle())
            .build()?;
        self.reload(dataset);
        Ok(())
    }

    /// "Now" for relative date filters
    pub fn reference_date(&self) -> NaiveDate {
        self.config.reference_date.unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub fn execute(&self, plan: &PlanDocument) -> Result<QueryResult> {
        let snapshot = self.snapshot.load_full();
        PlanExecutor::new(&snapshot, self.reference_date())
            .with_deadline(Deadline::new(self.config.filter_timeout_ms))
            .execute(plan)
    }

    /// Validate and execute a plan given as JSON text
    pub fn execute_json(&self, plan: &str) -> Result<QueryResult> {
        self.execute(&PlanDocument::from_json(plan)?)
    }

    /// Validate and execute a plan given as a JSON value
    pub fn execute_value(&self, plan: &Value) -> Result<QueryResult> {
        self.execute(&PlanDocument::from_value(plan)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::{Npi, ProviderRecord};
    use serde_json::json;

    fn provider(npi: &str) -> ProviderRecord {
        ProviderRecord::new(Npi::new(npi).unwrap(), format!("Dr {npi}"))
    }

    fn plan() -> Value {
        json!({"query_type": "hcp", "filters": {}, "projection": ["npi"], "limit": 10})
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let engine = PlanEngine::new(Dataset::new(vec![provider("1")], Vec::new()), EngineConfig::default());
        let before = engine.snapshot();
        assert_eq!(engine.execute_value(&plan()).unwrap().len(), 1);

        engine.reload(Dataset::new(vec![provider("1"), provider("2")], Vec::new()));
        assert_eq!(engine.execute_value(&plan()).unwrap().len(), 2);
        // a snapshot held across the reload is unchanged
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn test_invalid_plan_is_rejected_before_execution() {
        let engine = PlanEngine::new(Dataset::empty(), EngineConfig::default());
        assert!(engine.execute_json(r#"{"query_type": "hcp"}"#).is_err());
        assert!(engine.execute_json("not json").is_err());
    }

    #[test]
    fn test_configured_reference_date() {
        let config = EngineConfig {
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..EngineConfig::default()
        };
        let engine = PlanEngine::new(Dataset::empty(), config);
        assert_eq!(engine.reference_date(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
