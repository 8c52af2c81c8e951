/*!
 * # HCP Targeting Plan Engine
 *
 * Executes structured query plans against healthcare-provider (HCP) and
 * pharmacy-claims data, producing tabular results for targeting work.
 *
 * ## Features
 *
 * - **Four query modes**: providers only, claims only, claims written by
 *   matching providers, and providers correlated with claim activity
 * - **Synonym-aware matching**: drug, class, specialty, state, condition,
 *   payer and hospital catalogs widen user terms before matching
 * - **Aggregation and analytics**: per-prescriber statistics, composite
 *   scores, ranks and categories
 * - **Atomic reloads**: plans run against an immutable snapshot that can be
 *   swapped while queries are in flight
 *
 * ## Quick Start
 *
 * ```no_run
 * use hcp_targeting::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let config = ConfigBuilder::new()
 *     .providers_path("data/providers.csv")
 *     .claims_path("data/claims.csv")
 *     .build();
 * let engine = PlanEngine::from_config(config)?;
 *
 * // Neurologists writing tirzepatide in the last six months
 * let result = engine.execute_json(r#"{
 *     "query_type": "hcp_with_claims",
 *     "filters": {"specialty_any": ["neurology"]},
 *     "claims_filters": {"drugs_any": ["mounjaro"], "date_range_months": 6},
 *     "projection": ["npi", "name", "total_prescriptions"],
 *     "order_by": ["total_prescriptions DESC"],
 *     "limit": 25
 * }"#)?;
 *
 * println!("{}", serde_json::to_string_pretty(&result.to_json())?);
 * # Ok(())
 * # }
 * ```
 *
 * ## Loading Data
 *
 * ```no_run
 * # use hcp_targeting::prelude::*;
 * # fn main() -> Result<()> {
 * let dataset = DatasetBuilder::new()
 *     .providers_path("data/providers.csv")
 *     .claims_path("data/claims.csv")
 *     .skip_invalid_records(true)
 *     .build()?;
 *
 * dataset.statistics().print_summary();
 * # Ok(())
 * # }
 * ```
 *
 * ## Configuration
 *
 * Configuration is read from `HCP_*` environment variables, a TOML file in
 * the platform config directory, or built in code with [`ConfigBuilder`](config::ConfigBuilder).
 */

// Re-export error types from root
pub use error::{PlanError, Result, ErrorContext};
pub use engine::PlanEngine;

// Public modules
pub mod error;
pub mod config;
pub mod data_types;
pub mod schema;
pub mod catalog;
pub mod normalize;
pub mod reader;
pub mod predicate;
pub mod plan;
pub mod text_search;
pub mod provider_filters;
pub mod claims_filters;
pub mod aggregate;
pub mod analytics;
pub mod dataset;
pub mod result;
pub mod executor;
pub mod engine;

/// Prelude module for convenient imports
///
/// ```
/// use hcp_targeting::prelude::*;
/// ```
pub mod prelude {
    pub use crate::data_types::*;
    pub use crate::error::{PlanError, Result};
    pub use crate::config::{ConfigBuilder, EngineConfig, TextSearchConfig};
    pub use crate::catalog::{Catalogs, SynonymCatalog};
    pub use crate::plan::{PlanDocument, QueryType, GroupBy, MatchMode};
    pub use crate::dataset::{Dataset, DatasetBuilder, DatasetStatistics};
    pub use crate::result::QueryResult;
    pub use crate::executor::{Deadline, PlanExecutor};
    pub use crate::engine::PlanEngine;
}

/// Plan and data constants
pub mod constants {
    /// Keys every plan document must carry
    pub const REQUIRED_PLAN_FIELDS: [&str; 4] = crate::plan::REQUIRED_FIELDS;

    /// Query type names accepted in `query_type`
    pub const QUERY_TYPES: [&str; 4] = ["hcp", "claims_only", "claims_by_doctor", "hcp_with_claims"];

    /// Default vocabulary cap of the TF-IDF index
    pub const DEFAULT_MAX_FEATURES: usize = 5000;

    /// Default similarity floor for semantic hits
    pub const DEFAULT_MIN_SIMILARITY: f64 = 0.1;

    /// Default number of semantic hits per query
    pub const DEFAULT_TOP_K: usize = 100;
}

/// Common recipes and utility functions
pub mod cookbook {
    use crate::prelude::*;
    use serde_json::json;

    /// Providers who wrote any of `drugs`, busiest prescribers first
    ///
    /// # Example
    /// ```no_run
    /// # use hcp_targeting::prelude::*;
    /// # use hcp_targeting::cookbook::prescribers_of;
    /// # fn main() -> Result<()> {
    /// # let engine = PlanEngine::from_config(EngineConfig::load())?;
    /// let writers = prescribers_of(&engine, &["ozempic", "mounjaro"], 50)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn prescribers_of(engine: &PlanEngine, drugs: &[&str], limit: usize) -> Result<QueryResult> {
        engine.execute_value(&json!({
            "query_type": "hcp_with_claims",
            "filters": {},
            "claims_filters": {"drugs_any": drugs},
            "projection": ["npi", "name", "specialties", "states", "total_prescriptions", "unique_patients"],
            "order_by": ["total_prescriptions DESC"],
            "limit": limit,
        }))
    }

    /// Providers of a specialty practicing in a state
    pub fn specialists_in_state(engine: &PlanEngine, specialty: &str, state: &str, limit: usize) -> Result<QueryResult> {
        engine.execute_value(&json!({
            "query_type": "hcp",
            "filters": {"specialty_any": [specialty], "state_any": [state]},
            "projection": [],
            "limit": limit,
        }))
    }

    /// Most common specialties in the loaded snapshot
    pub fn top_specialties(dataset: &Dataset, limit: usize) -> Vec<(String, usize)> {
        dataset.analytics().top(ListField::Specialties, limit)
    }
}
