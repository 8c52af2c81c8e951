/*!
 * Plan executor
 *
 * Runs a validated plan against one dataset snapshot. Each query mode is a
 * short pipeline of filter steps over borrowed records; the correlator
 * joins the provider and claim sides through prescriber NPIs. Results are
 * rendered, ordered, limited and projected last.
 */

use std::collections::HashSet;
use std::time::{Duration, Instant};
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregate::{self, ClaimAggregate};
use crate::analytics::{self, Category};
use crate::claims_filters::ClaimFilterEngine;
use crate::data_types::*;
use crate::dataset::Dataset;
use crate::plan::{AnalyticsSpec, ClaimsFilters, PlanDocument, ProviderFilters, QueryType};
use crate::provider_filters::ProviderFilterEngine;
use crate::result::{self, QueryResult, Row};
use crate::{PlanError, Result};

/// Time budget for one plan's filter chain
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// Starts counting now; `None` never expires
    pub fn new(budget_ms: Option<u64>) -> Self {
        Self { start: Instant::now(), budget: budget_ms.map(Duration::from_millis) }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Fails with [`PlanError::Timeout`] once the budget is spent
    pub fn check(&self) -> Result<()> {
        match self.budget {
            Some(budget) if self.elapsed() > budget => Err(PlanError::Timeout {
                elapsed_ms: self.elapsed().as_millis(),
                budget_ms: budget.as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }
}

/// Executes plans against one snapshot
pub struct PlanExecutor<'a> {
    dataset: &'a Dataset,
    reference_date: NaiveDate,
    deadline: Deadline,
}

impl<'a> PlanExecutor<'a> {
    /// `reference_date` is "now" for relative date filters
    pub fn new(dataset: &'a Dataset, reference_date: NaiveDate) -> Self {
        Self { dataset, reference_date, deadline: Deadline::unbounded() }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn execute(&self, plan: &PlanDocument) -> Result<QueryResult> {
        info!(query_type = plan.query_type.as_str(), limit = plan.limit, "executing plan");
        if let Some(notes) = &plan.plan_notes {
            debug!(notes = %notes, "plan notes");
        }
        let result = match plan.query_type {
            QueryType::Hcp => self.run_hcp(plan),
            QueryType::ClaimsOnly => self.run_claims_only(plan),
            QueryType::ClaimsByDoctor => self.run_claims_by_doctor(plan),
            QueryType::HcpWithClaims => self.run_hcp_with_claims(plan),
        }?;
        info!(
            rows = result.len(),
            total_matches = result.total_matches,
            elapsed_ms = self.deadline.elapsed().as_millis() as u64,
            "plan complete"
        );
        Ok(result)
    }

    fn provider_engine(&self) -> ProviderFilterEngine<'a> {
        ProviderFilterEngine::new(self.dataset.catalogs())
            .with_text_search(self.dataset.text_search())
            .with_percentile_cache(self.dataset.percentiles())
    }

    /// Apply provider filters to `subset`
    pub fn filter_providers(
        &self,
        subset: Vec<&'a ProviderRecord>,
        filters: &ProviderFilters,
    ) -> Result<Vec<&'a ProviderRecord>> {
        self.deadline.check()?;
        self.provider_engine().apply(subset, filters, || self.deadline.check())
    }

    /// Apply claim filters to `claims`; `negate` yields the complement
    /// within the status-filtered base.
    pub fn filter_claims(
        &self,
        claims: Vec<&'a ClaimRecord>,
        filters: &ClaimsFilters,
    ) -> Result<Vec<&'a ClaimRecord>> {
        self.deadline.check()?;
        let engine = ClaimFilterEngine::new(self.dataset.catalogs(), self.reference_date);
        let base = engine.base(claims, filters);
        if !filters.negate {
            return engine.apply_predicates(base, &filters.predicates, || self.deadline.check());
        }
        let mut matched = vec![false; base.len()];
        for i in engine.matching_positions(&base, &filters.predicates, || self.deadline.check())? {
            matched[i] = true;
        }
        Ok(base.into_iter()
            .zip(matched)
            .filter_map(|(claim, hit)| (!hit).then_some(claim))
            .collect())
    }

    fn run_hcp(&self, plan: &PlanDocument) -> Result<QueryResult> {
        if plan.claims_filters.is_some() {
            debug!("claims_filters ignored for hcp query");
        }
        let providers = self.filter_providers(self.dataset.providers().iter().collect(), &plan.filters)?;
        info!(providers = providers.len(), "providers matched");
        Ok(self.provider_result(plan, &providers, None))
    }

    fn run_claims_only(&self, plan: &PlanDocument) -> Result<QueryResult> {
        let claims: Vec<&'a ClaimRecord> = self.dataset.claims().iter().collect();
        self.claims_result(plan, claims)
    }

    fn run_claims_by_doctor(&self, plan: &PlanDocument) -> Result<QueryResult> {
        let providers = self.filter_providers(self.dataset.providers().iter().collect(), &plan.filters)?;
        info!(providers = providers.len(), "doctors matched");
        if providers.is_empty() {
            info!("no doctors matched; skipping claims");
            return Ok(QueryResult::empty(plan.query_type, self.claim_side_columns(plan)));
        }
        for provider in providers.iter().take(5) {
            debug!(npi = %provider.npi, name = %provider.name, "matched doctor");
        }

        let npis: HashSet<&Npi> = providers.iter().map(|p| &p.npi).collect();
        let claims: Vec<&'a ClaimRecord> = self.dataset.claims().iter()
            .filter(|c| npis.contains(&c.prescriber_npi))
            .collect();
        info!(claims = claims.len(), "claims for matched doctors");
        self.claims_result(plan, claims)
    }

    fn run_hcp_with_claims(&self, plan: &PlanDocument) -> Result<QueryResult> {
        let filters = plan.claims_filters.clone().unwrap_or_default();
        let engine = ClaimFilterEngine::new(self.dataset.catalogs(), self.reference_date);
        let claims = engine.apply(self.dataset.claims().iter().collect(), &filters, || self.deadline.check())?;
        info!(claims = claims.len(), "claims matched");

        let all_providers: Vec<&'a ProviderRecord> = self.dataset.providers().iter().collect();
        if claims.is_empty() {
            if !filters.negate {
                info!("no claims matched; returning no providers");
                return Ok(QueryResult::empty(plan.query_type, result::provider_columns()));
            }
            let providers = self.filter_providers(all_providers, &plan.filters)?;
            return Ok(self.provider_result(plan, &providers, None));
        }

        let aggregates = aggregate::prescriber_aggregates(
            &claims,
            filters.prescription_count_min,
            filters.prescription_count_max,
        );
        info!(prescribers = aggregates.len(), "prescribers with matching claims");

        let correlated: Vec<&'a ProviderRecord> = all_providers.into_iter()
            .filter(|p| aggregates.contains_key(p.npi.as_str()) != filters.negate)
            .collect();
        info!(providers = correlated.len(), negate = filters.negate, "providers correlated");

        let providers = self.filter_providers(correlated, &plan.filters)?;
        info!(providers = providers.len(), "providers after hcp filters");

        let joined = (!filters.negate).then_some(&aggregates);
        Ok(self.provider_result(plan, &providers, joined))
    }

    fn claims_result(&self, plan: &PlanDocument, claims: Vec<&'a ClaimRecord>) -> Result<QueryResult> {
        let filters = plan.claims_filters.clone().unwrap_or_default();
        let mut claims = self.filter_claims(claims, &filters)?;
        info!(claims = claims.len(), negate = filters.negate, "claims after filtering");

        if let Some(spec) = plan.aggregation {
            let mut columns = result::aggregate_columns(spec.group_by);
            let mut rows: Vec<Row> = aggregate::aggregate_by(&claims, spec.group_by)
                .iter()
                .filter(|agg| agg.within_count_bounds(filters.prescription_count_min, filters.prescription_count_max))
                .map(|agg| result::aggregate_row(agg, spec.group_by))
                .collect();
            if let Some(analytics) = &plan.analytics {
                apply_row_analytics(&mut rows, &mut columns, analytics);
            }
            return Ok(result::finish(plan.query_type, columns, rows, &plan.projection, &plan.order_by, plan.limit));
        }

        if filters.has_count_bounds() {
            let allowed = aggregate::prescriber_aggregates(
                &claims,
                filters.prescription_count_min,
                filters.prescription_count_max,
            );
            claims.retain(|c| allowed.contains_key(c.prescriber_npi.as_str()));
            debug!(claims = claims.len(), "claims after prescription count bounds");
        }

        let mut columns = result::claim_columns();
        let mut rows: Vec<Row> = claims.iter().map(|c| result::claim_row(c)).collect();
        if let Some(analytics) = &plan.analytics {
            apply_row_analytics(&mut rows, &mut columns, analytics);
        }
        Ok(result::finish(plan.query_type, columns, rows, &plan.projection, &plan.order_by, plan.limit))
    }

    fn provider_result(
        &self,
        plan: &PlanDocument,
        providers: &[&'a ProviderRecord],
        aggregates: Option<&std::collections::HashMap<String, ClaimAggregate>>,
    ) -> QueryResult {
        let mut columns = result::provider_columns();
        let mut rows: Vec<Row> = providers.iter().map(|p| result::provider_row(p)).collect();

        if let Some(aggregates) = aggregates {
            columns.extend(result::AGGREGATE_COLUMNS.iter().map(|c| c.to_string()));
            for (row, provider) in rows.iter_mut().zip(providers) {
                if let Some(agg) = aggregates.get(provider.npi.as_str()) {
                    result::extend_with_aggregate(row, agg);
                }
            }
        }

        if let Some(spec) = &plan.analytics {
            if let Some(composite) = spec.composite {
                let scores = analytics::composite_scores(providers, composite);
                for (row, score) in rows.iter_mut().zip(scores) {
                    row.insert("composite_score".into(), number(score));
                }
                columns.push("composite_score".to_string());
            }
            apply_row_analytics(&mut rows, &mut columns, spec);
        }
        result::finish(plan.query_type, columns, rows, &plan.projection, &plan.order_by, plan.limit)
    }

    fn claim_side_columns(&self, plan: &PlanDocument) -> Vec<String> {
        match plan.aggregation {
            Some(spec) => result::aggregate_columns(spec.group_by),
            None => result::claim_columns(),
        }
    }
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Rank and categorize over rendered rows
fn apply_row_analytics(rows: &mut [Row], columns: &mut Vec<String>, spec: &AnalyticsSpec) {
    if let Some(rank_by) = &spec.rank_by {
        match result::resolve_column(rank_by, columns) {
            Some(column) => {
                let values: Vec<Option<f64>> = rows.iter()
                    .map(|row| row.get(&column).and_then(Value::as_f64))
                    .collect();
                for (row, rank) in rows.iter_mut().zip(analytics::average_ranks(&values)) {
                    row.insert("rank".into(), rank.map_or(Value::Null, number));
                }
                columns.push("rank".to_string());
            }
            None => debug!(column = %rank_by, "rank_by column unknown; ranking skipped"),
        }
    }

    for name in &spec.categorize {
        let Some(column) = result::resolve_column(name, columns) else {
            debug!(column = %name, "categorize column unknown; skipped");
            continue;
        };
        let output = format!("{column}_category");
        for row in rows.iter_mut() {
            let category = row.get(&column)
                .and_then(Value::as_f64)
                .map_or(Value::Null, |v| Value::String(Category::from_value(v).to_string()));
            row.insert(output.clone(), category);
        }
        columns.push(output);
    }
}
