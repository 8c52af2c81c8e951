/*!
 * Provider filter engine
 *
 * Applies provider predicates to a subset of the provider collection.
 * Each step takes the current subset and returns a new one in the same
 * order; records themselves are never touched. Percentile and text-search
 * steps look at the whole current subset, every other predicate is a
 * per-record test.
 */

use std::collections::HashMap;
use tracing::debug;

use crate::analytics::top_percentile_threshold;
use crate::catalog::{Catalogs, SynonymCatalog};
use crate::data_types::*;
use crate::plan::{MatchMode, ProviderFilters, ProviderPredicate};
use crate::predicate::{self, Test};
use crate::text_search::TextSearch;

/// Low-population states used by the rural filter
pub const RURAL_STATES: [&str; 15] = [
    "AK", "WY", "VT", "ND", "SD", "MT", "DE", "RI", "ME", "NH", "HI", "ID", "WV", "NE", "NM",
];

/// Affiliation keywords marking an academic provider
pub const ACADEMIC_KEYWORDS: [&str; 6] = [
    "university", "college", "academic", "school", "medical school", "teaching hospital",
];

/// Organization-type keywords marking a community provider
pub const COMMUNITY_KEYWORDS: [&str; 3] = ["community", "private", "clinic"];

/// Column values sorted ascending, computed over the full provider collection
#[derive(Debug, Clone, Default)]
pub struct PercentileCache {
    len: usize,
    columns: HashMap<CountField, Vec<f64>>,
}

impl PercentileCache {
    pub fn build(providers: &[ProviderRecord]) -> Self {
        let columns = CountField::ALL.iter()
            .map(|&field| {
                let mut values: Vec<f64> = providers.iter().map(|p| p.count(field) as f64).collect();
                values.sort_by(f64::total_cmp);
                (field, values)
            })
            .collect();
        Self { len: providers.len(), columns }
    }

    /// Cached threshold, valid only when the subset is the whole collection
    fn threshold(&self, field: CountField, subset_len: usize, top_pct: f64) -> Option<f64> {
        if subset_len != self.len || self.len == 0 {
            return None;
        }
        self.columns.get(&field).and_then(|sorted| top_percentile_threshold(sorted, top_pct))
    }
}

/// Provider-side filter engine
pub struct ProviderFilterEngine<'a> {
    catalogs: &'a Catalogs,
    text_search: Option<&'a TextSearch>,
    percentiles: Option<&'a PercentileCache>,
}

impl<'a> ProviderFilterEngine<'a> {
    pub fn new(catalogs: &'a Catalogs) -> Self {
        Self { catalogs, text_search: None, percentiles: None }
    }

    /// Use a prebuilt semantic index for text search
    pub fn with_text_search(mut self, text_search: &'a TextSearch) -> Self {
        self.text_search = Some(text_search);
        self
    }

    pub fn with_percentile_cache(mut self, cache: &'a PercentileCache) -> Self {
        self.percentiles = Some(cache);
        self
    }

    /// Apply every predicate in canonical order.
    ///
    /// `between_steps` runs after each step and can abort the chain.
    pub fn apply<'r, E>(
        &self,
        mut subset: Vec<&'r ProviderRecord>,
        filters: &ProviderFilters,
        mut between_steps: E,
    ) -> crate::Result<Vec<&'r ProviderRecord>>
    where
        E: FnMut() -> crate::Result<()>,
    {
        for predicate in filters.predicates() {
            let before = subset.len();
            subset = self.apply_predicate(subset, predicate);
            debug!(?predicate, before, after = subset.len(), "provider filter applied");
            between_steps()?;
        }
        Ok(subset)
    }

    /// Apply one predicate to the current subset
    pub fn apply_predicate<'r>(
        &self,
        subset: Vec<&'r ProviderRecord>,
        predicate: &ProviderPredicate,
    ) -> Vec<&'r ProviderRecord> {
        match predicate {
            ProviderPredicate::TopPercentile { field, percentile } => {
                self.top_percentile(subset, *field, *percentile)
            }
            ProviderPredicate::TextSearch(terms) => match self.text_search {
                Some(search) => search.search(&subset, terms),
                None => crate::text_search::keyword_search(&subset, terms),
            },
            other => match self.record_test(other) {
                Some(test) => predicate::keep(subset, test),
                None => subset,
            },
        }
    }

    /// Per-record test for a predicate; `None` for subset-level predicates
    pub fn record_test(&self, predicate: &ProviderPredicate) -> Option<Test<'a, ProviderRecord>> {
        let test: Test<'a, ProviderRecord> = match predicate.clone() {
            ProviderPredicate::ListMembership { field, mode, terms } => {
                let catalog = self.catalog_for(field);
                let per_term: Vec<Test<'a, ProviderRecord>> = terms.into_iter()
                    .map(|term| -> Test<'a, ProviderRecord> {
                        Box::new(move |p| p.list(field).iter().any(|v| catalog.fuzzy_match(&term, v)))
                    })
                    .collect();
                combine(mode, per_term)
            }
            ProviderPredicate::OrgType(types) => {
                let types: Vec<String> = types.iter().map(|t| t.trim().to_lowercase()).collect();
                Box::new(move |p| {
                    p.org_type.as_deref()
                        .map(|o| types.contains(&o.trim().to_lowercase()))
                        .unwrap_or(false)
                })
            }
            ProviderPredicate::Gender(gender) => {
                Box::new(move |p| {
                    p.gender.as_deref()
                        .map(|g| g.trim().eq_ignore_ascii_case(gender.trim()))
                        .unwrap_or(false)
                })
            }
            ProviderPredicate::NameContains(fragments) => {
                let fragments: Vec<String> = fragments.iter().map(|f| f.to_lowercase()).collect();
                Box::new(move |p| {
                    let name = p.name.to_lowercase();
                    fragments.iter().all(|f| name.contains(f.as_str()))
                })
            }
            ProviderPredicate::EmailDomain(domains) => {
                let domains: Vec<String> = domains.iter()
                    .map(|d| d.trim().trim_start_matches('@').to_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect();
                Box::new(move |p| {
                    p.email.as_deref()
                        .map(|e| {
                            let e = e.trim().to_lowercase();
                            domains.iter().any(|d| e.ends_with(d.as_str()))
                        })
                        .unwrap_or(false)
                })
            }
            ProviderPredicate::Flag { platform, value } => {
                Box::new(move |p| p.has_platform(platform) == value)
            }
            ProviderPredicate::SocialMedia { mode, platforms } => {
                let per_platform: Vec<Test<'a, ProviderRecord>> = platforms.into_iter()
                    .map(|platform| -> Test<'a, ProviderRecord> {
                        Box::new(move |p| p.has_platform(platform))
                    })
                    .collect();
                combine(mode, per_platform)
            }
            ProviderPredicate::Academic => Box::new(is_academic),
            ProviderPredicate::Community => Box::new(is_community),
            ProviderPredicate::Rural => {
                let catalogs = self.catalogs;
                Box::new(move |p| is_rural(catalogs, p))
            }
            ProviderPredicate::CountRange { field, min, max } => {
                Box::new(move |p| {
                    let value = p.count(field) as f64;
                    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
                })
            }
            ProviderPredicate::TopPercentile { .. } | ProviderPredicate::TextSearch(_) => return None,
        };
        Some(test)
    }

    fn top_percentile<'r>(
        &self,
        subset: Vec<&'r ProviderRecord>,
        field: CountField,
        top_pct: f64,
    ) -> Vec<&'r ProviderRecord> {
        let threshold = self.percentiles
            .and_then(|cache| cache.threshold(field, subset.len(), top_pct))
            .or_else(|| {
                let values: Vec<f64> = subset.iter().map(|p| p.count(field) as f64).collect();
                top_percentile_threshold(&values, top_pct)
            });

        match threshold {
            Some(threshold) => predicate::keep(subset, move |p: &ProviderRecord| p.count(field) as f64 >= threshold),
            None => Vec::new(),
        }
    }

    fn catalog_for(&self, field: ListField) -> &'a SynonymCatalog {
        match field {
            ListField::Specialties => &self.catalogs.specialties,
            ListField::States => &self.catalogs.states,
            ListField::Hospitals | ListField::Systems => &self.catalogs.hospitals,
            ListField::Conditions => &self.catalogs.conditions,
        }
    }
}

fn combine<'a>(mode: MatchMode, tests: Vec<Test<'a, ProviderRecord>>) -> Test<'a, ProviderRecord> {
    match mode {
        MatchMode::Any => predicate::any_of(tests),
        MatchMode::All => predicate::all_of(tests),
        MatchMode::Exclude => predicate::not(predicate::any_of(tests)),
    }
}

pub fn is_academic(provider: &ProviderRecord) -> bool {
    provider.affiliations.iter()
        .chain(&provider.hospital_names)
        .chain(&provider.system_names)
        .map(|v| v.to_lowercase())
        .any(|v| ACADEMIC_KEYWORDS.iter().any(|k| v.contains(k)))
}

pub fn is_community(provider: &ProviderRecord) -> bool {
    provider.org_type.as_deref()
        .map(|o| {
            let o = o.to_lowercase();
            COMMUNITY_KEYWORDS.iter().any(|k| o.contains(k))
        })
        .unwrap_or(false)
}

pub fn is_rural(catalogs: &Catalogs, provider: &ProviderRecord) -> bool {
    provider.states.iter()
        .filter_map(|s| catalogs.state_code(s))
        .any(|code| RURAL_STATES.contains(&code.as_str()))
}
