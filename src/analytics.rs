/*!
 * Analytics over provider result sets
 *
 * Percentile thresholds, rankings, composite scores and categorical
 * bucketing. Every computation is relative to the slice it is given, so
 * callers pass the current filtered subset rather than the full dataset.
 */

use std::collections::HashMap;
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::data_types::*;
use crate::plan::CompositeSpec;

/// Weight of each metric in the composite score
pub const COMPOSITE_WEIGHT: f64 = 0.5;

/// Value at the given percentile (0-100) using linear interpolation
/// between the closest ranks. `None` for an empty slice.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pct = pct.clamp(0.0, 100.0);
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Threshold for keeping the top `top_pct` percent of `values`
pub fn top_percentile_threshold(values: &[f64], top_pct: f64) -> Option<f64> {
    percentile(values, 100.0 - top_pct)
}

/// Descending ranks (highest value is rank 1); tied values share the
/// average of the positions they span. Missing values get no rank.
pub fn average_ranks(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut order: Vec<(usize, f64)> = values.iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|v| v.is_finite()).map(|v| (i, v)))
        .collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut ranks = vec![None; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && order[end].1 == order[start].1 {
            end += 1;
        }
        // positions start..end hold ranks start+1 ..= end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &(idx, _) in &order[start..end] {
            ranks[idx] = Some(rank);
        }
        start = end;
    }
    ranks
}

/// Scale each value by the slice maximum; all zeros when the maximum is 0
pub fn normalize_by_max(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v.max(0.0) / max).collect()
}

/// Composite score per provider, normalized within `providers`
pub fn composite_scores(providers: &[&ProviderRecord], spec: CompositeSpec) -> Vec<f64> {
    let mut scores = vec![0.0; providers.len()];
    let metrics = [
        (spec.publications, CountField::Publications),
        (spec.clinical_trials, CountField::ClinicalTrials),
    ];

    for (enabled, field) in metrics {
        if !enabled {
            continue;
        }
        let values: Vec<f64> = providers.iter().map(|p| p.count(field) as f64).collect();
        for (score, norm) in scores.iter_mut().zip(normalize_by_max(&values)) {
            *score += COMPOSITE_WEIGHT * norm;
        }
    }
    scores
}

/// Activity bucket for a count column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    None,
    Low,
    Medium,
    High,
}

impl Category {
    /// 0 -> None, 1-10 -> Low, 11-50 -> Medium, above 50 -> High
    pub fn from_value(value: f64) -> Self {
        if value <= 0.0 {
            Category::None
        } else if value <= 10.0 {
            Category::Low
        } else if value <= 50.0 {
            Category::Medium
        } else {
            Category::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::None => "None",
            Category::Low => "Low",
            Category::Medium => "Medium",
            Category::High => "High",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counting helpers over a provider slice
pub struct ProviderAnalytics<'a> {
    providers: &'a [ProviderRecord],
}

impl<'a> ProviderAnalytics<'a> {
    pub fn new(providers: &'a [ProviderRecord]) -> Self {
        Self { providers }
    }

    /// Providers per upper-cased value of a list column
    pub fn count_by(&self, field: ListField) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for provider in self.providers {
            let mut seen: Vec<String> = Vec::new();
            for value in provider.list(field) {
                let key = value.trim().to_uppercase();
                if !key.is_empty() && !seen.contains(&key) {
                    *counts.entry(key.clone()).or_insert(0) += 1;
                    seen.push(key);
                }
            }
        }
        counts
    }

    /// Most common values of a list column
    pub fn top(&self, field: ListField, limit: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self.count_by(field).into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(limit);
        counts
    }

    /// Sum of a count column
    pub fn total(&self, field: CountField) -> u64 {
        self.providers.iter().map(|p| p.count(field)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolation() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 100.0), Some(40.0));
        assert_eq!(percentile(&values, 50.0), Some(25.0));
        assert_eq!(percentile(&[], 50.0), None);
        // top 100 percent keeps everything
        assert_eq!(top_percentile_threshold(&values, 100.0), Some(10.0));
    }

    #[test]
    fn test_average_ranks_with_ties() {
        let ranks = average_ranks(&[Some(5.0), Some(9.0), Some(5.0), None, Some(1.0)]);
        assert_eq!(ranks, vec![Some(2.5), Some(1.0), Some(2.5), None, Some(4.0)]);
    }

    #[test]
    fn test_composite_scores_in_unit_range() {
        let mut a = ProviderRecord::new(Npi::new("1").unwrap(), "A");
        a.num_publications = 40;
        a.num_clinical_trials = 0;
        let mut b = ProviderRecord::new(Npi::new("2").unwrap(), "B");
        b.num_publications = 10;
        b.num_clinical_trials = 4;
        let scores = composite_scores(&[&a, &b], CompositeSpec::default());
        assert_eq!(scores, vec![0.5, 0.125 + 0.5]);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));

        let zeros = composite_scores(&[&ProviderRecord::new(Npi::new("3").unwrap(), "C")], CompositeSpec::default());
        assert_eq!(zeros, vec![0.0]);
    }

    #[test]
    fn test_category_breakpoints() {
        assert_eq!(Category::from_value(0.0), Category::None);
        assert_eq!(Category::from_value(1.0), Category::Low);
        assert_eq!(Category::from_value(10.0), Category::Low);
        assert_eq!(Category::from_value(11.0), Category::Medium);
        assert_eq!(Category::from_value(50.0), Category::Medium);
        assert_eq!(Category::from_value(51.0), Category::High);
    }

    #[test]
    fn test_count_by_list_field() {
        let mut a = ProviderRecord::new(Npi::new("1").unwrap(), "A");
        a.states = vec!["CA".into(), "ca".into(), "NV".into()];
        let mut b = ProviderRecord::new(Npi::new("2").unwrap(), "B");
        b.states = vec!["CA".into()];
        let providers = vec![a, b];
        let analytics = ProviderAnalytics::new(&providers);
        assert_eq!(analytics.top(ListField::States, 1), vec![("CA".to_string(), 2)]);
        assert_eq!(analytics.count_by(ListField::States).get("NV"), Some(&1));
    }
}
