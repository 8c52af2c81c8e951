/*!
 * Claim aggregation
 *
 * Per-group prescription statistics over a filtered claims subset.
 */

use std::collections::{HashMap, HashSet};
use chrono::NaiveDate;
use serde::Serialize;

use crate::data_types::ClaimRecord;
use crate::plan::GroupBy;

/// Statistics for one group of claims
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimAggregate {
    pub key: String,
    pub total_prescriptions: u64,
    pub unique_patients: u64,
    pub first_prescription_date: Option<NaiveDate>,
    pub last_prescription_date: Option<NaiveDate>,
    pub total_cost: f64,
    pub avg_cost_per_prescription: f64,
    pub unique_drugs: u64,
}

impl ClaimAggregate {
    /// Whether the prescription count lies within the optional bounds
    pub fn within_count_bounds(&self, min: Option<u64>, max: Option<u64>) -> bool {
        min.map_or(true, |m| self.total_prescriptions >= m)
            && max.map_or(true, |m| self.total_prescriptions <= m)
    }
}

#[derive(Default)]
struct Accumulator<'r> {
    count: u64,
    patients: HashSet<&'r str>,
    drugs: HashSet<String>,
    first: Option<NaiveDate>,
    last: Option<NaiveDate>,
    cost: f64,
}

impl<'r> Accumulator<'r> {
    fn add(&mut self, claim: &'r ClaimRecord) {
        self.count += 1;
        if let Some(patient) = claim.patient_id.as_deref() {
            self.patients.insert(patient);
        }
        if let Some(drug) = claim.drug_name() {
            self.drugs.insert(drug.trim().to_lowercase());
        }
        if let Some(date) = claim.service_date {
            self.first = Some(self.first.map_or(date, |d| d.min(date)));
            self.last = Some(self.last.map_or(date, |d| d.max(date)));
        }
        self.cost += claim.total_paid.unwrap_or(0.0);
    }

    fn finish(self, key: String) -> ClaimAggregate {
        ClaimAggregate {
            key,
            total_prescriptions: self.count,
            unique_patients: self.patients.len() as u64,
            first_prescription_date: self.first,
            last_prescription_date: self.last,
            total_cost: self.cost,
            avg_cost_per_prescription: if self.count == 0 { 0.0 } else { self.cost / self.count as f64 },
            unique_drugs: self.drugs.len() as u64,
        }
    }
}

/// Group key of a claim; claims without a value for the column are not grouped
pub fn group_key(claim: &ClaimRecord, group_by: GroupBy) -> Option<String> {
    let value = match group_by {
        GroupBy::PrescriberNpi => Some(claim.prescriber_npi.as_str()),
        GroupBy::PayerName => claim.payer_name.as_deref(),
        GroupBy::PharmacyName => claim.pharmacy_name.as_deref(),
        GroupBy::GenericName => claim.generic_name.as_deref(),
        GroupBy::BrandName => claim.brand_name.as_deref(),
    };
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Aggregate `claims` by `group_by`, groups in order of first appearance
pub fn aggregate_by(claims: &[&ClaimRecord], group_by: GroupBy) -> Vec<ClaimAggregate> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Accumulator> = HashMap::new();

    for &claim in claims {
        let Some(key) = group_key(claim, group_by) else { continue };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().add(claim);
    }

    order.into_iter()
        .filter_map(|key| groups.remove(&key).map(|acc| acc.finish(key)))
        .collect()
}

/// Per-prescriber aggregates keyed by NPI, filtered by count bounds
pub fn prescriber_aggregates(
    claims: &[&ClaimRecord],
    min: Option<u64>,
    max: Option<u64>,
) -> HashMap<String, ClaimAggregate> {
    aggregate_by(claims, GroupBy::PrescriberNpi)
        .into_iter()
        .filter(|agg| agg.within_count_bounds(min, max))
        .map(|agg| (agg.key.clone(), agg))
        .collect()
}
