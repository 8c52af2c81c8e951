/*!
 * Claims filter engine
 *
 * Applies claim-side predicates to a subset of the claims collection.
 * Rejected claims are dropped first unless the plan asks for them. Date
 * predicates read the first date column (service, prescription written,
 * transaction) that is populated anywhere in the current subset.
 */

use chrono::{Datelike, Months, NaiveDate};
use tracing::debug;

use crate::catalog::Catalogs;
use crate::data_types::*;
use crate::plan::{CalendarPart, ClaimPredicate, ClaimsFilters, MatchMode};
use crate::predicate::{self, Test};

/// First date column populated by any claim in `subset`
pub fn resolve_date_field(subset: &[&ClaimRecord]) -> Option<ClaimDateField> {
    ClaimDateField::PRIORITY.into_iter()
        .find(|&field| subset.iter().any(|c| c.date(field).is_some()))
}

/// Claim-side filter engine
pub struct ClaimFilterEngine<'a> {
    catalogs: &'a Catalogs,
    reference_date: NaiveDate,
}

impl<'a> ClaimFilterEngine<'a> {
    /// `reference_date` is "now" for relative date windows
    pub fn new(catalogs: &'a Catalogs, reference_date: NaiveDate) -> Self {
        Self { catalogs, reference_date }
    }

    /// Claims that survive the status filter
    pub fn base<'r>(&self, claims: Vec<&'r ClaimRecord>, filters: &ClaimsFilters) -> Vec<&'r ClaimRecord> {
        if filters.include_rejected {
            claims
        } else {
            predicate::keep(claims, |c: &ClaimRecord| c.status == ClaimStatus::Dispensed)
        }
    }

    /// Status filter followed by every predicate in order.
    ///
    /// `negate` is not applied here; correlation decides what it inverts.
    pub fn apply<'r, E>(
        &self,
        claims: Vec<&'r ClaimRecord>,
        filters: &ClaimsFilters,
        between_steps: E,
    ) -> crate::Result<Vec<&'r ClaimRecord>>
    where
        E: FnMut() -> crate::Result<()>,
    {
        let base = self.base(claims, filters);
        self.apply_predicates(base, &filters.predicates, between_steps)
    }

    pub fn apply_predicates<'r, E>(
        &self,
        mut subset: Vec<&'r ClaimRecord>,
        predicates: &[ClaimPredicate],
        mut between_steps: E,
    ) -> crate::Result<Vec<&'r ClaimRecord>>
    where
        E: FnMut() -> crate::Result<()>,
    {
        for pred in predicates {
            let before = subset.len();
            subset = self.apply_predicate(subset, pred);
            debug!(predicate = ?pred, before, after = subset.len(), "claims filter applied");
            between_steps()?;
        }
        Ok(subset)
    }

    /// Positions within `base` of the claims that survive every predicate
    pub fn matching_positions<E>(
        &self,
        base: &[&ClaimRecord],
        predicates: &[ClaimPredicate],
        mut between_steps: E,
    ) -> crate::Result<Vec<usize>>
    where
        E: FnMut() -> crate::Result<()>,
    {
        let mut positions: Vec<usize> = (0..base.len()).collect();
        for pred in predicates {
            let subset: Vec<&ClaimRecord> = positions.iter().map(|&i| base[i]).collect();
            if let Some(test) = self.record_test(pred, &subset) {
                positions.retain(|&i| test(base[i]));
            }
            between_steps()?;
        }
        Ok(positions)
    }

    pub fn apply_predicate<'r>(&self, subset: Vec<&'r ClaimRecord>, pred: &ClaimPredicate) -> Vec<&'r ClaimRecord> {
        match self.record_test(pred, &subset) {
            Some(test) => predicate::keep(subset, test),
            None => subset,
        }
    }

    /// Per-claim test for a predicate. Date predicates resolve their column
    /// against `subset`; `None` means the predicate is a no-op there.
    pub fn record_test(&self, pred: &ClaimPredicate, subset: &[&ClaimRecord]) -> Option<Test<'a, ClaimRecord>> {
        let test: Test<'a, ClaimRecord> = match pred.clone() {
            ClaimPredicate::RelativeMonths(months) => {
                let field = resolve_date_field(subset)?;
                let end = self.reference_date;
                let start = end.checked_sub_months(Months::new(months)).unwrap_or(NaiveDate::MIN);
                Box::new(move |c| c.date(field).map_or(false, |d| d >= start && d <= end))
            }
            ClaimPredicate::DateRange { start, end } => {
                let field = resolve_date_field(subset)?;
                Box::new(move |c| {
                    c.date(field).map_or(false, |d| {
                        start.map_or(true, |s| d >= s) && end.map_or(true, |e| d <= e)
                    })
                })
            }
            ClaimPredicate::Calendar { part, value } => {
                let field = resolve_date_field(subset)?;
                Box::new(move |c| c.date(field).map_or(false, |d| calendar_value(d, part) == value))
            }
            ClaimPredicate::Drugs { mode, terms } => {
                let drugs = &self.catalogs.drugs;
                let per_term: Vec<Test<'a, ClaimRecord>> = terms.into_iter()
                    .map(|term| -> Test<'a, ClaimRecord> {
                        Box::new(move |c| drugs.expanded_contains(&term, &c.all_drug_names))
                    })
                    .collect();
                match mode {
                    MatchMode::Any => predicate::any_of(per_term),
                    MatchMode::All => predicate::all_of(per_term),
                    MatchMode::Exclude => predicate::not(predicate::any_of(per_term)),
                }
            }
            ClaimPredicate::DrugClasses(classes) => {
                let names = self.catalogs.expand_drug_classes(&classes);
                Box::new(move |c| names.iter().any(|n| c.all_drug_names.contains(n.as_str())))
            }
            ClaimPredicate::PayerNames(names) => contains_any(names, |c| c.payer_name.as_deref()),
            ClaimPredicate::PayerTypes(types) => {
                contains_any(self.catalogs.payers.expand_all(&types), |c| c.payer_name.as_deref())
            }
            ClaimPredicate::PharmacyNames(names) => contains_any(names, |c| c.pharmacy_name.as_deref()),
            ClaimPredicate::PharmacyTypes(types) => contains_any(types, |c| c.pharmacy_type.as_deref()),
            ClaimPredicate::PharmacyStates(states) => {
                let catalogs = self.catalogs;
                let codes: Vec<String> = states.iter()
                    .map(|s| catalogs.state_code(s).unwrap_or_else(|| s.trim().to_uppercase()))
                    .collect();
                Box::new(move |c| {
                    c.pharmacy_state.as_deref()
                        .map(|s| catalogs.state_code(s).unwrap_or_else(|| s.trim().to_uppercase()))
                        .map_or(false, |code| codes.contains(&code))
                })
            }
            ClaimPredicate::Amount { field, min, max } => {
                Box::new(move |c| {
                    let value = field.value(c);
                    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
                })
            }
        };
        Some(test)
    }
}

/// Case-insensitive substring match of any term against a text column
fn contains_any<'a>(
    terms: Vec<String>,
    column: fn(&ClaimRecord) -> Option<&str>,
) -> Test<'a, ClaimRecord> {
    let terms: Vec<String> = terms.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    Box::new(move |c| {
        column(c).map_or(false, |value| {
            let value = value.to_lowercase();
            terms.iter().any(|t| value.contains(t.as_str()))
        })
    })
}

fn calendar_value(date: NaiveDate, part: CalendarPart) -> u32 {
    match part {
        CalendarPart::Year => date.year().max(0) as u32,
        CalendarPart::Quarter => (date.month() - 1) / 3 + 1,
        CalendarPart::Month => date.month(),
        CalendarPart::Weekday => date.weekday().num_days_from_monday(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn claim(id: &str, npi: &str, generic: &str, service: Option<&str>) -> ClaimRecord {
        let mut c = ClaimRecord::new(id, Npi::new(npi).unwrap());
        c.generic_name = Some(generic.to_string());
        c.service_date = service.map(date);
        c.refresh_drug_names();
        c
    }

    fn run(claims: &[ClaimRecord], filters: serde_json::Value) -> Vec<String> {
        let catalogs = Catalogs::standard();
        let engine = ClaimFilterEngine::new(&catalogs, date("2024-03-01"));
        let filters = ClaimsFilters::from_value(&filters).unwrap();
        engine.apply(claims.iter().collect(), &filters, || Ok(()))
            .unwrap()
            .iter()
            .map(|c| c.claim_id.clone())
            .collect()
    }

    #[test]
    fn test_matching_positions_follow_base_order() {
        let claims = vec![
            claim("a", "1", "tirzepatide", Some("2024-01-10")),
            claim("b", "1", "metformin", Some("2024-01-10")),
            claim("a", "2", "tirzepatide", Some("2023-01-10")),
            claim("c", "3", "tirzepatide", Some("2024-02-10")),
        ];
        let catalogs = Catalogs::standard();
        let engine = ClaimFilterEngine::new(&catalogs, date("2024-03-01"));
        let filters = ClaimsFilters::from_value(&json!({"drugs_any": ["mounjaro"], "date_range_months": 6})).unwrap();
        let base: Vec<&ClaimRecord> = claims.iter().collect();
        let positions = engine.matching_positions(&base, &filters.predicates, || Ok(())).unwrap();
        // duplicated claim ids are told apart by position
        assert_eq!(positions, vec![0, 3]);
    }

    #[test]
    fn test_brand_alias_within_relative_window() {
        let claims = vec![claim("a", "1", "tirzepatide", Some("2024-01-10"))];
        assert_eq!(run(&claims, json!({"drugs_any": ["mounjaro"], "date_range_months": 6})), vec!["a"]);
    }

    #[test]
    fn test_relative_window_excludes_old_and_future_claims() {
        let claims = vec![
            claim("old", "1", "tirzepatide", Some("2023-08-31")),
            claim("edge", "1", "tirzepatide", Some("2023-09-01")),
            claim("future", "1", "tirzepatide", Some("2024-03-02")),
            claim("undated", "1", "tirzepatide", None),
        ];
        assert_eq!(run(&claims, json!({"date_range_months": 6})), vec!["edge"]);
    }

    #[test]
    fn test_date_column_fallback() {
        let mut written = claim("w", "1", "metformin", None);
        written.prescription_written_date = Some(date("2024-02-01"));
        let mut other = claim("x", "1", "metformin", None);
        other.transaction_date = Some(date("2024-02-01"));
        let claims = vec![written, other];
        // service date absent everywhere, so prescription-written date is used
        assert_eq!(run(&claims, json!({"date_range_start": "2024-01-01"})), vec!["w"]);

        let undated = vec![claim("u", "1", "metformin", None)];
        assert_eq!(run(&undated, json!({"date_range_months": 1})), vec!["u"]);
    }

    #[test]
    fn test_calendar_filters() {
        let claims = vec![
            claim("mon", "1", "metformin", Some("2024-01-15")),
            claim("tue", "1", "metformin", Some("2024-05-14")),
        ];
        assert_eq!(run(&claims, json!({"weekday": 0})), vec!["mon"]);
        assert_eq!(run(&claims, json!({"quarter": 2})), vec!["tue"]);
        assert_eq!(run(&claims, json!({"year": 2024, "month": 1})), vec!["mon"]);
    }

    #[test]
    fn test_rejected_claims_dropped_by_default() {
        let mut rejected = claim("r", "1", "metformin", None);
        rejected.status = ClaimStatus::Rejected;
        let claims = vec![claim("d", "1", "metformin", None), rejected];
        assert_eq!(run(&claims, json!({})), vec!["d"]);
        assert_eq!(run(&claims, json!({"include_rejected": true})), vec!["d", "r"]);
    }

    #[test]
    fn test_drug_modes_and_classes() {
        let mut combo = claim("combo", "1", "semaglutide", None);
        combo.brand_name = Some("Ozempic".into());
        combo.drug_description = Some("metformin combo pack".into());
        combo.refresh_drug_names();
        let claims = vec![combo, claim("statin", "2", "atorvastatin", None)];
        assert_eq!(run(&claims, json!({"drugs_all": ["wegovy", "glucophage"]})), vec!["combo"]);
        assert_eq!(run(&claims, json!({"drugs_exclude": ["lipitor"]})), vec!["combo"]);
        assert_eq!(run(&claims, json!({"drug_classes_any": ["statins"]})), vec!["statin"]);
        assert_eq!(run(&claims, json!({"drug_groups_any": ["GLP-1"]})), vec!["combo"]);
    }

    #[test]
    fn test_payer_pharmacy_and_amounts() {
        let mut a = claim("a", "1", "metformin", None);
        a.payer_name = Some("Aetna Better Health".into());
        a.pharmacy_name = Some("CVS Pharmacy #123".into());
        a.pharmacy_state = Some("California".into());
        a.total_paid = Some(120.0);
        let mut b = claim("b", "1", "metformin", None);
        b.payer_name = Some("Medicare Part D".into());
        b.pharmacy_type = Some("Mail Order".into());
        b.pharmacy_state = Some("TX".into());
        let claims = vec![a, b];
        assert_eq!(run(&claims, json!({"payer_any": ["aetna"]})), vec!["a"]);
        assert_eq!(run(&claims, json!({"payer_types": ["commercial"]})), vec!["a"]);
        assert_eq!(run(&claims, json!({"pharmacy_any": ["cvs"]})), vec!["a"]);
        assert_eq!(run(&claims, json!({"pharmacy_types": ["mail"]})), vec!["b"]);
        assert_eq!(run(&claims, json!({"pharmacy_states": ["CA"]})), vec!["a"]);
        assert_eq!(run(&claims, json!({"total_cost_min": 100})), vec!["a"]);
        // missing amounts count as zero
        assert_eq!(run(&claims, json!({"total_cost_max": 0})), vec!["b"]);
    }
}
