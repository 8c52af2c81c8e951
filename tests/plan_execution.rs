/*!
 * End-to-end plan execution over CSV extracts
 *
 * Loads small provider and claim files through the reader, then runs plans
 * through the engine the way the command line tool does.
 */

use chrono::NaiveDate;
use hcp_targeting::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const PROVIDERS_CSV: &str = r#"type_1_npi,name,gender,email,specialties,states,hospital_names,num_publications,num_clinical_trials,num_payments,linkedin
1111111111,Jane Doe,F,jane@stanford.edu,"[""NEUROLOGY""]","[""CA""]","[""Stanford Health Care""]",40,3,10,https://linkedin.com/in/jane
2222222222,John Roe,M,,"[""CARDIOLOGY""]","[""TX""]","[""Baylor Scott & White""]",12,0,5,
3333333333,Ann Poe,F,,"[""NEUROLOGY""]","[""NY""]",[],5,1,0,
4444444444.0,Lee Park,,,"[""ENDOCRINOLOGY""]","[""CA""]",,25,2,7,
0000000000,Nobody,,,"[""NEUROLOGY""]","[""CA""]",,99,0,0,
1111111111,Jane Duplicate,F,,"[""PEDIATRICS""]","[""WA""]",,0,0,0,
"#;

const CLAIMS_CSV: &str = "RX_CLAIM_NBR,PATIENT_ID,SERVICE_DATE_DD,PRESCRIBER_NPI_NBR,NDC_GENERIC_NM,NDC_PREFERRED_BRAND_NM,PAYER_PAYER_NM,TOTAL_PAID_AMT,CLAIM_STATUS
c1,p1,2024-01-10,1111111111,tirzepatide,Mounjaro,Aetna,\"$1,000.00\",D
c2,p2,2023-06-01,1111111111,tirzepatide,Mounjaro,Aetna,900,D
c3,p3,2024-02-15,2222222222,semaglutide,Ozempic,Cigna,800,D
c4,p4,2024-02-20,3333333333,tirzepatide,Mounjaro,Cigna,700,R
c5,p5,2024-02-01,4444444444,tirzepatide,Mounjaro,Humana,650,D
c6,p6,2024-01-05,,metformin,,,10,D
c7,p1,2023-12-01,1111111111,tirzepatide,Mounjaro,Aetna,100,D
";

struct Fixture {
    _dir: TempDir,
    providers: PathBuf,
    claims: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let providers = dir.path().join("providers.csv");
    let claims = dir.path().join("claims.csv");
    fs::write(&providers, PROVIDERS_CSV).unwrap();
    fs::write(&claims, CLAIMS_CSV).unwrap();
    Fixture { _dir: dir, providers, claims }
}

fn engine(fixture: &Fixture) -> PlanEngine {
    let config = ConfigBuilder::new()
        .providers_path(&fixture.providers)
        .claims_path(&fixture.claims)
        .reference_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        .build();
    PlanEngine::from_config(config).unwrap()
}

fn run(engine: &PlanEngine, plan: Value) -> QueryResult {
    engine.execute_value(&plan).unwrap()
}

fn npis(result: &QueryResult) -> Vec<String> {
    result.strings("npi")
}

#[test]
fn test_load_normalizes_extracts() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let dataset = engine.snapshot();
    let stats = dataset.statistics();

    assert_eq!(stats.total_providers, 4);
    assert_eq!(stats.dropped_provider_rows, 2);
    assert_eq!(stats.total_claims, 6);
    assert_eq!(stats.dropped_claim_rows, 1);
    assert_eq!(stats.rejected_claims, 1);

    // float rendering of the NPI is canonicalized
    let lee = dataset.get_by_npi(&Npi::new("4444444444").unwrap()).unwrap();
    assert_eq!(lee.specialties, vec!["ENDOCRINOLOGY"]);

    // first row wins for a duplicated NPI
    let jane = dataset.get_by_npi(&Npi::new("1111111111").unwrap()).unwrap();
    assert_eq!(jane.name, "Jane Doe");
    assert!(jane.has_linkedin);
    assert!(jane.conditions.is_empty());

    let c1 = dataset.claims().iter().find(|c| c.claim_id == "c1").unwrap();
    assert_eq!(c1.total_paid, Some(1000.0));
}

#[test]
fn test_specialty_and_publication_filters() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let result = run(&engine, json!({
        "query_type": "hcp",
        "filters": {"specialty_any": ["neurology"], "publications_min": 20},
        "projection": ["npi", "name"],
        "limit": 10
    }));
    assert_eq!(npis(&result), vec!["1111111111"]);
    assert_eq!(result.columns, vec!["npi", "name"]);
}

#[test]
fn test_brand_name_within_relative_window() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let result = run(&engine, json!({
        "query_type": "claims_only",
        "filters": {},
        "claims_filters": {"drugs_any": ["mounjaro"], "date_range_months": 6},
        "projection": ["claim_id", "prescriber_npi"],
        "limit": 10
    }));
    // c2 is outside the window and c4 was rejected
    assert_eq!(result.strings("RX_CLAIM_NBR"), vec!["c1", "c5", "c7"]);

    let with_rejected = run(&engine, json!({
        "query_type": "claims_only",
        "filters": {},
        "claims_filters": {"drugs_any": ["mounjaro"], "date_range_months": 6, "include_rejected": true},
        "projection": ["claim_id"],
        "limit": 10
    }));
    assert_eq!(with_rejected.strings("RX_CLAIM_NBR"), vec!["c1", "c4", "c5", "c7"]);
}

#[test]
fn test_oversized_month_window_reaches_every_claim() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let plan = |months: u64| json!({
        "query_type": "claims_only",
        "filters": {},
        "claims_filters": {"date_range_months": months},
        "projection": ["claim_id"],
        "limit": 10
    });

    assert_eq!(run(&engine, plan(2)).strings("RX_CLAIM_NBR"), vec!["c1", "c3", "c5"]);
    assert_eq!(
        run(&engine, plan(4_294_967_298)).strings("RX_CLAIM_NBR"),
        vec!["c1", "c2", "c3", "c5", "c7"]
    );
}

#[test]
fn test_claims_by_doctor() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let result = run(&engine, json!({
        "query_type": "claims_by_doctor",
        "filters": {"specialty_any": ["neurology"]},
        "claims_filters": null,
        "projection": ["claim_id"],
        "limit": 10
    }));
    assert_eq!(result.strings("RX_CLAIM_NBR"), vec!["c1", "c2", "c7"]);
}

#[test]
fn test_prescribers_joined_with_statistics() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let result = run(&engine, json!({
        "query_type": "hcp_with_claims",
        "filters": {},
        "claims_filters": {"drugs_any": ["mounjaro"], "date_range_months": 6},
        "projection": ["npi", "total_prescriptions", "unique_patients"],
        "order_by": ["total_prescriptions DESC", "npi ASC"],
        "limit": 10
    }));
    assert_eq!(result.to_json(), json!([
        {"npi": "1111111111", "total_prescriptions": 2, "unique_patients": 1},
        {"npi": "4444444444", "total_prescriptions": 1, "unique_patients": 1},
    ]));
}

#[test]
fn test_negate_excludes_prescribers() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let result = run(&engine, json!({
        "query_type": "hcp_with_claims",
        "filters": {},
        "claims_filters": {"drugs_any": ["mounjaro"], "negate": true},
        "projection": ["npi", "total_prescriptions"],
        "limit": 10
    }));
    // 3333333333 only has a rejected mounjaro claim
    assert_eq!(npis(&result), vec!["2222222222", "3333333333"]);
    // no statistics are joined for non-prescribers
    assert!(result.rows.iter().all(|row| !row.contains_key("total_prescriptions")));
}

#[test]
fn test_negate_returns_claim_complement() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let claims_only = run(&engine, json!({
        "query_type": "claims_only",
        "filters": {},
        "claims_filters": {"drugs_any": ["mounjaro"], "negate": true},
        "projection": ["claim_id"],
        "limit": 10
    }));
    assert_eq!(claims_only.strings("RX_CLAIM_NBR"), vec!["c3"]);

    let by_doctor = run(&engine, json!({
        "query_type": "claims_by_doctor",
        "filters": {"specialty_any": ["neurology"]},
        "claims_filters": {"drugs_any": ["ozempic"], "negate": true},
        "projection": ["claim_id"],
        "limit": 10
    }));
    assert_eq!(by_doctor.strings("RX_CLAIM_NBR"), vec!["c1", "c2", "c7"]);
}

#[test]
fn test_no_matching_claims() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let plan = |negate: bool| json!({
        "query_type": "hcp_with_claims",
        "filters": {},
        "claims_filters": {"drugs_any": ["eliquis"], "negate": negate},
        "projection": ["npi"],
        "limit": 10
    });

    assert!(run(&engine, plan(false)).is_empty());
    assert_eq!(run(&engine, plan(true)).len(), 4);
}

#[test]
fn test_top_percentile_bounds() {
    let fixture = fixture();
    let engine = engine(&fixture);

    let everyone = run(&engine, json!({
        "query_type": "hcp",
        "filters": {"top_percentile_publications": 100},
        "projection": ["npi"],
        "limit": 10
    }));
    assert_eq!(everyone.len(), 4);

    let nobody = run(&engine, json!({
        "query_type": "hcp",
        "filters": {"specialty_any": ["dermatology"], "top_percentile_publications": 10},
        "projection": ["npi"],
        "limit": 10
    }));
    assert!(nobody.is_empty());
}

#[test]
fn test_filtering_is_idempotent() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let dataset = engine.snapshot();
    let plan = PlanDocument::from_value(&json!({
        "query_type": "hcp",
        "filters": {"state_any": ["california"], "publications_min": 10},
        "projection": [],
        "limit": 10
    }))
    .unwrap();

    let executor = PlanExecutor::new(&dataset, engine.reference_date());
    let once = executor.filter_providers(dataset.providers().iter().collect(), &plan.filters).unwrap();
    let twice = executor.filter_providers(once.clone(), &plan.filters).unwrap();

    let names: Vec<&str> = once.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Jane Doe", "Lee Park"]);
    assert_eq!(once, twice);
}

#[test]
fn test_more_terms_never_shrink_an_any_filter() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let matched = |terms: Value| -> HashSet<String> {
        let result = run(&engine, json!({
            "query_type": "hcp",
            "filters": {"specialty_any": terms},
            "projection": ["npi"],
            "limit": 10
        }));
        npis(&result).into_iter().collect()
    };

    let narrow = matched(json!(["neurology"]));
    let wide = matched(json!(["neurology", "endocrinology"]));
    assert_eq!(narrow.len(), 2);
    assert!(narrow.is_subset(&wide));
    assert_eq!(wide.len(), 3);
}

#[test]
fn test_limit_and_total_matches() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let result = run(&engine, json!({
        "query_type": "hcp",
        "filters": {},
        "projection": ["npi", "bogus_column"],
        "order_by": ["num_publications DESC", "no_such_column ASC"],
        "limit": 2
    }));
    assert_eq!(npis(&result), vec!["1111111111", "4444444444"]);
    assert_eq!(result.total_matches, 4);
    assert_eq!(result.columns, vec!["npi"]);
}

#[test]
fn test_invalid_plans_fail_before_execution() {
    let fixture = fixture();
    let engine = engine(&fixture);

    match engine.execute_value(&json!({"query_type": "hcp", "filters": {}})) {
        Err(PlanError::PlanValidation { missing_fields, .. }) => {
            assert_eq!(missing_fields, vec!["projection", "limit"]);
        }
        other => panic!("expected validation error, got {:?}", other),
    }

    for limit in [json!(0), json!(-3), json!("10"), json!(2.5)] {
        let plan = json!({"query_type": "hcp", "filters": {}, "projection": [], "limit": limit});
        assert!(matches!(engine.execute_value(&plan), Err(PlanError::InvalidLimit { .. })));
    }

    let unknown = json!({"query_type": "everything", "filters": {}, "projection": [], "limit": 5});
    assert!(matches!(engine.execute_value(&unknown), Err(PlanError::PlanValidation { .. })));
}

#[test]
fn test_exhausted_budget_times_out() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let dataset = engine.snapshot();
    let plan = PlanDocument::from_value(&json!({
        "query_type": "hcp",
        "filters": {"specialty_any": ["neurology"]},
        "projection": [],
        "limit": 10
    }))
    .unwrap();

    let deadline = Deadline::new(Some(0));
    std::thread::sleep(std::time::Duration::from_millis(2));
    let result = PlanExecutor::new(&dataset, engine.reference_date())
        .with_deadline(deadline)
        .execute(&plan);
    assert!(matches!(result, Err(PlanError::Timeout { budget_ms: 0, .. })));
}

#[test]
fn test_reload_picks_up_new_files() {
    let fixture = fixture();
    let engine = engine(&fixture);
    let held = engine.snapshot();

    fs::write(
        &fixture.providers,
        "type_1_npi,name,specialties\n5555555555,New Doc,\"[\"\"NEUROLOGY\"\"]\"\n",
    )
    .unwrap();
    engine.reload_from_config().unwrap();

    let result = run(&engine, json!({
        "query_type": "hcp",
        "filters": {"specialty_any": ["neurology"]},
        "projection": ["npi"],
        "limit": 10
    }));
    assert_eq!(npis(&result), vec!["5555555555"]);
    assert_eq!(held.len(), 4);
}
