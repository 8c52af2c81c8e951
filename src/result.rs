/*!
 * Query results
 *
 * Rendering of providers, claims and aggregates into JSON rows, followed
 * by ordering, limit and projection.
 */

use std::cmp::Ordering;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::aggregate::ClaimAggregate;
use crate::data_types::*;
use crate::plan::{GroupBy, OrderBy, QueryType, SortDirection};
use crate::schema::{ClaimSchema, ProviderSchema};

/// One result row keyed by column name
pub type Row = Map<String, Value>;

/// Statistic columns of an aggregate row, after the group key
pub const AGGREGATE_COLUMNS: [&str; 7] = [
    "total_prescriptions",
    "unique_patients",
    "first_prescription_date",
    "last_prescription_date",
    "total_cost",
    "avg_cost_per_prescription",
    "unique_drugs",
];

/// Rows plus their column order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query_type: QueryType,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Matching rows before the limit was applied
    pub total_matches: usize,
}

impl QueryResult {
    /// An empty result with the default columns of the query type
    pub fn empty(query_type: QueryType, columns: Vec<String>) -> Self {
        Self { query_type, columns, rows: Vec::new(), total_matches: 0 }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, `Null` where a row lacks it
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.rows.iter().map(|row| row.get(name).unwrap_or(&Value::Null)).collect()
    }

    /// String values of a column, skipping non-strings
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.column(name).into_iter().filter_map(Value::as_str).map(str::to_string).collect()
    }

    /// Rows as a JSON array of objects
    pub fn to_json(&self) -> Value {
        Value::Array(self.rows.iter().cloned().map(Value::Object).collect())
    }
}

pub fn provider_columns() -> Vec<String> {
    ProviderSchema::output_columns().into_iter().map(str::to_string).collect()
}

pub fn claim_columns() -> Vec<String> {
    ClaimSchema::column_names().into_iter().map(str::to_string).collect()
}

pub fn aggregate_columns(group_by: GroupBy) -> Vec<String> {
    std::iter::once(group_by.column())
        .chain(AGGREGATE_COLUMNS)
        .map(str::to_string)
        .collect()
}

fn text(value: &Option<String>) -> Value {
    value.as_ref().map_or(Value::Null, |s| Value::String(s.clone()))
}

fn list(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn date(value: Option<chrono::NaiveDate>) -> Value {
    value.map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string()))
}

fn number(value: Option<f64>) -> Value {
    value.and_then(serde_json::Number::from_f64).map_or(Value::Null, Value::Number)
}

pub fn provider_row(p: &ProviderRecord) -> Row {
    let mut row = Row::new();
    row.insert("npi".into(), Value::String(p.npi.to_string()));
    row.insert("name".into(), Value::String(p.name.clone()));
    row.insert("gender".into(), text(&p.gender));
    row.insert("email".into(), text(&p.email));
    row.insert("specialties".into(), list(&p.specialties));
    row.insert("states".into(), list(&p.states));
    row.insert("hospital_names".into(), list(&p.hospital_names));
    row.insert("system_names".into(), list(&p.system_names));
    row.insert("conditions".into(), list(&p.conditions));
    row.insert("affiliations".into(), list(&p.affiliations));
    row.insert("org_type".into(), text(&p.org_type));
    for field in CountField::ALL {
        row.insert(field.column().into(), Value::from(p.count(field)));
    }
    for platform in SocialPlatform::ALL {
        row.insert(platform.flag_column().into(), Value::Bool(p.has_platform(platform)));
    }
    row
}

pub fn claim_row(c: &ClaimRecord) -> Row {
    let values = [
        Value::String(c.claim_id.clone()),
        text(&c.patient_id),
        date(c.service_date),
        date(c.prescription_written_date),
        date(c.transaction_date),
        Value::String(c.prescriber_npi.to_string()),
        text(&c.ndc),
        text(&c.generic_name),
        text(&c.brand_name),
        text(&c.drug_description),
        text(&c.pharmacy_name),
        text(&c.pharmacy_type),
        text(&c.pharmacy_state),
        text(&c.payer_name),
        number(c.total_paid),
        number(c.patient_pay),
        number(c.generic_cost),
        number(c.quantity),
        number(c.days_supply),
        Value::String(c.status.as_str().to_string()),
    ];
    ClaimSchema::COLUMNS.iter()
        .zip(values)
        .map(|((source, _), value)| (source.to_string(), value))
        .collect()
}

/// Add the statistic columns of `agg` to `row`
pub fn extend_with_aggregate(row: &mut Row, agg: &ClaimAggregate) {
    row.insert("total_prescriptions".into(), Value::from(agg.total_prescriptions));
    row.insert("unique_patients".into(), Value::from(agg.unique_patients));
    row.insert("first_prescription_date".into(), date(agg.first_prescription_date));
    row.insert("last_prescription_date".into(), date(agg.last_prescription_date));
    row.insert("total_cost".into(), number(Some(agg.total_cost)));
    row.insert("avg_cost_per_prescription".into(), number(Some(agg.avg_cost_per_prescription)));
    row.insert("unique_drugs".into(), Value::from(agg.unique_drugs));
}

pub fn aggregate_row(agg: &ClaimAggregate, group_by: GroupBy) -> Row {
    let mut row = Row::new();
    row.insert(group_by.column().into(), Value::String(agg.key.clone()));
    extend_with_aggregate(&mut row, agg);
    row
}

/// Resolve a requested column name against the available columns.
///
/// Exact names win, then case-insensitive names, then claim column aliases.
pub fn resolve_column(name: &str, columns: &[String]) -> Option<String> {
    let name = name.trim();
    if let Some(c) = columns.iter().find(|c| c.as_str() == name) {
        return Some(c.clone());
    }
    if let Some(c) = columns.iter().find(|c| c.eq_ignore_ascii_case(name)) {
        return Some(c.clone());
    }
    let alias = match name.to_lowercase().as_str() {
        "type_1_npi" => Some("npi"),
        _ => ClaimSchema::canonical_column(name),
    };
    alias.and_then(|a| columns.iter().find(|c| c.as_str() == a)).cloned()
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Stable multi-key sort; unknown columns are skipped, nulls sort last
pub fn order_rows(rows: &mut [Row], order_by: &[OrderBy], columns: &[String]) {
    let keys: Vec<(String, SortDirection)> = order_by.iter()
        .filter_map(|o| resolve_column(&o.column, columns).map(|c| (c, o.direction)))
        .collect();
    if keys.is_empty() {
        return;
    }

    rows.sort_by(|a, b| {
        for (column, direction) in &keys {
            let x = a.get(column).filter(|v| !v.is_null());
            let y = b.get(column).filter(|v| !v.is_null());
            let ordering = match (x, y) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(x), Some(y)) => match direction {
                    SortDirection::Asc => compare_values(x, y),
                    SortDirection::Desc => compare_values(y, x),
                },
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Columns kept by a projection; every column when none resolve
pub fn project_columns(projection: &[String], columns: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for name in projection {
        if let Some(column) = resolve_column(name, columns) {
            if !kept.contains(&column) {
                kept.push(column);
            }
        }
    }
    if kept.is_empty() {
        columns.to_vec()
    } else {
        kept
    }
}

/// Order, limit and project rows into a result
pub fn finish(
    query_type: QueryType,
    columns: Vec<String>,
    mut rows: Vec<Row>,
    projection: &[String],
    order_by: &[OrderBy],
    limit: usize,
) -> QueryResult {
    order_rows(&mut rows, order_by, &columns);
    let total_matches = rows.len();
    rows.truncate(limit);

    let projected = project_columns(projection, &columns);
    if projected.len() != columns.len() {
        for row in &mut rows {
            row.retain(|k, _| projected.contains(k));
        }
    }
    QueryResult { query_type, columns: projected, rows, total_matches }
}
