use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::model::{RecordId, RootRef, TempIdBinding};

/// A persisted row: a typed bag of attributes with a numeric primary key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(resource_type: &str, id: RecordId, attributes: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            resource_type: resource_type.to_string(),
            attributes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attribute lookup that also answers `id`
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == "id" {
            return Some(Value::from(self.id));
        }
        self.attributes.get(name).cloned()
    }

    pub fn matches(&self, filter: &ScopeFilter) -> bool {
        filter.matches(self)
    }
}

/// Subset of a table a user may touch, as handed out by an authorization strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeFilter {
    All,
    Nothing,
    /// Conjunction of field conditions; an array value means "any of"
    Where(Map<String, Value>),
}

impl Default for ScopeFilter {
    fn default() -> Self {
        ScopeFilter::All
    }
}

impl ScopeFilter {
    pub fn field(field: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(field.to_string(), value);
        ScopeFilter::Where(map)
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            ScopeFilter::All => true,
            ScopeFilter::Nothing => false,
            ScopeFilter::Where(conditions) => conditions_match(conditions, record),
        }
    }

    /// Intersection of two filters
    pub fn and(self, other: ScopeFilter) -> ScopeFilter {
        match (self, other) {
            (ScopeFilter::Nothing, _) | (_, ScopeFilter::Nothing) => ScopeFilter::Nothing,
            (ScopeFilter::All, f) | (f, ScopeFilter::All) => f,
            (ScopeFilter::Where(mut a), ScopeFilter::Where(b)) => {
                for (key, value) in b {
                    let narrowed = match a.get(&key) {
                        Some(existing) => {
                            let common = intersect_values(existing, &value);
                            match common.len() {
                                0 => return ScopeFilter::Nothing,
                                1 => common.into_iter().next().unwrap_or(Value::Null),
                                _ => Value::Array(common),
                            }
                        }
                        None => value,
                    };
                    a.insert(key, narrowed);
                }
                ScopeFilter::Where(a)
            }
        }
    }
}

pub fn conditions_match(conditions: &Map<String, Value>, record: &Record) -> bool {
    conditions.iter().all(|(field, expected)| {
        let actual = record.field(field).unwrap_or(Value::Null);
        match expected {
            Value::Array(options) => options.iter().any(|o| loose_eq(o, &actual)),
            other => loose_eq(other, &actual),
        }
    })
}

fn as_options(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn intersect_values(a: &Value, b: &Value) -> Vec<Value> {
    let right = as_options(b);
    as_options(a)
        .into_iter()
        .filter(|l| right.iter().any(|r| loose_eq(l, r)))
        .cloned()
        .collect()
}

/// Equality that treats `"5"` and `5` as the same key
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordQuery {
    pub resource_type: String,
    /// Authorized subset
    pub filter: ScopeFilter,
    /// Client-supplied equality conditions
    pub conditions: Map<String, Value>,
    pub sort: Vec<SortField>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: ScopeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_condition(mut self, field: &str, value: Value) -> Self {
        self.conditions.insert(field.to_string(), value);
        self
    }
}

/// One page of query results plus the unpaginated match count
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub total: usize,
}

/// Filtering, sorting and pagination shared by every store
pub fn apply_query(records: impl IntoIterator<Item = Record>, query: &RecordQuery) -> RecordPage {
    let mut matched: Vec<Record> = records
        .into_iter()
        .filter(|r| r.resource_type == query.resource_type)
        .filter(|r| query.filter.matches(r) && conditions_match(&query.conditions, r))
        .collect();

    matched.sort_by(|a, b| {
        for sort in &query.sort {
            let ordering = compare_values(
                &a.field(&sort.field).unwrap_or(Value::Null),
                &b.field(&sort.field).unwrap_or(Value::Null),
            );
            let ordering = match sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    });

    let total = matched.len();
    let offset = query.offset.unwrap_or(0);
    let records = matched
        .into_iter()
        .skip(offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();

    RecordPage { records, total }
}

/// Record whose attributes changed during a write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedEntity {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: RecordId,
    /// Only the keys whose values changed, with their new values
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyedEntity {
    /// Plural resource name, as the client addresses collections
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: RecordId,
    pub destroyed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedRecord {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: RecordId,
    /// Correlation the client's placeholder id was converted into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<TempIdBinding>,
}

/// Errors the store reported for one field, keyed by storage path (`questions[0].value`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub key: String,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub root: RootRef,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteSummary {
    pub created: Vec<CreatedRecord>,
    pub changed: Vec<ChangedEntity>,
    pub destroyed: Vec<DestroyedEntity>,
}

/// What a store transaction produced. `Rejected` means nothing was committed.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Committed(WriteSummary),
    Rejected(Vec<ValidationFailure>),
}
