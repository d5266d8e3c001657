//! Core types for live queries.

use crate::error::{LiveQueryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Attribute map carried by every record.
pub type Attributes = Map<String, Value>;

/// Unique key of a record within a collection.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Number(i64),
    Text(String),
}

impl Identity {
    /// Parse an identity out of a JSON value. Only integers and strings qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Identity::Number),
            Value::String(s) => Some(Identity::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Identity::Number(n) => Value::from(*n),
            Identity::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Number(n) => write!(f, "Id({})", n),
            Identity::Text(s) => write!(f, "Id({:?})", s),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Number(n) => write!(f, "{}", n),
            Identity::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Identity {
    fn from(n: i64) -> Self {
        Identity::Number(n)
    }
}

impl From<i32> for Identity {
    fn from(n: i32) -> Self {
        Identity::Number(n as i64)
    }
}

impl From<u32> for Identity {
    fn from(n: u32) -> Self {
        Identity::Number(n as i64)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity::Text(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Identity::Text(s)
    }
}

/// A row as known to the client.
///
/// Serializes flat: `{"id": .., ..attributes}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Identity,

    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Record {
    /// Create a record with no attributes.
    pub fn new(id: impl Into<Identity>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set one attribute. The `id` key is reserved and ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != "id" {
            self.attributes.insert(key, value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if key == "id" {
            return None;
        }
        self.attributes.get(key)
    }

    /// Look up a column, treating `id` as a column too.
    pub fn column(&self, key: &str) -> Option<Value> {
        if key == "id" {
            Some(self.id.to_value())
        } else {
            self.attributes.get(key).cloned()
        }
    }

    /// Parse a JSON object row. The row must carry an integer or string `id`.
    pub fn from_json(value: Value) -> Result<Self> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(LiveQueryError::InvalidRecord(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };

        let id = object
            .remove("id")
            .as_ref()
            .and_then(Identity::from_value)
            .ok_or_else(|| LiveQueryError::InvalidRecord("missing or non-scalar `id`".into()))?;

        Ok(Self {
            id,
            attributes: object,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut object = self.attributes.clone();
        object.insert("id".to_string(), self.id.to_value());
        Value::Object(object)
    }
}

/// A notification from the change feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { record: Record },
    Update { record: Record },
    Delete { id: Identity },
}

impl ChangeEvent {
    /// Identity the event refers to.
    pub fn identity(&self) -> &Identity {
        match self {
            ChangeEvent::Insert { record } | ChangeEvent::Update { record } => &record.id,
            ChangeEvent::Delete { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert { .. } => "insert",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}

/// Status of a change feed subscription as reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Connecting,
    Subscribed,
    Errored,
    TimedOut,
    Closed,
}

/// Comparison operator for a filter predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// One `column <op> value` condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: Comparison,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Comparison::Eq, value)
    }

    /// Evaluate against a record. A missing column compares as `null`.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.column(&self.column).unwrap_or(Value::Null);
        let ordering = compare_values(&actual, &self.value);
        match self.op {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Lte => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Gte => ordering != Ordering::Less,
        }
    }
}

/// Conjunction of predicates. Empty matches everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub predicates: Vec<Predicate>,
}

impl FilterSpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Sort key for the snapshot query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub column: String,
    pub direction: Direction,
}

impl OrderSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let left = a.column(&self.column).unwrap_or(Value::Null);
        let right = b.column(&self.column).unwrap_or(Value::Null);
        let ordering = compare_values(&left, &right);
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// Which columns the snapshot returns. `id` is always kept.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl Projection {
    pub fn apply(&self, record: &Record) -> Record {
        match self {
            Projection::All => record.clone(),
            Projection::Columns(columns) => Record {
                id: record.id.clone(),
                attributes: record
                    .attributes
                    .iter()
                    .filter(|(key, _)| columns.iter().any(|c| c == *key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            },
        }
    }
}

/// Everything needed to issue the snapshot query for one live query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub table: String,
    #[serde(default)]
    pub projection: Projection,
    #[serde(default)]
    pub filter: FilterSpec,
    #[serde(default)]
    pub order: Option<OrderSpec>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QuerySpec {
    /// Select every column of every row in `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: Projection::All,
            filter: FilterSpec::all(),
            order: None,
            limit: None,
        }
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Projection::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = self.filter.and(predicate);
        self
    }

    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used by filters and sort keys.
///
/// `null < bool < number < string < array < object`. Arrays and objects
/// only compare by kind.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(f64::NAN);
                    let y = y.as_f64().unwrap_or(f64::NAN);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_json() {
        let record = Record::from_json(json!({"id": 7, "title": "milk"})).unwrap();
        assert_eq!(record.id, Identity::Number(7));
        assert_eq!(record.get("title"), Some(&json!("milk")));
        assert!(record.get("id").is_none());
    }

    #[test]
    fn test_record_from_json_rejects_missing_id() {
        let result = Record::from_json(json!({"title": "milk"}));
        assert!(matches!(result, Err(LiveQueryError::InvalidRecord(_))));

        let result = Record::from_json(json!([1, 2]));
        assert!(matches!(result, Err(LiveQueryError::InvalidRecord(_))));
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = Record::new("a1").with("done", false);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"id": "a1", "done": false}));
        assert_eq!(record.to_json(), value);
    }

    #[test]
    fn test_change_event_wire_format() {
        let event: ChangeEvent =
            serde_json::from_value(json!({"op": "delete", "id": 3})).unwrap();
        assert_eq!(event, ChangeEvent::Delete { id: Identity::Number(3) });

        let event: ChangeEvent = serde_json::from_value(
            json!({"op": "insert", "record": {"id": "x", "n": 1}}),
        )
        .unwrap();
        assert_eq!(event.kind(), "insert");
        assert_eq!(event.identity(), &Identity::from("x"));
    }

    #[test]
    fn test_predicates() {
        let record = Record::new(1).with("priority", 3).with("owner", "ana");

        assert!(Predicate::eq("owner", "ana").matches(&record));
        assert!(Predicate::new("priority", Comparison::Gte, 3).matches(&record));
        assert!(!Predicate::new("priority", Comparison::Gt, 3).matches(&record));
        assert!(Predicate::new("id", Comparison::Lt, 2).matches(&record));
        // Missing column compares as null
        assert!(Predicate::eq("archived", Value::Null).matches(&record));
    }

    #[test]
    fn test_compare_values_mixed_types() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(99), &json!("1")), Ordering::Less);
    }

    #[test]
    fn test_projection_keeps_id() {
        let record = Record::new(1).with("a", 1).with("b", 2);
        let projected = Projection::Columns(vec!["b".into()]).apply(&record);
        assert_eq!(projected.id, Identity::Number(1));
        assert!(projected.get("a").is_none());
        assert_eq!(projected.get("b"), Some(&json!(2)));
    }
}
