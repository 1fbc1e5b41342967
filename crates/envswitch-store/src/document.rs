//! Portable record and index shapes shared by every backend
//!
//! A [`Document`] is an opaque JSON object that must carry a unique `_id`.
//! An [`IndexDescriptor`] mirrors the definition a backend reports for an
//! index, including the optional flags that matter when it is recreated.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::storage_traits::StoreResult;

/// Name of the unique identifier field every document carries.
pub const ID_FIELD: &str = "_id";

/// Name of the index a store builds implicitly on [`ID_FIELD`].
pub const IMPLICIT_ID_INDEX: &str = "_id_";

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A single stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Wrap a JSON value, rejecting non-objects and objects without `_id`.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(StoreError::InvalidDocument(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Wrap a JSON map, rejecting maps without a non-null `_id`.
    pub fn from_map(map: Map<String, Value>) -> StoreResult<Self> {
        match map.get(ID_FIELD) {
            Some(Value::Null) | None => Err(StoreError::InvalidDocument(format!(
                "missing `{}` field",
                ID_FIELD
            ))),
            Some(_) => Ok(Document(map)),
        }
    }

    /// The unique identifier value.
    pub fn id(&self) -> &Value {
        static NULL: Value = Value::Null;
        // from_map guarantees presence
        self.0.get(ID_FIELD).unwrap_or(&NULL)
    }

    /// Identifier rendered as a string key (strings unquoted, others as JSON).
    pub fn id_key(&self) -> String {
        value_key(Some(self.id()))
    }

    /// Read a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a top-level field. Setting `_id` to null is ignored.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if field == ID_FIELD && value.is_null() {
            return;
        }
        self.0.insert(field, value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Canonical string key for a field value, used to group documents.
///
/// Strings are used as-is so `"a"` and `a` group together; every other value
/// (including a missing field, rendered as `null`) is its JSON text.
pub fn value_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => Value::Null.to_string(),
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Type-tagged grouping key for a field value.
///
/// Two values share a group key exactly when [`compare_field_values`] finds
/// them equal, so `1` and `"1"` are different groups while a missing field
/// and `null` are the same one.
pub fn group_key(value: Option<&Value>) -> String {
    format!("{}:{}", type_rank(value), value_key(value))
}

/// Total order over optional JSON field values.
///
/// Missing/null < booleans < numbers < strings < arrays < objects. Strings
/// that parse as RFC 3339 timestamps sort before all other strings and
/// compare chronologically among themselves, so `updatedAt` values with
/// different offsets still order correctly. Values that compare equal have
/// identical JSON text.
pub fn compare_field_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => compare_strings(x, y),
        (Some(x @ Value::Array(_)), Some(y @ Value::Array(_)))
        | (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Numeric value first, then exact integer value, then JSON text.
fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    fn exact(n: &Number) -> Option<i128> {
        n.as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
    }

    let as_float = |n: &Number| n.as_f64().unwrap_or(0.0);
    as_float(x)
        .total_cmp(&as_float(y))
        .then_with(|| exact(x).cmp(&exact(y)))
        .then_with(|| x.to_string().cmp(&y.to_string()))
}

/// Timestamps before other strings; instant, then text, within timestamps.
fn compare_strings(x: &str, y: &str) -> Ordering {
    match (parse_timestamp(x), parse_timestamp(y)) {
        (Some(tx), Some(ty)) => tx.cmp(&ty).then_with(|| x.cmp(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => x.cmp(y),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

// ---------------------------------------------------------------------------
// Sorting and grouped top-N
// ---------------------------------------------------------------------------

/// One component of a sort order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Sort documents in place by a list of keys.
    pub fn sort_documents(documents: &mut [Document], keys: &[SortKey]) {
        documents.sort_by(|a, b| {
            for key in keys {
                let ord = compare_field_values(a.get(&key.field), b.get(&key.field));
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

/// "The newest `limit` records of every parent" selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedTopN {
    /// Field holding the parent reference records are grouped by
    pub parent_field: String,
    /// Field holding the last-update timestamp
    pub recency_field: String,
    /// Records retained per parent
    pub limit: usize,
}

impl GroupedTopN {
    pub fn new(limit: usize) -> Self {
        Self {
            parent_field: "parent".to_string(),
            recency_field: "updatedAt".to_string(),
            limit,
        }
    }

    /// Sort order that places each parent's newest records first:
    /// parent ascending, recency descending, `_id` descending.
    pub fn sort_keys(&self) -> Vec<SortKey> {
        vec![
            SortKey::asc(&self.parent_field),
            SortKey::desc(&self.recency_field),
            SortKey::desc(ID_FIELD),
        ]
    }
}

// ---------------------------------------------------------------------------
// IndexDescriptor
// ---------------------------------------------------------------------------

/// Direction of one indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum IndexDirection {
    Ascending,
    Descending,
}

impl From<IndexDirection> for i8 {
    fn from(direction: IndexDirection) -> Self {
        match direction {
            IndexDirection::Ascending => 1,
            IndexDirection::Descending => -1,
        }
    }
}

impl TryFrom<i8> for IndexDirection {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(IndexDirection::Ascending),
            -1 => Ok(IndexDirection::Descending),
            other => Err(format!("index direction must be 1 or -1, got {}", other)),
        }
    }
}

/// One `field → direction` pair of an index key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    pub direction: IndexDirection,
}

impl IndexKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: IndexDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: IndexDirection::Descending,
        }
    }
}

/// An index definition as reported by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    /// Ordered key specification
    pub key: Vec<IndexKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_filter_expression: Option<Value>,
    /// Build hint; not part of the index definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, key: Vec<IndexKey>) -> Self {
        Self {
            name: name.into(),
            key,
            unique: None,
            sparse: None,
            expire_after_seconds: None,
            partial_filter_expression: None,
            background: None,
        }
    }

    /// The implicit primary index on `_id`.
    pub fn implicit_id() -> Self {
        Self::new(IMPLICIT_ID_INDEX, vec![IndexKey::asc(ID_FIELD)])
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn with_expire_after_seconds(mut self, seconds: i64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }

    pub fn with_partial_filter(mut self, filter: Value) -> Self {
        self.partial_filter_expression = Some(filter);
        self
    }

    pub fn is_implicit_id(&self) -> bool {
        self.name == IMPLICIT_ID_INDEX
    }

    /// Same definition without the build hint.
    pub fn without_build_hints(&self) -> Self {
        Self {
            background: None,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionIdentity
// ---------------------------------------------------------------------------

/// Stable opaque identity of a store connection (SHA-256 hex).
///
/// Derived from the connection descriptor rather than from the live client,
/// so it can key caches that outlive any single connection object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionIdentity(String);

impl ConnectionIdentity {
    /// Hash a connection descriptor (endpoint, namespace, database, ...).
    pub fn from_descriptor(descriptor: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(descriptor.as_bytes());
        ConnectionIdentity(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_requires_id() {
        assert!(Document::from_value(json!({"name": "x"})).is_err());
        assert!(Document::from_value(json!({"_id": null})).is_err());
        assert!(Document::from_value(json!([1, 2])).is_err());

        let doc = Document::from_value(json!({"_id": "a1", "name": "x"})).unwrap();
        assert_eq!(doc.id(), &json!("a1"));
        assert_eq!(doc.id_key(), "a1");
    }

    #[test]
    fn timestamps_compare_chronologically() {
        let earlier = json!("2024-01-01T10:00:00+02:00");
        let later = json!("2024-01-01T09:30:00Z");
        assert_eq!(
            compare_field_values(Some(&earlier), Some(&later)),
            Ordering::Less
        );
    }

    #[test]
    fn string_order_is_transitive_across_timestamp_classes() {
        let offset = json!("2024-01-01T10:00:00+02:00");
        let utc = json!("2024-01-01T09:30:00Z");
        let naive = json!("2024-01-01T09:45:00");

        assert_eq!(compare_field_values(Some(&offset), Some(&utc)), Ordering::Less);
        assert_eq!(compare_field_values(Some(&utc), Some(&naive)), Ordering::Less);
        assert_eq!(compare_field_values(Some(&offset), Some(&naive)), Ordering::Less);

        let expected = vec![offset.clone(), utc.clone(), naive.clone()];
        for order in [
            [&naive, &utc, &offset],
            [&utc, &naive, &offset],
            [&offset, &naive, &utc],
        ] {
            let mut values: Vec<Value> = order.into_iter().cloned().collect();
            values.sort_by(|a, b| compare_field_values(Some(a), Some(b)));
            assert_eq!(values, expected);
        }
    }

    #[test]
    fn same_instant_with_different_offsets_is_not_equal() {
        let a = json!("2024-01-01T10:00:00+02:00");
        let b = json!("2024-01-01T08:00:00Z");
        assert_ne!(compare_field_values(Some(&a), Some(&b)), Ordering::Equal);
        assert_ne!(group_key(Some(&a)), group_key(Some(&b)));
    }

    #[test]
    fn group_keys_are_type_distinct() {
        assert_ne!(group_key(Some(&json!(1))), group_key(Some(&json!("1"))));
        assert_ne!(group_key(Some(&json!(1))), group_key(Some(&json!(1.0))));
        assert_eq!(group_key(None), group_key(Some(&Value::Null)));
        assert_eq!(group_key(Some(&json!("p1"))), group_key(Some(&json!("p1"))));
    }

    #[test]
    fn numbers_order_by_value_then_exact_integer() {
        let big = json!(9_007_199_254_740_993_i64);
        let rounded = json!(9_007_199_254_740_992_i64);
        assert_eq!(compare_field_values(Some(&rounded), Some(&big)), Ordering::Less);
        assert_eq!(compare_field_values(Some(&json!(2)), Some(&json!(1.5))), Ordering::Greater);
        assert_ne!(compare_field_values(Some(&json!(1)), Some(&json!(1.0))), Ordering::Equal);
    }

    #[test]
    fn missing_sorts_before_values() {
        assert_eq!(
            compare_field_values(None, Some(&json!(0))),
            Ordering::Less
        );
        assert_eq!(
            compare_field_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
    }

    #[test]
    fn index_descriptor_serializes_only_present_flags() {
        let index = IndexDescriptor::new("email_idx", vec![IndexKey::asc("email")]).with_unique(true);
        let value = serde_json::to_value(&index).unwrap();

        assert_eq!(value["unique"], json!(true));
        assert!(value.get("sparse").is_none());
        assert_eq!(value["key"][0]["direction"], json!(1));
    }

    #[test]
    fn connection_identity_is_stable() {
        let a = ConnectionIdentity::from_descriptor("mem://|app|dev");
        let b = ConnectionIdentity::from_descriptor("mem://|app|dev");
        let c = ConnectionIdentity::from_descriptor("mem://|app|prod");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }
}
