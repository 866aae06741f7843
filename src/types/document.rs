use crate::types::Timestamp;
use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;

/// Document is an ordered list of named values. Field order is significant: two documents with
/// the same fields in a different order are not equal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Timestamp(Timestamp),
    Document(Document),
    Array(Vec<Value>),
    Binary(Bytes),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("missing field '{0}'")]
    Missing(String),
    #[error("field '{field}' should be of type {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    /// Builder style insert, handy for literals in tests and RPC conversions.
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field, replacing the value in place if the key already exists.
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(position).1)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn first_key(&self) -> Option<&str> {
        self.fields.first().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Reads any integral number, widening 32-bit values.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        match self.get(key) {
            Some(Value::Document(d)) => Some(d),
            _ => None,
        }
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        match self.get(key) {
            Some(Value::Array(a)) => Some(a),
            _ => None,
        }
    }

    pub fn get_timestamp(&self, key: &str) -> Option<Timestamp> {
        match self.get(key) {
            Some(Value::Timestamp(ts)) => Some(*ts),
            _ => None,
        }
    }

    pub fn require(&self, key: &str) -> Result<&Value, FieldError> {
        self.get(key).ok_or_else(|| FieldError::Missing(key.to_string()))
    }

    pub fn require_str(&self, key: &str) -> Result<&str, FieldError> {
        match self.require(key)? {
            Value::String(s) => Ok(s.as_str()),
            other => Err(FieldError::type_mismatch(key, "string", other)),
        }
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, FieldError> {
        let value = self.require(key)?;
        value
            .as_i64()
            .ok_or_else(|| FieldError::type_mismatch(key, "number", value))
    }

    pub fn require_document(&self, key: &str) -> Result<&Document, FieldError> {
        match self.require(key)? {
            Value::Document(d) => Ok(d),
            other => Err(FieldError::type_mismatch(key, "object", other)),
        }
    }

    pub fn require_array(&self, key: &str) -> Result<&Vec<Value>, FieldError> {
        match self.require(key)? {
            Value::Array(a) => Ok(a),
            other => Err(FieldError::type_mismatch(key, "array", other)),
        }
    }

    pub fn require_timestamp(&self, key: &str) -> Result<Timestamp, FieldError> {
        match self.require(key)? {
            Value::Timestamp(ts) => Ok(*ts),
            other => Err(FieldError::type_mismatch(key, "timestamp", other)),
        }
    }
}

impl FieldError {
    fn type_mismatch(field: &str, expected: &'static str, found: &Value) -> Self {
        FieldError::TypeMismatch {
            field: field.to_string(),
            expected,
            found: found.type_name(),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
            Value::Document(_) => "object",
            Value::Array(_) => "array",
            Value::Binary(_) => "binData",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Cross-type ordering: null < numbers < strings < objects < arrays < binary < bool <
    /// timestamp. Numbers compare by numeric value regardless of their width.
    pub fn canonical_cmp(&self, other: &Value) -> Ordering {
        let rank_order = self.canonical_rank().cmp(&other.canonical_rank());
        if rank_order != Ordering::Equal {
            return rank_order;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => compare_documents(a, b),
            (Value::Array(a), Value::Array(b)) => compare_arrays(a, b),
            (Value::Binary(a), Value::Binary(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (a, b) => compare_numbers(a, b),
        }
    }

    fn canonical_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Binary(_) => 5,
            Value::Bool(_) => 6,
            Value::Timestamp(_) => 7,
        }
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) if !matches!(a, Value::Double(_)) && !matches!(b, Value::Double(_)) => x.cmp(&y),
        _ => {
            let x = as_f64(a);
            let y = as_f64(b);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int32(x) => *x as f64,
        Value::Int64(x) => *x as f64,
        Value::Double(x) => *x,
        _ => 0.0,
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let order = va.canonical_cmp(vb).then_with(|| ka.cmp(kb));
        if order != Ordering::Equal {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_arrays(a: &[Value], b: &[Value]) -> Ordering {
    for (va, vb) in a.iter().zip(b.iter()) {
        let order = va.canonical_cmp(vb);
        if order != Ordering::Equal {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

/// IdKey wraps a document `_id` so it can key ordered maps and sets.
#[derive(Clone, Debug)]
pub struct IdKey(pub Value);

impl PartialEq for IdKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IdKey {}

impl PartialOrd for IdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.canonical_cmp(&other.0)
    }
}

// ------- Display --------

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{ ")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, " }}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "NumberLong({})", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts.secs(), ts.inc()),
            Value::Document(d) => write!(f, "{}", d),
            Value::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Binary(b) => write!(f, "BinData({} bytes)", b.len()),
        }
    }
}

// ------- Conversions --------

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Binary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut doc = Document::new().with("a", 1).with("b", 2);
        doc.insert("a", "x");

        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(doc.get_str("a"), Some("x"));
    }

    #[test]
    fn field_order_matters_for_equality() {
        let ab = Document::new().with("a", 1).with("b", 2);
        let ba = Document::new().with("b", 2).with("a", 1);

        assert_ne!(ab, ba);
    }

    #[test]
    fn require_reports_type_mismatch() {
        let doc = Document::new().with("ns", 5);

        assert_eq!(
            doc.require_str("ns"),
            Err(FieldError::TypeMismatch {
                field: "ns".into(),
                expected: "string",
                found: "int",
            })
        );
        assert_eq!(doc.require_str("o"), Err(FieldError::Missing("o".into())));
    }

    #[test]
    fn id_keys_compare_numbers_across_widths() {
        assert_eq!(IdKey(Value::Int32(7)), IdKey(Value::Int64(7)));
        assert_eq!(IdKey(Value::Double(7.0)), IdKey(Value::Int32(7)));
        assert!(IdKey(Value::Int32(7)) < IdKey(Value::String("7".into())));
        assert!(IdKey(Value::Null) < IdKey(Value::Int64(i64::MIN)));
    }

    #[test]
    fn display_is_shell_like() {
        let doc = Document::new()
            .with("_id", 0)
            .with("name", "x")
            .with("tags", vec![Value::from(1), Value::from(true)]);

        assert_eq!(format!("{}", doc), r#"{ _id: 0, name: "x", tags: [1, true] }"#);
    }
}
