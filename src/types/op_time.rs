use crate::types::{Document, FieldError, Value};
use std::cmp::Ordering;
use std::fmt;

/// Timestamp is a (seconds, increment) pair. It orders by seconds first.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timestamp {
    secs: u32,
    inc: u32,
}

impl Timestamp {
    pub fn new(secs: u32, inc: u32) -> Self {
        Timestamp { secs, inc }
    }

    pub fn secs(&self) -> u32 {
        self.secs
    }

    pub fn inc(&self) -> u32 {
        self.inc
    }

    pub fn is_null(&self) -> bool {
        self.secs == 0 && self.inc == 0
    }

    /// The packed form `(secs << 32) | inc`. Byte order of the packed form matches logical order.
    pub fn as_u64(&self) -> u64 {
        ((self.secs as u64) << 32) | (self.inc as u64)
    }

    pub fn from_u64(packed: u64) -> Self {
        Timestamp {
            secs: (packed >> 32) as u32,
            inc: packed as u32,
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Term(i64);

impl Term {
    /// Protocol version 0 entries carry no term. They read back as this sentinel.
    pub const UNINITIALIZED: Term = Term(-1);

    pub fn new(term: i64) -> Self {
        Term(term)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn incr(&mut self) {
        self.0 += 1;
    }

    pub fn next(&self) -> Term {
        Term(self.0 + 1)
    }
}

impl Default for Term {
    fn default() -> Self {
        Term(0)
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OpTime identifies an operation in the replicated log. It is totally ordered by term first and
/// timestamp second.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct OpTime {
    timestamp: Timestamp,
    term: Term,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpTimeParseError {
    #[error("bad optime field: {0}")]
    Field(#[from] FieldError),
    #[error("optime is missing its term, which is only legal in protocol version 0")]
    MissingTerm,
}

impl OpTime {
    pub fn new(timestamp: Timestamp, term: Term) -> Self {
        OpTime { timestamp, term }
    }

    pub fn null() -> Self {
        OpTime::default()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn is_null(&self) -> bool {
        self.timestamp.is_null()
    }

    /// A normal optime has a non-zero timestamp.
    pub fn is_normal(&self) -> bool {
        !self.timestamp.is_null()
    }

    /// Parses the `{ts, t}` fields of a document such as an oplog entry.
    pub fn parse(doc: &Document, protocol_version: i64) -> Result<Self, OpTimeParseError> {
        let timestamp = doc.require_timestamp("ts")?;
        let term = match doc.get("t") {
            Some(value) => match value.as_i64() {
                Some(t) => Term::new(t),
                None => {
                    return Err(OpTimeParseError::Field(FieldError::TypeMismatch {
                        field: "t".into(),
                        expected: "number",
                        found: value.type_name(),
                    }))
                }
            },
            None if protocol_version == 0 => Term::UNINITIALIZED,
            None => return Err(OpTimeParseError::MissingTerm),
        };

        Ok(OpTime { timestamp, term })
    }

    /// Parses a sub-document field holding `{ts, t}`, e.g. `appliedOpTime`.
    pub fn parse_field(doc: &Document, field: &str) -> Result<Self, OpTimeParseError> {
        let sub = doc.require_document(field)?;
        Self::parse(sub, 1)
    }

    pub fn to_document(&self) -> Document {
        Document::new()
            .with("ts", Value::Timestamp(self.timestamp))
            .with("t", self.term.as_i64())
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term
            .cmp(&other.term)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {:?}, t: {:?} }}", self.timestamp, self.term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(secs: u32, term: i64) -> OpTime {
        OpTime::new(Timestamp::new(secs, 1), Term::new(term))
    }

    #[test]
    fn orders_by_term_before_timestamp() {
        assert!(op(100, 1) < op(1, 2));
        assert!(op(1, 2) < op(2, 2));
        assert_eq!(op(5, 3).max(op(9, 2)), op(5, 3));
    }

    #[test]
    fn packed_timestamp_preserves_order() {
        let a = Timestamp::new(1, u32::MAX);
        let b = Timestamp::new(2, 0);

        assert!(a < b);
        assert!(a.as_u64() < b.as_u64());
        assert_eq!(Timestamp::from_u64(b.as_u64()), b);
    }

    #[test]
    fn missing_term_only_legal_in_pv0() {
        let doc = Document::new().with("ts", Timestamp::new(3, 4));

        assert_eq!(
            OpTime::parse(&doc, 0),
            Ok(OpTime::new(Timestamp::new(3, 4), Term::UNINITIALIZED))
        );
        assert_eq!(OpTime::parse(&doc, 1), Err(OpTimeParseError::MissingTerm));
    }

    #[test]
    fn document_form_reads_back() {
        let original = op(42, 7);
        let parsed = OpTime::parse(&original.to_document(), 1).unwrap();

        assert_eq!(parsed, original);
        assert!(original.is_normal());
        assert!(OpTime::null().is_null());
    }
}
