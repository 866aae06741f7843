use crate::oplog::codec::{self, CodecError};
use crate::types::{Document, FieldError, OpTime, RecordId, Term, Timestamp, Value};
use bytes::Bytes;
use std::fmt;

pub const OPLOG_VERSION: i32 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OpType {
    Noop,
    Insert,
    Update,
    Delete,
    Command,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Noop => "n",
            OpType::Insert => "i",
            OpType::Update => "u",
            OpType::Delete => "d",
            OpType::Command => "c",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "n" => Some(OpType::Noop),
            "i" => Some(OpType::Insert),
            "u" => Some(OpType::Update),
            "d" => Some(OpType::Delete),
            "c" => Some(OpType::Command),
            _ => None,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OplogEntry is one record of the replicated log.
#[derive(Debug, Clone, PartialEq)]
pub struct OplogEntry {
    pub ts: Timestamp,
    /// Absent on entries written under protocol version 0.
    pub t: Option<Term>,
    pub h: i64,
    pub v: i32,
    pub op: OpType,
    pub ns: String,
    pub o: Document,
    pub o2: Option<Document>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OplogEntryParseError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("unknown op type '{0}'")]
    UnknownOpType(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("oplog entry timestamp {0:?} cannot be used as a record id")]
    BadTimestamp(Timestamp),
}

impl OplogEntry {
    pub fn new(ts: Timestamp, term: Term, h: i64, op: OpType, ns: &str, o: Document) -> Self {
        OplogEntry {
            ts,
            t: Some(term),
            h,
            v: OPLOG_VERSION,
            op,
            ns: ns.to_string(),
            o,
            o2: None,
        }
    }

    pub fn noop(ts: Timestamp, term: Term, h: i64) -> Self {
        Self::new(ts, term, h, OpType::Noop, "", Document::new().with("msg", "noop"))
    }

    pub fn with_o2(mut self, o2: Document) -> Self {
        self.o2 = Some(o2);
        self
    }

    pub fn op_time(&self) -> OpTime {
        OpTime::new(self.ts, self.t.unwrap_or(Term::UNINITIALIZED))
    }

    pub fn record_id(&self) -> Result<RecordId, OplogEntryParseError> {
        oplog_key(self.ts)
    }

    /// Lenient parse: only `ts`, `h` and `op` are mandatory. Callers that need `ns`/`o` check
    /// for them themselves, since a missing namespace is an error of the operation, not the entry.
    pub fn parse(doc: &Document) -> Result<Self, OplogEntryParseError> {
        let ts = doc.require_timestamp("ts")?;
        let t = doc.get_i64("t").map(Term::new);
        let h = doc.require_i64("h")?;
        let v = doc.get_i64("v").unwrap_or(OPLOG_VERSION as i64) as i32;
        let op_str = doc.require_str("op")?;
        let op = OpType::parse(op_str).ok_or_else(|| OplogEntryParseError::UnknownOpType(op_str.to_string()))?;
        let ns = doc.get_str("ns").unwrap_or("").to_string();
        let o = doc.get_document("o").cloned().unwrap_or_default();
        let o2 = doc.get_document("o2").cloned();

        Ok(OplogEntry {
            ts,
            t,
            h,
            v,
            op,
            ns,
            o,
            o2,
        })
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new().with("ts", Value::Timestamp(self.ts));
        if let Some(t) = self.t {
            doc.insert("t", t.as_i64());
        }
        doc.insert("h", self.h);
        doc.insert("v", self.v);
        doc.insert("op", self.op.as_str());
        doc.insert("ns", self.ns.as_str());
        doc.insert("o", self.o.clone());
        if let Some(o2) = &self.o2 {
            doc.insert("o2", o2.clone());
        }

        doc
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        codec::encode_document(&self.to_document())
    }

    pub fn decode(data: &[u8]) -> Result<Self, OplogEntryParseError> {
        let doc = codec::decode_document(data)?;
        Self::parse(&doc)
    }
}

/// The record id of an oplog entry is its packed timestamp, so id order is operation order.
pub fn oplog_key(ts: Timestamp) -> Result<RecordId, OplogEntryParseError> {
    let packed = ts.as_u64();
    if packed == 0 || packed > i64::MAX as u64 {
        return Err(OplogEntryParseError::BadTimestamp(ts));
    }

    Ok(RecordId::new(packed as i64))
}

/// Reads the record id out of a serialized oplog entry.
pub fn extract_key(data: &[u8]) -> Result<RecordId, OplogEntryParseError> {
    let doc = codec::decode_document(data)?;
    let ts = doc.require_timestamp("ts")?;
    oplog_key(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_entry_reads_back_with_o2() {
        let entry = OplogEntry::new(
            Timestamp::new(10, 2),
            Term::new(3),
            -77,
            OpType::Update,
            "test.c",
            Document::new().with("$set", Document::new().with("a", 1)),
        )
        .with_o2(Document::new().with("_id", 5));

        let bytes = entry.encode().unwrap();

        assert_eq!(OplogEntry::decode(&bytes).unwrap(), entry);
        assert_eq!(extract_key(&bytes).unwrap(), oplog_key(entry.ts).unwrap());
        assert_eq!(entry.op_time(), OpTime::new(Timestamp::new(10, 2), Term::new(3)));
    }

    #[test]
    fn pv0_entry_has_uninitialized_term() {
        let doc = Document::new()
            .with("ts", Timestamp::new(1, 1))
            .with("h", 1i64)
            .with("op", "n");

        let entry = OplogEntry::parse(&doc).unwrap();

        assert_eq!(entry.t, None);
        assert_eq!(entry.op_time().term(), Term::UNINITIALIZED);
    }

    #[test]
    fn parse_errors() {
        let missing_h = Document::new().with("ts", Timestamp::new(1, 1)).with("op", "n");
        assert_eq!(
            OplogEntry::parse(&missing_h),
            Err(OplogEntryParseError::Field(FieldError::Missing("h".into())))
        );

        let bad_op = missing_h.clone().with("h", 1i64).with("op", "x");
        assert_eq!(
            OplogEntry::parse(&bad_op),
            Err(OplogEntryParseError::UnknownOpType("x".into()))
        );
    }

    #[test]
    fn key_order_matches_timestamp_order() {
        let a = oplog_key(Timestamp::new(1, 500)).unwrap();
        let b = oplog_key(Timestamp::new(2, 0)).unwrap();

        assert!(a < b);
        assert!(oplog_key(Timestamp::new(0, 0)).is_err());
        assert!(oplog_key(Timestamp::new(u32::MAX, 0)).is_err());
    }
}
