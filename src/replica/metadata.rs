use crate::types::{Document, OpTime, OpTimeParseError, Term};

pub const METADATA_FIELD: &str = "$replData";

/// ReplSetMetadata rides along with every replication RPC response so peers learn the commit
/// point and the current term without a dedicated round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplSetMetadata {
    pub last_op_committed: OpTime,
    pub last_op_visible: OpTime,
    pub config_version: i64,
    /// Member id of the primary the sender knows of, or -1.
    pub primary_index: i64,
    pub term: Term,
    pub sync_source_index: i64,
}

impl ReplSetMetadata {
    pub fn parse(doc: &Document) -> Result<Self, OpTimeParseError> {
        let data = doc.require_document(METADATA_FIELD)?;

        Ok(ReplSetMetadata {
            last_op_committed: OpTime::parse_field(data, "lastOpCommitted")?,
            last_op_visible: OpTime::parse_field(data, "lastOpVisible")?,
            config_version: data.require_i64("configVersion")?,
            primary_index: data.require_i64("primaryIndex")?,
            term: Term::new(data.require_i64("term")?),
            sync_source_index: data.require_i64("syncSourceIndex")?,
        })
    }

    /// Appends the `$replData` field to a response document.
    pub fn write_to(&self, doc: &mut Document) {
        let data = Document::new()
            .with("lastOpCommitted", self.last_op_committed.to_document())
            .with("lastOpVisible", self.last_op_visible.to_document())
            .with("configVersion", self.config_version)
            .with("primaryIndex", self.primary_index)
            .with("term", self.term.as_i64())
            .with("syncSourceIndex", self.sync_source_index);
        doc.insert(METADATA_FIELD, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    #[test]
    fn reads_back_from_response() {
        let metadata = ReplSetMetadata {
            last_op_committed: OpTime::new(Timestamp::new(10, 2), Term::new(3)),
            last_op_visible: OpTime::new(Timestamp::new(11, 0), Term::new(3)),
            config_version: 4,
            primary_index: 1,
            term: Term::new(3),
            sync_source_index: -1,
        };
        let mut response = Document::new().with("ok", 1);
        metadata.write_to(&mut response);

        assert_eq!(ReplSetMetadata::parse(&response), Ok(metadata));
    }

    #[test]
    fn missing_metadata_fails() {
        assert!(ReplSetMetadata::parse(&Document::new().with("ok", 1)).is_err());
    }
}
