mod codec;
mod entry;
mod local_oplog;

pub use codec::decode_document;
pub use codec::document_from_proto;
pub use codec::document_to_proto;
pub use codec::encode_document;
pub use codec::encoded_len;
pub use codec::value_from_proto;
pub use codec::value_to_proto;
pub use codec::CodecError;
pub use entry::extract_key;
pub use entry::oplog_key;
pub use entry::OpType;
pub use entry::OplogEntry;
pub use entry::OplogEntryParseError;
pub use local_oplog::LocalOplog;
pub use local_oplog::LocalOplogIterator;
pub use local_oplog::OplogIterator;
pub use local_oplog::OplogReadError;

pub const OPLOG_NAMESPACE: &str = "local.oplog.rs";
