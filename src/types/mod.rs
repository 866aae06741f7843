mod document;
mod error_code;
mod host_and_port;
mod op_time;
mod operation_context;
mod record_id;

pub use document::Document;
pub use document::FieldError;
pub use document::IdKey;
pub use document::Value;
pub use error_code::ErrorCode;
pub use host_and_port::HostAndPort;
pub use host_and_port::HostAndPortParseError;
pub use op_time::OpTime;
pub use op_time::OpTimeParseError;
pub use op_time::Term;
pub use op_time::Timestamp;
pub use operation_context::InterruptError;
pub use operation_context::OperationContext;
pub use record_id::RecordId;
