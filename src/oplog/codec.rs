use crate::grpc::{proto_value, ProtoArray, ProtoDocument, ProtoField, ProtoValue};
use crate::types::{Document, Timestamp, Value};
use bytes::{Bytes, BytesMut};
use prost::Message;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode document: {0}")]
    Decode(String),
    #[error("failed to encode document: {0}")]
    Encode(String),
    #[error("field '{0}' has no value")]
    EmptyValue(String),
}

/// Serializes a document to the bytes stored in a record store.
pub fn encode_document(doc: &Document) -> Result<Bytes, CodecError> {
    let proto = document_to_proto(doc);
    let mut buf = BytesMut::with_capacity(proto.encoded_len());
    proto
        .encode(&mut buf)
        .map_err(|e| CodecError::Encode(e.to_string()))?;

    Ok(buf.freeze())
}

pub fn decode_document(data: &[u8]) -> Result<Document, CodecError> {
    let proto = ProtoDocument::decode(data).map_err(|e| CodecError::Decode(e.to_string()))?;
    document_from_proto(proto)
}

pub fn encoded_len(doc: &Document) -> usize {
    document_to_proto(doc).encoded_len()
}

pub fn document_to_proto(doc: &Document) -> ProtoDocument {
    ProtoDocument {
        fields: doc
            .iter()
            .map(|(name, value)| ProtoField {
                name: name.to_string(),
                value: Some(value_to_proto(value)),
            })
            .collect(),
    }
}

pub fn document_from_proto(proto: ProtoDocument) -> Result<Document, CodecError> {
    let mut doc = Document::new();
    for field in proto.fields {
        let value = match field.value {
            Some(v) => value_from_proto(&field.name, v)?,
            None => return Err(CodecError::EmptyValue(field.name)),
        };
        doc.insert(field.name, value);
    }

    Ok(doc)
}

pub fn value_to_proto(value: &Value) -> ProtoValue {
    let kind = match value {
        Value::Null => proto_value::Kind::NullValue(true),
        Value::Bool(b) => proto_value::Kind::BoolValue(*b),
        Value::Int32(i) => proto_value::Kind::Int32Value(*i),
        Value::Int64(i) => proto_value::Kind::Int64Value(*i),
        Value::Double(d) => proto_value::Kind::DoubleValue(*d),
        Value::String(s) => proto_value::Kind::StringValue(s.clone()),
        Value::Timestamp(ts) => proto_value::Kind::TimestampValue(ts.as_u64()),
        Value::Document(d) => proto_value::Kind::DocumentValue(document_to_proto(d)),
        Value::Array(values) => proto_value::Kind::ArrayValue(ProtoArray {
            values: values.iter().map(value_to_proto).collect(),
        }),
        Value::Binary(b) => proto_value::Kind::BinaryValue(b.to_vec()),
    };

    ProtoValue { kind: Some(kind) }
}

pub fn value_from_proto(field_name: &str, proto: ProtoValue) -> Result<Value, CodecError> {
    let kind = match proto.kind {
        Some(kind) => kind,
        None => return Err(CodecError::EmptyValue(field_name.to_string())),
    };

    let value = match kind {
        proto_value::Kind::NullValue(_) => Value::Null,
        proto_value::Kind::BoolValue(b) => Value::Bool(b),
        proto_value::Kind::Int32Value(i) => Value::Int32(i),
        proto_value::Kind::Int64Value(i) => Value::Int64(i),
        proto_value::Kind::DoubleValue(d) => Value::Double(d),
        proto_value::Kind::StringValue(s) => Value::String(s),
        proto_value::Kind::TimestampValue(ts) => Value::Timestamp(Timestamp::from_u64(ts)),
        proto_value::Kind::DocumentValue(d) => Value::Document(document_from_proto(d)?),
        proto_value::Kind::ArrayValue(array) => {
            let mut values = Vec::with_capacity(array.values.len());
            for v in array.values {
                values.push(value_from_proto(field_name, v)?);
            }
            Value::Array(values)
        }
        proto_value::Kind::BinaryValue(b) => Value::Binary(Bytes::from(b)),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_document_survives_encoding() {
        let doc = Document::new()
            .with("_id", 7)
            .with("ts", Timestamp::new(3, 9))
            .with(
                "o",
                Document::new()
                    .with("tags", vec![Value::from("a"), Value::Null, Value::from(1.5)])
                    .with("blob", Bytes::from_static(b"\x00\x01")),
            );

        let bytes = encode_document(&doc).unwrap();

        assert_eq!(bytes.len(), encoded_len(&doc));
        assert_eq!(decode_document(&bytes).unwrap(), doc);
    }

    #[test]
    fn field_without_value_is_rejected() {
        let proto = ProtoDocument {
            fields: vec![ProtoField {
                name: "x".into(),
                value: None,
            }],
        };

        assert_eq!(document_from_proto(proto), Err(CodecError::EmptyValue("x".into())));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(decode_document(&[0xff, 0xff, 0xff]), Err(CodecError::Decode(_))));
    }
}
