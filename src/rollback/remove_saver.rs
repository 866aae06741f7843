use crate::grpc::ProtoDocument;
use crate::oplog::{document_from_proto, document_to_proto};
use crate::types::Document;
use bytes::Buf;
use prost::Message;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// RemoveSaver archives documents that rollback is about to overwrite or delete. Files are
/// created lazily, one per namespace, under `<dir>/rollback/`. Each document is stored as a
/// length-delimited protobuf message, the same encoding records use, so `read_saved` gets back
/// exactly what was saved.
pub struct RemoveSaver {
    path: PathBuf,
    out: Option<BufWriter<File>>,
}

impl RemoveSaver {
    pub fn new(dir: &Path, ns: &str) -> Self {
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
        let path = dir.join("rollback").join(format!("{}.{}.pb", ns, stamp));
        RemoveSaver { path, out: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&mut self, doc: &Document) -> io::Result<()> {
        if self.out.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.out = Some(BufWriter::new(File::create(&self.path)?));
        }
        let proto = document_to_proto(doc);
        let mut buf = Vec::with_capacity(proto.encoded_len() + 10);
        proto
            .encode_length_delimited(&mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if let Some(out) = self.out.as_mut() {
            out.write_all(&buf)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.out.as_mut() {
            Some(out) => out.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for RemoveSaver {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Reads back every document in a file written by `RemoveSaver`.
pub fn read_saved(path: &Path) -> io::Result<Vec<Document>> {
    let data = fs::read(path)?;
    let mut buf = data.as_slice();
    let mut docs = Vec::new();
    while buf.has_remaining() {
        let proto = ProtoDocument::decode_length_delimited(&mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let doc = document_from_proto(proto).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        docs.push(doc);
    }
    Ok(docs)
}
