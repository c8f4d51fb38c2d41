// Wire representations the codec can be configured with.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use super::{ProtocolError, MAX_PAYLOAD_BYTES};

/// An encoded message, ready for the transport.
///
/// Callers treat the bytes as opaque; `is_text` only tells the transport
/// which frame type to use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    text: bool,
}

impl Payload {
    pub fn text(bytes: Vec<u8>) -> Self {
        Self { bytes, text: true }
    }

    pub fn binary(bytes: Vec<u8>) -> Self {
        Self { bytes, text: false }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_text(&self) -> bool {
        self.text
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Strategy turning a structured document into bytes and back.
///
/// The codec works on the document model; a format only decides the byte
/// representation, so formats can be swapped without touching callers.
pub trait WireFormat: Send + Sync {
    /// Name used in configuration, e.g. `"json"`.
    fn name(&self) -> &'static str;

    fn encode_document(&self, document: &Value) -> Result<Payload, ProtocolError>;

    fn decode_document(&self, bytes: &[u8]) -> Result<Value, ProtocolError>;
}

/// Human-readable JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonText;

impl WireFormat for JsonText {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_document(&self, document: &Value) -> Result<Payload, ProtocolError> {
        serde_json::to_vec(document)
            .map(Payload::text)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode_document(&self, bytes: &[u8]) -> Result<Value, ProtocolError> {
        parse_json(bytes)
    }
}

/// Gzip-compressed JSON. Compression is transport-only: the decoded
/// document is the same as with [`JsonText`]. Uncompressed JSON is accepted
/// on decode so text and binary peers can interoperate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipJson;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

impl WireFormat for GzipJson {
    fn name(&self) -> &'static str {
        "gzip-json"
    }

    fn encode_document(&self, document: &Value) -> Result<Payload, ProtocolError> {
        let json = serde_json::to_vec(document).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(&json)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        encoder
            .finish()
            .map(Payload::binary)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode_document(&self, bytes: &[u8]) -> Result<Value, ProtocolError> {
        if !bytes.starts_with(&GZIP_MAGIC) {
            return parse_json(bytes);
        }
        // Read one byte past the limit to detect oversized payloads.
        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .take(MAX_PAYLOAD_BYTES as u64 + 1)
            .read_to_end(&mut json)
            .map_err(|e| ProtocolError::MalformedMessage(format!("invalid gzip data: {e}")))?;
        if json.len() > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::MalformedMessage(format!(
                "decompressed payload exceeds {MAX_PAYLOAD_BYTES} bytes"
            )));
        }
        parse_json(&json)
    }
}

fn parse_json(bytes: &[u8]) -> Result<Value, ProtocolError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::MalformedMessage(format!("invalid JSON: {e}")))
}

/// Look up a wire format by its configuration name.
pub fn wire_format_by_name(name: &str) -> Option<Arc<dyn WireFormat>> {
    match name {
        "json" => Some(Arc::new(JsonText)),
        "gzip-json" | "gzip" => Some(Arc::new(GzipJson)),
        _ => None,
    }
}
