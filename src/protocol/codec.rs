// Versioned encode/decode of client and server messages.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::format::{JsonText, Payload, WireFormat};
use super::messages::{ClientMessage, ServerMessage};
use super::{ProtocolError, MAX_PAYLOAD_BYTES, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
use crate::metrics;

const VERSION_FIELD: &str = "v";
const KIND_FIELD: &str = "kind";

/// What to do with top-level fields this build does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownFieldPolicy {
    /// Discard them. Right for leaf consumers.
    #[default]
    Drop,
    /// Keep them in [`Decoded::extensions`] so relays can pass them on.
    Preserve,
}

/// A decoded message plus any unknown top-level fields kept under
/// [`UnknownFieldPolicy::Preserve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<M> {
    pub message: M,
    pub extensions: Map<String, Value>,
}

/// Encoder/decoder for the client-server protocol.
///
/// Every payload is a single object `{"v": <version>, "kind": ..., ...}`. The
/// byte representation comes from the injected [`WireFormat`].
#[derive(Clone)]
pub struct Codec {
    format: Arc<dyn WireFormat>,
    policy: UnknownFieldPolicy,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("format", &self.format.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::json()
    }
}

impl Codec {
    pub fn new(format: Arc<dyn WireFormat>, policy: UnknownFieldPolicy) -> Self {
        Self { format, policy }
    }

    /// JSON text, unknown fields dropped.
    pub fn json() -> Self {
        Self::new(Arc::new(JsonText), UnknownFieldPolicy::Drop)
    }

    pub fn with_policy(mut self, policy: UnknownFieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }

    pub fn policy(&self) -> UnknownFieldPolicy {
        self.policy
    }

    // ── Client messages ──────────────────────────────────────────────

    pub fn encode_client_message(&self, message: &ClientMessage) -> Result<Payload, ProtocolError> {
        self.encode(message, None)
    }

    pub fn encode_client_message_with_extensions(
        &self,
        message: &ClientMessage,
        extensions: &Map<String, Value>,
    ) -> Result<Payload, ProtocolError> {
        self.encode(message, Some(extensions))
    }

    pub fn decode_client_message(&self, bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
        self.decode_client_envelope(bytes).map(|d| d.message)
    }

    pub fn decode_client_envelope(
        &self,
        bytes: &[u8],
    ) -> Result<Decoded<ClientMessage>, ProtocolError> {
        self.decode(bytes, "client")
    }

    // ── Server messages ──────────────────────────────────────────────

    pub fn encode_server_message(&self, message: &ServerMessage) -> Result<Payload, ProtocolError> {
        self.encode(message, None)
    }

    pub fn encode_server_message_with_extensions(
        &self,
        message: &ServerMessage,
        extensions: &Map<String, Value>,
    ) -> Result<Payload, ProtocolError> {
        self.encode(message, Some(extensions))
    }

    pub fn decode_server_message(&self, bytes: &[u8]) -> Result<ServerMessage, ProtocolError> {
        self.decode_server_envelope(bytes).map(|d| d.message)
    }

    pub fn decode_server_envelope(
        &self,
        bytes: &[u8],
    ) -> Result<Decoded<ServerMessage>, ProtocolError> {
        self.decode(bytes, "server")
    }

    // ── Shared implementation ────────────────────────────────────────

    fn encode<M: Serialize>(
        &self,
        message: &M,
        extensions: Option<&Map<String, Value>>,
    ) -> Result<Payload, ProtocolError> {
        let mut object = match serde_json::to_value(message) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                return Err(ProtocolError::Encode(format!(
                    "message serialized to {other}, expected an object"
                )))
            }
            Err(e) => return Err(ProtocolError::Encode(e.to_string())),
        };
        object.insert(VERSION_FIELD.to_string(), Value::from(PROTOCOL_VERSION));

        if let Some(extensions) = extensions {
            for (key, value) in extensions {
                if !object.contains_key(key) {
                    object.insert(key.clone(), value.clone());
                }
            }
        }

        self.format.encode_document(&Value::Object(object))
    }

    fn decode<M>(&self, bytes: &[u8], direction: &str) -> Result<Decoded<M>, ProtocolError>
    where
        M: Serialize + DeserializeOwned,
    {
        let result = self.decode_inner(bytes);
        match &result {
            Ok(_) => metrics::MESSAGES_DECODED_TOTAL
                .with_label_values(&[direction])
                .inc(),
            Err(e) => {
                tracing::debug!(direction, format = self.format.name(), "Rejected payload: {e}");
                metrics::DECODE_FAILURES_TOTAL
                    .with_label_values(&[direction, e.reason()])
                    .inc();
            }
        }
        result
    }

    fn decode_inner<M>(&self, bytes: &[u8]) -> Result<Decoded<M>, ProtocolError>
    where
        M: Serialize + DeserializeOwned,
    {
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::MalformedMessage(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_BYTES}",
                bytes.len()
            )));
        }

        let mut object = match self.format.decode_document(bytes)? {
            Value::Object(object) => object,
            _ => {
                return Err(ProtocolError::MalformedMessage(
                    "payload is not an object".into(),
                ))
            }
        };

        check_version(object.remove(VERSION_FIELD))?;

        match object.get(KIND_FIELD) {
            Some(Value::String(_)) => {}
            Some(_) => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "discriminant `{KIND_FIELD}` must be a string"
                )))
            }
            None => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "missing discriminant field `{KIND_FIELD}`"
                )))
            }
        }

        let original = match self.policy {
            UnknownFieldPolicy::Preserve => Some(object.clone()),
            UnknownFieldPolicy::Drop => None,
        };

        let message: M = serde_json::from_value(Value::Object(object))
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;

        let extensions = match original {
            Some(original) => unknown_fields(&message, original)?,
            None => Map::new(),
        };

        Ok(Decoded {
            message,
            extensions,
        })
    }
}

fn check_version(version: Option<Value>) -> Result<(), ProtocolError> {
    let version = match version {
        Some(v) => v,
        None => {
            return Err(ProtocolError::MalformedMessage(format!(
                "missing protocol version field `{VERSION_FIELD}`"
            )))
        }
    };
    let found = version.as_u64().ok_or_else(|| {
        ProtocolError::MalformedMessage(format!(
            "protocol version must be a non-negative integer, got {version}"
        ))
    })?;
    if found < MIN_PROTOCOL_VERSION as u64 || found > PROTOCOL_VERSION as u64 {
        return Err(ProtocolError::UnsupportedVersion {
            found,
            min: MIN_PROTOCOL_VERSION,
            max: PROTOCOL_VERSION,
        });
    }
    Ok(())
}

/// Top-level fields of `original` that the decoded message does not account for.
fn unknown_fields<M: Serialize>(
    message: &M,
    original: Map<String, Value>,
) -> Result<Map<String, Value>, ProtocolError> {
    let known = match serde_json::to_value(message) {
        Ok(Value::Object(known)) => known,
        Ok(_) => Map::new(),
        Err(e) => return Err(ProtocolError::Encode(e.to_string())),
    };
    Ok(original
        .into_iter()
        .filter(|(key, value)| !known.contains_key(key) && !value.is_null())
        .collect())
}
