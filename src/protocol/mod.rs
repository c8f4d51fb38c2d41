// Client-server wire protocol: message types, wire formats and the codec.

pub mod codec;
pub mod format;
pub mod messages;

pub use codec::{Codec, Decoded, UnknownFieldPolicy};
pub use format::{wire_format_by_name, GzipJson, JsonText, Payload, WireFormat};
pub use messages::{
    ClientMessage, ErrorCode, GameEvent, ParticipantState, ScoreLine, ServerMessage, StateDelta,
    StateSnapshot,
};

/// Protocol version written into every payload.
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest protocol version this build can still interpret.
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Upper bound for a payload, compressed or not.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Errors surfaced by the codec to the transport layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// The payload does not conform to the message schema.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// The payload declares a protocol version this build cannot interpret.
    #[error("unsupported protocol version {found} (supported {min}..={max})")]
    UnsupportedVersion { found: u64, min: u32, max: u32 },
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ProtocolError::MalformedMessage(_) => "malformed",
            ProtocolError::UnsupportedVersion { .. } => "unsupported_version",
            ProtocolError::Encode(_) => "encode",
        }
    }

    /// The error code reported back to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
            _ => ErrorCode::MalformedMessage,
        }
    }
}

/// Encode a client message with the default JSON codec.
pub fn encode_client_message(message: &ClientMessage) -> Result<Payload, ProtocolError> {
    Codec::json().encode_client_message(message)
}

/// Decode a client message with the default JSON codec.
pub fn decode_client_message(bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
    Codec::json().decode_client_message(bytes)
}

/// Encode a server message with the default JSON codec.
pub fn encode_server_message(message: &ServerMessage) -> Result<Payload, ProtocolError> {
    Codec::json().encode_server_message(message)
}

/// Decode a server message with the default JSON codec.
pub fn decode_server_message(bytes: &[u8]) -> Result<ServerMessage, ProtocolError> {
    Codec::json().decode_server_message(bytes)
}
