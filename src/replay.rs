// Replay recording: collects server messages and compresses them for storage.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::protocol::{Codec, ServerMessage};

/// Collects JSON-encoded server messages during a match and compresses them on finish.
///
/// Replays are always stored as JSON, whatever wire format the live game uses.
pub struct ReplayRecorder {
    codec: Codec,
    messages: Vec<String>,
}

impl ReplayRecorder {
    pub fn new() -> Self {
        Self {
            codec: Codec::json(),
            messages: Vec::new(),
        }
    }

    /// Record one server message in its JSON envelope.
    pub fn record(&mut self, message: &ServerMessage) {
        let encoded = self
            .codec
            .encode_server_message(message)
            .map_err(|e| e.to_string())
            .and_then(|payload| String::from_utf8(payload.into_bytes()).map_err(|e| e.to_string()));
        match encoded {
            Ok(json) => self.messages.push(json),
            Err(e) => tracing::error!(kind = message.kind(), "Failed to record replay message: {e}"),
        }
    }

    /// Number of recorded messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Compress all recorded messages into a gzipped JSON array.
    pub fn finish(self) -> Result<Vec<u8>, std::io::Error> {
        // Each message is already a JSON document, so join them directly
        let mut json = String::from("[");
        json.push_str(&self.messages.join(","));
        json.push(']');

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(json.as_bytes())?;
        encoder.finish()
    }
}

impl Default for ReplayRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decompress gzipped replay data back to the JSON string.
pub fn decompress_replay(data: &[u8]) -> Result<String, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut result = String::new();
    decoder.read_to_string(&mut result)?;
    Ok(result)
}

/// Decompress a replay and decode every entry back into a server message.
pub fn load_replay(data: &[u8]) -> Result<Vec<ServerMessage>, String> {
    let json = decompress_replay(data).map_err(|e| format!("Failed to decompress replay: {e}"))?;
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(&json).map_err(|e| format!("Replay is not a JSON array: {e}"))?;

    let codec = Codec::json();
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let bytes = serde_json::to_vec(entry).map_err(|e| format!("Replay entry {i}: {e}"))?;
            codec
                .decode_server_message(&bytes)
                .map_err(|e| format!("Replay entry {i}: {e}"))
        })
        .collect()
}
