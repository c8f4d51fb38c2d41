// Wire message types exchanged between clients and the game server.

use serde::{Deserialize, Serialize};

use crate::engine::command::{BotCommand, Vec2};

// ── Client → Server ──────────────────────────────────────────────────

/// Messages sent by a client. The `kind` field is the discriminant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask to take a participant slot.
    Join {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team: Option<u8>,
    },
    /// Intent for the given tick.
    Command { tick: u64, command: BotCommand },
    /// Keep-alive; answered with `pong` carrying the same nonce.
    Heartbeat { nonce: u64 },
    /// Give up the participant slot.
    Leave,
}

impl ClientMessage {
    /// Discriminant as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Command { .. } => "command",
            ClientMessage::Heartbeat { .. } => "heartbeat",
            ClientMessage::Leave => "leave",
        }
    }
}

// ── Server → Client ──────────────────────────────────────────────────

/// Messages sent by the server. The `kind` field is the discriminant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection.
    Welcome { protocol_version: u32, tick_ms: u64 },
    JoinAccepted {
        participant_id: u32,
        session_id: String,
    },
    JoinRejected { reason: String },
    /// Full state snapshot.
    State(StateSnapshot),
    /// Participants changed since the previous snapshot.
    Delta(StateDelta),
    Events { tick: u64, events: Vec<GameEvent> },
    Pong { nonce: u64 },
    GameEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner_team: Option<u8>,
        final_scores: Vec<ScoreLine>,
        ticks: u64,
    },
    Error { code: ErrorCode, detail: String },
}

impl ServerMessage {
    /// Discriminant as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::JoinAccepted { .. } => "join_accepted",
            ServerMessage::JoinRejected { .. } => "join_rejected",
            ServerMessage::State(_) => "state",
            ServerMessage::Delta(_) => "delta",
            ServerMessage::Events { .. } => "events",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::GameEnd { .. } => "game_end",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Reason codes carried by `ServerMessage::Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedMessage,
    UnsupportedVersion,
    NotJoined,
    JoinRejected,
}

/// Public state of one participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub id: u32,
    pub name: String,
    pub team: u8,
    pub position: Vec2,
    pub health: i32,
    pub alive: bool,
    pub score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub say: Option<String>,
}

/// Full state of the arena for one tick, participants in join order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tick: u64,
    pub participants: Vec<ParticipantState>,
}

/// Changes since the previous snapshot. Clients merge it into their last state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub tick: u64,
    /// Participants that were added or changed.
    pub changed: Vec<ParticipantState>,
    /// Ids of participants that left.
    pub removed: Vec<u32>,
}

/// Things that happened during a tick, for the client's event ticker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    Joined {
        participant_id: u32,
        name: String,
        team: u8,
    },
    Left {
        participant_id: u32,
    },
    Attacked {
        attacker_id: u32,
        target_id: u32,
        damage: i32,
    },
    Eliminated {
        participant_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<u32>,
    },
    /// The participant's command was replaced by the neutral command.
    NeutralSubstituted {
        participant_id: u32,
        reason: String,
    },
}

/// Final standing of one participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub participant_id: u32,
    pub name: String,
    pub team: u8,
    pub score: i32,
    pub kills: i32,
    pub alive: bool,
}
