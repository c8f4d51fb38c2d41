// Read-only world view handed to a controller for one tick.

use serde::{Deserialize, Serialize};

use super::command::Vec2;
use super::config::ADJACENT_DISTANCE;

/// Arena size in world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArenaBounds {
    pub width: f32,
    pub height: f32,
}

/// What a controller may know about one participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: u32,
    pub name: String,
    pub team: u8,
    pub position: Vec2,
    pub health: i32,
    pub alive: bool,
}

/// Frozen snapshot of the world from one participant's point of view.
///
/// The observation owns its data and only exposes accessors, so a controller
/// can neither reach into live simulation state nor change what it was shown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotObservation {
    tick: u64,
    self_id: u32,
    arena: ArenaBounds,
    participants: Vec<ParticipantView>,
}

impl BotObservation {
    pub fn new(
        tick: u64,
        self_id: u32,
        arena: ArenaBounds,
        participants: Vec<ParticipantView>,
    ) -> Self {
        Self {
            tick,
            self_id,
            arena,
            participants,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn self_id(&self) -> u32 {
        self.self_id
    }

    pub fn arena(&self) -> ArenaBounds {
        self.arena
    }

    /// The observing participant, if it is part of the snapshot.
    pub fn me(&self) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| p.id == self.self_id)
    }

    /// Every participant, in join order.
    pub fn participants(&self) -> &[ParticipantView] {
        &self.participants
    }

    /// Living participants on a different team than the observer.
    pub fn enemies(&self) -> impl Iterator<Item = &ParticipantView> {
        let my_team = self.me().map(|m| m.team);
        self.participants
            .iter()
            .filter(move |p| p.id != self.self_id && p.alive && Some(p.team) != my_team)
    }

    /// Closest living enemy; ties go to the lowest participant id.
    pub fn nearest_enemy(&self) -> Option<&ParticipantView> {
        let me = self.me()?;
        self.enemies().min_by(|a, b| {
            let da = me.position.distance(a.position);
            let db = me.position.distance(b.position);
            da.total_cmp(&db).then(a.id.cmp(&b.id))
        })
    }

    pub fn enemies_within(&self, radius: f32) -> Vec<&ParticipantView> {
        let Some(me) = self.me() else {
            return Vec::new();
        };
        self.enemies()
            .filter(|p| me.position.distance(p.position) <= radius)
            .collect()
    }

    pub fn is_enemy_adjacent(&self) -> bool {
        !self.enemies_within(ADJACENT_DISTANCE).is_empty()
    }
}
