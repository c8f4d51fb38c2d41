use crate::engine::command::{BotCommand, Vec2};
use crate::engine::config::{ATTACK_RANGE, RETREAT_HEALTH};
use crate::engine::observation::BotObservation;

use super::{BotController, ControllerFault};

pub const PROFILE: &str = "chaser";

/// Scripted baseline opponent. Stateless, so the same observation always
/// yields the same command.
///
/// Heads for the nearest living enemy and attacks once in range. Below
/// `RETREAT_HEALTH` it backs away from that enemy instead, still firing
/// if the enemy stays in range.
pub struct ChaserBot;

impl ChaserBot {
    pub fn new() -> Self {
        ChaserBot
    }
}

impl Default for ChaserBot {
    fn default() -> Self {
        Self::new()
    }
}

impl BotController for ChaserBot {
    fn profile(&self) -> &str {
        PROFILE
    }

    fn is_deterministic(&self) -> bool {
        true
    }

    fn try_think(&mut self, observation: &BotObservation) -> Result<BotCommand, ControllerFault> {
        let (Some(me), Some(target)) = (observation.me(), observation.nearest_enemy()) else {
            return Ok(BotCommand::neutral());
        };
        if !me.alive {
            return Ok(BotCommand::neutral());
        }

        let heading = me.position.direction_to(target.position);
        let distance = me.position.distance(target.position);
        let in_range = distance <= ATTACK_RANGE;

        let movement = if me.health < RETREAT_HEALTH {
            Vec2::new(-heading.x, -heading.y)
        } else if in_range {
            Vec2::ZERO
        } else {
            heading
        };

        Ok(BotCommand {
            movement,
            aim_target: Some(target.id),
            attack: in_range,
            boost: me.health < RETREAT_HEALTH,
            say: None,
        })
    }
}
