use crate::engine::command::{clone_bot_command, create_neutral_bot_command, BotCommand};
use crate::engine::observation::BotObservation;

use super::{BotController, ControllerFault};

pub const PROFILE: &str = "idle";

/// Baseline controller: never reacts, always returns the neutral command.
///
/// Holds one neutral template and hands out a fresh clone on every call,
/// which makes it the reference for determinism and smoke tests.
pub struct IdleBot {
    template: BotCommand,
}

impl IdleBot {
    pub fn new() -> Self {
        Self {
            template: create_neutral_bot_command(),
        }
    }
}

impl Default for IdleBot {
    fn default() -> Self {
        Self::new()
    }
}

impl BotController for IdleBot {
    fn profile(&self) -> &str {
        PROFILE
    }

    fn is_deterministic(&self) -> bool {
        true
    }

    fn try_think(&mut self, _observation: &BotObservation) -> Result<BotCommand, ControllerFault> {
        Ok(clone_bot_command(&self.template))
    }
}
