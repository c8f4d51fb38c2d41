use std::sync::{Arc, Mutex};

use crate::engine::command::BotCommand;
use crate::engine::observation::BotObservation;

use super::{BotController, ControllerFault};

pub const PROFILE: &str = "remote";

/// Write side of a [`RemoteBot`], held by the client connection.
///
/// This is an explicit cross-task dependency: the connection task writes the
/// slot, the tick loop reads it. Each submitted command is consumed at most
/// once; a newer submission replaces an unconsumed one.
#[derive(Clone)]
pub struct CommandInbox {
    slot: Arc<Mutex<Option<BotCommand>>>,
}

impl CommandInbox {
    /// Store `command` for the next tick. Returns false if the inbox is unusable.
    pub fn submit(&self, command: BotCommand) -> bool {
        match self.slot.lock() {
            Ok(mut slot) => {
                *slot = Some(command);
                true
            }
            Err(_) => false,
        }
    }
}

/// Controller for a participant driven by a connected client.
pub struct RemoteBot {
    slot: Arc<Mutex<Option<BotCommand>>>,
}

impl RemoteBot {
    /// Create a remote controller and the inbox that feeds it.
    pub fn new() -> (Self, CommandInbox) {
        let slot = Arc::new(Mutex::new(None));
        (
            RemoteBot { slot: slot.clone() },
            CommandInbox { slot },
        )
    }
}

impl BotController for RemoteBot {
    fn profile(&self) -> &str {
        PROFILE
    }

    fn try_think(&mut self, _observation: &BotObservation) -> Result<BotCommand, ControllerFault> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ControllerFault::Unavailable("command inbox lock poisoned".into()))?;
        // Taking moves the client's command out, so the caller owns it outright.
        Ok(slot.take().unwrap_or_else(BotCommand::neutral))
    }
}
