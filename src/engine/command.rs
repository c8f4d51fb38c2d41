// Player intent for a single simulation tick.

use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

use super::config::MAX_SAY_LEN;

/// A 2D vector in arena units.
///
/// Serde rejects non-finite components in both directions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    #[serde(serialize_with = "serialize_finite", deserialize_with = "deserialize_finite")]
    pub x: f32,
    #[serde(serialize_with = "serialize_finite", deserialize_with = "deserialize_finite")]
    pub y: f32,
}

fn serialize_finite<S: Serializer>(v: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    if !v.is_finite() {
        return Err(ser::Error::custom(format!("{v} is not a finite number")));
    }
    serializer.serialize_f32(*v)
}

fn deserialize_finite<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    let v = f32::deserialize(deserializer)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(de::Error::custom("number out of range for a finite f32"))
    }
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        Vec2::new(other.x - self.x, other.y - self.y).length()
    }

    /// Unit vector pointing from `self` towards `other`, or zero if they coincide.
    pub fn direction_to(self, other: Vec2) -> Vec2 {
        let d = Vec2::new(other.x - self.x, other.y - self.y);
        let len = d.length();
        if len <= f32::EPSILON {
            Vec2::ZERO
        } else {
            Vec2::new(d.x / len, d.y / len)
        }
    }
}

/// One tick's worth of player intent.
///
/// Commands are always handed out by value. A controller that keeps a template
/// around returns [`clone_bot_command`] of it, never the template itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BotCommand {
    /// Desired heading; each axis in `[-1, 1]`.
    pub movement: Vec2,
    /// Participant to aim at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aim_target: Option<u32>,
    #[serde(default)]
    pub attack: bool,
    #[serde(default)]
    pub boost: bool,
    /// Short chat line shown above the participant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub say: Option<String>,
}

impl BotCommand {
    /// The canonical no-op command: at rest, no aim, no flags, silent.
    pub fn neutral() -> Self {
        Self {
            movement: Vec2::ZERO,
            aim_target: None,
            attack: false,
            boost: false,
            say: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }

    /// Clamp the command into the range the simulation accepts.
    /// Non-finite movement axes become zero and chat is truncated.
    pub fn sanitized(mut self) -> Self {
        self.movement = Vec2::new(clamp_axis(self.movement.x), clamp_axis(self.movement.y));
        if let Some(say) = self.say.as_mut() {
            if say.chars().count() > MAX_SAY_LEN {
                *say = say.chars().take(MAX_SAY_LEN).collect();
            }
        }
        self
    }
}

fn clamp_axis(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Return the canonical neutral command.
pub fn create_neutral_bot_command() -> BotCommand {
    BotCommand::neutral()
}

/// Return a structurally equal, fully independent copy of `command`.
pub fn clone_bot_command(command: &BotCommand) -> BotCommand {
    command.clone()
}
