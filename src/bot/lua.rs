// Lua-scripted controller: runs a user script in a sandboxed VM each tick.

use std::sync::{Arc, Mutex};

use mlua::{HookTriggers, Lua, LuaSerdeExt, MultiValue, Value};
use serde::Deserialize;

use crate::engine::command::{BotCommand, Vec2};
use crate::engine::config::{LUA_MAX_INSTRUCTIONS, LUA_MEMORY_LIMIT};
use crate::engine::observation::BotObservation;

use super::{BotController, ControllerFault};

pub const PROFILE: &str = "lua";

/// Number of print lines kept per bot.
const OUTPUT_LINES: usize = 32;

/// Globals removed before user code runs.
const SANDBOXED_GLOBALS: &[&str] = &[
    "debug",
    "io",
    "os",
    "package",
    "require",
    "module",
    "load",
    "loadfile",
    "loadstring",
    "dofile",
    "collectgarbage",
];

/// What a script may return from `think`. Every field is optional; missing
/// fields keep their neutral value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScriptCommand {
    movement: Option<ScriptVec>,
    // Lua numbers are doubles; converted after validation
    aim_target: Option<f64>,
    attack: Option<bool>,
    boost: Option<bool>,
    say: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScriptVec {
    x: f32,
    y: f32,
}

impl ScriptCommand {
    fn into_command(self) -> Result<BotCommand, ControllerFault> {
        let aim_target = match self.aim_target {
            None => None,
            Some(id) if id >= 0.0 && id <= u32::MAX as f64 && id.fract() == 0.0 => Some(id as u32),
            Some(id) => {
                return Err(ControllerFault::Script(format!(
                    "aim_target must be a participant id, got {id}"
                )))
            }
        };
        Ok(BotCommand {
            movement: self
                .movement
                .map(|v| Vec2::new(v.x, v.y))
                .unwrap_or(Vec2::ZERO),
            aim_target,
            attack: self.attack.unwrap_or(false),
            boost: self.boost.unwrap_or(false),
            say: self.say,
        })
    }
}

/// A controller whose decisions come from a Lua script defining a global
/// `think(obs)` function.
///
/// The script's globals persist across ticks, so scripts may keep their own
/// memory; it never leaks out except through the returned command.
pub struct LuaBot {
    name: String,
    lua: Lua,
    output: Arc<Mutex<Vec<String>>>,
}

impl LuaBot {
    /// Create a sandboxed VM and load `script` into it.
    pub fn new(name: &str, script: &str) -> Result<Self, String> {
        let lua = Lua::new();
        lua.set_memory_limit(LUA_MEMORY_LIMIT)
            .map_err(|e| format!("Failed to set Lua memory limit: {e}"))?;

        let output = Arc::new(Mutex::new(Vec::new()));
        register_print(&lua, output.clone())
            .map_err(|e| format!("Failed to register print: {e}"))?;

        let globals = lua.globals();
        for global in SANDBOXED_GLOBALS {
            globals
                .set(*global, Value::Nil)
                .map_err(|e| format!("Failed to sandbox '{global}': {e}"))?;
        }

        install_instruction_limit(&lua);
        let loaded = lua.load(script).set_name("bot_script").exec();
        lua.remove_hook();
        loaded.map_err(|e| format!("Failed to load bot script: {e}"))?;

        match globals.get::<Value>("think") {
            Ok(Value::Function(_)) => {}
            _ => return Err("Bot script must define a global function think(obs)".to_string()),
        }

        Ok(LuaBot {
            name: name.to_string(),
            lua,
            output,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recent lines printed by the script, oldest first.
    pub fn output(&self) -> Vec<String> {
        self.output
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    fn call_think(&self, observation: &BotObservation) -> mlua::Result<Value> {
        let obs = self.lua.to_value(observation)?;
        let think: mlua::Function = self.lua.globals().get("think")?;
        think.call::<Value>(obs)
    }
}

impl BotController for LuaBot {
    fn profile(&self) -> &str {
        PROFILE
    }

    fn try_think(&mut self, observation: &BotObservation) -> Result<BotCommand, ControllerFault> {
        install_instruction_limit(&self.lua);
        let result = self.call_think(observation);
        self.lua.remove_hook();

        let value = result.map_err(|e| ControllerFault::Script(e.to_string()))?;
        if value.is_nil() {
            return Ok(BotCommand::neutral());
        }
        let script_command: ScriptCommand = self
            .lua
            .from_value(value)
            .map_err(|e| ControllerFault::Script(format!("invalid command returned: {e}")))?;
        script_command.into_command()
    }
}

/// Abort execution once the script runs more than `LUA_MAX_INSTRUCTIONS`.
fn install_instruction_limit(lua: &Lua) {
    let _ = lua.set_hook(
        HookTriggers::new().every_nth_instruction(LUA_MAX_INSTRUCTIONS),
        |_lua, _debug| Err(mlua::Error::RuntimeError("lua vm cycles exceeded".into())),
    );
}

/// Replace `print` with a version that records into the bot's output buffer.
fn register_print(lua: &Lua, output: Arc<Mutex<Vec<String>>>) -> mlua::Result<()> {
    lua.globals().set(
        "print",
        lua.create_function(move |_, args: MultiValue| {
            let mut parts = Vec::new();
            for val in args.iter() {
                match val {
                    Value::Nil => parts.push("nil".to_string()),
                    Value::Boolean(b) => parts.push(b.to_string()),
                    Value::Integer(n) => parts.push(n.to_string()),
                    Value::Number(n) => parts.push(n.to_string()),
                    Value::String(s) => {
                        parts.push(s.to_str().map(|s| s.to_string()).unwrap_or_default())
                    }
                    other => parts.push(format!("{:?}", other)),
                }
            }
            let line = parts.join("\t");
            tracing::debug!(target: "lua_bot", "{line}");

            if let Ok(mut lines) = output.lock() {
                lines.push(line);
                if lines.len() > OUTPUT_LINES {
                    let excess = lines.len() - OUTPUT_LINES;
                    lines.drain(..excess);
                }
            }
            Ok(())
        })?,
    )
}
