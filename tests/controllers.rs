// Integration tests: built-in controllers and the bundled Lua bots,
// driven through the registry and the game engine.

use std::time::Duration;

use skirmish_backend::bot::{BotController, BotSpec, ControllerRegistry, LuaBot};
use skirmish_backend::engine::command::{clone_bot_command, create_neutral_bot_command, BotCommand, Vec2};
use skirmish_backend::engine::config::*;
use skirmish_backend::engine::game::{Game, GameSettings};
use skirmish_backend::engine::observation::{ArenaBounds, BotObservation, ParticipantView};
use skirmish_backend::protocol::GameEvent;

const CHASER_LUA: &str = include_str!("../bots/chaser.lua");
const WANDERER_LUA: &str = include_str!("../bots/wanderer.lua");
const BROKEN_LUA: &str = include_str!("../bots/broken.lua");

fn view(id: u32, team: u8, x: f32, y: f32) -> ParticipantView {
    ParticipantView {
        id,
        name: format!("p{id}"),
        team,
        position: Vec2::new(x, y),
        health: MAX_HEALTH,
        alive: true,
    }
}

fn arena() -> ArenaBounds {
    ArenaBounds {
        width: ARENA_WIDTH,
        height: ARENA_HEIGHT,
    }
}

/// Participant 1 on team 0 with an enemy right next to it.
fn enemy_adjacent() -> BotObservation {
    BotObservation::new(5, 1, arena(), vec![view(1, 0, 10.0, 10.0), view(2, 1, 11.0, 10.0)])
}

fn settings(seed: u64) -> GameSettings {
    GameSettings {
        seed,
        think_budget: Duration::from_secs(5),
        ..GameSettings::default()
    }
}

// ---- Command value semantics ----

#[test]
fn test_neutral_commands_are_equal_and_independent() {
    let a = create_neutral_bot_command();
    let mut b = create_neutral_bot_command();
    assert_eq!(a, b);
    assert!(a.is_neutral());

    b.attack = true;
    assert!(!b.is_neutral());
    assert!(create_neutral_bot_command().is_neutral());
}

#[test]
fn test_clone_is_independent() {
    let original = BotCommand {
        movement: Vec2::new(1.0, 0.0),
        say: Some("hello".into()),
        ..BotCommand::neutral()
    };
    let mut copy = clone_bot_command(&original);
    assert_eq!(copy, original);

    copy.movement.x = -1.0;
    copy.say.as_mut().unwrap().push('!');
    assert_eq!(original.movement.x, 1.0);
    assert_eq!(original.say.as_deref(), Some("hello"));
}

// ---- Registry-built controllers ----

#[test]
fn test_idle_ignores_adjacent_enemy() {
    let registry = ControllerRegistry::with_defaults();
    let mut idle = registry.create(&BotSpec::new("statue", "idle", 0)).unwrap();
    let obs = enemy_adjacent();
    assert!(obs.is_enemy_adjacent());

    let first = idle.think(&obs);
    let second = idle.think(&obs);
    assert_eq!(first, BotCommand::neutral());
    assert_eq!(first, second);
    assert!(idle.is_deterministic());
}

#[test]
fn test_chaser_attacks_adjacent_enemy() {
    let registry = ControllerRegistry::with_defaults();
    let mut chaser = registry.create(&BotSpec::new("hunter", "chaser", 0)).unwrap();
    let command = chaser.think(&enemy_adjacent());
    assert!(command.attack);
    assert_eq!(command.aim_target, Some(2));
    assert_eq!(command, chaser.think(&enemy_adjacent()));
}

#[test]
fn test_lua_profile_requires_script() {
    let registry = ControllerRegistry::with_defaults();
    let err = registry.create(&BotSpec::new("nobody", "lua", 0)).err().unwrap();
    assert!(err.contains("no script"));

    let spec = BotSpec::new("hunter", "lua", 0).with_script(CHASER_LUA);
    assert_eq!(registry.create(&spec).unwrap().profile(), "lua");
}

// ---- Bundled Lua bots ----

#[test]
fn test_lua_chaser_matches_native_decision() {
    let mut lua = LuaBot::new("hunter", CHASER_LUA).unwrap();
    let obs = enemy_adjacent();
    let command = lua.think(&obs);
    assert!(command.attack);
    assert_eq!(command.aim_target, Some(2));
    assert!((command.movement.x - 1.0).abs() < 1e-4);
    assert!(command.movement.y.abs() < 1e-4);
}

#[test]
fn test_lua_chaser_idles_without_enemies() {
    let mut lua = LuaBot::new("hunter", CHASER_LUA).unwrap();
    let obs = BotObservation::new(0, 1, arena(), vec![view(1, 0, 3.0, 3.0), view(2, 0, 4.0, 3.0)]);
    assert_eq!(lua.think(&obs), BotCommand::neutral());
}

#[test]
fn test_lua_wanderer_keeps_memory_and_speaks() {
    let mut lua = LuaBot::new("walker", WANDERER_LUA).unwrap();
    let obs = BotObservation::new(0, 1, arena(), vec![view(1, 0, 3.0, 3.0)]);
    let command = lua.think(&obs);
    assert_eq!(command.say.as_deref(), Some("hello from tick 0"));
    assert_eq!(command.movement, Vec2::new(1.0, 0.0));
    assert_eq!(lua.output(), vec!["wanderer step\t1".to_string()]);

    // After 20 steps the wanderer turns onto its second leg
    let later = BotObservation::new(1, 1, arena(), vec![view(1, 0, 3.0, 3.0)]);
    let mut last = BotCommand::neutral();
    for _ in 0..20 {
        last = lua.think(&later);
    }
    assert_eq!(last.movement, Vec2::new(0.0, 1.0));
}

#[test]
fn test_lua_runtime_errors_degrade_to_neutral() {
    let mut lua = LuaBot::new("flaky", BROKEN_LUA).unwrap();
    let obs = enemy_adjacent();
    assert_eq!(lua.think(&obs).movement, Vec2::new(1.0, 0.0));
    assert_eq!(lua.think(&obs).movement, Vec2::new(1.0, 0.0));
    assert_eq!(lua.think(&obs), BotCommand::neutral());
    assert!(lua.try_think(&obs).is_ok());
}

// ---- In the engine ----

#[test]
fn test_lua_chaser_eliminates_idle_target() {
    let registry = ControllerRegistry::with_defaults();
    let mut game = Game::new(settings(3));
    let hunter = game.add_participant(
        "hunter",
        0,
        registry
            .create(&BotSpec::new("hunter", "lua", 0).with_script(CHASER_LUA))
            .unwrap(),
    );
    let target = game.add_participant("target", 1, registry.create(&BotSpec::new("target", "idle", 1)).unwrap());
    game.set_position(hunter, Vec2::new(5.0, 5.0));
    game.set_position(target, Vec2::new(15.0, 5.0));

    let mut winner = None;
    for _ in 0..100 {
        game.tick();
        winner = game.check_winner();
        if winner.is_some() {
            break;
        }
    }

    assert_eq!(winner, Some(0));
    assert!(!game.participant(target).unwrap().alive);
    assert_eq!(game.participant(hunter).unwrap().score, KILL_SCORE);
}

#[test]
fn test_faulty_script_never_stalls_the_game() {
    let mut game = Game::new(settings(8));
    let flaky = game.add_participant("flaky", 0, Box::new(LuaBot::new("flaky", BROKEN_LUA).unwrap()));
    game.set_position(flaky, Vec2::new(10.0, 10.0));

    for _ in 0..6 {
        game.tick();
    }
    // Two of every three ticks move one unit; the failing ones stand still
    let p = game.participant(flaky).unwrap();
    assert_eq!(p.position, Vec2::new(14.0, 10.0));
    assert_eq!(game.tick, 6);
}

#[test]
fn test_slow_script_is_replaced_by_neutral() {
    let slow = r#"
        function think(obs)
            local x = 0
            for i = 1, 1000 do x = x + i end
            return { movement = { x = 1, y = 0 } }
        end
    "#;
    let mut game = Game::new(GameSettings {
        think_budget: Duration::ZERO,
        ..GameSettings::default()
    });
    let id = game.add_participant("slow", 0, Box::new(LuaBot::new("slow", slow).unwrap()));
    game.set_position(id, Vec2::new(10.0, 10.0));
    game.drain_events();
    game.tick();

    assert_eq!(game.participant(id).unwrap().position, Vec2::new(10.0, 10.0));
    assert!(game
        .drain_events()
        .iter()
        .any(|e| matches!(e, GameEvent::NeutralSubstituted { participant_id, .. } if *participant_id == id)));
}
