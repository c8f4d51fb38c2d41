// Integration tests for headless game execution: run_game_headless(),
// replay decoding and WorkerPool dispatch.

use std::time::Duration;

use skirmish_backend::bot::{BotController, BotSpec, ControllerFault, ControllerRegistry};
use skirmish_backend::engine::command::BotCommand;
use skirmish_backend::engine::game::GameSettings;
use skirmish_backend::engine::observation::BotObservation;
use skirmish_backend::engine::server::{build_bots, run_game_headless};
use skirmish_backend::protocol::{GameEvent, ServerMessage};
use skirmish_backend::replay::load_replay;
use skirmish_backend::worker_pool::WorkerPool;

fn chaser_lua() -> &'static str {
    include_str!("../bots/chaser.lua")
}

fn settings(seed: u64) -> GameSettings {
    GameSettings {
        seed,
        think_budget: Duration::from_secs(5),
        ..GameSettings::default()
    }
}

fn specs() -> Vec<BotSpec> {
    vec![
        BotSpec::new("Native A", "chaser", 0),
        BotSpec::new("Scripted B", "lua", 1).with_script(chaser_lua()),
        BotSpec::new("Statue", "idle", 1),
    ]
}

// ── run_game_headless tests ──────────────────────────────────────────

#[test]
fn test_headless_match_produces_result_and_replay() {
    let registry = ControllerRegistry::with_defaults();
    let bots = build_bots(&registry, &specs()).unwrap();
    let result = run_game_headless(settings(21), bots, 400);

    assert!(result.error.is_none());
    assert!(result.ticks > 0 && result.ticks <= 400);
    assert_eq!(result.final_scores.len(), 3);
    assert_eq!(result.final_scores[0].name, "Native A");

    let replay = load_replay(&result.replay_data).unwrap();
    assert!(matches!(replay.first(), Some(ServerMessage::State(s)) if s.tick == 0));
    match replay.last() {
        Some(ServerMessage::GameEnd {
            winner_team,
            final_scores,
            ticks,
        }) => {
            assert_eq!(*winner_team, result.winner_team);
            assert_eq!(final_scores, &result.final_scores);
            assert_eq!(*ticks, result.ticks);
        }
        other => panic!("expected game_end last, got {other:?}"),
    }

    // Every participant's arrival is in the replay
    let joined = replay
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Events { events, .. } => Some(events),
            _ => None,
        })
        .flatten()
        .filter(|e| matches!(e, GameEvent::Joined { .. }))
        .count();
    assert_eq!(joined, 3);
}

#[test]
fn test_headless_match_winner_is_last_team_standing() {
    let registry = ControllerRegistry::with_defaults();
    let specs = vec![
        BotSpec::new("Hunter", "chaser", 0),
        BotSpec::new("Statue", "idle", 1),
    ];
    let result = run_game_headless(settings(4), build_bots(&registry, &specs).unwrap(), 2000);

    assert_eq!(result.winner_team, Some(0));
    assert!(result.ticks < 2000);
    assert!(!result.final_scores[1].alive);
    assert_eq!(result.final_scores[0].kills, 1);
}

#[test]
fn test_headless_match_is_deterministic_for_a_seed() {
    let registry = ControllerRegistry::with_defaults();
    let native = vec![
        BotSpec::new("A", "chaser", 0),
        BotSpec::new("B", "chaser", 1),
        BotSpec::new("C", "chaser", 2),
    ];
    let first = run_game_headless(settings(99), build_bots(&registry, &native).unwrap(), 300);
    let second = run_game_headless(settings(99), build_bots(&registry, &native).unwrap(), 300);

    assert_eq!(first.final_scores, second.final_scores);
    assert_eq!(first.winner_team, second.winner_team);
    assert_eq!(load_replay(&first.replay_data), load_replay(&second.replay_data));
}

#[test]
fn test_parallel_thinking_matches_sequential() {
    let registry = ControllerRegistry::with_defaults();
    let native: Vec<BotSpec> = (0..8)
        .map(|i| BotSpec::new(&format!("bot{i}"), "chaser", (i % 2) as u8))
        .collect();

    let sequential = run_game_headless(settings(5), build_bots(&registry, &native).unwrap(), 250);
    let parallel = run_game_headless(
        GameSettings {
            think_workers: 4,
            ..settings(5)
        },
        build_bots(&registry, &native).unwrap(),
        250,
    );

    assert_eq!(sequential.final_scores, parallel.final_scores);
    assert_eq!(sequential.ticks, parallel.ticks);
}

// ── WorkerPool tests ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_pool_runs_games_concurrently() {
    let registry = ControllerRegistry::with_defaults();
    let pool = WorkerPool::new(2);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for seed in [1u64, 2] {
        let tx = tx.clone();
        pool.spawn_game(settings(seed), build_bots(&registry, &specs()).unwrap(), 50, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    }
    drop(tx);

    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.error.is_none() && r.ticks <= 50));

    // Workers release their slot before the callback runs
    assert_eq!(pool.active_count(), 0);
    assert!(pool.has_capacity());
}

/// Takes a few milliseconds per decision so a game stays busy for a while.
struct Sleepy;

impl BotController for Sleepy {
    fn profile(&self) -> &str {
        "sleepy"
    }

    fn try_think(&mut self, _obs: &BotObservation) -> Result<BotCommand, ControllerFault> {
        std::thread::sleep(Duration::from_millis(5));
        Ok(BotCommand::neutral())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_pool_rejects_when_full() {
    let mut registry = ControllerRegistry::new();
    registry.register("sleepy", |_| Ok(Box::new(Sleepy)));
    let sleepy = vec![BotSpec::new("Zzz", "sleepy", 0)];

    let pool = WorkerPool::new(1);
    let (tx, rx) = tokio::sync::oneshot::channel();

    pool.spawn_game(settings(1), build_bots(&registry, &sleepy).unwrap(), 40, move |result| {
        let _ = tx.send(result);
    })
    .unwrap();
    assert!(!pool.has_capacity());

    let rejected = pool.spawn_game(settings(2), build_bots(&registry, &sleepy).unwrap(), 1, |_| {});
    assert!(rejected.is_err());

    let result = rx.await.unwrap();
    assert!(result.error.is_none());
    assert_eq!(result.ticks, 40);
}
