use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::command::{create_neutral_bot_command, BotCommand, Vec2};
use super::config::*;
use super::observation::{ArenaBounds, BotObservation, ParticipantView};
use crate::bot::BotController;
use crate::metrics;
use crate::protocol::{GameEvent, ParticipantState, ScoreLine, StateDelta, StateSnapshot};

/// Knobs for one game instance.
#[derive(Debug, Clone)]
pub struct GameSettings {
    /// Seed for spawn positions; same seed and inputs give the same game.
    pub seed: u64,
    pub arena: ArenaBounds,
    pub tick_ms: u64,
    /// Decisions slower than this are discarded in favour of the neutral command.
    pub think_budget: Duration,
    /// Threads used to evaluate controllers; 1 evaluates on the tick thread.
    pub think_workers: usize,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            arena: ArenaBounds {
                width: ARENA_WIDTH,
                height: ARENA_HEIGHT,
            },
            tick_ms: DEFAULT_TICK_MS,
            think_budget: Duration::from_millis(DEFAULT_THINK_BUDGET_MS),
            think_workers: 1,
        }
    }
}

/// Tick timing data for observability and budget monitoring.
#[derive(Clone, Debug, Default)]
pub struct TickTimings {
    /// Total tick duration in microseconds.
    pub total_us: u64,
    /// Time spent collecting controller decisions in microseconds.
    pub think_us: u64,
}

/// Server-side state of one participant.
#[derive(Debug, Clone)]
struct Participant {
    id: u32,
    name: String,
    team: u8,
    position: Vec2,
    health: i32,
    alive: bool,
    score: i32,
    kills: i32,
    say: Option<String>,
}

impl Participant {
    fn view(&self) -> ParticipantView {
        ParticipantView {
            id: self.id,
            name: self.name.clone(),
            team: self.team,
            position: self.position,
            health: self.health,
            alive: self.alive,
        }
    }

    fn state(&self) -> ParticipantState {
        ParticipantState {
            id: self.id,
            name: self.name.clone(),
            team: self.team,
            position: self.position,
            health: self.health,
            alive: self.alive,
            score: self.score,
            say: self.say.clone(),
        }
    }
}

/// The command a participant will act on this tick.
#[derive(Debug, Clone)]
struct Decision {
    command: BotCommand,
    /// Why the neutral command was substituted, if it was.
    substituted: Option<&'static str>,
}

impl Decision {
    fn neutral(reason: Option<&'static str>) -> Self {
        Self {
            command: create_neutral_bot_command(),
            substituted: reason,
        }
    }
}

/// Authoritative arena state and tick loop.
///
/// Participants are kept in join order, and every per-tick pass (observation,
/// decision, command application) walks them in that order.
pub struct Game {
    pub settings: GameSettings,
    pub tick: u64,
    participants: Vec<Participant>,
    /// One controller per participant, same index.
    controllers: Vec<Box<dyn BotController>>,
    next_participant_id: u32,
    teams_joined: BTreeSet<u8>,
    rng: StdRng,
    /// Events since the last drain.
    events: Vec<GameEvent>,
    /// Timing data from the last tick.
    pub last_tick_timings: TickTimings,
}

impl Game {
    pub fn new(settings: GameSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Game {
            settings,
            tick: 0,
            participants: Vec::new(),
            controllers: Vec::new(),
            next_participant_id: 1,
            teams_joined: BTreeSet::new(),
            rng,
            events: Vec::new(),
            last_tick_timings: TickTimings::default(),
        }
    }

    /// Add a participant driven by `controller`. Returns the participant ID.
    pub fn add_participant(
        &mut self,
        name: &str,
        team: u8,
        controller: Box<dyn BotController>,
    ) -> u32 {
        let id = self.next_participant_id;
        self.next_participant_id += 1;

        let arena = self.settings.arena;
        let position = Vec2::new(
            self.rng.gen_range(0.0..arena.width),
            self.rng.gen_range(0.0..arena.height),
        );

        tracing::info!(
            participant_id = id,
            team,
            profile = controller.profile(),
            "Participant '{name}' joined"
        );

        self.participants.push(Participant {
            id,
            name: name.to_string(),
            team,
            position,
            health: MAX_HEALTH,
            alive: true,
            score: 0,
            kills: 0,
            say: None,
        });
        self.controllers.push(controller);
        self.teams_joined.insert(team);

        self.events.push(GameEvent::Joined {
            participant_id: id,
            name: name.to_string(),
            team,
        });

        id
    }

    /// Remove a participant and its controller. Returns false if unknown.
    pub fn remove_participant(&mut self, participant_id: u32) -> bool {
        let Some(index) = self.index_of(participant_id) else {
            return false;
        };
        self.participants.remove(index);
        self.controllers.remove(index);
        self.events.push(GameEvent::Left { participant_id });
        tracing::info!(participant_id, "Participant left");
        true
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Number of participants (living or not) on `team`.
    pub fn team_size(&self, team: u8) -> usize {
        self.participants.iter().filter(|p| p.team == team).count()
    }

    /// Participant IDs in join order.
    pub fn participant_ids(&self) -> Vec<u32> {
        self.participants.iter().map(|p| p.id).collect()
    }

    pub fn participant(&self, participant_id: u32) -> Option<ParticipantState> {
        self.index_of(participant_id)
            .map(|i| self.participants[i].state())
    }

    /// The observation `participant_id` would receive right now.
    pub fn observation_for(&self, participant_id: u32) -> Option<BotObservation> {
        self.index_of(participant_id)?;
        let views = self.participants.iter().map(Participant::view).collect();
        Some(BotObservation::new(
            self.tick,
            participant_id,
            self.settings.arena,
            views,
        ))
    }

    /// Place a participant explicitly (scenario setup and tests).
    pub fn set_position(&mut self, participant_id: u32, position: Vec2) -> bool {
        match self.index_of(participant_id) {
            Some(i) => {
                self.participants[i].position = self.clamp_to_arena(position);
                true
            }
            None => false,
        }
    }

    /// Run one game tick.
    pub fn tick(&mut self) {
        let tick_start = Instant::now();

        // 1. Freeze the world once; every controller sees the same state
        let views: Vec<ParticipantView> = self.participants.iter().map(Participant::view).collect();
        let observations: Vec<Option<BotObservation>> = self
            .participants
            .iter()
            .map(|p| {
                p.alive.then(|| {
                    BotObservation::new(self.tick, p.id, self.settings.arena, views.clone())
                })
            })
            .collect();

        // 2. Collect decisions
        let think_start = Instant::now();
        let decisions = self.collect_decisions(&observations);
        let think_us = think_start.elapsed().as_micros() as u64;

        // 3. Apply in join order
        for (index, decision) in decisions.into_iter().enumerate() {
            if let Some(reason) = decision.substituted {
                self.events.push(GameEvent::NeutralSubstituted {
                    participant_id: self.participants[index].id,
                    reason: reason.to_string(),
                });
            }
            self.apply_command(index, decision.command.sanitized());
        }

        self.tick += 1;

        let total_us = tick_start.elapsed().as_micros() as u64;
        self.last_tick_timings = TickTimings { total_us, think_us };
        metrics::GAME_TICK_DURATION_MS.observe(total_us as f64 / 1000.0);

        if total_us > self.settings.tick_ms * 1000 / 2 {
            tracing::warn!(
                tick = self.tick,
                total_us,
                think_us,
                participants = self.participants.len(),
                "Tick exceeded half its interval"
            );
        }
    }

    fn collect_decisions(&mut self, observations: &[Option<BotObservation>]) -> Vec<Decision> {
        let budget = self.settings.think_budget;
        let workers = self.settings.think_workers.max(1);

        if workers == 1 || self.controllers.len() < 2 {
            return self
                .controllers
                .iter_mut()
                .zip(observations)
                .map(|(controller, obs)| decide(controller.as_mut(), obs.as_ref(), budget))
                .collect();
        }

        // Each controller lands in exactly one chunk, so no controller is
        // evaluated by two threads at once. Chunks are joined in order.
        let chunk = self.controllers.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .controllers
                .chunks_mut(chunk)
                .zip(observations.chunks(chunk))
                .map(|(controllers, observations)| {
                    let len = controllers.len();
                    let handle = scope.spawn(move || {
                        controllers
                            .iter_mut()
                            .zip(observations)
                            .map(|(controller, obs)| decide(controller.as_mut(), obs.as_ref(), budget))
                            .collect::<Vec<_>>()
                    });
                    (len, handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(len, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::error!("Think worker panicked; substituting neutral commands");
                        vec![Decision::neutral(Some("worker panicked")); len]
                    })
                })
                .collect()
        })
    }

    fn apply_command(&mut self, index: usize, command: BotCommand) {
        if !self.participants[index].alive {
            return;
        }

        let speed = if command.boost {
            MOVE_SPEED * BOOST_MULTIPLIER
        } else {
            MOVE_SPEED
        };
        let current = self.participants[index].position;
        let moved = Vec2::new(
            current.x + command.movement.x * speed,
            current.y + command.movement.y * speed,
        );
        let position = self.clamp_to_arena(moved);

        let attacker = &mut self.participants[index];
        attacker.position = position;
        attacker.say = command.say;
        let attacker_id = attacker.id;
        let attacker_team = attacker.team;

        if !command.attack {
            return;
        }
        let Some(target_id) = command.aim_target else {
            return;
        };
        let Some(target_index) = self.index_of(target_id) else {
            return;
        };

        let target = &mut self.participants[target_index];
        if !target.alive
            || target.team == attacker_team
            || position.distance(target.position) > ATTACK_RANGE
        {
            return;
        }

        target.health = (target.health - ATTACK_DAMAGE).max(0);
        self.events.push(GameEvent::Attacked {
            attacker_id,
            target_id,
            damage: ATTACK_DAMAGE,
        });

        if target.health == 0 {
            target.alive = false;
            self.events.push(GameEvent::Eliminated {
                participant_id: target_id,
                by: Some(attacker_id),
            });
            let attacker = &mut self.participants[index];
            attacker.kills += 1;
            attacker.score += KILL_SCORE;
            tracing::debug!(attacker_id, target_id, tick = self.tick, "Participant eliminated");
        }
    }

    fn clamp_to_arena(&self, position: Vec2) -> Vec2 {
        let arena = self.settings.arena;
        Vec2::new(
            position.x.clamp(0.0, arena.width),
            position.y.clamp(0.0, arena.height),
        )
    }

    fn index_of(&self, participant_id: u32) -> Option<usize> {
        self.participants.iter().position(|p| p.id == participant_id)
    }

    /// The only team with living participants, once at least two teams joined.
    pub fn check_winner(&self) -> Option<u8> {
        if self.teams_joined.len() < 2 {
            return None;
        }
        let living: BTreeSet<u8> = self
            .participants
            .iter()
            .filter(|p| p.alive)
            .map(|p| p.team)
            .collect();
        if living.len() == 1 {
            living.into_iter().next()
        } else {
            None
        }
    }

    /// Team with the highest total score; None on a tie or an empty game.
    pub fn leading_team(&self) -> Option<u8> {
        let mut totals: HashMap<u8, i32> = HashMap::new();
        for p in &self.participants {
            *totals.entry(p.team).or_default() += p.score;
        }
        let max = *totals.values().max()?;
        let top: Vec<u8> = totals
            .iter()
            .filter(|(_, &score)| score == max)
            .map(|(&team, _)| team)
            .collect();
        if top.len() == 1 {
            Some(top[0])
        } else {
            None
        }
    }

    /// Standings in join order.
    pub fn final_scores(&self) -> Vec<ScoreLine> {
        self.participants
            .iter()
            .map(|p| ScoreLine {
                participant_id: p.id,
                name: p.name.clone(),
                team: p.team,
                score: p.score,
                kills: p.kills,
                alive: p.alive,
            })
            .collect()
    }

    /// Take the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Full state of the arena, participants in join order.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            tick: self.tick,
            participants: self.participants.iter().map(Participant::state).collect(),
        }
    }

    /// Compute a delta between the current snapshot and a previous one.
    /// Only includes participants that changed or were added/removed.
    pub fn compute_delta(current: &StateSnapshot, previous: &StateSnapshot) -> StateDelta {
        let prev_map: HashMap<u32, &ParticipantState> =
            previous.participants.iter().map(|p| (p.id, p)).collect();
        let curr_ids: BTreeSet<u32> = current.participants.iter().map(|p| p.id).collect();

        let changed = current
            .participants
            .iter()
            .filter(|p| prev_map.get(&p.id).map_or(true, |prev| *prev != *p))
            .cloned()
            .collect();

        let removed = previous
            .participants
            .iter()
            .map(|p| p.id)
            .filter(|id| !curr_ids.contains(id))
            .collect();

        StateDelta {
            tick: current.tick,
            changed,
            removed,
        }
    }
}

/// Ask one controller for its command, enforcing the think budget.
/// Dead participants (no observation) are not consulted.
fn decide(
    controller: &mut dyn BotController,
    observation: Option<&BotObservation>,
    budget: Duration,
) -> Decision {
    let Some(observation) = observation else {
        return Decision::neutral(None);
    };

    let start = Instant::now();
    let command = controller.think(observation);
    let elapsed = start.elapsed();

    if elapsed > budget {
        tracing::warn!(
            participant_id = observation.self_id(),
            profile = controller.profile(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Controller exceeded think budget, substituting neutral command"
        );
        metrics::NEUTRAL_SUBSTITUTIONS_TOTAL
            .with_label_values(&["budget"])
            .inc();
        return Decision::neutral(Some("think budget exceeded"));
    }

    Decision {
        command,
        substituted: None,
    }
}
