// Arena dimensions (world units)
pub const ARENA_WIDTH: f32 = 64.0;
pub const ARENA_HEIGHT: f32 = 64.0;

// Tick timing
pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_MAX_TICKS: u64 = 6000;
pub const DEFAULT_THINK_BUDGET_MS: u64 = 20;

// Full snapshot every N ticks, deltas in between
pub const FULL_SNAPSHOT_INTERVAL: u64 = 10;

// Movement (units per tick at full deflection)
pub const MOVE_SPEED: f32 = 1.0;
pub const BOOST_MULTIPLIER: f32 = 1.5;

// Combat
pub const MAX_HEALTH: i32 = 100;
pub const ATTACK_RANGE: f32 = 2.0;
pub const ATTACK_DAMAGE: i32 = 10;
pub const KILL_SCORE: i32 = 10;

// Distance at which an enemy counts as adjacent
pub const ADJACENT_DISTANCE: f32 = 1.5;

// Chaser bot retreats below this health
pub const RETREAT_HEALTH: i32 = 25;

// Longest chat line a command may carry (characters)
pub const MAX_SAY_LEN: usize = 80;

// Lua sandbox limits
pub const LUA_MAX_INSTRUCTIONS: u32 = 1_000_000;
pub const LUA_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

// Admission limits for live games
pub const MAX_PARTICIPANTS: usize = 32;
pub const MAX_NAME_LEN: usize = 24;
