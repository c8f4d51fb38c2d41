// Worker pool for parallel headless game execution.
//
// Each game runs on a dedicated OS thread so controller work never blocks the
// async runtime. The pool has a fixed capacity; callers check `has_capacity()`
// before dispatching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::game::GameSettings;
use crate::engine::server::{run_game_headless, BotEntry, GameResult};
use crate::metrics;

/// Manages a fixed-size pool of OS threads for headless game execution.
pub struct WorkerPool {
    worker_count: usize,
    active_workers: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            active_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Whether the pool has capacity to accept another game.
    pub fn has_capacity(&self) -> bool {
        self.active_workers.load(Ordering::Relaxed) < self.worker_count
    }

    /// Current number of active workers.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Spawn a headless game on a new OS thread.
    ///
    /// Returns an error if the pool is at capacity or the thread cannot be
    /// started. `on_complete` is invoked on the tokio runtime after the game
    /// finishes, so this must be called from within a runtime.
    pub fn spawn_game<F>(
        &self,
        settings: GameSettings,
        bots: Vec<BotEntry>,
        max_ticks: u64,
        on_complete: F,
    ) -> Result<(), String>
    where
        F: FnOnce(GameResult) + Send + 'static,
    {
        let rt_handle = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("Worker pool needs a tokio runtime: {e}"))?;

        // Reserve a slot atomically so concurrent callers cannot overshoot
        let active = self.active_workers.clone();
        let reserved = active.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < self.worker_count).then_some(n + 1)
        });
        if reserved.is_err() {
            return Err("Worker pool is at capacity".into());
        }
        metrics::HEADLESS_WORKERS_ACTIVE.set(active.load(Ordering::Relaxed) as i64);

        let thread_name = format!("headless-game-{}", settings.seed);
        let worker_active = active.clone();

        let spawned = std::thread::Builder::new().name(thread_name).spawn(move || {
            let result = run_game_headless(settings, bots, max_ticks);

            worker_active.fetch_sub(1, Ordering::SeqCst);
            metrics::HEADLESS_WORKERS_ACTIVE.set(worker_active.load(Ordering::Relaxed) as i64);

            rt_handle.spawn(async move {
                on_complete(result);
            });
        });

        if let Err(e) = spawned {
            active.fetch_sub(1, Ordering::SeqCst);
            metrics::HEADLESS_WORKERS_ACTIVE.set(active.load(Ordering::Relaxed) as i64);
            return Err(format!("Failed to spawn headless game thread: {e}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::IdleBot;

    #[test]
    fn test_worker_pool_capacity() {
        let pool = WorkerPool::new(4);
        assert!(pool.has_capacity());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_worker_pool_zero_capacity() {
        let pool = WorkerPool::new(0);
        assert!(!pool.has_capacity());
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let pool = WorkerPool::new(1);
        let result = pool.spawn_game(GameSettings::default(), vec![], 1, |_| {});
        assert!(result.is_err());
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_game_reports_result() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let bots = vec![
            BotEntry::new("a", 0, Box::new(IdleBot::new())),
            BotEntry::new("b", 1, Box::new(IdleBot::new())),
        ];
        pool.spawn_game(GameSettings::default(), bots, 5, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

        let result = rx.await.unwrap();
        assert_eq!(result.ticks, 5);
        assert_eq!(result.final_scores.len(), 2);
    }
}
