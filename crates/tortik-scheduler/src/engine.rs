//! Timer engine: one shared pending set plus a background loop that
//! sleeps until the nearest instant and hands due firings to a
//! dispatcher, at most once each.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tortik_store::Firing;
use tracing::{debug, info};

/// Re-check period when nothing is pending. Registration wakes the
/// loop immediately, this is just a safety net.
const IDLE_WAIT: Duration = Duration::from_secs(300);

/// Receives due firings from the engine loop.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, firing: Firing);
}

struct TimerEntry {
    firing: Firing,
    seq: u64,
}

#[derive(Default)]
struct EngineState {
    entries: Vec<TimerEntry>,
    next_seq: u64,
}

/// Shared pending-timer set. Mutators are synchronous and cheap; the
/// lock is never held across an await.
pub struct TimerEngine {
    state: Mutex<EngineState>,
    wake: Notify,
}

impl TimerEngine {
    pub fn new() -> Self {
        Self { state: Mutex::new(EngineState::default()), wake: Notify::new() }
    }

    /// Register a firing. Returns false without touching anything when
    /// the id is already pending.
    pub fn register(&self, firing: Firing) -> bool {
        let mut state = self.lock_state();
        if state.entries.iter().any(|e| e.firing.id == firing.id) {
            return false;
        }
        debug!("📅 timer registered: {}", firing.id);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(TimerEntry { firing, seq });
        drop(state);
        self.wake.notify_one();
        true
    }

    /// Drop every pending timer owned by `birthday_id`. Returns how
    /// many were removed.
    pub fn cancel_all(&self, birthday_id: i64) -> usize {
        let mut state = self.lock_state();
        let before = state.entries.len();
        state.entries.retain(|e| e.firing.birthday_id != birthday_id);
        let removed = before - state.entries.len();
        drop(state);
        if removed > 0 {
            debug!("📅 cancelled {removed} timer(s) for birthday {birthday_id}");
            self.wake.notify_one();
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Ids of pending timers, in registration order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.lock_state().entries.iter().map(|e| e.firing.id.clone()).collect()
    }

    /// Instant of the nearest pending timer.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().entries.iter().map(|e| e.firing.run_at).min()
    }

    /// Remove and return everything due by `now`, ordered by instant
    /// and then by registration.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut state = self.lock_state();
        let entries = std::mem::take(&mut state.entries);
        let (mut due, rest): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.firing.run_at <= now);
        state.entries = rest;
        due.sort_by(|a, b| a.firing.run_at.cmp(&b.firing.run_at).then(a.seq.cmp(&b.seq)));
        due.into_iter().map(|e| e.firing).collect()
    }

    fn until_next_due(&self) -> Option<Duration> {
        self.next_due_at().map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the firing loop. Every due firing goes to `dispatcher`
    /// exactly once, then the timer is gone.
    pub fn start(self: &Arc<Self>, dispatcher: Arc<dyn Dispatch>) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(Arc::clone(self), dispatcher, shutdown_rx));
        EngineHandle { shutdown: shutdown_tx, task }
    }
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running engine loop.
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl EngineHandle {
    /// Signal the loop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

async fn run_loop(
    engine: Arc<TimerEngine>,
    dispatcher: Arc<dyn Dispatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("⏰ Timer engine started ({} pending)", engine.pending_count());
    loop {
        let wait = engine.until_next_due().unwrap_or(IDLE_WAIT);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = engine.wake.notified() => {}
            _ = tokio::time::sleep(wait) => {
                for firing in engine.take_due(Utc::now()) {
                    debug!("🔔 timer due: {}", firing.id);
                    dispatcher.dispatch(firing).await;
                }
            }
        }
    }
    info!("⏰ Timer engine stopped");
}
