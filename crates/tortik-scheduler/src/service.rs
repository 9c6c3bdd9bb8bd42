//! Planning: turn a birthday definition into stored firings plus
//! registered timers, and rebuild the timer set after a restart.

use chrono::{DateTime, Utc};
use tortik_core::error::Result;
use tortik_store::{Birthday, Firing, FiringKind, Store};
use tracing::{debug, info};

use crate::engine::TimerEngine;
use crate::occurrence;

/// What rehydration found, for startup logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RehydrateReport {
    pub pruned: usize,
    pub registered: usize,
    pub orphaned: usize,
}

/// Materialize the upcoming firings for `birthday` and register timers
/// for the ones the store did not already hold. Store first, timers
/// second: a crash in between is healed by rehydration.
pub fn schedule_birthday(
    store: &Store,
    engine: &TimerEngine,
    birthday: &Birthday,
    now: DateTime<Utc>,
) -> Result<Vec<Firing>> {
    let tz = occurrence::parse_zone(&birthday.timezone)?;
    let occurs_at = occurrence::next_annual_occurrence(birthday.month, birthday.day, tz, now)?;

    let mut planned = Vec::new();
    if birthday.remind_on_day {
        planned.push(Firing::new(birthday.id, FiringKind::OnDay, occurs_at));
    }
    if let Some(days) = birthday.remind_days_before {
        let mut anchor = occurs_at;
        let mut run_at = occurrence::offset_instant(anchor, days, tz)?;
        // The window ahead of the upcoming occurrence can already be
        // behind us. Anchor to a later year until it is not, so the
        // early reminder never fires late and never goes silent.
        while run_at <= now {
            anchor =
                occurrence::next_annual_occurrence(birthday.month, birthday.day, tz, anchor)?;
            run_at = occurrence::offset_instant(anchor, days, tz)?;
        }
        planned.push(Firing::new(birthday.id, FiringKind::Before, run_at));
    }

    for firing in &planned {
        if store.insert_firing_if_absent(firing)? {
            engine.register(firing.clone());
        }
    }
    debug!("📅 planned {} firing(s) for birthday {}", planned.len(), birthday.id);
    Ok(planned)
}

/// Rebuild the timer set from stored firings: prune what already
/// passed, skip rows whose birthday is gone, register the rest.
pub fn rehydrate(
    store: &Store,
    engine: &TimerEngine,
    now: DateTime<Utc>,
) -> Result<RehydrateReport> {
    let pruned = store.delete_expired_firings(now)?;
    let mut registered = 0;
    let mut orphaned = 0;
    for firing in store.list_unexpired_firings(now)? {
        if store.birthday(firing.birthday_id)?.is_none() {
            orphaned += 1;
            continue;
        }
        if engine.register(firing) {
            registered += 1;
        }
    }
    info!(
        "📅 rehydrated {registered} timer(s), pruned {pruned} expired, skipped {orphaned} orphaned"
    );
    Ok(RehydrateReport { pruned, registered, orphaned })
}
