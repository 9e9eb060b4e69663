//! Deterministic replay of a previously captured realloc schedule.
//!
//! Replay mode consumes a prior `realloc_schedule` and applies its
//! park/unpark events at the recorded times, overriding the allocation
//! controller. Loading the file that schedule came from is a collaborator's
//! job; this module only holds the in-memory schedule and the lookup the
//! per-tick loop needs to act on it.

use std::collections::HashMap;

use crate::clock::Tick;
use crate::stats::ReallocScheduleRecord;
use crate::worker::ThreadId;

/// A single recorded decision, replayed verbatim regardless of what the
/// live core-allocation controller would otherwise have decided.
#[derive(Debug, Clone, Copy)]
pub struct ReplayEvent {
    pub is_park: bool,
    pub thread: ThreadId,
}

/// An entire run's worth of recorded park/unpark decisions, indexed by the
/// tick they were recorded at for O(1) per-tick lookup.
#[derive(Debug, Default)]
pub struct ReplaySchedule {
    by_tick: HashMap<Tick, Vec<ReplayEvent>>,
}

impl ReplaySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schedule from an explicit `(tick, event)` sequence.
    pub fn from_events(events: impl IntoIterator<Item = (Tick, ReplayEvent)>) -> Self {
        let mut by_tick: HashMap<Tick, Vec<ReplayEvent>> = HashMap::new();
        for (tick, event) in events {
            by_tick.entry(tick).or_default().push(event);
        }
        Self { by_tick }
    }

    pub fn events_at(&self, tick: Tick) -> &[ReplayEvent] {
        self.by_tick.get(&tick).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.by_tick.is_empty()
    }
}

/// Turn a captured `realloc_schedule` trace back into replayable events.
/// Only rows where the live controller actually acted (`attempted`) produce
/// an event; `ConsideredNoop` rows are dropped since replaying them would be
/// a no-op anyway.
pub fn schedule_from_records(records: &[ReallocScheduleRecord]) -> ReplaySchedule {
    let events = records
        .iter()
        .filter(|record| record.attempted)
        .map(|record| {
            (
                record.time,
                ReplayEvent {
                    is_park: record.is_park,
                    thread: ThreadId(record.thread),
                },
            )
        });
    ReplaySchedule::from_events(events)
}
