//! Per-core worker and the work-search/park/steal state machine driving it.
//!
//! A worker drains its own queue, then searches other queues under the
//! configured `StealPolicy`, then parks once it has searched for at least
//! `minimum_work_search_time` ticks without success, and finally may be
//! placed into `ALLOCATING` by the core allocator while it waits out an
//! allocation delay.

use crate::clock::Tick;
use crate::config::{Config, StealPolicy};
use crate::queue::QueueId;
use crate::rng::SimRng;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

/// A worker's state at the top of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSearchState {
    /// Draining its own queue.
    Local,
    /// Searching remote queues for a task to steal.
    Steal,
    /// Between a failed local check and becoming eligible to park: still
    /// charged `work_search_time` per failed attempt, but not yet allowed to
    /// park.
    Yield,
    /// Parked: deallocated from active service, does not search or run
    /// tasks until unparked by the core allocator.
    Parked,
    /// Unparked by the allocator but serving out `allocation_delay_ticks`
    /// before rejoining the active pool, when `allocation_delay_enabled`.
    Allocating,
}

/// A single core's worker.
#[derive(Debug)]
pub struct Worker {
    pub id: ThreadId,
    pub home_queue: QueueId,
    pub state: WorkSearchState,
    /// The task currently being serviced, if any.
    pub running: Option<Task>,
    /// Ticks remaining on the task currently being serviced.
    pub remaining_service: Tick,
    /// Ticks spent in `Steal`/`Yield` since the last time this worker found
    /// work or parked; reset to `0` on every successful dequeue/steal.
    pub search_elapsed: Tick,
    /// Ticks remaining in `Allocating` before this worker rejoins service.
    pub allocation_delay_remaining: Tick,
    /// Round-robin cursor for `StealPolicy::RoundRobin`.
    round_robin_cursor: usize,
}

impl Worker {
    pub fn new(id: ThreadId, home_queue: QueueId) -> Self {
        Self {
            id,
            home_queue,
            state: WorkSearchState::Local,
            running: None,
            remaining_service: 0,
            search_elapsed: 0,
            allocation_delay_remaining: 0,
            round_robin_cursor: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none()
    }

    pub fn is_parked(&self) -> bool {
        matches!(self.state, WorkSearchState::Parked)
    }

    /// Begin executing `task`, clearing any accumulated search time.
    pub fn start(&mut self, task: Task, now: Tick) -> Task {
        self.remaining_service = task.service_time;
        self.search_elapsed = 0;
        self.state = WorkSearchState::Local;
        let mut started = task;
        started.start_tick = Some(now);
        self.running = Some(started);
        started
    }

    /// Advance the running task's remaining service by one tick. Returns
    /// the completed task once `remaining_service` reaches zero.
    pub fn run_one_tick(&mut self) -> Option<Task> {
        if self.running.is_none() {
            return None;
        }
        self.remaining_service = self.remaining_service.saturating_sub(1);
        if self.remaining_service == 0 {
            self.running.take()
        } else {
            None
        }
    }

    /// Park this worker: it stops searching and running until unparked.
    pub fn park(&mut self) {
        self.state = WorkSearchState::Parked;
        self.search_elapsed = 0;
    }

    /// Unpark into `Allocating` if an allocation delay is configured,
    /// otherwise straight back into `Local`.
    pub fn unpark(&mut self, cfg: &Config) {
        if cfg.allocation_delay_enabled && cfg.allocation_delay_ticks > 0 {
            self.state = WorkSearchState::Allocating;
            self.allocation_delay_remaining = cfg.allocation_delay_ticks;
        } else {
            self.state = WorkSearchState::Local;
        }
    }

    /// Charge one tick of the allocation delay; transitions to `Local` once
    /// it elapses.
    pub fn tick_allocation_delay(&mut self) {
        if self.allocation_delay_remaining > 0 {
            self.allocation_delay_remaining -= 1;
        }
        if self.allocation_delay_remaining == 0 {
            self.state = WorkSearchState::Local;
        }
    }

    /// Record one failed search attempt, transitioning `Steal -> Yield ->
    /// Parked` once `minimum_work_search_time` has elapsed.
    pub fn charge_failed_search(&mut self, cfg: &Config) {
        self.search_elapsed += cfg.work_search_time;
        self.state = if self.search_elapsed >= cfg.minimum_work_search_time {
            WorkSearchState::Yield
        } else {
            WorkSearchState::Steal
        };
    }

    pub fn ready_to_park(&self, cfg: &Config) -> bool {
        matches!(self.state, WorkSearchState::Yield)
            && self.search_elapsed >= cfg.minimum_work_search_time
    }

    /// Choose the next queue to attempt a steal from, excluding this
    /// worker's own home queue.
    pub fn pick_steal_target(
        &mut self,
        cfg: &Config,
        num_queues: usize,
        flagged: &[QueueId],
        rng: &mut SimRng,
    ) -> Option<QueueId> {
        if num_queues <= 1 {
            return None;
        }
        match cfg.steal_policy {
            StealPolicy::Random => {
                let mut candidate = self.home_queue;
                while candidate == self.home_queue {
                    candidate = QueueId(rng.uniform_index(num_queues));
                }
                Some(candidate)
            }
            StealPolicy::RoundRobin => {
                let mut attempts = 0;
                loop {
                    self.round_robin_cursor = (self.round_robin_cursor + 1) % num_queues;
                    attempts += 1;
                    if attempts > num_queues {
                        return None;
                    }
                    let candidate = QueueId(self.round_robin_cursor);
                    if candidate != self.home_queue {
                        return Some(candidate);
                    }
                }
            }
            StealPolicy::Flagged => flagged
                .iter()
                .copied()
                .find(|&q| q != self.home_queue)
                .or_else(|| {
                    let mut candidate = self.home_queue;
                    while candidate == self.home_queue {
                        candidate = QueueId(rng.uniform_index(num_queues));
                    }
                    Some(candidate)
                }),
        }
    }
}

/// Outcome of one steal attempt, used both to drive the worker's state
/// transition and to populate the `ws_checks` trace stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealOutcome {
    Succeeded { from: QueueId, task: TaskId },
    FailedEmpty { from: QueueId },
    FailedLocked { from: QueueId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_one_tick_completes_at_zero() {
        let mut w = Worker::new(ThreadId(0), QueueId(0));
        let t = crate::task::Task::new(TaskId(0), crate::task::ClientId(0), 0, 3);
        w.start(t, 0);
        assert!(w.run_one_tick().is_none());
        assert!(w.run_one_tick().is_none());
        let done = w.run_one_tick();
        assert_eq!(done.unwrap().id, TaskId(0));
        assert!(w.is_idle());
    }

    #[test]
    fn failed_search_escalates_to_yield_then_allows_park() {
        let cfg = Config {
            work_search_time: 50,
            minimum_work_search_time: 100,
            ..Config::default()
        };
        let mut w = Worker::new(ThreadId(0), QueueId(0));
        w.state = WorkSearchState::Steal;
        w.charge_failed_search(&cfg);
        assert_eq!(w.state, WorkSearchState::Steal);
        w.charge_failed_search(&cfg);
        assert_eq!(w.state, WorkSearchState::Yield);
        assert!(w.ready_to_park(&cfg));
    }

    #[test]
    fn unpark_respects_allocation_delay_toggle() {
        let mut cfg = Config {
            allocation_delay_enabled: true,
            allocation_delay_ticks: 10,
            ..Config::default()
        };
        let mut w = Worker::new(ThreadId(0), QueueId(0));
        w.park();
        w.unpark(&cfg);
        assert_eq!(w.state, WorkSearchState::Allocating);
        assert_eq!(w.allocation_delay_remaining, 10);

        cfg.allocation_delay_enabled = false;
        let mut w2 = Worker::new(ThreadId(1), QueueId(1));
        w2.park();
        w2.unpark(&cfg);
        assert_eq!(w2.state, WorkSearchState::Local);
    }

    #[test]
    fn round_robin_never_targets_home_queue() {
        let cfg = Config {
            steal_policy: StealPolicy::RoundRobin,
            ..Config::default()
        };
        let mut w = Worker::new(ThreadId(0), QueueId(1));
        let mut rng = SimRng::from_seed(1);
        for _ in 0..8 {
            let target = w.pick_steal_target(&cfg, 4, &[], &mut rng);
            assert_ne!(target, Some(QueueId(1)));
        }
    }
}
