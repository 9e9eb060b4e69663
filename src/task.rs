//! The unit of work moving through queues, workers, and clients.
//!
//! A small `Copy`-able id newtype plus a plain data record, no behaviour
//! attached. A simulated task carries no closure or join handle — it is
//! pure bookkeeping the engine can freely copy and stash in trace records.

use crate::clock::Tick;

/// Identifies a task for the lifetime of a run. Monotonically assigned by
/// whichever component creates the task (`LoadGenerator`), never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

/// Identifies the client a task was admitted on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub usize);

/// A single unit of work.
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub id: TaskId,
    pub client: ClientId,
    /// Tick at which the task first arrived at the system boundary. Used
    /// for total system latency; never rewritten once set — a stolen
    /// task's arrival tick is not rewritten either.
    pub arrival_tick: Tick,
    /// Tick the task was (re-)enqueued onto a core queue — the admission
    /// time, overwritten on promotion from a client's pending queue so
    /// queue-delay metrics reflect time spent on the core queue rather than
    /// time spent waiting on client-side credit.
    pub queue_arrival_tick: Tick,
    /// Ticks of work this task will consume once a worker starts running it.
    pub service_time: Tick,
    /// Tick at which a worker began executing this task, set once, at most
    /// once; `None` while the task is still queued.
    pub start_tick: Option<Tick>,
}

impl Task {
    pub fn new(id: TaskId, client: ClientId, arrival_tick: Tick, service_time: Tick) -> Self {
        Self {
            id,
            client,
            arrival_tick,
            queue_arrival_tick: arrival_tick,
            service_time,
            start_tick: None,
        }
    }

    /// Ticks this task has been waiting on its core queue as of `now`.
    pub fn waited_for(&self, now: Tick) -> Tick {
        now.saturating_sub(self.queue_arrival_tick)
    }
}

/// A completed task's timing, as recorded in the `task_times` trace stream.
#[derive(Debug, Clone, Copy)]
pub struct TaskTimes {
    pub id: TaskId,
    pub client: ClientId,
    pub arrival_tick: Tick,
    pub start_tick: Tick,
    pub completion_tick: Tick,
}

impl TaskTimes {
    pub fn queueing_delay(&self) -> Tick {
        self.start_tick.saturating_sub(self.arrival_tick)
    }

    pub fn total_latency(&self) -> Tick {
        self.completion_tick.saturating_sub(self.arrival_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waited_for_before_arrival_saturates_to_zero() {
        let task = Task::new(TaskId(0), ClientId(0), 100, 10);
        assert_eq!(task.waited_for(50), 0);
        assert_eq!(task.waited_for(150), 50);
    }

    #[test]
    fn task_times_derive_latency_and_delay() {
        let times = TaskTimes {
            id: TaskId(1),
            client: ClientId(0),
            arrival_tick: 100,
            start_tick: 120,
            completion_tick: 170,
        };
        assert_eq!(times.queueing_delay(), 20);
        assert_eq!(times.total_latency(), 70);
    }
}
