//! Core-allocation controller: parks and unparks workers to track queueing
//! delay against buffer-core targets.
//!
//! There are no OS threads to spawn or join here, only worker state
//! transitions: parking and unparking a `Worker` in place, LIFO-ordered so
//! the most recently idled core rejoins service first.

use crate::clock::Tick;
use crate::config::Config;
use crate::queue::QueueId;
use crate::worker::{ThreadId, WorkSearchState, Worker};

/// One decision point the allocator considered, whether or not it acted.
/// Every decision is sampled, not just the ones that actually parked or
/// unparked a worker, so the `realloc_schedule` trace stream can show near
/// misses alongside real reallocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReallocEvent {
    Parked(ThreadId),
    Unparked(ThreadId),
    ConsideredNoop,
}

/// Buffer-core bounds resolved for the current working-core count.
#[derive(Debug, Clone, Copy)]
pub struct BufferBounds {
    pub min: usize,
    pub max: usize,
}

pub struct CoreAllocator {
    /// Thread ids in the order they were parked; last element is the most
    /// recently parked, unparked first (LIFO).
    parked_order: Vec<ThreadId>,
}

impl CoreAllocator {
    pub fn new() -> Self {
        Self {
            parked_order: Vec::new(),
        }
    }

    pub fn parked_count(&self) -> usize {
        self.parked_order.len()
    }

    /// Resolve the configured buffer-core bounds against the current count
    /// of working (non-parked) cores.
    pub fn buffer_bounds(&self, cfg: &Config, working: usize) -> BufferBounds {
        let min = cfg
            .buffer_core_count_min
            .unwrap_or_else(|| {
                cfg.buffer_core_pct_min
                    .map(|pct| ((working as f64 * pct / 100.0).ceil() as usize).max(0))
                    .unwrap_or(0)
            });
        let max = cfg
            .buffer_core_count_max
            .unwrap_or_else(|| {
                let pct = cfg.buffer_core_pct_max.unwrap_or(25.0);
                ((working as f64 * pct / 100.0).ceil() as usize).max(1)
            });
        BufferBounds { min, max: max.max(min) }
    }

    /// A worker counts as a buffer core when active, idle, unflagged, and
    /// (optionally) with an empty local queue.
    pub fn is_buffer_core(worker: &Worker, queue_empty: bool, queue_flagged: bool, require_empty_queue: bool) -> bool {
        matches!(worker.state, WorkSearchState::Local | WorkSearchState::Steal | WorkSearchState::Yield)
            && worker.is_idle()
            && !queue_flagged
            && (!require_empty_queue || queue_empty)
    }

    /// Decide whether to park `worker`, given it has exhausted its work
    /// search. Refuses when doing so would drop the buffer count below
    /// `min` or would leave no queue available to absorb its backlog.
    pub fn consider_park(
        &mut self,
        worker: &mut Worker,
        current_buffer_cores: usize,
        bounds: BufferBounds,
        available_queues: usize,
    ) -> ReallocEvent {
        if current_buffer_cores <= bounds.min || available_queues <= 1 {
            return ReallocEvent::ConsideredNoop;
        }
        worker.park();
        self.parked_order.push(worker.id);
        ReallocEvent::Parked(worker.id)
    }

    /// Whether at least one worker remains available to deallocate: never
    /// park the last active worker.
    pub fn threads_available_for_deallocation(total_threads: usize) -> bool {
        total_threads > 1
    }

    /// Unpark the most recently parked thread (LIFO). If all threads are
    /// parked, unpark specifically the one bound to `active_queue` so the
    /// queue with the most pressing backlog gets its own worker back first.
    pub fn consider_unpark(
        &mut self,
        workers: &mut [Worker],
        cfg: &Config,
        all_parked: bool,
        active_queue: QueueId,
    ) -> ReallocEvent {
        let target = if all_parked {
            workers.iter().find(|w| w.home_queue == active_queue).map(|w| w.id)
        } else {
            self.parked_order.last().copied()
        };

        let Some(target_id) = target else {
            return ReallocEvent::ConsideredNoop;
        };
        self.parked_order.retain(|&id| id != target_id);
        if let Some(worker) = workers.iter_mut().find(|w| w.id == target_id) {
            worker.unpark(cfg);
        }
        ReallocEvent::Unparked(target_id)
    }

    /// Whether the system should be trying to allocate more cores right now:
    /// either average delay across queues is above the reallocation
    /// threshold, or any single queue has crossed the allocation threshold.
    pub fn should_allocate(cfg: &Config, avg_delay: Tick, max_queue_delay: Tick) -> bool {
        avg_delay > cfg.reallocation_threshold_max || max_queue_delay > cfg.allocation_threshold
    }
}

impl Default for CoreAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueId;

    #[test]
    fn buffer_bounds_fall_back_to_percentage() {
        let cfg = Config {
            buffer_core_count_min: None,
            buffer_core_count_max: None,
            buffer_core_pct_min: Some(10.0),
            buffer_core_pct_max: Some(25.0),
            ..Config::default()
        };
        let allocator = CoreAllocator::new();
        let bounds = allocator.buffer_bounds(&cfg, 16);
        assert_eq!(bounds.min, 2); // ceil(16*0.1)=2
        assert_eq!(bounds.max, 4); // ceil(16*0.25)=4
    }

    #[test]
    fn consider_park_refuses_below_min_buffer() {
        let mut allocator = CoreAllocator::new();
        let mut worker = Worker::new(ThreadId(0), QueueId(0));
        let bounds = BufferBounds { min: 2, max: 4 };
        let event = allocator.consider_park(&mut worker, 2, bounds, 4);
        assert_eq!(event, ReallocEvent::ConsideredNoop);
        assert!(!worker.is_parked());
    }

    #[test]
    fn consider_park_succeeds_above_min_buffer() {
        let mut allocator = CoreAllocator::new();
        let mut worker = Worker::new(ThreadId(0), QueueId(0));
        let bounds = BufferBounds { min: 1, max: 4 };
        let event = allocator.consider_park(&mut worker, 3, bounds, 4);
        assert_eq!(event, ReallocEvent::Parked(ThreadId(0)));
        assert!(worker.is_parked());
        assert_eq!(allocator.parked_count(), 1);
    }

    #[test]
    fn unpark_is_lifo() {
        let cfg = Config::default();
        let mut allocator = CoreAllocator::new();
        let mut workers = vec![
            Worker::new(ThreadId(0), QueueId(0)),
            Worker::new(ThreadId(1), QueueId(1)),
        ];
        let bounds = BufferBounds { min: 0, max: 4 };
        allocator.consider_park(&mut workers[0], 2, bounds, 4);
        allocator.consider_park(&mut workers[1], 2, bounds, 4);

        let event = allocator.consider_unpark(&mut workers, &cfg, false, QueueId(0));
        assert_eq!(event, ReallocEvent::Unparked(ThreadId(1)));
    }

    #[test]
    fn unpark_targets_active_queue_when_all_parked() {
        let cfg = Config::default();
        let mut allocator = CoreAllocator::new();
        let mut workers = vec![
            Worker::new(ThreadId(0), QueueId(0)),
            Worker::new(ThreadId(1), QueueId(1)),
        ];
        let bounds = BufferBounds { min: 0, max: 4 };
        allocator.consider_park(&mut workers[0], 2, bounds, 4);
        allocator.consider_park(&mut workers[1], 2, bounds, 4);

        let event = allocator.consider_unpark(&mut workers, &cfg, true, QueueId(0));
        assert_eq!(event, ReallocEvent::Unparked(ThreadId(0)));
    }
}
