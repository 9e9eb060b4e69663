//! `SimulationState`: sole owner of every simulated aggregate, and the
//! fixed six-phase per-tick cycle.
//!
//! All cross-references inside the engine are plain integer ids resolved
//! back through this struct — there are no `Rc`/`Arc` cycles between
//! clients, the server, workers, and queues; every aggregate lives in one
//! of this struct's owned vectors and is addressed only by
//! `QueueId`/`ThreadId`/`ClientId`.

use tracing::{debug, info};

use crate::allocator::{CoreAllocator, ReallocEvent};
use crate::client::{Client, SpendOutcome};
use crate::clock::{Clock, Tick};
use crate::config::Config;
use crate::error::{SimError, SimResult};
use crate::loadgen;
use crate::queue::{Queue, QueueId};
use crate::replay::ReplaySchedule;
use crate::rng::SimRng;
use crate::server::BreakwaterServer;
use crate::stats::{
    BreakwaterInfoRecord, Counters, CoreDeallocationsRecord, CoresOverTimeRecord, CreditPoolRecord,
    DropsRecord, ReallocScheduleRecord, TaskTimesRecord, ThroughputRecord, TraceSink,
};
use crate::task::{ClientId, Task, TaskTimes};
use crate::worker::{ThreadId, WorkSearchState, Worker};

pub struct SimulationState {
    clock: Clock,
    cfg: Config,
    rng: SimRng,
    queues: Vec<Queue>,
    workers: Vec<Worker>,
    clients: Vec<Client>,
    server: BreakwaterServer,
    allocator: CoreAllocator,
    allocation_cooldown: Tick,
    arrivals: Vec<Task>,
    arrival_cursor: usize,
    counters: Counters,
    replay: Option<ReplaySchedule>,
    completed_in_window: u64,
    last_throughput_sample: Tick,
    next_task_id: u64,
    /// Per-completion timing, retained (when `record_task_times` is set) so
    /// a caller can compute latency percentiles once a run finishes.
    task_times: Vec<TaskTimes>,
}

impl SimulationState {
    pub fn new(cfg: Config, mut rng: SimRng, replay: Option<ReplaySchedule>) -> SimResult<Self> {
        cfg.validate()?;

        let queues = (0..cfg.num_queues).map(|i| Queue::new(QueueId(i))).collect();
        let workers = (0..cfg.num_threads)
            .map(|i| Worker::new(ThreadId(i), QueueId(cfg.mapping[i])))
            .collect();
        let clients = (0..cfg.num_clients).map(|i| Client::new(ClientId(i))).collect();
        let server = BreakwaterServer::new(&cfg);
        let arrivals = loadgen::generate_arrivals(&cfg, &mut rng);

        info!(
            tasks = arrivals.len(),
            threads = cfg.num_threads,
            queues = cfg.num_queues,
            "generated arrival sequence"
        );

        Ok(Self {
            clock: Clock::new(),
            cfg,
            rng,
            queues,
            workers,
            clients,
            server,
            allocator: CoreAllocator::new(),
            allocation_cooldown: 0,
            arrivals,
            arrival_cursor: 0,
            counters: Counters::default(),
            replay,
            completed_in_window: 0,
            last_throughput_sample: 0,
            next_task_id: 0,
            task_times: Vec::new(),
        })
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Completed tasks' timing, in completion order. Populated only when
    /// `record_task_times` is set.
    pub fn task_times(&self) -> &[TaskTimes] {
        &self.task_times
    }

    pub fn parked_worker_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_parked()).count()
    }

    fn incomplete_tasks_remain(&self) -> bool {
        self.counters.pending_in_flight(self.counters.generated) > 0
    }

    fn pending_injections_remain(&self) -> bool {
        self.arrival_cursor < self.arrivals.len()
    }

    /// Run the whole simulation to completion: while `time < sim_duration`
    /// and there is still work either incomplete or yet to arrive.
    pub fn run(&mut self, sink: &mut dyn TraceSink) -> SimResult<()> {
        while self.clock.now() < self.cfg.sim_duration
            && (self.incomplete_tasks_remain() || self.pending_injections_remain())
        {
            self.step(sink)?;
            self.clock.tick();
        }

        let info = BreakwaterInfoRecord {
            dropped: self.counters.dropped,
            timed_out: self.counters.timed_out,
        };
        sink.finish(info)?;

        debug_assert!(
            self.counters.conserves(self.counters.generated),
            "conservation of tasks violated"
        );
        info!(
            completed = self.counters.completed,
            dropped = self.counters.dropped,
            timed_out = self.counters.timed_out,
            "run complete"
        );
        Ok(())
    }

    /// One tick's worth of work, in the fixed visitation order: arrivals,
    /// Breakwater control loop, per-client control, worker step, core
    /// allocation, metrics sampling.
    fn step(&mut self, sink: &mut dyn TraceSink) -> SimResult<()> {
        let now = self.clock.now();

        // A fresh tick starts every queue unlocked; the tag only needs to
        // hold for the duration of one tick's worth of worker actions.
        for queue in &mut self.queues {
            queue.reset_lock();
        }

        self.phase_arrivals(now, sink);
        self.phase_breakwater_control(now, sink);
        self.phase_client_control(now, sink)?;
        self.phase_worker_step(now, sink);
        self.phase_core_allocation(now, sink);
        self.phase_metrics_sampling(now, sink);

        Ok(())
    }

    // -- phase 1: arrival injector -------------------------------------

    fn phase_arrivals(&mut self, now: Tick, _sink: &mut dyn TraceSink) {
        while self.arrival_cursor < self.arrivals.len()
            && self.arrivals[self.arrival_cursor].arrival_tick == now
        {
            let task = self.arrivals[self.arrival_cursor];
            self.arrival_cursor += 1;
            self.counters.generated += 1;

            let client_idx = task.client.0;
            let first_task = !self.clients[client_idx].has_demand();
            self.clients[client_idx].queue_demand(crate::client::PendingDemand {
                arrival_tick: task.arrival_tick,
                service_time: task.service_time,
            });
            if first_task {
                self.server.register_client(task.client);
                self.distribute_and_reconcile(client_idx);
            }
        }
    }

    // -- phase 2: Breakwater control loop -------------------------------

    fn phase_breakwater_control(&mut self, now: Tick, sink: &mut dyn TraceSink) {
        if !self.cfg.breakwater_enabled {
            return;
        }
        let max_delay = self.max_queue_delay(now);
        self.server.observe_delay(max_delay);

        if self.server.due(now) {
            let working = self.workers.iter().filter(|w| !w.is_parked()).count();
            self.server.run_control_loop(&self.cfg, now, working);

            debug!(
                tick = now,
                total_credits = self.server.total_credits,
                "breakwater control loop fired"
            );

            if self.cfg.record_credit_pool {
                sink.credit_pool(CreditPoolRecord {
                    time: now,
                    total_credits: self.server.total_credits,
                    credits_issued: self.server.credits_issued,
                    overcommitment_credits: self.server.overcommitment_credits,
                });
            }

            let targets: Vec<ClientId> = if self.cfg.lazy_distribution_fires_for_all_clients {
                self.server.registered_clients.clone()
            } else {
                self.server.registered_clients.first().copied().into_iter().collect()
            };
            for client_id in targets {
                self.distribute_and_reconcile(client_id.0);
            }
        }
    }

    // -- phase 3: per-client control ------------------------------------

    fn phase_client_control(&mut self, now: Tick, sink: &mut dyn TraceSink) -> SimResult<()> {
        let max_delay = self.max_queue_delay(now);
        for idx in 0..self.clients.len() {
            loop {
                let outcome = self.clients[idx].spend_credits(
                    max_delay,
                    self.cfg.breakwater_target_delay,
                    self.cfg.aqm_enabled,
                );
                match outcome {
                    SpendOutcome::Admitted(demand) => {
                        let queue_id = self.pick_available_queue();
                        let task_id = crate::task::TaskId(self.next_task_id);
                        self.next_task_id += 1;
                        let mut task = Task::new(task_id, ClientId(idx), demand.arrival_tick, demand.service_time);
                        task.queue_arrival_tick = now;
                        self.queues[queue_id.0].enqueue(task);
                    }
                    SpendOutcome::Dropped => {
                        self.counters.dropped += 1;
                        if self.cfg.record_drops {
                            sink.drops(DropsRecord {
                                time: now,
                                c_dropped: self.counters.dropped,
                                system_tasks: self.total_queue_length(),
                            });
                        }
                    }
                    SpendOutcome::NoDemand | SpendOutcome::NoCredit => break,
                }
            }

            if self.cfg.client_deregistration_enabled
                && !self.clients[idx].has_demand()
                && !self.clients[idx].deregistered
            {
                self.clients[idx].deregistered = true;
                self.server.deregister_client(ClientId(idx));
            }
        }

        // Skipped when `initial_credits_issued_equals_total` pre-reserves
        // the whole pool before any client has registered: that config
        // choice means credits_issued legitimately outruns client windows
        // until the pool grows or clients deregister (see DESIGN.md).
        let pool_preseeded = self.cfg.initial_credits && self.cfg.initial_credits_issued_equals_total;
        if !pool_preseeded {
            let issued_by_clients: u64 = self.clients.iter().map(Client::window).sum();
            if issued_by_clients != self.server.credits_issued {
                return Err(SimError::InvariantViolation {
                    tick: now,
                    component: "breakwater_server",
                    detail: format!(
                        "clients hold {issued_by_clients} credits but server has issued {}",
                        self.server.credits_issued
                    ),
                });
            }
        }
        Ok(())
    }

    fn pick_available_queue(&mut self) -> QueueId {
        let available = self.available_queues();
        if available.is_empty() {
            return QueueId(self.rng.uniform_index(self.queues.len()));
        }
        available[self.rng.uniform_index(available.len())]
    }

    fn available_queues(&self) -> Vec<QueueId> {
        self.queues
            .iter()
            .filter(|q| {
                self.workers
                    .iter()
                    .any(|w| w.home_queue == q.id && !w.is_parked())
            })
            .map(|q| q.id)
            .collect()
    }

    // -- phase 4: worker step --------------------------------------------

    fn phase_worker_step(&mut self, now: Tick, sink: &mut dyn TraceSink) {
        let num_queues = self.queues.len();
        for i in 0..self.workers.len() {
            match self.workers[i].state {
                WorkSearchState::Parked => continue,
                WorkSearchState::Allocating => {
                    self.workers[i].tick_allocation_delay();
                    continue;
                }
                _ => {}
            }

            if self.workers[i].running.is_some() {
                if let Some(completed) = self.workers[i].run_one_tick() {
                    self.record_completion(now, completed, sink);
                }
                continue;
            }

            let home = self.workers[i].home_queue;
            let thread_id = self.workers[i].id;
            let dequeued = if self.queues[home.0].try_lock(thread_id) {
                self.queues[home.0].dequeue()
            } else {
                None
            };
            if let Some(task) = dequeued {
                self.workers[i].start(task, now);
                continue;
            }

            self.attempt_steal(i, now, num_queues, sink);
        }
    }

    fn record_completion(&mut self, now: Tick, task: Task, sink: &mut dyn TraceSink) {
        self.counters.completed += 1;
        self.completed_in_window += 1;

        let client_idx = task.client.0;
        self.clients[client_idx].release_credit();

        let total_latency = now.saturating_sub(task.arrival_tick);
        if total_latency > self.cfg.slo_ticks {
            self.counters.timed_out += 1;
        }

        if self.cfg.record_task_times {
            sink.task_times(TaskTimesRecord {
                arrival_time: task.arrival_tick,
                time_in_system: total_latency,
                total_queue_length_at_admit: self.total_queue_length(),
            });
            self.task_times.push(TaskTimes {
                id: task.id,
                client: task.client,
                arrival_tick: task.arrival_tick,
                start_tick: task.start_tick.unwrap_or(task.arrival_tick),
                completion_tick: now,
            });
        }

        self.distribute_and_reconcile(client_idx);
    }

    /// Run `lazy_distribution` for one client and reconcile its window,
    /// correcting `credits_issued` for any shortfall the client could not
    /// apply immediately.
    fn distribute_and_reconcile(&mut self, client_idx: usize) {
        let window = self.clients[client_idx].window();
        let demand = self.clients[client_idx].backlog.len() as u64;
        let Some((new_window, nominal_delta)) = self.server.lazy_distribution(window, demand) else {
            return;
        };
        let actual_delta = self.clients[client_idx].reconcile_window(new_window);
        if actual_delta != nominal_delta {
            self.server.correct_issued(actual_delta - nominal_delta);
        }
    }

    fn attempt_steal(&mut self, worker_idx: usize, now: Tick, num_queues: usize, sink: &mut dyn TraceSink) {
        let flagged: Vec<QueueId> = self.queues.iter().filter(|q| q.steal_flagged()).map(|q| q.id).collect();
        let home = self.workers[worker_idx].home_queue;

        let Some(target) = self.workers[worker_idx].pick_steal_target(&self.cfg, num_queues, &flagged, &mut self.rng)
        else {
            self.workers[worker_idx].charge_failed_search(&self.cfg);
            return;
        };

        let thief_id = self.workers[worker_idx].id;
        let succeeded = self.queues[target.0].length() >= 2 && self.queues[target.0].try_lock(thief_id);
        let stolen = if succeeded { self.queues[target.0].steal() } else { None };

        if self.cfg.record_steals {
            sink.ws_check(crate::stats::WsCheckRecord {
                local_id: home.0,
                remote_id: target.0,
                since_last_check: self.workers[worker_idx].search_elapsed,
                remote_len: self.queues[target.0].length(),
                check_count: 1,
                succeeded: stolen.is_some(),
            });
        }

        match stolen {
            Some(task) => {
                self.workers[worker_idx].start(task, now);
                self.queues[target.0].clear_steal_flag();
            }
            None => {
                self.workers[worker_idx].charge_failed_search(&self.cfg);
                if self.cfg.delay_flagging_enabled
                    && self.queues[target.0].current_delay(now) > self.cfg.flag_delay_threshold
                {
                    self.queues[target.0].raise_steal_flag();
                }
            }
        }
    }

    // -- phase 5: core-allocation controller -----------------------------

    fn phase_core_allocation(&mut self, now: Tick, sink: &mut dyn TraceSink) {
        if !self.cfg.buffer_cores_enabled {
            return;
        }
        if let Some(schedule) = &self.replay {
            for event in schedule.events_at(now) {
                let idx = event.thread.0;
                if event.is_park {
                    self.workers[idx].park();
                    self.unlock_home_queue(event.thread);
                } else {
                    self.workers[idx].unpark(&self.cfg);
                }
                if self.cfg.record_allocations {
                    sink.realloc_schedule(ReallocScheduleRecord {
                        time: now,
                        is_park: event.is_park,
                        attempted: true,
                        thread: idx,
                        queue_occupancy: self.total_queue_length(),
                        work_in_system: self.total_queue_length(),
                        buffer_cores: self.current_buffer_cores(),
                    });
                }
            }
            return;
        }

        if self.allocation_cooldown > 0 {
            self.allocation_cooldown -= 1;
        }

        let working = self.workers.iter().filter(|w| !w.is_parked()).count();
        let bounds = self.allocator.buffer_bounds(&self.cfg, working);
        let avg_delay = self.average_queue_delay(now);
        let max_delay = self.max_queue_delay(now);

        if CoreAllocator::should_allocate(&self.cfg, avg_delay, max_delay) {
            let all_parked = self.workers.iter().all(Worker::is_parked);
            let active_queue = self.queues.iter().max_by_key(|q| q.current_delay(now)).map(|q| q.id).unwrap_or(QueueId(0));
            let event = self.allocator.consider_unpark(&mut self.workers, &self.cfg, all_parked, active_queue);
            self.emit_realloc_event(now, false, event, sink);
        } else if self.allocation_cooldown == 0 {
            if let Some(idx) = self.worker_ready_to_park() {
                if CoreAllocator::threads_available_for_deallocation(self.workers.len()) {
                    let current_buffer = self.current_buffer_cores();
                    let available = self.available_queues().len();
                    let event = self.allocator.consider_park(&mut self.workers[idx], current_buffer, bounds, available);
                    if let ReallocEvent::Parked(thread) = event {
                        self.unlock_home_queue(thread);
                    }
                    self.allocation_cooldown = self.cfg.rtt.min(1000);
                    self.emit_realloc_event(now, true, event, sink);
                }
            }
        }
    }

    fn worker_ready_to_park(&self) -> Option<usize> {
        self.workers.iter().position(|w| w.ready_to_park(&self.cfg))
    }

    /// Release a parking worker's claim on its home queue so a thief can
    /// still act on it later in the same tick.
    fn unlock_home_queue(&mut self, thread: ThreadId) {
        let home = self.workers[thread.0].home_queue;
        self.queues[home.0].unlock(thread);
    }

    fn emit_realloc_event(&self, now: Tick, is_park: bool, event: ReallocEvent, sink: &mut dyn TraceSink) {
        if !self.cfg.record_allocations {
            return;
        }
        let attempted = !matches!(event, ReallocEvent::ConsideredNoop);
        let thread = match event {
            ReallocEvent::Parked(id) | ReallocEvent::Unparked(id) => id.0,
            ReallocEvent::ConsideredNoop => 0,
        };
        sink.realloc_schedule(ReallocScheduleRecord {
            time: now,
            is_park,
            attempted,
            thread,
            queue_occupancy: self.total_queue_length(),
            work_in_system: self.total_queue_length(),
            buffer_cores: self.current_buffer_cores(),
        });
    }

    fn current_buffer_cores(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| {
                let queue_empty = self.queues[w.home_queue.0].is_empty();
                let flagged = self.queues[w.home_queue.0].steal_flagged();
                CoreAllocator::is_buffer_core(w, queue_empty, flagged, self.cfg.enqueue_choice)
            })
            .count()
    }

    // -- phase 6: metrics sampling ----------------------------------------

    fn phase_metrics_sampling(&mut self, now: Tick, sink: &mut dyn TraceSink) {
        if self.cfg.metrics_sample_interval == 0 || now % self.cfg.metrics_sample_interval != 0 {
            return;
        }

        if self.cfg.record_cores_over_time {
            let active = self.workers.iter().filter(|w| !w.is_parked()).count();
            sink.cores_over_time(CoresOverTimeRecord {
                time: now,
                available_queues: self.available_queues().len(),
                active_threads: active,
            });
        }

        if self.cfg.record_throughput {
            let elapsed = now.saturating_sub(self.last_throughput_sample).max(1);
            let per_ns = self.completed_in_window as f64 / elapsed as f64;
            sink.throughput(ThroughputRecord {
                time: now,
                throughput_per_second: per_ns * 1_000_000_000.0,
            });
            self.completed_in_window = 0;
            self.last_throughput_sample = now;
        }

        if self.cfg.record_core_deallocations && !self.clients.is_empty() {
            let max_delay_queue = self.queues.iter().max_by_key(|q| q.current_delay(now));
            let max_length_queue = self.queues.iter().max_by_key(|q| q.length());
            sink.core_deallocations(CoreDeallocationsRecord {
                time: now,
                available_queues: self.available_queues().len(),
                total_credits: self.server.total_credits,
                max_delay: max_delay_queue.map_or(0, |q| q.current_delay(now)),
                max_delay_queue_id: max_delay_queue.map_or(0, |q| q.id.0),
                max_length: max_length_queue.map_or(0, Queue::length),
                max_length_queue_id: max_length_queue.map_or(0, |q| q.id.0),
                system_tasks: self.total_queue_length(),
                client0_window: self.clients[0].window(),
                client0_c_in_use: self.clients[0].c_in_use,
                client0_dropped_credits: self.clients[0].dropped_count,
                client0_demand: self.clients[0].backlog.len(),
                client0_pending_len: self.clients[0].backlog.len(),
            });
        }

    }

    // -- shared helpers ----------------------------------------------------

    fn total_queue_length(&self) -> usize {
        self.queues.iter().map(Queue::length).sum()
    }

    fn max_queue_delay(&self, now: Tick) -> Tick {
        self.queues.iter().map(|q| q.current_delay(now)).max().unwrap_or(0)
    }

    fn average_queue_delay(&self, now: Tick) -> Tick {
        if self.queues.is_empty() {
            return 0;
        }
        let total: Tick = self.queues.iter().map(|q| q.current_delay(now)).sum();
        total / self.queues.len() as Tick
    }
}
