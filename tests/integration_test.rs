use breakwater_sim::allocator::{BufferBounds, CoreAllocator, ReallocEvent};
use breakwater_sim::config::{Config, LoadShift, ServiceTimeModel, StealPolicy};
use breakwater_sim::queue::QueueId;
use breakwater_sim::replay::{schedule_from_records, ReplayEvent, ReplaySchedule};
use breakwater_sim::rng::SimRng;
use breakwater_sim::stats::VecTraceSink;
use breakwater_sim::task::{ClientId, Task, TaskId};
use breakwater_sim::worker::{ThreadId, Worker};
use breakwater_sim::SimulationState;

fn small_config() -> Config {
    Config {
        name: "integration-small".to_string(),
        sim_duration: 50_000,
        num_threads: 4,
        num_queues: 4,
        mapping: vec![0, 1, 2, 3],
        avg_system_load: 0.5,
        average_service_time: 1000.0,
        load_thread_count: 4,
        service_time_model: ServiceTimeModel::Exponential,
        num_clients: 2,
        ..Config::default()
    }
}

#[test]
fn conservation_of_tasks_holds_for_a_full_run() {
    let cfg = small_config();
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    let counters = state.counters();
    assert!(counters.generated > 0, "workload should have generated tasks");
    assert!(counters.conserves(counters.generated));
    assert_eq!(counters.completed + counters.dropped, counters.generated);
}

#[test]
fn same_seed_and_config_reproduce_identical_trace() {
    let cfg = small_config();

    let mut sink_a = VecTraceSink::default();
    let mut state_a = SimulationState::new(cfg.clone(), SimRng::from_run_name(&cfg.name), None).unwrap();
    state_a.run(&mut sink_a).unwrap();

    let mut sink_b = VecTraceSink::default();
    let mut state_b = SimulationState::new(cfg.clone(), SimRng::from_run_name(&cfg.name), None).unwrap();
    state_b.run(&mut sink_b).unwrap();

    assert_eq!(sink_a.task_times.len(), sink_b.task_times.len());
    for (a, b) in sink_a.task_times.iter().zip(sink_b.task_times.iter()) {
        assert_eq!(a.arrival_time, b.arrival_time);
        assert_eq!(a.time_in_system, b.time_in_system);
    }
    assert_eq!(sink_a.breakwater_info.dropped, sink_b.breakwater_info.dropped);
}

#[test]
fn heavy_overload_with_aqm_produces_drops() {
    let cfg = Config {
        name: "integration-overload".to_string(),
        sim_duration: 30_000,
        num_threads: 2,
        num_queues: 2,
        mapping: vec![0, 1],
        avg_system_load: 20.0,
        average_service_time: 1000.0,
        load_thread_count: 8,
        num_clients: 1,
        server_initial_credits: 4,
        max_credits: 4,
        min_credits: 1,
        breakwater_target_delay: 500,
        aqm_enabled: true,
        ..Config::default()
    };
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert!(state.counters().dropped > 0, "an overloaded, tightly-capped pool should drop work under AQM");
    assert!(!sink.drops.is_empty());
}

#[test]
fn credit_pool_never_exceeds_configured_bounds() {
    let cfg = Config {
        name: "integration-bounds".to_string(),
        sim_duration: 60_000,
        max_credits: 200,
        min_credits: 10,
        ..small_config()
    };
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg.clone(), rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert!(!sink.credit_pool.is_empty());
    for record in &sink.credit_pool {
        assert!(record.total_credits <= cfg.max_credits);
        assert!(record.total_credits >= cfg.effective_min_credits());
    }
}

#[test]
fn round_robin_steal_policy_runs_without_invariant_violations() {
    let cfg = Config {
        name: "integration-round-robin".to_string(),
        steal_policy: StealPolicy::RoundRobin,
        load_shift: LoadShift::OverTime,
        ..small_config()
    };
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();
    assert!(state.counters().generated > 0);
}

#[test]
fn buffer_cores_park_idle_workers_under_light_load() {
    let cfg = Config {
        name: "integration-buffer-cores".to_string(),
        sim_duration: 200_000,
        num_threads: 6,
        num_queues: 6,
        mapping: (0..6).collect(),
        avg_system_load: 0.05,
        average_service_time: 500.0,
        load_thread_count: 2,
        num_clients: 1,
        buffer_cores_enabled: true,
        buffer_core_count_min: Some(1),
        buffer_core_count_max: Some(4),
        minimum_work_search_time: 100,
        work_search_time: 50,
        ..Config::default()
    };
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert!(
        sink.realloc_schedule.iter().any(|r| r.attempted),
        "idle workers under light load should eventually be parked as buffer cores"
    );
}

#[test]
fn replay_schedule_overrides_live_allocation_decisions() {
    let cfg = Config {
        name: "integration-replay".to_string(),
        sim_duration: 5_000,
        num_threads: 2,
        num_queues: 2,
        mapping: vec![0, 1],
        avg_system_load: 0.3,
        average_service_time: 500.0,
        load_thread_count: 2,
        num_clients: 1,
        buffer_cores_enabled: true,
        ..Config::default()
    };

    // Park thread 1 early, unpark it again well before the run ends; the
    // live allocator never gets a say at either tick while a replay
    // schedule is attached.
    let replay = ReplaySchedule::from_events([
        (3, ReplayEvent { is_park: true, thread: ThreadId(1) }),
        (500, ReplayEvent { is_park: false, thread: ThreadId(1) }),
    ]);

    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, Some(replay)).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert!(sink.realloc_schedule.iter().any(|r| r.is_park && r.attempted));
    assert!(sink.realloc_schedule.iter().any(|r| !r.is_park && r.attempted));
    assert_eq!(state.parked_worker_count(), 0, "the unpark at tick 500 should have taken effect");
}

#[test]
fn scenario_s1_closed_system_no_overload() {
    let cfg = Config {
        name: "s1-closed-system".to_string(),
        rtt: 5000,
        breakwater_target_delay: 10_000,
        num_clients: 1,
        avg_system_load: 0.5,
        average_service_time: 1000.0,
        num_threads: 4,
        num_queues: 4,
        mapping: (0..4).collect(),
        load_thread_count: 4,
        sim_duration: 1_000_000,
        ..Config::default()
    };
    let max_credits = cfg.max_credits;
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert_eq!(state.counters().dropped, 0, "an unsaturated closed system should never need to drop work");
    assert!(state.counters().completed > 0);
    assert!(
        sink.credit_pool.iter().all(|r| r.total_credits < max_credits),
        "a half-loaded pool should never need to grow to its full credit ceiling"
    );
}

#[test]
fn scenario_s2_overload_shrinks_the_credit_pool_and_drops_work() {
    let cfg = Config {
        name: "s2-overload".to_string(),
        rtt: 5000,
        breakwater_target_delay: 10_000,
        num_clients: 1,
        avg_system_load: 1.4,
        average_service_time: 1000.0,
        num_threads: 4,
        num_queues: 4,
        mapping: (0..4).collect(),
        load_thread_count: 4,
        sim_duration: 1_000_000,
        ..Config::default()
    };
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert!(state.counters().dropped > 0, "sustained 1.4x overload must shed some work");
    let first = sink.credit_pool.first().unwrap().total_credits;
    let min_seen = sink.credit_pool.iter().map(|r| r.total_credits).min().unwrap();
    assert!(min_seen < first, "overload should shrink the credit pool below its starting size");
}

#[test]
fn scenario_s3_bimodal_service_keeps_pool_above_floor_and_rarely_drops() {
    let cfg = Config {
        name: "s3-bimodal".to_string(),
        service_time_model: ServiceTimeModel::Bimodal,
        avg_system_load: 0.9,
        num_threads: 4,
        num_queues: 4,
        mapping: (0..4).collect(),
        load_thread_count: 4,
        num_clients: 1,
        sim_duration: 500_000,
        ..Config::default()
    };
    let min_credits = cfg.min_credits;
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert!(sink.credit_pool.iter().all(|r| r.total_credits >= min_credits));
    let counters = state.counters();
    if counters.generated > 0 {
        let drop_rate = counters.dropped as f64 / counters.generated as f64;
        assert!(drop_rate <= 0.01, "a bimodal 0.9x-loaded pool should complete at least 99% of admitted work");
    }
}

#[test]
fn scenario_s4_varyload_over_time_pool_tracks_phase_shifts() {
    let cfg = Config {
        name: "s4-varyload".to_string(),
        load_shift: LoadShift::OverTime,
        avg_system_load: 1.0,
        num_threads: 4,
        num_queues: 4,
        mapping: (0..4).collect(),
        load_thread_count: 4,
        num_clients: 1,
        sim_duration: 400_000,
        ..Config::default()
    };
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg.clone(), rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();
    assert!(state.counters().generated > 0);

    let quarter = cfg.sim_duration / 4;
    let phase_avg = |lo: u64, hi: u64| -> f64 {
        let samples: Vec<u64> =
            sink.credit_pool.iter().filter(|r| r.time >= lo && r.time < hi).map(|r| r.total_credits).collect();
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<u64>() as f64 / samples.len() as f64
        }
    };

    let phase1 = phase_avg(0, quarter);
    let phase2 = phase_avg(quarter, 2 * quarter);
    let phase4 = phase_avg(3 * quarter, 4 * quarter);

    assert!(phase2 >= phase1, "the 0.2x-load phase should let the pool recover relative to the 1.0x phase");
    assert!(phase4 <= phase2, "the closing 1.4x-load phase should shrink the pool again");
}

#[test]
fn scenario_s5_replay_reproduces_identical_completion_times() {
    let cfg = Config {
        name: "s5-replay-source".to_string(),
        sim_duration: 100_000,
        num_threads: 4,
        num_queues: 4,
        mapping: (0..4).collect(),
        avg_system_load: 0.8,
        average_service_time: 1000.0,
        load_thread_count: 4,
        num_clients: 1,
        buffer_cores_enabled: true,
        ..Config::default()
    };

    let rng_a = SimRng::from_run_name(&cfg.name);
    let mut state_a = SimulationState::new(cfg.clone(), rng_a, None).unwrap();
    let mut sink_a = VecTraceSink::default();
    state_a.run(&mut sink_a).unwrap();

    let captured = schedule_from_records(&sink_a.realloc_schedule);

    let mut replay_cfg = cfg.clone();
    replay_cfg.name = "s5-replay-rerun".to_string();
    let rng_b = SimRng::from_run_name(&cfg.name);
    let mut state_b = SimulationState::new(replay_cfg, rng_b, Some(captured)).unwrap();
    let mut sink_b = VecTraceSink::default();
    state_b.run(&mut sink_b).unwrap();

    let completions_a: Vec<_> = state_a.task_times().iter().map(|t| t.completion_tick).collect();
    let completions_b: Vec<_> = state_b.task_times().iter().map(|t| t.completion_tick).collect();
    assert_eq!(completions_a, completions_b, "replaying a captured schedule must reproduce identical completion times");
}

#[test]
fn scenario_s6_buffer_core_floor_is_respected_at_steady_state() {
    let cfg = Config {
        name: "s6-buffer-core-floor".to_string(),
        num_threads: 16,
        num_queues: 16,
        mapping: (0..16).collect(),
        avg_system_load: 0.3,
        average_service_time: 1000.0,
        load_thread_count: 16,
        num_clients: 1,
        sim_duration: 300_000,
        buffer_cores_enabled: true,
        buffer_core_count_min: Some(2),
        buffer_core_count_max: Some(8),
        minimum_work_search_time: 100,
        work_search_time: 50,
        ..Config::default()
    };
    let rng = SimRng::from_run_name(&cfg.name);
    let mut state = SimulationState::new(cfg, rng, None).unwrap();
    let mut sink = VecTraceSink::default();
    state.run(&mut sink).unwrap();

    assert!(state.parked_worker_count() > 0, "a lightly loaded 16-core pool should park some idle workers");
    assert!(
        state.parked_worker_count() <= 16 - 2,
        "at least two cores must remain active to satisfy the buffer-core floor"
    );
}

#[test]
fn parking_a_worker_never_drops_its_in_flight_task() {
    let mut allocator = CoreAllocator::new();
    let mut worker = Worker::new(ThreadId(0), QueueId(0));
    let task = Task::new(TaskId(0), ClientId(0), 0, 500);
    worker.start(task, 0);
    assert!(worker.running.is_some());

    let bounds = BufferBounds { min: 0, max: 4 };
    let event = allocator.consider_park(&mut worker, 2, bounds, 4);

    assert_eq!(event, ReallocEvent::Parked(ThreadId(0)));
    assert!(worker.is_parked());
    assert!(worker.running.is_some(), "parking must never discard a task already committed to a worker");
}
