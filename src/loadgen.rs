//! Arrival-process pre-pass: generates the full task sequence for a run
//! before the clock starts moving.
//!
//! A Poisson process draws `int(random.expovariate(rate))` inter-arrival
//! gaps (regular arrivals instead space tasks by `int(1/rate)`), service
//! times are drawn per the configured model, and the bimodal mixture is
//! literally `[500] * 9 + [5500]`.

use crate::clock::Tick;
use crate::config::{Config, LoadShift, ServiceTimeModel};
use crate::rng::SimRng;
use crate::task::{ClientId, Task, TaskId};

/// A load-shift schedule resolved to a rate multiplier for a given tick,
/// behind the shared `next_rate`-shaped interface the two config-driven
/// variants share.
fn rate_multiplier(cfg: &Config, now: Tick) -> f64 {
    match cfg.load_shift {
        LoadShift::None => 1.0,
        LoadShift::OverTime => {
            const PHASE_MULTIPLIERS: [f64; 4] = [1.0, 0.2, 0.5, 1.4];
            let phase_len = (cfg.sim_duration / 4).max(1);
            let phase = ((now / phase_len) as usize).min(3);
            PHASE_MULTIPLIERS[phase]
        }
        LoadShift::ByRtt => {
            let period = cfg.load_shift_rtt_multiple.saturating_mul(cfg.rtt).max(1);
            if (now / period) % 2 == 0 {
                0.1
            } else {
                0.8
            }
        }
    }
}

fn service_time(cfg: &Config, rng: &mut SimRng) -> Tick {
    match cfg.service_time_model {
        ServiceTimeModel::Constant => cfg.average_service_time as Tick,
        ServiceTimeModel::Exponential => rng.exponential_service_time(cfg.average_service_time).max(1),
        ServiceTimeModel::Bimodal => rng.bimodal_service_time(500, 5500),
    }
}

/// Pre-generate every task the run will see, sorted by `arrival_tick`. One
/// generator instance stands in for `load_thread_count` independent arrival
/// streams: each thread's per-thread Poisson draws are merged into a single
/// sequence.
pub fn generate_arrivals(cfg: &Config, rng: &mut SimRng) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut next_id = 0u64;
    let base_rate = cfg.avg_system_load / cfg.average_service_time;

    for _ in 0..cfg.load_thread_count.max(1) {
        let mut now: Tick = 0;
        while now < cfg.sim_duration {
            let rate = (base_rate * rate_multiplier(cfg, now)).max(1e-12);
            let gap = if cfg.regular_arrivals {
                ((1.0 / rate) as Tick).max(1)
            } else {
                rng.exponential_gap(rate).max(1)
            };
            now += gap;
            if now >= cfg.sim_duration {
                break;
            }
            let client = ClientId(rng.uniform_index(cfg.num_clients.max(1)));
            let task = Task::new(TaskId(next_id), client, now, service_time(cfg, rng));
            next_id += 1;
            tasks.push(task);
        }
    }

    tasks.sort_by_key(|t| t.arrival_tick);
    for (i, t) in tasks.iter_mut().enumerate() {
        t.id = TaskId(i as u64);
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrivals_are_sorted_and_within_horizon() {
        let cfg = Config {
            sim_duration: 100_000,
            load_thread_count: 4,
            avg_system_load: 0.5,
            average_service_time: 1000.0,
            num_clients: 2,
            ..Config::default()
        };
        let mut rng = SimRng::from_seed(1);
        let tasks = generate_arrivals(&cfg, &mut rng);
        assert!(!tasks.is_empty());
        for w in tasks.windows(2) {
            assert!(w[0].arrival_tick <= w[1].arrival_tick);
        }
        assert!(tasks.iter().all(|t| t.arrival_tick < cfg.sim_duration));
    }

    #[test]
    fn regular_arrivals_are_evenly_spaced() {
        let cfg = Config {
            sim_duration: 10_000,
            load_thread_count: 1,
            avg_system_load: 1.0,
            average_service_time: 1000.0,
            regular_arrivals: true,
            num_clients: 1,
            ..Config::default()
        };
        let mut rng = SimRng::from_seed(2);
        let tasks = generate_arrivals(&cfg, &mut rng);
        let gaps: Vec<Tick> = tasks.windows(2).map(|w| w[1].arrival_tick - w[0].arrival_tick).collect();
        assert!(gaps.iter().all(|&g| g == gaps[0]));
    }

    #[test]
    fn same_seed_reproduces_identical_sequence() {
        let cfg = Config {
            sim_duration: 50_000,
            ..Config::default()
        };
        let mut rng_a = SimRng::from_seed(99);
        let mut rng_b = SimRng::from_seed(99);
        let a = generate_arrivals(&cfg, &mut rng_a);
        let b = generate_arrivals(&cfg, &mut rng_b);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.arrival_tick, y.arrival_tick);
            assert_eq!(x.service_time, y.service_time);
        }
    }
}
