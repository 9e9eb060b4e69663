//! Frozen configuration record consumed by the engine.
//!
//! Loading configuration from a file, environment, or CLI flags is an
//! external collaborator's job; this module only defines the shape of the
//! record the engine accepts and the validation a configuration must pass
//! before a run starts. `Config` derives `serde::{Serialize, Deserialize}`
//! so that collaborator can hand it a value parsed from JSON or YAML rather
//! than parsing inline.

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// How service times are drawn for generated tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTimeModel {
    /// Every task takes exactly `AVERAGE_SERVICE_TIME` ticks.
    Constant,
    /// Exponentially distributed with mean `AVERAGE_SERVICE_TIME`.
    Exponential,
    /// 9:1 mixture of `500` and `5500` ticks, independent of
    /// `AVERAGE_SERVICE_TIME`.
    Bimodal,
}

/// Which candidate-selection policy a parked/searching worker uses when
/// picking a remote queue to attempt a steal from. The variants share a
/// small interface so the allocator can dispatch on them uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StealPolicy {
    Random,
    RoundRobin,
    /// Target a queue whose delay raised a work-steal flag.
    Flagged,
}

/// A load-shift schedule, or none. The two concrete variants share a
/// `next_rate(now)`-shaped interface; as a closed, config-driven set they
/// are modeled here as a tagged enum rather than a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadShift {
    /// No load shifting: a single constant arrival rate for the whole run.
    None,
    /// Four equal-length phases over `sim_duration`, with relative load
    /// multipliers `[1.0, 0.2, 0.5, 1.4]`.
    OverTime,
    /// Toggle between two relative loads every `rtt_multiple * RTT` ticks.
    ByRtt,
}

/// Frozen simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- run identity / reproducibility ---
    /// Used to derive the RNG seed deterministically.
    pub name: String,

    // --- clock / horizon ---
    pub sim_duration: u64,

    // --- workers / queues ---
    pub num_threads: usize,
    pub num_queues: usize,
    /// Length-`num_threads` vector of queue ids each worker is bound to.
    pub mapping: Vec<usize>,

    // --- load shape ---
    pub avg_system_load: f64,
    pub average_service_time: f64,
    pub load_thread_count: usize,
    pub service_time_model: ServiceTimeModel,
    pub regular_arrivals: bool,
    pub load_shift: LoadShift,
    /// Multiple of RTT between load toggles under `LoadShift::ByRtt`.
    pub load_shift_rtt_multiple: u64,

    // --- work stealing ---
    pub steal_policy: StealPolicy,
    /// Ticks charged per failed steal attempt.
    pub work_search_time: u64,
    /// Minimum ticks a worker must search before it is allowed to park.
    pub minimum_work_search_time: u64,
    pub delay_flagging_enabled: bool,
    /// A queue's delay, in ticks, above which it raises a work-steal flag.
    pub flag_delay_threshold: u64,

    // --- breakwater server ---
    pub breakwater_enabled: bool,
    pub rtt: u64,
    pub breakwater_target_delay: u64,
    pub breakwater_aggressiveness_alpha: f64,
    pub breakwater_beta: f64,
    pub max_credits: u64,
    pub min_credits: u64,
    pub server_initial_credits: u64,
    pub variable_max_credits: bool,
    pub variable_min_credits: bool,
    pub initial_credits: bool,
    /// When `initial_credits` is set, whether `credits_issued` starts at
    /// `total_credits` (`true`) or `0` (`false`, default).
    pub initial_credits_issued_equals_total: bool,
    pub zero_initial_cores: bool,
    pub ramp_alpha: bool,
    pub per_core_alpha_increase: f64,
    /// Whether the extra per-control-loop `lazy_distribution(0)` nudge
    /// fires for every client in multi-client configurations, or only
    /// client 0 (default).
    pub lazy_distribution_fires_for_all_clients: bool,
    /// Whether clients may deregister when their demand drops to zero.
    pub client_deregistration_enabled: bool,
    pub aqm_enabled: bool,

    // --- clients ---
    pub num_clients: usize,

    // --- buffer cores / core allocation ---
    pub buffer_cores_enabled: bool,
    pub buffer_core_count_min: Option<usize>,
    pub buffer_core_count_max: Option<usize>,
    pub buffer_core_pct_min: Option<f64>,
    pub buffer_core_pct_max: Option<f64>,
    pub enqueue_choice: bool,
    pub allocation_delay_enabled: bool,
    pub allocation_delay_ticks: u64,

    // --- delay-range / reallocation thresholds ---
    pub delay_range_enabled: bool,
    pub allocation_threshold: u64,
    pub reallocation_threshold_max: u64,
    pub delay_range_by_service_time: bool,

    // --- replay ---
    pub reallocation_replay: bool,
    pub reallocation_record: Option<String>,

    // --- trace recording toggles ---
    pub record_task_times: bool,
    pub record_credit_pool: bool,
    pub record_cores_over_time: bool,
    pub record_throughput: bool,
    pub record_drops: bool,
    pub record_core_deallocations: bool,
    pub record_breakwater_info: bool,
    pub record_allocations: bool,
    pub record_steals: bool,
    pub record_cores_at_drops: bool,

    /// Task exceeding `arrival -> completion` by this many ticks is counted
    /// as timed out.
    pub slo_ticks: u64,

    /// Sampling period, in ticks, for periodic metrics.
    pub metrics_sample_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "unnamed-run".to_string(),
            sim_duration: 1_000_000,
            num_threads: 4,
            num_queues: 4,
            mapping: (0..4).collect(),
            avg_system_load: 0.5,
            average_service_time: 1000.0,
            load_thread_count: 4,
            service_time_model: ServiceTimeModel::Exponential,
            regular_arrivals: false,
            load_shift: LoadShift::None,
            load_shift_rtt_multiple: 15,
            steal_policy: StealPolicy::Random,
            work_search_time: 50,
            minimum_work_search_time: 200,
            delay_flagging_enabled: false,
            flag_delay_threshold: 20_000,
            breakwater_enabled: true,
            rtt: 5000,
            breakwater_target_delay: 10_000,
            breakwater_aggressiveness_alpha: 0.5,
            breakwater_beta: 0.5,
            max_credits: 500,
            min_credits: 1,
            server_initial_credits: 50,
            variable_max_credits: false,
            variable_min_credits: false,
            initial_credits: false,
            initial_credits_issued_equals_total: false,
            zero_initial_cores: false,
            ramp_alpha: false,
            per_core_alpha_increase: 5.0,
            lazy_distribution_fires_for_all_clients: false,
            client_deregistration_enabled: false,
            aqm_enabled: true,
            num_clients: 1,
            buffer_cores_enabled: false,
            buffer_core_count_min: Some(1),
            buffer_core_count_max: None,
            buffer_core_pct_min: None,
            buffer_core_pct_max: Some(25.0),
            enqueue_choice: false,
            allocation_delay_enabled: false,
            allocation_delay_ticks: 500,
            delay_range_enabled: false,
            allocation_threshold: 20_000,
            reallocation_threshold_max: 15_000,
            delay_range_by_service_time: false,
            reallocation_replay: false,
            reallocation_record: None,
            record_task_times: true,
            record_credit_pool: true,
            record_cores_over_time: true,
            record_throughput: true,
            record_drops: true,
            record_core_deallocations: true,
            record_breakwater_info: true,
            record_allocations: true,
            record_steals: false,
            record_cores_at_drops: false,
            slo_ticks: 50_000,
            metrics_sample_interval: 1000,
        }
    }
}

impl Config {
    /// Configuration-invalid checks: fails fast at startup, never mid-run.
    pub fn validate(&self) -> Result<(), SimError> {
        let err = |msg: String| Err(SimError::InvalidConfig(msg));

        if self.num_threads == 0 {
            return err("num_threads must be > 0".to_string());
        }
        if self.num_queues == 0 {
            return err("num_queues must be > 0".to_string());
        }
        if self.mapping.len() != self.num_threads {
            return err(format!(
                "mapping length {} must equal num_threads {}",
                self.mapping.len(),
                self.num_threads
            ));
        }
        if let Some(&bad) = self.mapping.iter().find(|&&q| q >= self.num_queues) {
            return err(format!(
                "mapping references queue {bad} but num_queues is {}",
                self.num_queues
            ));
        }
        if self.avg_system_load <= 0.0 {
            return err("avg_system_load must be > 0".to_string());
        }
        if self.average_service_time <= 0.0 {
            return err("average_service_time must be > 0".to_string());
        }
        if self.breakwater_enabled && self.num_clients == 0 {
            return err("num_clients must be > 0 when breakwater is enabled".to_string());
        }
        if self.breakwater_enabled && self.rtt == 0 {
            return err("rtt must be > 0 when breakwater is enabled".to_string());
        }
        if self.min_credits > self.max_credits {
            return err(format!(
                "min_credits ({}) must not exceed max_credits ({})",
                self.min_credits, self.max_credits
            ));
        }
        if self.reallocation_replay && self.reallocation_record.is_none() {
            return err("reallocation_replay requires reallocation_record".to_string());
        }
        Ok(())
    }

    /// Either a constant from config, or
    /// `25 + ⌊RTT/5000⌋·150 + ⌊target_delay/100⌋ + 150` when
    /// `variable_max_credits` is set.
    pub fn effective_max_credits(&self) -> u64 {
        if self.variable_max_credits {
            25 + (self.rtt / 5000) * 150 + (self.breakwater_target_delay / 100) + 150
        } else {
            self.max_credits
        }
    }

    /// Either a constant from config, or
    /// `max(MIN_CREDITS, ⌊RTT/5000⌋·19)` when `variable_min_credits` is set.
    pub fn effective_min_credits(&self) -> u64 {
        if self.variable_min_credits {
            self.min_credits.max((self.rtt / 5000) * 19)
        } else {
            self.min_credits
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn mismatched_mapping_is_rejected() {
        let mut cfg = Config::default();
        cfg.mapping = vec![0, 1];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn replay_without_record_is_rejected() {
        let mut cfg = Config::default();
        cfg.reallocation_replay = true;
        cfg.reallocation_record = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn variable_max_credits_formula() {
        let mut cfg = Config::default();
        cfg.variable_max_credits = true;
        cfg.rtt = 10_000;
        cfg.breakwater_target_delay = 10_000;
        assert_eq!(cfg.effective_max_credits(), 25 + 300 + 100 + 150);
    }
}
