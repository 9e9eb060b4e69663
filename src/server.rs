//! Global credit-pool controller and lazy per-client distribution.
//!
//! `run_control_loop` performs additive-increase/multiplicative-decrease of
//! the total credit pool from observed delay; `lazy_distribution` is the
//! lazy per-client nudge that moves a client's window toward its fair share
//! between control-loop ticks.

use crate::clock::Tick;
use crate::config::Config;
use crate::task::ClientId;

/// The server's global credit pool and control-loop state.
#[derive(Debug)]
pub struct BreakwaterServer {
    pub total_credits: u64,
    pub credits_issued: u64,
    pub overcommitment_credits: u64,
    /// Max observed queue delay since the last control-loop invocation.
    max_delay_since_last: Tick,
    /// Registered clients, in registration order.
    pub registered_clients: Vec<ClientId>,
    /// Working core count as of the previous control-loop invocation, used
    /// to detect newly-added cores for `ramp_alpha`.
    prev_working_cores: usize,
    pub next_control_tick: Tick,
}

impl BreakwaterServer {
    pub fn new(cfg: &Config) -> Self {
        let initial_total = if cfg.initial_credits {
            cfg.effective_max_credits()
        } else {
            cfg.server_initial_credits
        };
        let initial_issued = if cfg.initial_credits && cfg.initial_credits_issued_equals_total {
            initial_total
        } else {
            0
        };
        Self {
            total_credits: initial_total,
            credits_issued: initial_issued,
            overcommitment_credits: 1,
            max_delay_since_last: 0,
            registered_clients: Vec::new(),
            prev_working_cores: 0,
            next_control_tick: cfg.rtt,
        }
    }

    pub fn register_client(&mut self, client: ClientId) {
        if !self.registered_clients.contains(&client) {
            self.registered_clients.push(client);
        }
    }

    pub fn deregister_client(&mut self, client: ClientId) {
        self.registered_clients.retain(|&c| c != client);
    }

    /// Feed in the worst delay observed on any queue this tick; the control
    /// loop uses the maximum seen across the whole interval since its last
    /// run.
    pub fn observe_delay(&mut self, delay: Tick) {
        if delay > self.max_delay_since_last {
            self.max_delay_since_last = delay;
        }
    }

    pub fn due(&self, now: Tick) -> bool {
        now >= self.next_control_tick
    }

    /// Run the additive-increase/multiplicative-decrease control loop.
    /// `working_cores` is the current count of non-parked workers, used
    /// only when `ramp_alpha` is enabled.
    pub fn run_control_loop(&mut self, cfg: &Config, now: Tick, working_cores: usize) {
        let d = self.max_delay_since_last;
        let d_t = cfg.breakwater_target_delay as f64;
        let alpha = cfg.breakwater_aggressiveness_alpha;
        let beta = cfg.breakwater_beta;
        let n = cfg.num_clients as f64;
        let max_credits = cfg.effective_max_credits();
        let min_credits = cfg.effective_min_credits();

        if (d as f64) < d_t {
            let base_increase = (alpha * n).floor().max(1.0) as u64;
            let mut increase = base_increase;
            if cfg.ramp_alpha && working_cores > self.prev_working_cores {
                let newly_added = (working_cores - self.prev_working_cores) as u64;
                let per_core_increase = cfg.per_core_alpha_increase
                    + (1.0 - (cfg.rtt / 5000) as f64) * 5.0;
                increase += (per_core_increase * newly_added as f64).max(0.0) as u64;
            }
            self.total_credits = max_credits.min(self.total_credits + increase);
        } else {
            let r = (1.0 - beta * (d as f64 - d_t) / d_t).max(0.5);
            let decreased = (self.total_credits as f64 * r).floor() as u64;
            self.total_credits = min_credits.max(decreased);
        }

        let n_clients = cfg.num_clients.max(1) as i64;
        let available = self.total_credits as i64 - self.credits_issued as i64;
        self.overcommitment_credits = (available / n_clients).max(1) as u64;

        self.prev_working_cores = working_cores;
        self.max_delay_since_last = 0;
        self.next_control_tick = now + cfg.rtt;
    }

    /// Lazy per-client window adjustment. Returns the new window and the
    /// delta applied to `credits_issued`, or `None` if `available == 0`
    /// (no change).
    pub fn lazy_distribution(&mut self, current_window: u64, demand: u64) -> Option<(u64, i64)> {
        let available = self.total_credits as i64 - self.credits_issued as i64;
        if available == 0 {
            return None;
        }
        let target = demand as i64 + self.overcommitment_credits as i64;
        let cx_new = if available > 0 {
            target.min(current_window as i64 + available)
        } else {
            target.min(current_window as i64 - 1)
        };
        let cx_new = cx_new.max(0) as u64;
        let delta = cx_new as i64 - current_window as i64;
        self.credits_issued = (self.credits_issued as i64 + delta).max(0) as u64;
        Some((cx_new, delta))
    }

    /// Correct `credits_issued` when a client could only apply part of a
    /// `lazy_distribution` move, since in-flight credits cannot be revoked
    /// before their tasks complete, so the credit-accounting invariant
    /// (total window across clients equals credits issued) holds exactly
    /// at every tick.
    pub fn correct_issued(&mut self, delta: i64) {
        self.credits_issued = (self.credits_issued as i64 + delta).max(0) as u64;
    }
}
