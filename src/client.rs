//! Client-side Breakwater bookkeeping: credit window, spend, and AQM.
//!
//! `spend_credits` pops one pending task, provisionally commits a credit to
//! it, then checks AQM (max observed queue delay against twice the target
//! delay) before actually enqueuing it onto a core, rolling the credit back
//! and counting a drop if the check fails. Admission is one decision per
//! call; the stepping loop's per-tick client-control phase calls it
//! repeatedly until a client runs out of backlog or unused credit.
//! `reconcile_window` is the server's lazy-distribution nudge: it moves
//! `c_unused` toward the server's newly computed target window without
//! itself attempting an admission, since the same tick's client-control
//! phase will drain whatever credit that leaves behind.

use crate::clock::Tick;
use crate::task::ClientId;

/// One client's Breakwater credit window.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    /// Credits granted by the server but not yet spent on an admitted task.
    pub c_unused: u64,
    /// Credits currently backing tasks in flight (admitted, not completed).
    pub c_in_use: u64,
    /// Tasks this client wants to send but has not yet been able to admit
    /// for lack of credit; FIFO order of arrival.
    pub backlog: std::collections::VecDeque<PendingDemand>,
    /// Set when `client_deregistration_enabled` and this client's demand has
    /// dropped to zero; the registry may drop it from the active set.
    pub deregistered: bool,
    pub dropped_count: u64,
}

/// A task a client wants to send, queued client-side until credit admits it.
#[derive(Debug, Clone, Copy)]
pub struct PendingDemand {
    pub arrival_tick: Tick,
    pub service_time: Tick,
}

/// Outcome of one `spend_credits` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendOutcome {
    /// Nothing pending to admit.
    NoDemand,
    /// Pending work exists but no unused credit to spend on it.
    NoCredit,
    /// Credit committed, AQM passed: `PendingDemand` is ready to enqueue.
    Admitted(PendingDemand),
    /// Credit was provisionally committed then rolled back: AQM rejected
    /// the attempt and the task is lost, not retried.
    Dropped,
}

impl Client {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            c_unused: 0,
            c_in_use: 0,
            backlog: std::collections::VecDeque::new(),
            deregistered: false,
            dropped_count: 0,
        }
    }

    /// Total window size: credits granted and not yet returned, whether
    /// spent or idle.
    pub fn window(&self) -> u64 {
        self.c_in_use + self.c_unused
    }

    pub fn queue_demand(&mut self, demand: PendingDemand) {
        self.backlog.push_back(demand);
    }

    /// Pop the head of the backlog, commit a credit to it, then apply AQM:
    /// refuse and roll back once the worst observed queue delay already
    /// exceeds twice the target delay. One decision per call; a rejected
    /// task is not retried.
    pub fn spend_credits(&mut self, max_delay: Tick, target_delay: Tick, aqm_enabled: bool) -> SpendOutcome {
        if self.backlog.is_empty() {
            return SpendOutcome::NoDemand;
        }
        if self.c_unused == 0 {
            return SpendOutcome::NoCredit;
        }
        let demand = self.backlog.pop_front().expect("checked non-empty above");
        self.c_unused -= 1;
        self.c_in_use += 1;

        if !aqm_enabled || max_delay <= 2 * target_delay {
            SpendOutcome::Admitted(demand)
        } else {
            self.c_unused += 1;
            self.c_in_use -= 1;
            self.dropped_count += 1;
            SpendOutcome::Dropped
        }
    }

    /// Called when an admitted task completes: returns its credit to the
    /// pool by decrementing `c_in_use` (the credit itself is reclaimed by
    /// the server, not reissued here).
    pub fn release_credit(&mut self) {
        self.c_in_use = self.c_in_use.saturating_sub(1);
    }

    /// The server may move this client's window asynchronously; the client
    /// reconciles by adjusting `c_unused` so that `c_in_use + c_unused`
    /// tracks the server's new target as closely as outstanding in-flight
    /// credits allow. Returns the actual change in `window()`, which can
    /// fall short of the requested move when `target_window < c_in_use`
    /// (credits already spent cannot be revoked before their tasks
    /// complete).
    pub fn reconcile_window(&mut self, target_window: u64) -> i64 {
        let before = self.window() as i64;
        self.c_unused = target_window.saturating_sub(self.c_in_use);
        self.window() as i64 - before
    }

    pub fn has_demand(&self) -> bool {
        !self.backlog.is_empty() || self.c_in_use > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_credits_admits_one_task_per_call() {
        let mut c = Client::new(ClientId(0));
        c.c_unused = 2;
        c.queue_demand(PendingDemand { arrival_tick: 0, service_time: 10 });
        c.queue_demand(PendingDemand { arrival_tick: 1, service_time: 10 });
        c.queue_demand(PendingDemand { arrival_tick: 2, service_time: 10 });

        assert!(matches!(c.spend_credits(0, 1000, true), SpendOutcome::Admitted(_)));
        assert_eq!(c.c_unused, 1);
        assert_eq!(c.c_in_use, 1);
        assert!(matches!(c.spend_credits(0, 1000, true), SpendOutcome::Admitted(_)));
        assert_eq!(c.c_unused, 0);
        assert_eq!(c.spend_credits(0, 1000, true), SpendOutcome::NoCredit);
        assert_eq!(c.backlog.len(), 1);
    }

    #[test]
    fn aqm_blocks_admission_past_twice_target_delay_and_rolls_back() {
        let mut c = Client::new(ClientId(0));
        c.c_unused = 5;
        c.queue_demand(PendingDemand { arrival_tick: 0, service_time: 10 });

        let outcome = c.spend_credits(2001, 1000, true);
        assert_eq!(outcome, SpendOutcome::Dropped);
        assert_eq!(c.c_unused, 5);
        assert_eq!(c.c_in_use, 0);
        assert_eq!(c.dropped_count, 1);
        assert!(c.backlog.is_empty(), "dropped task is not retried");
    }

    #[test]
    fn aqm_disabled_always_admits() {
        let mut c = Client::new(ClientId(0));
        c.c_unused = 1;
        c.queue_demand(PendingDemand { arrival_tick: 0, service_time: 10 });
        assert!(matches!(c.spend_credits(999_999, 1000, false), SpendOutcome::Admitted(_)));
    }

    #[test]
    fn window_sums_in_use_and_unused() {
        let mut c = Client::new(ClientId(0));
        c.c_unused = 3;
        c.c_in_use = 4;
        assert_eq!(c.window(), 7);
    }

    #[test]
    fn no_demand_reported_separately_from_no_credit() {
        let mut c = Client::new(ClientId(0));
        assert_eq!(c.spend_credits(0, 1000, true), SpendOutcome::NoDemand);
        c.queue_demand(PendingDemand { arrival_tick: 0, service_time: 10 });
        assert_eq!(c.spend_credits(0, 1000, true), SpendOutcome::NoCredit);
    }
}
