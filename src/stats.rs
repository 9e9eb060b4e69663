//! Trace streams and the collector that populates them.
//!
//! One plain `serde::Serialize` record struct per measurement stream,
//! collected into `Vec<Record>` buffers, with a percentile helper for
//! latency summaries. Nine distinct streams sit behind one small
//! `TraceSink` trait so a caller can swap an in-memory `VecTraceSink` (used
//! by tests and by replay capture) for a `JsonTraceSink` that streams
//! straight to disk.

use serde::{Deserialize, Serialize};

use crate::clock::Tick;
use crate::error::SimResult;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TaskTimesRecord {
    pub arrival_time: Tick,
    pub time_in_system: Tick,
    pub total_queue_length_at_admit: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CreditPoolRecord {
    pub time: Tick,
    pub total_credits: u64,
    pub credits_issued: u64,
    pub overcommitment_credits: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CoresOverTimeRecord {
    pub time: Tick,
    pub available_queues: usize,
    pub active_threads: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThroughputRecord {
    pub time: Tick,
    pub throughput_per_second: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DropsRecord {
    pub time: Tick,
    pub c_dropped: u64,
    pub system_tasks: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CoreDeallocationsRecord {
    pub time: Tick,
    pub available_queues: usize,
    pub total_credits: u64,
    pub max_delay: Tick,
    pub max_delay_queue_id: usize,
    pub max_length: usize,
    pub max_length_queue_id: usize,
    pub system_tasks: usize,
    pub client0_window: u64,
    pub client0_c_in_use: u64,
    pub client0_dropped_credits: u64,
    pub client0_demand: usize,
    pub client0_pending_len: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct BreakwaterInfoRecord {
    pub dropped: u64,
    pub timed_out: u64,
}

/// One entry in the `realloc_schedule` stream: whether this was a park (vs.
/// unpark) decision, whether the controller actually acted on it, which
/// thread it acted on, and the system state at the time. `thread` is only
/// meaningful when `attempted` is set; a `ConsideredNoop` decision records
/// `0` there as a placeholder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReallocScheduleRecord {
    pub time: Tick,
    pub is_park: bool,
    pub attempted: bool,
    pub thread: usize,
    pub queue_occupancy: usize,
    pub work_in_system: usize,
    pub buffer_cores: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WsCheckRecord {
    pub local_id: usize,
    pub remote_id: usize,
    pub since_last_check: Tick,
    pub remote_len: usize,
    pub check_count: u64,
    pub succeeded: bool,
}

/// Destination for trace records. The engine only ever pushes records;
/// where they end up is the caller's decision.
pub trait TraceSink {
    fn task_times(&mut self, record: TaskTimesRecord);
    fn credit_pool(&mut self, record: CreditPoolRecord);
    fn cores_over_time(&mut self, record: CoresOverTimeRecord);
    fn throughput(&mut self, record: ThroughputRecord);
    fn drops(&mut self, record: DropsRecord);
    fn core_deallocations(&mut self, record: CoreDeallocationsRecord);
    fn realloc_schedule(&mut self, record: ReallocScheduleRecord);
    fn ws_check(&mut self, record: WsCheckRecord);
    fn finish(&mut self, breakwater_info: BreakwaterInfoRecord) -> SimResult<()>;
}

/// In-memory sink: the default for tests, for replay capture, and for any
/// caller that wants to inspect a run's traces without touching disk.
#[derive(Debug, Default)]
pub struct VecTraceSink {
    pub task_times: Vec<TaskTimesRecord>,
    pub credit_pool: Vec<CreditPoolRecord>,
    pub cores_over_time: Vec<CoresOverTimeRecord>,
    pub throughput: Vec<ThroughputRecord>,
    pub drops: Vec<DropsRecord>,
    pub core_deallocations: Vec<CoreDeallocationsRecord>,
    pub realloc_schedule: Vec<ReallocScheduleRecord>,
    pub ws_checks: Vec<WsCheckRecord>,
    pub breakwater_info: BreakwaterInfoRecord,
}

impl TraceSink for VecTraceSink {
    fn task_times(&mut self, record: TaskTimesRecord) {
        self.task_times.push(record);
    }

    fn credit_pool(&mut self, record: CreditPoolRecord) {
        self.credit_pool.push(record);
    }

    fn cores_over_time(&mut self, record: CoresOverTimeRecord) {
        self.cores_over_time.push(record);
    }

    fn throughput(&mut self, record: ThroughputRecord) {
        self.throughput.push(record);
    }

    fn drops(&mut self, record: DropsRecord) {
        self.drops.push(record);
    }

    fn core_deallocations(&mut self, record: CoreDeallocationsRecord) {
        self.core_deallocations.push(record);
    }

    fn realloc_schedule(&mut self, record: ReallocScheduleRecord) {
        self.realloc_schedule.push(record);
    }

    fn ws_check(&mut self, record: WsCheckRecord) {
        self.ws_checks.push(record);
    }

    fn finish(&mut self, breakwater_info: BreakwaterInfoRecord) -> SimResult<()> {
        self.breakwater_info = breakwater_info;
        Ok(())
    }
}

/// Streams each record stream to its own newline-delimited JSON file as it
/// arrives, so a run's memory footprint does not grow with trace volume.
pub struct JsonTraceSink<W: std::io::Write> {
    task_times: W,
    credit_pool: W,
    cores_over_time: W,
    throughput: W,
    drops: W,
    core_deallocations: W,
    realloc_schedule: W,
    ws_checks: W,
    breakwater_info: W,
}

impl<W: std::io::Write> JsonTraceSink<W> {
    pub fn new(
        task_times: W,
        credit_pool: W,
        cores_over_time: W,
        throughput: W,
        drops: W,
        core_deallocations: W,
        realloc_schedule: W,
        ws_checks: W,
        breakwater_info: W,
    ) -> Self {
        Self {
            task_times,
            credit_pool,
            cores_over_time,
            throughput,
            drops,
            core_deallocations,
            realloc_schedule,
            ws_checks,
            breakwater_info,
        }
    }

    fn write_line(writer: &mut W, record: &impl Serialize) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(writer, "{line}");
        }
    }
}

impl<W: std::io::Write> TraceSink for JsonTraceSink<W> {
    fn task_times(&mut self, record: TaskTimesRecord) {
        Self::write_line(&mut self.task_times, &record);
    }

    fn credit_pool(&mut self, record: CreditPoolRecord) {
        Self::write_line(&mut self.credit_pool, &record);
    }

    fn cores_over_time(&mut self, record: CoresOverTimeRecord) {
        Self::write_line(&mut self.cores_over_time, &record);
    }

    fn throughput(&mut self, record: ThroughputRecord) {
        Self::write_line(&mut self.throughput, &record);
    }

    fn drops(&mut self, record: DropsRecord) {
        Self::write_line(&mut self.drops, &record);
    }

    fn core_deallocations(&mut self, record: CoreDeallocationsRecord) {
        Self::write_line(&mut self.core_deallocations, &record);
    }

    fn realloc_schedule(&mut self, record: ReallocScheduleRecord) {
        Self::write_line(&mut self.realloc_schedule, &record);
    }

    fn ws_check(&mut self, record: WsCheckRecord) {
        Self::write_line(&mut self.ws_checks, &record);
    }

    fn finish(&mut self, breakwater_info: BreakwaterInfoRecord) -> SimResult<()> {
        Self::write_line(&mut self.breakwater_info, &breakwater_info);
        self.task_times.flush()?;
        self.credit_pool.flush()?;
        self.cores_over_time.flush()?;
        self.throughput.flush()?;
        self.drops.flush()?;
        self.core_deallocations.flush()?;
        self.realloc_schedule.flush()?;
        self.ws_checks.flush()?;
        self.breakwater_info.flush()?;
        Ok(())
    }
}

/// Percentile over a sorted latency sample, linear-interpolated between the
/// two nearest ranks.
pub fn percentile(sorted_ticks: &[Tick], pct: f64) -> Tick {
    if sorted_ticks.is_empty() {
        return 0;
    }
    let rank = (pct / 100.0) * (sorted_ticks.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted_ticks[lower]
    } else {
        let frac = rank - lower as f64;
        let lo = sorted_ticks[lower] as f64;
        let hi = sorted_ticks[upper] as f64;
        (lo + (hi - lo) * frac) as Tick
    }
}

/// Running counters that do not belong to any one trace stream but feed the
/// testable conservation-of-tasks property.
#[derive(Debug, Default)]
pub struct Counters {
    pub generated: u64,
    pub completed: u64,
    pub dropped: u64,
    pub timed_out: u64,
}

impl Counters {
    pub fn pending_in_flight(&self, total_generated: u64) -> u64 {
        total_generated
            .saturating_sub(self.completed)
            .saturating_sub(self.dropped)
    }

    /// Conservation of tasks: every generated task is, at any point, exactly
    /// one of completed, dropped, or still in flight.
    pub fn conserves(&self, total_generated: u64) -> bool {
        self.completed + self.dropped + self.pending_in_flight(total_generated) == total_generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_on_single_element() {
        assert_eq!(percentile(&[42], 50.0), 42);
    }

    #[test]
    fn percentile_interpolates() {
        let data = [10, 20, 30, 40];
        assert_eq!(percentile(&data, 0.0), 10);
        assert_eq!(percentile(&data, 100.0), 40);
        assert_eq!(percentile(&data, 50.0), 25);
    }

    #[test]
    fn counters_conserve_tasks() {
        let counters = Counters {
            generated: 100,
            completed: 80,
            dropped: 15,
            timed_out: 0,
        };
        assert!(counters.conserves(100));
    }

    #[test]
    fn vec_sink_accumulates_records() {
        let mut sink = VecTraceSink::default();
        sink.task_times(TaskTimesRecord {
            arrival_time: 0,
            time_in_system: 10,
            total_queue_length_at_admit: 2,
        });
        sink.finish(BreakwaterInfoRecord { dropped: 1, timed_out: 0 }).unwrap();
        assert_eq!(sink.task_times.len(), 1);
        assert_eq!(sink.breakwater_info.dropped, 1);
    }
}
