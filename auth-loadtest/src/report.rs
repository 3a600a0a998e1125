use serde::{Deserialize, Serialize};

use crate::config::{AuthProtocol, LoadTestConfig};

/// Periodic aggregate emitted by one worker on the shared result stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub worker_index: usize,
    /// Unix seconds at emission time.
    pub timestamp: i64,
    /// Wall-clock seconds since the previous report from this worker.
    pub elapsed_seconds: u64,
    /// Average per-trial latency over the reporting window.
    pub avg_latency_ms: u64,
    pub trials_completed: u64,
    pub pass_count: u64,
    pub fail_count: u64,
}

/// What workers put on the result stream. `Completed` is the
/// end-of-worker sentinel; the consumer stops after seeing one per
/// worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Snapshot(SnapshotRecord),
    Completed { worker_index: usize },
}

/// Final per-worker tally, returned when the worker task joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_index: usize,
    pub trials_completed: u64,
    pub pass_count: u64,
    pub fail_count: u64,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub protocol: AuthProtocol,
    pub concurrency: usize,
    pub repeat: u64,
    pub report_interval: u64,
    pub timeout_ms: u64,
    pub use_pool: bool,
    pub pool_size: usize,
    pub logout: bool,
}

impl From<&LoadTestConfig> for RunConfigSnapshot {
    fn from(config: &LoadTestConfig) -> Self {
        Self {
            protocol: config.protocol,
            concurrency: config.concurrency,
            repeat: config.repeat,
            report_interval: config.report_interval,
            timeout_ms: config.timeout_ms,
            use_pool: config.use_pool,
            pool_size: config.pool_size,
            logout: config.logout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Totals {
    pub planned_workers: usize,
    pub completed_workers: usize,
    pub trials: u64,
    pub pass: u64,
    pub fail: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub duration_ms: u128,
    pub throughput_per_sec: f64,
    pub failure_rate: f64,
}

/// Aggregate run report. Trial failures are a measurement here, not an
/// error condition; the run is complete as long as every worker
/// finished its loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub config: RunConfigSnapshot,
    pub totals: Totals,
    pub stats: RuntimeStats,
    pub workers: Vec<WorkerSummary>,
}

impl LoadTestReport {
    pub fn assemble(
        config: &LoadTestConfig,
        mut workers: Vec<WorkerSummary>,
        duration_ms: u128,
    ) -> Self {
        workers.sort_by_key(|worker| worker.worker_index);

        let trials = workers.iter().map(|w| w.trials_completed).sum::<u64>();
        let pass = workers.iter().map(|w| w.pass_count).sum::<u64>();
        let fail = workers.iter().map(|w| w.fail_count).sum::<u64>();
        let duration_secs = (duration_ms as f64 / 1000.0).max(1e-9);

        Self {
            config: RunConfigSnapshot::from(config),
            totals: Totals {
                planned_workers: config.concurrency,
                completed_workers: workers.len(),
                trials,
                pass,
                fail,
            },
            stats: RuntimeStats {
                duration_ms,
                throughput_per_sec: trials as f64 / duration_secs,
                failure_rate: if trials == 0 {
                    0.0
                } else {
                    fail as f64 / trials as f64
                },
            },
            workers,
        }
    }

    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("auth load test report\n");
        output.push_str(&format!(
            "mode: protocol={:?}, pool={}\n",
            self.config.protocol, self.config.use_pool
        ));
        output.push_str(&format!(
            "workers: planned={}, completed={}\n",
            self.totals.planned_workers, self.totals.completed_workers
        ));
        output.push_str(&format!(
            "trials: total={}, pass={}, fail={} (failure rate {:.2}%)\n",
            self.totals.trials,
            self.totals.pass,
            self.totals.fail,
            self.stats.failure_rate * 100.0
        ));
        output.push_str(&format!(
            "timing: duration={}ms throughput={:.2}/s\n",
            self.stats.duration_ms, self.stats.throughput_per_sec
        ));
        for worker in &self.workers {
            output.push_str(&format!(
                "worker {}: trials={}, pass={}, fail={}, took={}ms\n",
                worker.worker_index,
                worker.trials_completed,
                worker.pass_count,
                worker.fail_count,
                worker.duration_ms
            ));
        }
        output
    }
}
