use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::LoadTestConfig;
use crate::pool::{ResourceClient, ResourcePool};
use crate::report::{LoadTestReport, SnapshotRecord, WorkerEvent, WorkerSummary};
use crate::runner::{self, build_runner};
use crate::sink::SnapshotPublisher;

const RESULT_STREAM_DEPTH: usize = 1024;

/// Runs the whole load test: provisions the pool when enabled, fans out
/// one worker task per concurrency slot, drains the result stream until
/// every worker has signalled completion, recycles pooled identities
/// and assembles the final report.
pub async fn run(config: LoadTestConfig) -> Result<LoadTestReport> {
    let started = Instant::now();

    let pool = if config.use_pool {
        let client = runner::http_client(&config, false)?;
        let mut pool =
            ResourcePool::new(ResourceClient::new(client, config.pool_endpoint.clone()));
        pool.request(config.pool_size, &config.pool_name).await;
        if pool.is_empty() {
            warn!("resource pool is empty, pooled trials will fail");
        }
        Some(Arc::new(pool))
    } else {
        None
    };

    let (tx, mut rx) = mpsc::channel(RESULT_STREAM_DEPTH);
    let mut tasks = JoinSet::new();
    for worker_index in 0..config.concurrency {
        let config = config.clone();
        let pool = pool.clone();
        let tx = tx.clone();
        tasks.spawn(async move { run_worker(worker_index, config, pool, tx).await });
    }
    drop(tx);

    let mut publisher = SnapshotPublisher::new(&config)?;
    let mut stopped = 0;
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Snapshot(record) => {
                debug!(
                    worker = record.worker_index,
                    trials = record.trials_completed,
                    pass = record.pass_count,
                    fail = record.fail_count,
                    avg_ms = record.avg_latency_ms,
                    "snapshot"
                );
                publisher.publish(&record).await;
            }
            WorkerEvent::Completed { worker_index } => {
                debug!(worker = worker_index, "worker completed");
                stopped += 1;
                if stopped == config.concurrency {
                    break;
                }
            }
        }
    }

    let mut workers = Vec::with_capacity(config.concurrency);
    while let Some(joined) = tasks.join_next().await {
        let summary = joined.context("worker task join failed")??;
        workers.push(summary);
    }

    // All workers are done; the ring is read-only from here.
    if let Some(pool) = &pool {
        pool.release().await;
    }

    Ok(LoadTestReport::assemble(
        &config,
        workers,
        started.elapsed().as_millis(),
    ))
}

/// One worker: `Idle -> Setup -> run loop -> Draining -> Done`. A setup
/// failure is fatal for the run; a failed trial only bumps the fail
/// counter.
async fn run_worker(
    worker_index: usize,
    config: LoadTestConfig,
    pool: Option<Arc<ResourcePool>>,
    tx: mpsc::Sender<WorkerEvent>,
) -> Result<WorkerSummary> {
    let mut runner = build_runner(&config);
    runner
        .setup(worker_index, pool)
        .await
        .with_context(|| format!("worker {worker_index} setup failed"))?;

    let mut pass = 0u64;
    let mut fail = 0u64;
    let mut last_reported = 0u64;
    let started = Instant::now();
    let mut window_start = Instant::now();

    for trial in 0..config.repeat {
        match runner.run().await {
            Ok(()) => pass += 1,
            Err(err) => {
                warn!(worker = worker_index, %err, "trial failed");
                fail += 1;
            }
        }

        let completed = trial + 1;
        if completed % config.report_interval == 0 && completed < config.repeat {
            let record = snapshot(
                worker_index,
                completed,
                last_reported,
                &window_start,
                pass,
                fail,
            );
            let _ = tx.send(WorkerEvent::Snapshot(record)).await;
            last_reported = completed;
            window_start = Instant::now();
        }
    }

    // Flush whatever the last interval did not cover, then signal done.
    if last_reported < config.repeat {
        let record = snapshot(
            worker_index,
            config.repeat,
            last_reported,
            &window_start,
            pass,
            fail,
        );
        let _ = tx.send(WorkerEvent::Snapshot(record)).await;
    }
    let _ = tx.send(WorkerEvent::Completed { worker_index }).await;

    Ok(WorkerSummary {
        worker_index,
        trials_completed: config.repeat,
        pass_count: pass,
        fail_count: fail,
        duration_ms: started.elapsed().as_millis(),
    })
}

fn snapshot(
    worker_index: usize,
    completed: u64,
    last_reported: u64,
    window_start: &Instant,
    pass: u64,
    fail: u64,
) -> SnapshotRecord {
    let elapsed = window_start.elapsed();
    let delta = (completed - last_reported).max(1);
    SnapshotRecord {
        worker_index,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|t| t.as_secs() as i64)
            .unwrap_or_default(),
        elapsed_seconds: elapsed.as_secs(),
        avg_latency_ms: elapsed.as_millis() as u64 / delta,
        trials_completed: completed,
        pass_count: pass,
        fail_count: fail,
    }
}
