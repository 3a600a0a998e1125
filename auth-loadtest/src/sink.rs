//! Result Sink Adapter: turns snapshot records into the metrics-backend
//! message contract and forwards them best-effort. Delivery failures are
//! logged, never raised; metric loss is acceptable by design.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LoadTestConfig;
use crate::report::SnapshotRecord;
use crate::runner;

pub const PASS_SERIES: &str = "result_pass_count";
pub const FAIL_SERIES: &str = "result_fail_count";
pub const API_TIME_SERIES: &str = "result_api_time";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSeries {
    pub category: String,
    pub labels: Vec<HashMap<String, String>>,
    pub values: Vec<f64>,
    pub description: String,
}

/// One message per snapshot record: job name, timestamp and the three
/// named series, each holding the latest value per worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub job: String,
    pub time: i64,
    pub data: Vec<SnapshotSeries>,
}

pub struct SnapshotPublisher {
    job: String,
    labels: Vec<HashMap<String, String>>,
    pass: Vec<f64>,
    fail: Vec<f64>,
    api_time: Vec<f64>,
    push: Option<(reqwest::Client, String)>,
}

impl SnapshotPublisher {
    pub fn new(config: &LoadTestConfig) -> anyhow::Result<Self> {
        let workers = config.concurrency;
        let labels = (0..workers)
            .map(|i| HashMap::from([("worker".to_string(), format!("worker-{i}"))]))
            .collect();
        let push = match &config.push_url {
            Some(url) => Some((runner::http_client(config, false)?, url.clone())),
            None => None,
        };
        Ok(Self {
            job: config.push_job.clone(),
            labels,
            pass: vec![0.0; workers],
            fail: vec![0.0; workers],
            api_time: vec![0.0; workers],
            push,
        })
    }

    /// Folds the record into the per-worker series and builds the
    /// outgoing message.
    pub fn message(&mut self, record: &SnapshotRecord) -> SnapshotMessage {
        let idx = record.worker_index;
        if let (Some(pass), Some(fail), Some(api_time)) = (
            self.pass.get_mut(idx),
            self.fail.get_mut(idx),
            self.api_time.get_mut(idx),
        ) {
            *pass = record.pass_count as f64;
            *fail = record.fail_count as f64;
            *api_time = record.avg_latency_ms as f64;
        }

        SnapshotMessage {
            job: self.job.clone(),
            time: record.timestamp,
            data: vec![
                SnapshotSeries {
                    category: PASS_SERIES.to_string(),
                    labels: self.labels.clone(),
                    values: self.pass.clone(),
                    description: "total pass result".to_string(),
                },
                SnapshotSeries {
                    category: FAIL_SERIES.to_string(),
                    labels: self.labels.clone(),
                    values: self.fail.clone(),
                    description: "total fail result".to_string(),
                },
                SnapshotSeries {
                    category: API_TIME_SERIES.to_string(),
                    labels: self.labels.clone(),
                    values: self.api_time.clone(),
                    description: "api time".to_string(),
                },
            ],
        }
    }

    /// Forwards one record. Best-effort: push errors are logged and
    /// dropped. Without a push endpoint the message is only traced.
    pub async fn publish(&mut self, record: &SnapshotRecord) {
        let message = self.message(record);
        match &self.push {
            Some((client, url)) => {
                let sent = client.post(url).json(&message).send().await;
                match sent {
                    Ok(resp) if !resp.status().is_success() => {
                        warn!(status = %resp.status(), url, "snapshot push rejected");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(%err, url, "snapshot push failed"),
                }
            }
            None => debug!(?message, "snapshot (push disabled)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{AuthProtocol, LoadTestConfig};
    use crate::report::SnapshotRecord;

    use super::{SnapshotPublisher, API_TIME_SERIES, FAIL_SERIES, PASS_SERIES};

    fn config(workers: usize) -> LoadTestConfig {
        LoadTestConfig {
            protocol: AuthProtocol::RestLogin,
            url: Some("https://ac.example.com/api/v1/auth/".to_string()),
            auth_server: None,
            user_prefix: "perftest".to_string(),
            password: "secret".to_string(),
            concurrency: workers,
            repeat: 10,
            report_interval: 5,
            timeout_ms: 1000,
            logout: false,
            disable_ssl_verify: false,
            close_connection: false,
            use_pool: false,
            pool_endpoint: String::new(),
            pool_name: String::new(),
            pool_size: 0,
            user_slice: 500,
            admin_user: "admin".to_string(),
            admin_token: "token".to_string(),
            oauth_client_id: String::new(),
            oauth_client_secret: String::new(),
            oauth_grant_type: "password".to_string(),
            otp_hold_min_secs: 0,
            otp_hold_max_secs: 0,
            push_url: None,
            push_job: "auth_perf".to_string(),
            json: false,
        }
    }

    fn record(worker_index: usize, pass: u64, fail: u64, latency: u64) -> SnapshotRecord {
        SnapshotRecord {
            worker_index,
            timestamp: 1_700_000_000,
            elapsed_seconds: 3,
            avg_latency_ms: latency,
            trials_completed: pass + fail,
            pass_count: pass,
            fail_count: fail,
        }
    }

    #[test]
    fn message_carries_three_series_indexed_by_worker() {
        let mut publisher = SnapshotPublisher::new(&config(3)).unwrap();
        let message = publisher.message(&record(1, 7, 3, 120));

        assert_eq!(message.job, "auth_perf");
        assert_eq!(message.time, 1_700_000_000);
        let categories: Vec<&str> = message.data.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(categories, [PASS_SERIES, FAIL_SERIES, API_TIME_SERIES]);

        assert_eq!(message.data[0].values, vec![0.0, 7.0, 0.0]);
        assert_eq!(message.data[1].values, vec![0.0, 3.0, 0.0]);
        assert_eq!(message.data[2].values, vec![0.0, 120.0, 0.0]);
        assert_eq!(message.data[0].labels[1]["worker"], "worker-1");
    }

    #[test]
    fn later_snapshots_overwrite_only_their_worker() {
        let mut publisher = SnapshotPublisher::new(&config(2)).unwrap();
        publisher.message(&record(0, 5, 0, 80));
        let message = publisher.message(&record(1, 2, 1, 95));

        assert_eq!(message.data[0].values, vec![5.0, 2.0]);
        assert_eq!(message.data[1].values, vec![0.0, 1.0]);
    }

    #[test]
    fn out_of_range_worker_is_ignored() {
        let mut publisher = SnapshotPublisher::new(&config(1)).unwrap();
        let message = publisher.message(&record(9, 5, 5, 10));
        assert_eq!(message.data[0].values, vec![0.0]);
    }
}
