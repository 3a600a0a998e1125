//! End-to-end dispatcher runs: worker fan-out, snapshot stream,
//! completion sentinels and the assembled report.

mod common;

use std::time::Duration;

use auth_loadtest::{run_load_test, AuthProtocol};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::test_config;

#[tokio::test]
async fn every_worker_finishes_its_trials_and_snapshots_are_pushed() {
    let server = MockServer::start().await;

    // 3 workers x 7 trials.
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "sess" })))
        .expect(21)
        .mount(&server)
        .await;
    // Interval snapshots after trials 2, 4 and 6 plus the final flush at
    // 7: four pushes per worker.
    Mock::given(method("POST"))
        .and(path("/push"))
        .and(body_partial_json(json!({ "job": "auth_perf" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(12)
        .mount(&server)
        .await;

    let mut config = test_config(AuthProtocol::RestLogin);
    config.url = Some(format!("{}/api/v1/auth/", server.uri()));
    config.concurrency = 3;
    config.repeat = 7;
    config.report_interval = 2;
    config.push_url = Some(format!("{}/push", server.uri()));

    let report = tokio::time::timeout(Duration::from_secs(30), run_load_test(config))
        .await
        .expect("run must not hang")
        .expect("run must succeed");

    assert_eq!(report.totals.planned_workers, 3);
    assert_eq!(report.totals.completed_workers, 3);
    assert_eq!(report.totals.trials, 21);
    assert_eq!(report.totals.pass, 21);
    assert_eq!(report.totals.fail, 0);
    assert_eq!(report.workers.len(), 3);
    for (index, worker) in report.workers.iter().enumerate() {
        assert_eq!(worker.worker_index, index);
        assert_eq!(worker.trials_completed, 7);
    }
}

#[tokio::test]
async fn failed_trials_are_counted_not_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .expect(6)
        .mount(&server)
        .await;

    let mut config = test_config(AuthProtocol::RestLogin);
    config.url = Some(format!("{}/api/v1/auth/", server.uri()));
    config.concurrency = 2;
    config.repeat = 3;

    let report = tokio::time::timeout(Duration::from_secs(30), run_load_test(config))
        .await
        .expect("run must not hang")
        .expect("run completes even when every trial fails");

    assert_eq!(report.totals.trials, 6);
    assert_eq!(report.totals.pass, 0);
    assert_eq!(report.totals.fail, 6);
    assert!((report.stats.failure_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn pooled_run_provisions_and_recycles_identities() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/resourcesmanager/v1/res/request/perf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pool_id": "perf",
            "id": "9",
            "seed": "",
            "user": "poolaccount",
            "password": "secret",
            "custom_data": { "admin_user": "superuser", "admin_token": "s3cret" },
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/"))
        .and(body_partial_json(json!({ "username": "poolaccount" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "sess" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/resourcesmanager/v1/res/recycle/perf/9"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_config(AuthProtocol::RestLogin);
    config.url = Some(format!("{}/api/v1/auth/", server.uri()));
    config.use_pool = true;
    config.pool_endpoint = server.address().to_string();
    config.pool_name = "perf".to_string();
    config.pool_size = 2;
    config.concurrency = 2;
    config.repeat = 1;

    let report = tokio::time::timeout(Duration::from_secs(30), run_load_test(config))
        .await
        .expect("run must not hang")
        .expect("pooled run must succeed");

    assert_eq!(report.totals.pass, 2);
}
