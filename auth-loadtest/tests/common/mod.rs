use auth_loadtest::{AuthProtocol, LoadTestConfig};

/// Baseline config for driving runners at a mock server. Tests override
/// the fields they care about.
pub fn test_config(protocol: AuthProtocol) -> LoadTestConfig {
    LoadTestConfig {
        protocol,
        url: None,
        auth_server: None,
        user_prefix: "perftest".to_string(),
        password: "secret".to_string(),
        concurrency: 1,
        repeat: 1,
        report_interval: 10,
        timeout_ms: 5_000,
        logout: false,
        disable_ssl_verify: false,
        close_connection: false,
        use_pool: false,
        pool_endpoint: String::new(),
        pool_name: String::new(),
        pool_size: 0,
        user_slice: 500,
        admin_user: "admin".to_string(),
        admin_token: "t0ken".to_string(),
        oauth_client_id: "client-id".to_string(),
        oauth_client_secret: "client-secret".to_string(),
        oauth_grant_type: "password".to_string(),
        otp_hold_min_secs: 0,
        otp_hold_max_secs: 0,
        push_url: None,
        push_job: "auth_perf".to_string(),
        json: false,
    }
}
