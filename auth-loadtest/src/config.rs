use std::time::Duration;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_REPEAT: u64 = 1;
pub const DEFAULT_REPORT_INTERVAL: u64 = 10;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_USER_SLICE: u64 = 500;

/// Which login front-end the workers drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthProtocol {
    /// Browser-style federated SSO login against an identity provider.
    Federated,
    /// OAuth credential-grant token issuance, verification and revocation.
    OauthToken,
    /// Admin-authenticated REST login API.
    RestLogin,
    /// VPN gateway challenge/response login.
    VpnLogin,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "auth-loadtest",
    about = "Async multi-protocol authentication load client"
)]
pub struct Cli {
    #[arg(long, value_enum, env = "AUTH_PROTOCOL", default_value = "federated")]
    pub protocol: AuthProtocol,

    /// Entry URL for the login flow (service-provider URL for federated,
    /// full login URL for rest-login). Overrides the auth-server default.
    #[arg(long, env = "AUTH_URL")]
    pub url: Option<String>,
    /// Host used to build default REST/OAuth endpoint URLs.
    #[arg(long, env = "AUTH_SERVER")]
    pub auth_server: Option<String>,

    #[arg(long, env = "USER_PREFIX", default_value = "perftest")]
    pub user_prefix: String,
    #[arg(long, env = "USER_PASSWORD", default_value = "")]
    pub password: String,

    #[arg(long, env = "CONCURRENT", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    #[arg(long, env = "REPEAT", default_value_t = DEFAULT_REPEAT)]
    pub repeat: u64,
    #[arg(long, env = "REPORT_INTERVAL", default_value_t = DEFAULT_REPORT_INTERVAL)]
    pub report_interval: u64,
    #[arg(long, env = "TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    #[arg(long, env = "LOGOUT", default_value_t = true, action = ArgAction::Set)]
    pub logout: bool,
    #[arg(long, env = "DISABLE_SSL_VERIFY", default_value_t = true, action = ArgAction::Set)]
    pub disable_ssl_verify: bool,
    #[arg(long, env = "CLOSE_CONNECTION", default_value_t = true, action = ArgAction::Set)]
    pub close_connection: bool,

    #[arg(long, env = "USE_POOL", default_value_t = false, action = ArgAction::Set)]
    pub use_pool: bool,
    #[arg(long, env = "POOL_ENDPOINT", default_value = "localhost:8000")]
    pub pool_endpoint: String,
    #[arg(long, env = "POOL_NAME", default_value = "")]
    pub pool_name: String,
    #[arg(long, env = "POOL_SIZE", default_value_t = 1)]
    pub pool_size: usize,

    /// Width of the generated-username index range owned by each worker
    /// when the rest-login runner is not bound to the pool.
    #[arg(long, env = "USER_IDX_SLICE", default_value_t = DEFAULT_USER_SLICE)]
    pub user_slice: u64,
    #[arg(long, env = "ADMIN_USER", default_value = "admin")]
    pub admin_user: String,
    #[arg(long, env = "ADMIN_TOKEN", default_value = "")]
    pub admin_token: String,

    #[arg(long, env = "OAUTH_CLIENT_ID", default_value = "")]
    pub oauth_client_id: String,
    #[arg(long, env = "OAUTH_CLIENT_SECRET", default_value = "")]
    pub oauth_client_secret: String,
    #[arg(long, env = "OAUTH_GRANT_TYPE", default_value = "password")]
    pub oauth_grant_type: String,

    /// Bounds (seconds) of the random hold inserted before computing a
    /// one-time code, emulating human response latency. Zero disables it.
    #[arg(long, env = "OTP_HOLD_MIN_SECS", default_value_t = 0)]
    pub otp_hold_min_secs: u64,
    #[arg(long, env = "OTP_HOLD_MAX_SECS", default_value_t = 0)]
    pub otp_hold_max_secs: u64,

    /// Endpoint receiving snapshot messages. Snapshots are logged only
    /// when unset.
    #[arg(long, env = "PUSH_URL")]
    pub push_url: Option<String>,
    #[arg(long, env = "PUSH_JOB", default_value = "auth_perf")]
    pub push_job: String,

    #[arg(long)]
    pub json: bool,
}

/// Validated, immutable run configuration. Built once at startup and
/// passed explicitly to the engine and every runner.
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub protocol: AuthProtocol,
    pub url: Option<String>,
    pub auth_server: Option<String>,
    pub user_prefix: String,
    pub password: String,
    pub concurrency: usize,
    pub repeat: u64,
    pub report_interval: u64,
    pub timeout_ms: u64,
    pub logout: bool,
    pub disable_ssl_verify: bool,
    pub close_connection: bool,
    pub use_pool: bool,
    pub pool_endpoint: String,
    pub pool_name: String,
    pub pool_size: usize,
    pub user_slice: u64,
    pub admin_user: String,
    pub admin_token: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_grant_type: String,
    pub otp_hold_min_secs: u64,
    pub otp_hold_max_secs: u64,
    pub push_url: Option<String>,
    pub push_job: String,
    pub json: bool,
}

impl LoadTestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Default login endpoint for the rest-login protocol when no
    /// explicit URL was given.
    pub fn rest_login_url(&self) -> Option<String> {
        match (&self.url, &self.auth_server) {
            (Some(url), _) => Some(url.clone()),
            (None, Some(host)) => Some(format!("https://{host}/api/v1/auth/")),
            (None, None) => None,
        }
    }
}

impl TryFrom<Cli> for LoadTestConfig {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        if args.concurrency == 0 {
            bail!("--concurrency must be greater than 0");
        }
        if args.repeat == 0 {
            bail!("--repeat must be greater than 0");
        }
        if args.report_interval == 0 {
            bail!("--report-interval must be greater than 0");
        }
        if args.timeout_ms == 0 {
            bail!("--timeout-ms must be greater than 0");
        }
        if args.user_slice == 0 {
            bail!("--user-slice must be greater than 0");
        }
        if args.otp_hold_max_secs < args.otp_hold_min_secs {
            bail!("--otp-hold-max-secs must not be below --otp-hold-min-secs");
        }
        if args.use_pool {
            if args.pool_name.is_empty() {
                bail!("--pool-name is required when the pool is enabled");
            }
            if args.pool_size == 0 {
                bail!("--pool-size must be greater than 0 when the pool is enabled");
            }
        } else {
            match args.protocol {
                AuthProtocol::Federated if args.url.is_none() => {
                    bail!("--url is required for federated login without the pool")
                }
                AuthProtocol::OauthToken
                    if args.oauth_client_id.is_empty() || args.oauth_client_secret.is_empty() =>
                {
                    bail!("--oauth-client-id and --oauth-client-secret are required without the pool")
                }
                AuthProtocol::OauthToken | AuthProtocol::RestLogin
                    if args.url.is_none() && args.auth_server.is_none() =>
                {
                    bail!("--url or --auth-server is required for this protocol")
                }
                AuthProtocol::VpnLogin => {
                    bail!("vpn-login requires the pool for gateway metadata")
                }
                _ => {}
            }
        }

        Ok(Self {
            protocol: args.protocol,
            url: args.url,
            auth_server: args.auth_server,
            user_prefix: args.user_prefix,
            password: args.password,
            concurrency: args.concurrency,
            repeat: args.repeat,
            report_interval: args.report_interval,
            timeout_ms: args.timeout_ms,
            logout: args.logout,
            disable_ssl_verify: args.disable_ssl_verify,
            close_connection: args.close_connection,
            use_pool: args.use_pool,
            pool_endpoint: args.pool_endpoint,
            pool_name: args.pool_name,
            pool_size: args.pool_size,
            user_slice: args.user_slice,
            admin_user: args.admin_user,
            admin_token: args.admin_token,
            oauth_client_id: args.oauth_client_id,
            oauth_client_secret: args.oauth_client_secret,
            oauth_grant_type: args.oauth_grant_type,
            otp_hold_min_secs: args.otp_hold_min_secs,
            otp_hold_max_secs: args.otp_hold_max_secs,
            push_url: args.push_url,
            push_job: args.push_job,
            json: args.json,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{AuthProtocol, Cli, LoadTestConfig};

    #[test]
    fn parse_federated_defaults() {
        let cli = Cli::try_parse_from([
            "auth-loadtest",
            "--protocol",
            "federated",
            "--url",
            "https://sp.example.com/sso",
        ])
        .expect("cli should parse");
        let cfg = LoadTestConfig::try_from(cli).expect("config should build");

        assert_eq!(cfg.protocol, AuthProtocol::Federated);
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.report_interval, 10);
        assert!(cfg.logout);
        assert!(!cfg.use_pool);
    }

    #[test]
    fn rest_login_url_prefers_explicit_url() {
        let cli = Cli::try_parse_from([
            "auth-loadtest",
            "--protocol",
            "rest-login",
            "--url",
            "https://ac.example.com/custom/auth/",
            "--auth-server",
            "ac.example.com",
        ])
        .expect("cli should parse");
        let cfg = LoadTestConfig::try_from(cli).expect("config should build");

        assert_eq!(
            cfg.rest_login_url().as_deref(),
            Some("https://ac.example.com/custom/auth/")
        );
    }

    #[test]
    fn rest_login_url_built_from_auth_server() {
        let cli = Cli::try_parse_from([
            "auth-loadtest",
            "--protocol",
            "rest-login",
            "--auth-server",
            "ac.example.com",
        ])
        .expect("cli should parse");
        let cfg = LoadTestConfig::try_from(cli).expect("config should build");

        assert_eq!(
            cfg.rest_login_url().as_deref(),
            Some("https://ac.example.com/api/v1/auth/")
        );
    }

    #[test]
    fn reject_vpn_without_pool() {
        let cli = Cli::try_parse_from(["auth-loadtest", "--protocol", "vpn-login"])
            .expect("cli should parse");
        let err = LoadTestConfig::try_from(cli).expect_err("expected pool requirement error");

        assert!(err.to_string().contains("pool"));
    }

    #[test]
    fn reject_pool_without_name() {
        let cli = Cli::try_parse_from([
            "auth-loadtest",
            "--protocol",
            "federated",
            "--use-pool",
            "true",
        ])
        .expect("cli should parse");
        let err = LoadTestConfig::try_from(cli).expect_err("expected pool name error");

        assert!(err.to_string().contains("--pool-name"));
    }
}
