use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONNECTION};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::info;

use crate::config::LoadTestConfig;
use crate::otp;
use crate::pool::{ProtocolMetadata, ResourcePool};
use crate::runner::{http_client, Runner, TrialError};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_code: Option<&'a str>,
}

/// Admin-authenticated REST login. Without the pool it cycles through a
/// deterministic generated-username sequence inside the worker's own
/// index slice; with the pool the admin credential is swapped
/// per-request from the fetched identity's metadata.
pub struct RestLoginRunner {
    config: LoadTestConfig,
    http: Option<reqwest::Client>,
    pool: Option<Arc<ResourcePool>>,
    url: String,
    auth_header: String,
    idx: u64,
    idx_min: u64,
    idx_max: u64,
}

impl RestLoginRunner {
    pub fn new(config: LoadTestConfig) -> Self {
        Self {
            config,
            http: None,
            pool: None,
            url: String::new(),
            auth_header: String::new(),
            idx: 0,
            idx_min: 0,
            idx_max: 0,
        }
    }

    fn http(&self) -> &reqwest::Client {
        self.http.as_ref().expect("setup() not called")
    }

    /// `Basic base64(user:token)`.
    fn basic_credential(user: &str, token: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{token}")))
    }

    /// Advances through `(idx_min, idx_max]`, wrapping back to
    /// `idx_min + 1` once the slice is exhausted.
    fn next_user_index(&mut self) -> u64 {
        if self.idx < self.idx_max {
            self.idx += 1;
        } else {
            self.idx = self.idx_min + 1;
        }
        self.idx
    }

    async fn login(
        &self,
        user: &str,
        password: &str,
        token_code: Option<&str>,
    ) -> Result<(), TrialError> {
        let request = LoginRequest {
            username: user,
            password,
            token_code,
        };
        let resp = self
            .http()
            .post(&self.url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(
                CONNECTION,
                if self.config.close_connection {
                    "close"
                } else {
                    "keep-alive"
                },
            )
            .json(&request)
            .send()
            .await
            .map_err(|err| TrialError::transport("login", err))?;

        // Success is exactly 200.
        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TrialError::protocol("login", status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl Runner for RestLoginRunner {
    async fn setup(&mut self, worker_index: usize, pool: Option<Arc<ResourcePool>>) -> Result<()> {
        self.http = Some(http_client(&self.config, false)?);
        self.url = self
            .config
            .rest_login_url()
            .context("no login URL or auth server configured")?;
        self.auth_header =
            Self::basic_credential(&self.config.admin_user, &self.config.admin_token);
        self.idx_min = worker_index as u64 * self.config.user_slice;
        self.idx_max = self.idx_min + self.config.user_slice;
        self.idx = self.idx_min;
        self.pool = pool;
        info!(worker = worker_index, "setup for rest login");
        Ok(())
    }

    async fn run(&mut self) -> Result<(), TrialError> {
        let pool = self.pool.clone();
        let (user, password, seed) = match &pool {
            None => {
                let index = self.next_user_index();
                (
                    format!("{}{}", self.config.user_prefix, index),
                    self.config.password.clone(),
                    String::new(),
                )
            }
            Some(pool) => {
                let resource = pool.get()?;
                if let ProtocolMetadata::RestLogin {
                    admin_user,
                    admin_token,
                } = &resource.custom
                {
                    self.auth_header = Self::basic_credential(admin_user, admin_token);
                }
                (
                    resource.user.clone(),
                    resource.password.clone(),
                    resource.seed.clone(),
                )
            }
        };

        let code;
        let token_code = if seed.is_empty() {
            None
        } else {
            code = otp::generate_code(
                &seed,
                self.config.otp_hold_min_secs,
                self.config.otp_hold_max_secs,
            )
            .await;
            Some(code.as_str())
        };

        self.login(&user, &password, token_code).await
    }
}
