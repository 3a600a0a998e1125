use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AuthProtocol, LoadTestConfig};
use crate::pool::{PoolError, ResourcePool};

pub mod federated;
pub mod forms;
pub mod oauth;
pub mod rest;
pub mod vpn;

/// One failed login attempt. Trials fail, workers survive; only setup
/// errors are fatal.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("transport error during {step}: {source}")]
    Transport {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{step} returned status {status}: {body}")]
    Protocol {
        step: &'static str,
        status: u16,
        body: String,
    },
    #[error("malformed response during {step}: {detail}")]
    Malformed { step: &'static str, detail: String },
    #[error("resource pool error: {0}")]
    ResourceExhausted(#[from] PoolError),
    #[error("permission denied for user `{user}`")]
    PermissionDenied { user: String },
}

impl TrialError {
    pub(crate) fn transport(step: &'static str, source: reqwest::Error) -> Self {
        Self::Transport { step, source }
    }

    pub(crate) fn protocol(step: &'static str, status: u16, body: impl Into<String>) -> Self {
        Self::Protocol {
            step,
            status,
            body: body.into(),
        }
    }

    pub(crate) fn malformed(step: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            step,
            detail: detail.into(),
        }
    }
}

/// A protocol-specific login-flow driver. `setup` runs once per worker
/// before the timed loop; `run` executes exactly one full login attempt
/// (plus logout where the protocol has one).
#[async_trait]
pub trait Runner: Send {
    async fn setup(&mut self, worker_index: usize, pool: Option<Arc<ResourcePool>>) -> Result<()>;

    async fn run(&mut self) -> Result<(), TrialError>;
}

/// Constructor table: one entry per protocol tag.
pub fn build_runner(config: &LoadTestConfig) -> Box<dyn Runner> {
    match config.protocol {
        AuthProtocol::Federated => Box::new(federated::FederatedRunner::new(config.clone())),
        AuthProtocol::OauthToken => Box::new(oauth::OauthTokenRunner::new(config.clone())),
        AuthProtocol::RestLogin => Box::new(rest::RestLoginRunner::new(config.clone())),
        AuthProtocol::VpnLogin => Box::new(vpn::VpnLoginRunner::new(config.clone())),
    }
}

/// Per-runner HTTP client: deadline on every outbound call, optional
/// TLS-verification bypass for lab certificates. Redirects are driven
/// manually where a flow needs to observe them.
pub(crate) fn http_client(
    config: &LoadTestConfig,
    manual_redirects: bool,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(config.timeout());
    if config.disable_ssl_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if manual_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    builder.build().context("build HTTP client")
}
