use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::config::LoadTestConfig;
use crate::otp;
use crate::pool::{ProtocolMetadata, ResourcePool};
use crate::runner::{http_client, Runner, TrialError};

/// VPN-gateway challenge/response login. The gateway speaks a plain
/// `key=value&...` body on `/remote/logincheck`; a second factor is
/// negotiated by echoing the first response (commas rewritten to `&`)
/// back together with the one-time code.
pub struct VpnLoginRunner {
    config: LoadTestConfig,
    http: Option<reqwest::Client>,
    pool: Option<Arc<ResourcePool>>,
    /// Gateway of the still-open session, empty when none is open.
    last_login_url: String,
}

impl VpnLoginRunner {
    pub fn new(config: LoadTestConfig) -> Self {
        Self {
            config,
            http: None,
            pool: None,
            last_login_url: String::new(),
        }
    }

    fn http(&self) -> &reqwest::Client {
        self.http.as_ref().expect("setup() not called")
    }

    /// One POST to `/remote/logincheck`. Returns the challenge context:
    /// the response body with commas rewritten into form separators.
    async fn login_check(
        &mut self,
        gateway: &str,
        user: &str,
        credential: &str,
        code: Option<&str>,
        context: &str,
    ) -> Result<String, TrialError> {
        let url = format!("{}/remote/logincheck", gateway.trim_end_matches('/'));
        let body = match code {
            Some(code) => format!(
                "{context}&ajax=1&username={user}&realm=&credential={credential}&code={code}"
            ),
            None => format!("ajax=1&username={user}&realm=&credential={credential}"),
        };

        let resp = self
            .http()
            .post(&url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|err| TrialError::transport("login_check", err))?;
        self.last_login_url = gateway.to_string();

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| TrialError::transport("login_check", err))?;
        // A denied login can hide behind a 200.
        if text.contains("permission_denied") {
            return Err(TrialError::PermissionDenied {
                user: user.to_string(),
            });
        }
        if status != StatusCode::OK {
            return Err(TrialError::protocol("login_check", status.as_u16(), text));
        }
        Ok(text.replace(',', "&"))
    }

    /// Logs out any still-open session. No-op when none is open; a
    /// failed logout is logged and the session is considered closed.
    async fn ensure_logged_out(&mut self) {
        if self.last_login_url.is_empty() {
            return;
        }
        let url = format!(
            "{}/remote/logout",
            self.last_login_url.trim_end_matches('/')
        );
        match self
            .http()
            .post(&url)
            .header(CONTENT_TYPE, "text/plain")
            .send()
            .await
        {
            Ok(resp) => debug!(status = %resp.status(), "vpn logout"),
            Err(err) => warn!(%err, url, "vpn logout failed"),
        }
        self.last_login_url.clear();
    }
}

#[async_trait]
impl Runner for VpnLoginRunner {
    async fn setup(&mut self, worker_index: usize, pool: Option<Arc<ResourcePool>>) -> Result<()> {
        self.http = Some(http_client(&self.config, false)?);
        self.pool = pool;
        info!(worker = worker_index, "setup for vpn login");
        Ok(())
    }

    async fn run(&mut self) -> Result<(), TrialError> {
        let pool = self.pool.clone();
        let Some(pool) = pool else {
            return Err(TrialError::malformed(
                "setup",
                "vpn login requires a resource pool",
            ));
        };
        let resource = pool.get()?.clone();
        let gateway = match &resource.custom {
            ProtocolMetadata::VpnLogin { vpn_gateway_url } => vpn_gateway_url.clone(),
            _ => {
                return Err(TrialError::malformed(
                    "setup",
                    "resource has no vpn gateway URL",
                ))
            }
        };

        self.ensure_logged_out().await;

        let context = self
            .login_check(&gateway, &resource.user, &resource.password, None, "")
            .await?;

        if !resource.seed.is_empty() {
            let code = otp::generate_code(
                &resource.seed,
                self.config.otp_hold_min_secs,
                self.config.otp_hold_max_secs,
            )
            .await;
            self.login_check(
                &gateway,
                &resource.user,
                &resource.password,
                Some(&code),
                &context,
            )
            .await?;
        }
        Ok(())
    }
}
