use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONNECTION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LoadTestConfig;
use crate::otp;
use crate::pool::{ProtocolMetadata, ResourcePool};
use crate::runner::{http_client, Runner, TrialError};

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge_response: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Token {
    access_token: String,
    token_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: u64,
    #[serde(default)]
    #[allow(dead_code)]
    scope: String,
    #[serde(default)]
    #[allow(dead_code)]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenVerification {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Serialize)]
struct RevokeRequest<'a> {
    token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// OAuth credential-grant cycle: issue a token, verify it resolves back
/// to a username, revoke it. Each step runs only while the previous one
/// succeeded.
pub struct OauthTokenRunner {
    config: LoadTestConfig,
    http: Option<reqwest::Client>,
    pool: Option<Arc<ResourcePool>>,
    user: String,
    client_id: String,
    client_secret: String,
    auth_server: String,
}

impl OauthTokenRunner {
    pub fn new(config: LoadTestConfig) -> Self {
        Self {
            client_id: config.oauth_client_id.clone(),
            client_secret: config.oauth_client_secret.clone(),
            auth_server: config.auth_server.clone().unwrap_or_default(),
            config,
            http: None,
            pool: None,
            user: String::new(),
        }
    }

    fn http(&self) -> &reqwest::Client {
        self.http.as_ref().expect("setup() not called")
    }

    /// Explicit `--url` wins over the host-derived default.
    fn base_url(&self) -> String {
        match &self.config.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.auth_server),
        }
    }

    fn token_url(&self) -> String {
        format!("{}/api/v1/oauth/token/", self.base_url())
    }

    fn verify_url(&self) -> String {
        format!(
            "{}/api/v1/oauth/verify_token/?client_id={}",
            self.base_url(),
            self.client_id
        )
    }

    fn revoke_url(&self) -> String {
        format!("{}/api/v1/oauth/revoke_token/", self.base_url())
    }

    fn connection_header(&self) -> &'static str {
        if self.config.close_connection {
            "close"
        } else {
            "keep-alive"
        }
    }

    async fn get_token(
        &self,
        user: &str,
        password: &str,
        seed: &str,
    ) -> Result<Token, TrialError> {
        let code;
        let (challenge, challenge_response, method) = if seed.is_empty() {
            (None, None, None)
        } else {
            code = otp::generate_code(
                seed,
                self.config.otp_hold_min_secs,
                self.config.otp_hold_max_secs,
            )
            .await;
            (Some("otp"), Some(code.as_str()), Some("ftm"))
        };

        let request = TokenRequest {
            username: user,
            password,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: &self.config.oauth_grant_type,
            challenge,
            challenge_response,
            method,
        };
        let resp = self
            .http()
            .post(self.token_url())
            .header(CONNECTION, self.connection_header())
            .json(&request)
            .send()
            .await
            .map_err(|err| TrialError::transport("get_token", err))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| TrialError::transport("get_token", err))?;
        if status != StatusCode::OK {
            return Err(TrialError::protocol("get_token", status.as_u16(), body));
        }
        serde_json::from_str(&body)
            .map_err(|err| TrialError::malformed("get_token", err.to_string()))
    }

    async fn verify_token(&self, token: &Token) -> Result<(), TrialError> {
        let resp = self
            .http()
            .get(self.verify_url())
            .header(
                AUTHORIZATION,
                format!("{} {}", token.token_type, token.access_token),
            )
            .header(CONNECTION, self.connection_header())
            .send()
            .await
            .map_err(|err| TrialError::transport("verify_token", err))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| TrialError::transport("verify_token", err))?;
        if status != StatusCode::OK {
            return Err(TrialError::protocol("verify_token", status.as_u16(), body));
        }
        let verification: TokenVerification = serde_json::from_str(&body)
            .map_err(|err| TrialError::malformed("verify_token", err.to_string()))?;
        if verification.username.is_empty() {
            return Err(TrialError::malformed(
                "verify_token",
                "verification response has no username",
            ));
        }
        Ok(())
    }

    async fn revoke_token(&self, token: &Token) -> Result<(), TrialError> {
        let request = RevokeRequest {
            token: &token.access_token,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        };
        let resp = self
            .http()
            .post(self.revoke_url())
            .header(CONNECTION, self.connection_header())
            .json(&request)
            .send()
            .await
            .map_err(|err| TrialError::transport("revoke_token", err))?;
        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(TrialError::protocol("revoke_token", status.as_u16(), body));
        }
        Ok(())
    }
}

#[async_trait]
impl Runner for OauthTokenRunner {
    async fn setup(&mut self, worker_index: usize, pool: Option<Arc<ResourcePool>>) -> Result<()> {
        self.http = Some(http_client(&self.config, false)?);
        self.user = format!("{}{}", self.config.user_prefix, worker_index);
        self.pool = pool;
        info!(worker = worker_index, "setup for oauth token grant");
        Ok(())
    }

    async fn run(&mut self) -> Result<(), TrialError> {
        let (user, password, seed) = match &self.pool {
            None => (
                self.user.clone(),
                self.config.password.clone(),
                String::new(),
            ),
            Some(pool) => {
                let resource = pool.get()?;
                if let ProtocolMetadata::OauthToken {
                    oauth_client_id,
                    oauth_client_secret,
                    auth_server,
                } = &resource.custom
                {
                    self.client_id = oauth_client_id.clone();
                    self.client_secret = oauth_client_secret.clone();
                    self.auth_server = auth_server.clone();
                }
                (
                    resource.user.clone(),
                    resource.password.clone(),
                    resource.seed.clone(),
                )
            }
        };

        let token = self.get_token(&user, &password, &seed).await?;
        self.verify_token(&token).await?;
        self.revoke_token(&token).await?;
        debug!(user = %user, "token cycle complete");
        Ok(())
    }
}
