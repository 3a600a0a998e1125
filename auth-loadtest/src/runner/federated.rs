use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::{Method, Response, StatusCode, Url};
use tracing::{debug, info};

use crate::config::LoadTestConfig;
use crate::otp;
use crate::pool::{ProtocolMetadata, ResourcePool};
use crate::runner::forms::{self, LoginForm};
use crate::runner::{http_client, Runner, TrialError};

const MAX_REDIRECT_HOPS: usize = 10;
const SUCCESS_MARKER: &str = "Login Successful";

/// Simulates a full browser SSO round trip: entry redirect to the
/// identity provider, credential (and optional one-time-code) POST,
/// assertion form relay to the service provider, optional logout.
///
/// All session state lives on the runner; nothing is shared between
/// workers. Redirects are followed by hand because the flow needs to
/// observe intermediate `Location`/`Set-Cookie` headers, and the entry
/// step must *not* carry redirect cookies forward while the assertion
/// step must.
pub struct FederatedRunner {
    config: LoadTestConfig,
    http: Option<reqwest::Client>,
    pool: Option<Arc<ResourcePool>>,
    user: String,

    csrf_token: String,
    session_cookie: String,
    init_cookie: String,
    form_url: String,
    assertion: LoginForm,
    logout_url: String,
    logout_token: String,
}

impl FederatedRunner {
    pub fn new(config: LoadTestConfig) -> Self {
        Self {
            config,
            http: None,
            pool: None,
            user: String::new(),
            csrf_token: String::new(),
            session_cookie: String::new(),
            init_cookie: String::new(),
            form_url: String::new(),
            assertion: LoginForm::default(),
            logout_url: String::new(),
            logout_token: String::new(),
        }
    }

    fn http(&self) -> &reqwest::Client {
        self.http.as_ref().expect("setup() not called")
    }

    /// Step 1: GET the service-provider entry URL, following redirects
    /// by hand without copying redirect cookies forward. Captures the
    /// login-form target, the redirect-hop cookie, the session cookie
    /// and the CSRF token.
    async fn init_login(&mut self, entry_url: &str) -> Result<(), TrialError> {
        let chain = self.follow_redirects(entry_url, false).await?;

        let status = chain.response.status();
        if status != StatusCode::OK {
            return Err(TrialError::protocol("init_login", status.as_u16(), ""));
        }

        self.session_cookie = first_set_cookie(&chain.response)
            .map(purify_cookie)
            .ok_or_else(|| TrialError::malformed("init_login", "login page set no cookie"))?;
        self.form_url = chain
            .last_location
            .ok_or_else(|| TrialError::malformed("init_login", "entry URL did not redirect"))?;
        self.init_cookie = chain
            .last_redirect_cookie
            .ok_or_else(|| TrialError::malformed("init_login", "redirect hop set no cookie"))?;

        let body = chain
            .response
            .text()
            .await
            .map_err(|err| TrialError::transport("init_login", err))?;
        self.csrf_token = forms::extract_csrf_token(&body)
            .ok_or_else(|| TrialError::malformed("init_login", "login form has no CSRF token"))?;
        Ok(())
    }

    /// Step 2: POST credentials (and CSRF token) to the captured target
    /// with the session cookie attached. With an OTP seed present, the
    /// CSRF token is re-read from the challenge page and a second POST
    /// submits the generated code in place of the password. The response
    /// markup is then parsed into the assertion form for step 3.
    async fn idp_login(&mut self, password: &str, seed: &str) -> Result<(), TrialError> {
        let fields = [
            ("csrfmiddlewaretoken", self.csrf_token.as_str()),
            ("username", self.user.as_str()),
            ("password", password),
            ("next", "/"),
        ];
        let resp = self
            .http()
            .post(&self.form_url)
            .header(COOKIE, &self.session_cookie)
            .form(&fields)
            .send()
            .await
            .map_err(|err| TrialError::transport("idp_login", err))?;
        if resp.status() != StatusCode::OK {
            return Err(TrialError::protocol("idp_login", resp.status().as_u16(), ""));
        }
        let mut body = resp
            .text()
            .await
            .map_err(|err| TrialError::transport("idp_login", err))?;

        if !seed.is_empty() {
            self.csrf_token = forms::extract_csrf_token(&body).ok_or_else(|| {
                TrialError::malformed("idp_login", "challenge page has no CSRF token")
            })?;
            let code = otp::generate_code(
                seed,
                self.config.otp_hold_min_secs,
                self.config.otp_hold_max_secs,
            )
            .await;
            let fields = [
                ("csrfmiddlewaretoken", self.csrf_token.as_str()),
                ("username", self.user.as_str()),
                ("token_code", code.as_str()),
                ("next", "/"),
            ];
            let resp = self
                .http()
                .post(&self.form_url)
                .header(COOKIE, &self.session_cookie)
                .form(&fields)
                .send()
                .await
                .map_err(|err| TrialError::transport("otp_login", err))?;
            if resp.status() != StatusCode::OK {
                return Err(TrialError::protocol("otp_login", resp.status().as_u16(), ""));
            }
            body = resp
                .text()
                .await
                .map_err(|err| TrialError::transport("otp_login", err))?;
        }

        self.assertion = forms::extract_login_form(&body);
        if self.assertion.action.is_empty() {
            return Err(TrialError::malformed(
                "idp_login",
                "response carries no assertion form",
            ));
        }
        Ok(())
    }

    /// Step 3: relay the assertion form to the service provider, this
    /// time copying redirect cookies forward, and verify the landing
    /// page contains the success marker. Captures the logout URL and
    /// token for step 4.
    async fn goto_sp_page(&mut self) -> Result<(), TrialError> {
        let method = if self.assertion.method.eq_ignore_ascii_case("get") {
            Method::GET
        } else {
            Method::POST
        };
        let target = Url::parse(&self.form_url)
            .and_then(|base| base.join(&self.assertion.action))
            .map_err(|err| TrialError::malformed("sp_page", err.to_string()))?;

        let mut cookies = self.init_cookie.clone();
        let mut current = target;
        let mut response = self
            .http()
            .request(method.clone(), current.clone())
            .header(COOKIE, &cookies)
            .form(&self.assertion.fields)
            .send()
            .await
            .map_err(|err| TrialError::transport("sp_page", err))?;

        let mut hops = 0;
        while response.status().is_redirection() {
            hops += 1;
            if hops > MAX_REDIRECT_HOPS {
                return Err(TrialError::malformed("sp_page", "redirect loop"));
            }
            for cookie in set_cookies(&response) {
                cookies.push(';');
                cookies.push_str(&purify_cookie(cookie));
            }
            let location = header_str(&response, LOCATION)
                .ok_or_else(|| TrialError::malformed("sp_page", "redirect without Location"))?;
            current = current
                .join(&location)
                .map_err(|err| TrialError::malformed("sp_page", err.to_string()))?;
            response = self
                .http()
                .get(current.clone())
                .header(COOKIE, &cookies)
                .send()
                .await
                .map_err(|err| TrialError::transport("sp_page", err))?;
        }

        if response.status() != StatusCode::OK {
            return Err(TrialError::protocol("sp_page", response.status().as_u16(), ""));
        }

        self.logout_url = format!(
            "{}://{}{}logout",
            current.scheme(),
            current.authority(),
            current.path()
        );
        self.logout_token = set_cookies(&response)
            .into_iter()
            .find(|cookie| cookie.contains("token="))
            .unwrap_or_default();

        let body = response
            .text()
            .await
            .map_err(|err| TrialError::transport("sp_page", err))?;
        if !body.contains(SUCCESS_MARKER) {
            return Err(TrialError::protocol("sp_page", 200, body));
        }
        Ok(())
    }

    /// Step 5: logout GET with the captured token; a 302 is followed
    /// once more with an added CSRF cookie.
    async fn logoff(&mut self) -> Result<(), TrialError> {
        let resp = self
            .http()
            .get(&self.logout_url)
            .header(COOKIE, &self.logout_token)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .send()
            .await
            .map_err(|err| TrialError::transport("logoff", err))?;

        let resp = if resp.status() == StatusCode::FOUND {
            let location = header_str(&resp, LOCATION)
                .ok_or_else(|| TrialError::malformed("logoff", "302 without Location"))?;
            let target = Url::parse(&self.logout_url)
                .and_then(|base| base.join(&location))
                .map_err(|err| TrialError::malformed("logoff", err.to_string()))?;
            self.http()
                .get(target)
                .header(
                    COOKIE,
                    format!("csrftoken={};{}", self.csrf_token, self.logout_token),
                )
                .send()
                .await
                .map_err(|err| TrialError::transport("logoff", err))?
        } else {
            resp
        };

        if resp.status() != StatusCode::OK {
            return Err(TrialError::protocol("logoff", resp.status().as_u16(), ""));
        }
        Ok(())
    }

    /// Manual redirect chain. `copy_cookies` controls whether each
    /// hop's `Set-Cookie` is carried into the next request.
    async fn follow_redirects(
        &self,
        entry_url: &str,
        copy_cookies: bool,
    ) -> Result<RedirectChain, TrialError> {
        let mut current = Url::parse(entry_url)
            .map_err(|err| TrialError::malformed("init_login", err.to_string()))?;
        let mut cookies = String::new();
        let mut last_location = None;
        let mut last_redirect_cookie = None;

        let mut hops = 0;
        loop {
            let mut request = self.http().get(current.clone());
            if copy_cookies && !cookies.is_empty() {
                request = request.header(COOKIE, &cookies);
            }
            let response = request
                .send()
                .await
                .map_err(|err| TrialError::transport("init_login", err))?;

            if !response.status().is_redirection() {
                return Ok(RedirectChain {
                    response,
                    last_location,
                    last_redirect_cookie,
                });
            }

            hops += 1;
            if hops > MAX_REDIRECT_HOPS {
                return Err(TrialError::malformed("init_login", "redirect loop"));
            }
            if let Some(cookie) = first_set_cookie(&response) {
                last_redirect_cookie = Some(purify_cookie(cookie));
            }
            for cookie in set_cookies(&response) {
                if !cookies.is_empty() {
                    cookies.push(';');
                }
                cookies.push_str(&purify_cookie(cookie));
            }
            let location = header_str(&response, LOCATION)
                .ok_or_else(|| TrialError::malformed("init_login", "redirect without Location"))?;
            current = current
                .join(&location)
                .map_err(|err| TrialError::malformed("init_login", err.to_string()))?;
            last_location = Some(current.to_string());
        }
    }
}

struct RedirectChain {
    response: Response,
    last_location: Option<String>,
    last_redirect_cookie: Option<String>,
}

#[async_trait]
impl Runner for FederatedRunner {
    async fn setup(&mut self, worker_index: usize, pool: Option<Arc<ResourcePool>>) -> Result<()> {
        self.http = Some(http_client(&self.config, true)?);
        self.user = format!("{}{}", self.config.user_prefix, worker_index + 1);
        self.pool = pool;
        info!(worker = worker_index, "setup for federated login");
        Ok(())
    }

    async fn run(&mut self) -> Result<(), TrialError> {
        let (user, password, seed, entry_url) = match &self.pool {
            None => (
                self.user.clone(),
                self.config.password.clone(),
                String::new(),
                self.config.url.clone().unwrap_or_default(),
            ),
            Some(pool) => {
                let resource = pool.get()?;
                let url = match &resource.custom {
                    ProtocolMetadata::Federated { sp_url } => sp_url.clone(),
                    _ => self.config.url.clone().ok_or_else(|| {
                        TrialError::malformed("setup", "resource has no service-provider URL")
                    })?,
                };
                (
                    resource.user.clone(),
                    resource.password.clone(),
                    resource.seed.clone(),
                    url,
                )
            }
        };
        self.user = user;

        self.init_login(&entry_url).await?;
        self.idp_login(&password, &seed).await?;
        self.goto_sp_page().await?;
        if self.config.logout {
            self.logoff().await?;
        }
        debug!(user = %self.user, "federated login round trip complete");
        Ok(())
    }
}

fn purify_cookie(cookie: impl AsRef<str>) -> String {
    cookie
        .as_ref()
        .split(';')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn first_set_cookie(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect()
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok().map(str::to_string))
}
