//! Full browser-flow round trips against a mocked identity/service
//! provider pair.

mod common;

use std::sync::Arc;

use auth_loadtest::pool::{IdentityResource, ProtocolMetadata, ResourceClient, ResourcePool};
use auth_loadtest::runner::federated::FederatedRunner;
use auth_loadtest::runner::Runner;
use auth_loadtest::AuthProtocol;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use common::test_config;

const SEED: &str = "3132333435363738393031323334353637383930";

fn login_page(csrf: &str) -> String {
    format!(
        r#"<html><body><form action="/idp/login" method="post">
        <input type="hidden" name="csrfmiddlewaretoken" value="{csrf}"/>
        <input type="text" name="username"/>
        </form></body></html>"#
    )
}

fn assertion_page(acs_url: &str) -> String {
    format!(
        r#"<html><body onload="document.forms[0].submit()">
        <form action="{acs_url}" method="POST">
        <input type="hidden" name="SAMLResponse" value="PHNhbWw+"/>
        <input type="hidden" name="RelayState" value="/app"/>
        </form></body></html>"#
    )
}

/// Matches a credential POST carrying a 6-digit generated code.
struct SixDigitTokenCode;

impl Match for SixDigitTokenCode {
    fn matches(&self, request: &Request) -> bool {
        let body = String::from_utf8_lossy(&request.body);
        body.find("token_code=").is_some_and(|at| {
            let code = &body[at + "token_code=".len()..];
            code.chars().take_while(|c| c.is_ascii_digit()).count() == 6
        })
    }
}

async fn mount_entry_and_login_page(server: &MockServer, csrf: &str) {
    Mock::given(method("GET"))
        .and(path("/sso"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/idp/login", server.uri()).as_str())
                .insert_header("Set-Cookie", "spinit=1; Path=/"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/idp/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "sessionid=s1; Path=/; HttpOnly")
                .set_body_string(login_page(csrf)),
        )
        .mount(server)
        .await;
}

async fn mount_service_provider(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/acs"))
        .and(body_string_contains("SAMLResponse=PHNhbWw%2B"))
        .and(header("Cookie", "spinit=1"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/app/")
                .insert_header("Set-Cookie", "spsession=sp1; Path=/"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/app/"))
        .and(header("Cookie", "spinit=1;spsession=sp1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "token=deadbeef; Path=/")
                .set_body_string("<html><body>Login Successful</body></html>"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn happy_path_with_logout() {
    let server = MockServer::start().await;
    mount_entry_and_login_page(&server, "tok-1").await;
    mount_service_provider(&server).await;

    Mock::given(method("POST"))
        .and(path("/idp/login"))
        .and(body_string_contains("csrfmiddlewaretoken=tok-1"))
        .and(body_string_contains("username=perftest1"))
        .and(body_string_contains("password=secret"))
        .and(header("Cookie", "sessionid=s1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(assertion_page(&format!("{}/acs", server.uri()))),
        )
        .mount(&server)
        .await;

    // Logout is a 302 that must be refollowed with the CSRF cookie added.
    Mock::given(method("GET"))
        .and(path("/app/logout"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/idp/logged-out"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/idp/logged-out"))
        .and(header("Cookie", "csrftoken=tok-1;token=deadbeef; Path=/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(AuthProtocol::Federated);
    config.url = Some(format!("{}/sso", server.uri()));
    config.logout = true;

    let mut runner = FederatedRunner::new(config);
    runner.setup(0, None).await.expect("setup");
    runner.run().await.expect("login round trip should pass");
}

#[tokio::test]
async fn missing_success_marker_fails_the_trial() {
    let server = MockServer::start().await;
    mount_entry_and_login_page(&server, "tok-1").await;

    Mock::given(method("POST"))
        .and(path("/idp/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(assertion_page(&format!("{}/acs", server.uri()))),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/acs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>Access Denied</body></html>"),
        )
        .mount(&server)
        .await;

    let mut config = test_config(AuthProtocol::Federated);
    config.url = Some(format!("{}/sso", server.uri()));

    let mut runner = FederatedRunner::new(config);
    runner.setup(0, None).await.expect("setup");
    assert!(runner.run().await.is_err());
}

#[tokio::test]
async fn otp_branch_submits_generated_code() {
    let server = MockServer::start().await;
    mount_entry_and_login_page(&server, "tok-1").await;
    mount_service_provider(&server).await;

    // Credential POST lands on the challenge page carrying a fresh CSRF
    // token and no assertion form.
    Mock::given(method("POST"))
        .and(path("/idp/login"))
        .and(body_string_contains("password=secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_page("tok-2")))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/idp/login"))
        .and(body_string_contains("csrfmiddlewaretoken=tok-2"))
        .and(SixDigitTokenCode)
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(assertion_page(&format!("{}/acs", server.uri()))),
        )
        .mount(&server)
        .await;

    let config = test_config(AuthProtocol::Federated);
    let mut pool = ResourcePool::new(ResourceClient::new(
        reqwest::Client::new(),
        "localhost:8000",
    ));
    pool.add(IdentityResource {
        pool_id: "perf".to_string(),
        id: "1".to_string(),
        seed: SEED.to_string(),
        user: "perftest1".to_string(),
        password: "secret".to_string(),
        custom: ProtocolMetadata::Federated {
            sp_url: format!("{}/sso", server.uri()),
        },
    });

    let mut runner = FederatedRunner::new(config);
    runner.setup(0, Some(Arc::new(pool))).await.expect("setup");
    runner.run().await.expect("otp login should pass");
}

#[tokio::test]
async fn otp_required_but_not_supplied_fails() {
    let server = MockServer::start().await;
    mount_entry_and_login_page(&server, "tok-1").await;

    // Without a seed the runner stops at the challenge page, which has
    // no assertion form to relay.
    Mock::given(method("POST"))
        .and(path("/idp/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><input type="hidden" name="csrfmiddlewaretoken" value="tok-2"/>
            Enter the code from your authenticator.</body></html>"#,
        ))
        .mount(&server)
        .await;

    let mut config = test_config(AuthProtocol::Federated);
    config.url = Some(format!("{}/sso", server.uri()));

    let mut runner = FederatedRunner::new(config);
    runner.setup(0, None).await.expect("setup");
    assert!(runner.run().await.is_err());
}
