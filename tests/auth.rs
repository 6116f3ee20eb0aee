// SPDX-License-Identifier: MIT

//! End-to-end authentication flows against an in-process daemon and a
//! mocked portal backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use ncalink::auth::Authenticator;
use ncalink::config::Config;
use ncalink::error::{AuthError, BackendError};
use ncalink::session::{MemorySessionStore, Role, Session, SessionStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{error_frame, ok_frame, refused_endpoint, MockDaemon, Reply};

fn signing_daemon_reply(request: serde_json::Value) -> Reply {
    match request["method"].as_str() {
        Some("signXml") => Reply::Now(ok_frame(json!("<signed/>"))),
        _ => Reply::Silent,
    }
}

async fn backend_with_profile(profile: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
#[tracing_test::traced_test]
async fn eds_login_end_to_end() -> anyhow::Result<()> {
    let daemon = MockDaemon::spawn(signing_daemon_reply).await;
    let backend = backend_with_profile(json!({
        "is_superuser": false,
        "is_new_user": true,
        "full_name": "Aigerim B.",
    }))
    .await;
    Mock::given(method("POST"))
        .and(path("/auth/eds/login"))
        .and(body_partial_json(json!({ "signed_xml": "<signed/>" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t1",
            "is_new_user": true,
        })))
        .mount(&backend)
        .await;

    let config = Config {
        backend_url: backend.uri(),
        ..daemon.config()
    };
    let store = Arc::new(MemorySessionStore::new());
    let authenticator = Authenticator::new(config, store.clone());

    let session = authenticator.login_with_eds().await?;

    assert_eq!(session.token, "t1");
    // No role anywhere in the login payload: the default applies and the
    // profile refresh must not change it.
    assert_eq!(session.role, Role::Employee);
    assert!(session.is_new_user);
    assert_eq!(session.profile["full_name"], "Aigerim B.");
    assert_eq!(store.load()?, Some(session));
    // The orchestrator released the daemon connection.
    daemon.wait_for_disconnect().await;
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn eds_login_fails_cleanly_when_daemon_unreachable() -> anyhow::Result<()> {
    let config = Config {
        daemon_endpoint: refused_endpoint().await,
        connect_timeout: Duration::from_secs(2),
        ..Config::default()
    };
    let store = Arc::new(MemorySessionStore::new());
    let prior: Session = serde_json::from_str(r#"{"token":"t0","role":"supervisor"}"#)?;
    store.save(&prior)?;
    let authenticator = Authenticator::new(config, store.clone());

    match authenticator.login_with_eds().await {
        Err(AuthError::Connection(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    // The failed attempt left the stored session untouched.
    assert_eq!(store.load()?, Some(prior));
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn signing_cancellation_fails_the_attempt() -> anyhow::Result<()> {
    let daemon = MockDaemon::spawn(|request| match request["method"].as_str() {
        Some("signXml") => Reply::Now(error_frame("action.canceled")),
        _ => Reply::Silent,
    })
    .await;
    let store = Arc::new(MemorySessionStore::new());
    let authenticator = Authenticator::new(daemon.config(), store.clone());

    match authenticator.login_with_eds().await {
        Err(AuthError::Signing(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(store.load()?, None);
    daemon.wait_for_disconnect().await;
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn profile_refresh_normalizes_legacy_admin_role() -> anyhow::Result<()> {
    let backend = backend_with_profile(json!({ "is_superuser": false })).await;
    let store = Arc::new(MemorySessionStore::new());
    // A session persisted by an older portal build, legacy role label and
    // all.
    let prior: Session = serde_json::from_str(r#"{"token":"t0","role":"administrator"}"#)?;
    store.save(&prior)?;

    let config = Config {
        backend_url: backend.uri(),
        ..Config::default()
    };
    let authenticator = Authenticator::new(config, store.clone());
    let session = authenticator.refresh_profile().await?;

    // The stored role wins over is_superuser, normalized to the canonical
    // label.
    assert_eq!(session.role, Role::Admin);
    assert_eq!(
        serde_json::to_value(&session)?["role"],
        json!("admin")
    );
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn email_login_derives_role_from_superuser_flag() -> anyhow::Result<()> {
    let backend = backend_with_profile(json!({ "is_superuser": true })).await;
    Mock::given(method("POST"))
        .and(path("/auth/email/login"))
        .and(body_partial_json(json!({ "email": "a@example.kz" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t2",
        })))
        .mount(&backend)
        .await;

    let config = Config {
        backend_url: backend.uri(),
        ..Config::default()
    };
    let store = Arc::new(MemorySessionStore::new());
    let authenticator = Authenticator::new(config, store.clone());

    let session = authenticator.login_with_email("a@example.kz", "hunter2").await?;
    assert_eq!(session.role, Role::Admin);

    authenticator.logout();
    assert_eq!(store.load()?, None);
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn email_login_with_role_keeps_it_over_superuser_flag() -> anyhow::Result<()> {
    let backend = backend_with_profile(json!({ "is_superuser": true })).await;
    Mock::given(method("POST"))
        .and(path("/auth/email/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t3",
            "role": "supervisor",
        })))
        .mount(&backend)
        .await;

    let config = Config {
        backend_url: backend.uri(),
        ..Config::default()
    };
    let authenticator = Authenticator::new(config, Arc::new(MemorySessionStore::new()));

    let session = authenticator.login_with_email("b@example.kz", "hunter2").await?;
    assert_eq!(session.role, Role::Supervisor);
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn reentrant_login_is_rejected() -> anyhow::Result<()> {
    // The daemon sits on the signing prompt long enough for a second
    // attempt to arrive.
    let daemon = MockDaemon::spawn(|request| match request["method"].as_str() {
        Some("signXml") => Reply::After(Duration::from_millis(400), ok_frame(json!("<signed/>"))),
        _ => Reply::Silent,
    })
    .await;
    let backend = backend_with_profile(json!({ "is_superuser": false })).await;
    Mock::given(method("POST"))
        .and(path("/auth/eds/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t1",
        })))
        .mount(&backend)
        .await;

    let config = Config {
        backend_url: backend.uri(),
        request_timeout: Duration::from_secs(5),
        ..daemon.config()
    };
    let authenticator = Arc::new(Authenticator::new(
        config,
        Arc::new(MemorySessionStore::new()),
    ));

    let first = {
        let authenticator = Arc::clone(&authenticator);
        tokio::spawn(async move { authenticator.login_with_eds().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    match authenticator.login_with_eds().await {
        Err(AuthError::AlreadyInProgress) => {}
        other => panic!("unexpected result: {other:?}"),
    }

    // The original attempt is unaffected by the rejected one.
    let session = first.await??;
    assert_eq!(session.token, "t1");
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn refresh_profile_clears_the_session_on_401() -> anyhow::Result<()> {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer t0"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&backend)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let prior: Session = serde_json::from_str(r#"{"token":"t0","role":"employee"}"#)?;
    store.save(&prior)?;

    let config = Config {
        backend_url: backend.uri(),
        ..Config::default()
    };
    let authenticator = Authenticator::new(config, store.clone());

    match authenticator.refresh_profile().await {
        Err(AuthError::Profile(BackendError::Unauthorized)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    // The token is gone; so is the session.
    assert_eq!(store.load()?, None);
    Ok(())
}

#[tokio::test]
#[tracing_test::traced_test]
async fn failed_profile_fetch_rolls_back_the_provisional_session() -> anyhow::Result<()> {
    let daemon = MockDaemon::spawn(signing_daemon_reply).await;
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/eds/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t1",
        })))
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&backend)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let prior: Session = serde_json::from_str(r#"{"token":"t0","role":"supervisor"}"#)?;
    store.save(&prior)?;

    let config = Config {
        backend_url: backend.uri(),
        ..daemon.config()
    };
    let authenticator = Authenticator::new(config, store.clone());

    match authenticator.login_with_eds().await {
        Err(AuthError::Profile(BackendError::Status { status, .. })) => {
            assert_eq!(status.as_u16(), 500);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    // The half-finished login did not replace the working session.
    assert_eq!(store.load()?, Some(prior));
    daemon.wait_for_disconnect().await;
    Ok(())
}
