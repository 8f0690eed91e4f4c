//! Tower layer behaviour over a plain `service_fn`

#![cfg(feature = "middleware")]

mod common;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::*;
use http::{Request, Response, StatusCode};
use pretty_assertions::assert_eq;
use tower::{Layer, ServiceExt};
use wiremock::MockServer;
use xsts_auth::ClientClaims;
use xsts_auth::tower::XstsAuthLayer;

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

async fn greet(req: Request<String>) -> Result<Response<String>, Infallible> {
    let body = match req.extensions().get::<ClientClaims>() {
        Some(claims) => format!("hello {}", claims.selected_user().gamertag().unwrap_or("-")),
        None => "anonymous".to_string(),
    };
    Ok(Response::new(body))
}

fn request(path: &str, authorization: Option<&str>) -> Request<String> {
    let mut builder = Request::builder().uri(path);
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder.body(String::new()).unwrap()
}

#[tokio::test]
async fn test_missing_header_is_forbidden() {
    let server = MockServer::start().await;
    let service = XstsAuthLayer::new(Arc::new(validator(&server))).layer(tower::service_fn(greet));

    let response = service.oneshot(request("/api/getclaims", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.body(), "Access Denied: Missing Authorization header");
}

#[tokio::test]
async fn test_valid_token_reaches_inner_service_with_claims() {
    let server = MockServer::start().await;
    let x5t = TOKEN_SIGNER.x5t();
    mount_signing_keys(&server, &[(x5t.as_str(), TOKEN_SIGNER.cert_pem.as_str())], 1).await;
    let token = TokenSpec::new(&server, payload(now() - 60, now() + 3600)).seal();
    let service = XstsAuthLayer::new(Arc::new(validator(&server))).layer(tower::service_fn(greet));

    let response = service
        .oneshot(request("/api/getclaims", Some(&authorization(USER_HASH, &token))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "hello Major Nelson");
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let server = MockServer::start().await;
    let x5t = TOKEN_SIGNER.x5t();
    mount_signing_keys(&server, &[(x5t.as_str(), TOKEN_SIGNER.cert_pem.as_str())], 1).await;
    let token = TokenSpec::new(&server, payload(now() - 7200, now() - 3600)).seal();
    let service = XstsAuthLayer::new(Arc::new(validator(&server))).layer(tower::service_fn(greet));

    let response = service
        .oneshot(request("/api/getclaims", Some(&authorization(USER_HASH, &token))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.body(), "Access Denied: XSTS token expired");
}

#[tokio::test]
async fn test_tampered_token_is_forbidden_without_detail() {
    let server = MockServer::start().await;
    let token = TokenSpec::new(&server, payload(now() - 60, now() + 3600)).seal();
    let tampered = flip_bit(&token, 4, 3);
    let service = XstsAuthLayer::new(Arc::new(validator(&server))).layer(tower::service_fn(greet));

    let response = service
        .oneshot(request("/api/getclaims", Some(&authorization(USER_HASH, &tampered))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.body(), "Access Denied: XSTS token invalid");
}

#[tokio::test]
async fn test_bypass_path_skips_validation() {
    let server = MockServer::start().await;
    let service = XstsAuthLayer::new(Arc::new(validator(&server)))
        .bypass("/health")
        .layer(tower::service_fn(greet));

    let response = service.oneshot(request("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "anonymous");
}
