//! HTTP surface tests driven through the router without a live socket

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use huddle_signal_server::auth::StaticTokenAuthenticator;
use huddle_signal_server::config::ServerConfig;
use huddle_signal_server::server::SignalServer;

async fn test_server() -> SignalServer {
    SignalServer::builder()
        .with_config(ServerConfig::default())
        .with_authenticator(Arc::new(
            StaticTokenAuthenticator::from_spec("alice=token-a").unwrap(),
        ))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn healthz_reports_counts() {
    let server = test_server().await;
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["liveSessions"], 0);
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let server = test_server().await;
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
