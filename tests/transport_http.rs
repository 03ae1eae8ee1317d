//! HttpTransport against a real local HTTP server.

use inventory_resilience::transport::{ApiRequest, HttpTransport, Method, Transport};
use inventory_resilience::{Error, ErrorKind, RateLimitSource};
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

fn transport(server: &mockito::ServerGuard) -> HttpTransport {
    HttpTransport::new(format!("{}/api", server.url()), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn sends_standard_headers_and_parses_json() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/orders")
        .match_header("content-type", "application/json")
        .match_header("accept", "application/json")
        .match_header("authorization", "Bearer secret-token")
        .match_header("x-request-id", Matcher::Regex("^[0-9a-f-]{36}$".into()))
        .match_body(Matcher::Json(json!({"sku": "A-1", "quantity": 2})))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success":true,"data":{"id":99}}"#)
        .expect(1)
        .create_async()
        .await;

    let mut req = ApiRequest::new(Method::Post, "/orders", Some(json!({"sku": "A-1", "quantity": 2})));
    req.bearer = Some("secret-token".into());
    let resp = transport(&server).send(&req).await.unwrap();

    assert_eq!(resp.status, 201);
    assert_eq!(resp.body["data"]["id"], 99);
    mock.assert_async().await;
}

#[tokio::test]
async fn no_authorization_header_without_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/products")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let req = ApiRequest::new(Method::Get, "/products", None);
    let resp = transport(&server).send(&req).await.unwrap();
    assert_eq!(resp.body, json!([]));
    mock.assert_async().await;
}

#[tokio::test]
async fn error_statuses_are_classified() {
    let mut server = mockito::Server::new_async().await;
    let _unauthorized = server
        .mock("GET", "/api/auth/verify")
        .with_status(401)
        .with_body(r#"{"message":"Token expired","code":"TOKEN_EXPIRED"}"#)
        .create_async()
        .await;
    let _forbidden = server
        .mock("DELETE", "/api/products/1")
        .with_status(403)
        .with_body(r#"{"message":"Admins only"}"#)
        .create_async()
        .await;
    let _limited = server
        .mock("GET", "/api/analytics/sales")
        .with_status(429)
        .with_header("retry-after", "2")
        .with_body(r#"{"message":"slow down"}"#)
        .create_async()
        .await;
    let _unavailable = server
        .mock("GET", "/api/orders")
        .with_status(503)
        .with_body(r#"{"error":{"message":"maintenance","code":"MAINTENANCE"}}"#)
        .create_async()
        .await;
    let _html = server
        .mock("GET", "/api/suppliers")
        .with_status(502)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Bad Gateway</body></html>")
        .create_async()
        .await;

    let t = transport(&server);
    let send = |method, endpoint: &'static str| {
        let t = &t;
        async move { t.send(&ApiRequest::new(method, endpoint, None)).await.unwrap_err() }
    };

    let err = send(Method::Get, "/auth/verify").await;
    assert_eq!(err.kind(), ErrorKind::AuthenticationRequired);
    assert_eq!(err.code(), "TOKEN_EXPIRED");
    assert_eq!(err.endpoint(), Some("/auth/verify"));

    let err = send(Method::Delete, "/products/1").await;
    assert_eq!(err.status(), Some(403));
    assert!(!err.is_retryable());

    let err = send(Method::Get, "/analytics/sales").await;
    assert_eq!(
        err,
        Error::RateLimited {
            endpoint: "/analytics/sales".into(),
            limited_by: RateLimitSource::Remote,
            retry_after_ms: Some(2000),
        }
    );
    assert!(err.is_retryable());

    let err = send(Method::Get, "/orders").await;
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.code(), "MAINTENANCE");
    assert!(err.is_retryable());

    let err = send(Method::Get, "/suppliers").await;
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn slow_server_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept connections and never answer.
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let t = HttpTransport::new(format!("http://{}", addr), Duration::from_millis(200)).unwrap();
    let started = std::time::Instant::now();
    let err = t
        .send(&ApiRequest::new(Method::Get, "/products", None))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::Timeout {
            endpoint: "/products".into(),
            timeout_ms: 200,
        }
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    server.abort();
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let t = HttpTransport::new(format!("http://127.0.0.1:{}", port), Duration::from_secs(2)).unwrap();
    let err = t
        .send(&ApiRequest::new(Method::Get, "/health", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_retryable());
}
