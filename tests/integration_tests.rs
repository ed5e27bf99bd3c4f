//! Integration tests using wiremock to simulate HTTP servers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard::retry::{RetryOnRetryable, RetryPredicate};
use switchyard::{CancellationToken, Client, Error, RequestMetadata, RetryStrategy};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TestData {
    id: u32,
    name: String,
}

fn test_data() -> TestData {
    TestData {
        id: 1,
        name: "Test".to_string(),
    }
}

fn fast_linear(max_retries: usize) -> RetryStrategy {
    RetryStrategy::Linear {
        delay: Duration::from_millis(10),
        max_retries,
    }
}

fn client_for(server: &MockServer) -> Client {
    Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_strategy(fast_linear(3))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client.get::<TestData>("/test").await.unwrap();

    assert_eq!(response.data, test_data());
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
    assert!(!response.from_cache);
}

#[tokio::test]
async fn test_successful_post_request() {
    let mock_server = MockServer::start().await;

    let request_data = TestData {
        id: 0,
        name: "New".to_string(),
    };

    Mock::given(method("POST"))
        .and(path("/test"))
        .and(header("content-type", "application/json"))
        .and(body_json(&request_data))
        .respond_with(ResponseTemplate::new(201).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client
        .post::<TestData, TestData>("/test", &request_data)
        .await
        .unwrap();

    assert_eq!(response.data, test_data());
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_http_error_4xx_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let result = client.get::<TestData>("/test").await;

    match &result {
        Err(err @ Error::HttpError {
            status,
            raw_response,
            ..
        }) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(raw_response, "Not found");
            assert_eq!(err.to_string(), "HTTP 404: Not found");
        }
        _ => panic!("Expected HttpError, got {:?}", result),
    }
}

#[tokio::test]
async fn test_deserialization_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("invalid json"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let result = client.get::<TestData>("/test").await;

    match result {
        Err(Error::DeserializationFailed {
            raw_response,
            serde_error,
            status,
        }) => {
            assert_eq!(status.as_u16(), 200);
            assert_eq!(raw_response, "invalid json");
            assert!(serde_error.contains("expected"));
        }
        _ => panic!("Expected DeserializationFailed, got {:?}", result),
    }
}

#[tokio::test]
async fn test_retry_on_5xx() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First two requests fail with 500, third succeeds
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(500).set_body_string("Server error")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_strategy(fast_linear(3))
        .retry_predicate(Box::new(RetryOnRetryable))
        .build()
        .unwrap();

    let response = client.get::<TestData>("/test").await.unwrap();

    assert_eq!(response.data.id, 1);
    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_max_retries_exceeded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_strategy(fast_linear(2))
        .build()
        .unwrap();

    let result = client.get::<TestData>("/test").await;

    match &result {
        Err(err @ Error::MaxRetriesExceeded { attempts, .. }) => {
            // 1 initial attempt + 2 retries
            assert_eq!(*attempts, 3);
            assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
            assert_eq!(err.to_string(), "max retries exceeded: HTTP 500: Server error");
        }
        _ => panic!("Expected MaxRetriesExceeded, got {:?}", result),
    }
}

#[tokio::test]
async fn test_with_retries_derives_an_independent_client() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let no_retries = client.with_retries(0).unwrap();

    let err = no_retries.get::<TestData>("/test").await.unwrap_err();
    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 1, .. }));

    let err = client.get::<TestData>("/test").await.unwrap_err();
    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 4, .. }));
}

#[tokio::test]
async fn test_custom_retry_predicate() {
    let mock_server = MockServer::start().await;

    // Custom predicate that only retries on 503
    struct RetryOn503;
    impl RetryPredicate for RetryOn503 {
        fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
            matches!(
                error,
                Error::HttpError { status, .. } if status.as_u16() == 503
            )
        }
    }

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_strategy(fast_linear(3))
        .retry_predicate(Box::new(RetryOn503))
        .build()
        .unwrap();

    // Should fail immediately because 500 doesn't match our predicate
    let result = client.get::<TestData>("/test").await;

    match result {
        Err(Error::HttpError { status, .. }) => {
            assert_eq!(status.as_u16(), 500);
        }
        _ => panic!("Expected HttpError, got {:?}", result),
    }
}

#[tokio::test]
async fn test_response_metadata() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(test_data())
                .insert_header("x-custom-header", "custom-value"),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client.get::<TestData>("/test").await.unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(response.text().contains("Test"));
    assert_eq!(response.header("x-custom-header"), Some("custom-value"));
    assert_eq!(response.url.path(), "/test");
}

#[tokio::test]
async fn test_default_and_derived_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .and(header("user-agent", "test-agent"))
        .and(header("authorization", "Bearer secret"))
        .and(header("x-api-key", "key-1"))
        .and(header("x-request", "per-call"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server)
        .with_user_agent("test-agent")
        .unwrap()
        .with_auth("secret")
        .unwrap()
        .with_api_key("key-1")
        .unwrap();

    let metadata = RequestMetadata::new(http::Method::GET, "/test")
        .with_header("x-request", "per-call")
        .unwrap();
    client.call::<(), TestData>(metadata, None).await.unwrap();
}

#[tokio::test]
async fn test_default_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header(
            "user-agent",
            concat!("switchyard/", env!("CARGO_PKG_VERSION")),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    client.get::<TestData>("/").await.unwrap();
}

#[tokio::test]
async fn test_query_parameters() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .and(query_param("page", "1"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);

    let metadata = RequestMetadata::new(http::Method::GET, "/test")
        .with_query_param("page", "1")
        .with_query_param("limit", "10");

    let response = client.call::<(), TestData>(metadata, None).await.unwrap();
    assert_eq!(response.data.id, 1);
    assert_eq!(response.url.query(), Some("page=1&limit=10"));
}

#[tokio::test]
async fn test_all_http_methods() {
    let mock_server = MockServer::start().await;

    for verb in ["GET", "PUT", "PATCH"] {
        Mock::given(method(verb))
            .and(path("/test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("POST"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(201).set_body_json(test_data()))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-exists", "yes"))
        .mount(&mock_server)
        .await;

    Mock::given(method("OPTIONS"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(204).insert_header("allow", "GET, POST"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let body = test_data();

    client.get::<TestData>("/test").await.unwrap();
    client.post::<_, TestData>("/test", &body).await.unwrap();
    client.put::<_, TestData>("/test", &body).await.unwrap();
    client.patch::<_, TestData>("/test", &body).await.unwrap();

    // An empty 204 body reads as JSON null
    let deleted = client.delete::<()>("/test").await.unwrap();
    assert_eq!(deleted.status.as_u16(), 204);
    let deleted = client.delete::<Option<TestData>>("/test").await.unwrap();
    assert!(deleted.data.is_none());

    let head = client.head("/test").await.unwrap();
    assert_eq!(head.header("x-exists"), Some("yes"));
    assert!(head.raw_body.is_empty());

    let options = client.options("/test").await.unwrap();
    assert_eq!(options.header("allow"), Some("GET, POST"));
}

#[tokio::test]
async fn test_absolute_url_without_base() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/absolute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::new().unwrap();
    let url = format!("{}/absolute", mock_server.uri());
    client.get::<TestData>(url).await.unwrap();

    let err = client.get::<TestData>("/relative").await.unwrap_err();
    assert!(matches!(err, Error::ConfigurationError(_)));
}

#[tokio::test]
async fn test_package_level_helpers_use_the_default_client() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(201).set_body_json(test_data()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let created: switchyard::Response<TestData> =
        switchyard::post(format!("{}/items", mock_server.uri()), &test_data())
            .await
            .unwrap();
    assert_eq!(created.data, test_data());

    let a = switchyard::default_client().unwrap();
    let b = switchyard::default_client().unwrap();
    assert_eq!(a.config().timeout, b.config().timeout);
}

#[tokio::test]
async fn test_retry_after_respected_on_5xx() {
    let mock_server = MockServer::start().await;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First request returns 503 with Retry-After, second succeeds
    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(503)
                    .insert_header("retry-after", "1")
                    .insert_header("x-ratelimit-remaining", "0")
                    .set_body_string("Slow down")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_strategy(RetryStrategy::Linear {
            delay: Duration::from_millis(100),
            max_retries: 3,
        })
        .respect_retry_after(true)
        .build()
        .unwrap();

    let start = std::time::Instant::now();
    let response = client.get::<TestData>("/test").await.unwrap();

    assert_eq!(response.data.id, 1);
    assert_eq!(response.attempts, 2);
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_retry_after_ignored_by_default() {
    let mock_server = MockServer::start().await;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(503)
                    .insert_header("retry-after", "10")
                    .set_body_string("Slow down")
            } else {
                ResponseTemplate::new(200).set_body_json(test_data())
            }
        })
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .retry_strategy(RetryStrategy::Linear {
            delay: Duration::from_millis(100),
            max_retries: 3,
        })
        .build()
        .unwrap();

    let start = std::time::Instant::now();
    let response = client.get::<TestData>("/test").await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn test_rate_limited_client_error_keeps_hints() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "600")
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_string("Rate limited"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.get::<TestData>("/test").await.unwrap_err();

    let info = err.rate_limit_info().expect("rate limit hints");
    assert!(info.is_rate_limited());
    assert_eq!(
        err.rate_limit_delay(Duration::from_secs(2)),
        Some(Duration::from_secs(2))
    );
}

#[tokio::test]
async fn test_cancellation_stops_the_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let start = std::time::Instant::now();
    let metadata = RequestMetadata::new(http::Method::GET, "/slow").with_cancellation(token);
    let err = client.send::<()>(metadata, None).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_per_call_deadline() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let metadata =
        RequestMetadata::new(http::Method::GET, "/slow").with_timeout(Duration::from_millis(200));
    let err = client.send::<()>(metadata, None).await.unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(err.is_cancellation());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_serialization_failure_is_not_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut body = std::collections::HashMap::new();
    body.insert(vec![1u8, 2], "non-string keys cannot be JSON");

    let client = client_for(&mock_server);
    let err = client
        .post::<_, serde_json::Value>("/test", &body)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SerializationFailed(_)));
}

#[tokio::test]
async fn test_connection_errors_are_retried() {
    // Nothing listens on port 1.
    let client = Client::builder()
        .base_url("http://127.0.0.1:1")
        .unwrap()
        .retry_strategy(fast_linear(2))
        .retry_predicate(Box::new(switchyard::retry::RetryOnConnectionError))
        .build()
        .unwrap();

    let err = client.get::<TestData>("/test").await.unwrap_err();
    match &err {
        Error::MaxRetriesExceeded { attempts, last_error } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last_error, Error::Network(_)));
        }
        other => panic!("Expected MaxRetriesExceeded, got {other:?}"),
    }
    assert!(err.status().is_none());
}
