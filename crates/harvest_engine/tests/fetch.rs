use std::sync::{Arc, Once};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvest_engine::{
    classify_attempt, AttemptOutcome, FailureKind, PageFetcher, PageRequest, ReqwestTransport,
    RetrySettings, TransportError, TransportResponse, TransportSettings,
};

const SEARCH_PATH: &str = "/SymbolSearch/QuerySymbolsDD";

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(harvest_logging::initialize_for_tests);
}

fn fetcher_for(server: &MockServer, retry_count: usize) -> PageFetcher {
    let settings = TransportSettings {
        base_url: server.uri(),
        ..TransportSettings::default()
    };
    let transport = Arc::new(ReqwestTransport::new(settings).expect("client"));
    PageFetcher::new(
        transport,
        PageRequest::default(),
        RetrySettings {
            retry_count,
            retry_delay: Duration::from_millis(5),
        },
        CancellationToken::new(),
    )
}

fn page_body(symbols: &[&str], has_more: bool, next_key: Option<&str>) -> serde_json::Value {
    json!({
        "data": {
            "symbolList": symbols
                .iter()
                .map(|s| json!({"symbol": s, "exchange": "NYSE"}))
                .collect::<Vec<_>>(),
            "totalFound": symbols.len(),
            "hasMore": has_more,
            "nextKey": next_key,
        }
    })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

#[tokio::test]
async fn returns_page_on_success() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(page_body(&["IBM", "AAPL"], true, Some("k2"))),
        )
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let page = fetcher.fetch_page(None).await.expect("fetch ok");

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].symbol, "IBM");
    assert_eq!(page.total_available, 2);
    assert!(page.has_more);
    assert_eq!(page.next_key.as_deref(), Some("k2"));
}

#[tokio::test]
async fn transient_backend_error_retries_until_success() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": ["Unable to connect to backend search database"]
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["IBM"], false, None)))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let page = fetcher.fetch_page(None).await.expect("third attempt succeeds");

    assert_eq!(page.records.len(), 1);
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn unknown_backend_error_is_not_retried() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errors": ["Invalid symbology"]})),
        )
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let err = fetcher.fetch_page(None).await.unwrap_err();

    assert_eq!(err.kind, FailureKind::Backend);
    assert_eq!(err.message, "Invalid symbology");
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn server_errors_exhaust_after_retry_count_attempts() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let err = fetcher.fetch_page(None).await.unwrap_err();

    assert_eq!(err.kind, FailureKind::Exhausted);
    assert_eq!(err.message, "HTTP 503");
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let err = fetcher.fetch_page(None).await.unwrap_err();

    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert!(err.message.contains("not here"));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn unrecognized_envelope_is_not_retried() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let err = fetcher.fetch_page(None).await.unwrap_err();

    assert_eq!(err.kind, FailureKind::Malformed);
    assert_eq!(request_count(&server).await, 1);
}

// Classification is pure, so the backoff schedule is checked without a server.

fn server_error(status: u16) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status,
        body: Vec::new(),
    })
}

fn retry_delay_of(outcome: AttemptOutcome) -> Duration {
    match outcome {
        AttemptOutcome::RetryAfter { delay, .. } => delay,
        other => panic!("expected RetryAfter, got {other:?}"),
    }
}

#[test]
fn server_error_backoff_is_non_decreasing() {
    let base = Duration::from_secs(5);
    let delays: Vec<Duration> = (0..3)
        .map(|attempt| retry_delay_of(classify_attempt(server_error(500), attempt, base)))
        .collect();

    assert_eq!(delays, vec![base, base * 2, base * 3]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn transient_backend_backoff_waits_longest() {
    let base = Duration::from_secs(5);
    let body = serde_json::to_vec(&json!({
        "errors": ["Unable to connect to backend search database"]
    }))
    .unwrap();
    let outcome = classify_attempt(Ok(TransportResponse { status: 200, body }), 0, base);

    assert_eq!(retry_delay_of(outcome), base * 2);
}

#[test]
fn timeout_backoff_is_flat() {
    let base = Duration::from_secs(5);
    for attempt in 0..3 {
        let outcome = classify_attempt(Err(TransportError::Timeout), attempt, base);
        assert_eq!(retry_delay_of(outcome), base);
    }
}

#[test]
fn connection_backoff_escalates() {
    let base = Duration::from_secs(5);
    let outcome = classify_attempt(
        Err(TransportError::Connection("reset by peer".into())),
        1,
        base,
    );

    assert_eq!(retry_delay_of(outcome), base * 2);
}
