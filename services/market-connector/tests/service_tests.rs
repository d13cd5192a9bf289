//! Service facade over the in-memory broker

mod common;

use auth::{InMemoryCredentialStore, SessionCredentials};
use common::{MockTransport, Outcome, SESSION, instruments, next_session, wait_for_state};
use market_connector::{AdapterState, ConnectorConfig, MarketConnectorService, STATUS_SUCCESS};
use pretty_assertions::assert_eq;
use rstest::*;
use services_common::{ErrorCode, TickBus};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Harness {
    service: MarketConnectorService,
    transport: Arc<MockTransport>,
    sessions: mpsc::UnboundedReceiver<common::MockSession>,
}

#[fixture]
fn harness() -> Harness {
    let (transport, sessions) = MockTransport::new(Outcome::Accept);
    let credentials = InMemoryCredentialStore::new();
    credentials.insert(
        SESSION,
        SessionCredentials::new("auth-token")
            .with_api_key("api-key")
            .with_client_code("A123")
            .with_feed_token("feed-token"),
    );
    let service = MarketConnectorService::new(
        ConnectorConfig::default(),
        Arc::new(TickBus::default()),
        transport.clone(),
        Arc::new(credentials),
    );
    service.register_resolver("angel", instruments("nse_cm"));
    Harness {
        service,
        transport,
        sessions,
    }
}

#[rstest]
#[tokio::test]
async fn test_subscribe_through_service(harness: Harness) {
    let Harness {
        service,
        transport,
        mut sessions,
    } = harness;

    service.initialize("Angel", SESSION).unwrap();
    service.connect("angel", SESSION).await.unwrap();
    let _session = next_session(&mut sessions).await;
    let adapter = service.adapter("angel", SESSION).unwrap();
    wait_for_state(adapter.as_ref(), AdapterState::Connected).await;

    let response = service
        .subscribe("angel", SESSION, "RELIANCE", "NSE", 3, 20)
        .unwrap();
    assert_eq!(response.status, STATUS_SUCCESS);
    assert!(response.is_fallback);
    assert_eq!(response.actual_depth, 5);

    let status = service.status("angel", SESSION).unwrap();
    assert_eq!(status.state, AdapterState::Connected);
    assert_eq!(status.subscriptions, 1);
    assert_eq!(status.last_error, None);

    let removed = service
        .unsubscribe("angel", SESSION, "RELIANCE", "NSE", 3)
        .unwrap();
    assert_eq!(removed.correlation_id, response.correlation_id);

    service.shutdown().await;
    assert_eq!(service.status("angel", SESSION).unwrap().state, AdapterState::Stopped);
    assert_eq!(transport.connects(), 1);
}

#[rstest]
#[case("RELIANCE", "NSE", 4, ErrorCode::InvalidRequest)]
#[case("", "NSE", 1, ErrorCode::InvalidRequest)]
#[case("NOSUCH", "NSE", 1, ErrorCode::SymbolNotFound)]
#[case("NIFTY 50", "NSE_INDEX", 3, ErrorCode::UnsupportedCapability)]
#[tokio::test]
async fn test_subscribe_errors_are_structured(
    harness: Harness,
    #[case] symbol: &str,
    #[case] exchange: &str,
    #[case] mode: u8,
    #[case] expected: ErrorCode,
) {
    harness.service.initialize("angel", SESSION).unwrap();
    let err = harness
        .service
        .subscribe("angel", SESSION, symbol, exchange, mode, 5)
        .unwrap_err();
    assert_eq!(err.error_code, expected);
    assert!(!err.message.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_unsubscribe_all_through_service(harness: Harness) {
    let service = harness.service;
    service.initialize("angel", SESSION).unwrap();
    service.subscribe("angel", SESSION, "RELIANCE", "NSE", 1, 0).unwrap();
    service.subscribe("angel", SESSION, "INFY", "NSE", 2, 0).unwrap();
    let extra = service.subscribe("angel", SESSION, "TCS", "NSE", 1, 0).unwrap();

    service
        .unsubscribe_id("angel", SESSION, &extra.correlation_id)
        .unwrap();
    assert_eq!(service.unsubscribe_all("angel", SESSION).unwrap(), 2);
    assert_eq!(service.status("angel", SESSION).unwrap().subscriptions, 0);
}

#[rstest]
#[tokio::test]
async fn test_uninitialized_session_is_invalid(harness: Harness) {
    let err = harness.service.connect("angel", "other").await.unwrap_err();
    assert_eq!(err.error_code, ErrorCode::InvalidRequest);
}
