//! Upstream frames follow logical reference counts under arbitrary call orders

mod common;

use common::{MockTransport, Outcome, adapter, config, next_session, wait_for_state};
use market_connector::{AdapterState, BrokerAdapter};
use proptest::prelude::*;
use services_common::{InstrumentKey, SubscriptionMode, TickBus};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Call {
    Subscribe(SubscriptionMode),
    Unsubscribe(SubscriptionMode),
}

fn mode() -> impl Strategy<Value = SubscriptionMode> {
    prop_oneof![
        Just(SubscriptionMode::Ltp),
        Just(SubscriptionMode::Quote),
        Just(SubscriptionMode::Depth),
    ]
}

fn call() -> impl Strategy<Value = Call> {
    prop_oneof![
        mode().prop_map(Call::Subscribe),
        mode().prop_map(Call::Unsubscribe),
    ]
}

/// `(wire mode, action)` pairs the adapter sent and the pairs a ref-count model expects
async fn replay(calls: &[Call]) -> (Vec<(u64, u64)>, Vec<(u64, u64)>) {
    let (transport, mut sessions) = MockTransport::new(Outcome::Accept);
    let adapter = adapter(
        "angel",
        "nse_cm",
        transport,
        Arc::new(TickBus::default()),
        config(10, 50, 3),
    );
    adapter.connect().await.unwrap();
    let mut session = next_session(&mut sessions).await;
    wait_for_state(&adapter, AdapterState::Connected).await;

    let key = InstrumentKey::new("NSE", "RELIANCE");
    let mut refs = [0u32; 3];
    let mut expected = Vec::new();
    for call in calls {
        match *call {
            Call::Subscribe(mode) => {
                adapter.subscribe(key.clone(), mode, 5).unwrap();
                let count = &mut refs[mode as usize - 1];
                *count += 1;
                if *count == 1 {
                    expected.push((mode as u64, 1));
                }
            }
            Call::Unsubscribe(mode) => {
                let count = &mut refs[mode as usize - 1];
                let result = adapter.unsubscribe(&key, mode);
                if *count == 0 {
                    assert!(result.is_err());
                    continue;
                }
                result.unwrap();
                *count -= 1;
                if *count == 0 {
                    expected.push((mode as u64, 0));
                }
            }
        }
    }

    let sent = session
        .requests()
        .iter()
        .map(|request| {
            (
                request["params"]["mode"].as_u64().unwrap_or_default(),
                request["action"].as_u64().unwrap_or_default(),
            )
        })
        .collect();
    adapter.disconnect().await.unwrap();
    (sent, expected)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_frames_sent_once_per_reference_transition(calls in prop::collection::vec(call(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (sent, expected) = runtime.block_on(replay(&calls));
        prop_assert_eq!(sent, expected);
    }
}
