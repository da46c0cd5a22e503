use order_dispatch::broker::Delivery;
use order_dispatch::config::DispatchConfig;
use order_dispatch::fatal::Fatal;
use order_dispatch::lifecycle::DispatchSystem;
use order_dispatch::mock::{BrokerEvent, FailStep, MemoryStore, MockBroker, RecordingFatal};
use order_dispatch::processor::PROCESSING_DELAY_MS;
use order_dispatch::supervisor::ConnectionState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    broker: MockBroker,
    store: MemoryStore,
    fatal: RecordingFatal,
    system: DispatchSystem<MemoryStore>,
}

/// Starts a full system against the doubles and waits for the first subscription with the
/// store attached.
async fn start(error_percent: u8, seed: u64) -> Harness {
    let broker = MockBroker::new();
    let store = MemoryStore::new();
    let fatal = RecordingFatal::new();
    let config = DispatchConfig {
        error_percent,
        ..DispatchConfig::default()
    };

    let bootstrap = {
        let store = store.clone();
        async move { store }
    };
    let system = DispatchSystem::start(
        &config,
        broker.clone(),
        bootstrap,
        StdRng::seed_from_u64(seed),
        Arc::new(fatal.clone()),
    );

    broker.wait_for_subscriptions(1).await;
    while !system.store_connected() {
        tokio::task::yield_now().await;
    }

    Harness {
        broker,
        store,
        fatal,
        system,
    }
}

/// Long enough under paused time for every queued delivery to clear its latency.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(60)).await;
}

fn order(id: &str) -> Delivery {
    Delivery::new(json!({ "orderid": id }).to_string())
}

/// Replays the processor's draws: latency first, then the fault roll.
fn first_crash(seed: u64, error_percent: u32, messages: usize) -> Option<(usize, u32)> {
    let mut rng = StdRng::seed_from_u64(seed);
    for index in 0..messages {
        let _latency: u64 = rng.random_range(PROCESSING_DELAY_MS);
        let roll: u32 = rng.random_range(0..100);
        if roll < error_percent {
            return Some((index, roll));
        }
    }
    None
}

/// A published order ends up stored under its orderid, with `_id` added.
#[tokio::test(start_paused = true)]
async fn test_order_is_stored_end_to_end() {
    let harness = start(0, 7).await;
    assert_eq!(
        *harness.system.connection_state().borrow(),
        ConnectionState::TopologyReady
    );

    let delivery = Delivery::new(r#"{"orderid":"o1","item":"x"}"#).with_header("source", "web");
    assert!(harness.broker.publish(delivery), "no live subscription");
    settle().await;

    let stored = harness.store.get("o1").expect("order o1 not stored");
    assert_eq!(stored.get("orderid"), Some(&json!("o1")));
    assert_eq!(stored.get("item"), Some(&json!("x")));
    assert_eq!(stored.get("_id"), Some(&json!("o1")));
    assert_eq!(stored.fields().len(), 3);

    assert!(harness.fatal.raised().is_empty());
    harness.system.shutdown().await.expect("shutdown failed");
}

/// Redelivering the same orderid overwrites instead of duplicating.
#[tokio::test(start_paused = true)]
async fn test_same_orderid_is_upserted() {
    let harness = start(0, 7).await;

    harness
        .broker
        .publish(Delivery::new(r#"{"orderid":"o1","item":"x"}"#));
    harness
        .broker
        .publish(Delivery::new(r#"{"orderid":"o1","item":"y"}"#));
    settle().await;

    assert_eq!(harness.store.len(), 1);
    assert_eq!(harness.store.writes(), 2);
    let stored = harness.store.get("o1").expect("order o1 not stored");
    assert_eq!(stored.get("item"), Some(&json!("y")));

    harness.system.shutdown().await.expect("shutdown failed");
}

/// Bodies that are not orders are dropped and never reach the store.
#[tokio::test(start_paused = true)]
async fn test_invalid_bodies_are_dropped() {
    let harness = start(0, 7).await;

    for body in ["not json", "[1, 2]", r#"{"item":"x"}"#, r#"{"orderid":null}"#] {
        harness.broker.publish(Delivery::new(body));
    }
    harness.broker.publish(order("o2"));
    settle().await;

    assert_eq!(harness.store.len(), 1, "only the valid order is stored");
    assert!(harness.store.get("o2").is_some());
    assert!(harness.fatal.raised().is_empty());

    harness.system.shutdown().await.expect("shutdown failed");
}

/// Dropped bodies never reach the fault injector, even at 100 percent.
#[tokio::test(start_paused = true)]
async fn test_invalid_bodies_never_crash() {
    let harness = start(100, 7).await;

    harness.broker.publish(Delivery::new("{{{"));
    harness.broker.publish(Delivery::new(r#"{"orderid":""}"#));
    settle().await;

    assert!(harness.fatal.raised().is_empty());
    assert!(harness.store.is_empty());

    harness.system.shutdown().await.expect("shutdown failed");
}

/// Without fault injection a long run never crashes.
#[tokio::test(start_paused = true)]
async fn test_zero_error_percent_never_crashes() {
    let harness = start(0, 99).await;

    for i in 0..200 {
        harness.broker.publish(order(&format!("o{i}")));
    }
    settle().await;

    assert_eq!(harness.store.len(), 200);
    assert!(harness.fatal.raised().is_empty());

    harness.system.shutdown().await.expect("shutdown failed");
}

/// At 100 percent the first order is stored and then the process crashes.
#[tokio::test(start_paused = true)]
async fn test_full_error_percent_crashes_on_first_order() {
    let harness = start(100, 3).await;

    harness.broker.publish(order("o1"));
    harness.broker.publish(order("o2"));
    settle().await;

    let raised = harness.fatal.raised();
    assert_eq!(raised.len(), 1);
    assert!(matches!(
        raised[0],
        Fatal::InjectedFault {
            error_percent: 100,
            ..
        }
    ));
    // Persistence happens before the roll, nothing after the crash is read
    assert!(harness.store.get("o1").is_some());
    assert!(harness.store.get("o2").is_none());

    harness.system.shutdown().await.expect("shutdown failed");
}

/// With a seeded generator the crash lands on exactly the first order whose roll is below
/// the configured percentage.
#[tokio::test(start_paused = true)]
async fn test_seeded_fault_is_reproducible() {
    const SEED: u64 = 2024;
    const PERCENT: u8 = 30;
    const MESSAGES: usize = 50;

    let (crash_index, crash_roll) =
        first_crash(SEED, u32::from(PERCENT), MESSAGES).expect("seed never crashes");

    let harness = start(PERCENT, SEED).await;
    for i in 0..MESSAGES {
        harness.broker.publish(order(&format!("o{i}")));
    }
    settle().await;

    assert_eq!(
        harness.fatal.raised(),
        vec![Fatal::InjectedFault {
            roll: crash_roll,
            error_percent: PERCENT,
        }]
    );
    assert_eq!(harness.store.len(), crash_index + 1);
    assert!(harness.store.get(&format!("o{crash_index}")).is_some());
    assert!(harness.store.get(&format!("o{}", crash_index + 1)).is_none());

    harness.system.shutdown().await.expect("shutdown failed");
}

/// A store that rejects writes costs the message, not the process.
#[tokio::test(start_paused = true)]
async fn test_store_failure_is_not_fatal() {
    let harness = start(0, 7).await;

    harness.store.fail_writes(true);
    harness.broker.publish(order("lost"));
    settle().await;
    harness.store.fail_writes(false);
    harness.broker.publish(order("kept"));
    settle().await;

    assert!(harness.store.get("lost").is_none());
    assert!(harness.store.get("kept").is_some());
    assert!(harness.fatal.raised().is_empty());

    harness.system.shutdown().await.expect("shutdown failed");
}

/// After a dropped connection the consumer resubscribes on the fresh channel, and only after
/// its topology was declared.
#[tokio::test(start_paused = true)]
async fn test_consumer_resubscribes_after_drop() {
    let harness = start(0, 7).await;

    harness.broker.publish(order("before"));
    settle().await;

    harness.broker.drop_connection("connection reset by peer");
    harness.broker.wait_for_subscriptions(2).await;
    harness.broker.publish(order("after"));
    settle().await;

    assert!(harness.store.get("before").is_some());
    assert!(harness.store.get("after").is_some());

    let events = harness.broker.events();
    for (position, event) in events.iter().enumerate() {
        if let BrokerEvent::Subscribed { channel } = event {
            assert!(
                events[..position].contains(&BrokerEvent::QueueBound { channel: *channel }),
                "channel {channel} subscribed before its queue was bound"
            );
        }
    }
    assert!(events.contains(&BrokerEvent::Subscribed { channel: 2 }));

    harness.system.shutdown().await.expect("shutdown failed");
}

/// A ready channel that refuses the subscription is fatal.
#[tokio::test(start_paused = true)]
async fn test_subscription_failure_is_fatal() {
    let broker = MockBroker::new();
    broker.fail_at(FailStep::Consume);
    let fatal = RecordingFatal::new();

    let system = DispatchSystem::start(
        &DispatchConfig::default(),
        broker.clone(),
        async { MemoryStore::new() },
        StdRng::seed_from_u64(1),
        Arc::new(fatal.clone()),
    );
    settle().await;

    assert_eq!(
        fatal.raised(),
        vec![Fatal::Subscription(
            "Failed to consume from orders: queue not found".to_string()
        )]
    );
    assert!(!broker
        .events()
        .iter()
        .any(|event| matches!(event, BrokerEvent::Subscribed { .. })));

    system.shutdown().await.expect("shutdown failed");
}

/// Orders flow before the store connects; they are just not persisted.
#[tokio::test(start_paused = true)]
async fn test_orders_skip_persistence_until_store_connects() {
    let broker = MockBroker::new();
    let store = MemoryStore::new();
    let fatal = RecordingFatal::new();

    let bootstrap = {
        let store = store.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            store
        }
    };
    let system = DispatchSystem::start(
        &DispatchConfig::default(),
        broker.clone(),
        bootstrap,
        StdRng::seed_from_u64(1),
        Arc::new(fatal.clone()),
    );
    broker.wait_for_subscriptions(1).await;
    assert!(!system.store_connected());

    broker.publish(order("early"));
    settle().await;
    assert!(system.store_connected());
    broker.publish(order("late"));
    settle().await;

    assert!(store.get("early").is_none());
    assert!(store.get("late").is_some());
    assert!(fatal.raised().is_empty());

    system.shutdown().await.expect("shutdown failed");
}

/// Shutdown completes even while the broker is unreachable.
#[tokio::test(start_paused = true)]
async fn test_shutdown_while_broker_unreachable() {
    let broker = MockBroker::new();
    broker.fail_next_dials(u32::MAX);

    let system = DispatchSystem::start(
        &DispatchConfig::default(),
        broker.clone(),
        std::future::pending::<MemoryStore>(),
        StdRng::seed_from_u64(1),
        Arc::new(RecordingFatal::new()),
    );
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        *system.connection_state().borrow(),
        ConnectionState::Connecting
    );

    system.shutdown().await.expect("shutdown failed");
    assert!(broker.dial_count() >= 5);
}
