//! Integration tests for reconnection scheduling and the events it
//! surfaces.

mod common;

use std::time::Duration;

use chatlink::{
    ConnectionState, DecayBackoff, LinkClient, LinkConfig, LinkEvent, ReconnectionStrategy,
};
use common::{wait_for_event, wait_for_state, MockGateway};

/// Macro for verbose test output
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_config_backoff_schedule() {
    // The default client schedule: 1s base, 1.5 decay, 30s cap.
    let config = LinkConfig::new("ws://example").jitter(0.0);
    let strategy = config.backoff();

    let expected_ms = [1000, 1500, 2250, 3375, 5062];
    for (attempt, &expected) in expected_ms.iter().enumerate() {
        let delay = strategy.next_delay(attempt as u32).unwrap();
        verbose_println!("  attempt {}: {:?}", attempt, delay);
        assert_eq!(delay.as_millis() as u64, expected);
    }

    // Deep attempts are capped, never growing past the max interval.
    let strategy = DecayBackoff::new(
        Duration::from_millis(1000),
        Duration::from_millis(30_000),
        1.5,
        0.0,
        30,
    );
    assert_eq!(
        strategy.next_delay(29).unwrap(),
        Duration::from_millis(30_000)
    );
}

#[test]
fn test_config_attempt_limit_flows_through() {
    let config = LinkConfig::new("ws://example").max_reconnect_attempts(3);
    let strategy = config.backoff();
    assert_eq!(strategy.max_attempts(), 3);
    assert!(strategy.should_attempt(2));
    assert!(!strategy.should_attempt(3));
    assert!(strategy.next_delay(3).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconnecting_events_number_attempts_in_order() {
    let gateway = MockGateway::start().await;
    gateway.set_refuse(true);

    let config = LinkConfig::new(gateway.ws_url())
        .reconnect_interval(Duration::from_millis(30))
        .max_reconnect_interval(Duration::from_millis(120))
        .reconnect_decay(2.0)
        .jitter(0.0)
        .max_reconnect_attempts(4);
    let client = LinkClient::new(config);
    let events = client.subscribe();

    client.connect().unwrap();
    wait_for_event(&events, WAIT, |e| {
        matches!(e, LinkEvent::MaxReconnectAttemptsReached)
    })
    .await;
    wait_for_state(&client, ConnectionState::Failed, WAIT).await;

    // Replay the drained backlog: attempts numbered 1..=4, delays
    // non-decreasing under zero jitter.
    let mut attempts = Vec::new();
    let mut last_delay = Duration::ZERO;
    while let Ok(event) = events.try_recv() {
        if let LinkEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } = event
        {
            assert_eq!(max_attempts, 4);
            assert!(delay >= last_delay, "delay shrank at attempt {attempt}");
            last_delay = delay;
            attempts.push(attempt);
        }
    }
    assert_eq!(attempts, vec![1, 2, 3, 4]);

    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconnect_counter_survives_until_success() {
    let gateway = MockGateway::start().await;
    gateway.set_refuse(true);

    let config = LinkConfig::new(gateway.ws_url())
        .reconnect_interval(Duration::from_millis(30))
        .max_reconnect_interval(Duration::from_millis(60))
        .jitter(0.0)
        .max_reconnect_attempts(10);
    let client = LinkClient::new(config);
    let events = client.subscribe();

    client.connect().unwrap();
    // Let a couple of attempts fail.
    wait_for_event(&events, WAIT, |e| {
        matches!(e, LinkEvent::Reconnecting { attempt: 2, .. })
    })
    .await;
    assert!(client.snapshot().reconnect_attempts >= 1);

    // Recovery clears the counter and announces itself.
    gateway.set_refuse(false);
    wait_for_event(&events, WAIT, |e| matches!(e, LinkEvent::Reconnected)).await;
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;
    assert_eq!(client.snapshot().reconnect_attempts, 0);
    verbose_println!("recovered after {} handshakes", gateway.accepted());

    client.shutdown().await.unwrap();
}
