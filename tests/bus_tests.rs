// ABOUTME: Integration tests for event bus delivery guarantees.
// ABOUTME: Per-subscriber ordering, handler isolation, pause/resume, and one-shot waits.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchyard_core::{Event, EventBus, EventKind, Topic};

fn delta(n: usize) -> Event {
    Event::new(EventKind::AgentStreamDelta, json!({ "n": n }), "test")
}

fn collector(bus: &EventBus, topic: Topic) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(topic, move |event| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });
    seen
}

// Events A, B, C published in order arrive at each subscriber in order.
#[tokio::test]
async fn test_per_subscriber_delivery_order() {
    let bus = EventBus::new();
    let first = collector(&bus, Topic::All);
    let second = collector(&bus, Topic::Kind(EventKind::AgentStreamDelta));

    for n in 0..50 {
        bus.publish(delta(n));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    for seen in [first, second] {
        let order: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(order, (0..50).collect::<Vec<u64>>());
    }
}

// A handler that fails on every event never disturbs its siblings or the
// publisher.
#[tokio::test]
async fn test_failing_handler_is_isolated() {
    let bus = EventBus::new();
    bus.subscribe(Topic::All, |_event| async {
        anyhow::bail!("this handler always fails")
    });
    let healthy = collector(&bus, Topic::All);

    for n in 0..10 {
        bus.publish(delta(n));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(healthy.lock().unwrap().len(), 10);
    assert_eq!(bus.subscription_count(), 2);
}

// While paused, nothing is delivered; resume flushes in arrival order.
#[tokio::test]
async fn test_pause_buffers_resume_flushes_in_order() {
    let bus = EventBus::new();
    let seen = collector(&bus, Topic::All);

    bus.pause();
    for n in 0..5 {
        bus.publish(delta(n));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.lock().unwrap().is_empty());

    bus.resume();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let order: Vec<u64> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.payload["n"].as_u64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
}

// wait_for resolves with the first matching event.
#[tokio::test]
async fn test_wait_for_resolves() {
    let bus = Arc::new(EventBus::new());
    let publisher = Arc::clone(&bus);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        publisher.publish(Event::new(
            EventKind::AgentResponse,
            json!({ "content": "hello" }),
            "test",
        ));
    });

    let event = bus
        .wait_for(EventKind::AgentResponse, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(event.payload["content"], "hello");
    // The one-shot subscription cleaned itself up.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.subscription_count(), 0);
}

// Unsubscribing one of several subscribers leaves the others untouched.
#[tokio::test]
async fn test_unsubscribe_leaves_siblings() {
    let bus = EventBus::new();
    let kept = collector(&bus, Topic::All);
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&dropped);
    let id = bus.subscribe(Topic::All, move |event| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });

    bus.publish(delta(0));
    tokio::time::sleep(Duration::from_millis(30)).await;
    bus.unsubscribe(id);
    bus.publish(delta(1));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(kept.lock().unwrap().len(), 2);
    assert_eq!(dropped.lock().unwrap().len(), 1);
}
