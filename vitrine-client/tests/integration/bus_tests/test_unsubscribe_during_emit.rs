use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vitrine_client::{EventBus, EventKind, PeerId, StreamingEvent, Subscription};

use crate::integration::init_tracing;

fn peer_joined(id: &str) -> StreamingEvent {
    StreamingEvent::PeerJoined {
        peer_id: PeerId::from(id),
    }
}

#[tokio::test]
async fn test_unsubscribe_during_emit() {
    init_tracing();

    let bus = EventBus::new();
    let first_calls = Arc::new(AtomicUsize::new(0));
    let second_calls = Arc::new(AtomicUsize::new(0));
    let second: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    // Create a handler that removes the next one while the emission runs
    let _first = {
        let calls = first_calls.clone();
        let second = second.clone();
        bus.on(EventKind::PeerJoined, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = second.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        })
    };
    {
        let calls = second_calls.clone();
        *second.lock().unwrap() = Some(bus.on(EventKind::PeerJoined, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
    }

    bus.emit(peer_joined("a"));
    bus.emit(peer_joined("b"));

    assert_eq!(first_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        second_calls.load(Ordering::SeqCst),
        0,
        "Handler removed mid-emission must not run"
    );
    assert_eq!(bus.handler_count(EventKind::PeerJoined), 1);
}

#[tokio::test]
async fn test_self_unsubscribe_runs_once() {
    init_tracing();

    let bus = EventBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    // Create a one-shot handler
    let sub = {
        let calls = calls.clone();
        let slot = slot.clone();
        bus.on(EventKind::PeerLeft, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        })
    };
    *slot.lock().unwrap() = Some(sub);

    for id in ["a", "b", "c"] {
        bus.emit(StreamingEvent::PeerLeft {
            peer_id: PeerId::from(id),
        });
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.subscription_count(), 0);
}
