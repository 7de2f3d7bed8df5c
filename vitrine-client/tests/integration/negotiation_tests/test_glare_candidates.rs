use std::sync::Arc;
use std::time::Duration;

use vitrine_client::{
    ConnectionState, EventBus, EventKind, IceCandidate, PeerConnectionHandle,
    PeerConnectionManager, PeerConnectionRole, PeerId, StreamingEvent,
};

use crate::integration::{ICE_RESTART_TIMEOUT, init_tracing, local_stream, wait_until};
use crate::utils::{EventRecorder, FakeNetwork};

/// A candidate `from` trickled for its own publish connection.
fn published_candidate(from: &PeerId, label: &str) -> StreamingEvent {
    StreamingEvent::IceCandidateReceived {
        peer_id: from.clone(),
        role: PeerConnectionRole::Publish,
        candidate: IceCandidate {
            candidate: format!("candidate:{label} 1 udp 2122260223 192.168.1.7 50000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        },
    }
}

struct Glare {
    network: FakeNetwork,
    bus: EventBus,
    recorder: EventRecorder,
    manager: PeerConnectionHandle,
    remote: PeerId,
    offer: String,
}

/// "zed" offers to "bob" while bob's own offer crosses it; zed keeps its
/// offer. Bob trickles a candidate before and after its ignored offer.
async fn glare() -> Glare {
    let network = FakeNetwork::new();
    let bus = EventBus::new();
    let recorder = EventRecorder::attach(&bus, &EventKind::ALL);
    let manager = PeerConnectionManager::spawn(
        bus.clone(),
        PeerId::from("zed"),
        Some(local_stream("zed")),
        vec![],
        ICE_RESTART_TIMEOUT,
        Arc::new(network.clone()),
    );
    let remote = PeerId::from("bob");

    bus.emit(StreamingEvent::PeerJoined {
        peer_id: remote.clone(),
    });
    assert!(recorder.wait_for(1, 2000, |e| e.kind() == EventKind::OfferCreated).await);
    let offer = recorder
        .events()
        .into_iter()
        .find_map(|e| match e {
            StreamingEvent::OfferCreated { sdp, .. } => Some(sdp),
            _ => None,
        })
        .expect("No offer recorded");

    bus.emit(published_candidate(&remote, "early"));
    bus.emit(StreamingEvent::OfferReceived {
        peer_id: remote.clone(),
        sdp: network.detached_offer("bob-stream"),
    });
    bus.emit(published_candidate(&remote, "late"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.count(EventKind::AnswerCreated), 0);

    Glare {
        network,
        bus,
        recorder,
        manager,
        remote,
        offer,
    }
}

/// Bob offers again and zed answers. Nothing from the abandoned offer may
/// reach the new connection, while fresh candidates still do.
async fn assert_fresh_offer_starts_clean(glare: &Glare) {
    let answers = glare.recorder.count(EventKind::AnswerCreated);
    glare.bus.emit(StreamingEvent::OfferReceived {
        peer_id: glare.remote.clone(),
        sdp: glare.network.detached_offer("bob-stream"),
    });
    assert!(
        glare
            .recorder
            .wait_for(answers + 1, 2000, |e| e.kind() == EventKind::AnswerCreated)
            .await
    );
    assert_eq!(glare.network.applied_candidates(), 0);

    glare.bus.emit(published_candidate(&glare.remote, "fresh"));
    assert!(wait_until(2000, || glare.network.applied_candidates() == 1).await);
}

#[tokio::test]
async fn test_glare_candidates_do_not_survive_a_lost_peer() {
    init_tracing();

    let glare = glare().await;

    // The kept offer never gets answered and its connection fails for good
    assert_eq!(glare.network.fail(&glare.remote, PeerConnectionRole::Publish), 1);
    assert!(
        glare
            .recorder
            .wait_for(2, 2000, |e| e.kind() == EventKind::OfferCreated)
            .await
    );
    assert_eq!(glare.network.fail(&glare.remote, PeerConnectionRole::Publish), 1);
    assert!(
        glare
            .recorder
            .wait_for(1, 2000, |e| e.kind() == EventKind::PeerLost)
            .await
    );

    assert_fresh_offer_starts_clean(&glare).await;

    glare.manager.close().await;
    glare.recorder.detach();
}

#[tokio::test]
async fn test_glare_candidates_are_dropped_once_our_offer_is_answered() {
    init_tracing();

    let glare = glare().await;

    glare.bus.emit(StreamingEvent::AnswerReceived {
        peer_id: glare.remote.clone(),
        sdp: glare.network.detached_answer(&glare.offer),
    });
    assert!(
        glare
            .recorder
            .wait_for(1, 2000, |e| matches!(
                e,
                StreamingEvent::ConnectionStateChange {
                    role: PeerConnectionRole::Publish,
                    state: ConnectionState::Connected,
                    ..
                }
            ))
            .await
    );

    assert_fresh_offer_starts_clean(&glare).await;
    assert_eq!(glare.recorder.count(EventKind::PeerLost), 0);

    glare.manager.close().await;
    glare.recorder.detach();
}
