use std::sync::Arc;

use vitrine_client::{
    EventBus, EventKind, IceCandidate, PeerConnectionManager, PeerConnectionRole, PeerId,
    StreamingEvent,
};

use crate::integration::{ICE_RESTART_TIMEOUT, init_tracing, local_stream, wait_until};
use crate::utils::{EventRecorder, FakeNetwork};

const CANDIDATES: usize = 10;

fn candidate(n: usize) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5{n:04} typ host"),
        sdp_mid: Some("0".into()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

fn received(from: &PeerId, role: PeerConnectionRole, n: usize) -> StreamingEvent {
    StreamingEvent::IceCandidateReceived {
        peer_id: from.clone(),
        role,
        candidate: candidate(n),
    }
}

#[tokio::test]
async fn test_candidates_before_offer_are_applied() {
    init_tracing();

    let remote = PeerId::from("remote");
    for early in 0..=CANDIDATES {
        let network = FakeNetwork::new();
        let bus = EventBus::new();
        let recorder = EventRecorder::attach(&bus, &EventKind::ALL);
        let manager = PeerConnectionManager::spawn(
            bus.clone(),
            PeerId::from("local"),
            Some(local_stream("local")),
            vec![],
            ICE_RESTART_TIMEOUT,
            Arc::new(network.clone()),
        );

        // Candidates from the remote publisher arrive before and after its offer
        for n in 0..early {
            bus.emit(received(&remote, PeerConnectionRole::Publish, n));
        }
        bus.emit(StreamingEvent::OfferReceived {
            peer_id: remote.clone(),
            sdp: network.detached_offer("remote-stream"),
        });
        for n in early..CANDIDATES {
            bus.emit(received(&remote, PeerConnectionRole::Publish, n));
        }

        assert!(recorder.wait_for(1, 2000, |e| e.kind() == EventKind::AnswerCreated).await);
        assert!(
            wait_until(2000, || network.applied_candidates() == CANDIDATES).await,
            "{early} early candidate(s): applied {}",
            network.applied_candidates()
        );
        assert_eq!(recorder.count(EventKind::WebRtcError), 0);

        manager.close().await;
        recorder.detach();
    }
}

#[tokio::test]
async fn test_candidates_before_answer_are_applied() {
    init_tracing();

    let remote = PeerId::from("remote");
    for early in 0..=CANDIDATES {
        let network = FakeNetwork::new();
        let bus = EventBus::new();
        let recorder = EventRecorder::attach(&bus, &EventKind::ALL);
        let manager = PeerConnectionManager::spawn(
            bus.clone(),
            PeerId::from("local"),
            Some(local_stream("local")),
            vec![],
            ICE_RESTART_TIMEOUT,
            Arc::new(network.clone()),
        );

        // Offer to the remote peer
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

        // The answerer's candidates race its answer
        for n in 0..early {
            bus.emit(received(&remote, PeerConnectionRole::Subscribe, n));
        }
        bus.emit(StreamingEvent::AnswerReceived {
            peer_id: remote.clone(),
            sdp: network.detached_answer(&offer),
        });
        for n in early..CANDIDATES {
            bus.emit(received(&remote, PeerConnectionRole::Subscribe, n));
        }

        assert!(
            wait_until(2000, || network.applied_candidates() == CANDIDATES).await,
            "{early} early candidate(s): applied {}",
            network.applied_candidates()
        );
        assert_eq!(recorder.count(EventKind::WebRtcError), 0);

        manager.close().await;
        recorder.detach();
    }
}
