use vitrine_client::{EventKind, SessionState, StreamingEvent};

use crate::integration::{
    create_test_client, create_test_hub, init_tracing, streams_ready, test_config,
    wait_for_session, wait_until,
};
use crate::utils::{EventRecorder, FakeNetwork};

fn restart_offer(e: &StreamingEvent) -> bool {
    matches!(
        e,
        StreamingEvent::OfferCreated {
            ice_restart: true,
            ..
        }
    )
}

#[tokio::test]
async fn test_ice_failure_restarts_once_then_drops_peer() {
    init_tracing();

    let hub = create_test_hub();
    let network = FakeNetwork::new();
    let alice = create_test_client("alice", &hub, &network, test_config());
    let bob = create_test_client("bob", &hub, &network, test_config());

    let room = alice
        .manager
        .create_room()
        .await
        .expect("Failed to create room");
    bob.manager
        .join_room(room)
        .await
        .expect("Bob failed to join");
    let mut alice_rx = alice.manager.session();
    let mut bob_rx = bob.manager.session();
    assert!(wait_for_session(&mut alice_rx, 2000, |s| streams_ready(s, 1)).await);
    assert!(wait_for_session(&mut bob_rx, 2000, |s| streams_ready(s, 1)).await);

    let alice_events = EventRecorder::attach(alice.manager.bus(), &EventKind::ALL);
    let bob_events = EventRecorder::attach(bob.manager.bus(), &EventKind::ALL);
    let restarts =
        || alice_events.count_where(restart_offer) + bob_events.count_where(restart_offer);

    // A transient failure is healed by a single ICE restart
    assert_eq!(network.fail_all(), 2);
    assert!(wait_until(2000, || network.connected() == 2).await);
    assert_eq!(restarts(), 1);
    assert_eq!(alice_events.count(EventKind::PeerLost), 0);
    assert_eq!(bob_events.count(EventKind::PeerLost), 0);
    assert!(streams_ready(&alice.manager.snapshot(), 1));

    // A recovered connection gets a fresh restart budget
    network.block(true);
    assert_eq!(network.fail_all(), 2);
    assert!(wait_until(2000, || restarts() == 2).await);
    // Bob's id sorts higher, so Bob offers and Alice answers each restart
    assert!(
        alice_events
            .wait_for(2, 2000, |e| e.kind() == EventKind::AnswerCreated)
            .await
    );
    assert_eq!(bob_events.count(EventKind::AnswerCreated), 0);

    // Failing again after the restart gives up on the peer
    assert_eq!(network.fail_all(), 2);
    assert!(alice_events.wait_for(1, 2000, |e| e.kind() == EventKind::PeerLost).await);
    assert!(bob_events.wait_for(1, 2000, |e| e.kind() == EventKind::PeerLost).await);
    assert!(wait_for_session(&mut alice_rx, 2000, |s| s.remote_streams.is_empty()).await);
    assert!(wait_for_session(&mut bob_rx, 2000, |s| s.remote_streams.is_empty()).await);
    assert!(
        alice_events.count_where(|e| matches!(
            e,
            StreamingEvent::WebRtcError { context, .. } if context == "peer-connection"
        )) >= 1
    );

    // The sessions stay in the room
    assert_eq!(alice.manager.snapshot().connection_state, SessionState::Connected);
    assert_eq!(bob.manager.snapshot().connection_state, SessionState::Connected);
    assert_eq!(network.open_connections(), 0);

    alice.manager.leave_room().await;
    bob.manager.leave_room().await;
}
