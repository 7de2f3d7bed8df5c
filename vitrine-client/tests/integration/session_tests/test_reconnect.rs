use vitrine_client::{EventKind, SessionState, SignalingState, StreamingEvent};

use crate::integration::{
    create_test_client, create_test_hub, init_tracing, streams_ready, test_config,
    wait_for_session,
};
use crate::utils::{EventRecorder, FakeNetwork};

#[tokio::test]
async fn test_transport_drop_reconnects_and_keeps_media() {
    init_tracing();

    let hub = create_test_hub();
    let network = FakeNetwork::new();
    let mut config = test_config();
    config.reconnect.base_delay_ms = 100;
    let alice = create_test_client("alice", &hub, &network, config);
    let bob = create_test_client("bob", &hub, &network, test_config());

    let room = alice
        .manager
        .create_room()
        .await
        .expect("Failed to create room");
    bob.manager
        .join_room(room.clone())
        .await
        .expect("Bob failed to join");
    let mut alice_rx = alice.manager.session();
    assert!(wait_for_session(&mut alice_rx, 2000, |s| streams_ready(s, 1)).await);

    let alice_events = EventRecorder::attach(alice.manager.bus(), &EventKind::ALL);
    let bob_events = EventRecorder::attach(bob.manager.bus(), &EventKind::ALL);

    // Drop Alice's relay transport
    hub.kick(alice.manager.local_peer_id());

    assert!(
        wait_for_session(&mut alice_rx, 2000, |s| {
            s.connection_state == SessionState::Reconnecting
        })
        .await,
        "Session should report reconnecting"
    );
    assert!(
        wait_for_session(&mut alice_rx, 3000, |s| {
            s.connection_state == SessionState::Connected
                && s.signaling == SignalingState::Connected
        })
        .await,
        "Session should recover"
    );

    let session = alice.manager.snapshot();
    assert_eq!(session.reconnect.attempt, 0);
    assert!(streams_ready(&session, 1), "Remote media must survive a signaling drop");
    assert_eq!(alice.connector.connect_count(), 2);
    assert!(hub.is_attached(alice.manager.local_peer_id()));
    assert_eq!(hub.room_members(&room).len(), 2);

    // Peer connections were untouched, so nobody renegotiated
    assert_eq!(alice_events.count(EventKind::OfferCreated), 0);
    assert_eq!(bob_events.count(EventKind::OfferCreated), 0);
    assert_eq!(bob_events.count(EventKind::PeerLeft), 0);
    assert_eq!(alice_events.count(EventKind::PeerLost), 0);
    assert_eq!(network.connected(), 2);
    assert!(alice_events.count_where(|e| matches!(
        e,
        StreamingEvent::SignalingStateChange {
            state: SignalingState::Disconnected
        }
    )) >= 1);

    alice.manager.leave_room().await;
    bob.manager.leave_room().await;
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    init_tracing();

    let hub = create_test_hub();
    let network = FakeNetwork::new();
    let alice = create_test_client("alice", &hub, &network, test_config());

    alice
        .manager
        .create_room()
        .await
        .expect("Failed to create room");
    let mut alice_rx = alice.manager.session();

    // Drop the transport and keep the relay unreachable
    alice.connector.refuse(true);
    hub.kick(alice.manager.local_peer_id());

    assert!(
        wait_for_session(&mut alice_rx, 5000, |s| {
            s.connection_state == SessionState::Failed
        })
        .await,
        "Session should fail once reconnect attempts run out"
    );

    let session = alice.manager.snapshot();
    assert_eq!(session.reconnect.max_attempts, 4);
    assert_eq!(session.reconnect.attempt, 4);
    assert!(session.local_stream.is_none());
    assert!(
        session
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("reconnect attempts exhausted"))
    );
    assert_eq!(alice.connector.connect_count(), 1);
    assert_eq!(alice.manager.bus().subscription_count(), 0);

    // Leaving a failed session only closes the record
    alice.manager.leave_room().await;
    assert_eq!(alice.manager.snapshot().connection_state, SessionState::Closed);
}
