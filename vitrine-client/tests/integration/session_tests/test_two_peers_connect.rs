use vitrine_client::{ConnectionState, EventKind, SessionState, StreamingEvent};

use crate::integration::{
    create_test_client, create_test_hub, init_tracing, streams_ready, test_config,
    wait_for_session,
};
use crate::utils::{EventRecorder, FakeNetwork};

#[tokio::test]
async fn test_second_peer_joins_and_streams_flow() {
    init_tracing();

    let hub = create_test_hub();
    let network = FakeNetwork::new();
    let alice = create_test_client("alice", &hub, &network, test_config());
    let bob = create_test_client("bob", &hub, &network, test_config());
    let alice_events = EventRecorder::attach(alice.manager.bus(), &EventKind::ALL);
    let bob_events = EventRecorder::attach(bob.manager.bus(), &EventKind::ALL);

    // Create the room, then join it from a second client
    let room = alice
        .manager
        .create_room()
        .await
        .expect("Failed to create room");
    bob.manager
        .join_room(room.clone())
        .await
        .expect("Bob failed to join");

    assert_eq!(bob.manager.snapshot().connection_state, SessionState::Connected);
    assert!(
        bob_events
            .wait_for(1, 2000, |e| matches!(
                e,
                StreamingEvent::RoomJoined { peers, .. } if peers.len() == 1
            ))
            .await
    );
    assert!(
        alice_events
            .wait_for(1, 2000, |e| matches!(
                e,
                StreamingEvent::PeerJoined { peer_id } if peer_id.as_str() == "bob"
            ))
            .await
    );

    // Both sides see exactly one remote stream from the other
    let mut alice_rx = alice.manager.session();
    let mut bob_rx = bob.manager.session();
    assert!(wait_for_session(&mut alice_rx, 2000, |s| streams_ready(s, 1)).await);
    assert!(wait_for_session(&mut bob_rx, 2000, |s| streams_ready(s, 1)).await);

    let alice_session = alice.manager.snapshot();
    let bob_session = bob.manager.snapshot();
    let from_bob = alice_session
        .remote_streams
        .get(bob.manager.local_peer_id())
        .expect("Alice has no stream from Bob");
    let from_alice = bob_session
        .remote_streams
        .get(alice.manager.local_peer_id())
        .expect("Bob has no stream from Alice");
    assert_eq!(from_bob.tracks.len(), 2);
    assert_eq!(from_alice.tracks.len(), 2);
    let bob_local = bob_session.local_stream.as_ref().expect("Bob has no local stream");
    assert_eq!(from_bob.stream_id, bob_local.id());

    // A single offer/answer exchange carried media both ways
    let answers =
        alice_events.count(EventKind::AnswerCreated) + bob_events.count(EventKind::AnswerCreated);
    assert_eq!(answers, 1);
    assert_eq!(network.connected(), 2);
    let connected = alice_events.count_where(|e| {
        matches!(
            e,
            StreamingEvent::ConnectionStateChange {
                state: ConnectionState::Connected,
                ..
            }
        )
    });
    assert_eq!(connected, 1);

    bob.manager.leave_room().await;
    assert!(wait_for_session(&mut alice_rx, 2000, |s| s.remote_streams.is_empty()).await);
    assert_eq!(alice.manager.snapshot().connection_state, SessionState::Connected);
    alice.manager.leave_room().await;
    assert_eq!(network.open_connections(), 0);
}
