use std::time::Duration;

use vitrine_core::{PeerId, RoomId, SignalMessage};

use crate::integration::{create_test_hub, init_tracing, spawn_relay};
use crate::utils::TestSocket;

#[tokio::test]
async fn test_two_sockets_join_and_exchange_offer() {
    init_tracing();

    let hub = create_test_hub(Duration::ZERO);
    let addr = spawn_relay(hub.clone()).await;
    let room = RoomId::parse("wsroom").expect("Invalid room id");

    // Create test sockets
    let mut alice = TestSocket::connect(addr, "alice")
        .await
        .expect("Alice failed to connect");
    let mut bob = TestSocket::connect(addr, "bob")
        .await
        .expect("Bob failed to connect");
    assert_eq!(
        alice.recv(2000).await,
        Some(SignalMessage::Welcome {
            peer_id: PeerId::from("alice")
        })
    );
    assert!(matches!(
        bob.recv(2000).await,
        Some(SignalMessage::Welcome { .. })
    ));

    // Join the same room
    alice
        .send(&SignalMessage::JoinRoom { room: room.clone() })
        .await
        .expect("Failed to send join");
    assert_eq!(
        alice.recv(2000).await,
        Some(SignalMessage::RoomJoined {
            room: room.clone(),
            peers: vec![]
        })
    );
    bob.send(&SignalMessage::JoinRoom { room: room.clone() })
        .await
        .expect("Failed to send join");
    assert_eq!(
        bob.recv(2000).await,
        Some(SignalMessage::RoomJoined {
            room: room.clone(),
            peers: vec![PeerId::from("alice")]
        })
    );
    assert_eq!(
        alice.recv(2000).await,
        Some(SignalMessage::PeerJoined {
            peer_id: PeerId::from("bob")
        })
    );

    // Offers are delivered with the sender as peer id
    bob.send(&SignalMessage::Offer {
        peer_id: PeerId::from("alice"),
        sdp: "v=0".into(),
    })
    .await
    .expect("Failed to send offer");
    assert_eq!(
        alice.recv(2000).await,
        Some(SignalMessage::Offer {
            peer_id: PeerId::from("bob"),
            sdp: "v=0".into()
        })
    );

    // Closing a socket without grace announces the departure
    bob.close().await.expect("Failed to close");
    let left = alice
        .recv_until(2000, |m| matches!(m, SignalMessage::PeerLeft { .. }))
        .await;
    assert_eq!(
        left,
        Some(SignalMessage::PeerLeft {
            peer_id: PeerId::from("bob")
        })
    );
    assert_eq!(hub.room_members(&room), vec![PeerId::from("alice")]);
}

#[tokio::test]
async fn test_malformed_frame_is_answered_with_error() {
    init_tracing();

    let hub = create_test_hub(Duration::ZERO);
    let addr = spawn_relay(hub).await;

    let mut socket = TestSocket::connect(addr, "carol")
        .await
        .expect("Failed to connect");
    socket.recv(2000).await.expect("No welcome");

    socket
        .send_raw("{\"type\":\"nonsense\"}")
        .await
        .expect("Failed to send");
    assert!(matches!(
        socket.recv(2000).await,
        Some(SignalMessage::Error { .. })
    ));

    // The connection survives a bad frame
    let room = RoomId::parse("afterror").expect("Invalid room id");
    socket
        .send(&SignalMessage::JoinRoom { room: room.clone() })
        .await
        .expect("Failed to send join");
    assert!(matches!(
        socket.recv(2000).await,
        Some(SignalMessage::RoomJoined { .. })
    ));
}
