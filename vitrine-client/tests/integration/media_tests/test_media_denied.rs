use vitrine_client::{MediaAccessError, RoomId, SessionState, StreamingError};

use crate::integration::{create_test_client, create_test_hub, init_tracing, test_config};
use crate::utils::FakeNetwork;

#[tokio::test]
async fn test_denied_permission_fails_join() {
    init_tracing();

    let hub = create_test_hub();
    let network = FakeNetwork::new();

    // Create a client whose user refuses camera access
    let client = create_test_client("alice", &hub, &network, test_config());
    client.devices.set_permission(false);

    let room = RoomId::parse("deniedroom").expect("Invalid room id");
    let result = client.manager.join_room(room.clone()).await;

    assert!(matches!(
        result,
        Err(StreamingError::MediaAccess(MediaAccessError::PermissionDenied))
    ));
    let session = client.manager.snapshot();
    assert_eq!(session.connection_state, SessionState::Failed);
    assert!(session.local_stream.is_none());
    assert!(session.last_error.is_some());

    // Nothing reached the relay
    assert_eq!(client.connector.connect_count(), 0);
    assert!(hub.room_members(&room).is_empty());
    assert_eq!(client.manager.bus().subscription_count(), 0);
}

#[tokio::test]
async fn test_toggle_outside_room_is_rejected() {
    init_tracing();

    let hub = create_test_hub();
    let network = FakeNetwork::new();
    let client = create_test_client("alice", &hub, &network, test_config());

    assert!(matches!(
        client.manager.toggle_video().await,
        Err(StreamingError::NotInRoom)
    ));
    assert!(matches!(
        client.manager.toggle_audio().await,
        Err(StreamingError::NotInRoom)
    ));
}
