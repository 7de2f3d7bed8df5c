use crate::bus::{EventBus, EventKind, StreamingEvent, Subscriptions};
use crate::error::StreamingError;
use crate::media::{MediaController, MediaStream};
use crate::peer::{PeerConnectionHandle, PeerConnectionManager, PeerConnectionFactory};
use crate::session::{Backoff, RoomSession, SessionState};
use crate::signaling::{SignalingClient, SignalingConnector, SignalingState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use vitrine_core::{IceServerConfig, PeerId, RoomId};

const SESSION_EVENTS: [EventKind; 9] = [
    EventKind::SignalingStateChange,
    EventKind::RoomJoined,
    EventKind::PeerJoined,
    EventKind::PeerLeft,
    EventKind::RemoteStream,
    EventKind::ConnectionStateChange,
    EventKind::PeerLost,
    EventKind::SignalingError,
    EventKind::WebRtcError,
];

enum Command {
    Leave(oneshot::Sender<()>),
}

enum Flow {
    Continue,
    Stop,
}

/// Everything a supervisor needs besides the local stream.
pub(crate) struct SupervisorDeps {
    pub bus: EventBus,
    pub local_peer: PeerId,
    pub credential: String,
    pub connector: Arc<dyn SignalingConnector>,
    pub peer_factory: Arc<dyn PeerConnectionFactory>,
    pub ice_servers: Vec<IceServerConfig>,
    pub ice_restart_timeout: Duration,
    pub media: MediaController,
    pub backoff: Backoff,
    pub session: Arc<watch::Sender<RoomSession>>,
}

/// Running session task, owned by the manager.
pub(crate) struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Tears the session down and waits until it is gone. A supervisor that
    /// already stopped on its own is simply awaited.
    pub async fn leave(self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Leave(tx)).is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

/// Owns the resources of one room membership: the signaling client, the peer
/// connection manager, the local stream and the session's bus subscriptions.
/// Folds bus events into the shared [`RoomSession`] and drives signaling
/// reconnection.
pub(crate) struct SessionSupervisor {
    room_id: RoomId,
    signaling: SignalingClient,
    peers: Option<PeerConnectionHandle>,
    stream: MediaStream,
    media: MediaController,
    subscriptions: Subscriptions,
    events: mpsc::UnboundedReceiver<StreamingEvent>,
    session: Arc<watch::Sender<RoomSession>>,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl SessionSupervisor {
    pub fn new(room_id: RoomId, stream: MediaStream, deps: SupervisorDeps) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let mut subscriptions = Subscriptions::new();
        for kind in SESSION_EVENTS {
            let tx = events_tx.clone();
            subscriptions.push(deps.bus.on(kind, move |event| {
                let _ = tx.send(event.clone());
            }));
        }

        let signaling = SignalingClient::new(
            deps.bus.clone(),
            deps.connector,
            deps.local_peer.clone(),
            deps.credential,
        );
        let peers = PeerConnectionManager::spawn(
            deps.bus,
            deps.local_peer,
            Some(stream.clone()),
            deps.ice_servers,
            deps.ice_restart_timeout,
            deps.peer_factory,
        );

        Self {
            room_id,
            signaling,
            peers: Some(peers),
            stream,
            media: deps.media,
            subscriptions,
            events,
            session: deps.session,
            backoff: deps.backoff,
            retry_at: None,
        }
    }

    /// Connects signaling and sends the join request.
    pub async fn open(&mut self) -> Result<(), StreamingError> {
        self.signaling.connect().await?;
        self.signaling.join_room(&self.room_id)?;
        Ok(())
    }

    pub fn spawn(self) -> SupervisorHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(command_rx));
        SupervisorHandle { commands, task }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Session supervisor started for room {}", self.room_id);

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Leave(ack)) => {
                            self.close(SessionState::Closed, None).await;
                            let _ = ack.send(());
                        }
                        None => {
                            info!("Session handle dropped. Leaving room.");
                            self.close(SessionState::Closed, None).await;
                        }
                    }
                    break;
                }

                Some(event) = self.events.recv() => {
                    if let Flow::Stop = self.on_event(event).await {
                        break;
                    }
                }

                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    if let Flow::Stop = self.try_reconnect().await {
                        break;
                    }
                }
            }
        }

        info!("Session supervisor finished for room {}", self.room_id);
    }

    async fn on_event(&mut self, event: StreamingEvent) -> Flow {
        self.session.send_modify(|s| s.apply(&event));

        match event {
            StreamingEvent::SignalingStateChange {
                state: SignalingState::Disconnected,
            } => self.on_signaling_lost().await,
            StreamingEvent::RoomJoined { .. } => {
                if self.session.borrow().connection_state == SessionState::Connected {
                    self.backoff.reset();
                }
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    async fn on_signaling_lost(&mut self) -> Flow {
        if self.signaling.is_connected() || self.retry_at.is_some() {
            return Flow::Continue;
        }

        let state = self.session.borrow().connection_state;
        match state {
            SessionState::Connected | SessionState::Reconnecting => {
                warn!("Signaling lost in room {}, reconnecting", self.room_id);
                self.session
                    .send_modify(|s| s.connection_state = SessionState::Reconnecting);
                self.schedule_retry().await
            }
            SessionState::Connecting => {
                self.close(
                    SessionState::Failed,
                    Some("signaling lost while joining".to_owned()),
                )
                .await;
                Flow::Stop
            }
            _ => Flow::Continue,
        }
    }

    async fn schedule_retry(&mut self) -> Flow {
        let Some(delay) = self.backoff.next_delay() else {
            warn!(
                "Giving up on room {} after {} reconnect attempts",
                self.room_id,
                self.backoff.attempt()
            );
            self.close(
                SessionState::Failed,
                Some("signaling reconnect attempts exhausted".to_owned()),
            )
            .await;
            return Flow::Stop;
        };

        let attempt = self.backoff.attempt();
        let max_attempts = self.backoff.max_attempts();
        info!(
            "Reconnect attempt {}/{} in {:?}",
            attempt, max_attempts, delay
        );
        self.session.send_modify(|s| {
            s.reconnect.attempt = attempt;
            s.reconnect.max_attempts = max_attempts;
        });
        self.retry_at = Some(Instant::now() + delay);
        Flow::Continue
    }

    async fn try_reconnect(&mut self) -> Flow {
        self.retry_at = None;

        if let Err(e) = self.signaling.connect().await {
            warn!("Reconnect failed: {}", e);
            return self.schedule_retry().await;
        }
        if let Err(e) = self.signaling.join_room(&self.room_id) {
            warn!("Rejoin of room {} failed: {}", self.room_id, e);
            self.signaling.disconnect();
            return self.schedule_retry().await;
        }

        info!("Signaling restored, rejoining room {}", self.room_id);
        Flow::Continue
    }

    /// Releases every resource of the membership and publishes the final state.
    async fn close(&mut self, state: SessionState, error: Option<String>) {
        self.subscriptions.unsubscribe_all();

        if let Some(peers) = self.peers.take() {
            peers.close().await;
        }
        if self.signaling.is_connected()
            && let Err(e) = self.signaling.leave_room(&self.room_id)
        {
            warn!("Failed to announce leaving room {}: {}", self.room_id, e);
        }
        self.signaling.shutdown();
        self.media.release_stream(&self.stream);

        self.retry_at = None;
        self.session.send_modify(|s| {
            s.connection_state = state;
            s.local_stream = None;
            s.clear_peers();
            if error.is_some() {
                s.last_error = error;
            }
        });
        info!("Room {} session {}", self.room_id, state);
    }

    /// Used when `open` fails before the supervisor task exists.
    pub async fn abort(mut self, reason: String) {
        self.close(SessionState::Failed, Some(reason)).await;
    }
}
