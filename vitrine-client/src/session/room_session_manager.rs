use crate::bus::EventBus;
use crate::config::StreamingConfig;
use crate::error::StreamingError;
use crate::media::{MediaController, MediaDevices, MediaStream, VirtualDevices};
use crate::peer::{PeerConnectionFactory, WebRtcPeerFactory};
use crate::session::session_supervisor::{SessionSupervisor, SupervisorDeps, SupervisorHandle};
use crate::session::{Backoff, RoomSession, SessionState};
use crate::signaling::{SignalingConnector, WebSocketConnector};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use vitrine_core::{PeerId, RoomId};

/// Host-provided implementations of the platform seams.
#[derive(Clone)]
pub struct Platform {
    pub media_devices: Arc<dyn MediaDevices>,
    pub signaling: Arc<dyn SignalingConnector>,
    pub peer_factory: Arc<dyn PeerConnectionFactory>,
}

impl Platform {
    /// WebSocket signaling and webrtc-rs peers with virtual capture devices.
    pub fn headless(config: &StreamingConfig) -> Self {
        Self {
            media_devices: Arc::new(VirtualDevices::new()),
            signaling: Arc::new(WebSocketConnector::new(config.signaling_url.clone())),
            peer_factory: Arc::new(WebRtcPeerFactory::new()),
        }
    }
}

struct ActiveSession {
    stream: MediaStream,
    supervisor: SupervisorHandle,
}

/// Entry point for applications: create/join/leave rooms and toggle media
/// while observing a single [`RoomSession`].
pub struct RoomSessionManager {
    config: StreamingConfig,
    credential: String,
    local_peer: PeerId,
    bus: EventBus,
    platform: Platform,
    media: MediaController,
    session: Arc<watch::Sender<RoomSession>>,
    active: Mutex<Option<ActiveSession>>,
}

impl RoomSessionManager {
    pub fn new(
        config: StreamingConfig,
        credential: impl Into<String>,
        platform: Platform,
    ) -> Result<Self, StreamingError> {
        config.validate()?;
        let local_peer = PeerId::new();
        let media = MediaController::new(platform.media_devices.clone(), config.video.clone());
        let (session, _) = watch::channel(RoomSession::new(local_peer.clone()));

        Ok(Self {
            config,
            credential: credential.into(),
            local_peer,
            bus: EventBus::new(),
            platform,
            media,
            session: Arc::new(session),
            active: Mutex::new(None),
        })
    }

    /// Replaces the generated peer identifier. Takes effect from the next join.
    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.session
            .send_modify(|s| *s = RoomSession::new(peer_id.clone()));
        self.local_peer = peer_id;
        self
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer
    }

    /// The bus every component of this client talks over.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn session(&self) -> watch::Receiver<RoomSession> {
        self.session.subscribe()
    }

    pub fn snapshot(&self) -> RoomSession {
        self.session.borrow().clone()
    }

    /// Generates a room identifier and joins it.
    pub async fn create_room(&self) -> Result<RoomId, StreamingError> {
        let room_id = RoomId::generate();
        info!("Creating room {}", room_id);
        self.join_room(room_id.clone()).await?;
        Ok(room_id)
    }

    /// Joins `room_id`, leaving any current room first.
    ///
    /// Resolves once the first peer connection is up, once the relay reports
    /// an empty room, or when the join timeout elapses without any other
    /// member. Fails with [`StreamingError::JoinTimeout`] when members exist
    /// but none connected in time, and with [`StreamingError::Cancelled`]
    /// when [`leave_room`](Self::leave_room) interrupts the wait.
    pub async fn join_room(&self, room_id: RoomId) -> Result<(), StreamingError> {
        self.start(room_id).await?;
        self.await_joined().await
    }

    async fn start(&self, room_id: RoomId) -> Result<(), StreamingError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!("Leaving current room before joining {}", room_id);
            previous.supervisor.leave().await;
        }

        info!("Joining room {} as {}", room_id, self.local_peer);
        let max_attempts = self.config.reconnect.max_attempts;
        self.session.send_modify(|s| {
            s.begin(room_id.clone());
            s.connection_state = SessionState::Connecting;
            s.reconnect.max_attempts = max_attempts;
        });

        let stream = match self.media.acquire_local_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                self.session.send_modify(|s| {
                    s.connection_state = SessionState::Failed;
                    s.last_error = Some(e.to_string());
                });
                return Err(e.into());
            }
        };
        let media_state = self.media.media_state(&stream);
        self.session.send_modify(|s| {
            s.local_stream = Some(stream.clone());
            s.media_state = media_state;
        });

        let mut supervisor = SessionSupervisor::new(
            room_id,
            stream.clone(),
            SupervisorDeps {
                bus: self.bus.clone(),
                local_peer: self.local_peer.clone(),
                credential: self.credential.clone(),
                connector: self.platform.signaling.clone(),
                peer_factory: self.platform.peer_factory.clone(),
                ice_servers: self.config.ice_servers.clone(),
                ice_restart_timeout: self.config.ice_restart_timeout(),
                media: self.media.clone(),
                backoff: Backoff::new(&self.config.reconnect),
                session: self.session.clone(),
            },
        );
        if let Err(e) = supervisor.open().await {
            warn!("Join failed: {}", e);
            supervisor.abort(e.to_string()).await;
            return Err(e);
        }

        *active = Some(ActiveSession {
            stream,
            supervisor: supervisor.spawn(),
        });
        Ok(())
    }

    async fn await_joined(&self) -> Result<(), StreamingError> {
        let timeout = self.config.join_timeout();
        let mut rx = self.session.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| {
                matches!(
                    s.connection_state,
                    SessionState::Connected | SessionState::Failed | SessionState::Closed
                )
            })
            .await
            .map(|s| (s.connection_state, s.last_error.clone()))
        })
        .await;

        match waited {
            Ok(Ok((SessionState::Connected, _))) => Ok(()),
            Ok(Ok((SessionState::Failed, error))) => Err(StreamingError::SessionFailed(
                error.unwrap_or_else(|| "session failed".to_owned()),
            )),
            Ok(_) => Err(StreamingError::Cancelled),
            Err(_) => {
                let alone = self.session.send_if_modified(|s| {
                    let alone = s.connection_state == SessionState::Connecting
                        && s.known_peers().next().is_none();
                    if alone {
                        s.connection_state = SessionState::Connected;
                    }
                    alone
                });
                if alone {
                    info!("No peers in room after {:?}, joined alone", timeout);
                    return Ok(());
                }
                if self.session.borrow().connection_state == SessionState::Connected {
                    return Ok(());
                }

                warn!("No peer connected within {:?}", timeout);
                self.leave_room().await;
                self.session.send_modify(|s| {
                    s.connection_state = SessionState::Failed;
                    s.last_error = Some(format!("no peer connected within {:?}", timeout));
                });
                Err(StreamingError::JoinTimeout(timeout))
            }
        }
    }

    /// Closes every peer connection, disconnects signaling and releases local
    /// media. Safe at any time, including mid-negotiation.
    pub async fn leave_room(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.supervisor.leave().await;
        }
        self.session.send_if_modified(|s| {
            if s.room_id.is_none() || s.connection_state == SessionState::Closed {
                return false;
            }
            s.connection_state = SessionState::Closed;
            s.local_stream = None;
            true
        });
    }

    /// Flips the local video track. Returns the resulting state, `false` if
    /// there is no video track.
    pub async fn toggle_video(&self) -> Result<bool, StreamingError> {
        let stream = self.active_stream().await?;
        let enable = !stream.video_track().is_some_and(|t| t.is_enabled());
        let enabled = self.media.set_video_enabled(&stream, enable);
        self.publish_media_state(&stream);
        Ok(enabled)
    }

    pub async fn toggle_audio(&self) -> Result<bool, StreamingError> {
        let stream = self.active_stream().await?;
        let enable = !stream.audio_track().is_some_and(|t| t.is_enabled());
        let enabled = self.media.set_audio_enabled(&stream, enable);
        self.publish_media_state(&stream);
        Ok(enabled)
    }

    async fn active_stream(&self) -> Result<MediaStream, StreamingError> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.stream.clone())
            .ok_or(StreamingError::NotInRoom)
    }

    fn publish_media_state(&self, stream: &MediaStream) {
        let media_state = self.media.media_state(stream);
        self.session.send_if_modified(|s| {
            let changed = s.media_state != media_state;
            s.media_state = media_state;
            changed
        });
    }
}
