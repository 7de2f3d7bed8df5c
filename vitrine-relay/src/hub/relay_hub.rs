use crate::hub::RelayConfig;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use vitrine_core::{PeerId, RoomId, SignalMessage};

struct PeerLink {
    tx: mpsc::UnboundedSender<String>,
    generation: u64,
}

struct RelayInner {
    links: DashMap<PeerId, PeerLink>,
    memberships: DashMap<PeerId, RoomId>,
    rooms: DashMap<RoomId, BTreeSet<PeerId>>,
    /// Generation of the link whose loss started the pending eviction.
    pending_evictions: DashMap<PeerId, u64>,
    next_generation: AtomicU64,
    eviction_grace: Duration,
}

/// Routes signaling messages between peers grouped in rooms.
///
/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<RelayInner>,
}

/// In-process connection to a hub, as returned by [`RelayHub::connect_local`].
pub struct LocalLink {
    /// Frames sent by the client.
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Frames delivered by the hub. Ends when the hub drops the link.
    pub incoming: mpsc::UnboundedReceiver<String>,
}

impl RelayHub {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                links: DashMap::new(),
                memberships: DashMap::new(),
                rooms: DashMap::new(),
                pending_evictions: DashMap::new(),
                next_generation: AtomicU64::new(1),
                eviction_grace: config.eviction_grace,
            }),
        }
    }

    /// Registers a transport for `peer_id`, replacing any previous one.
    ///
    /// Returns the link generation (needed by [`RelayHub::detach`]) and the
    /// receiver of frames addressed to the peer.
    pub fn attach(&self, peer_id: &PeerId) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        self.inner.pending_evictions.remove(peer_id);

        if self
            .inner
            .links
            .insert(peer_id.clone(), PeerLink { tx, generation })
            .is_some()
        {
            info!("Peer {} re-attached, previous transport replaced", peer_id);
        } else {
            info!("Peer {} attached", peer_id);
        }

        self.send(
            peer_id,
            &SignalMessage::Welcome {
                peer_id: peer_id.clone(),
            },
        );
        (generation, rx)
    }

    /// Drops the transport of `peer_id` if it is still the one identified by
    /// `generation`. Room membership survives for the eviction grace period.
    pub fn detach(&self, peer_id: &PeerId, generation: u64) {
        let removed = self
            .inner
            .links
            .remove_if(peer_id, |_, link| link.generation == generation)
            .is_some();
        if !removed {
            return;
        }

        info!("Peer {} detached", peer_id);

        if !self.inner.memberships.contains_key(peer_id) {
            return;
        }

        if self.inner.eviction_grace.is_zero() {
            self.evict(peer_id);
            return;
        }

        self.inner
            .pending_evictions
            .insert(peer_id.clone(), generation);
        let hub = self.clone();
        let peer_id = peer_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(hub.inner.eviction_grace).await;
            let due = hub
                .inner
                .pending_evictions
                .remove_if(&peer_id, |_, pending| *pending == generation)
                .is_some();
            if due {
                hub.evict(&peer_id);
            } else {
                debug!("Peer {} came back within grace period", peer_id);
            }
        });
    }

    /// Closes the transport of `peer_id` as if the network dropped it.
    pub fn kick(&self, peer_id: &PeerId) {
        let generation = self.inner.links.get(peer_id).map(|link| link.generation);
        if let Some(generation) = generation {
            warn!("Kicking peer {}", peer_id);
            self.detach(peer_id, generation);
        }
    }

    pub fn is_attached(&self, peer_id: &PeerId) -> bool {
        self.inner.links.contains_key(peer_id)
    }

    pub fn room_members(&self, room: &RoomId) -> Vec<PeerId> {
        self.inner
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Handles one text frame received from `from`.
    pub fn handle_text(&self, from: &PeerId, text: &str) {
        let msg = match serde_json::from_str::<SignalMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Invalid SignalMessage from {}: {}", from, e);
                self.send(
                    from,
                    &SignalMessage::Error {
                        message: format!("invalid message: {e}"),
                    },
                );
                return;
            }
        };

        match msg {
            SignalMessage::JoinRoom { room } => self.join(from, room),
            SignalMessage::LeaveRoom { room } => {
                let current = self.inner.memberships.get(from).map(|r| r.value().clone());
                if current.as_ref() == Some(&room) {
                    self.evict(from);
                } else {
                    debug!("Peer {} left room '{}' it was not in", from, room);
                }
            }
            msg @ (SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::IceCandidate { .. }) => self.forward(from, msg),
            other => warn!("Unexpected message from {}: {:?}", from, other),
        }
    }

    /// Attaches `peer_id` in-process and pumps its outgoing frames into the hub.
    pub fn connect_local(&self, peer_id: &PeerId) -> LocalLink {
        let (generation, incoming) = self.attach(peer_id);
        let (outgoing, mut rx) = mpsc::unbounded_channel::<String>();

        let hub = self.clone();
        let peer_id = peer_id.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                hub.handle_text(&peer_id, &text);
            }
            hub.detach(&peer_id, generation);
        });

        LocalLink { outgoing, incoming }
    }

    fn join(&self, peer_id: &PeerId, room: RoomId) {
        let current = self.inner.memberships.get(peer_id).map(|r| r.value().clone());
        let rejoin = current.as_ref() == Some(&room);

        if !rejoin && current.is_some() {
            self.evict(peer_id);
        }

        let others: Vec<PeerId> = {
            let mut members = self.inner.rooms.entry(room.clone()).or_default();
            members.insert(peer_id.clone());
            members.iter().filter(|p| *p != peer_id).cloned().collect()
        };
        self.inner.memberships.insert(peer_id.clone(), room.clone());

        if rejoin {
            info!("Peer {} rejoined room '{}'", peer_id, room);
        } else {
            info!(
                "Peer {} joined room '{}' ({} others)",
                peer_id,
                room,
                others.len()
            );
        }

        self.send(
            peer_id,
            &SignalMessage::RoomJoined {
                room,
                peers: others.clone(),
            },
        );

        if rejoin {
            return;
        }

        let joined = SignalMessage::PeerJoined {
            peer_id: peer_id.clone(),
        };
        for other in &others {
            self.send(other, &joined);
        }
    }

    fn evict(&self, peer_id: &PeerId) {
        let Some((_, room)) = self.inner.memberships.remove(peer_id) else {
            return;
        };

        let remaining: Vec<PeerId> = {
            let Some(mut members) = self.inner.rooms.get_mut(&room) else {
                return;
            };
            members.remove(peer_id);
            members.iter().cloned().collect()
        };
        if remaining.is_empty() {
            self.inner.rooms.remove_if(&room, |_, members| members.is_empty());
        }

        info!("Peer {} left room '{}'", peer_id, room);

        let left = SignalMessage::PeerLeft {
            peer_id: peer_id.clone(),
        };
        for other in &remaining {
            self.send(other, &left);
        }
    }

    fn forward(&self, from: &PeerId, msg: SignalMessage) {
        let Some(target) = msg.target().cloned() else {
            return;
        };

        if !self.inner.links.contains_key(&target) {
            warn!("Peer {} addressed disconnected peer {}", from, target);
            self.send(
                from,
                &SignalMessage::Error {
                    message: format!("peer {target} is not connected"),
                },
            );
            return;
        }

        self.send(&target, &msg.readdressed(from.clone()));
    }

    fn send(&self, peer_id: &PeerId, msg: &SignalMessage) {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize signal message: {}", e);
                return;
            }
        };

        if let Some(link) = self.inner.links.get(peer_id) {
            if let Err(e) = link.tx.send(json) {
                error!("Failed to send message to {}: {:?}", peer_id, e);
            }
        } else {
            debug!("Dropping message for detached peer {}", peer_id);
        }
    }
}
