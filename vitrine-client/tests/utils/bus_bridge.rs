use vitrine_client::{EventBus, EventKind, PeerId, StreamingEvent, Subscriptions};

/// Carries negotiation output of one bus to another as inbound signaling,
/// the way a relay would, without a relay.
pub struct BusBridge {
    subscriptions: Subscriptions,
}

impl BusBridge {
    pub fn link(a: (&PeerId, &EventBus), b: (&PeerId, &EventBus)) -> Self {
        let mut subscriptions = Subscriptions::new();
        for (from, to) in [(a, b), (b, a)] {
            for kind in [
                EventKind::OfferCreated,
                EventKind::AnswerCreated,
                EventKind::IceCandidate,
            ] {
                let sender = from.0.clone();
                let target = to.0.clone();
                let bus = to.1.clone();
                subscriptions.push(from.1.on(kind, move |event| {
                    if let Some(inbound) = relay(&sender, &target, event) {
                        bus.emit(inbound);
                    }
                }));
            }
        }
        Self { subscriptions }
    }

    pub fn unlink(mut self) {
        self.subscriptions.unsubscribe_all();
    }
}

fn relay(sender: &PeerId, target: &PeerId, event: &StreamingEvent) -> Option<StreamingEvent> {
    let inbound = match event.clone() {
        StreamingEvent::OfferCreated { peer_id, sdp, .. } if &peer_id == target => {
            StreamingEvent::OfferReceived {
                peer_id: sender.clone(),
                sdp,
            }
        }
        StreamingEvent::AnswerCreated { peer_id, sdp } if &peer_id == target => {
            StreamingEvent::AnswerReceived {
                peer_id: sender.clone(),
                sdp,
            }
        }
        StreamingEvent::IceCandidate {
            peer_id,
            role,
            candidate,
        } if &peer_id == target => StreamingEvent::IceCandidateReceived {
            peer_id: sender.clone(),
            role,
            candidate,
        },
        _ => return None,
    };
    Some(inbound)
}
