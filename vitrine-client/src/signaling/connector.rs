use crate::error::SignalingTransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use vitrine_core::PeerId;

/// An established text-frame link to the relay.
///
/// Dropping `outgoing` closes the link; `incoming` ends when the relay side
/// goes away.
pub struct SignalingLink {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens transport links to the signaling relay.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(
        &self,
        peer_id: &PeerId,
        credential: &str,
    ) -> Result<SignalingLink, SignalingTransportError>;
}
