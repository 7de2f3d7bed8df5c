use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use vitrine_core::SignalMessage;

/// Raw WebSocket client speaking signal messages.
pub struct TestSocket {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestSocket {
    pub async fn connect(addr: SocketAddr, peer: &str) -> anyhow::Result<Self> {
        let url = format!("ws://{addr}/ws/{peer}?access_token=test-token");
        let (ws, _) = connect_async(url).await?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, msg: &SignalMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::text(json)).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::text(text)).await?;
        Ok(())
    }

    /// Next signal message, skipping control frames.
    pub async fn recv(&mut self, timeout_ms: u64) -> Option<SignalMessage> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .ok()??
                .ok()?;
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).ok();
            }
        }
    }

    /// Skips messages until one matches `pred`.
    pub async fn recv_until(
        &mut self,
        timeout_ms: u64,
        pred: impl Fn(&SignalMessage) -> bool,
    ) -> Option<SignalMessage> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = self.recv(remaining.as_millis() as u64).await?;
            if pred(&msg) {
                return Some(msg);
            }
        }
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
