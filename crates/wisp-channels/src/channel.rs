use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::types::{InboundMessage, OutboundReply};

/// Common interface implemented by every channel adapter (Telegram, CLI, …).
///
/// The receive side is push-based: `run` drives the platform connection and
/// feeds `InboundMessage`s into the orchestrator's inbound sender until the
/// shutdown signal fires. The orchestrator never names concrete adapters —
/// it routes outbound replies by the `name()` key.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier, matching the message `Source` it emits.
    fn name(&self) -> &str;

    /// Run the receive loop: connect, push inbound messages into `inbound`,
    /// return when the platform stream ends or shutdown is requested.
    async fn run(
        &self,
        inbound: mpsc::Sender<InboundMessage>,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<(), ChannelError>;

    /// Deliver a single reply to the original sender.
    ///
    /// Intentionally `&self` so a connected adapter can send concurrently
    /// without a mutable borrow.
    async fn send(&self, reply: &OutboundReply) -> Result<(), ChannelError>;

    /// Gracefully close the underlying transport.
    async fn disconnect(&self) -> Result<(), ChannelError>;
}
