//! The messaging transport seam.

use async_trait::async_trait;

use relay_core::InboundMessage;

/// A bidirectional channel to the messaging platform.
///
/// The run loop pumps `receive` and fans reply frames back out through
/// `send`. Implementations own reconnection and platform-level concerns;
/// the relay only sees messages and plain text replies.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Next inbound message, or `None` once the transport has closed.
    async fn receive(&self) -> Option<InboundMessage>;

    /// Deliver one text frame to a conversation.
    async fn send(&self, conversation_id: &str, text: &str) -> anyhow::Result<()>;

    /// Confirm receipt of an inbound message. Platforms without delivery
    /// receipts can leave the default no-op.
    async fn acknowledge(&self, _message: &InboundMessage) -> anyhow::Result<()> {
        Ok(())
    }
}
