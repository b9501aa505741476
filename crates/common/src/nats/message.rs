use crate::nats::MessageAcker;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::warn;

/// A message delivered by a subscription feed.
///
/// Owned by the feed until resolved: `ack` and `nak` consume the message, so
/// each delivery is resolved at most once. Dropping an unresolved message leaves
/// redelivery to the feed's ack deadline.
pub struct InboundMessage {
    delivery_id: String,
    delivered_at: DateTime<Utc>,
    payload: Bytes,
    acker: Option<Box<dyn MessageAcker>>,
}

impl InboundMessage {
    pub fn new(
        delivery_id: impl Into<String>,
        delivered_at: DateTime<Utc>,
        payload: Bytes,
        acker: Box<dyn MessageAcker>,
    ) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            delivered_at,
            payload,
            acker: Some(acker),
        }
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn delivered_at(&self) -> DateTime<Utc> {
        self.delivered_at
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Acknowledge successful processing
    pub async fn ack(mut self) -> Result<()> {
        let acker = self.take_acker()?;
        acker.ack().await
    }

    /// Reject the message so the feed redelivers it
    pub async fn nak(mut self) -> Result<()> {
        let acker = self.take_acker()?;
        acker.nak().await
    }

    fn take_acker(&mut self) -> Result<Box<dyn MessageAcker>> {
        self.acker
            .take()
            .ok_or_else(|| anyhow!("message {} already resolved", self.delivery_id))
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("delivery_id", &self.delivery_id)
            .field("delivered_at", &self.delivered_at)
            .field("payload_size", &self.payload.len())
            .field("resolved", &self.acker.is_none())
            .finish()
    }
}

impl Drop for InboundMessage {
    fn drop(&mut self) {
        if self.acker.is_some() {
            warn!(
                delivery_id = %self.delivery_id,
                "message dropped without ack or nak, feed will redeliver"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockMessageAcker;

    fn message(acker: MockMessageAcker) -> InboundMessage {
        InboundMessage::new(
            "seq-1",
            Utc::now(),
            Bytes::from_static(b"{}"),
            Box::new(acker),
        )
    }

    #[tokio::test]
    async fn test_ack_resolves_once() {
        let mut acker = MockMessageAcker::new();
        acker.expect_ack().times(1).returning(|| Ok(()));
        acker.expect_nak().never();

        let msg = message(acker);
        assert_eq!(msg.delivery_id(), "seq-1");
        assert!(msg.ack().await.is_ok());
    }

    #[tokio::test]
    async fn test_nak_resolves_once() {
        let mut acker = MockMessageAcker::new();
        acker.expect_ack().never();
        acker.expect_nak().times(1).returning(|| Ok(()));

        assert!(message(acker).nak().await.is_ok());
    }

    #[tokio::test]
    async fn test_ack_error_is_returned() {
        let mut acker = MockMessageAcker::new();
        acker
            .expect_ack()
            .times(1)
            .returning(|| Err(anyhow!("connection reset")));

        let err = message(acker).ack().await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_debug_hides_payload() {
        let msg = message(MockMessageAcker::new());
        let rendered = format!("{:?}", msg);
        assert!(rendered.contains("payload_size: 2"));
        assert!(rendered.contains("resolved: false"));
    }
}
