use crate::nats::InboundMessage;
use anyhow::Result;
use async_nats::jetstream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback invoked by a feed for every delivered message.
/// Must not block: the feed's delivery loop waits on it.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Trait for resolving a delivered message
/// A positive ack marks it processed, a nak asks the feed to redeliver it
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageAcker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nak(&self) -> Result<()>;
}

/// Trait for a subscription that pushes messages into a handler
#[async_trait]
pub trait SubscriptionFeed: Send + Sync {
    /// Deliver messages to `handler` until `ctx` is cancelled.
    /// Returns an error when the subscription itself fails; callers decide on restart.
    async fn receive(&self, ctx: CancellationToken, handler: MessageHandler) -> Result<()>;
}

/// Trait for JetStream consumer operations
/// Abstracts the operations needed to create and use a NATS JetStream consumer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait JetStreamConsumer: Send + Sync {
    /// Create (or bind to) a durable pull consumer on a stream
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>>;
}

/// Trait for pull consumer operations
/// Abstracts the continuous message stream of a pull consumer
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PullConsumer: Send + Sync {
    /// Open a continuous stream of messages; each item is a delivered message
    /// or a transport error
    async fn messages(&self) -> Result<BoxStream<'static, Result<InboundMessage>>>;
}
