use crate::nats::traits::{JetStreamConsumer, MessageHandler, PullConsumer, SubscriptionFeed};
use anyhow::{bail, Context, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Subscription feed backed by a durable JetStream pull consumer.
///
/// Messages are pulled continuously and pushed into the handler one at a time;
/// acknowledgment is left to whoever ends up owning each message.
pub struct NatsSubscriptionFeed {
    consumer: Box<dyn PullConsumer>,
    stream_name: String,
    subscription: String,
}

impl NatsSubscriptionFeed {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        stream_name: &str,
        subscription: &str,
        subject_filter: &str,
    ) -> Result<Self> {
        debug!(
            stream = %stream_name,
            subscription = %subscription,
            filter_subject = %subject_filter,
            "creating subscription feed"
        );

        let config = jetstream::consumer::pull::Config {
            name: Some(subscription.to_string()),
            durable_name: Some(subscription.to_string()),
            filter_subject: subject_filter.to_string(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(config, stream_name)
            .await
            .context("failed to create consumer")?;

        info!(
            stream = %stream_name,
            subscription = %subscription,
            "subscription feed created"
        );

        Ok(Self {
            consumer,
            stream_name: stream_name.to_string(),
            subscription: subscription.to_string(),
        })
    }
}

#[async_trait]
impl SubscriptionFeed for NatsSubscriptionFeed {
    async fn receive(&self, ctx: CancellationToken, handler: MessageHandler) -> Result<()> {
        let mut messages = self.consumer.messages().await?;

        info!(
            stream = %self.stream_name,
            subscription = %self.subscription,
            "receiving messages"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        subscription = %self.subscription,
                        "received shutdown signal, stopping subscription"
                    );
                    return Ok(());
                }
                next = messages.next() => match next {
                    Some(Ok(message)) => handler(message),
                    Some(Err(e)) => {
                        return Err(e).with_context(|| {
                            format!("subscription {} failed", self.subscription)
                        });
                    }
                    None => bail!("subscription {} message stream closed", self.subscription),
                },
            }
        }
    }
}
