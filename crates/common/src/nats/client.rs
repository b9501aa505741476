use crate::nats::traits::{JetStreamConsumer, MessageAcker, PullConsumer};
use crate::nats::InboundMessage;
use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::info;

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        // Configure connection timeout for establishing the TCP connection
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Make sure the stream exists, creating it over `subjects` when missing
    pub async fn ensure_stream(&self, stream_name: &str, subjects: Vec<String>) -> Result<()> {
        info!(stream = %stream_name, "Ensuring stream exists");

        match self.jetstream.get_stream(stream_name).await {
            Ok(_) => {
                info!(stream = %stream_name, "Stream already exists");
            }
            Err(_) => {
                let stream_config = StreamConfig {
                    name: stream_name.to_string(),
                    subjects,
                    description: Some("Stream for scan results".to_string()),
                    ..Default::default()
                };

                self.jetstream
                    .create_stream(stream_config)
                    .await
                    .context("Failed to create stream")?;
                info!(stream = %stream_name, "Created stream");
            }
        }

        Ok(())
    }

    /// Create a JetStreamConsumer trait object from this client
    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    /// Flush pending acks and publishes before the connection goes away
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        Ok(())
    }
}

/// Concrete implementation of JetStreamConsumer using async-nats
pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("Failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

/// Concrete implementation of PullConsumer using async-nats
pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn messages(&self) -> Result<BoxStream<'static, Result<InboundMessage>>> {
        let messages = self
            .consumer
            .messages()
            .await
            .context("Failed to open message stream")?;

        let stream = messages.map(|result| {
            result
                .map(into_inbound_message)
                .map_err(|e| anyhow!("Error receiving message: {}", e))
        });

        Ok(stream.boxed())
    }
}

fn into_inbound_message(message: jetstream::Message) -> InboundMessage {
    let delivery_id = match message.info() {
        Ok(info) => format!("{}:{}", info.stream, info.stream_sequence),
        Err(_) => message.subject.to_string(),
    };
    let payload = message.payload.clone();

    InboundMessage::new(
        delivery_id,
        Utc::now(),
        payload,
        Box::new(JetStreamAcker { message }),
    )
}

/// Resolves a JetStream delivery through its reply subject
struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl MessageAcker for JetStreamAcker {
    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))
    }

    async fn nak(&self) -> Result<()> {
        self.message
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))
    }
}
