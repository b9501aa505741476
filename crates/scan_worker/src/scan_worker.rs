use crate::batching::{BatchAccumulator, BatchConfig, BatchDispatcher};
use crate::domain::ScanBatchSink;
use anyhow::{bail, Context, Result};
use common::domain::ScanRecordRepository;
use common::nats::{InboundMessage, MessageHandler, SubscriptionFeed};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWorkerConfig {
    pub batch: BatchConfig,
    pub max_concurrent_batches: usize,
}

/// Pulls scan messages from a feed, groups them into batches and writes each
/// batch through the repository.
pub struct ScanWorker {
    feed: Arc<dyn SubscriptionFeed>,
    sink: Arc<ScanBatchSink>,
    config: ScanWorkerConfig,
    span: Span,
}

impl ScanWorker {
    pub fn new(
        feed: Arc<dyn SubscriptionFeed>,
        repository: Arc<dyn ScanRecordRepository>,
        config: ScanWorkerConfig,
        span: Span,
    ) -> Result<Self> {
        config.batch.validate()?;
        if config.max_concurrent_batches == 0 {
            bail!("max_concurrent_batches must be at least 1");
        }

        let sink = Arc::new(ScanBatchSink::new(repository, span.clone()));
        Ok(Self {
            feed,
            sink,
            config,
            span,
        })
    }

    /// Run until `ctx` is cancelled or the feed stops.
    ///
    /// On the way out every queued message is still batched and written, and
    /// every in-flight batch finishes before this returns. Returns the feed's
    /// error if the subscription failed.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel::<InboundMessage>();
        let mut accumulator = BatchAccumulator::new(rx, self.config.batch.clone())?;
        let mut dispatcher = BatchDispatcher::new(
            Arc::clone(&self.sink),
            self.config.max_concurrent_batches,
            self.span.clone(),
        );

        let handler_span = self.span.clone();
        let handler: MessageHandler = Arc::new(move |message: InboundMessage| {
            if let Err(mpsc::error::SendError(message)) = tx.send(message) {
                warn!(
                    parent: &handler_span,
                    delivery_id = %message.delivery_id(),
                    "batch queue closed, nacking message"
                );
                let span = handler_span.clone();
                tokio::spawn(async move {
                    if let Err(e) = message.nak().await {
                        error!(parent: &span, error = %e, "failed to nak message");
                    }
                });
            }
        });

        let feed = Arc::clone(&self.feed);
        let feed_ctx = ctx.clone();
        let feed_task = tokio::spawn(async move { feed.receive(feed_ctx, handler).await });

        info!(
            parent: &self.span,
            batch_size = self.config.batch.batch_size,
            batch_timeout_ms = self.config.batch.batch_timeout.as_millis() as u64,
            max_concurrent_batches = self.config.max_concurrent_batches,
            "scan worker started"
        );

        let mut dispatch_result = Ok(());
        while let Some(batch) = accumulator.next_batch(&ctx).await {
            if let Err(e) = dispatcher.dispatch(batch).await {
                dispatch_result = Err(e);
                break;
            }
        }

        dispatcher.shutdown().await;

        let feed_result = feed_task.await.context("subscription task panicked")?;
        info!(parent: &self.span, "scan worker stopped");

        dispatch_result.and(feed_result)
    }
}
