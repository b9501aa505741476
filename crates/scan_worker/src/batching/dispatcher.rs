use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info_span, Instrument, Span};

/// Consumer of closed batches
#[async_trait]
pub trait BatchHandler<T>: Send + Sync + 'static {
    async fn handle(&self, batch_id: u64, batch: Vec<T>);
}

/// Runs batch handlers concurrently, bounded by a permit pool.
///
/// `dispatch` waits for a free permit, so a slow store applies backpressure to
/// the accumulator instead of letting batches pile up in memory.
pub struct BatchDispatcher<T, H> {
    handler: Arc<H>,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<()>,
    next_batch_id: u64,
    span: Span,
    _item: std::marker::PhantomData<fn(T)>,
}

impl<T, H> BatchDispatcher<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T>,
{
    pub fn new(handler: Arc<H>, max_concurrent_batches: usize, span: Span) -> Self {
        Self {
            handler,
            permits: Arc::new(Semaphore::new(max_concurrent_batches.max(1))),
            in_flight: JoinSet::new(),
            next_batch_id: 0,
            span,
            _item: std::marker::PhantomData,
        }
    }

    /// Hand a batch to the handler on its own task
    pub async fn dispatch(&mut self, batch: Vec<T>) -> Result<()> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("batch permit pool closed")?;

        self.next_batch_id += 1;
        let batch_id = self.next_batch_id;
        let handler = Arc::clone(&self.handler);
        let span = info_span!(parent: &self.span, "batch", batch_id, batch_size = batch.len());

        self.in_flight.spawn(
            async move {
                handler.handle(batch_id, batch).await;
                drop(permit);
            }
            .instrument(span),
        );

        self.reap_finished();
        Ok(())
    }

    /// Wait for every dispatched batch to finish
    pub async fn shutdown(mut self) {
        debug!(parent: &self.span, in_flight = self.in_flight.len(), "waiting for in-flight batches");

        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                error!(parent: &self.span, error = %e, "batch task failed");
            }
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                error!(parent: &self.span, error = %e, "batch task failed");
            }
        }
    }
}
