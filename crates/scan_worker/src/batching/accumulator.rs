use anyhow::{bail, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Size and time bounds for a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of items per batch
    pub batch_size: usize,
    /// Longest silence between two arrivals before an open batch closes
    pub batch_timeout: Duration,
    /// Longest time a batch may stay open regardless of arrivals
    pub max_batch_age: Option<Duration>,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.batch_timeout.is_zero() {
            bail!("batch_timeout must be greater than zero");
        }
        if self.max_batch_age.is_some_and(|age| age.is_zero()) {
            bail!("max_batch_age must be greater than zero when set");
        }
        Ok(())
    }
}

/// Groups a queue of items into bounded batches.
///
/// A batch opens on the first item read while idle and closes when it holds
/// `batch_size` items, when `batch_timeout` passes without a new arrival, when
/// `max_batch_age` is reached, or on cancellation. Every batch is non-empty.
pub struct BatchAccumulator<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    config: BatchConfig,
    draining: bool,
}

impl<T> BatchAccumulator<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<T>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            receiver,
            config,
            draining: false,
        })
    }

    /// Wait for the next batch.
    ///
    /// Returns `None` once the queue's senders are gone and nothing is left, or
    /// once cancellation has fired and the already-queued items are drained.
    pub async fn next_batch(&mut self, ctx: &CancellationToken) -> Option<Vec<T>> {
        if self.draining {
            return self.drain_batch();
        }

        let first = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                self.start_draining();
                return self.drain_batch();
            }
            item = self.receiver.recv() => item?,
        };

        let mut batch = Vec::with_capacity(self.config.batch_size);
        batch.push(first);
        self.fill(&mut batch, ctx).await;

        debug!(batch_size = batch.len(), "batch closed");
        Some(batch)
    }

    async fn fill(&mut self, batch: &mut Vec<T>, ctx: &CancellationToken) {
        let age_deadline = self.config.max_batch_age.map(|age| Instant::now() + age);

        while batch.len() < self.config.batch_size {
            if age_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!("batch reached max age");
                break;
            }

            // Recreated on every append: measures silence, not batch age
            let silence = sleep(self.config.batch_timeout);
            let aged = async {
                match age_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                item = self.receiver.recv() => match item {
                    Some(item) => batch.push(item),
                    None => break,
                },
                _ = silence => break,
                _ = aged => {
                    debug!("batch reached max age");
                    break;
                }
                _ = ctx.cancelled() => break,
            }
        }
    }

    fn start_draining(&mut self) {
        debug!("cancellation received, draining queued items");
        self.draining = true;
        self.receiver.close();
    }

    fn drain_batch(&mut self) -> Option<Vec<T>> {
        let mut batch = Vec::new();
        while batch.len() < self.config.batch_size {
            match self.receiver.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}
