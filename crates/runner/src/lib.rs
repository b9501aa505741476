//! Runs named long-lived processes side by side and shuts them down together.
//!
//! - Every process receives the same cancellation token
//! - SIGINT/SIGTERM cancel the token
//! - The first process to fail cancels the others
//! - Closers run after all processes stop, bounded by a timeout
//!
//! # Example
//!
//! ```no_run
//! use scan_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Runner::new()
//!         .with_named_process("ticker", |ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by processes and closers
pub type BoxedRunFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-running process; receives the shared cancellation token
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedRunFuture + Send>;

/// A cleanup step run after every process has stopped
pub type Closer = Box<dyn FnOnce() -> BoxedRunFuture + Send>;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| -> BoxedRunFuture { Box::pin(process(token)) }),
        });
        self
    }

    /// Closers run concurrently; a failing closer does not stop the others
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| -> BoxedRunFuture { Box::pin(closer()) }));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, e.g. to stop the runner from a test
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run every process until cancellation or the first failure, then run the closers.
    ///
    /// Returns the first process error, if any. Processes that end cleanly
    /// before cancellation do not stop the others.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        spawn_signal_handlers(token.clone());

        let mut join_set = JoinSet::new();
        for NamedProcess { name, process } in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                tracing::debug!(process = %name, "starting process");
                let result = process(process_token).await;
                (name, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    tracing::info!(process = %name, "process stopped");
                }
                Ok((name, Err(err))) => {
                    tracing::error!(process = %name, error = format!("{:#}", err), "process failed");
                    if first_error.is_none() {
                        first_error = Some(err.context(format!("process {} failed", name)));
                    }
                    token.cancel();
                }
                Err(err) => {
                    tracing::error!(error = %err, "process panicked");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("process panicked: {}", err));
                    }
                    token.cancel();
                }
            }
        }

        run_closers(self.closers, self.closer_timeout).await;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("received SIGTERM signal");
                token.cancel();
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
            }
        }
    });
}

async fn run_closers(closers: Vec<Closer>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    tracing::info!(timeout_ms = timeout.as_millis(), "running closers");

    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(closer());
    }

    let drained = tokio::time::timeout(timeout, async {
        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("closer completed"),
                Ok(Err(err)) => tracing::error!(error = format!("{:#}", err), "closer failed"),
                Err(err) => tracing::error!(error = %err, "closer panicked"),
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::error!(timeout_ms = timeout.as_millis(), "closers timed out");
        closer_set.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancellation_stops_processes_and_runs_closers() {
        let closer_called = Arc::new(AtomicBool::new(false));
        let flag = closer_called.clone();
        let token = CancellationToken::new();
        let cancel = token.clone();

        let runner = Runner::new()
            .with_named_process("waiter", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_closer(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        assert!(runner.run().await.is_ok());
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_process_cancels_the_rest() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = stopped.clone();

        let result = Runner::new()
            .with_named_process("healthy", move |ctx| async move {
                ctx.cancelled().await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .with_named_process("broken", |_ctx| async move {
                Err(anyhow::anyhow!("subscription unreachable"))
            })
            .run()
            .await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("subscription unreachable"));
        assert!(err.to_string().contains("broken"));
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closer_errors_do_not_fail_run() {
        let token = CancellationToken::new();
        token.cancel();

        let result = Runner::new()
            .with_named_process("noop", |_ctx| async move { Ok(()) })
            .with_closer(|| async move { Err(anyhow::anyhow!("flush failed")) })
            .with_cancellation_token(token)
            .run()
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closers_are_bounded_by_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let slow: Closer = Box::new(move || -> BoxedRunFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        });

        run_closers(vec![slow], Duration::from_secs(1)).await;

        assert!(!finished.load(Ordering::SeqCst));
    }
}
