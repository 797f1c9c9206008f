//! Fan-out execution of a single command across many hosts.
//!
//! The [`Executor`] dispatches one command to N hosts in parallel under a
//! semaphore, applies a per-host deadline derived from the parent
//! cancellation token, and returns results positionally aligned with the
//! input label order regardless of completion order.

pub mod result;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::DroverError;

pub use result::{CommandOutput, HostResult};

/// Capability to execute one command on one host. Implemented by the
/// connection pool (shared sessions) and the one-shot runner (dial per
/// command).
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(&self, cancel: &CancellationToken, host: &str, command: &str) -> HostResult;
}

/// Fans out command execution across multiple hosts with bounded concurrency.
pub struct Executor<R: CommandRunner> {
    runner: Arc<R>,
    concurrency: usize,
    timeout: Duration,
}

impl<R: CommandRunner> Executor<R> {
    /// Creates an executor with the default bounds (20 parallel hosts,
    /// 30 second per-host timeout).
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            concurrency: 20,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the maximum number of in-flight hosts. Values below 1 are ignored.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        if n > 0 {
            self.concurrency = n;
        }
        self
    }

    /// Sets the per-host command deadline. Non-positive values are ignored.
    pub fn with_timeout(mut self, d: Duration) -> Self {
        if d > Duration::ZERO {
            self.timeout = d;
        }
        self
    }

    /// Runs `command` on every host in parallel, bounded by the concurrency
    /// limit. The returned vector has one slot per input label, in input
    /// order; a fired parent token yields cancellation results for every
    /// slot not yet produced.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        hosts: &[String],
        command: &str,
    ) -> Vec<HostResult> {
        let mut results: Vec<Option<HostResult>> = (0..hosts.len()).map(|_| None).collect();
        if hosts.is_empty() {
            return Vec::new();
        }

        tracing::debug!(
            hosts = hosts.len(),
            concurrency = self.concurrency,
            command,
            "dispatching fan-out"
        );

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let command: Arc<str> = Arc::from(command);
        let mut tasks: JoinSet<(usize, HostResult)> = JoinSet::new();

        for (idx, host) in hosts.iter().enumerate() {
            let sem = sem.clone();
            let runner = self.runner.clone();
            let cancel = cancel.clone();
            let timeout = self.timeout;
            let host = host.clone();
            let command = command.clone();

            tasks.spawn(async move {
                // Acquire a permit, respecting parent cancellation. Once the
                // token has fired no further permits are granted.
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return (idx, HostResult::from_error(host, DroverError::Cancelled));
                    }
                    permit = sem.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => {
                            return (idx, HostResult::from_error(host, DroverError::Cancelled));
                        }
                    },
                };

                // Per-host deadline: a child token cancelled by a timer, so
                // the runner observes the earlier of parent and deadline.
                let child = cancel.child_token();
                let deadline = tokio::spawn({
                    let child = child.clone();
                    async move {
                        tokio::time::sleep(timeout).await;
                        child.cancel();
                    }
                });

                let start = Instant::now();
                let mut result = runner.run(&child, &host, &command).await;
                result.duration = start.elapsed();
                result.host = host;
                deadline.abort();

                // The deadline fired (and the parent did not): a silent
                // success or a bare cancellation both become deadline errors
                // so the grouper buckets this host as timed out.
                if child.is_cancelled()
                    && !cancel.is_cancelled()
                    && matches!(result.err, None | Some(DroverError::Cancelled))
                {
                    result.err = Some(DroverError::Timeout);
                }

                (idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok((idx, result)) = joined {
                results[idx] = Some(result);
            }
        }

        // Slots a panicked task never produced still get a result.
        results
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    HostResult::from_error(hosts[idx].clone(), DroverError::Cancelled)
                })
            })
            .collect()
    }
}
