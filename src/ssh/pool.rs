//! Connection pool: a process-wide cache of live sessions keyed by host
//! label, with single-flight dial coordination and one-shot reconnect on
//! stale-session errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{DroverError, Result};
use crate::executor::{CommandOutput, CommandRunner, HostResult};
use crate::ssh::errors::wrap_connect_error;

/// Capability to dial one host by label. The production implementation is
/// [`SshTransport`](crate::ssh::SshTransport); tests script it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    async fn dial(&self, cancel: &CancellationToken, label: &str) -> Result<Self::Conn>;
}

/// A live session produced by a [`Transport`].
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn run(&self, cancel: &CancellationToken, command: &str) -> Result<CommandOutput>;
    async fn close(&self);
}

/// Outcome of one dial, fanned out to every waiter of the single-flight
/// ticket.
type DialOutcome<C> = std::result::Result<Arc<C>, DroverError>;

struct PoolInner<C> {
    clients: HashMap<String, Arc<C>>,
    /// Per-label dial coordination: waiters subscribe, the dialer publishes.
    inflight: HashMap<String, watch::Receiver<Option<DialOutcome<C>>>>,
    closed: bool,
}

/// Caches live connections by host label. Implements [`CommandRunner`],
/// reusing cached sessions across commands and redialing once when a
/// session goes stale.
pub struct Pool<T: Transport> {
    transport: Arc<T>,
    inner: Arc<Mutex<PoolInner<T::Conn>>>,
}

impl<T: Transport> Pool<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            inner: Arc::new(Mutex::new(PoolInner {
                clients: HashMap::new(),
                inflight: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Runs a command on the labeled host, dialing if needed. A
    /// reconnectable failure evicts the cached session and retries exactly
    /// once on a fresh dial; the second outcome is final. Cancellation,
    /// deadline, auth, and first-dial errors are never retried.
    pub async fn run(&self, cancel: &CancellationToken, label: &str, command: &str) -> HostResult {
        let outcome = match self.exec(cancel, label, command).await {
            Err(err) if err.is_reconnectable() => {
                tracing::info!(host = label, error = %err, "stale session, redialing");
                self.evict(label).await;
                self.exec(cancel, label, command).await
            }
            outcome => outcome,
        };

        match outcome {
            Ok(output) => HostResult::from_output(label, output),
            Err(err) => HostResult::from_error(label, err),
        }
    }

    async fn exec(
        &self,
        cancel: &CancellationToken,
        label: &str,
        command: &str,
    ) -> Result<CommandOutput> {
        let conn = self
            .get_or_dial(cancel, label)
            .await
            .map_err(|err| wrap_connect_error(label, err))?;
        conn.run(cancel, command).await
    }

    /// Returns the cached connection for `label`, or dials one. Concurrent
    /// first-callers share a single dial: whoever claims the ticket dials
    /// under its own token and publishes the outcome; waiters honor their
    /// own tokens without aborting the dial. The dial runs as a detached
    /// task, so the outcome is stored even when the first caller goes away.
    pub async fn get_or_dial(
        &self,
        cancel: &CancellationToken,
        label: &str,
    ) -> Result<Arc<T::Conn>> {
        let ticket = {
            let mut inner = self.inner.lock().expect("pool lock poisoned");

            if inner.closed {
                return Err(DroverError::PoolClosed);
            }

            // Fast path: already connected.
            if let Some(conn) = inner.clients.get(label) {
                return Ok(conn.clone());
            }

            match inner.inflight.get(label) {
                // Another task is already dialing this label: subscribe.
                Some(rx) => Err(rx.clone()),
                // We are the first caller: claim the single-flight ticket.
                None => {
                    let (tx, rx) = watch::channel(None);
                    inner.inflight.insert(label.to_string(), rx);
                    Ok(tx)
                }
            }
        };

        let tx = match ticket {
            Ok(tx) => tx,
            Err(mut rx) => {
                loop {
                    if let Some(outcome) = rx.borrow_and_update().clone() {
                        return outcome;
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(DroverError::Cancelled),
                        changed = rx.changed() => {
                            if changed.is_err() {
                                // Dialer vanished without publishing.
                                return Err(DroverError::Cancelled);
                            }
                        }
                    }
                }
            }
        };

        let dial = {
            let transport = self.transport.clone();
            let inner = self.inner.clone();
            let label = label.to_string();
            let token = cancel.clone();
            tokio::spawn(async move {
                let outcome: DialOutcome<T::Conn> =
                    transport.dial(&token, &label).await.map(Arc::new);

                let discarded = {
                    let mut inner = inner.lock().expect("pool lock poisoned");
                    inner.inflight.remove(&label);
                    match (&outcome, inner.closed) {
                        (Ok(conn), false) => {
                            inner.clients.insert(label.clone(), conn.clone());
                            None
                        }
                        // The pool closed mid-dial; discard instead of cache.
                        (Ok(conn), true) => Some(conn.clone()),
                        (Err(_), _) => None,
                    }
                };
                if let Some(conn) = discarded {
                    conn.close().await;
                }

                // Broadcast to waiters holding receiver clones.
                let _ = tx.send(Some(outcome.clone()));
                outcome
            })
        };

        match dial.await {
            Ok(outcome) => outcome,
            Err(_) => Err(DroverError::Cancelled),
        }
    }

    /// Drops the cached connection for `label`, closing it outside the lock.
    pub async fn evict(&self, label: &str) {
        let conn = {
            let mut inner = self.inner.lock().expect("pool lock poisoned");
            inner.clients.remove(label)
        };
        if let Some(conn) = conn {
            tracing::debug!(host = label, "evicting cached connection");
            conn.close().await;
        }
    }

    /// Snapshot query: does a cached connection exist for `label`?
    pub fn is_connected(&self, label: &str) -> bool {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.clients.contains_key(label)
    }

    /// Closes every cached connection and refuses further dials. In-flight
    /// single-flight dials complete and their results are discarded.
    pub async fn close(&self) {
        let clients = {
            let mut inner = self.inner.lock().expect("pool lock poisoned");
            inner.closed = true;
            std::mem::take(&mut inner.clients)
        };
        for (label, conn) in clients {
            tracing::debug!(host = %label, "closing pooled connection");
            conn.close().await;
        }
    }
}

#[async_trait]
impl<T: Transport> CommandRunner for Pool<T> {
    async fn run(&self, cancel: &CancellationToken, host: &str, command: &str) -> HostResult {
        Pool::run(self, cancel, host, command).await
    }
}
