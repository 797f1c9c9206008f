//! Local port forwarding over established SSH sessions.
//!
//! Each tunnel binds a loopback listener and relays every accepted
//! connection to `remote_host:remote_port` through a stream opened on the
//! far side of the session.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{DroverError, Result};
use crate::ssh::Client;

/// Capability to open a byte stream to `host:port` on the far side of a
/// session. [`Client`] provides it over a direct-tcpip channel; tests
/// substitute plain TCP.
#[async_trait]
pub trait StreamOpener: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open_stream(&self, host: &str, port: u16) -> Result<Self::Stream>;
}

#[async_trait]
impl StreamOpener for Client {
    type Stream = russh::ChannelStream<russh::client::Msg>;

    async fn open_stream(&self, host: &str, port: u16) -> Result<Self::Stream> {
        self.open_tunnel_stream(host, port).await
    }
}

/// A port forwarding specification. `local_port` 0 binds an ephemeral port.
#[derive(Debug, Clone, Copy)]
pub struct Forward {
    pub local_port: u16,
    pub remote_port: u16,
}

/// An active tunnel for a single host.
#[derive(Debug)]
pub struct Tunnel {
    /// SSH host the tunnel goes through.
    pub host: String,
    /// Actual bound address, e.g. "127.0.0.1:8080".
    pub local_addr: SocketAddr,
    /// Remote side, e.g. "localhost:80".
    pub remote_addr: String,
    stop: CancellationToken,
}

impl Tunnel {
    /// Stops the accept loop and drops the listener.
    pub fn close(&self) {
        self.stop.cancel();
    }
}

/// Manages multiple SSH tunnels.
#[derive(Default)]
pub struct Manager {
    tunnels: Mutex<Vec<Arc<Tunnel>>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a tunnel through the given session: binds
    /// `127.0.0.1:<local_port>` and forwards each accepted connection to
    /// `remote_host:<remote_port>` over a freshly opened stream. A failed
    /// stream open drops that connection; the tunnel keeps accepting.
    pub async fn open<O: StreamOpener>(
        &self,
        opener: Arc<O>,
        host: &str,
        remote_host: &str,
        fwd: Forward,
    ) -> Result<Arc<Tunnel>> {
        let listener = TcpListener::bind(("127.0.0.1", fwd.local_port))
            .await
            .map_err(|e| {
                DroverError::Protocol(format!("listen on 127.0.0.1:{}: {e}", fwd.local_port))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DroverError::from_io(&e))?;

        let tunnel = Arc::new(Tunnel {
            host: host.to_string(),
            local_addr,
            remote_addr: format!("{remote_host}:{}", fwd.remote_port),
            stop: CancellationToken::new(),
        });

        tracing::info!(
            host,
            local = %local_addr,
            remote = %tunnel.remote_addr,
            "tunnel opened"
        );

        let accept_tunnel = tunnel.clone();
        let remote_host = remote_host.to_string();
        let remote_port = fwd.remote_port;
        tokio::spawn(async move {
            loop {
                let (mut local, peer) = tokio::select! {
                    biased;
                    _ = accept_tunnel.stop.cancelled() => return,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(_) => return,
                    },
                };

                let stream = match opener.open_stream(&remote_host, remote_port).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        tracing::warn!(peer = %peer, error = %err, "tunnel channel open failed");
                        continue;
                    }
                };

                let relay_stop = accept_tunnel.stop.clone();
                tokio::spawn(async move {
                    let mut stream = stream;
                    tokio::select! {
                        _ = relay_stop.cancelled() => {}
                        _ = tokio::io::copy_bidirectional(&mut local, &mut stream) => {}
                    }
                });
            }
        });

        self.tunnels
            .lock()
            .expect("tunnel lock poisoned")
            .push(tunnel.clone());
        Ok(tunnel)
    }

    /// Snapshot of all active tunnels.
    pub fn tunnels(&self) -> Vec<Arc<Tunnel>> {
        self.tunnels.lock().expect("tunnel lock poisoned").clone()
    }

    /// Closes every tunnel managed by this manager.
    pub fn close_all(&self) {
        let tunnels = {
            let mut guard = self.tunnels.lock().expect("tunnel lock poisoned");
            std::mem::take(&mut *guard)
        };
        for tunnel in tunnels {
            tunnel.close();
        }
    }
}
