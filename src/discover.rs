//! CIDR scanning: probe an IPv4 range for hosts with an open TCP port.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{DroverError, Result};

/// A discovered host with a verified open port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    pub address: Ipv4Addr,
    pub port: u16,
}

/// Returns all usable host addresses in the network. For prefixes shorter
/// than /31 the network and broadcast addresses are skipped.
pub fn enumerate_hosts(network: Ipv4Net) -> Vec<Ipv4Addr> {
    network.hosts().collect()
}

/// Scans a CIDR range for hosts accepting TCP connections on `port`.
/// Dials are bounded by `concurrency` and each is capped at `timeout`.
/// Results are sorted by address.
pub async fn cidr_scan(
    cancel: &CancellationToken,
    cidr: &str,
    port: u16,
    concurrency: usize,
    timeout: Duration,
) -> Result<Vec<DiscoveredHost>> {
    let network: Ipv4Net = cidr
        .parse()
        .map_err(|e| DroverError::Protocol(format!("invalid CIDR {cidr:?}: {e}")))?;

    let addresses = enumerate_hosts(network.trunc());
    if addresses.is_empty() {
        return Ok(Vec::new());
    }

    tracing::info!(cidr, port, candidates = addresses.len(), "scanning range");

    let results = Arc::new(Mutex::new(Vec::new()));
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for address in addresses {
        let sem = sem.clone();
        let results = results.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                permit = sem.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return,
                },
            };
            if cancel.is_cancelled() {
                return;
            }

            let connect = TcpStream::connect((address, port));
            match tokio::time::timeout(timeout, connect).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    results.lock().await.push(DiscoveredHost { address, port });
                }
                _ => {}
            }
        });
    }

    while tasks.join_next().await.is_some() {}

    let mut found = std::mem::take(&mut *results.lock().await);
    found.sort_by_key(|h| u32::from(h.address));
    Ok(found)
}
