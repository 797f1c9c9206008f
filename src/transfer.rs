//! SFTP-based file push and pull across the fleet.
//!
//! Files are streamed through a 32 KiB cancellation-checked copy loop with
//! a SHA-256 checksum computed in-flight; pushes are verified by re-reading
//! the remote file over the same SFTP session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use russh_sftp::client::SftpSession;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{DroverError, Result};
use crate::ssh::{Client, ClientProvider};

/// Called during a transfer with the host label, bytes transferred so far,
/// and total expected bytes (0 if unknown).
pub type ProgressFn = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Outcome of a file transfer for a single host.
#[derive(Debug, Default)]
pub struct TransferResult {
    pub host: String,
    pub bytes: u64,
    pub duration: Duration,
    pub checksum: String,
    pub err: Option<DroverError>,
}

/// Copies `reader` to `writer` in bounded chunks, checking the token on
/// every iteration and reporting each chunk to `on_chunk`.
pub async fn copy_with_cancel<R, W>(
    cancel: &CancellationToken,
    mut reader: R,
    mut writer: W,
    mut on_chunk: impl FnMut(&[u8]),
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(DroverError::Cancelled);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        on_chunk(&buf[..n]);
        written += n as u64;
    }
    writer.flush().await?;
    Ok(written)
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sftp_err(err: impl std::fmt::Display) -> DroverError {
    DroverError::Transfer(err.to_string())
}

async fn open_sftp(client: &Client) -> Result<SftpSession> {
    let stream = client.open_sftp_stream().await?;
    SftpSession::new(stream).await.map_err(sftp_err)
}

/// Creates every missing directory on the remote path, `mkdir -p` style.
/// Remote paths are always Unix paths.
async fn remote_mkdir_all(sftp: &SftpSession, dir: &str) -> Result<()> {
    if dir.is_empty() || dir == "." || dir == "/" {
        return Ok(());
    }
    let mut prefix = if dir.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix.push_str(part);
        // Existing directories make this fail; that is fine.
        let _ = sftp.create_dir(prefix.clone()).await;
    }
    Ok(())
}

/// Streams the remote file back and hashes it. Avoids shelling out, so the
/// remote host needs no sha256sum binary.
async fn remote_sha256(
    cancel: &CancellationToken,
    sftp: &SftpSession,
    remote_path: &str,
) -> Result<String> {
    let file = sftp.open(remote_path.to_string()).await.map_err(sftp_err)?;
    let mut hasher = Sha256::new();
    copy_with_cancel(cancel, file, tokio::io::sink(), |chunk| {
        hasher.update(chunk)
    })
    .await?;
    Ok(hex_string(&hasher.finalize()))
}

/// Uploads a local file to `remote_path` on a single host, verifying the
/// SHA-256 checksum remotely. Returns the checksum and bytes written.
pub async fn push_file(
    cancel: &CancellationToken,
    client: &Client,
    local_path: &Path,
    remote_path: &str,
    host: &str,
    progress: Option<ProgressFn>,
) -> Result<(String, u64)> {
    let local = tokio::fs::File::open(local_path)
        .await
        .map_err(|e| DroverError::Transfer(format!("open local file: {e}")))?;
    let total = local
        .metadata()
        .await
        .map_err(|e| DroverError::Transfer(format!("stat local file: {e}")))?
        .len();

    let sftp = open_sftp(client).await?;

    if let Some((dir, _)) = remote_path.rsplit_once('/') {
        remote_mkdir_all(&sftp, dir).await?;
    }

    let remote = sftp
        .create(remote_path.to_string())
        .await
        .map_err(sftp_err)?;

    let mut hasher = Sha256::new();
    let mut transferred: u64 = 0;
    let written = copy_with_cancel(cancel, local, remote, |chunk| {
        hasher.update(chunk);
        transferred += chunk.len() as u64;
        if let Some(report) = &progress {
            report(host, transferred, total);
        }
    })
    .await?;

    let local_checksum = hex_string(&hasher.finalize());

    let remote_checksum = remote_sha256(cancel, &sftp, remote_path).await?;
    if remote_checksum != local_checksum {
        return Err(DroverError::Transfer(format!(
            "checksum mismatch: local={local_checksum} remote={remote_checksum}"
        )));
    }

    tracing::debug!(host, path = remote_path, bytes = written, "pushed file");
    Ok((local_checksum, written))
}

/// Downloads a remote file into `local_dir/<host>/<basename>`. Returns the
/// checksum, bytes read, and the local path written.
pub async fn pull_file(
    cancel: &CancellationToken,
    client: &Client,
    remote_path: &str,
    local_dir: &Path,
    host: &str,
    progress: Option<ProgressFn>,
) -> Result<(String, u64, PathBuf)> {
    let sftp = open_sftp(client).await?;

    let remote = sftp.open(remote_path.to_string()).await.map_err(sftp_err)?;
    let total = sftp
        .metadata(remote_path.to_string())
        .await
        .ok()
        .and_then(|attrs| attrs.size)
        .unwrap_or(0);

    let host_dir = local_dir.join(host);
    tokio::fs::create_dir_all(&host_dir)
        .await
        .map_err(|e| DroverError::Transfer(format!("create local dir: {e}")))?;

    let base = remote_path.rsplit('/').next().unwrap_or(remote_path);
    let local_path = host_dir.join(base);
    let local = tokio::fs::File::create(&local_path)
        .await
        .map_err(|e| DroverError::Transfer(format!("create local file: {e}")))?;

    let mut hasher = Sha256::new();
    let mut transferred: u64 = 0;
    let read = copy_with_cancel(cancel, remote, local, |chunk| {
        hasher.update(chunk);
        transferred += chunk.len() as u64;
        if let Some(report) = &progress {
            report(host, transferred, total);
        }
    })
    .await?;

    let checksum = hex_string(&hasher.finalize());
    tracing::debug!(host, path = remote_path, bytes = read, "pulled file");
    Ok((checksum, read, local_path))
}

/// Runs file transfers in parallel across multiple hosts, reusing the
/// fan-out discipline: bounded concurrency, per-host deadline, positionally
/// ordered results.
pub struct TransferExecutor<P: ClientProvider + 'static> {
    provider: Arc<P>,
    concurrency: usize,
    timeout: Duration,
}

impl<P: ClientProvider + 'static> TransferExecutor<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            concurrency: 20,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        if n > 0 {
            self.concurrency = n;
        }
        self
    }

    pub fn with_timeout(mut self, d: Duration) -> Self {
        if d > Duration::ZERO {
            self.timeout = d;
        }
        self
    }

    /// Uploads one local file to every host in parallel.
    pub async fn push(
        &self,
        cancel: &CancellationToken,
        hosts: &[String],
        local_path: &Path,
        remote_path: &str,
        progress: Option<ProgressFn>,
    ) -> Vec<TransferResult> {
        let local_path = local_path.to_path_buf();
        let remote_path = remote_path.to_string();
        self.for_each_host(cancel, hosts, move |client, token, host| {
            let local_path = local_path.clone();
            let remote_path = remote_path.clone();
            let progress = progress.clone();
            async move {
                let (checksum, bytes) =
                    push_file(&token, &client, &local_path, &remote_path, &host, progress)
                        .await?;
                Ok((checksum, bytes))
            }
        })
        .await
    }

    /// Downloads one remote file from every host in parallel, each into its
    /// own `local_dir/<host>/` directory.
    pub async fn pull(
        &self,
        cancel: &CancellationToken,
        hosts: &[String],
        remote_path: &str,
        local_dir: &Path,
        progress: Option<ProgressFn>,
    ) -> Vec<TransferResult> {
        let remote_path = remote_path.to_string();
        let local_dir = local_dir.to_path_buf();
        self.for_each_host(cancel, hosts, move |client, token, host| {
            let remote_path = remote_path.clone();
            let local_dir = local_dir.clone();
            let progress = progress.clone();
            async move {
                let (checksum, bytes, _) =
                    pull_file(&token, &client, &remote_path, &local_dir, &host, progress)
                        .await?;
                Ok((checksum, bytes))
            }
        })
        .await
    }

    async fn for_each_host<F, Fut>(
        &self,
        cancel: &CancellationToken,
        hosts: &[String],
        op: F,
    ) -> Vec<TransferResult>
    where
        F: Fn(Arc<Client>, CancellationToken, String) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<(String, u64)>> + Send,
    {
        let mut results: Vec<Option<TransferResult>> = (0..hosts.len()).map(|_| None).collect();
        if hosts.is_empty() {
            return Vec::new();
        }

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(usize, TransferResult)> = JoinSet::new();

        for (idx, host) in hosts.iter().enumerate() {
            let sem = sem.clone();
            let provider = self.provider.clone();
            let cancel = cancel.clone();
            let timeout = self.timeout;
            let host = host.clone();
            let op = op.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return (idx, TransferResult {
                            host,
                            err: Some(DroverError::Cancelled),
                            ..Default::default()
                        });
                    }
                    permit = sem.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => {
                            return (idx, TransferResult {
                                host,
                                err: Some(DroverError::Cancelled),
                                ..Default::default()
                            });
                        }
                    },
                };

                let child = cancel.child_token();
                let deadline = tokio::spawn({
                    let child = child.clone();
                    async move {
                        tokio::time::sleep(timeout).await;
                        child.cancel();
                    }
                });

                let start = Instant::now();
                let mut result = TransferResult {
                    host: host.clone(),
                    ..Default::default()
                };

                match provider.get_client(&child, &host).await {
                    Err(err) => result.err = Some(err),
                    Ok(client) => {
                        match op(client.clone(), child.clone(), host.clone()).await {
                            Ok((checksum, bytes)) => {
                                result.checksum = checksum;
                                result.bytes = bytes;
                            }
                            Err(err) => result.err = Some(err),
                        }
                        provider.release_client(client).await;
                    }
                }

                deadline.abort();
                result.duration = start.elapsed();
                (idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok((idx, result)) = joined {
                results[idx] = Some(result);
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| TransferResult {
                    host: hosts[idx].clone(),
                    err: Some(DroverError::Cancelled),
                    ..Default::default()
                })
            })
            .collect()
    }
}
