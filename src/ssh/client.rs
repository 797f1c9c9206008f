//! Transport client: one authenticated SSH session to one remote host.
//!
//! A [`Client`] owns its session handle and, when reached through a jump
//! chain, the ancestor clients it was tunneled through. Commands run one at
//! a time per session; the pool multiplexes over hosts, not channels.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect, Sig};
use russh_keys::agent::client::AgentClient;
use russh_keys::key;
use russh_keys::load_secret_key;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{DroverError, Result};
use crate::executor::CommandOutput;

/// Called when agent and key-based auth both fail. Receives the hostname
/// and returns the password to try.
pub type PasswordFn = dyn Fn(&str) -> Result<String> + Send + Sync;

#[derive(Clone)]
pub struct PasswordCallback(pub Arc<PasswordFn>);

impl fmt::Debug for PasswordCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordCallback(..)")
    }
}

/// Options for creating an SSH client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// SSH username. If empty, falls back to `$USER`, then `root`.
    pub user: Option<String>,
    /// SSH port. Defaults to 22.
    pub port: Option<u16>,
    /// Explicit private key paths to try, in order. If empty, the default
    /// `~/.ssh` key locations are probed.
    pub identity_files: Vec<String>,
    /// Invoked when agent and key auth fail.
    pub password_callback: Option<PasswordCallback>,
    /// Skip host key verification entirely.
    pub accept_unknown_hosts: bool,
    /// Comma-separated jump hosts (`user@jump1:2222,jump2`). The SSH
    /// convention `"none"` disables jumping.
    pub proxy_jump: Option<String>,
}

/// Host-key verification against `~/.ssh/known_hosts`.
struct HostKeyHandler {
    host: String,
    port: u16,
    accept_unknown: bool,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = DroverError;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.accept_unknown {
            return Ok(true);
        }
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => Err(DroverError::UnknownHostKey {
                host: self.host.clone(),
            }),
            Err(russh_keys::Error::KeyChanged { .. }) => Err(DroverError::HostKeyMismatch {
                host: self.host.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

/// An authenticated SSH connection to a single host.
pub struct Client {
    host: String,
    handle: Handle<HostKeyHandler>,
    /// One command per session at a time.
    session_lock: Mutex<()>,
    /// Intermediate jump-host clients, closed in reverse order on close.
    jumps: Vec<Client>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("host", &self.host).finish()
    }
}

impl Client {
    /// Connects to `host` using the configured auth chain. With a
    /// `proxy_jump` set (and not `"none"`), the connection is tunneled
    /// through one or more jump hosts.
    pub async fn dial(
        cancel: &CancellationToken,
        host: &str,
        conf: &ClientConfig,
    ) -> Result<Client> {
        match conf.proxy_jump.as_deref() {
            Some(spec) if !spec.is_empty() && spec != "none" => {
                dial_via_proxy(cancel, host, conf).await
            }
            _ => dial_direct(cancel, host, conf).await,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Executes a command and captures stdout, stderr, and the exit status.
    /// Cancellation delivers SIGKILL to the remote, closes the channel, and
    /// returns [`DroverError::Cancelled`].
    pub async fn run(&self, cancel: &CancellationToken, command: &str) -> Result<CommandOutput> {
        let _session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DroverError::Cancelled),
            guard = self.session_lock.lock() => guard,
        };

        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;
        collect_output(cancel, &mut channel).await
    }

    /// Like [`run`](Client::run), but the command is escalated with `sudo`
    /// over a PTY and the password is written on stdin. The line-matching
    /// sudo prompt is stripped from the captured stdout.
    pub async fn run_with_sudo(
        &self,
        cancel: &CancellationToken,
        command: &str,
        password: &str,
    ) -> Result<CommandOutput> {
        let _session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DroverError::Cancelled),
            guard = self.session_lock.lock() => guard,
        };

        let mut channel = self.handle.channel_open_session().await?;
        channel
            .request_pty(false, "xterm", 80, 24, 0, 0, &[])
            .await?;
        let escalated = format!("sudo -S {command}");
        channel.exec(true, escalated.as_str()).await?;
        let input = format!("{password}\n");
        channel.data(input.as_bytes()).await?;

        let mut output = collect_output(cancel, &mut channel).await?;
        output.stdout = strip_sudo_prompt(&output.stdout);
        Ok(output)
    }

    /// Opens an SFTP subsystem channel and returns its byte stream.
    pub async fn open_sftp_stream(&self) -> Result<russh::ChannelStream<client::Msg>> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(channel.into_stream())
    }

    /// Opens a direct-tcpip tunnel to `host:port` through this session.
    pub async fn open_tunnel_stream(
        &self,
        host: &str,
        port: u16,
    ) -> Result<russh::ChannelStream<client::Msg>> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await?;
        Ok(channel.into_stream())
    }

    /// Tears down the session and any jump-host ancestors, innermost first.
    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        for jump in self.jumps.iter().rev() {
            let _ = jump
                .handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
        }
    }
}

/// Reads channel messages until close, accumulating both streams and the
/// exit status.
async fn collect_output(
    cancel: &CancellationToken,
    channel: &mut russh::Channel<client::Msg>,
) -> Result<CommandOutput> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code: Option<i32> = None;
    let mut signal: Option<String> = None;
    let mut cancelled = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => stdout.extend_from_slice(data),
                Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status as i32);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    signal = Some(format!("{signal_name:?}"));
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    if cancelled {
        // Deliver a termination signal and tear the channel down.
        let _ = channel.signal(Sig::KILL).await;
        let _ = channel.close().await;
        return Err(DroverError::Cancelled);
    }

    if let Some(signal) = signal {
        return Err(DroverError::RemoteSignal { signal });
    }
    match exit_code {
        Some(code) => Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: code,
        }),
        // The channel closed before the remote reported a status.
        None => Err(DroverError::Network {
            kind: crate::error::NetworkKind::Eof,
            message: "session closed before exit status".to_string(),
        }),
    }
}

/// Removes sudo password prompt lines (`[sudo] password for user:` and
/// `Password:`) from captured stdout, preserving everything else.
pub fn strip_sudo_prompt(stdout: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(stdout);
    let kept: Vec<&str> = text
        .split('\n')
        .filter(|line| {
            let trimmed = line.trim();
            let is_prompt = trimmed == "Password:"
                || (trimmed.starts_with("[sudo] password for ") && trimmed.ends_with(':'));
            !is_prompt
        })
        .collect();
    kept.join("\n").into_bytes()
}

async fn dial_direct(
    cancel: &CancellationToken,
    host: &str,
    conf: &ClientConfig,
) -> Result<Client> {
    check_known_hosts_present(host, conf)?;

    let port = conf.port.unwrap_or(22);
    let user = resolve_user(conf);

    tracing::debug!(host, port, user = %user, "dialing");

    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DroverError::Cancelled),
        res = TcpStream::connect((host, port)) => res.map_err(|e| DroverError::from_io(&e))?,
    };

    handshake_and_auth(cancel, stream, host, port, &user, conf).await
}

/// Chains through comma-separated jump hosts, then dials the final target
/// through the last hop. On mid-chain failure all established ancestors are
/// closed in reverse order.
async fn dial_via_proxy(
    cancel: &CancellationToken,
    host: &str,
    conf: &ClientConfig,
) -> Result<Client> {
    let spec = conf.proxy_jump.clone().unwrap_or_default();
    let hops: Vec<&str> = spec.split(',').collect();

    // Jump hops inherit auth material; per-hop user/port take precedence.
    let hop_config = |raw: &str| -> (ClientConfig, String) {
        let (user, hostname, port) = parse_jump_host(raw);
        let hc = ClientConfig {
            user,
            port,
            identity_files: conf.identity_files.clone(),
            password_callback: conf.password_callback.clone(),
            accept_unknown_hosts: conf.accept_unknown_hosts,
            proxy_jump: None,
        };
        (hc, hostname)
    };

    let close_chain = |chain: Vec<Client>| async move {
        for client in chain.iter().rev() {
            client.close().await;
        }
    };

    let (first_conf, first_host) = hop_config(hops[0]);
    let first = dial_direct(cancel, &first_host, &first_conf).await?;
    let mut chain = vec![first];

    for raw in &hops[1..] {
        let (hop_conf, hop_host) = hop_config(raw);
        let prev = chain.last().expect("chain is non-empty");
        match dial_through(cancel, prev, &hop_host, &hop_conf).await {
            Ok(next) => chain.push(next),
            Err(err) => {
                close_chain(chain).await;
                return Err(err);
            }
        }
    }

    let mut final_conf = conf.clone();
    final_conf.proxy_jump = None;
    let prev = chain.last().expect("chain is non-empty");
    match dial_through(cancel, prev, host, &final_conf).await {
        Ok(mut target) => {
            target.jumps = chain;
            Ok(target)
        }
        Err(err) => {
            close_chain(chain).await;
            Err(err)
        }
    }
}

/// Opens a fresh session to `host` tunneled through `proxy`.
async fn dial_through(
    cancel: &CancellationToken,
    proxy: &Client,
    host: &str,
    conf: &ClientConfig,
) -> Result<Client> {
    check_known_hosts_present(host, conf)?;

    let port = conf.port.unwrap_or(22);
    let user = resolve_user(conf);

    tracing::debug!(host, port, via = %proxy.host, "dialing through jump host");

    let channel = proxy
        .handle
        .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
        .await?;

    handshake_and_auth(cancel, channel.into_stream(), host, port, &user, conf).await
}

async fn handshake_and_auth<S>(
    cancel: &CancellationToken,
    stream: S,
    host: &str,
    port: u16,
    user: &str,
    conf: &ClientConfig,
) -> Result<Client>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let config = Arc::new(client::Config::default());
    let handler = HostKeyHandler {
        host: host.to_string(),
        port,
        accept_unknown: conf.accept_unknown_hosts,
    };

    // Dropping the connect future on cancellation closes the socket.
    let mut handle = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DroverError::Cancelled),
        res = client::connect_stream(config, stream, handler) => res?,
    };

    authenticate(&mut handle, host, user, conf).await?;

    Ok(Client {
        host: host.to_string(),
        handle,
        session_lock: Mutex::new(()),
        jumps: Vec::new(),
    })
}

/// Tries auth methods in order: agent, declared key files, password
/// callback. Fails with an auth error when every method is exhausted.
async fn authenticate(
    handle: &mut Handle<HostKeyHandler>,
    host: &str,
    user: &str,
    conf: &ClientConfig,
) -> Result<()> {
    if try_agent_auth(handle, user).await {
        tracing::debug!(host, user, "authenticated via agent");
        return Ok(());
    }

    for path in key_files(conf) {
        let Ok(pair) = load_secret_key(&path, None) else {
            continue;
        };
        if let Ok(true) = handle.authenticate_publickey(user, Arc::new(pair)).await {
            tracing::debug!(host, user, key = %path.display(), "authenticated via key file");
            return Ok(());
        }
    }

    if let Some(callback) = &conf.password_callback {
        let password = (callback.0)(host)?;
        if let Ok(true) = handle.authenticate_password(user, password.as_str()).await {
            tracing::debug!(host, user, "authenticated via password");
            return Ok(());
        }
    }

    Err(DroverError::Auth {
        message: "all authentication methods failed".to_string(),
        hint: format!("verify your SSH key or agent. Try: ssh -v {host}"),
    })
}

/// Process-wide agent connection, lazily established. A stale connection is
/// dropped and the next caller re-establishes.
static SHARED_AGENT: Lazy<Mutex<Option<AgentClient<tokio::net::UnixStream>>>> =
    Lazy::new(|| Mutex::new(None));

/// Closes the shared agent connection, if any.
pub async fn close_agent() {
    SHARED_AGENT.lock().await.take();
}

/// Attempts agent auth with every identity the agent lists. Returns false
/// when no agent is reachable, it lists no keys, or no key is accepted.
async fn try_agent_auth(handle: &mut Handle<HostKeyHandler>, user: &str) -> bool {
    if std::env::var_os("SSH_AUTH_SOCK").is_none() {
        return false;
    }

    let mut cell = SHARED_AGENT.lock().await;

    let mut agent = match cell.take() {
        Some(agent) => agent,
        None => match AgentClient::connect_env().await {
            Ok(agent) => agent,
            Err(_) => return false,
        },
    };

    let keys = match agent.request_identities().await {
        Ok(keys) => keys,
        Err(_) => {
            // Stale connection; reconnect once.
            match AgentClient::connect_env().await {
                Ok(mut fresh) => match fresh.request_identities().await {
                    Ok(keys) => {
                        agent = fresh;
                        keys
                    }
                    Err(_) => return false,
                },
                Err(_) => return false,
            }
        }
    };

    let mut authed = false;
    for key in keys {
        let (returned, result) = handle.authenticate_future(user, key, agent).await;
        agent = returned;
        if matches!(result, Ok(true)) {
            authed = true;
            break;
        }
    }

    *cell = Some(agent);
    authed
}

fn resolve_user(conf: &ClientConfig) -> String {
    conf.user
        .clone()
        .filter(|u| !u.is_empty())
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
        .unwrap_or_else(|| "root".to_string())
}

/// Explicit identity files, or the default `~/.ssh` locations that exist.
fn key_files(conf: &ClientConfig) -> Vec<PathBuf> {
    if !conf.identity_files.is_empty() {
        return conf.identity_files.iter().map(PathBuf::from).collect();
    }
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|path| path.exists())
        .collect()
}

/// With verification enabled, a missing known_hosts file fails the dial up
/// front with an actionable hint.
fn check_known_hosts_present(host: &str, conf: &ClientConfig) -> Result<()> {
    if conf.accept_unknown_hosts {
        return Ok(());
    }
    let Some(home) = dirs::home_dir() else {
        return Ok(());
    };
    let path = home.join(".ssh").join("known_hosts");
    if !path.exists() {
        return Err(DroverError::KnownHostsMissing {
            host: host.to_string(),
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Parses a jump host spec: `user@host:port`, `host:port`, `user@host`, or
/// `host`.
fn parse_jump_host(spec: &str) -> (Option<String>, String, Option<u16>) {
    let mut rest = spec.trim();

    let mut user = None;
    if let Some(idx) = rest.find('@') {
        if idx > 0 {
            user = Some(rest[..idx].to_string());
        }
        rest = &rest[idx + 1..];
    }

    if let Some((hostname, port_str)) = rest.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (user, hostname.to_string(), Some(port));
        }
    }

    (user, rest.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::parse_jump_host;

    #[test]
    fn jump_spec_variants() {
        assert_eq!(
            parse_jump_host("admin@bastion:2222"),
            (Some("admin".to_string()), "bastion".to_string(), Some(2222))
        );
        assert_eq!(
            parse_jump_host("bastion:2222"),
            (None, "bastion".to_string(), Some(2222))
        );
        assert_eq!(
            parse_jump_host("admin@bastion"),
            (Some("admin".to_string()), "bastion".to_string(), None)
        );
        assert_eq!(parse_jump_host("bastion"), (None, "bastion".to_string(), None));
        assert_eq!(
            parse_jump_host("  bastion  "),
            (None, "bastion".to_string(), None)
        );
    }
}
