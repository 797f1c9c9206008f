//! Production transport wiring: per-label config resolution, the one-shot
//! runner, and the client-provider capability used by file transfer and
//! tunnels.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::HostParams;
use crate::error::Result;
use crate::executor::{CommandOutput, CommandRunner, HostResult};
use crate::ssh::client::{Client, ClientConfig};
use crate::ssh::errors::wrap_connect_error;
use crate::ssh::pool::{Connection, Pool, Transport};

/// Privilege escalation mode for the one-shot runner.
#[derive(Debug, Clone, Default)]
pub enum SudoMode {
    #[default]
    Disabled,
    /// NOPASSWD sudo: commands are prefixed, no PTY needed.
    Passwordless,
    /// Password delivered over a PTY.
    Password(String),
}

/// Dials hosts by label, applying per-label overrides on top of a base
/// client configuration.
#[derive(Debug, Clone)]
pub struct SshTransport {
    base: ClientConfig,
    hosts: HashMap<String, HostParams>,
}

impl SshTransport {
    pub fn new(base: ClientConfig, hosts: HashMap<String, HostParams>) -> Self {
        Self { base, hosts }
    }

    /// Applies per-label overrides to the base config. The label (not the
    /// resolved hostname) keys the lookup.
    fn resolve(&self, label: &str) -> (ClientConfig, String) {
        let mut conf = self.base.clone();
        let mut dial_host = label.to_string();
        if let Some(params) = self.hosts.get(label) {
            if !params.hostname.is_empty() {
                dial_host = params.hostname.clone();
            }
            if let Some(user) = &params.user {
                conf.user = Some(user.clone());
            }
            if let Some(port) = params.port {
                conf.port = Some(port);
            }
            if let Some(identity) = &params.identity_file {
                conf.identity_files = vec![identity.clone()];
            }
            if let Some(jump) = &params.proxy_jump {
                conf.proxy_jump = Some(jump.clone());
            }
        }
        (conf, dial_host)
    }

    pub async fn dial_client(&self, cancel: &CancellationToken, label: &str) -> Result<Client> {
        let (conf, dial_host) = self.resolve(label);
        Client::dial(cancel, &dial_host, &conf).await
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Conn = Client;

    async fn dial(&self, cancel: &CancellationToken, label: &str) -> Result<Client> {
        self.dial_client(cancel, label).await
    }
}

#[async_trait]
impl Connection for Client {
    async fn run(&self, cancel: &CancellationToken, command: &str) -> Result<CommandOutput> {
        Client::run(self, cancel, command).await
    }

    async fn close(&self) {
        Client::close(self).await;
    }
}

/// Executes each command over a fresh connection: dial, run, close. The
/// pooled alternative is [`Pool`].
pub struct OneShotRunner {
    transport: SshTransport,
    sudo: SudoMode,
}

impl OneShotRunner {
    pub fn new(transport: SshTransport) -> Self {
        Self {
            transport,
            sudo: SudoMode::Disabled,
        }
    }

    pub fn with_sudo(mut self, sudo: SudoMode) -> Self {
        self.sudo = sudo;
        self
    }
}

#[async_trait]
impl CommandRunner for OneShotRunner {
    async fn run(&self, cancel: &CancellationToken, host: &str, command: &str) -> HostResult {
        let client = match self.transport.dial_client(cancel, host).await {
            Ok(client) => client,
            Err(err) => return HostResult::from_error(host, wrap_connect_error(host, err)),
        };

        let outcome = match &self.sudo {
            SudoMode::Disabled => client.run(cancel, command).await,
            SudoMode::Passwordless => client.run(cancel, &format!("sudo {command}")).await,
            SudoMode::Password(password) => {
                client.run_with_sudo(cancel, command, password).await
            }
        };
        client.close().await;

        match outcome {
            Ok(output) => HostResult::from_output(host, output),
            Err(err) => HostResult::from_error(host, err),
        }
    }
}

/// Capability to hand out SSH clients for subsystems that need the raw
/// session (file transfer, tunnels). Pooled providers keep clients alive;
/// one-shot providers close them in `release_client`.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn get_client(&self, cancel: &CancellationToken, label: &str) -> Result<Arc<Client>>;

    /// Default is a no-op, appropriate for pooled connections.
    async fn release_client(&self, _client: Arc<Client>) {}
}

#[async_trait]
impl ClientProvider for Pool<SshTransport> {
    async fn get_client(&self, cancel: &CancellationToken, label: &str) -> Result<Arc<Client>> {
        self.get_or_dial(cancel, label).await
    }
}

#[async_trait]
impl ClientProvider for OneShotRunner {
    async fn get_client(&self, cancel: &CancellationToken, label: &str) -> Result<Arc<Client>> {
        Ok(Arc::new(self.transport.dial_client(cancel, label).await?))
    }

    async fn release_client(&self, client: Arc<Client>) {
        client.close().await;
    }
}
