use std::io;

use thiserror::Error;

/// Kind of low-level network failure, preserved through cloning so results
/// can be fanned out and grouped after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Eof,
    UnexpectedEof,
    ConnectionReset,
    BrokenPipe,
    ClosedConnection,
    ConnectionRefused,
    DnsFailure,
    Timeout,
    Other,
}

#[derive(Error, Debug, Clone)]
pub enum DroverError {
    #[error("deadline exceeded")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("authentication failed: {message}\n  hint: {hint}")]
    Auth { message: String, hint: String },

    #[error("no known_hosts file found at {path}; use insecure mode or connect once with: ssh {host}")]
    KnownHostsMissing { host: String, path: String },

    #[error("host key for {host} is not in known_hosts\n  hint: use insecure mode or connect once with: ssh {host}")]
    UnknownHostKey { host: String },

    #[error("host key mismatch for {host}\n  hint: remove old key with: ssh-keygen -R {host}")]
    HostKeyMismatch { host: String },

    #[error("network error: {message}")]
    Network { kind: NetworkKind, message: String },

    #[error("connect {host}: {source}\n  hint: {hint}")]
    Connect {
        host: String,
        #[source]
        source: Box<DroverError>,
        hint: String,
    },

    #[error("remote command terminated by signal {signal}")]
    RemoteSignal { signal: String },

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("selector error: {0}")]
    Selector(String),

    #[error("invalid glob pattern {0:?}: unterminated character class")]
    InvalidPattern(String),

    #[error("recipe step {command:?}: {source}")]
    RecipeStep {
        command: String,
        #[source]
        source: Box<DroverError>,
    },

    #[error("transfer: {0}")]
    Transfer(String),

    #[error("{0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, DroverError>;

impl DroverError {
    /// Reports whether this error counts as a timeout for grouping purposes:
    /// the deadline sentinel itself, or a network error whose kind carries
    /// the timeout attribute anywhere in the chain.
    pub fn is_timeout(&self) -> bool {
        match self {
            DroverError::Timeout => true,
            DroverError::Network { kind, .. } => *kind == NetworkKind::Timeout,
            DroverError::Connect { source, .. } | DroverError::RecipeStep { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }

    /// Reports whether the error suggests a stale session that justifies one
    /// fresh-dial retry. Cancellation, deadlines, auth, host-key problems,
    /// and first-dial connect failures never qualify.
    pub fn is_reconnectable(&self) -> bool {
        match self {
            DroverError::Network { kind, .. } => matches!(
                kind,
                NetworkKind::Eof
                    | NetworkKind::UnexpectedEof
                    | NetworkKind::ConnectionReset
                    | NetworkKind::BrokenPipe
                    | NetworkKind::ClosedConnection
                    | NetworkKind::Other
            ),
            _ => false,
        }
    }

    /// Classifies a std::io error into the network taxonomy.
    pub fn from_io(err: &io::Error) -> DroverError {
        let kind = match err.kind() {
            io::ErrorKind::UnexpectedEof => NetworkKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                NetworkKind::ConnectionReset
            }
            io::ErrorKind::BrokenPipe => NetworkKind::BrokenPipe,
            io::ErrorKind::NotConnected => NetworkKind::ClosedConnection,
            io::ErrorKind::ConnectionRefused => NetworkKind::ConnectionRefused,
            io::ErrorKind::TimedOut => NetworkKind::Timeout,
            _ => NetworkKind::Other,
        };
        DroverError::Network {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<russh::Error> for DroverError {
    fn from(err: russh::Error) -> Self {
        match &err {
            russh::Error::IO(io_err) => DroverError::from_io(io_err),
            russh::Error::Disconnect => DroverError::Network {
                kind: NetworkKind::ClosedConnection,
                message: err.to_string(),
            },
            russh::Error::NotAuthenticated => DroverError::Auth {
                message: err.to_string(),
                hint: "verify your SSH key or agent".to_string(),
            },
            _ => {
                let message = err.to_string();
                if message.contains("EOF") || message.contains("eof") {
                    DroverError::Network {
                        kind: NetworkKind::Eof,
                        message,
                    }
                } else {
                    DroverError::Protocol(message)
                }
            }
        }
    }
}

impl From<russh_keys::Error> for DroverError {
    fn from(err: russh_keys::Error) -> Self {
        DroverError::Protocol(err.to_string())
    }
}

impl From<io::Error> for DroverError {
    fn from(err: io::Error) -> Self {
        DroverError::from_io(&err)
    }
}
