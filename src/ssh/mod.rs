//! SSH transport layer: authenticated clients, the connection pool, and
//! the runner capabilities the fan-out executor drives.
//!
//! # Components
//!
//! - [`Client`]: one authenticated session to one host, with jump-host
//!   chaining and sudo support
//! - [`Pool`]: label-keyed cache of live sessions with single-flight dials
//!   and one-shot reconnect on stale sessions
//! - [`OneShotRunner`]: dial-run-close per command
//! - [`SshTransport`]: per-label config resolution feeding both

pub mod client;
pub mod errors;
pub mod pool;
pub mod runner;

pub use client::{Client, ClientConfig, PasswordCallback};
pub use errors::wrap_connect_error;
pub use pool::{Connection, Pool, Transport};
pub use runner::{ClientProvider, OneShotRunner, SshTransport, SudoMode};
