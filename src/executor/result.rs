use std::time::Duration;

use crate::error::DroverError;

/// Captured output of one completed remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// The result of executing a command on a single host.
///
/// `exit_code` is `-1` when no exit status was observed (connection error
/// or cancellation before the remote shell reported). A non-zero exit with
/// `err == None` is a regular outcome, not an error.
#[derive(Debug, Clone, Default)]
pub struct HostResult {
    pub host: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub duration: Duration,
    pub err: Option<DroverError>,
}

impl HostResult {
    pub fn from_output(host: impl Into<String>, output: CommandOutput) -> Self {
        Self {
            host: host.into(),
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            duration: Duration::ZERO,
            err: None,
        }
    }

    pub fn from_error(host: impl Into<String>, err: DroverError) -> Self {
        Self {
            host: host.into(),
            exit_code: -1,
            err: Some(err),
            ..Default::default()
        }
    }

    /// True when the command ran to completion with exit 0 and no error.
    pub fn succeeded(&self) -> bool {
        self.err.is_none() && self.exit_code == 0
    }
}
