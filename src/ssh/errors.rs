//! Friendly wrapping of connection errors with remediation hints.

use crate::error::{DroverError, NetworkKind};

/// Wraps a connection error with a one-line actionable hint, classified by
/// kind and message pattern. The original error is preserved as the source.
/// Errors that match no known pattern are returned unchanged.
pub fn wrap_connect_error(host: &str, err: DroverError) -> DroverError {
    // Already-hinted classifications pass through.
    match &err {
        DroverError::KnownHostsMissing { .. }
        | DroverError::UnknownHostKey { .. }
        | DroverError::HostKeyMismatch { .. }
        | DroverError::Cancelled
        | DroverError::Timeout
        | DroverError::Connect { .. } => return err,
        _ => {}
    }

    let message = err.to_string();

    if let Some(hint) = classify(host, &err, &message) {
        return DroverError::Connect {
            host: host.to_string(),
            source: Box::new(err),
            hint,
        };
    }

    err
}

fn classify(host: &str, err: &DroverError, message: &str) -> Option<String> {
    // Permission problem on a key file.
    if message.contains("permission denied") && message.contains("key") {
        return Some("check SSH key permissions (chmod 600)".to_string());
    }

    if matches!(err, DroverError::Auth { .. })
        || message.contains("unable to authenticate")
        || message.contains("no supported methods remain")
        || message.contains("handshake failed")
    {
        return Some(format!("verify your SSH key or agent. Try: ssh -v {host}"));
    }

    if let DroverError::Network { kind, .. } = err {
        match kind {
            NetworkKind::ConnectionRefused => {
                return Some("verify SSH daemon is running on the target host".to_string());
            }
            NetworkKind::DnsFailure => {
                return Some("verify hostname is correct".to_string());
            }
            _ => {}
        }
    }
    if message.contains("connection refused") {
        return Some("verify SSH daemon is running on the target host".to_string());
    }
    if message.contains("no such host")
        || message.contains("failed to lookup")
        || message.contains("Name or service not known")
    {
        return Some("verify hostname is correct".to_string());
    }

    None
}
