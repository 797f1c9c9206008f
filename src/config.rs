use std::collections::HashMap;
use std::time::Duration;

/// Connection parameters for a single host label.
///
/// The label is the identity key used by the pool, grouper, and selector;
/// `hostname` is what actually gets dialed. Fields left at their defaults
/// fall back to the base client configuration at dial time.
#[derive(Debug, Clone, Default)]
pub struct HostParams {
    /// Display/identity label (original input, e.g. "admin@server1").
    pub label: String,
    /// Actual hostname to dial (may differ from the label).
    pub hostname: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub proxy_jump: Option<String>,
}

impl HostParams {
    /// Builds host parameters from a raw label, splitting `user@host` syntax.
    /// The label stays verbatim for display and deduplication.
    pub fn from_label(label: &str) -> Self {
        let mut params = HostParams {
            label: label.to_string(),
            hostname: label.to_string(),
            ..Default::default()
        };
        if let Some((user, hostname)) = split_user_at_host(label) {
            params.user = Some(user.to_string());
            params.hostname = hostname.to_string();
        }
        params
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_proxy_jump(mut self, spec: impl Into<String>) -> Self {
        self.proxy_jump = Some(spec.into());
        self
    }
}

/// Splits `user@host` into its parts. Returns None when no user is present
/// or either side is empty.
fn split_user_at_host(label: &str) -> Option<(&str, &str)> {
    let idx = label.find('@')?;
    let (user, rest) = (&label[..idx], &label[idx + 1..]);
    if user.is_empty() || rest.is_empty() {
        return None;
    }
    Some((user, rest))
}

/// Builds the per-label parameter map used by the SSH transport,
/// deduplicating labels by first occurrence.
pub fn resolve_hosts(labels: &[String]) -> (Vec<String>, HashMap<String, HostParams>) {
    let mut ordered = Vec::with_capacity(labels.len());
    let mut params = HashMap::with_capacity(labels.len());
    for label in labels {
        if params.contains_key(label) {
            continue;
        }
        ordered.push(label.clone());
        params.insert(label.clone(), HostParams::from_label(label));
    }
    (ordered, params)
}

/// Fan-out execution options.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Maximum number of hosts executing at once.
    pub concurrency: usize,
    /// Per-host command deadline.
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            concurrency: 20,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A named multi-step recipe.
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    pub description: String,
    /// Raw step strings, each optionally selector-prefixed ("@differs cmd").
    pub steps: Vec<String>,
}

/// Reports whether a recipe name is acceptable: `[a-zA-Z0-9_-]+`.
pub fn valid_recipe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_at_host_labels_keep_the_label_as_identity() {
        let params = HostParams::from_label("admin@server-01");
        assert_eq!(params.label, "admin@server-01");
        assert_eq!(params.hostname, "server-01");
        assert_eq!(params.user.as_deref(), Some("admin"));

        let bare = HostParams::from_label("server-02");
        assert_eq!(bare.hostname, "server-02");
        assert!(bare.user.is_none());
    }

    #[test]
    fn malformed_user_prefix_is_left_alone() {
        let params = HostParams::from_label("@server");
        assert_eq!(params.hostname, "@server");
        assert!(params.user.is_none());
    }

    #[test]
    fn resolve_hosts_deduplicates_preserving_order() {
        let labels = vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ];
        let (ordered, params) = resolve_hosts(&labels);
        assert_eq!(ordered, vec!["b", "a", "c"]);
        assert_eq!(params.len(), 3);
    }
}
