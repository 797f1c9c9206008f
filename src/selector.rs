//! Host selectors: a small algebra over the previous grouping.
//!
//! A selector is a comma-separated list of `@`-prefixed tokens naming either
//! a reserved bucket (`all`, `ok`, `differs`, `failed`, `timeout`) or a
//! glob/exact hostname pattern. Selectors resolve against a [`State`]
//! snapshot holding the full host list and the last grouping.

use crate::error::{DroverError, Result};
use crate::glob;
use crate::grouper::GroupedResults;

/// Context for selector resolution: the full host list and, once a command
/// has run, the grouping it produced.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub all_hosts: Vec<String>,
    /// None until the first command has run.
    pub grouped: Option<GroupedResults>,
}

impl State {
    pub fn new(all_hosts: Vec<String>) -> Self {
        Self {
            all_hosts,
            grouped: None,
        }
    }
}

/// Splits an input line into a selector part and a command part.
///
/// If the line starts with `@`, the comma-separated run of `@`-prefixed
/// tokens is the selector (spaces around commas are tolerated; a trailing
/// comma belongs to the command). Otherwise the selector is empty, implying
/// `@all`.
pub fn parse_input(input: &str) -> (&str, &str) {
    let input = input.trim();
    if !input.starts_with('@') {
        return ("", input);
    }

    let bytes = input.as_bytes();
    let mut i = 0;
    loop {
        // Skip whitespace before the token.
        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'@' {
            break;
        }
        // Advance past this selector token.
        while i < bytes.len() && bytes[i] != b' ' && bytes[i] != b',' {
            i += 1;
        }

        // Look ahead past whitespace for a comma.
        let mut j = i;
        while j < bytes.len() && bytes[j] == b' ' {
            j += 1;
        }
        if j >= bytes.len() || bytes[j] != b',' {
            break;
        }
        // Found a comma; the next non-space char must be another token.
        j += 1;
        let mut k = j;
        while k < bytes.len() && bytes[k] == b' ' {
            k += 1;
        }
        if k >= bytes.len() || bytes[k] != b'@' {
            break; // trailing comma, not a combined selector
        }
        i = j;
    }

    let sel = input[..i].trim();
    if i >= input.len() {
        return (sel, "");
    }
    (sel, input[i..].trim())
}

/// Maps a selector string to a list of host labels. An empty selector is
/// equivalent to `@all`. Part results concatenate in order, deduplicated by
/// first occurrence.
pub fn resolve(sel: &str, state: &State) -> Result<Vec<String>> {
    if sel.is_empty() || sel == "@all" {
        return Ok(state.all_hosts.clone());
    }

    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();

    for part in sel.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        for host in resolve_single(part, state)? {
            if seen.insert(host.clone()) {
                result.push(host);
            }
        }
    }

    Ok(result)
}

fn resolve_single(sel: &str, state: &State) -> Result<Vec<String>> {
    let Some(name) = sel.strip_prefix('@') else {
        return Err(DroverError::Selector(format!(
            "invalid selector {sel:?}: must start with @"
        )));
    };

    match name {
        "all" => Ok(state.all_hosts.clone()),
        "ok" => ok_hosts(state),
        "differs" => differs_hosts(state),
        "failed" => failed_hosts(state),
        "timeout" => timeout_hosts(state),
        pattern => match_hosts(pattern, &state.all_hosts),
    }
}

fn grouping<'a>(state: &'a State, bucket: &str) -> Result<&'a GroupedResults> {
    state.grouped.as_ref().ok_or_else(|| {
        DroverError::Selector(format!("@{bucket}: no previous command results"))
    })
}

/// Hosts in the norm (majority) group.
fn ok_hosts(state: &State) -> Result<Vec<String>> {
    let grouped = grouping(state, "ok")?;
    Ok(grouped.norm_hosts().to_vec())
}

/// Hosts in non-norm groups, concatenated in group order.
fn differs_hosts(state: &State) -> Result<Vec<String>> {
    let grouped = grouping(state, "differs")?;
    Ok(grouped
        .groups
        .iter()
        .filter(|g| !g.is_norm)
        .flat_map(|g| g.hosts.iter().cloned())
        .collect())
}

/// Hosts that did not succeed: connection errors, non-zero exit codes, and
/// timeouts.
fn failed_hosts(state: &State) -> Result<Vec<String>> {
    let grouped = grouping(state, "failed")?;
    let mut hosts: Vec<String> = grouped.failed.iter().map(|r| r.host.clone()).collect();
    for g in &grouped.groups {
        if g.exit_code != 0 {
            hosts.extend(g.hosts.iter().cloned());
        }
    }
    hosts.extend(grouped.timed_out.iter().map(|r| r.host.clone()));
    Ok(hosts)
}

fn timeout_hosts(state: &State) -> Result<Vec<String>> {
    let grouped = grouping(state, "timeout")?;
    Ok(grouped.timed_out.iter().map(|r| r.host.clone()).collect())
}

/// Hosts matching a glob pattern (exact equality when the pattern carries
/// no metacharacters). Matching nothing is an error.
fn match_hosts(pattern: &str, all_hosts: &[String]) -> Result<Vec<String>> {
    let mut matched = Vec::new();
    for host in all_hosts {
        if glob::glob_match(pattern, host)? {
            matched.push(host.clone());
        }
    }

    if matched.is_empty() {
        return Err(DroverError::Selector(format!("no hosts match @{pattern}")));
    }

    Ok(matched)
}
