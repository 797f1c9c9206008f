//! Content-addressed grouping of host results.
//!
//! Results are partitioned into equivalence classes over
//! `(stdout, stderr, exit_code)`; the largest class is elected the "norm"
//! and every outlier class carries a unified diff of its stdout against the
//! norm's. Errored results land in `failed` or `timed_out` instead.

pub mod diff;

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::executor::HostResult;

pub use diff::unified_diff;

/// A set of hosts that produced identical output.
#[derive(Debug, Clone, Default)]
pub struct OutputGroup {
    /// Labels in this class, sorted ascending.
    pub hosts: Vec<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    /// True for the largest (majority) group.
    pub is_norm: bool,
    /// Unified diff vs the norm's stdout; empty for the norm itself.
    pub diff: String,
}

/// Categorized results of one fan-out execution.
#[derive(Debug, Clone, Default)]
pub struct GroupedResults {
    /// Position 0 is the norm; the rest are outliers in first-appearance order.
    pub groups: Vec<OutputGroup>,
    /// Results with a non-timeout error.
    pub failed: Vec<HostResult>,
    /// Results whose error classifies as a timeout.
    pub timed_out: Vec<HostResult>,
}

/// Equivalence key: SHA-256 over stdout, stderr, and the exit code, with
/// NUL separators so field boundaries cannot collide. Collision resistance
/// matters because labels and outputs are untrusted.
fn class_key(r: &HostResult) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(&r.stdout);
    hasher.update([0u8]);
    hasher.update(&r.stderr);
    hasher.update([0u8]);
    hasher.update((r.exit_code as u32).to_be_bytes());
    hasher.finalize().into()
}

/// Partitions results by identical output, elects the majority group as the
/// norm, and computes unified diffs for the outliers. Non-zero exit results
/// group like any other (the exit code is part of the key), so twenty hosts
/// failing identically appear as one group rather than twenty entries.
pub fn group(results: Vec<HostResult>) -> GroupedResults {
    let mut grouped = GroupedResults::default();

    struct ClassData {
        hosts: Vec<String>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: i32,
    }

    // Classes in first-appearance order.
    let mut order: Vec<[u8; 32]> = Vec::new();
    let mut classes: HashMap<[u8; 32], ClassData> = HashMap::new();

    for r in results {
        if let Some(err) = &r.err {
            if err.is_timeout() {
                grouped.timed_out.push(r);
            } else {
                grouped.failed.push(r);
            }
            continue;
        }

        let key = class_key(&r);
        let class = classes.entry(key).or_insert_with(|| {
            order.push(key);
            ClassData {
                hosts: Vec::new(),
                stdout: r.stdout.clone(),
                stderr: r.stderr.clone(),
                exit_code: r.exit_code,
            }
        });
        class.hosts.push(r.host);
    }

    if order.is_empty() {
        return grouped;
    }

    // Elect the norm: strictly larger wins, so first appearance wins ties.
    let mut norm_key = order[0];
    let mut norm_size = classes[&order[0]].hosts.len();
    for key in &order[1..] {
        let size = classes[key].hosts.len();
        if size > norm_size {
            norm_key = *key;
            norm_size = size;
        }
    }

    let norm_stdout = String::from_utf8_lossy(&classes[&norm_key].stdout).into_owned();

    let mut norm = classes.remove(&norm_key).expect("norm class exists");
    norm.hosts.sort();
    grouped.groups.push(OutputGroup {
        hosts: norm.hosts,
        stdout: norm.stdout,
        stderr: norm.stderr,
        exit_code: norm.exit_code,
        is_norm: true,
        diff: String::new(),
    });

    for key in &order {
        let Some(mut class) = classes.remove(key) else {
            continue;
        };
        class.hosts.sort();
        let diff = unified_diff(
            &norm_stdout,
            &String::from_utf8_lossy(&class.stdout),
        );
        grouped.groups.push(OutputGroup {
            hosts: class.hosts,
            stdout: class.stdout,
            stderr: class.stderr,
            exit_code: class.exit_code,
            is_norm: false,
            diff,
        });
    }

    grouped
}

impl GroupedResults {
    /// Hosts in the norm group, if any.
    pub fn norm_hosts(&self) -> &[String] {
        self.groups
            .iter()
            .find(|g| g.is_norm)
            .map(|g| g.hosts.as_slice())
            .unwrap_or(&[])
    }
}
