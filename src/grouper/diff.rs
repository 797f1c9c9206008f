//! Unified diff between a norm output and an outlier output.

/// Maximum number of lines (in either input) before the diff engine gives
/// up computing an LCS and falls back to full removal/addition. Avoids the
/// O(n*m) table on pathological outputs.
const MAX_DIFF_LINES: usize = 500;

const HEADER: &str = "--- norm\n+++ outlier\n";

/// Computes a single-hunk unified diff between two newline-terminated
/// strings. Context lines carry a single-space prefix, deletions `-`,
/// additions `+`. Output is deterministic for identical inputs.
pub fn unified_diff(a: &str, b: &str) -> String {
    let a_lines = split_lines(a);
    let b_lines = split_lines(b);

    let mut out = String::from(HEADER);

    if a_lines.len() > MAX_DIFF_LINES || b_lines.len() > MAX_DIFF_LINES {
        for line in &a_lines {
            out.push('-');
            out.push_str(line);
            out.push('\n');
        }
        for line in &b_lines {
            out.push('+');
            out.push_str(line);
            out.push('\n');
        }
        return out;
    }

    let lcs = compute_lcs(&a_lines, &b_lines);

    let (mut ai, mut bi) = (0, 0);
    for common in &lcs {
        while ai < a_lines.len() && a_lines[ai] != *common {
            out.push('-');
            out.push_str(a_lines[ai]);
            out.push('\n');
            ai += 1;
        }
        while bi < b_lines.len() && b_lines[bi] != *common {
            out.push('+');
            out.push_str(b_lines[bi]);
            out.push('\n');
            bi += 1;
        }
        out.push(' ');
        out.push_str(common);
        out.push('\n');
        ai += 1;
        bi += 1;
    }

    while ai < a_lines.len() {
        out.push('-');
        out.push_str(a_lines[ai]);
        out.push('\n');
        ai += 1;
    }
    while bi < b_lines.len() {
        out.push('+');
        out.push_str(b_lines[bi]);
        out.push('\n');
        bi += 1;
    }

    out
}

/// Splits into lines, dropping the trailing empty element produced by a
/// trailing newline.
fn split_lines(s: &str) -> Vec<&str> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = s.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Longest common subsequence via the classical DP table. On equal table
/// entries the backtrack prefers moving up (`up >= left`), which keeps the
/// output stable for equal-length inputs.
fn compute_lcs<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<&'a str> {
    let (m, n) = (a.len(), b.len());
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else if dp[i - 1][j] >= dp[i][j - 1] {
                dp[i - 1][j]
            } else {
                dp[i][j - 1]
            };
        }
    }

    let mut lcs = Vec::with_capacity(dp[m][n]);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            lcs.push(a[i - 1]);
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    lcs.reverse();
    lcs
}
