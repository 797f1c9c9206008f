//! Formatter tests: grouped text rendering, summary lines, JSON shape, and
//! duration notation.


use std::time::Duration;

use drover::error::DroverError;
use drover::format::{format_duration, format_json, Formatter};
use drover::grouper::group;
use test_harness::{err_result, exit_result, ok_result};

fn plain() -> Formatter {
    Formatter::new(false, false)
}

#[test]
fn identical_hosts_render_one_group_with_summary() {
    let grouped = group(vec![
        ok_result("h1", "hello\n"),
        ok_result("h2", "hello\n"),
        ok_result("h3", "hello\n"),
    ]);

    let out = plain().format(&grouped);

    assert!(out.contains("3 hosts identical"), "{out}");
    assert!(out.contains("h1, h2, h3"));
    assert!(out.contains("   hello"));
    assert!(out.contains("3 succeeded"));
}

#[test]
fn outliers_render_with_diff() {
    let grouped = group(vec![
        ok_result("a", "Debian 12\n"),
        ok_result("b", "Debian 12\n"),
        ok_result("c", "Debian 11\n"),
    ]);

    let out = plain().format(&grouped);

    assert!(out.contains("2 hosts identical"));
    assert!(out.contains("1 host differs"));
    assert!(out.contains("-Debian 12"));
    assert!(out.contains("+Debian 11"));
    assert!(out.contains("--- norm"));
}

#[test]
fn non_zero_exit_groups_render_with_code() {
    let grouped = group(vec![
        exit_result("a", "x\n", 0),
        exit_result("b", "x\n", 3),
    ]);

    let out = plain().format(&grouped);

    assert!(out.contains("exited with code 3"), "{out}");
    assert!(out.contains("1 non-zero exit"));
}

#[test]
fn failures_and_timeouts_render_with_messages() {
    let grouped = group(vec![
        ok_result("fine", "ok\n"),
        err_result(
            "down",
            DroverError::Protocol("connection refused".to_string()),
        ),
        err_result("slow", DroverError::Timeout),
    ]);

    let out = plain().format(&grouped);

    assert!(out.contains("1 host failed:"));
    assert!(out.contains("down"));
    assert!(out.contains("connection refused"));
    assert!(out.contains("1 host timed out:"));
    assert!(out.contains("1 succeeded, 1 failed, 1 timeout"));
}

#[test]
fn errors_only_hides_clean_groups() {
    let grouped = group(vec![
        ok_result("fine", "all well\n"),
        exit_result("bad1", "boom\n", 1),
    ]);

    let out = Formatter::new(true, false).format(&grouped);

    assert!(!out.contains("fine"), "clean group should be hidden: {out}");
    assert!(!out.contains("all well"));
    assert!(out.contains("exited with code 1"));
    // The summary still counts everything.
    assert!(out.contains("1 succeeded"));
}

#[test]
fn single_host_single_group_drops_identical_wording() {
    let grouped = group(vec![ok_result("only", "hi\n")]);
    let out = plain().format(&grouped);
    assert!(out.contains(" 1 host:"), "{out}");
    assert!(!out.contains("identical"));
}

#[test]
fn stderr_lines_are_prefixed() {
    let mut result = ok_result("h", "out\n");
    result.stderr = b"warn: thing\n".to_vec();
    let out = plain().format(&group(vec![result]));
    assert!(out.contains("stderr: warn: thing"));
}

#[test]
fn color_mode_emits_ansi_codes() {
    let grouped = group(vec![ok_result("h1", "hi\n"), ok_result("h2", "hi\n")]);
    let out = Formatter::new(false, true).format(&grouped);
    assert!(out.contains("\x1b[32m"), "green group label expected");
    assert!(out.contains("\x1b[0m"));
}

// --- JSON ---

#[test]
fn json_array_shape_and_field_names() {
    let mut ok = ok_result("web-1", "hello\n");
    ok.duration = Duration::from_millis(52);
    let mut bad = err_result("web-2", DroverError::Timeout);
    bad.duration = Duration::from_millis(1200);

    let json = format_json(&[ok, bad]).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

    let arr = parsed.as_array().unwrap();
    assert_eq!(arr.len(), 2);

    assert_eq!(arr[0]["host"], "web-1");
    assert_eq!(arr[0]["stdout"], "hello\n");
    assert_eq!(arr[0]["exit_code"], 0);
    assert_eq!(arr[0]["duration"], "52ms");
    assert!(
        arr[0].get("error").is_none(),
        "error field omitted when absent"
    );

    assert_eq!(arr[1]["host"], "web-2");
    assert_eq!(arr[1]["exit_code"], -1);
    assert_eq!(arr[1]["duration"], "1.2s");
    assert_eq!(arr[1]["error"], "deadline exceeded");
}

#[test]
fn json_uses_two_space_indentation() {
    let json = format_json(&[ok_result("h", "x\n")]).unwrap();
    assert!(json.contains("\n  {"), "two-space indent expected:\n{json}");
    assert!(json.contains("\n    \"host\""));
}

// --- durations ---

#[test]
fn duration_notation() {
    assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
    assert_eq!(format_duration(Duration::from_millis(52)), "52ms");
    assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    assert_eq!(format_duration(Duration::from_millis(1200)), "1.2s");
    assert_eq!(format_duration(Duration::from_secs(2)), "2s");
    assert_eq!(format_duration(Duration::from_secs(59)), "59s");
    assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
    assert_eq!(format_duration(Duration::from_secs(3600)), "60m0s");
}
