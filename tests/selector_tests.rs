//! Selector parsing and resolution tests.


use drover::error::DroverError;
use drover::grouper::group;
use drover::selector::{parse_input, resolve, State};
use test_harness::{err_result, exit_result, labels, ok_result};

fn state_with_grouping() -> State {
    let results = vec![
        ok_result("a", "v1\n"),
        ok_result("b", "v1\n"),
        ok_result("c", "v0\n"),
        exit_result("d", "v1\n", 2),
        err_result(
            "e",
            DroverError::Protocol("connection refused".to_string()),
        ),
        err_result("f", DroverError::Timeout),
    ];
    State {
        all_hosts: labels(&["a", "b", "c", "d", "e", "f"]),
        grouped: Some(group(results)),
    }
}

// --- parse_input ---

#[test]
fn plain_command_has_empty_selector() {
    assert_eq!(parse_input("uptime"), ("", "uptime"));
    assert_eq!(parse_input("  uptime  "), ("", "uptime"));
}

#[test]
fn single_selector_splits_from_command() {
    assert_eq!(
        parse_input("@differs systemctl restart nginx"),
        ("@differs", "systemctl restart nginx")
    );
}

#[test]
fn combined_selector_with_spaces() {
    assert_eq!(
        parse_input("@differs, @failed systemctl restart nginx"),
        ("@differs, @failed", "systemctl restart nginx")
    );
}

#[test]
fn tight_comma_selector() {
    assert_eq!(parse_input("@ok,@web-* df -h"), ("@ok,@web-*", "df -h"));
}

#[test]
fn trailing_comma_belongs_to_command() {
    // The comma is not followed by another @token, so the selector ends
    // before it.
    assert_eq!(parse_input("@ok , du -sh"), ("@ok", ", du -sh"));
}

#[test]
fn selector_only_input_has_empty_command() {
    assert_eq!(parse_input("@all"), ("@all", ""));
    assert_eq!(parse_input("@ok, @differs"), ("@ok, @differs", ""));
}

#[test]
fn at_in_command_argument_is_not_a_selector() {
    assert_eq!(
        parse_input("echo @not-a-selector"),
        ("", "echo @not-a-selector")
    );
}

// --- resolve ---

#[test]
fn empty_and_at_all_are_identity() {
    let state = state_with_grouping();
    assert_eq!(resolve("", &state).unwrap(), state.all_hosts);
    assert_eq!(resolve("@all", &state).unwrap(), state.all_hosts);

    let fresh = State::new(labels(&["x", "y"]));
    assert_eq!(resolve("@all", &fresh).unwrap(), fresh.all_hosts);
}

#[test]
fn ok_resolves_to_norm_hosts() {
    let state = state_with_grouping();
    assert_eq!(resolve("@ok", &state).unwrap(), vec!["a", "b"]);
}

#[test]
fn differs_resolves_to_outlier_hosts() {
    let state = state_with_grouping();
    assert_eq!(resolve("@differs", &state).unwrap(), vec!["c", "d"]);
}

#[test]
fn failed_unions_errors_nonzero_and_timeouts() {
    let state = state_with_grouping();
    let mut hosts = resolve("@failed", &state).unwrap();
    hosts.sort();
    assert_eq!(hosts, vec!["d", "e", "f"]);
}

#[test]
fn timeout_resolves_to_timed_out_hosts() {
    let state = state_with_grouping();
    assert_eq!(resolve("@timeout", &state).unwrap(), vec!["f"]);
}

#[test]
fn bucket_selectors_error_without_grouping() {
    let state = State::new(labels(&["a", "b"]));
    for sel in ["@ok", "@differs", "@failed", "@timeout"] {
        let err = resolve(sel, &state).unwrap_err();
        assert!(
            err.to_string().contains("no previous command results"),
            "{sel}: {err}"
        );
    }
}

#[test]
fn glob_and_exact_matching() {
    let state = State::new(labels(&["web-1", "web-2", "db-1", "admin@db-2"]));

    assert_eq!(resolve("@web-*", &state).unwrap(), vec!["web-1", "web-2"]);
    assert_eq!(resolve("@db-1", &state).unwrap(), vec!["db-1"]);
    assert_eq!(resolve("@web-?", &state).unwrap(), vec!["web-1", "web-2"]);
    assert_eq!(resolve("@web-[12]", &state).unwrap(), vec!["web-1", "web-2"]);
}

#[test]
fn unmatched_pattern_is_an_error() {
    let state = State::new(labels(&["web-1"]));
    let err = resolve("@db-*", &state).unwrap_err();
    assert!(err.to_string().contains("no hosts match"));
}

#[test]
fn union_deduplicates_by_first_occurrence() {
    let state = state_with_grouping();
    // @ok yields a,b; @a* yields a again; result keeps first occurrence.
    let hosts = resolve("@ok,@a*", &state).unwrap();
    assert_eq!(hosts, vec!["a", "b"]);
}

#[test]
fn ok_union_differs_covers_all_grouped_hosts() {
    let state = state_with_grouping();
    let mut union = resolve("@ok,@differs", &state).unwrap();
    union.sort();

    let grouped = state.grouped.as_ref().unwrap();
    let mut expected: Vec<String> = grouped
        .groups
        .iter()
        .flat_map(|g| g.hosts.iter().cloned())
        .collect();
    expected.sort();
    expected.dedup();

    assert_eq!(union, expected);
}

#[test]
fn selector_chain_targets_previous_outliers() {
    // Step 1: three hosts check versions; step 2 selects @differs.
    let step1 = group(vec![
        ok_result("a", "v1"),
        ok_result("b", "v1"),
        ok_result("c", "v0"),
    ]);
    let state = State {
        all_hosts: labels(&["a", "b", "c"]),
        grouped: Some(step1),
    };

    assert_eq!(resolve("@differs", &state).unwrap(), vec!["c"]);
}
