//! End-to-end scenarios: fan-out through grouping, selectors, recipes, and
//! the pool, driven by scripted runners and transports.


use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use drover::error::{DroverError, NetworkKind};
use drover::executor::{CommandOutput, Executor};
use drover::format::Formatter;
use drover::grouper::group;
use drover::recipe::{RecipeRunner, Step};
use drover::selector::{resolve, State};
use drover::ssh::Pool;
use test_harness::{labels, network_error, DialPlan, Script, ScriptedRunner, ScriptedTransport};

/// S1: three hosts, identical output.
#[tokio::test]
async fn all_identical_end_to_end() {
    let runner = Arc::new(ScriptedRunner::uniform("hello\n"));
    let executor = Executor::new(runner);
    let cancel = CancellationToken::new();

    let results = executor
        .execute(&cancel, &labels(&["h1", "h2", "h3"]), "echo hello")
        .await;
    let grouped = group(results);

    assert_eq!(grouped.groups.len(), 1);
    assert!(grouped.groups[0].is_norm);
    assert_eq!(grouped.groups[0].hosts, vec!["h1", "h2", "h3"]);
    assert!(grouped.groups[0].diff.is_empty());

    let out = Formatter::new(false, false).format(&grouped);
    assert!(out.contains("3 hosts identical"));
    assert!(out.contains("3 succeeded"));
}

/// S2: two-way split with a diff against the norm.
#[tokio::test]
async fn two_way_split_end_to_end() {
    let runner = Arc::new(
        ScriptedRunner::uniform("Debian 12\n").script("c", Script::stdout("Debian 11\n")),
    );
    let executor = Executor::new(runner);

    let results = executor
        .execute(
            &CancellationToken::new(),
            &labels(&["a", "b", "c"]),
            "cat /etc/debian_version",
        )
        .await;
    let grouped = group(results);

    assert_eq!(grouped.groups.len(), 2);
    assert_eq!(grouped.groups[0].hosts, vec!["a", "b"]);
    assert_eq!(grouped.groups[0].stdout, b"Debian 12\n");
    assert_eq!(grouped.groups[1].hosts, vec!["c"]);
    assert!(grouped.groups[1].diff.contains("-Debian 12"));
    assert!(grouped.groups[1].diff.contains("+Debian 11"));
}

/// S3: mixed failure — two healthy hosts, one refused, one deadline.
#[tokio::test]
async fn mixed_failure_end_to_end() {
    let runner = Arc::new(
        ScriptedRunner::uniform("ok\n")
            .script(
                "fail",
                Script::Fail(DroverError::Network {
                    kind: NetworkKind::ConnectionRefused,
                    message: "connection refused".to_string(),
                }),
            )
            .script("slow", Script::Hang),
    );
    let executor = Executor::new(runner).with_timeout(Duration::from_millis(50));

    let results = executor
        .execute(
            &CancellationToken::new(),
            &labels(&["ok1", "ok2", "fail", "slow"]),
            "health-check",
        )
        .await;

    let grouped = group(results);

    assert_eq!(grouped.groups.len(), 1);
    assert_eq!(grouped.groups[0].hosts, vec!["ok1", "ok2"]);
    assert_eq!(grouped.failed.len(), 1);
    assert_eq!(grouped.failed[0].host, "fail");
    assert_eq!(grouped.timed_out.len(), 1);
    assert_eq!(grouped.timed_out[0].host, "slow");
}

/// S4: identical stdout but different exit codes split the grouping.
#[tokio::test]
async fn non_zero_exit_grouping_end_to_end() {
    let runner = Arc::new(
        ScriptedRunner::uniform("x\n").script("c", Script::exit("x\n", 3)),
    );
    let executor = Executor::new(runner);

    let results = executor
        .execute(&CancellationToken::new(), &labels(&["a", "b", "c"]), "check")
        .await;
    let grouped = group(results);

    assert_eq!(grouped.groups.len(), 2);
    assert!(grouped.groups[0].is_norm);
    assert_eq!(grouped.groups[0].hosts, vec!["a", "b"]);
    assert_eq!(grouped.groups[0].exit_code, 0);
    assert_eq!(grouped.groups[1].hosts, vec!["c"]);
    assert_eq!(grouped.groups[1].exit_code, 3);
}

/// S5: a two-step recipe where step 2 selects @differs from step 1.
#[tokio::test]
async fn selector_chain_end_to_end() {
    let runner = Arc::new(ScriptedRunner::uniform("v1").script("c", Script::stdout("v0")));
    let recipe_runner = RecipeRunner::new(Executor::new(runner.clone()), labels(&["a", "b", "c"]));

    let run = recipe_runner
        .run(
            &CancellationToken::new(),
            &[Step::parse("check"), Step::parse("@differs fix")],
        )
        .await;

    assert!(run.is_ok());
    assert_eq!(run.steps[1].hosts, vec!["c"]);
    let fixes: Vec<String> = runner
        .calls()
        .into_iter()
        .filter(|(_, cmd)| cmd == "fix")
        .map(|(host, _)| host)
        .collect();
    assert_eq!(fixes, vec!["c"]);
}

/// S6: parse-input with a combined selector.
#[test]
fn combined_selector_parse() {
    let (sel, cmd) = drover::selector::parse_input("@differs, @failed systemctl restart nginx");
    assert_eq!(sel, "@differs, @failed");
    assert_eq!(cmd, "systemctl restart nginx");
}

/// S7: pool reconnect-once over a scripted transport.
#[tokio::test]
async fn pool_reconnect_end_to_end() {
    let transport = ScriptedTransport::new()
        .plan("h", DialPlan::Conn(vec![Err(network_error(NetworkKind::Eof))]))
        .plan(
            "h",
            DialPlan::Conn(vec![Ok(CommandOutput {
                stdout: b"ok\n".to_vec(),
                stderr: Vec::new(),
                exit_code: 0,
            })]),
        );
    let pool = Pool::new(transport);
    let cancel = CancellationToken::new();

    let doomed = pool.get_or_dial(&cancel, "h").await.unwrap();
    let result = pool.run(&cancel, "h", "uptime").await;

    assert!(result.err.is_none());
    assert_eq!(result.stdout, b"ok\n");
    assert!(doomed.is_closed());
    assert!(pool.is_connected("h"));

    let cached = pool.get_or_dial(&cancel, "h").await.unwrap();
    assert!(!Arc::ptr_eq(&cached, &doomed), "cache holds the fresh client");
}

/// Fan-out results feed selector state for a follow-up targeting @failed.
#[tokio::test]
async fn grouping_drives_failed_selector() {
    let runner = Arc::new(
        ScriptedRunner::uniform("fine\n")
            .script("dead", Script::Fail(DroverError::Protocol("broken".to_string())))
            .script("weird", Script::exit("fine\n", 9)),
    );
    let executor = Executor::new(runner);
    let all = labels(&["good", "dead", "weird"]);

    let results = executor
        .execute(&CancellationToken::new(), &all, "probe")
        .await;
    let state = State {
        all_hosts: all.clone(),
        grouped: Some(group(results)),
    };

    let mut failed = resolve("@failed", &state).unwrap();
    failed.sort();
    assert_eq!(failed, vec!["dead", "weird"]);
    assert_eq!(resolve("@ok", &state).unwrap(), vec!["good"]);
}

/// A cancelled fan-out still yields a full-length, positionally aligned
/// vector whose grouping puts every host in failed.
#[tokio::test]
async fn cancelled_fanout_groups_cleanly() {
    let runner = Arc::new(ScriptedRunner::with_default(Script::Hang));
    let executor = Executor::new(runner);
    let cancel = CancellationToken::new();
    let hosts = labels(&["a", "b", "c"]);

    let exec = executor.execute(&cancel, &hosts, "sleep 600");
    let (_, results) = tokio::join!(
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        },
        exec
    );

    assert_eq!(results.len(), 3);
    let grouped = group(results);
    assert!(grouped.groups.is_empty());
    assert_eq!(grouped.failed.len(), 3);
}
