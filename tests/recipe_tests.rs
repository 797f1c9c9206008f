//! Recipe driver tests: step parsing, linear selector propagation, and
//! abort semantics.


use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use drover::config::valid_recipe_name;
use drover::error::DroverError;
use drover::executor::Executor;
use drover::recipe::{builtin_recipes, is_builtin, merged_recipes, RecipeRunner, Step};
use test_harness::{labels, Script, ScriptedRunner};

#[test]
fn step_parsing_splits_selector_and_command() {
    assert_eq!(
        Step::parse("@differs systemctl restart nginx"),
        Step {
            selector: "@differs".to_string(),
            command: "systemctl restart nginx".to_string(),
        }
    );
    assert_eq!(
        Step::parse("df -h /"),
        Step {
            selector: String::new(),
            command: "df -h /".to_string(),
        }
    );
}

#[tokio::test]
async fn second_step_targets_previous_outliers() {
    // Step 1 splits the fleet 2/1 on "check"; step 2 must run "fix" on
    // exactly the outlier.
    let runner = Arc::new(
        ScriptedRunner::uniform("v1")
            .script("c", Script::stdout("v0")),
    );
    let executor = Executor::new(runner.clone());
    let recipe_runner = RecipeRunner::new(executor, labels(&["a", "b", "c"]));

    let steps = vec![Step::parse("check"), Step::parse("@differs fix")];
    let run = recipe_runner.run(&CancellationToken::new(), &steps).await;

    assert!(run.is_ok());
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].hosts, vec!["a", "b", "c"]);
    assert_eq!(run.steps[1].hosts, vec!["c"]);

    let fix_calls: Vec<_> = runner
        .calls()
        .into_iter()
        .filter(|(_, cmd)| cmd == "fix")
        .collect();
    assert_eq!(fix_calls, vec![("c".to_string(), "fix".to_string())]);
}

#[tokio::test]
async fn propagation_is_linear_not_cumulative() {
    // Step 2 produces a fresh grouping; step 3's @differs must reference
    // step 2's outcome, not step 1's.
    let runner = Arc::new(
        ScriptedRunner::uniform("same")
            .script("b", Script::stdout("odd-one")),
    );
    let executor = Executor::new(runner);
    let recipe_runner = RecipeRunner::new(executor, labels(&["a", "b", "c"]));

    let steps = vec![
        Step::parse("first"),
        // Runs on b only; its grouping has a single group, no outliers.
        Step::parse("@differs second"),
        Step::parse("@differs third"),
    ];
    let run = recipe_runner.run(&CancellationToken::new(), &steps).await;

    assert!(run.is_ok());
    assert_eq!(run.steps[1].hosts, vec!["b"]);
    // Step 2's grouping had no outliers, so step 3 ran on nothing.
    assert!(run.steps[2].hosts.is_empty());
}

#[tokio::test]
async fn selector_error_aborts_with_accumulated_results() {
    let runner = Arc::new(ScriptedRunner::uniform("ok\n"));
    let executor = Executor::new(runner);
    let recipe_runner = RecipeRunner::new(executor, labels(&["a", "b"]));

    let steps = vec![
        Step::parse("uptime"),
        Step::parse("@no-such-host df -h"),
        Step::parse("never runs"),
    ];
    let run = recipe_runner.run(&CancellationToken::new(), &steps).await;

    assert_eq!(run.steps.len(), 1, "only the first step completed");
    let err = run.error.expect("selector failure aborts");
    match err {
        DroverError::RecipeStep { command, .. } => assert_eq!(command, "df -h"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn per_host_failures_do_not_abort_the_recipe() {
    let runner = Arc::new(
        ScriptedRunner::uniform("ok\n").script(
            "flaky",
            Script::Fail(DroverError::Protocol("boom".to_string())),
        ),
    );
    let executor = Executor::new(runner);
    let recipe_runner = RecipeRunner::new(executor, labels(&["solid", "flaky"]));

    let steps = vec![Step::parse("one"), Step::parse("two")];
    let run = recipe_runner.run(&CancellationToken::new(), &steps).await;

    assert!(run.is_ok());
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].grouped.failed.len(), 1);
}

#[tokio::test]
async fn cancellation_before_a_step_stops_the_recipe() {
    let runner = Arc::new(ScriptedRunner::uniform("ok\n"));
    let executor = Executor::new(runner);
    let recipe_runner = RecipeRunner::new(executor, labels(&["a"]));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = recipe_runner
        .run(&cancel, &[Step::parse("uptime")])
        .await;

    assert!(run.steps.is_empty());
    assert!(matches!(run.error, Some(DroverError::Cancelled)));
}

#[tokio::test]
async fn empty_selector_means_all_hosts() {
    let runner = Arc::new(ScriptedRunner::uniform("ok\n"));
    let executor = Executor::new(runner);
    let recipe_runner = RecipeRunner::new(executor, labels(&["x", "y", "z"]));

    let run = recipe_runner
        .run(&CancellationToken::new(), &[Step::parse("uptime")])
        .await;

    assert_eq!(run.steps[0].hosts, vec!["x", "y", "z"]);
}

// --- builtin recipes ---

#[test]
fn builtins_are_present_and_well_formed() {
    let recipes = builtin_recipes();
    for name in [
        "disk-check",
        "uptime",
        "reboot-check",
        "service-check",
        "port-check",
        "user-audit",
        "log-tail",
        "os-version",
    ] {
        let recipe = recipes.get(name).unwrap_or_else(|| panic!("missing {name}"));
        assert!(!recipe.steps.is_empty(), "{name} has no steps");
        assert!(valid_recipe_name(name));
        assert!(is_builtin(name));
    }
}

#[test]
fn service_check_second_step_scopes_to_differs() {
    let recipes = builtin_recipes();
    let step = Step::parse(&recipes["service-check"].steps[1]);
    assert_eq!(step.selector, "@differs");
}

#[test]
fn user_recipes_override_builtins() {
    let mut user = std::collections::HashMap::new();
    user.insert(
        "uptime".to_string(),
        drover::config::Recipe {
            description: "custom".to_string(),
            steps: vec!["uptime -p".to_string()],
        },
    );

    let merged = merged_recipes(&user);
    assert_eq!(merged["uptime"].steps, vec!["uptime -p"]);
    assert!(merged.contains_key("disk-check"));
}

#[test]
fn recipe_name_validation() {
    assert!(valid_recipe_name("disk-check"));
    assert!(valid_recipe_name("os_version2"));
    assert!(!valid_recipe_name(""));
    assert!(!valid_recipe_name("bad name"));
    assert!(!valid_recipe_name("bad/name"));
}
