//! Multi-step recipes with selector propagation.
//!
//! A recipe is an ordered list of `(selector, command)` steps. Each step's
//! grouping becomes the state the next step's selector resolves against, so
//! `@differs` in step N targets the hosts that diverged in step N-1.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::config::Recipe;
use crate::error::DroverError;
use crate::executor::{CommandRunner, Executor, HostResult};
use crate::grouper::{self, GroupedResults};
use crate::selector::{self, State};

/// A single command in a recipe, optionally scoped to a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    /// Empty means `@all`.
    pub selector: String,
    pub command: String,
}

impl Step {
    /// Parses a raw step string ("@differs systemctl restart nginx").
    pub fn parse(raw: &str) -> Self {
        let (selector, command) = selector::parse_input(raw);
        Self {
            selector: selector.to_string(),
            command: command.to_string(),
        }
    }
}

/// The outcome of one executed recipe step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: Step,
    /// Labels the step actually ran on after selector resolution.
    pub hosts: Vec<String>,
    pub results: Vec<HostResult>,
    pub grouped: GroupedResults,
}

/// Accumulated outcome of a recipe run. `error` is set when the run stopped
/// early (cancellation or a selector-resolution failure); the steps that
/// completed before the stop are always present.
#[derive(Debug)]
pub struct RecipeRun {
    pub steps: Vec<StepResult>,
    pub error: Option<DroverError>,
}

impl RecipeRun {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Executes recipe steps sequentially with linear grouping propagation.
pub struct RecipeRunner<R: CommandRunner> {
    executor: Executor<R>,
    all_hosts: Vec<String>,
}

impl<R: CommandRunner> RecipeRunner<R> {
    pub fn new(executor: Executor<R>, all_hosts: Vec<String>) -> Self {
        Self {
            executor,
            all_hosts,
        }
    }

    /// Runs the steps in order. Step N+1's selector sees step N's grouping,
    /// not a historical union. Selector-resolution errors abort the run;
    /// per-host command errors flow through the grouping output instead.
    pub async fn run(&self, cancel: &CancellationToken, steps: &[Step]) -> RecipeRun {
        let mut state = State::new(self.all_hosts.clone());
        let mut completed = Vec::with_capacity(steps.len());

        for step in steps {
            if cancel.is_cancelled() {
                return RecipeRun {
                    steps: completed,
                    error: Some(DroverError::Cancelled),
                };
            }

            let hosts = match selector::resolve(&step.selector, &state) {
                Ok(hosts) => hosts,
                Err(err) => {
                    return RecipeRun {
                        steps: completed,
                        error: Some(DroverError::RecipeStep {
                            command: step.command.clone(),
                            source: Box::new(err),
                        }),
                    };
                }
            };

            tracing::info!(
                selector = %step.selector,
                command = %step.command,
                hosts = hosts.len(),
                "running recipe step"
            );

            let results = self.executor.execute(cancel, &hosts, &step.command).await;
            let grouped = grouper::group(results.clone());

            completed.push(StepResult {
                step: step.clone(),
                hosts,
                results,
                grouped: grouped.clone(),
            });

            state.grouped = Some(grouped);
        }

        RecipeRun {
            steps: completed,
            error: None,
        }
    }
}

/// Built-in recipes keyed by name.
pub fn builtin_recipes() -> HashMap<String, Recipe> {
    let mut recipes = HashMap::new();
    recipes.insert(
        "disk-check".to_string(),
        Recipe {
            description: "Check disk usage on root filesystem".to_string(),
            steps: vec!["df -h /".to_string()],
        },
    );
    recipes.insert(
        "uptime".to_string(),
        Recipe {
            description: "Show uptime and load averages".to_string(),
            steps: vec!["uptime".to_string()],
        },
    );
    recipes.insert(
        "reboot-check".to_string(),
        Recipe {
            description: "Check if hosts require a reboot".to_string(),
            steps: vec![
                r#"test -f /var/run/reboot-required && echo "REBOOT REQUIRED" || echo "no reboot needed""#
                    .to_string(),
            ],
        },
    );
    recipes.insert(
        "service-check".to_string(),
        Recipe {
            description: "Check sshd status; drill into hosts that differ".to_string(),
            steps: vec![
                "systemctl is-active sshd".to_string(),
                "@differs systemctl status sshd --no-pager".to_string(),
            ],
        },
    );
    recipes.insert(
        "port-check".to_string(),
        Recipe {
            description: "List listening TCP ports (ss with netstat fallback)".to_string(),
            steps: vec!["ss -tlnp 2>/dev/null || netstat -tlnp 2>/dev/null".to_string()],
        },
    );
    recipes.insert(
        "user-audit".to_string(),
        Recipe {
            description: "List users with login shells".to_string(),
            steps: vec![
                r"grep -v -e '/nologin$' -e '/false$' /etc/passwd | cut -d: -f1,7".to_string(),
            ],
        },
    );
    recipes.insert(
        "log-tail".to_string(),
        Recipe {
            description: "Show recent error log entries".to_string(),
            steps: vec![
                "journalctl -p err --no-pager -n 20 2>/dev/null || tail -20 /var/log/syslog 2>/dev/null || tail -20 /var/log/messages"
                    .to_string(),
            ],
        },
    );
    recipes.insert(
        "os-version".to_string(),
        Recipe {
            description: "Show OS version across fleet".to_string(),
            steps: vec![
                r#"grep PRETTY_NAME /etc/os-release 2>/dev/null | cut -d= -f2 | tr -d '"' || uname -sr"#
                    .to_string(),
            ],
        },
    );
    recipes
}

/// Reports whether `name` is a built-in recipe.
pub fn is_builtin(name: &str) -> bool {
    builtin_recipes().contains_key(name)
}

/// Looks up a recipe by name; user-defined recipes override builtins.
pub fn resolve_recipe(name: &str, user: &HashMap<String, Recipe>) -> Option<Recipe> {
    user.get(name)
        .cloned()
        .or_else(|| builtin_recipes().remove(name))
}

/// Built-ins merged with user recipes; user recipes win on name clashes.
pub fn merged_recipes(user: &HashMap<String, Recipe>) -> HashMap<String, Recipe> {
    let mut merged = builtin_recipes();
    for (name, recipe) in user {
        merged.insert(name.clone(), recipe.clone());
    }
    merged
}
