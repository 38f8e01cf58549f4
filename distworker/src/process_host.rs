//! Host that runs a JSON plan of external commands.
//!
//! Plan file:
//! ```json
//! {
//!   "items": [{"id": "smoke", "command": ["./smoke.sh"], "fixture": "db"}],
//!   "fixtures": {"db": {"setup": ["./db-up.sh"], "teardown": ["./db-down.sh"]}}
//! }
//! ```
//!
//! Each item runs setup/call/teardown phases and reports each one. A fixture
//! is set up by the first item that needs it and torn down only when the
//! next item does not use it, which is what the lookahead is for.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::host::{Collection, TestHost, WorkerHooks};
use crate::protocol::ItemIndex;
use crate::report::{CollectReport, Location, Outcome, Phase, TestReport};
use crate::warning::{TypeName, WarningMessage, WarningWhen};

pub const DEFAULT_PLAN_FILE: &str = "distworker.json";

/// Exit status a command uses to mark itself skipped.
pub const SKIP_EXIT_CODE: i32 = 77;

/// Stderr lines with this prefix are recorded as warnings.
const WARNING_PREFIX: &str = "WARNING:";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestPlan {
    #[serde(default)]
    pub items: Vec<PlanItem>,
    #[serde(default)]
    pub fixtures: IndexMap<String, Fixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub command: Vec<String>,
    /// Relative to the plan's directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub fixture: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub teardown: Vec<String>,
}

impl TestPlan {
    /// Everything wrong with the plan, one line per problem.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.id.as_str()) {
                problems.push(format!("duplicate item id `{}`", item.id));
            }
            if item.command.is_empty() {
                problems.push(format!("item `{}` has an empty command", item.id));
            }
            if let Some(fixture) = &item.fixture
                && !self.fixtures.contains_key(fixture)
            {
                problems.push(format!(
                    "item `{}` uses unknown fixture `{fixture}`",
                    item.id
                ));
            }
        }
        problems
    }
}

/// Outcome of running one command (or of doing nothing).
#[derive(Debug)]
struct CommandRun {
    outcome: Outcome,
    longrepr: Option<String>,
    stdout: String,
    stderr: String,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    duration: f64,
}

impl CommandRun {
    fn noop() -> Self {
        let now = Utc::now();
        Self {
            outcome: Outcome::Passed,
            longrepr: None,
            stdout: String::new(),
            stderr: String::new(),
            start: now,
            stop: now,
            duration: 0.0,
        }
    }

    fn failed(longrepr: String) -> Self {
        Self {
            outcome: Outcome::Failed,
            longrepr: Some(longrepr),
            ..Self::noop()
        }
    }
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

pub struct ProcessHost {
    plan_path: PathBuf,
    rootdir: PathBuf,
    env: Vec<(String, OsString)>,
    basetemp: Option<PathBuf>,
    plan: TestPlan,
    active_fixture: Option<String>,
}

impl ProcessHost {
    /// The plan is the first positional argument, else [`DEFAULT_PLAN_FILE`].
    pub fn new(config: &WorkerConfig, cwd: &Path) -> Self {
        let plan_path = config
            .args
            .first()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAN_FILE));
        let plan_path = cwd.join(plan_path);
        let rootdir = plan_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.to_path_buf());

        Self {
            plan_path,
            rootdir,
            env: config.process_env(),
            basetemp: config.basetemp.clone(),
            plan: TestPlan::default(),
            active_fixture: None,
        }
    }

    fn plan_name(&self) -> String {
        self.plan_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_PLAN_FILE.to_string())
    }

    fn nodeid(&self, item: &PlanItem) -> String {
        format!("{}::{}", self.plan_name(), item.id)
    }

    async fn load_plan(&self) -> Result<TestPlan, String> {
        let text = tokio::fs::read_to_string(&self.plan_path)
            .await
            .map_err(|e| format!("cannot read {}: {e}", self.plan_path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("invalid plan {}: {e}", self.plan_path.display()))
    }

    /// Items find `basetemp` through the environment; it must exist before they run.
    async fn prepare_basetemp(&self) -> Result<(), String> {
        let Some(dir) = &self.basetemp else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| format!("cannot create basetemp {}: {e}", dir.display()))
    }

    async fn run_command(&self, argv: &[String], cwd: Option<&Path>) -> CommandRun {
        let Some((program, args)) = argv.split_first() else {
            return CommandRun::failed("empty command".to_string());
        };
        let workdir = match cwd {
            Some(dir) => self.rootdir.join(dir),
            None => self.rootdir.clone(),
        };

        let start = Utc::now();
        let clock = Instant::now();
        let result = Command::new(program)
            .args(args)
            .envs(self.env.iter().cloned())
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .output()
            .await;
        let duration = clock.elapsed().as_secs_f64();
        let stop = Utc::now();

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(%program, error = %e, "Failed to spawn command");
                return CommandRun {
                    start,
                    stop,
                    duration,
                    ..CommandRun::failed(format!("failed to spawn `{program}`: {e}"))
                };
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let (outcome, longrepr) = if output.status.success() {
            (Outcome::Passed, None)
        } else if output.status.code() == Some(SKIP_EXIT_CODE) {
            (Outcome::Skipped, Some(format!("`{program}` skipped itself")))
        } else {
            let mut longrepr = format!("`{}` exited with {}", argv.join(" "), output.status);
            if !stderr.is_empty() {
                longrepr.push('\n');
                longrepr.push_str(stderr.trim_end());
            }
            (Outcome::Failed, Some(longrepr))
        };

        CommandRun {
            outcome,
            longrepr,
            stdout,
            stderr,
            start,
            stop,
            duration,
        }
    }

    async fn setup_fixture(&mut self, wanted: Option<&str>) -> CommandRun {
        if self.active_fixture.as_deref() == wanted {
            return CommandRun::noop();
        }
        // Leftover from an item whose successor was not known in advance.
        if self.active_fixture.is_some() {
            let teardown = self.teardown_fixture().await;
            if teardown.outcome == Outcome::Failed {
                tracing::warn!(longrepr = ?teardown.longrepr, "Late fixture teardown failed");
            }
        }
        let Some(name) = wanted else {
            return CommandRun::noop();
        };
        let Some(fixture) = self.plan.fixtures.get(name) else {
            return CommandRun::failed(format!("unknown fixture `{name}`"));
        };

        let run = if fixture.setup.is_empty() {
            CommandRun::noop()
        } else {
            let setup = fixture.setup.clone();
            tracing::debug!(fixture = name, "Setting up fixture");
            self.run_command(&setup, None).await
        };
        if run.outcome == Outcome::Passed {
            self.active_fixture = Some(name.to_string());
        }
        run
    }

    async fn teardown_fixture(&mut self) -> CommandRun {
        let Some(name) = self.active_fixture.take() else {
            return CommandRun::noop();
        };
        let teardown = self
            .plan
            .fixtures
            .get(&name)
            .map(|f| f.teardown.clone())
            .unwrap_or_default();
        if teardown.is_empty() {
            return CommandRun::noop();
        }
        tracing::debug!(fixture = %name, "Tearing down fixture");
        self.run_command(&teardown, None).await
    }

    fn phase_report(
        &self,
        item: &PlanItem,
        location: &Location,
        when: Phase,
        run: &CommandRun,
    ) -> TestReport {
        let nodeid = self.nodeid(item);
        let mut report = TestReport::new(nodeid, location.clone(), when, run.outcome);
        report.keywords.insert(item.id.clone(), Value::from(1));
        report.keywords.insert(self.plan_name(), Value::from(1));
        report.longrepr = run.longrepr.clone();
        report.duration = run.duration;
        report.start = epoch_seconds(run.start);
        report.stop = epoch_seconds(run.stop);

        let phase = match when {
            Phase::Setup => "setup",
            Phase::Call => "call",
            Phase::Teardown => "teardown",
        };
        if !run.stdout.is_empty() {
            report
                .sections
                .push((format!("Captured stdout {phase}"), run.stdout.clone()));
        }
        if !run.stderr.is_empty() {
            report
                .sections
                .push((format!("Captured stderr {phase}"), run.stderr.clone()));
        }
        report
    }

    fn warnings(item: &PlanItem, stderr: &str) -> Vec<WarningMessage> {
        let program = item.command.first().cloned().unwrap_or_default();
        stderr
            .lines()
            .filter_map(|line| {
                let text = line.strip_prefix(WARNING_PREFIX)?.trim();
                Some(
                    WarningMessage::new(
                        text,
                        Some(TypeName::new("distworker", "CommandWarning")),
                        program.clone(),
                        0,
                    )
                    .with_line(line),
                )
            })
            .collect()
    }
}

#[async_trait]
impl TestHost for ProcessHost {
    async fn collect(&mut self, hooks: &mut dyn WorkerHooks) -> Result<Collection, WorkerError> {
        let plan_name = self.plan_name();
        let loaded = match self.prepare_basetemp().await {
            Ok(()) => self.load_plan().await,
            Err(e) => Err(e),
        };
        let report = match loaded {
            Ok(plan) => {
                let problems = plan.problems();
                if problems.is_empty() {
                    self.plan = plan;
                    let ids = self.plan.items.iter().map(|i| self.nodeid(i)).collect();
                    CollectReport::ok(plan_name, ids)
                } else {
                    CollectReport::error(plan_name, problems.join("\n"))
                }
            }
            Err(e) => CollectReport::error(plan_name, e),
        };
        tracing::info!(
            plan = %self.plan_path.display(),
            items = self.plan.items.len(),
            outcome = ?report.outcome,
            "Collected plan"
        );
        hooks.collect_report(&report).await?;

        Ok(Collection {
            rootdir: self.rootdir.clone(),
            ids: report.result,
        })
    }

    async fn run_protocol(
        &mut self,
        index: ItemIndex,
        next: Option<ItemIndex>,
        hooks: &mut dyn WorkerHooks,
    ) -> Result<(), WorkerError> {
        let item = self
            .plan
            .items
            .get(index)
            .cloned()
            .ok_or(WorkerError::IndexOutOfRange {
                index,
                len: self.plan.items.len(),
            })?;
        let next_fixture = next
            .and_then(|n| self.plan.items.get(n))
            .and_then(|n| n.fixture.clone());
        let nodeid = self.nodeid(&item);
        let location = Location::new(self.plan_name(), None, item.id.as_str());

        hooks.log_start(&nodeid, &location).await?;

        let setup = self.setup_fixture(item.fixture.as_deref()).await;
        let setup_passed = setup.outcome == Outcome::Passed;
        let report = self.phase_report(&item, &location, Phase::Setup, &setup);
        hooks.log_report(&report).await?;

        if setup_passed {
            let call = self.run_command(&item.command, item.cwd.as_deref()).await;
            for warning in Self::warnings(&item, &call.stderr) {
                hooks
                    .warning_recorded(&warning, WarningWhen::Runtest, &nodeid, Some(&location))
                    .await?;
            }
            let report = self.phase_report(&item, &location, Phase::Call, &call);
            hooks.log_report(&report).await?;
        }

        let keep_fixture = item.fixture.is_some() && item.fixture == next_fixture;
        let teardown = if keep_fixture {
            CommandRun::noop()
        } else {
            self.teardown_fixture().await
        };
        let report = self.phase_report(&item, &location, Phase::Teardown, &teardown);
        hooks.log_report(&report).await?;

        hooks.log_finish(&nodeid, &location).await?;
        Ok(())
    }

    async fn finalize(&mut self, _hooks: &mut dyn WorkerHooks) -> Result<(), WorkerError> {
        let teardown = self.teardown_fixture().await;
        if teardown.outcome == Outcome::Failed {
            tracing::warn!(longrepr = ?teardown.longrepr, "Fixture teardown at session end failed");
        }
        Ok(())
    }
}
