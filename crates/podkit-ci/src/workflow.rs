//! Workflow files: triggers, jobs, strategies and steps.

use crate::error::{CiError, Result};
use crate::matrix::{Cell, CellOrigin, Combination, Finding, FindingKind, Matrix, MatrixAudit, MatrixValue};
use indexmap::IndexMap;
use regex::Regex;
use serde::de::Deserializer;
use serde::Deserialize;
use std::path::Path;

/// Default `timeout-minutes` for a job.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 360;

/// A parsed workflow file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "on", default)]
    pub triggers: Triggers,
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: IndexMap<String, String>,
    pub jobs: IndexMap<String, Job>,
}

impl Workflow {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CiError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(yaml)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Every step must name exactly one of `uses` or `run`.
    fn validate(&self) -> Result<()> {
        for (job_id, job) in &self.jobs {
            for (index, step) in job.steps.iter().enumerate() {
                let reason = match (&step.uses, &step.run) {
                    (Some(_), Some(_)) => "has both 'uses' and 'run'",
                    (None, None) => "has neither 'uses' nor 'run'",
                    _ => continue,
                };
                return Err(CiError::InvalidStep {
                    job: job_id.clone(),
                    index,
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn job(&self, id: &str) -> Result<&Job> {
        self.jobs.get(id).ok_or_else(|| CiError::UnknownJob {
            job: id.to_string(),
            available: self.jobs.keys().cloned().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed workflow)")
    }
}

/// Branch and path filters for one event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventFilter {
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub branches_ignore: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paths_ignore: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The `on:` block, normalized to event name → filter.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "TriggerSpec")]
pub struct Triggers {
    pub events: IndexMap<String, EventFilter>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TriggerSpec {
    Single(String),
    List(Vec<String>),
    Map(IndexMap<String, Option<EventFilter>>),
}

impl From<TriggerSpec> for Triggers {
    fn from(spec: TriggerSpec) -> Self {
        let events = match spec {
            TriggerSpec::Single(event) => [(event, EventFilter::default())].into_iter().collect(),
            TriggerSpec::List(events) => events.into_iter().map(|e| (e, EventFilter::default())).collect(),
            TriggerSpec::Map(events) => events
                .into_iter()
                .map(|(e, filter)| (e, filter.unwrap_or_default()))
                .collect(),
        };
        Triggers { events }
    }
}

impl Triggers {
    /// Whether `event` on `branch` touching `changed` paths starts the workflow.
    ///
    /// An empty `changed` slice skips path filtering.
    pub fn fires_on(&self, event: &str, branch: &str, changed: &[&str]) -> bool {
        let Some(filter) = self.events.get(event) else {
            return false;
        };
        if !filter.branches.is_empty() && !glob_list_matches(&filter.branches, branch) {
            return false;
        }
        if glob_list_matches(&filter.branches_ignore, branch) {
            return false;
        }
        if changed.is_empty() {
            return true;
        }
        if !filter.paths.is_empty() && !changed.iter().any(|p| glob_list_matches(&filter.paths, p)) {
            return false;
        }
        if !filter.paths_ignore.is_empty()
            && changed.iter().all(|p| glob_list_matches(&filter.paths_ignore, p))
        {
            return false;
        }
        true
    }
}

// Patterns are evaluated in order; a later `!pattern` can undo an earlier match.
fn glob_list_matches(patterns: &[String], candidate: &str) -> bool {
    let mut matched = false;
    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) if glob_matches(negated, candidate) => matched = false,
            None if glob_matches(pattern, candidate) => matched = true,
            _ => {}
        }
    }
    matched
}

/// Filter-pattern match: `*` stays within a path segment, `**` crosses them.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|re| re.is_match(candidate)).unwrap_or(false)
}

/// `continue-on-error` is a literal or an expression.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ContinueOnError {
    Flag(bool),
    Expression(String),
}

/// `strategy` of a job.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Strategy {
    #[serde(default)]
    pub matrix: Matrix,
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub fail_fast: Option<bool>,
}

/// One job of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Job {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub runs_on: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,
    #[serde(rename = "if", default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub continue_on_error: Option<ContinueOnError>,
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Job {
    /// Cells this job runs as. A job without a matrix runs once.
    pub fn cells(&self) -> Vec<Cell> {
        match &self.strategy {
            Some(s) if !s.matrix.axes.is_empty() || !s.matrix.include.is_empty() => s.matrix.expand(),
            _ => vec![Cell {
                values: Combination::new(),
                origin: CellOrigin::Product,
            }],
        }
    }

    pub fn matrix(&self) -> Option<&Matrix> {
        self.strategy.as_ref().map(|s| &s.matrix)
    }

    pub fn max_parallel(&self) -> Option<usize> {
        self.strategy.as_ref().and_then(|s| s.max_parallel)
    }

    /// Defaults to true, as on hosted runners.
    pub fn fail_fast(&self) -> bool {
        self.strategy.as_ref().and_then(|s| s.fail_fast).unwrap_or(true)
    }

    pub fn timeout_minutes(&self) -> u64 {
        self.timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES)
    }

    /// Matrix audit plus strategy-level checks.
    pub fn audit(&self) -> MatrixAudit {
        let mut audit = self.matrix().map(Matrix::audit).unwrap_or_default();
        if self.max_parallel() == Some(0) {
            audit.findings.push(Finding::new(
                FindingKind::ZeroParallel,
                "max-parallel is 0; no cell can start".to_string(),
            ));
        }
        audit
    }
}

/// One step of a job.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "if", default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub with: IndexMap<String, String>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub continue_on_error: Option<ContinueOnError>,
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
}

impl Step {
    /// `name`, else a label derived from the action or first script line.
    pub fn display_name(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return format!("Run {}", uses);
        }
        self.run
            .as_deref()
            .and_then(|script| script.lines().map(str::trim).find(|l| !l.is_empty()))
            .map(|line| format!("Run {}", line))
            .unwrap_or_else(|| format!("step {}", index + 1))
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

// Workflow env and `with` values may be numbers or booleans; keep them as text.
fn scalar_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<IndexMap<String, String>, D::Error> {
    let raw: IndexMap<String, MatrixValue> = IndexMap::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
name: smoke
on: [push, pull_request]
env:
  RETRIES: 3
jobs:
  test:
    runs-on: ubuntu-latest
    timeout-minutes: 30
    steps:
      - uses: actions/checkout@v3
      - run: |
          echo hello
          ./mdtf --version
        shell: bash
"#;

    #[test]
    fn test_parse_simple_workflow() {
        let wf = Workflow::from_yaml(SIMPLE).unwrap();
        assert_eq!(wf.display_name(), "smoke");
        assert_eq!(wf.env["RETRIES"], "3");
        let job = wf.job("test").unwrap();
        assert_eq!(job.runs_on, vec!["ubuntu-latest"]);
        assert_eq!(job.timeout_minutes(), 30);
        assert!(job.fail_fast());
        assert_eq!(job.cells().len(), 1);
        assert_eq!(job.steps[0].display_name(0), "Run actions/checkout@v3");
        assert_eq!(job.steps[1].display_name(1), "Run echo hello");
        assert!(wf.triggers.fires_on("push", "anything", &[]));
        assert!(!wf.triggers.fires_on("schedule", "main", &[]));
    }

    #[test]
    fn test_unknown_job() {
        let wf = Workflow::from_yaml(SIMPLE).unwrap();
        let err = wf.job("build").unwrap_err();
        assert!(err.to_string().contains("available: test"));
    }

    #[test]
    fn test_step_needs_exactly_one_action() {
        let both = "on: push\njobs:\n  j:\n    runs-on: x\n    steps:\n      - uses: a@v1\n        run: echo\n";
        assert!(matches!(
            Workflow::from_yaml(both),
            Err(CiError::InvalidStep { index: 0, .. })
        ));
        let neither = "on: push\njobs:\n  j:\n    runs-on: x\n    steps:\n      - name: nothing\n";
        assert!(Workflow::from_yaml(neither).is_err());
    }

    #[test]
    fn test_trigger_branch_filters() {
        let wf = Workflow::from_yaml(
            "on:\n  push:\n    branches: [main, 'release/**', '!release/old']\n    paths-ignore: ['docs/**']\n  pull_request:\njobs: {}\n",
        )
        .unwrap();
        assert!(wf.triggers.fires_on("push", "main", &[]));
        assert!(wf.triggers.fires_on("push", "release/v4/rc1", &[]));
        assert!(!wf.triggers.fires_on("push", "release/old", &[]));
        assert!(!wf.triggers.fires_on("push", "feature/x", &[]));
        assert!(!wf.triggers.fires_on("push", "main", &["docs/index.md"]));
        assert!(wf.triggers.fires_on("push", "main", &["docs/index.md", "src/lib.rs"]));
        assert!(wf.triggers.fires_on("pull_request", "feature/x", &[]));
    }

    #[test]
    fn test_glob() {
        assert!(glob_matches("release/*", "release/v1"));
        assert!(!glob_matches("release/*", "release/v1/rc"));
        assert!(glob_matches("release/**", "release/v1/rc"));
        assert!(glob_matches("v?.0", "v4.0"));
        assert!(!glob_matches("main", "maintenance"));
    }

    #[test]
    fn test_continue_on_error_forms() {
        let wf = Workflow::from_yaml(
            "on: push\njobs:\n  a:\n    continue-on-error: true\n    steps: []\n  b:\n    continue-on-error: ${{ matrix.experimental }}\n    steps: []\n",
        )
        .unwrap();
        assert_eq!(wf.jobs["a"].continue_on_error, Some(ContinueOnError::Flag(true)));
        assert!(matches!(
            wf.jobs["b"].continue_on_error,
            Some(ContinueOnError::Expression(_))
        ));
    }

    #[test]
    fn test_zero_max_parallel_is_flagged() {
        let wf = Workflow::from_yaml(
            "on: push\njobs:\n  a:\n    strategy:\n      matrix:\n        os: [x]\n      max-parallel: 0\n    steps: []\n",
        )
        .unwrap();
        let audit = wf.jobs["a"].audit();
        assert!(audit.has(FindingKind::ZeroParallel));
        assert!(audit.has_errors());
    }
}
