//! Per-cell job plans.
//!
//! A plan is the job as it would run for one matrix cell: expressions
//! substituted, conditions evaluated where possible, and each script step
//! annotated with the fetches and driver invocations it performs.

use crate::error::Result;
use crate::expr::{evaluate_condition, substitute, unresolved, ExprContext};
use crate::matrix::Cell;
use crate::script::{analyze_script, Extraction, FetchSpec, Invocation, ScriptAnalysis};
use crate::workflow::{ContinueOnError, Job, Step, Workflow};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

/// Shell used when a step names none.
pub const DEFAULT_SHELL: &str = "bash";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Reusable action; not executed locally
    Action {
        uses: String,
        with: IndexMap<String, String>,
    },
    Script {
        script: String,
        shell: String,
        analysis: ScriptAnalysis,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStep {
    pub index: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: StepAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Evaluated `if`; `None` when there is no condition or it cannot be evaluated locally
    pub enabled: Option<bool>,
    pub env: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    pub continue_on_error: bool,
    pub timeout_minutes: u64,
    /// Expressions left unsubstituted (secrets, github context, ...)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl PlannedStep {
    /// Steps are skipped only when their condition is known to be false.
    pub fn should_run(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn analysis(&self) -> Option<&ScriptAnalysis> {
        match &self.action {
            StepAction::Script { analysis, .. } => Some(analysis),
            StepAction::Action { .. } => None,
        }
    }
}

/// A job for one matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPlan {
    pub job_id: String,
    pub cell: Cell,
    pub runs_on: Vec<String>,
    pub env: IndexMap<String, String>,
    pub enabled: Option<bool>,
    pub continue_on_error: bool,
    pub timeout_minutes: u64,
    pub steps: Vec<PlannedStep>,
}

impl JobPlan {
    /// `job (key=value, ...)`
    pub fn label(&self) -> String {
        if self.cell.values.is_empty() {
            self.job_id.clone()
        } else {
            format!("{} ({})", self.job_id, self.cell.label())
        }
    }

    pub fn fetches(&self) -> impl Iterator<Item = &FetchSpec> {
        self.steps
            .iter()
            .filter_map(PlannedStep::analysis)
            .flat_map(|a| a.fetches.iter())
    }

    pub fn extractions(&self) -> impl Iterator<Item = &Extraction> {
        self.steps
            .iter()
            .filter_map(PlannedStep::analysis)
            .flat_map(|a| a.extractions.iter())
    }

    pub fn invocations(&self) -> impl Iterator<Item = &Invocation> {
        self.steps
            .iter()
            .filter_map(PlannedStep::analysis)
            .flat_map(|a| a.invocations.iter())
    }

    /// Test configuration files passed to the driver, in step order.
    pub fn test_files(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.should_run())
            .filter_map(PlannedStep::analysis)
            .flat_map(|a| a.test_files())
            .collect()
    }
}

/// Plans for every cell of `job_id`, in expansion order.
pub fn plan_job(workflow: &Workflow, job_id: &str) -> Result<Vec<JobPlan>> {
    let job = workflow.job(job_id)?;
    let plans: Vec<JobPlan> = job
        .cells()
        .into_iter()
        .map(|cell| plan_cell(workflow, job_id, job, cell))
        .collect();
    debug!(job = job_id, cells = plans.len(), "planned job");
    Ok(plans)
}

/// Plan for one cell.
pub fn plan_cell(workflow: &Workflow, job_id: &str, job: &Job, cell: Cell) -> JobPlan {
    let mut env = IndexMap::new();
    for (key, value) in workflow.env.iter().chain(job.env.iter()) {
        let resolved = substitute(value, &ExprContext::new(&cell.values, &env));
        env.insert(key.clone(), resolved);
    }

    let ctx = ExprContext::new(&cell.values, &env);
    let runs_on = job.runs_on.iter().map(|label| substitute(label, &ctx)).collect();
    let enabled = job.condition.as_deref().and_then(|c| condition(c, &ctx, job_id));
    let continue_on_error = resolve_flag(job.continue_on_error.as_ref(), &ctx);
    let timeout_minutes = job.timeout_minutes();

    let steps = job
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| plan_step(index, step, &cell, &env, timeout_minutes, job_id))
        .collect();

    JobPlan {
        job_id: job_id.to_string(),
        cell,
        runs_on,
        env,
        enabled,
        continue_on_error,
        timeout_minutes,
        steps,
    }
}

fn plan_step(
    index: usize,
    step: &Step,
    cell: &Cell,
    job_env: &IndexMap<String, String>,
    job_timeout: u64,
    job_id: &str,
) -> PlannedStep {
    let mut env = job_env.clone();
    for (key, value) in &step.env {
        let resolved = substitute(value, &ExprContext::new(&cell.values, &env));
        env.insert(key.clone(), resolved);
    }
    let ctx = ExprContext::new(&cell.values, &env);
    let mut missing = Vec::new();

    let action = match (&step.uses, &step.run) {
        (Some(uses), _) => StepAction::Action {
            uses: uses.clone(),
            with: step
                .with
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, &ctx)))
                .collect(),
        },
        (None, run) => {
            let raw = run.as_deref().unwrap_or_default();
            missing.extend(unresolved(raw, &ctx));
            let script = substitute(raw, &ctx);
            let analysis = analyze_script(&script);
            StepAction::Script {
                script,
                shell: step.shell.clone().unwrap_or_else(|| DEFAULT_SHELL.to_string()),
                analysis,
            }
        }
    };

    let enabled = step.condition.as_deref().and_then(|c| condition(c, &ctx, job_id));
    let working_directory = step.working_directory.as_deref().map(|d| substitute(d, &ctx));
    let continue_on_error = resolve_flag(step.continue_on_error.as_ref(), &ctx);

    PlannedStep {
        index,
        name: substitute(&step.display_name(index), &ctx),
        id: step.id.clone(),
        action,
        condition: step.condition.clone(),
        enabled,
        env,
        working_directory,
        continue_on_error,
        timeout_minutes: step.timeout_minutes.unwrap_or(job_timeout),
        unresolved: missing,
    }
}

fn condition(expr: &str, ctx: &ExprContext<'_>, job_id: &str) -> Option<bool> {
    let result = evaluate_condition(expr, ctx);
    if result.is_none() {
        warn!(job = job_id, condition = expr, "condition cannot be evaluated locally; assuming it holds");
    }
    result
}

fn resolve_flag(flag: Option<&ContinueOnError>, ctx: &ExprContext<'_>) -> bool {
    match flag {
        None => false,
        Some(ContinueOnError::Flag(value)) => *value,
        Some(ContinueOnError::Expression(expr)) => evaluate_condition(expr, ctx).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW: &str = r#"
on: push
env:
  ROOT: /opt
jobs:
  build:
    runs-on: ${{ matrix.os }}
    continue-on-error: ${{ matrix.experimental == 'true' }}
    env:
      CONDA_ROOT: ${{ env.ROOT }}/${{ matrix.os }}
    strategy:
      matrix:
        os: [linux, mac]
        include:
          - os: mac
            experimental: true
    steps:
      - uses: actions/checkout@v3
        with:
          fetch-depth: 1
      - name: Mac only on ${{ matrix.os }}
        if: matrix.os == 'mac'
        run: brew install xquartz
      - name: Fetch
        run: curl --connect-timeout 8 --max-time 60 --retry 3 https://example.org/obs.tar -o obs.tar && tar -xf obs.tar
      - name: Run
        env:
          TOKEN: ${{ secrets.TOKEN }}
        run: ./mdtf -f tests/${{ matrix.os }}.jsonc
"#;

    fn plans() -> Vec<JobPlan> {
        let wf = Workflow::from_yaml(WORKFLOW).unwrap();
        plan_job(&wf, "build").unwrap()
    }

    #[test]
    fn test_one_plan_per_cell() {
        let plans = plans();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].runs_on, vec!["linux"]);
        assert_eq!(plans[1].label(), "build (os=mac, experimental=true)");
    }

    #[test]
    fn test_env_chain_and_flags() {
        let plans = plans();
        assert_eq!(plans[0].env["CONDA_ROOT"], "/opt/linux");
        assert!(!plans[0].continue_on_error);
        assert!(plans[1].continue_on_error);
        assert_eq!(plans[0].timeout_minutes, 360);
    }

    #[test]
    fn test_conditions_per_cell() {
        let plans = plans();
        assert_eq!(plans[0].steps[1].enabled, Some(false));
        assert!(!plans[0].steps[1].should_run());
        assert_eq!(plans[1].steps[1].enabled, Some(true));
        assert_eq!(plans[1].steps[1].name, "Mac only on mac");
        assert_eq!(plans[0].steps[0].enabled, None);
    }

    #[test]
    fn test_script_analysis_in_plan() {
        let plans = plans();
        let linux = &plans[0];
        assert_eq!(linux.fetches().count(), 1);
        assert!(linux.fetches().all(FetchSpec::is_bounded));
        assert_eq!(linux.extractions().next().map(|e| e.archive.as_str()), Some("obs.tar"));
        assert_eq!(linux.test_files(), vec!["tests/linux.jsonc"]);
        assert_eq!(plans[1].test_files(), vec!["tests/mac.jsonc"]);
    }

    #[test]
    fn test_unresolved_and_actions() {
        let plans = plans();
        let run = &plans[0].steps[3];
        assert_eq!(run.env["TOKEN"], "${{ secrets.TOKEN }}");
        match &plans[0].steps[0].action {
            StepAction::Action { uses, with } => {
                assert_eq!(uses, "actions/checkout@v3");
                assert_eq!(with["fetch-depth"], "1");
            }
            other => panic!("expected action, got {:?}", other),
        }
    }
}
