//! Local execution of job plans.
//!
//! Cells run concurrently up to `max-parallel`; steps inside a cell run in
//! order and stop at the first failure that is not tolerated. `uses` steps
//! cannot be reproduced locally and are always reported as skipped.

use crate::error::{CiError, Result};
use crate::plan::{JobPlan, PlannedStep, StepAction, DEFAULT_SHELL};
use crate::report::{JobReport, JobStatus, RunReport, StepReport, StepStatus};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

/// Stands for the script file path in a custom shell template.
pub const SCRIPT_PLACEHOLDER: &str = "{0}";

/// A script step ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    pub name: String,
    pub shell: String,
    pub script: String,
    pub env: Vec<(String, String)>,
    pub working_directory: Option<PathBuf>,
    pub timeout: Duration,
}

/// What a process produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl StepOutput {
    pub fn success() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &ScriptStep) -> Result<StepOutput>;
}

/// Runs scripts through the step's shell, failing on the first error.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workdir: PathBuf,
}

impl ShellExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Program and arguments for `shell`.
    ///
    /// A bare shell name gets its fail-fast flags; a shell with its own
    /// arguments (`bash -l`) gets `-c` appended.
    pub fn shell_command(shell: &str, script: &str) -> (String, Vec<String>) {
        let mut words = shell.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_else(|| DEFAULT_SHELL.to_string());
        let mut argv: Vec<String> = words.collect();
        if argv.is_empty() {
            let defaults: &[&str] = match program.as_str() {
                "bash" => &["--noprofile", "--norc", "-e", "-o", "pipefail", "-c"],
                "sh" => &["-e", "-c"],
                _ => &["-c"],
            };
            argv.extend(defaults.iter().map(|a| a.to_string()));
        } else {
            argv.push("-c".to_string());
        }
        argv.push(script.to_string());
        (program, argv)
    }

    /// Program and arguments for a shell template such as `bash -el {0}`,
    /// with `{0}` replaced by the path of the script file.
    pub fn template_command(shell: &str, script_path: &Path) -> (String, Vec<String>) {
        let path = script_path.to_string_lossy();
        let mut words = shell
            .split_whitespace()
            .map(|word| word.replace(SCRIPT_PLACEHOLDER, &path));
        let program = words.next().unwrap_or_else(|| DEFAULT_SHELL.to_string());
        (program, words.collect())
    }

    fn write_script(step: &ScriptStep) -> Result<TempPath> {
        let spawn_error = |source| CiError::Spawn {
            step: step.name.clone(),
            source,
        };
        let mut file = tempfile::Builder::new()
            .prefix("podkit-step-")
            .suffix(".sh")
            .tempfile()
            .map_err(spawn_error)?;
        file.write_all(step.script.as_bytes()).map_err(spawn_error)?;
        file.flush().map_err(spawn_error)?;
        Ok(file.into_temp_path())
    }

    fn resolve_dir(&self, dir: Option<&Path>) -> PathBuf {
        match dir {
            Some(d) if d.is_absolute() => d.to_path_buf(),
            Some(d) => self.workdir.join(d),
            None => self.workdir.clone(),
        }
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, step: &ScriptStep) -> Result<StepOutput> {
        // removed when the step finishes
        let script_file = if step.shell.contains(SCRIPT_PLACEHOLDER) {
            Some(Self::write_script(step)?)
        } else {
            None
        };
        let (program, args) = match &script_file {
            Some(path) => Self::template_command(&step.shell, path),
            None => Self::shell_command(&step.shell, &step.script),
        };

        let child = Command::new(&program)
            .args(&args)
            .envs(step.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(self.resolve_dir(step.working_directory.as_deref()))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CiError::Spawn {
                step: step.name.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(step.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|source| CiError::Spawn {
                step: step.name.clone(),
                source,
            })?,
            Err(_) => {
                return Ok(StepOutput {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("timed out after {} seconds", step.timeout.as_secs()),
                    timed_out: true,
                })
            }
        };

        Ok(StepOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        })
    }
}

/// Records each step instead of running it.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    executed: Mutex<Vec<ScriptStep>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps seen so far, in the order they were reached.
    pub fn executed(&self) -> Vec<ScriptStep> {
        self.executed.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StepExecutor for DryRunExecutor {
    async fn execute(&self, step: &ScriptStep) -> Result<StepOutput> {
        if let Ok(mut log) = self.executed.lock() {
            log.push(step.clone());
        }
        Ok(StepOutput::success())
    }
}

/// Runs the cells of one job.
pub struct WorkflowRunner<E> {
    executor: Arc<E>,
    max_parallel: Option<usize>,
    fail_fast: bool,
    dry_run: bool,
}

impl<E: StepExecutor + 'static> WorkflowRunner<E> {
    pub fn new(executor: E) -> Self {
        Self::from_shared(Arc::new(executor))
    }

    pub fn from_shared(executor: Arc<E>) -> Self {
        Self {
            executor,
            max_parallel: None,
            fail_fast: true,
            dry_run: false,
        }
    }

    pub fn max_parallel(mut self, limit: Option<usize>) -> Self {
        self.max_parallel = limit;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Mark the report as a dry run.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run every plan and collect a report in plan order.
    pub async fn run(&self, workflow: &str, job_id: &str, plans: Vec<JobPlan>) -> Result<RunReport> {
        if self.max_parallel == Some(0) {
            return Err(CiError::ZeroParallel(job_id.to_string()));
        }
        let limit = self.max_parallel.unwrap_or(plans.len()).max(1);
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, job = job_id, cells = plans.len(), max_parallel = limit, "starting run");

        let cancel = Arc::new(AtomicBool::new(false));
        let fail_fast = self.fail_fast;
        let mut jobs: Vec<(usize, JobReport)> = stream::iter(plans.into_iter().enumerate())
            .map(|(index, plan)| {
                let executor = Arc::clone(&self.executor);
                let cancel = Arc::clone(&cancel);
                async move {
                    let report = run_job(executor.as_ref(), plan, &cancel).await;
                    if fail_fast && report.blocks_run() {
                        cancel.store(true, Ordering::SeqCst);
                    }
                    (index, report)
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        jobs.sort_by_key(|(index, _)| *index);

        let report = RunReport {
            run_id,
            workflow: workflow.to_string(),
            job_id: job_id.to_string(),
            dry_run: self.dry_run,
            started_at,
            finished_at: Utc::now(),
            jobs: jobs.into_iter().map(|(_, report)| report).collect(),
        };
        info!(
            run_id = %run_id,
            passed = report.passed_count(),
            failed = report.failed_count(),
            cancelled = report.cancelled_count(),
            success = report.success(),
            "run finished"
        );
        Ok(report)
    }
}

async fn run_job<E: StepExecutor + ?Sized>(executor: &E, plan: JobPlan, cancel: &AtomicBool) -> JobReport {
    let start = Instant::now();
    let label = plan.label();
    let mut report = JobReport {
        job_id: plan.job_id.clone(),
        label: label.clone(),
        cell_id: plan.cell.id(),
        status: JobStatus::Succeeded,
        continue_on_error: plan.continue_on_error,
        steps: Vec::with_capacity(plan.steps.len()),
        duration_ms: 0,
    };

    if cancel.load(Ordering::SeqCst) {
        info!(job = %label, "cancelled before start");
        report.status = JobStatus::Cancelled;
        return report;
    }
    if plan.enabled == Some(false) {
        info!(job = %label, "job condition is false; skipping");
        report.status = JobStatus::Skipped;
        return report;
    }

    info!(job = %label, "starting job");
    let mut failed = false;
    let mut cancelled = false;

    for step in &plan.steps {
        if failed && !runs_always(step) {
            report.steps.push(StepReport::skipped(&step.name, "a previous step failed"));
            continue;
        }
        if !failed && cancel.load(Ordering::SeqCst) {
            cancelled = true;
            report.steps.push(StepReport::skipped(&step.name, "run cancelled"));
            continue;
        }
        if !step.should_run() {
            report.steps.push(StepReport::skipped(&step.name, "condition is false"));
            continue;
        }

        let (shell, script) = match &step.action {
            StepAction::Action { uses, .. } => {
                info!(job = %label, step = %step.name, action = %uses, "skipping action step");
                report.steps.push(StepReport::skipped(&step.name, "actions are not run locally"));
                continue;
            }
            StepAction::Script { shell, script, .. } => (shell.clone(), script.clone()),
        };

        let script_step = ScriptStep {
            name: step.name.clone(),
            shell,
            script,
            env: step.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            working_directory: step.working_directory.as_ref().map(PathBuf::from),
            timeout: Duration::from_secs(step.timeout_minutes.saturating_mul(60)),
        };

        info!(job = %label, step = %step.name, "executing step");
        let step_report = execute_step(executor, &script_step, step.continue_on_error).await;
        if step_report.failed() {
            if step_report.tolerated {
                warn!(job = %label, step = %step.name, "step failed; continuing");
            } else {
                warn!(job = %label, step = %step.name, exit_code = ?step_report.exit_code, "step failed");
                failed = true;
            }
        }
        report.steps.push(step_report);
    }

    report.status = if failed {
        JobStatus::Failed
    } else if cancelled {
        JobStatus::Cancelled
    } else {
        JobStatus::Succeeded
    };
    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(job = %label, status = ?report.status, duration_ms = report.duration_ms, "job finished");
    report
}

fn runs_always(step: &PlannedStep) -> bool {
    step.condition.as_deref().is_some_and(|c| c.contains("always()"))
}

async fn execute_step<E: StepExecutor + ?Sized>(
    executor: &E,
    step: &ScriptStep,
    continue_on_error: bool,
) -> StepReport {
    let start = Instant::now();
    match executor.execute(step).await {
        Ok(output) => {
            let status = if output.timed_out {
                StepStatus::TimedOut
            } else if output.exit_code == 0 {
                StepStatus::Succeeded
            } else {
                StepStatus::Failed
            };
            StepReport {
                name: step.name.clone(),
                status,
                exit_code: (!output.timed_out).then_some(output.exit_code),
                duration_ms: start.elapsed().as_millis() as u64,
                stdout: output.stdout,
                stderr: output.stderr,
                reason: None,
                tolerated: status != StepStatus::Succeeded && continue_on_error,
            }
        }
        Err(e) => StepReport {
            name: step.name.clone(),
            status: StepStatus::Failed,
            exit_code: None,
            duration_ms: start.elapsed().as_millis() as u64,
            stdout: String::new(),
            stderr: e.to_string(),
            reason: Some(e.to_string()),
            tolerated: continue_on_error,
        },
    }
}
