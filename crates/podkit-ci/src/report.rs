//! Results of a local workflow run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

/// Result of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,

    /// Exit code, when a process ran to completion.
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,

    /// Why the step was skipped or could not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Failure tolerated by `continue-on-error`.
    pub tolerated: bool,
}

impl StepReport {
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            reason: Some(reason.into()),
            tolerated: false,
        }
    }

    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, StepStatus::Failed | StepStatus::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    /// Not started, or stopped early, because another cell failed
    Cancelled,
    /// Job-level `if` was false
    Skipped,
}

/// Result of one matrix cell.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub label: String,
    pub cell_id: String,
    pub status: JobStatus,
    pub continue_on_error: bool,
    pub steps: Vec<StepReport>,
    pub duration_ms: u64,
}

impl JobReport {
    /// A failure that is not covered by `continue-on-error`.
    pub fn blocks_run(&self) -> bool {
        self.status == JobStatus::Failed && !self.continue_on_error
    }

    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.failed() && !s.tolerated)
    }
}

/// Result of a complete local run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub job_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Cells in expansion order.
    pub jobs: Vec<JobReport>,
}

impl RunReport {
    /// No cell failed outside `continue-on-error`, and none was cancelled.
    pub fn success(&self) -> bool {
        !self
            .jobs
            .iter()
            .any(|j| j.blocks_run() || j.status == JobStatus::Cancelled)
    }

    /// Number of cells that passed.
    pub fn passed_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status == JobStatus::Succeeded).count()
    }

    /// Number of cells that failed.
    pub fn failed_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status == JobStatus::Failed).count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status == JobStatus::Cancelled).count()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus, continue_on_error: bool) -> JobReport {
        JobReport {
            job_id: "build".to_string(),
            label: "build".to_string(),
            cell_id: "000000000000".to_string(),
            status,
            continue_on_error,
            steps: vec![],
            duration_ms: 10,
        }
    }

    fn run(jobs: Vec<JobReport>) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            workflow: "MDTF_test".to_string(),
            job_id: "build".to_string(),
            dry_run: false,
            started_at: now,
            finished_at: now,
            jobs,
        }
    }

    #[test]
    fn test_tolerated_failure_does_not_fail_run() {
        let report = run(vec![job(JobStatus::Succeeded, false), job(JobStatus::Failed, true)]);
        assert!(report.success());
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_blocking_failure_fails_run() {
        let report = run(vec![job(JobStatus::Failed, false), job(JobStatus::Cancelled, false)]);
        assert!(!report.success());
        assert_eq!(report.cancelled_count(), 1);
    }

    #[test]
    fn test_skipped_step() {
        let step = StepReport::skipped("Run actions/checkout@v3", "actions are not run locally");
        assert!(!step.passed());
        assert!(!step.failed());
        assert_eq!(step.reason.as_deref(), Some("actions are not run locally"));
    }
}
