//! podkit-ci: test-suite workflows for diagnostic PODs
//!
//! Loads hosted-CI workflow files and provides:
//! - strategy matrix expansion and exclusion audits ([`matrix`])
//! - `${{ }}` substitution and simple `if` evaluation ([`expr`])
//! - static analysis of step scripts: fetches, extractions, driver calls ([`script`])
//! - per-cell job plans ([`plan`]) and a local runner ([`runner`])

pub mod error;
pub mod expr;
pub mod matrix;
pub mod plan;
pub mod report;
pub mod runner;
pub mod script;
pub mod workflow;

pub use error::{CiError, Result};
pub use matrix::{Cell, CellOrigin, Combination, Finding, FindingKind, Matrix, MatrixAudit, MatrixValue};
pub use plan::{plan_job, JobPlan, PlannedStep, StepAction};
pub use report::{JobReport, JobStatus, RunReport, StepReport, StepStatus};
pub use runner::{DryRunExecutor, ScriptStep, ShellExecutor, StepExecutor, StepOutput, WorkflowRunner};
pub use script::{analyze_script, Extraction, FetchSpec, FetchTool, Invocation, InvocationKind, ScriptAnalysis};
pub use workflow::{Job, Step, Strategy, Triggers, Workflow};
