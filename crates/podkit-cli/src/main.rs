//! podkit - diagnostic POD and test-workflow toolkit
//!
//! The `podkit` command checks POD descriptors before the framework sees
//! them, and inspects or locally runs the CI workflow that exercises them.
//!
//! ## Commands
//!
//! - `pod`: validate, summarize, export settings, preflight against a case
//! - `registry`: register every POD under a diagnostics directory
//! - `matrix`: expand and audit workflow strategy matrices
//! - `ci`: plan or run one workflow job locally

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use podkit_ci::{
    plan_job, DryRunExecutor, JobPlan, RunReport, ShellExecutor, StepAction, StepStatus, Workflow,
    WorkflowRunner,
};
use podkit_core::descriptor::pod_name_from_path;
use podkit_core::obs::{self, PodSpan};
use podkit_core::{
    check_input_files, resolve_driver, runtime_environments, validate, CaseConfig, EnvNaming,
    EnvVars, InputStatus, NameMap, PodDescriptor, PodRegistry, RuntimeEnvironment,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "podkit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Diagnostic POD descriptor and test-workflow toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "PODKIT_LOG_JSON")]
    json: bool,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect a single POD
    Pod {
        #[command(subcommand)]
        action: PodAction,
    },

    /// Register every POD under a diagnostics directory
    Registry {
        /// Directory whose sub-directories hold settings.jsonc files
        dir: PathBuf,
    },

    /// Expand or audit workflow strategy matrices
    Matrix {
        #[command(subcommand)]
        action: MatrixAction,
    },

    /// Plan or run a workflow job locally
    Ci {
        #[command(subcommand)]
        action: CiAction,
    },
}

#[derive(Subcommand)]
enum PodAction {
    /// Validate a descriptor (file or POD directory)
    Validate { path: PathBuf },

    /// Print the registration summary
    Show { path: PathBuf },

    /// Print the environment injected into the driver
    Env {
        path: PathBuf,

        /// Case configuration whose case and settings are layered on top
        #[arg(long)]
        case: Option<PathBuf>,

        /// Case to use (default: first in case_list)
        #[arg(long)]
        case_name: Option<String>,
    },

    /// Check the driver and input files before a run
    Preflight {
        /// POD directory
        pod_dir: PathBuf,

        /// Case configuration (YAML)
        #[arg(long)]
        case: PathBuf,

        /// Root of the model data tree
        #[arg(long)]
        datadir: PathBuf,

        /// Case to check (default: every case)
        #[arg(long)]
        case_name: Option<String>,
    },
}

#[derive(Subcommand)]
enum MatrixAction {
    /// List the cells each job runs as
    Expand {
        workflow: PathBuf,

        /// Job id (default: every job)
        #[arg(long)]
        job: Option<String>,
    },

    /// Report dead, redundant and leaking exclusion rules
    Audit {
        workflow: PathBuf,

        /// Job id (default: every job)
        #[arg(long)]
        job: Option<String>,
    },
}

#[derive(Subcommand)]
enum CiAction {
    /// Show the ordered steps, fetches and driver calls per cell
    Plan {
        workflow: PathBuf,

        #[arg(long)]
        job: String,
    },

    /// Run a job's script steps for every cell
    Run {
        workflow: PathBuf,

        #[arg(long)]
        job: String,

        /// Record the steps instead of executing them
        #[arg(long)]
        dry_run: bool,

        /// Override the job's max-parallel
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Working directory for scripts (default: current directory)
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    podkit_core::telemetry::init_tracing(cli.json, level);

    let format = cli.format;
    match cli.command {
        Commands::Pod { action } => match action {
            PodAction::Validate { path } => cmd_pod_validate(&path, format),
            PodAction::Show { path } => cmd_pod_show(&path, format),
            PodAction::Env {
                path,
                case,
                case_name,
            } => cmd_pod_env(&path, case.as_deref(), case_name.as_deref(), format),
            PodAction::Preflight {
                pod_dir,
                case,
                datadir,
                case_name,
            } => cmd_pod_preflight(&pod_dir, &case, &datadir, case_name.as_deref(), format),
        },
        Commands::Registry { dir } => cmd_registry(&dir, format),
        Commands::Matrix { action } => match action {
            MatrixAction::Expand { workflow, job } => cmd_matrix_expand(&workflow, job.as_deref(), format),
            MatrixAction::Audit { workflow, job } => cmd_matrix_audit(&workflow, job.as_deref(), format),
        },
        Commands::Ci { action } => match action {
            CiAction::Plan { workflow, job } => cmd_ci_plan(&workflow, &job, format),
            CiAction::Run {
                workflow,
                job,
                dry_run,
                max_parallel,
                workdir,
            } => cmd_ci_run(&workflow, &job, dry_run, max_parallel, &workdir, format).await,
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn pod_name(path: &Path) -> String {
    pod_name_from_path(path).unwrap_or_else(|| "pod".to_string())
}

fn load_pod(path: &Path) -> Result<PodDescriptor> {
    PodDescriptor::load(path).with_context(|| format!("Failed to load descriptor from {:?}", path))
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    Workflow::load(path).with_context(|| format!("Failed to load workflow {:?}", path))
}

/// Validate a descriptor
fn cmd_pod_validate(path: &Path, format: OutputFormat) -> Result<()> {
    let name = pod_name(path);
    let _span = PodSpan::enter(&name);
    let pod = load_pod(path)?;
    let report = validate(&pod);
    let errors = report.errors().count();
    obs::emit_validation_finished(&name, errors, report.warnings().count());

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            for issue in &report.issues {
                println!("{}", issue);
            }
            if report.is_valid() {
                println!("✓ {} is valid", name);
            }
        }
    }

    if errors > 0 {
        anyhow::bail!("{} has {} validation error(s)", name, errors);
    }
    Ok(())
}

#[derive(Serialize)]
struct PodSummary<'a> {
    name: String,
    long_name: &'a str,
    realm: Vec<&'a str>,
    driver: &'a str,
    frequency: String,
    variables: Vec<VariableSummary<'a>>,
    runtime: Vec<RuntimeEnvironment>,
    digest: String,
    warnings: usize,
}

#[derive(Serialize)]
struct VariableSummary<'a> {
    name: &'a str,
    standard_name: &'a str,
    units: &'a str,
    frequency: String,
    required: bool,
    alternates: &'a [String],
}

/// Print the registration summary
fn cmd_pod_show(path: &Path, format: OutputFormat) -> Result<()> {
    let name = pod_name(path);
    let pod = load_pod(path)?;
    let report = validate(&pod);
    if !report.is_valid() {
        for issue in report.errors() {
            eprintln!("{}", issue);
        }
        anyhow::bail!("{} would be rejected at registration", name);
    }

    let summary = PodSummary {
        long_name: &pod.settings.long_name,
        realm: pod.settings.realm.names(),
        driver: &pod.settings.driver,
        frequency: pod.data.frequency.to_string(),
        variables: pod
            .varlist
            .iter()
            .map(|(var_name, var)| VariableSummary {
                name: var_name,
                standard_name: &var.standard_name,
                units: &var.units,
                frequency: pod.frequency_of(var).to_string(),
                required: var.is_required(),
                alternates: &var.alternates,
            })
            .collect(),
        runtime: runtime_environments(&pod, &name, EnvNaming::PerPod),
        digest: pod.digest()?,
        warnings: report.warnings().count(),
        name,
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => {
            println!("POD:        {}", summary.name);
            println!("Long name:  {}", summary.long_name);
            println!("Realm:      {}", summary.realm.join(", "));
            println!("Driver:     {}", summary.driver);
            println!("Frequency:  {}", summary.frequency);
            println!("Digest:     {}", summary.digest);
            println!();
            println!("Variables:");
            for var in &summary.variables {
                let requirement = if var.required { "required" } else { "optional" };
                print!(
                    "  {:<12} {} [{}] {} ({})",
                    var.name, var.standard_name, var.units, var.frequency, requirement
                );
                if !var.alternates.is_empty() {
                    print!(" alternates: {}", var.alternates.join(", "));
                }
                println!();
            }
            println!();
            println!("Runtime environments:");
            for env in &summary.runtime {
                println!(
                    "  {} ({}): {} [{}]",
                    env.name,
                    env.identifier,
                    env.libraries.join(", "),
                    env.short_digest()
                );
            }
            if summary.warnings > 0 {
                println!();
                println!("{} warning(s):", summary.warnings);
                for issue in report.warnings() {
                    println!("  {}", issue);
                }
            }
        }
    }
    Ok(())
}

/// Print the injected environment
fn cmd_pod_env(
    path: &Path,
    case_path: Option<&Path>,
    case_name: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let pod = load_pod(path)?;
    let mut env = EnvVars::from_descriptor(&pod);

    if let Some(case_path) = case_path {
        let config = CaseConfig::load(case_path)
            .with_context(|| format!("Failed to load case configuration {:?}", case_path))?;
        let case = match case_name {
            Some(wanted) => config
                .case(wanted)
                .with_context(|| format!("Case {} not found in {:?}", wanted, case_path))?,
            None => config.case_list.first().context("case_list is empty")?,
        };
        env.extend(config.settings.clone());
        env.extend(case.to_env());
    }

    match format {
        OutputFormat::Json => {
            let vars: serde_json::Map<String, serde_json::Value> = env
                .to_env()
                .into_iter()
                .map(|(key, value)| (key, serde_json::Value::String(value)))
                .collect();
            print_json(&vars)?;
        }
        OutputFormat::Text => {
            for (key, value) in env.iter() {
                println!("{}={}", key, value);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Preflight {
    pod: String,
    driver: Option<podkit_core::Driver>,
    driver_error: Option<String>,
    cases: Vec<CasePreflight>,
}

#[derive(Serialize)]
struct CasePreflight {
    case: String,
    inputs: podkit_core::InputCheck,
}

/// Check the driver and input files
fn cmd_pod_preflight(
    pod_dir: &Path,
    case_path: &Path,
    datadir: &Path,
    case_name: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let name = pod_name(pod_dir);
    let _span = PodSpan::enter(&name);
    let pod = load_pod(pod_dir)?;
    let config = CaseConfig::load(case_path)
        .with_context(|| format!("Failed to load case configuration {:?}", case_path))?;

    if !config.pod_list.is_empty() && !config.runs_pod(&name) {
        info!(pod = %name, "POD is not in the case configuration's pod_list");
    }

    let (driver, driver_error) = match resolve_driver(pod_dir, &name, &pod.settings.driver) {
        Ok(driver) => (Some(driver), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let names = NameMap::from_settings(&config.settings, &pod);
    let cases: Vec<CasePreflight> = config
        .case_list
        .iter()
        .filter(|c| case_name.map_or(true, |wanted| c.casename == wanted))
        .map(|case| {
            let inputs = check_input_files(&pod, case, datadir, &names);
            let missing = inputs.missing_required().count();
            obs::emit_inputs_checked(&name, &case.casename, inputs.entries.len() - missing, missing);
            CasePreflight {
                case: case.casename.clone(),
                inputs,
            }
        })
        .collect();
    if cases.is_empty() {
        anyhow::bail!("No case named {} in {:?}", case_name.unwrap_or_default(), case_path);
    }

    let preflight = Preflight {
        pod: name,
        driver,
        driver_error,
        cases,
    };

    match format {
        OutputFormat::Json => print_json(&preflight)?,
        OutputFormat::Text => {
            match (&preflight.driver, &preflight.driver_error) {
                (Some(driver), _) => println!("✓ driver: {}", driver.command().join(" ")),
                (None, Some(error)) => println!("✗ driver: {}", error),
                (None, None) => {}
            }
            for case in &preflight.cases {
                println!();
                println!("Case {}:", case.case);
                for entry in &case.inputs.entries {
                    let line = match &entry.status {
                        InputStatus::Found { path } => format!("✓ {} {}", entry.variable, path.display()),
                        InputStatus::Substituted { alternate, path } => format!(
                            "✓ {} via {} {}",
                            entry.variable,
                            alternate,
                            path.display()
                        ),
                        InputStatus::MissingOptional { path } => {
                            format!("- {} (optional) {}", entry.variable, path.display())
                        }
                        InputStatus::MissingRequired { tried } => format!(
                            "✗ {} missing; tried {}",
                            entry.variable,
                            tried
                                .iter()
                                .map(|p| p.display().to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    };
                    println!("  {}", line);
                }
            }
        }
    }

    let unsatisfied: Vec<&str> = preflight
        .cases
        .iter()
        .filter(|c| !c.inputs.is_satisfied())
        .map(|c| c.case.as_str())
        .collect();
    if preflight.driver.is_none() || !unsatisfied.is_empty() {
        anyhow::bail!(
            "Preflight failed for {}{}",
            preflight.pod,
            if unsatisfied.is_empty() {
                String::new()
            } else {
                format!(" (missing inputs for {})", unsatisfied.join(", "))
            }
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct RegistryEntry<'a> {
    name: &'a str,
    long_name: &'a str,
    digest: &'a str,
    warnings: usize,
}

/// Register every POD under a directory
fn cmd_registry(dir: &Path, format: OutputFormat) -> Result<()> {
    let registry =
        PodRegistry::scan(dir).with_context(|| format!("Failed to scan diagnostics directory {:?}", dir))?;

    match format {
        OutputFormat::Json => {
            let registered: Vec<RegistryEntry> = registry
                .iter()
                .map(|pod| RegistryEntry {
                    name: &pod.name,
                    long_name: &pod.descriptor.settings.long_name,
                    digest: &pod.digest,
                    warnings: pod.report.warnings().count(),
                })
                .collect();
            print_json(&serde_json::json!({
                "registered": registered,
                "rejected": registry.rejected(),
            }))?;
        }
        OutputFormat::Text => {
            for pod in registry.iter() {
                println!(
                    "✓ {:<32} {}  {}",
                    pod.name,
                    &pod.digest[..12],
                    pod.descriptor.settings.long_name
                );
            }
            for rejected in registry.rejected() {
                println!("✗ {}", rejected.name);
                for reason in &rejected.reasons {
                    println!("    {}", reason);
                }
            }
            println!();
            println!(
                "Summary: {} registered, {} rejected",
                registry.len(),
                registry.rejected().len()
            );
        }
    }

    if !registry.rejected().is_empty() {
        anyhow::bail!("{} POD(s) rejected", registry.rejected().len());
    }
    Ok(())
}

fn selected_jobs<'a>(workflow: &'a Workflow, job: Option<&'a str>) -> Result<Vec<&'a str>> {
    match job {
        Some(id) => {
            workflow.job(id)?;
            Ok(vec![id])
        }
        None => Ok(workflow.jobs.keys().map(String::as_str).collect()),
    }
}

/// List matrix cells per job
fn cmd_matrix_expand(path: &Path, job: Option<&str>, format: OutputFormat) -> Result<()> {
    let workflow = load_workflow(path)?;
    let mut expanded = serde_json::Map::new();

    for id in selected_jobs(&workflow, job)? {
        let cells = workflow.job(id)?.cells();
        match format {
            OutputFormat::Json => {
                expanded.insert(id.to_string(), serde_json::to_value(&cells)?);
            }
            OutputFormat::Text => {
                println!("{}: {} cell(s)", id, cells.len());
                for cell in &cells {
                    println!("  [{}] {}", cell.id(), cell.label());
                }
            }
        }
    }

    if format == OutputFormat::Json {
        print_json(&expanded)?;
    }
    Ok(())
}

/// Audit matrix exclusion rules per job
fn cmd_matrix_audit(path: &Path, job: Option<&str>, format: OutputFormat) -> Result<()> {
    let workflow = load_workflow(path)?;
    let mut audits = serde_json::Map::new();
    let mut failing = Vec::new();

    for id in selected_jobs(&workflow, job)? {
        let audit = workflow.job(id)?.audit();
        if audit.has_errors() {
            failing.push(id);
        }
        match format {
            OutputFormat::Json => {
                audits.insert(id.to_string(), serde_json::to_value(&audit)?);
            }
            OutputFormat::Text => {
                if audit.is_clean() {
                    println!("✓ {}: matrix is clean", id);
                } else {
                    println!("{}:", id);
                    for finding in &audit.findings {
                        println!("  {}", finding);
                    }
                }
            }
        }
    }

    if format == OutputFormat::Json {
        print_json(&audits)?;
    }
    if !failing.is_empty() {
        anyhow::bail!("Matrix audit failed for {}", failing.join(", "));
    }
    Ok(())
}

fn render_plan(plan: &JobPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} [{}]\n", plan.label(), plan.cell.id()));
    out.push_str(&format!("  runs-on: {}\n", plan.runs_on.join(", ")));
    if plan.continue_on_error {
        out.push_str("  continue-on-error\n");
    }
    for step in &plan.steps {
        let marker = match (&step.action, step.should_run()) {
            (_, false) => "skip",
            (StepAction::Action { .. }, true) => "uses",
            (StepAction::Script { .. }, true) => "run ",
        };
        out.push_str(&format!("  {:>2}. {} {}\n", step.index + 1, marker, step.name));
        if let Some(analysis) = step.analysis() {
            for fetch in &analysis.fetches {
                let bound = match fetch.worst_case_secs() {
                    Some(secs) if fetch.is_bounded() => format!("bounded, worst case {}s", secs),
                    _ => "UNBOUNDED".to_string(),
                };
                out.push_str(&format!("        fetch {} ({})\n", fetch.url, bound));
            }
            for extraction in &analysis.extractions {
                out.push_str(&format!("        extract {}\n", extraction.archive));
            }
            for invocation in &analysis.invocations {
                out.push_str(&format!("        invoke {} {:?}\n", invocation.program, invocation.kind));
            }
        }
        for reference in &step.unresolved {
            out.push_str(&format!("        unresolved ${{{{ {} }}}}\n", reference));
        }
    }
    out
}

/// Show per-cell plans
fn cmd_ci_plan(path: &Path, job: &str, format: OutputFormat) -> Result<()> {
    let workflow = load_workflow(path)?;
    let plans = plan_job(&workflow, job)?;

    match format {
        OutputFormat::Json => print_json(&plans)?,
        OutputFormat::Text => {
            println!("{} / {}: {} cell(s)", workflow.display_name(), job, plans.len());
            for plan in &plans {
                println!();
                print!("{}", render_plan(plan));
            }
        }
    }
    Ok(())
}

fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run ID: {}\n", report.run_id));
    out.push_str(&format!(
        "Status: {}\n",
        if report.success() { "✓ PASSED" } else { "✗ FAILED" }
    ));
    out.push_str(&format!("Duration: {}ms\n\n", report.duration_ms()));

    for job in &report.jobs {
        out.push_str(&format!("  {:?} {} ({}ms)\n", job.status, job.label, job.duration_ms));
        for step in &job.steps {
            let status = match step.status {
                StepStatus::Succeeded => "✓",
                StepStatus::Failed | StepStatus::TimedOut if step.tolerated => "~",
                StepStatus::Failed | StepStatus::TimedOut => "✗",
                StepStatus::Skipped => "-",
            };
            out.push_str(&format!("    {} {}", status, step.name));
            if let Some(code) = step.exit_code.filter(|c| *c != 0) {
                out.push_str(&format!(" (exit code: {})", code));
            }
            if let Some(reason) = &step.reason {
                out.push_str(&format!(" ({})", reason));
            }
            out.push('\n');
        }
    }
    out.push_str(&format!(
        "\nSummary: {}/{} cells passed",
        report.passed_count(),
        report.jobs.len()
    ));
    out
}

/// Run a job locally
async fn cmd_ci_run(
    path: &Path,
    job_id: &str,
    dry_run: bool,
    max_parallel: Option<usize>,
    workdir: &Path,
    format: OutputFormat,
) -> Result<()> {
    let workflow = load_workflow(path)?;
    let job = workflow.job(job_id)?;
    let plans = plan_job(&workflow, job_id)?;
    let limit = max_parallel.or(job.max_parallel());

    let result = if dry_run {
        WorkflowRunner::new(DryRunExecutor::new())
            .max_parallel(limit)
            .fail_fast(job.fail_fast())
            .dry_run(true)
            .run(workflow.display_name(), job_id, plans)
            .await
    } else {
        WorkflowRunner::new(ShellExecutor::new(workdir))
            .max_parallel(limit)
            .fail_fast(job.fail_fast())
            .run(workflow.display_name(), job_id, plans)
            .await
    };
    let report = result.context("Workflow run failed to start")?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => println!("{}", render_report(&report)),
    }

    if report.success() {
        Ok(())
    } else {
        anyhow::bail!("{} failed", job_id)
    }
}
