//! Structural validation of POD descriptors.
//!
//! Parsing already guarantees unique keys and well-typed fields. This module
//! checks the cross-references and value constraints the framework relies on:
//! - variable dimensions resolve to declared dimensions
//! - standard names and units are non-empty
//! - `<p>_min`/`<p>_max` settings are ordered numbers, latitudes in range
//! - `<p>_start`/`<p>_end` settings are ordered years or dates
//! - alternates point at other declared variables
//! - the driver's program has a declared runtime environment

use crate::descriptor::PodDescriptor;
use crate::driver::Program;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Stable classification of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UndeclaredDimension,
    EmptyStandardName,
    EmptyUnits,
    MissingSetting,
    EmptyRuntime,
    EmptyLibraryName,
    DuplicateLibrary,
    NotANumber,
    InvalidRange,
    OutOfBounds,
    InvalidDate,
    EmptyCoordinateAlias,
    UnknownAlternate,
    SelfAlternate,
    TimelessSubMonthly,
    UnknownProgram,
    UndeclaredRuntime,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    /// Dotted path into the descriptor, e.g. `varlist.zos.dimensions`.
    pub location: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", level, self.location, self.message)
    }
}

/// All findings for one descriptor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    fn push(&mut self, severity: Severity, kind: IssueKind, location: String, message: String) {
        self.issues.push(Issue {
            severity,
            kind,
            location,
            message,
        });
    }

    fn error(&mut self, kind: IssueKind, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, kind, location.into(), message.into());
    }

    fn warn(&mut self, kind: IssueKind, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, kind, location.into(), message.into());
    }
}

/// Validate a descriptor.
pub fn validate(pod: &PodDescriptor) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_settings(pod, &mut report);
    check_runtime(pod, &mut report);
    check_dimensions(pod, &mut report);
    check_varlist(pod, &mut report);
    check_numeric_ranges(pod, &mut report);
    check_date_ranges(pod, &mut report);
    check_coordinate_aliases(pod, &mut report);

    tracing::debug!(
        errors = report.errors().count(),
        warnings = report.warnings().count(),
        "descriptor validated"
    );
    report
}

fn check_settings(pod: &PodDescriptor, report: &mut ValidationReport) {
    let settings = &pod.settings;
    if settings.long_name.trim().is_empty() {
        report.error(IssueKind::MissingSetting, "settings.long_name", "long_name is empty");
    }
    if settings.realm.names().iter().all(|r| r.trim().is_empty()) {
        report.error(IssueKind::MissingSetting, "settings.realm", "realm is empty");
    }
    if settings.driver.trim().is_empty() {
        report.warn(
            IssueKind::MissingSetting,
            "settings.driver",
            "no driver named; the framework will look for <pod>.py/.ncl or driver.py/.ncl",
        );
    }
}

fn check_runtime(pod: &PodDescriptor, report: &mut ValidationReport) {
    let requirements = &pod.settings.runtime_requirements;
    if requirements.is_empty() {
        report.error(
            IssueKind::EmptyRuntime,
            "settings.runtime_requirements",
            "no runtime environment declared",
        );
    }

    for (env, libraries) in requirements {
        let location = format!("settings.runtime_requirements.{}", env);
        let mut seen = HashSet::new();
        for library in libraries {
            if library.trim().is_empty() {
                report.error(IssueKind::EmptyLibraryName, &location, "empty library name");
            } else if !seen.insert(library.as_str()) {
                report.warn(
                    IssueKind::DuplicateLibrary,
                    &location,
                    format!("library {} listed more than once", library),
                );
            }
        }
    }

    let driver = pod.settings.driver.trim();
    if driver.is_empty() {
        return;
    }
    match Program::from_driver(Path::new(driver)) {
        Ok(program) => {
            let declared = program
                .runtime_names()
                .iter()
                .any(|name| requirements.contains_key(*name));
            if !declared && !requirements.is_empty() {
                report.warn(
                    IssueKind::UndeclaredRuntime,
                    "settings.runtime_requirements",
                    format!(
                        "driver {} runs under {} but no {} environment is declared",
                        driver,
                        program.executable(),
                        program.runtime_names().join("/")
                    ),
                );
            }
        }
        Err(e) => report.error(IssueKind::UnknownProgram, "settings.driver", e.to_string()),
    }
}

fn check_dimensions(pod: &PodDescriptor, report: &mut ValidationReport) {
    for (name, dim) in &pod.dimensions {
        if dim.standard_name.trim().is_empty() {
            report.error(
                IssueKind::EmptyStandardName,
                format!("dimensions.{}.standard_name", name),
                "standard_name is empty",
            );
        }
    }
}

fn check_varlist(pod: &PodDescriptor, report: &mut ValidationReport) {
    for (name, var) in &pod.varlist {
        if var.standard_name.trim().is_empty() {
            report.error(
                IssueKind::EmptyStandardName,
                format!("varlist.{}.standard_name", name),
                "standard_name is empty",
            );
        }
        if var.units.trim().is_empty() {
            report.error(
                IssueKind::EmptyUnits,
                format!("varlist.{}.units", name),
                "units is empty",
            );
        }

        for dim in &var.dimensions {
            if !pod.dimensions.contains_key(dim) {
                report.error(
                    IssueKind::UndeclaredDimension,
                    format!("varlist.{}.dimensions", name),
                    format!("dimension {} is not declared under dimensions", dim),
                );
            }
        }

        for alt in &var.alternates {
            if alt == name {
                report.error(
                    IssueKind::SelfAlternate,
                    format!("varlist.{}.alternates", name),
                    "a variable cannot be its own alternate",
                );
            } else if !pod.varlist.contains_key(alt) {
                report.error(
                    IssueKind::UnknownAlternate,
                    format!("varlist.{}.alternates", name),
                    format!("alternate {} is not in the varlist", alt),
                );
            }
        }

        let frequency = pod.frequency_of(var);
        let has_time = var
            .dimensions
            .iter()
            .any(|d| d == "time" || pod.dimensions.get(d).is_some_and(|dim| dim.standard_name == "time"));
        if frequency.is_sub_monthly() && !has_time {
            report.warn(
                IssueKind::TimelessSubMonthly,
                format!("varlist.{}", name),
                format!("requested at {} but has no time dimension", frequency),
            );
        }
    }
}

fn check_numeric_ranges(pod: &PodDescriptor, report: &mut ValidationReport) {
    let vars = &pod.settings.pod_env_vars;
    for (key, min_raw) in vars {
        let Some(prefix) = key.strip_suffix("_min") else {
            continue;
        };
        let max_key = format!("{}_max", prefix);
        let Some(max_raw) = vars.get(&max_key) else {
            continue;
        };

        let location = format!("settings.pod_env_vars.{}", prefix);
        let parse = |raw: &str| raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()).ok_or(());
        let (min, max) = match (parse(min_raw), parse(max_raw)) {
            (Ok(min), Ok(max)) => (min, max),
            (min, _) => {
                let (bad_key, bad_value) = if min.is_err() {
                    (key.as_str(), min_raw)
                } else {
                    (max_key.as_str(), max_raw)
                };
                report.error(
                    IssueKind::NotANumber,
                    location,
                    format!("{} = '{}' is not a number", bad_key, bad_value),
                );
                continue;
            }
        };

        if min >= max {
            report.error(
                IssueKind::InvalidRange,
                &location,
                format!("{} ({}) must be less than {} ({})", key, min, max_key, max),
            );
        }

        let limit = if prefix.starts_with("lat") {
            Some(90.0)
        } else if prefix.starts_with("lon") {
            Some(360.0)
        } else {
            None
        };
        if let Some(limit) = limit {
            for (k, v) in [(key.as_str(), min), (max_key.as_str(), max)] {
                if !(-limit..=limit).contains(&v) {
                    report.error(
                        IssueKind::OutOfBounds,
                        &location,
                        format!("{} = {} is outside [-{}, {}]", k, v, limit, limit),
                    );
                }
            }
        }
    }
}

fn check_date_ranges(pod: &PodDescriptor, report: &mut ValidationReport) {
    let vars = &pod.settings.pod_env_vars;
    let mut pairs: Vec<(String, String)> = vars
        .keys()
        .filter_map(|k| {
            k.strip_suffix("_start")
                .map(|prefix| (k.clone(), format!("{}_end", prefix)))
        })
        .collect();
    pairs.push(("FIRSTYR".to_string(), "LASTYR".to_string()));

    for (start_key, end_key) in pairs {
        let (Some(start_raw), Some(end_raw)) = (vars.get(&start_key), vars.get(&end_key)) else {
            continue;
        };
        let location = format!("settings.pod_env_vars.{}", start_key);
        match (parse_date_bound(start_raw), parse_date_bound(end_raw)) {
            (Some(start), Some(end)) => {
                if start > end {
                    report.error(
                        IssueKind::InvalidRange,
                        location,
                        format!("{} ({}) is after {} ({})", start_key, start_raw, end_key, end_raw),
                    );
                }
            }
            // neither side looks like a date: not a date range
            (None, None) => {}
            (start, _) => {
                let (bad_key, bad_value) = if start.is_none() {
                    (&start_key, start_raw)
                } else {
                    (&end_key, end_raw)
                };
                report.error(
                    IssueKind::InvalidDate,
                    location,
                    format!("{} = '{}' is not a year or date", bad_key, bad_value),
                );
            }
        }
    }
}

/// Parse `YYYY`, `YYYY-MM-DD` or `YYYYMMDD`.
pub fn parse_date_bound(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = raw.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

fn check_coordinate_aliases(pod: &PodDescriptor, report: &mut ValidationReport) {
    for (key, value) in &pod.settings.pod_env_vars {
        let is_alias = key.ends_with("_coord_name") || key.ends_with("_coord");
        if is_alias && value.trim().is_empty() {
            report.error(
                IssueKind::EmptyCoordinateAlias,
                format!("settings.pod_env_vars.{}", key),
                "coordinate name alias is empty",
            );
        }
    }
}
