//! Input-file discovery for a POD against one case.
//!
//! Model output is expected at `<datadir>/<freq>/<casename>.<var>.<freq>.nc`,
//! where `<var>` is the model's name for the varlist entry. A missing required
//! variable may be satisfied by any of its alternates; a missing optional one
//! is only a warning.

use crate::case::CaseSpec;
use crate::descriptor::{Frequency, PodDescriptor, VarSpec};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Translation from POD variable names to a model's variable names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap {
    names: HashMap<String, String>,
}

impl NameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pod_name: impl Into<String>, model_name: impl Into<String>) {
        self.names.insert(pod_name.into(), model_name.into());
    }

    /// Settings whose key is a varlist entry rename that variable.
    pub fn from_settings(settings: &IndexMap<String, String>, pod: &PodDescriptor) -> Self {
        let mut map = Self::new();
        for (key, value) in settings {
            if pod.varlist.contains_key(key) && !value.trim().is_empty() {
                map.insert(key.clone(), value.trim());
            }
        }
        map
    }

    /// Model name for a POD variable, the POD name itself when not renamed.
    pub fn translate<'a>(&'a self, pod_name: &'a str) -> &'a str {
        self.names.get(pod_name).map(String::as_str).unwrap_or(pod_name)
    }
}

/// Expected location of one variable's data file.
pub fn data_file_path(datadir: &Path, casename: &str, varname: &str, frequency: Frequency) -> PathBuf {
    let freq = frequency.as_str();
    datadir
        .join(freq)
        .join(format!("{}.{}.{}.nc", casename, varname, freq))
}

/// Outcome for one varlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InputStatus {
    Found { path: PathBuf },
    Substituted { alternate: String, path: PathBuf },
    MissingRequired { tried: Vec<PathBuf> },
    MissingOptional { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputEntry {
    pub variable: String,
    #[serde(flatten)]
    pub status: InputStatus,
}

/// Result of checking every varlist entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputCheck {
    pub entries: Vec<InputEntry>,
}

impl InputCheck {
    /// True when no required variable is missing.
    pub fn is_satisfied(&self) -> bool {
        self.missing_required().next().is_none()
    }

    pub fn missing_required(&self) -> impl Iterator<Item = &InputEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, InputStatus::MissingRequired { .. }))
    }

    pub fn status_of(&self, variable: &str) -> Option<&InputStatus> {
        self.entries
            .iter()
            .find(|e| e.variable == variable)
            .map(|e| &e.status)
    }
}

/// Check which input files of `pod` exist for `case` under `datadir`.
pub fn check_input_files(
    pod: &PodDescriptor,
    case: &CaseSpec,
    datadir: &Path,
    names: &NameMap,
) -> InputCheck {
    let mut check = InputCheck::default();

    for (name, var) in &pod.varlist {
        let path = expected_path(pod, case, datadir, names, name, var);
        let status = if path.is_file() {
            debug!(variable = %name, path = %path.display(), "found input");
            InputStatus::Found { path }
        } else if !var.is_required() {
            warn!(variable = %name, path = %path.display(), "optional input not found");
            InputStatus::MissingOptional { path }
        } else {
            resolve_alternates(pod, case, datadir, names, name, var, path)
        };
        check.entries.push(InputEntry {
            variable: name.clone(),
            status,
        });
    }

    check
}

fn expected_path(
    pod: &PodDescriptor,
    case: &CaseSpec,
    datadir: &Path,
    names: &NameMap,
    name: &str,
    var: &VarSpec,
) -> PathBuf {
    data_file_path(
        datadir,
        &case.casename,
        names.translate(name),
        pod.frequency_of(var),
    )
}

fn resolve_alternates(
    pod: &PodDescriptor,
    case: &CaseSpec,
    datadir: &Path,
    names: &NameMap,
    name: &str,
    var: &VarSpec,
    primary: PathBuf,
) -> InputStatus {
    if var.alternates.is_empty() {
        warn!(variable = %name, path = %primary.display(), "required input not found, no alternates");
        return InputStatus::MissingRequired {
            tried: vec![primary],
        };
    }

    info!(variable = %name, alternates = ?var.alternates, "required input not found, trying alternates");
    let mut tried = vec![primary];
    for alternate in &var.alternates {
        let Some(alt_var) = pod.varlist.get(alternate) else {
            warn!(variable = %name, alternate = %alternate, "alternate not in varlist");
            continue;
        };
        let path = expected_path(pod, case, datadir, names, alternate, alt_var);
        if path.is_file() {
            info!(variable = %name, alternate = %alternate, "substituting alternate");
            return InputStatus::Substituted {
                alternate: alternate.clone(),
                path,
            };
        }
        tried.push(path);
    }

    warn!(variable = %name, tried = tried.len(), "required input and all alternates missing");
    InputStatus::MissingRequired { tried }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pod() -> PodDescriptor {
        PodDescriptor::from_jsonc(
            r#"{
              "settings": { "driver": "p.py" },
              "data": { "frequency": "mon" },
              "dimensions": { "time": { "standard_name": "time" } },
              "varlist": {
                "tauuo": { "standard_name": "x_stress", "units": "N m-2", "dimensions": ["time"], "alternates": ["tauu"] },
                "tauu": { "standard_name": "x_stress", "units": "N m-2", "dimensions": ["time"], "requirement": "optional" },
                "zos": { "standard_name": "ssh", "units": "m", "dimensions": ["time"] },
                "pr": { "standard_name": "pr", "units": "kg m-2 s-1", "dimensions": ["time"], "frequency": "day" }
              }
            }"#,
        )
        .unwrap()
    }

    fn case() -> CaseSpec {
        CaseSpec {
            casename: "CASE".to_string(),
            model: "CESM".to_string(),
            convention: None,
            firstyr: "2000".to_string(),
            lastyr: "2001".to_string(),
        }
    }

    fn touch(datadir: &Path, var: &str, freq: Frequency) {
        let path = data_file_path(datadir, "CASE", var, freq);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_data_file_path_layout() {
        let path = data_file_path(Path::new("/data"), "CASE", "zos", Frequency::Monthly);
        assert_eq!(path, PathBuf::from("/data/mon/CASE.zos.mon.nc"));
    }

    #[test]
    fn test_all_found() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "tauuo", Frequency::Monthly);
        touch(dir.path(), "tauu", Frequency::Monthly);
        touch(dir.path(), "zos", Frequency::Monthly);
        touch(dir.path(), "pr", Frequency::Daily);

        let check = check_input_files(&pod(), &case(), dir.path(), &NameMap::new());
        assert!(check.is_satisfied());
        assert!(matches!(check.status_of("pr"), Some(InputStatus::Found { .. })));
    }

    #[test]
    fn test_alternate_substitution() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "tauu", Frequency::Monthly);
        touch(dir.path(), "zos", Frequency::Monthly);
        touch(dir.path(), "pr", Frequency::Daily);

        let check = check_input_files(&pod(), &case(), dir.path(), &NameMap::new());
        assert!(check.is_satisfied());
        match check.status_of("tauuo") {
            Some(InputStatus::Substituted { alternate, .. }) => assert_eq!(alternate, "tauu"),
            other => panic!("expected substitution, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_and_optional() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "pr", Frequency::Daily);

        let check = check_input_files(&pod(), &case(), dir.path(), &NameMap::new());
        assert!(!check.is_satisfied());
        let missing: Vec<&str> = check.missing_required().map(|e| e.variable.as_str()).collect();
        assert_eq!(missing, vec!["tauuo", "zos"]);
        match check.status_of("tauuo") {
            Some(InputStatus::MissingRequired { tried }) => assert_eq!(tried.len(), 2),
            other => panic!("expected missing, got {:?}", other),
        }
        assert!(matches!(check.status_of("tauu"), Some(InputStatus::MissingOptional { .. })));
    }

    #[test]
    fn test_model_names_are_used_for_paths() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "SSH", Frequency::Monthly);

        let mut settings = IndexMap::new();
        settings.insert("zos".to_string(), "SSH".to_string());
        settings.insert("DATADIR".to_string(), "/elsewhere".to_string());
        let names = NameMap::from_settings(&settings, &pod());
        assert_eq!(names.translate("zos"), "SSH");
        assert_eq!(names.translate("DATADIR"), "DATADIR");

        let check = check_input_files(&pod(), &case(), dir.path(), &names);
        assert!(matches!(check.status_of("zos"), Some(InputStatus::Found { .. })));
    }
}
