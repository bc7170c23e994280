//! POD registration.
//!
//! The framework registers every diagnostic once at startup by reading the
//! descriptor in each POD directory. A descriptor that fails to parse or has
//! validation errors is rejected and reported; it never partially registers.

use crate::descriptor::{PodDescriptor, DESCRIPTOR_FILE};
use crate::error::{PodError, Result};
use crate::obs;
use crate::validate::{validate, ValidationReport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A registered, validated POD.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredPod {
    pub name: String,
    pub dir: PathBuf,
    pub descriptor: PodDescriptor,
    pub digest: String,
    /// Warnings found at registration (errors prevent registration).
    pub report: ValidationReport,
}

/// A POD directory that could not be registered.
#[derive(Debug, Clone, Serialize)]
pub struct Rejected {
    pub name: String,
    pub dir: PathBuf,
    pub reasons: Vec<String>,
}

/// Registered PODs by name.
#[derive(Debug, Default)]
pub struct PodRegistry {
    pods: BTreeMap<String, RegisteredPod>,
    rejected: Vec<Rejected>,
}

impl PodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every sub-directory of `root` that contains a descriptor.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut registry = Self::new();

        let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
            .map_err(|source| PodError::Read {
                path: root.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(DESCRIPTOR_FILE).is_file())
            .collect();
        dirs.sort();

        for dir in dirs {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            match registry.register(&name, &dir) {
                Ok(_) | Err(PodError::AlreadyRegistered(_)) | Err(PodError::Rejected { .. }) => {}
                Err(e) => registry.reject(&name, &dir, vec![e.to_string()]),
            }
        }

        Ok(registry)
    }

    /// Register one POD directory under `name`.
    ///
    /// Validation errors reject the POD; the returned error summarizes them.
    pub fn register(&mut self, name: &str, dir: &Path) -> Result<&RegisteredPod> {
        if self.pods.contains_key(name) {
            return Err(PodError::AlreadyRegistered(name.to_string()));
        }

        let descriptor = PodDescriptor::load(dir)?;
        let report = validate(&descriptor);
        if !report.is_valid() {
            let reasons: Vec<String> = report.errors().map(ToString::to_string).collect();
            let errors = reasons.len();
            self.reject(name, dir, reasons);
            return Err(PodError::Rejected {
                pod: name.to_string(),
                errors,
            });
        }

        let digest = descriptor.digest()?;
        obs::emit_pod_registered(name, &digest, report.warnings().count());

        let pod = RegisteredPod {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            descriptor,
            digest,
            report,
        };
        Ok(self.pods.entry(name.to_string()).or_insert(pod))
    }

    fn reject(&mut self, name: &str, dir: &Path, reasons: Vec<String>) {
        debug!(pod = name, reasons = reasons.len(), "rejecting POD");
        obs::emit_pod_rejected(name, &reasons);
        self.rejected.push(Rejected {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            reasons,
        });
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredPod> {
        self.pods.get(name)
    }

    /// Registered PODs in name order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredPod> {
        self.pods.values()
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn rejected(&self) -> &[Rejected] {
        &self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const GOOD: &str = r#"{
      "settings": { "driver": "d.py", "long_name": "Good", "realm": "atmos",
                    "runtime_requirements": { "python3": ["numpy"] } },
      "data": { "frequency": "mon" },
      "dimensions": { "time": { "standard_name": "time" } },
      "varlist": { "tas": { "standard_name": "air_temperature", "units": "K", "dimensions": ["time"] } }
    }"#;

    fn write_pod(root: &Path, name: &str, body: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DESCRIPTOR_FILE), body).unwrap();
        dir
    }

    #[test]
    fn test_scan_registers_valid_and_rejects_invalid() {
        let root = tempdir().unwrap();
        write_pod(root.path(), "b_good", GOOD);
        write_pod(root.path(), "a_broken", "{ not json");
        write_pod(
            root.path(),
            "c_bad_dims",
            &GOOD.replace(r#""dimensions": ["time"]"#, r#""dimensions": ["time", "plev"]"#),
        );
        std::fs::create_dir(root.path().join("not_a_pod")).unwrap();

        let registry = PodRegistry::scan(root.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("b_good").is_some());

        let rejected: Vec<&str> = registry.rejected().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(rejected, vec!["a_broken", "c_bad_dims"]);
        assert!(registry.rejected()[1].reasons[0].contains("plev"));
    }

    #[test]
    fn test_register_once() {
        let root = tempdir().unwrap();
        let dir = write_pod(root.path(), "good", GOOD);

        let mut registry = PodRegistry::new();
        let digest = registry.register("good", &dir).unwrap().digest.clone();
        assert_eq!(digest.len(), 64);

        let err = registry.register("good", &dir).unwrap_err();
        assert!(matches!(err, PodError::AlreadyRegistered(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_scan_missing_root() {
        assert!(PodRegistry::scan("/nonexistent/diagnostics").is_err());
    }
}
