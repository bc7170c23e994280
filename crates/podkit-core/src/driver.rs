//! Driver script resolution.
//!
//! A POD names its driver in `settings.driver`. When it does not, the framework
//! looks for `<pod>.<ext>` and then `driver.<ext>` in the POD directory. The
//! program that runs the driver follows from the file extension.

use crate::error::{PodError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Interpreter a driver script runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    Python,
    Ncl,
}

impl Program {
    /// Known driver extensions, in discovery order.
    pub const EXTENSIONS: [(&'static str, Program); 2] = [("py", Program::Python), ("ncl", Program::Ncl)];

    pub fn from_extension(extension: &str) -> Result<Self> {
        Self::EXTENSIONS
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, program)| *program)
            .ok_or_else(|| PodError::UnknownProgram {
                extension: extension.to_string(),
                known: Self::EXTENSIONS
                    .iter()
                    .map(|(ext, _)| *ext)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn from_driver(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_extension(&extension)
    }

    /// Executable invoked with the driver path as its argument.
    pub fn executable(&self) -> &'static str {
        match self {
            Program::Python => "python3",
            Program::Ncl => "ncl",
        }
    }

    /// `runtime_requirements` keys that provide this program.
    pub fn runtime_names(&self) -> &'static [&'static str] {
        match self {
            Program::Python => &["python3", "python"],
            Program::Ncl => &["ncl"],
        }
    }
}

/// A resolved driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Driver {
    pub path: PathBuf,
    pub program: Program,
    /// True when the descriptor named no driver and it was found by convention.
    pub discovered: bool,
}

impl Driver {
    /// Command line that runs the driver.
    pub fn command(&self) -> Vec<String> {
        vec![
            self.program.executable().to_string(),
            self.path.to_string_lossy().into_owned(),
        ]
    }
}

/// Locate the driver for a POD.
///
/// `declared` is `settings.driver`; an empty value triggers discovery.
pub fn resolve_driver(pod_dir: &Path, pod_name: &str, declared: &str) -> Result<Driver> {
    let declared = declared.trim();
    if !declared.is_empty() {
        let path = pod_dir.join(declared);
        if !path.is_file() {
            return Err(PodError::DriverNotFound {
                pod: pod_name.to_string(),
                driver: declared.to_string(),
                path,
            });
        }
        let program = Program::from_driver(&path)?;
        debug!(pod = pod_name, driver = %path.display(), "driver confirmed");
        return Ok(Driver {
            path,
            program,
            discovered: false,
        });
    }

    warn!(pod = pod_name, "no driver named in settings, searching by convention");
    for stem in [pod_name, "driver"] {
        for (extension, program) in Program::EXTENSIONS {
            let candidate = pod_dir.join(format!("{}.{}", stem, extension));
            if candidate.is_file() {
                info!(pod = pod_name, driver = %candidate.display(), "found driver script");
                return Ok(Driver {
                    path: candidate,
                    program,
                    discovered: true,
                });
            }
            debug!(candidate = %candidate.display(), "not found");
        }
    }

    Err(PodError::NoDriver {
        pod: pod_name.to_string(),
        dir: pod_dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_program_from_extension() {
        assert_eq!(Program::from_extension("py").unwrap(), Program::Python);
        assert_eq!(Program::from_extension("ncl").unwrap(), Program::Ncl);
        let err = Program::from_extension("R").unwrap_err();
        assert!(err.to_string().contains("known: py, ncl"));
    }

    #[test]
    fn test_declared_driver_must_exist() {
        let dir = tempdir().unwrap();
        let err = resolve_driver(dir.path(), "sea_level", "sea_level.py").unwrap_err();
        assert!(matches!(err, PodError::DriverNotFound { .. }));

        std::fs::write(dir.path().join("sea_level.py"), "print('ok')").unwrap();
        let driver = resolve_driver(dir.path(), "sea_level", "sea_level.py").unwrap();
        assert_eq!(driver.program, Program::Python);
        assert!(!driver.discovered);
        assert_eq!(driver.command()[0], "python3");
    }

    #[test]
    fn test_discovery_prefers_pod_name_over_driver() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("driver.py"), "").unwrap();
        std::fs::write(dir.path().join("sea_level.ncl"), "").unwrap();

        let driver = resolve_driver(dir.path(), "sea_level", "").unwrap();
        assert!(driver.discovered);
        assert_eq!(driver.program, Program::Ncl);
        assert!(driver.path.ends_with("sea_level.ncl"));
    }

    #[test]
    fn test_discovery_falls_back_to_driver_script() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("driver.py"), "").unwrap();

        let driver = resolve_driver(dir.path(), "sea_level", "  ").unwrap();
        assert!(driver.path.ends_with("driver.py"));
    }

    #[test]
    fn test_no_driver_found() {
        let dir = tempdir().unwrap();
        let err = resolve_driver(dir.path(), "sea_level", "").unwrap_err();
        assert!(matches!(err, PodError::NoDriver { .. }));
    }
}
