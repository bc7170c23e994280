//! Case configuration: which model runs to analyze and with which PODs.
//!
//! ```yaml
//! case_list:
//!   - CASENAME: c96L65_am5f4b4r0_amip
//!     model: AM5
//!     convention: GFDL
//!     FIRSTYR: 1990
//!     LASTYR: 1994
//! pod_list:
//!   - tropical_pacific_sea_level
//! settings:
//!   DATADIR: /data/model
//! ```

use crate::descriptor::unique::{scalar_string, unique_scalar_strings};
use crate::error::{PodError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One model run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSpec {
    #[serde(rename = "CASENAME")]
    pub casename: String,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convention: Option<String>,

    #[serde(rename = "FIRSTYR", deserialize_with = "scalar_string")]
    pub firstyr: String,

    #[serde(rename = "LASTYR", deserialize_with = "scalar_string")]
    pub lastyr: String,
}

impl CaseSpec {
    /// First and last analysis year.
    pub fn year_range(&self) -> Result<(i32, i32)> {
        let parse = |raw: &str, field: &str| -> Result<i32> {
            raw.trim().parse().map_err(|_| PodError::InvalidCase {
                case: self.casename.clone(),
                reason: format!("{} = '{}' is not a year", field, raw),
            })
        };
        let first = parse(&self.firstyr, "FIRSTYR")?;
        let last = parse(&self.lastyr, "LASTYR")?;
        if first > last {
            return Err(PodError::InvalidCase {
                case: self.casename.clone(),
                reason: format!("FIRSTYR {} is after LASTYR {}", first, last),
            });
        }
        Ok((first, last))
    }

    /// Environment variables the framework exports for this case.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("CASENAME".to_string(), self.casename.clone()),
            ("model".to_string(), self.model.clone()),
            ("FIRSTYR".to_string(), self.firstyr.clone()),
            ("LASTYR".to_string(), self.lastyr.clone()),
        ];
        if let Some(convention) = &self.convention {
            env.push(("convention".to_string(), convention.clone()));
        }
        env
    }
}

/// Top-level case configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseConfig {
    pub case_list: Vec<CaseSpec>,

    #[serde(default)]
    pub pod_list: Vec<String>,

    #[serde(default, deserialize_with = "unique_scalar_strings")]
    pub settings: IndexMap<String, String>,
}

impl CaseConfig {
    pub fn from_yaml(source: &str) -> Result<Self> {
        let config: CaseConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| PodError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    fn validate(&self) -> Result<()> {
        if self.case_list.is_empty() {
            return Err(PodError::InvalidCase {
                case: String::new(),
                reason: "case_list is empty".to_string(),
            });
        }
        for case in &self.case_list {
            if case.casename.trim().is_empty() {
                return Err(PodError::InvalidCase {
                    case: case.casename.clone(),
                    reason: "CASENAME is empty".to_string(),
                });
            }
            case.year_range()?;
        }
        Ok(())
    }

    pub fn case(&self, name: &str) -> Option<&CaseSpec> {
        self.case_list.iter().find(|c| c.casename == name)
    }

    pub fn runs_pod(&self, pod: &str) -> bool {
        self.pod_list.iter().any(|p| p == pod)
    }
}
