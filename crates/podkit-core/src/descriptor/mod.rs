//! POD descriptor model.
//!
//! A descriptor (`settings.jsonc`) registers one diagnostic with the framework:
//! - `settings`: driver, names, realm, runtime requirements, injected settings
//! - `data`: the sampling frequency the POD expects
//! - `dimensions`: coordinate axes and their standard names
//! - `varlist`: physical input variables with units and dimensions
//!
//! Descriptors are read once at registration and never mutated afterwards.

pub mod jsonc;
pub(crate) mod unique;

use crate::error::{PodError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use unique::{unique_keys, unique_scalar_strings};

/// File name the framework looks for inside a POD directory.
pub const DESCRIPTOR_FILE: &str = "settings.jsonc";

/// A parsed diagnostic registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDescriptor {
    pub settings: PodSettings,

    pub data: DataRequirement,

    #[serde(default, deserialize_with = "unique_keys")]
    pub dimensions: IndexMap<String, Dimension>,

    #[serde(deserialize_with = "unique_keys")]
    pub varlist: IndexMap<String, VarSpec>,
}

/// The `settings` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSettings {
    /// Driver script file name, relative to the POD directory.
    #[serde(default)]
    pub driver: String,

    #[serde(default)]
    pub long_name: String,

    #[serde(default)]
    pub realm: Realm,

    #[serde(default)]
    pub description: String,

    /// Environment identifier (e.g. `python3`) to required library names.
    #[serde(default, deserialize_with = "unique_keys")]
    pub runtime_requirements: IndexMap<String, Vec<String>>,

    /// Settings injected verbatim into the driver's environment.
    #[serde(default, deserialize_with = "unique_scalar_strings")]
    pub pod_env_vars: IndexMap<String, String>,

    /// Variable naming convention the POD was written against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convention: Option<String>,
}

/// Scientific realm(s) a POD belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Realm {
    Single(String),
    Multiple(Vec<String>),
}

impl Default for Realm {
    fn default() -> Self {
        Realm::Single(String::new())
    }
}

impl Realm {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Realm::Single(name) if name.is_empty() => Vec::new(),
            Realm::Single(name) => vec![name.as_str()],
            Realm::Multiple(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(", "))
    }
}

/// The `data` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequirement {
    pub frequency: Frequency,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<String>,
}

/// Temporal sampling frequency of model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "1hr", alias = "hourly")]
    Hourly,
    #[serde(rename = "3hr")]
    ThreeHourly,
    #[serde(rename = "6hr")]
    SixHourly,
    #[serde(rename = "day", alias = "daily")]
    Daily,
    #[serde(rename = "mon", alias = "monthly")]
    Monthly,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Hourly,
        Frequency::ThreeHourly,
        Frequency::SixHourly,
        Frequency::Daily,
        Frequency::Monthly,
    ];

    /// Token used in data directory layouts and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "1hr",
            Frequency::ThreeHourly => "3hr",
            Frequency::SixHourly => "6hr",
            Frequency::Daily => "day",
            Frequency::Monthly => "mon",
        }
    }

    pub fn is_sub_monthly(&self) -> bool {
        !matches!(self, Frequency::Monthly)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self> {
        let token = match s {
            "hourly" => "1hr",
            "daily" => "day",
            "monthly" => "mon",
            other => other,
        };
        Frequency::ALL
            .into_iter()
            .find(|f| f.as_str() == token)
            .ok_or_else(|| PodError::UnknownFrequency(s.to_string()))
    }
}

/// A coordinate axis declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(default)]
    pub standard_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<String>,
}

/// Whether the POD can run without a variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    #[default]
    Required,
    Optional,
}

/// A varlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarSpec {
    #[serde(default)]
    pub standard_name: String,

    #[serde(default)]
    pub units: String,

    #[serde(default, alias = "dims")]
    pub dimensions: Vec<String>,

    /// Overrides `data.frequency` for this variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,

    #[serde(default)]
    pub requirement: Requirement,

    /// Other varlist entries that may stand in when this one is missing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<String>,
}

impl VarSpec {
    pub fn is_required(&self) -> bool {
        self.requirement == Requirement::Required
    }
}

impl PodDescriptor {
    /// Parse a descriptor from JSONC text.
    pub fn from_jsonc(source: &str) -> Result<Self> {
        let json = jsonc::to_json(source)?;
        serde_json::from_str(&json).map_err(|source| PodError::Parse { path: None, source })
    }

    /// Load a descriptor from a file, or from `settings.jsonc` inside a POD directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = descriptor_path(path.as_ref());
        debug!(path = %path.display(), "loading descriptor");

        let source = std::fs::read_to_string(&path).map_err(|source| PodError::Read {
            path: path.clone(),
            source,
        })?;
        let json = jsonc::to_json(&source)?;
        serde_json::from_str(&json).map_err(|source| PodError::Parse {
            path: Some(path),
            source,
        })
    }

    /// Frequency a variable is requested at.
    pub fn frequency_of(&self, var: &VarSpec) -> Frequency {
        var.frequency.unwrap_or(self.data.frequency)
    }

    /// Canonical JSON rendering (comments and formatting dropped, order kept).
    pub fn to_canonical_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(PodError::Encode)
    }

    /// SHA-256 of the canonical JSON, identifying this registration.
    pub fn digest(&self) -> Result<String> {
        let canonical = self.to_canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Resolve a user-supplied path to the descriptor file.
pub fn descriptor_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(DESCRIPTOR_FILE)
    } else {
        path.to_path_buf()
    }
}

/// POD name implied by a descriptor or POD directory path (the directory name).
pub fn pod_name_from_path(path: &Path) -> Option<String> {
    let dir = if path.is_dir() { Some(path) } else { path.parent() };
    dir.and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}
