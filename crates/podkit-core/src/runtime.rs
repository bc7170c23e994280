//! Runtime environments declared by a POD.
//!
//! `runtime_requirements` maps an environment identifier (`python3`, `ncl`, `R`)
//! to the libraries the driver imports. Each entry becomes a named environment
//! with a content hash of its library set, so two PODs declaring the same set
//! can share an installation.

use crate::descriptor::PodDescriptor;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix for framework-managed environment names.
pub const ENV_PREFIX: &str = "_MDTF";

/// How environments are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvNaming {
    /// One environment per POD: `_MDTF_<identifier>_<pod>`.
    PerPod,
    /// One shared environment per identifier: `_MDTF_<identifier>_base`.
    Shared,
}

/// One declared runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeEnvironment {
    pub identifier: String,
    pub name: String,
    pub libraries: Vec<String>,
    /// SHA-256 of the sorted, de-duplicated library names.
    pub digest: String,
}

impl RuntimeEnvironment {
    pub fn new(identifier: &str, libraries: &[String], pod_name: &str, naming: EnvNaming) -> Self {
        let suffix = match naming {
            EnvNaming::PerPod => pod_name,
            EnvNaming::Shared => "base",
        };
        Self {
            identifier: identifier.to_string(),
            name: format!("{}_{}_{}", ENV_PREFIX, identifier, suffix),
            libraries: libraries.to_vec(),
            digest: requirements_digest(identifier, libraries),
        }
    }

    pub fn short_digest(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

/// Environments for every `runtime_requirements` entry, in declaration order.
pub fn runtime_environments(pod: &PodDescriptor, pod_name: &str, naming: EnvNaming) -> Vec<RuntimeEnvironment> {
    pod.settings
        .runtime_requirements
        .iter()
        .map(|(identifier, libraries)| RuntimeEnvironment::new(identifier, libraries, pod_name, naming))
        .collect()
}

/// Order-independent hash of an environment's requirements.
pub fn requirements_digest(identifier: &str, libraries: &[String]) -> String {
    let mut sorted: Vec<String> = libraries.iter().map(|l| l.trim().to_string()).collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update(b"\0");
    for library in &sorted {
        hasher.update(library.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
