//! podkit-core: diagnostic (POD) descriptors and their consumers
//!
//! A POD registers with the diagnostics framework through a `settings.jsonc`
//! descriptor. This crate provides:
//! - the descriptor model and JSONC parser ([`descriptor`])
//! - structural validation ([`validate`])
//! - typed access to injected settings ([`env_vars`])
//! - driver resolution ([`driver`]), case configuration ([`case`])
//! - input-file discovery ([`inputs`]) and runtime environments ([`runtime`])
//! - one-shot registration of a directory of PODs ([`registry`])

pub mod case;
pub mod descriptor;
pub mod driver;
pub mod env_vars;
pub mod error;
pub mod inputs;
pub mod obs;
pub mod registry;
pub mod runtime;
pub mod telemetry;
pub mod validate;

pub use case::{CaseConfig, CaseSpec};
pub use descriptor::{
    DataRequirement, Dimension, Frequency, PodDescriptor, PodSettings, Realm, Requirement, VarSpec,
    DESCRIPTOR_FILE,
};
pub use driver::{resolve_driver, Driver, Program};
pub use env_vars::{BoundingBox, EnvVars, SettingValue};
pub use error::{PodError, Result};
pub use inputs::{check_input_files, data_file_path, InputCheck, InputStatus, NameMap};
pub use registry::{PodRegistry, RegisteredPod};
pub use runtime::{runtime_environments, EnvNaming, RuntimeEnvironment};
pub use validate::{validate, Issue, IssueKind, Severity, ValidationReport};

/// podkit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
