//! Typed access to the settings a POD receives as environment variables.
//!
//! Values in `pod_env_vars` (and case settings layered on top) are strings.
//! Drivers read them with a default: a missing or unparsable value falls back
//! to the default and is logged, never fatal. `require` is the strict variant.

use crate::descriptor::PodDescriptor;
use crate::error::{PodError, Result};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

/// A type a setting string can be read as.
pub trait SettingValue: Sized {
    /// Name used in diagnostics ("integer", "boolean", ...).
    const TYPE_NAME: &'static str;

    fn parse_setting(raw: &str) -> Option<Self>;
}

impl SettingValue for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn parse_setting(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

impl SettingValue for i64 {
    const TYPE_NAME: &'static str = "integer";

    fn parse_setting(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl SettingValue for f64 {
    const TYPE_NAME: &'static str = "number";

    fn parse_setting(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl SettingValue for String {
    const TYPE_NAME: &'static str = "string";

    fn parse_setting(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

/// Rectangular region from `lat_min`, `lat_max`, `lon_min`, `lon_max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// Ordered settings map handed to a driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvVars {
    vars: IndexMap<String, String>,
}

impl EnvVars {
    pub fn new(vars: IndexMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn from_descriptor(pod: &PodDescriptor) -> Self {
        Self::new(pod.settings.pod_env_vars.clone())
    }

    /// Layer additional settings; later values win.
    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.vars.insert(key.into(), value.into());
        }
    }

    pub fn raw(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Strict typed lookup: `Ok(None)` when absent, an error when unparsable.
    pub fn get<T: SettingValue>(&self, name: &str) -> Result<Option<T>> {
        match self.vars.get(name) {
            None => Ok(None),
            Some(raw) => T::parse_setting(raw).map(Some).ok_or_else(|| PodError::InvalidSetting {
                name: name.to_string(),
                value: raw.clone(),
                expected: T::TYPE_NAME,
            }),
        }
    }

    /// Lenient typed lookup falling back to `default`.
    pub fn get_or<T: SettingValue + std::fmt::Debug>(&self, name: &str, default: T) -> T {
        match self.get::<T>(name) {
            Ok(Some(value)) => {
                debug!(setting = name, value = ?value, "setting read");
                value
            }
            Ok(None) => {
                warn!(setting = name, default = ?default, "setting not found, using default");
                default
            }
            Err(e) => {
                warn!(setting = name, default = ?default, error = %e, "using default");
                default
            }
        }
    }

    /// Fail unless every name is defined.
    pub fn require(&self, names: &[&str]) -> Result<()> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.vars.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PodError::MissingSettings(missing))
        }
    }

    /// Read the four region limits.
    pub fn bounding_box(&self) -> Result<BoundingBox> {
        self.require(&["lat_min", "lat_max", "lon_min", "lon_max"])?;
        let read = |name: &str| -> Result<f64> {
            self.get::<f64>(name)?
                .ok_or_else(|| PodError::MissingSettings(vec![name.to_string()]))
        };
        Ok(BoundingBox {
            lat_min: read("lat_min")?,
            lat_max: read("lat_max")?,
            lon_min: read("lon_min")?,
            lon_max: read("lon_max")?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Environment pairs, in declaration order.
    pub fn to_env(&self) -> Vec<(String, String)> {
        self.vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
