//! Error types for POD descriptor handling.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while loading or consuming a POD descriptor.
#[derive(Error, Debug)]
pub enum PodError {
    /// Descriptor could not be read from disk
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Descriptor JSON (after comment stripping) is malformed
    #[error("invalid descriptor{}: {source}", .path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_json::Error,
    },

    /// Unterminated block comment or string in a JSONC document
    #[error("malformed JSONC at byte {offset}: {reason}")]
    Jsonc { offset: usize, reason: String },

    /// Case configuration YAML is malformed
    #[error("invalid case configuration: {0}")]
    CaseConfig(#[from] serde_yaml::Error),

    /// Case configuration is well-formed but inconsistent
    #[error("invalid case '{case}': {reason}")]
    InvalidCase { case: String, reason: String },

    /// Required settings are not defined
    #[error("required settings not found: {}", .0.join(", "))]
    MissingSettings(Vec<String>),

    /// A setting exists but does not parse as the requested type
    #[error("setting {name} = '{value}' is not a valid {expected}")]
    InvalidSetting {
        name: String,
        value: String,
        expected: &'static str,
    },

    /// Driver script named in the descriptor does not exist
    #[error("driver {driver} for POD {pod} not found at {}", .path.display())]
    DriverNotFound {
        pod: String,
        driver: String,
        path: PathBuf,
    },

    /// No driver named and none discovered
    #[error("no driver script found for POD {pod}; looked in {} for {pod}.* or driver.*", .dir.display())]
    NoDriver { pod: String, dir: PathBuf },

    /// Driver extension maps to no known program
    #[error("don't know how to run a .{extension} driver (known: {known})")]
    UnknownProgram { extension: String, known: String },

    /// A POD with this name is already registered
    #[error("POD {0} is already registered")]
    AlreadyRegistered(String),

    /// Descriptor parsed but failed validation
    #[error("POD {pod} rejected with {errors} validation error(s)")]
    Rejected { pod: String, errors: usize },

    /// Unknown frequency string
    #[error("unknown frequency '{0}' (expected one of 1hr, 3hr, 6hr, day, mon)")]
    UnknownFrequency(String),

    /// Descriptor could not be rendered as canonical JSON
    #[error("failed to encode descriptor: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result type for POD operations
pub type Result<T> = std::result::Result<T, PodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_settings_lists_all_names() {
        let err = PodError::MissingSettings(vec!["CASENAME".to_string(), "DATADIR".to_string()]);
        assert_eq!(
            err.to_string(),
            "required settings not found: CASENAME, DATADIR"
        );
    }

    #[test]
    fn test_parse_error_mentions_path() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = PodError::Parse {
            path: Some(PathBuf::from("pods/x/settings.jsonc")),
            source,
        };
        assert!(err.to_string().contains("pods/x/settings.jsonc"));
    }

    #[test]
    fn test_encode_error_is_not_a_parse_error() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = PodError::Encode(source);
        assert!(err.to_string().starts_with("failed to encode descriptor"));
        assert!(!err.to_string().contains("invalid descriptor"));
    }
}
