//! Error types and error handling for GeoNet

use thiserror::Error;

/// Result type alias using GeoNetError
pub type Result<T> = std::result::Result<T, GeoNetError>;

/// Custom error types for GeoNet operations
#[derive(Error, Debug)]
pub enum GeoNetError {
    #[error("resource {kind} does not contain required key {key}")]
    MissingKey { kind: &'static str, key: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("no {kind} with index \"{key}\" found")]
    NotFound { kind: &'static str, key: String },

    #[error("index {index} out of range for {kind} collection of length {len}")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    #[error("no region named '{0}' found")]
    RegionNotFound(String),

    #[error("{operation} failed in {region}: {message}")]
    Transport {
        region: String,
        operation: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{} of {total} tasks failed: {}", .failures.len(), first_failure(.failures))]
    Batch {
        total: usize,
        failures: Vec<TaskFailure>,
    },

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

/// A single failed task inside a fan-out batch, keyed by submission index
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub error: GeoNetError,
}

fn first_failure(failures: &[TaskFailure]) -> String {
    failures
        .first()
        .map(|f| f.error.to_string())
        .unwrap_or_default()
}

impl GeoNetError {
    pub fn transport(
        region: impl Into<String>,
        operation: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        GeoNetError::Transport {
            region: region.into(),
            operation,
            message: message.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GeoNetError::MissingKey { .. } | GeoNetError::Validation(_)
        )
    }

    /// True for lookups that found nothing (collection id or region name)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GeoNetError::NotFound { .. } | GeoNetError::RegionNotFound(_)
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, GeoNetError::Transport { .. })
    }
}

/// Handle and display errors with helpful messages
pub fn handle_error(error: &GeoNetError) {
    eprintln!("✗ error: {}", error);

    // If DEBUG environment variable is set, show detailed info
    if std::env::var("DEBUG").is_ok() {
        if let Some(source) = std::error::Error::source(error) {
            eprintln!("\ndetails:");
            eprintln!("{:?}", source);
        }
    }

    match error {
        GeoNetError::Batch { failures, .. } => {
            for failure in failures {
                eprintln!("  • task {}: {}", failure.index, failure.error);
            }
        }
        GeoNetError::Configuration(_) => {
            eprintln!("\nhints:");
            eprintln!("  • check the configuration file: ~/.geonet/config.yml");
            eprintln!("  • verify GEONET_REGIONS and AWS_PROFILE environment variables");
        }
        GeoNetError::Transport { .. } => {
            eprintln!("\nhints:");
            eprintln!("  • check AWS credentials for the configured profile");
            eprintln!("  • check network connectivity to the region endpoint");
        }
        GeoNetError::RegionNotFound(_) => {
            eprintln!("\nhints:");
            eprintln!("  • run `geonet regions` to list known regions");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_names_kind_and_key() {
        let err = GeoNetError::MissingKey {
            kind: "Instance",
            key: "State".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "resource Instance does not contain required key State"
        );
        assert!(err.is_validation());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_batch_message_reports_first_failure() {
        let err = GeoNetError::Batch {
            total: 3,
            failures: vec![TaskFailure {
                index: 1,
                error: GeoNetError::transport("us-west-2", "DescribeInstances", "timed out"),
            }],
        };
        assert_eq!(
            err.to_string(),
            "1 of 3 tasks failed: DescribeInstances failed in us-west-2: timed out"
        );
    }

    #[test]
    fn test_not_found_kinds() {
        assert!(GeoNetError::RegionNotFound("mars-1".into()).is_not_found());
        let err = GeoNetError::NotFound {
            kind: "Volume",
            key: "vol-1".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no Volume with index \"vol-1\" found");
    }
}
