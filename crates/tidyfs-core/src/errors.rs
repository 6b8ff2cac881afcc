//! Error types and classification
//!
//! Two error families matter at runtime:
//! - [`ConfigError`] - surfaced at load time; the daemon refuses to start.
//! - Filesystem-errors - `std::io::Error` anywhere in an `anyhow` chain.
//!   These are per-item recoverable: the runner logs a warning, counts one
//!   error, and continues with the next item.

use std::path::PathBuf;

use thiserror::Error;

/// Errors detected while loading or decoding the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Malformed rule: missing field, bad shorthand, unknown name, ...
    /// `at` is a dotted path into the config, e.g. `rules[2].actions[0]`.
    #[error("{at}: {message}")]
    Decode { at: String, message: String },
}

impl ConfigError {
    pub fn decode(at: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Decode { at: at.into(), message: message.into() }
    }
}

/// Whether `err` is a filesystem-error: a recognized path-level OS error
/// somewhere in its chain.
///
/// Filesystem-errors are recoverable at item scope; everything else is
/// fatal for the current item and logged at error level by the runner.
pub fn is_fs_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_io_error_is_fs_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = anyhow::Error::from(io);
        assert!(is_fs_error(&err));
    }

    #[test]
    fn test_wrapped_io_error_is_fs_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = anyhow::Result::<()>::Err(io.into())
            .context("while moving file")
            .unwrap_err();
        assert!(is_fs_error(&err));
    }

    #[test]
    fn test_plain_error_is_not_fs_error() {
        let err = anyhow::anyhow!("template expansion failed");
        assert!(!is_fs_error(&err));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::decode("rules[0].actions[1]", "rename requires new_name");
        assert_eq!(err.to_string(), "rules[0].actions[1]: rename requires new_name");
    }
}
