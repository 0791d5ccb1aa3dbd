//! Error types for the rafter build core.
//!
//! This module defines the `RafterError` enum covering all error conditions
//! that can occur while loading the memoization database, scheduling tasks,
//! running cached procedures, and shelling out to external tools.
//!
//! It also provides helper methods to construct errors and generate
//! user-friendly messages.
use thiserror::Error;

/// Represents all possible errors in a rafter build.
///
/// Each variant provides specific context to facilitate debugging and
/// user-friendly reporting.
///
/// # Examples
///
/// ```rust
/// use rafter::error::{RafterError, RafterResult};
///
/// fn example() -> RafterResult<()> {
///     Err(RafterError::config("ocamlc not found on PATH"))
/// }
/// ```
///
/// # Exit Codes
///
/// Each error variant maps to an exit code via `RafterError::exit_code`:
/// 0 is reserved for success, 1 for build failures, 2 for configuration
/// failures.
#[derive(Error, Debug)]
pub enum RafterError {
    /// I/O operation failed during file system access.
    ///
    /// This variant wraps `std::io::Error` and provides context about
    /// file operations that failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required external tool, header, or platform feature could not be
    /// located or did not behave as expected.
    ///
    /// Configuration failures abort the build immediately.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// A subprocess returned a non-zero exit status or could not be
    /// launched.
    ///
    /// Carries the command line, the exit code (when the process ran at
    /// all), and the captured stdout and stderr.
    #[error("Command failed [{command}] (exit code {code:?}): {output}")]
    Execution {
        /// The full command line that was executed
        command: String,
        /// Exit code, or `None` when the process could not be launched
        code: Option<i32>,
        /// Captured stdout and stderr of the failed process
        output: String,
    },

    /// The on-disk memoization database could not be deserialized.
    ///
    /// Recovery deletes the database and starts fresh; this variant only
    /// surfaces when even that is impossible.
    #[error("Cache corruption in {path}: {message}")]
    CacheCorruption {
        /// Path of the unreadable database file
        path: String,
        /// Deserialization failure detail
        message: String,
    },

    /// The scheduler found a dependency cycle among its inputs.
    ///
    /// Fatal; no worker runs when a cycle is present.
    #[error("Dependency cycle detected among: {}", nodes.join(", "))]
    Cycle {
        /// The inputs participating in the cycle
        nodes: Vec<String>,
    },

    /// A cached procedure misdeclared its parameters or produced an
    /// invalid result.
    #[error("Invalid cached procedure {function}: {message}")]
    User {
        /// Name of the offending cached procedure
        function: String,
        /// Description of the misdeclaration
        message: String,
    },

    /// Catch-all error variant wrapping any other failure.
    #[error("Unknown error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for RafterError {
    fn from(err: serde_json::Error) -> Self {
        RafterError::Config {
            message: format!("JSON serialization/deserialization error: {}", err),
        }
    }
}

impl From<config::ConfigError> for RafterError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(path) => RafterError::Config {
                message: format!("Configuration file not found: {}", path),
            },
            config::ConfigError::Message(msg) => RafterError::Config { message: msg },
            _ => RafterError::Config {
                message: format!("Configuration error: {}", err),
            },
        }
    }
}

/// Specialized `Result` type for rafter operations.
pub type RafterResult<T> = Result<T, RafterError>;

impl RafterError {
    /// Create a configuration error with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rafter::error::RafterError;
    /// let err = RafterError::config("missing tool");
    /// assert_eq!(err.to_string(), "Configuration error: missing tool");
    /// ```
    pub fn config<S: Into<String>>(message: S) -> Self {
        RafterError::Config {
            message: message.into(),
        }
    }

    /// Create an execution error for a failed subprocess.
    pub fn execution<S1, S2>(command: S1, code: Option<i32>, output: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        RafterError::Execution {
            command: command.into(),
            code,
            output: output.into(),
        }
    }

    /// Create a cache corruption error for the given database path.
    pub fn cache_corruption<S1, S2>(path: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        RafterError::CacheCorruption {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a cycle error naming the participating inputs.
    pub fn cycle(nodes: Vec<String>) -> Self {
        RafterError::Cycle { nodes }
    }

    /// Create a user error for a misdeclared cached procedure.
    pub fn user<S1, S2>(function: S1, message: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        RafterError::User {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Return the corresponding exit code for this error variant.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use rafter::error::RafterError;
    /// assert_eq!(RafterError::config("x").exit_code(), 2);
    /// ```
    pub fn exit_code(&self) -> i32 {
        match self {
            RafterError::Config { .. } => 2,
            _ => 1,
        }
    }

    /// Return a user-friendly error message with suggested remedies.
    pub fn user_friendly_message(&self) -> String {
        match self {
            RafterError::Io(e) => format!("File operation error: {}", e),
            RafterError::Config { message } => format!(
                "Configuration error: {}\nHint: check rafter.toml and the RAFTER_* environment",
                message
            ),
            RafterError::Execution {
                command,
                code,
                output,
            } => format!(
                "Command failed: {}\nExit code: {}\n{}",
                command,
                code.map_or_else(|| "none (not launched)".to_string(), |c| c.to_string()),
                output
            ),
            RafterError::CacheCorruption { path, message } => format!(
                "Cache corruption: {} ({})\nHint: run 'rafter cache clear' to start fresh",
                path, message
            ),
            RafterError::Cycle { nodes } => {
                format!("Dependency cycle detected among: {}", nodes.join(", "))
            }
            RafterError::User { function, message } => {
                format!("Invalid cached procedure {}: {}", function, message)
            }
            RafterError::Other(err) => {
                format!("Unknown error: {}\nHint: please report this issue", err)
            }
        }
    }
}

// Unit test: RafterError error types and helper methods
#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_creation() {
        let error = RafterError::config("test config error");
        assert!(matches!(error, RafterError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_execution_error_creation() {
        let error = RafterError::execution("ocamlc -c lib.ml", Some(2), "syntax error");
        let msg = error.to_string();
        assert!(msg.contains("ocamlc -c lib.ml"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_cycle_error_lists_nodes() {
        let error = RafterError::cycle(vec!["a.ml".into(), "b.ml".into()]);
        let msg = error.to_string();
        assert!(msg.contains("a.ml"));
        assert!(msg.contains("b.ml"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let rafter_error: RafterError = io_error.into();
        assert!(matches!(rafter_error, RafterError::Io(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RafterError::config("test").exit_code(), 2);
        assert_eq!(
            RafterError::execution("cc", Some(1), "boom").exit_code(),
            1
        );
        assert_eq!(RafterError::cycle(vec!["x".into()]).exit_code(), 1);
        assert_eq!(RafterError::user("f", "bad result").exit_code(), 1);
    }

    #[test]
    fn test_user_friendly_messages() {
        let config_error = RafterError::config("ocamlc not found");
        let message = config_error.user_friendly_message();
        assert!(message.contains("Configuration error:"));
        assert!(message.contains("rafter.toml"));

        let corruption = RafterError::cache_corruption("build/rafter.db", "truncated");
        let message = corruption.user_friendly_message();
        assert!(message.contains("rafter cache clear"));
    }
}
