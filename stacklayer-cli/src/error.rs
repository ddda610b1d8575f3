//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use stacklayer::config::ConfigFileError;
use stacklayer::orchestrator::OrchestratorError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be read or written
    ConfigFile(ConfigFileError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// The orchestrator refused an operation
    Orchestrator(OrchestratorError),
    /// A demo step did not end as expected
    Demo(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::ConfigFile(ConfigFileError::InvalidValue { .. }) = self {
            eprintln!();
            eprintln!("Fix the value in the configuration file, or delete the key to use the default.");
            eprintln!("Run 'stacklayer config path' to locate the file.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::ConfigFile(e) => write!(f, "Configuration error: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Orchestrator(e) => write!(f, "Operation rejected: {}", e),
            CliError::Demo(msg) => write!(f, "Demo failed: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Orchestrator(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<OrchestratorError> for CliError {
    fn from(e: OrchestratorError) -> Self {
        CliError::Orchestrator(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CliError::LoggingInit("denied".to_string()).to_string(),
            "Failed to initialize logging: denied"
        );
        assert_eq!(
            CliError::Demo("volume erred".to_string()).to_string(),
            "Demo failed: volume erred"
        );
    }

    #[test]
    fn test_config_file_error_has_source() {
        use std::error::Error;

        let err = CliError::from(ConfigFileError::WriteError("disk full".to_string()));
        assert!(err.source().is_some());
        assert!(CliError::LoggingInit("x".to_string()).source().is_none());
    }
}
