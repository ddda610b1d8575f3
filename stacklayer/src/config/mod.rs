//! Configuration for StackLayer components.
//!
//! Settings are read from `~/.stacklayer/config.ini`; a missing file or key
//! means the default. Each section converts into the runtime configuration
//! of the component it tunes:
//!
//! | Section        | Converts into                          |
//! |----------------|----------------------------------------|
//! | `[executor]`   | [`crate::executor::ExecutorConfig`]    |
//! | `[throttle]`   | [`crate::tasks::ProvisionLimits`]      |
//! | `[poll]`       | [`crate::tasks::PollPolicy`]           |
//! | `[timings]`    | [`crate::chains::ChainTimings`]        |
//! | `[background]` | [`crate::background::BackgroundConfig`]|
//!
//! # Example
//!
//! ```no_run
//! use stacklayer::config::ConfigFile;
//! use stacklayer::executor::ExecutorConfig;
//!
//! let config = ConfigFile::load()?;
//! let executor = ExecutorConfig::from(&config.executor);
//! # Ok::<(), stacklayer::config::ConfigFileError>(())
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    default_log_file, CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_LOG_FILE_NAME,
    DEFAULT_THROTTLE_LIMIT,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    BackgroundSettings, ConfigFile, ExecutorSettings, LoggingSettings, PollSettings,
    ThrottleSettings, TimingSettings,
};
