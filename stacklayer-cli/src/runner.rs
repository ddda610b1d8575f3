//! CLI runner for common setup and operations.
//!
//! Encapsulates configuration loading, logging initialization and the
//! assembly of an orchestrator stack so command handlers stay small.

use crate::error::CliError;
use std::sync::Arc;
use tracing::info;
use stacklayer::backend::SimulatedBackend;
use stacklayer::chains::ChainTimings;
use stacklayer::config::ConfigFile;
use stacklayer::events::{EventSink, TracingEventSink};
use stacklayer::executor::{ExecutorConfig, JobExecutor, TracingTelemetrySink};
use stacklayer::logging::{init_logging, split_log_path, LoggingGuard};
use stacklayer::orchestrator::Orchestrator;
use stacklayer::repository::InMemoryRepository;
use stacklayer::tasks::{PollPolicy, ProvisionLimits, TaskEnv};

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

/// Everything a command needs to drive the orchestrator against the
/// simulated backend.
pub struct Stack {
    pub repository: Arc<InMemoryRepository>,
    pub backend: Arc<SimulatedBackend>,
    pub orchestrator: Arc<Orchestrator>,
    pub executor: JobExecutor,
}

impl CliRunner {
    /// Create a new CLI runner with optional debug logging.
    ///
    /// Logs go to the configured file only; commands print their own
    /// output to stdout.
    ///
    /// # Arguments
    ///
    /// * `debug_mode` - When true, enables debug-level logging unless RUST_LOG is set
    pub fn with_debug(debug_mode: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;

        let (log_dir, log_file) = split_log_path(&config.logging.file);
        let logging_guard = init_logging(&log_dir, &log_file, false, debug_mode)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("StackLayer v{}", stacklayer::VERSION);
        info!("StackLayer CLI: {} command", command);
    }

    /// Builds an orchestrator over a fresh in-memory repository and the
    /// given simulated backend. Executor and throttle settings come from the
    /// loaded configuration; chain pacing is supplied by the caller.
    ///
    /// The returned executor is not running yet.
    pub fn build_stack(&self, backend: SimulatedBackend, pace: Pace) -> Stack {
        build_stack(&self.config, backend, pace)
    }
}

/// Countdowns and poll delays of the chains a stack runs.
#[derive(Clone, Copy, Debug)]
pub struct Pace {
    pub timings: ChainTimings,
    pub poll: PollPolicy,
}


pub(crate) fn build_stack(config: &ConfigFile, backend: SimulatedBackend, pace: Pace) -> Stack {
    let repository = Arc::new(InMemoryRepository::new());
    let backend = Arc::new(backend);
    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    let env = TaskEnv::new(repository.clone(), backend.clone(), events)
        .with_limits(ProvisionLimits::from(&config.throttle))
        .with_poll(pace.poll);

    let (executor, submitter) = JobExecutor::with_telemetry(
        ExecutorConfig::from(&config.executor),
        Arc::new(TracingTelemetrySink),
    );
    let orchestrator = Orchestrator::new(Arc::new(env), submitter)
        .with_timings(pace.timings);

    Stack {
        repository,
        backend,
        orchestrator: Arc::new(orchestrator),
        executor,
    }
}
