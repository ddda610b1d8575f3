//! Demo command - an end-to-end scenario against the simulated backend.
//!
//! Creates a tenant, an instance with a system volume, a data volume and a
//! floating IP, extends the data volume, backs the instance up, deletes the
//! backup and finally the instance. Every step waits for its chain; the
//! first step that does not succeed ends the scenario.

use std::time::Duration;

use stacklayer::backend::{BackendMethod, SimulatedBackend};
use stacklayer::chains::ChainTimings;
use stacklayer::executor::{JobHandle, JobResult};
use stacklayer::model::{QuotaName, ResourceId, ResourceKind, SettingsId};
use stacklayer::orchestrator::{
    BackupRequest, InstanceRequest, Operation, Orchestrator, TenantRequest,
};
use stacklayer::repository::{ResourceFilter, ResourceRepository};
use stacklayer::tasks::PollPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;
use crate::runner::{CliRunner, Pace, Stack};

/// Arguments for the demo command.
pub struct DemoArgs {
    /// Volume whose backend creation fails.
    pub fail_volume: Option<String>,
}

const TENANT: &str = "demo";
const INSTANCE: &str = "web";
const SYSTEM_VOLUME_MB: u64 = 10_240;
const DATA_VOLUME_MB: u64 = 2_048;
const EXTENDED_DATA_VOLUME_MB: u64 = 4_096;
const SIMULATED_FAILURE: &str = "Simulated backend failure";

/// Longest a single step may take before the demo gives up.
const STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one scenario step.
#[derive(Debug)]
struct StepOutcome {
    name: &'static str,
    succeeded: bool,
    detail: String,
}

/// Run the demo command.
pub fn run(runner: &CliRunner, args: DemoArgs) -> Result<(), CliError> {
    runner.log_startup("demo");

    let backend = SimulatedBackend::new().with_latency(Duration::from_millis(20));
    if let Some(name) = &args.fail_volume {
        println!("Volume \"{}\" will fail to create", name);
        backend.fail(BackendMethod::CreateVolume, name, SIMULATED_FAILURE);
    }
    let stack = runner.build_stack(backend, demo_pace());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    let outcomes = runtime.block_on(run_stack(stack))?;

    let failed = outcomes.iter().find(|o| !o.succeeded);
    match failed {
        Some(step) => Err(CliError::Demo(format!("step \"{}\" failed", step.name))),
        None => {
            println!();
            println!("All steps succeeded.");
            Ok(())
        }
    }
}

/// Chains run back to back with sub-second polls.
fn demo_pace() -> Pace {
    Pace {
        timings: ChainTimings::immediate(),
        poll: PollPolicy {
            max_retries: 200,
            retry_delay: Duration::from_millis(50),
            check_max_retries: 200,
            check_retry_delay: Duration::from_millis(50),
            throttle_retry_delay: Duration::from_millis(50),
        },
    }
}

/// Runs the executor for the duration of the scenario, then prints the
/// final state of every resource.
async fn run_stack(stack: Stack) -> Result<Vec<StepOutcome>, CliError> {
    let Stack {
        repository,
        backend,
        orchestrator,
        executor,
    } = stack;

    let shutdown = CancellationToken::new();
    let executor = tokio::spawn(executor.run(shutdown.clone()));

    let settings = repository.insert_settings("simulated-cloud").id;
    let scenario = Scenario {
        orchestrator: &orchestrator,
        settings,
    };
    let outcomes = scenario.run().await;

    shutdown.cancel();
    let _ = executor.await;

    print_resources(repository.as_ref(), settings);
    println!();
    println!("Backend calls: {}", backend.calls().len());
    outcomes
}

struct Scenario<'a> {
    orchestrator: &'a Orchestrator,
    settings: SettingsId,
}

impl Scenario<'_> {
    async fn run(&self) -> Result<Vec<StepOutcome>, CliError> {
        let mut outcomes = Vec::new();

        println!("Creating tenant \"{}\"...", TENANT);
        let tenant = self.orchestrator.provision_tenant(
            TenantRequest::new(TENANT, self.settings)
                .with_security_group("ssh", ["tcp:22:22:0.0.0.0/0"])
                .with_quota_limit("instances", 10),
        )?;
        if !record(&mut outcomes, "create tenant", tenant.handle).await {
            return Ok(outcomes);
        }

        let security_group = self
            .find(ResourceKind::SecurityGroup, "ssh")
            .ok_or_else(|| CliError::Demo("security group \"ssh\" was not created".into()))?;

        println!("Creating instance \"{}\"...", INSTANCE);
        let request = InstanceRequest::new(INSTANCE, self.settings)
            .with_image("ubuntu-22.04")
            .with_system_volume(SYSTEM_VOLUME_MB)
            .with_data_volume(DATA_VOLUME_MB)
            .with_security_group(security_group)
            .allocate_floating_ip();
        let instance = self.orchestrator.provision_instance(request)?;
        let instance_id = instance.resource.id();
        if !record(&mut outcomes, "create instance", instance.handle).await {
            return Ok(outcomes);
        }

        let data_volume_name = format!("{}-data", INSTANCE);
        let data_volume = self
            .find(ResourceKind::Volume, &data_volume_name)
            .ok_or_else(|| CliError::Demo(format!("volume \"{}\" is missing", data_volume_name)))?;
        println!(
            "Extending \"{}\" to {} MB...",
            data_volume_name, EXTENDED_DATA_VOLUME_MB
        );
        let extend = self.orchestrator.execute(
            data_volume,
            Operation::Extend {
                new_size: EXTENDED_DATA_VOLUME_MB,
            },
        )?;
        if !record(&mut outcomes, "extend data volume", extend).await {
            return Ok(outcomes);
        }

        println!("Backing up \"{}\"...", INSTANCE);
        let backup = self
            .orchestrator
            .create_backup(instance_id, BackupRequest::new(format!("{}-backup", INSTANCE)))?;
        let backup_id = backup.resource.id();
        if !record(&mut outcomes, "create backup", backup.handle).await {
            return Ok(outcomes);
        }
        self.print_quota("after backup");

        println!("Deleting backup...");
        let delete_backup = self.orchestrator.execute(backup_id, Operation::delete())?;
        if !record(&mut outcomes, "delete backup", delete_backup).await {
            return Ok(outcomes);
        }

        println!("Deleting instance \"{}\"...", INSTANCE);
        let delete_instance = self.orchestrator.execute(instance_id, Operation::delete())?;
        record(&mut outcomes, "delete instance", delete_instance).await;

        Ok(outcomes)
    }

    fn find(&self, kind: ResourceKind, name: &str) -> Option<ResourceId> {
        self.orchestrator
            .repository()
            .find(&ResourceFilter::kind(kind).in_settings(self.settings))
            .into_iter()
            .find(|r| r.name == name)
            .map(|r| r.id())
    }

    fn print_quota(&self, label: &str) {
        println!("Quota usage {}:", label);
        print_quota(self.orchestrator.repository(), self.settings);
    }
}

/// Waits for a chain and records its outcome. Returns true on success.
async fn record(outcomes: &mut Vec<StepOutcome>, name: &'static str, handle: JobHandle) -> bool {
    let outcome = match wait(handle).await {
        Some(result) if result.is_success() => {
            info!(step = name, duration_ms = result.duration.as_millis() as u64, "Demo step succeeded");
            StepOutcome {
                name,
                succeeded: true,
                detail: format!("{:.2}s", result.duration.as_secs_f64()),
            }
        }
        Some(result) => {
            let detail = result
                .failure
                .map(|e| e.to_string())
                .unwrap_or_else(|| "cancelled".to_string());
            warn!(step = name, error = %detail, "Demo step failed");
            StepOutcome {
                name,
                succeeded: false,
                detail,
            }
        }
        None => {
            warn!(step = name, "Demo step timed out");
            StepOutcome {
                name,
                succeeded: false,
                detail: format!("timed out after {}s", STEP_TIMEOUT.as_secs()),
            }
        }
    };

    let mark = if outcome.succeeded { "ok" } else { "FAILED" };
    println!("  {:<20} {:<6} {}", outcome.name, mark, outcome.detail);
    let succeeded = outcome.succeeded;
    outcomes.push(outcome);
    succeeded
}

async fn wait(mut handle: JobHandle) -> Option<JobResult> {
    tokio::select! {
        result = handle.wait() => Some(result),
        _ = tokio::time::sleep(STEP_TIMEOUT) => None,
    }
}

fn print_resources(repository: &dyn ResourceRepository, settings: SettingsId) {
    println!();
    println!("Resources");
    println!("=========");
    for kind in ResourceKind::ALL {
        for resource in repository.find(&ResourceFilter::kind(kind).in_settings(settings)) {
            let error = if resource.error_message.is_empty() {
                String::new()
            } else {
                format!("  ({})", resource.error_message)
            };
            println!(
                "  {:<15} {:<20} {:<20}{}",
                kind.as_str(),
                resource.name,
                resource.state().to_string(),
                error
            );
        }
    }
    println!();
    println!("Quota usage");
    println!("===========");
    print_quota(repository, settings);
}

fn print_quota(repository: &dyn ResourceRepository, settings: SettingsId) {
    for name in QuotaName::ALL {
        if let Ok(quota) = repository.quota(settings, name) {
            if quota.usage > 0 || name == QuotaName::Storage {
                println!("  {:<22} {}", name.to_string(), quota.usage);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::build_stack;
    use stacklayer::config::ConfigFile;

    fn fast_stack(backend: SimulatedBackend) -> Stack {
        let mut pace = demo_pace();
        pace.poll.retry_delay = Duration::from_millis(5);
        pace.poll.check_retry_delay = Duration::from_millis(5);
        build_stack(&ConfigFile::default(), backend, pace)
    }

    #[tokio::test]
    async fn test_scenario_succeeds() {
        let outcomes = run_stack(fast_stack(SimulatedBackend::new())).await.unwrap();

        let names: Vec<_> = outcomes.iter().map(|o| o.name).collect();
        assert_eq!(
            names,
            vec![
                "create tenant",
                "create instance",
                "extend data volume",
                "create backup",
                "delete backup",
                "delete instance",
            ]
        );
        assert!(outcomes.iter().all(|o| o.succeeded), "{:?}", outcomes);
    }

    #[tokio::test]
    async fn test_failing_volume_stops_scenario() {
        let backend = SimulatedBackend::new();
        backend.fail(BackendMethod::CreateVolume, "web-data", SIMULATED_FAILURE);

        let outcomes = run_stack(fast_stack(backend)).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].succeeded);
        assert!(!outcomes[1].succeeded);
        assert_eq!(outcomes[1].name, "create instance");
    }
}
