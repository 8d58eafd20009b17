// # embedded_usage - converge-core embedding demo
//
// Drives a full VPC / instance / hosted zone lifecycle against the in-memory
// provider, the way an application embedding converge-core would:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Streaming Actions from a ChannelSink while reconciling
// 4. Converging twice to show that the second run is a no-op
// 5. Optionally purging everything again
//
// ## Configuration
//
// - `CONVERGE_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
// - `CONVERGE_REGION`: Region reported by the provider (default: us-east-1)
// - `CONVERGE_VPC_NAME`: Name tag of the VPC (default: demo)
// - `CONVERGE_VPC_CIDR`: CIDR block of the VPC (default: 10.0.0.0/16)
// - `CONVERGE_ZONE`: Hosted zone name (default: demo.example.com)
// - `CONVERGE_LAG`: Finds a new object stays invisible for (default: 1)
// - `CONVERGE_DRY_RUN`: Describe Actions without applying them (default: false)
// - `CONVERGE_PURGE`: Tear everything down at the end (default: true)
//
// ## Example
//
// ```bash
// export CONVERGE_LOG_LEVEL=debug
// export CONVERGE_VPC_NAME=staging
// cargo run -p converge-demos --bin embedded_usage
// ```

use anyhow::{Context, Result};
use converge_core::config::{ConvergeConfig, ReconcileOptions, RetryConfig, WaitConfig};
use converge_core::error::ProviderErrorKind;
use converge_core::traits::{ChannelSink, ProgressEvent, TokioClock};
use converge_core::{
    Converger, GatewaySetting, HostedZoneReconciler, HostedZoneSpec, Identity,
    InstanceReconciler, InstanceSpec, MemoryProvider, ResourceKind, VpcReconciler, VpcSpec,
};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum DemoExitCode {
    /// Scenario completed
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// A reconciliation failed
    RuntimeError = 2,
}

impl From<DemoExitCode> for ExitCode {
    fn from(code: DemoExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Demo configuration
struct Config {
    log_level: String,
    region: String,
    vpc_name: String,
    vpc_cidr: String,
    zone: String,
    lag: u32,
    dry_run: bool,
    purge: bool,
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => anyhow::bail!("{} must be true or false. Got: {}", name, other),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: env::var("CONVERGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            region: env::var("CONVERGE_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            vpc_name: env::var("CONVERGE_VPC_NAME").unwrap_or_else(|_| "demo".to_string()),
            vpc_cidr: env::var("CONVERGE_VPC_CIDR").unwrap_or_else(|_| "10.0.0.0/16".to_string()),
            zone: env::var("CONVERGE_ZONE").unwrap_or_else(|_| "demo.example.com".to_string()),
            lag: match env::var("CONVERGE_LAG") {
                Ok(s) => s
                    .parse()
                    .with_context(|| format!("CONVERGE_LAG must be a number. Got: {}", s))?,
                Err(_) => 1,
            },
            dry_run: env_flag("CONVERGE_DRY_RUN", false)?,
            purge: env_flag("CONVERGE_PURGE", true)?,
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "CONVERGE_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        if self.vpc_name.trim().is_empty() {
            anyhow::bail!("CONVERGE_VPC_NAME cannot be empty");
        }

        if ResourceKind::Vpc.looks_like_id(&self.vpc_name) {
            anyhow::bail!(
                "CONVERGE_VPC_NAME '{}' looks like a VPC id; the demo creates by name",
                self.vpc_name
            );
        }

        if self.lag > 3 {
            anyhow::bail!("CONVERGE_LAG must be between 0 and 3. Got: {}", self.lag);
        }

        Ok(())
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Short real-time intervals so the demo finishes in about a second
fn demo_config() -> ConvergeConfig {
    ConvergeConfig {
        retry: RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
            retry_on: vec![ProviderErrorKind::Throttled],
        },
        wait: WaitConfig {
            poll_interval_ms: 100,
            timeout_ms: 5_000,
        },
        progress_channel_capacity: 256,
    }
}

async fn run(config: Config) -> Result<()> {
    let provider = MemoryProvider::new(&config.region)
        .with_visibility_lag(config.lag)
        .with_settle_polls(1);

    let converge_config = demo_config();
    let (sink, events) = ChannelSink::new(converge_config.progress_channel_capacity);

    let printer = tokio::spawn(async move {
        let mut events = ReceiverStream::new(events);
        while let Some(event) = events.next().await {
            match event {
                ProgressEvent::ActionStarted { description, dry_run } => {
                    let prefix = if dry_run { "[DRY-RUN] Would " } else { "- " };
                    println!("{}{}", prefix, description);
                }
                ProgressEvent::Progress { message } => println!("    {}", message),
            }
        }
    });

    let converger = Converger::new(
        Arc::new(provider.clone()),
        Arc::new(TokioClock::new()),
        Arc::new(sink),
        converge_config,
    )?;
    let options = ReconcileOptions::new().with_dry_run(config.dry_run);

    let vpc_identity = Identity::named(&config.vpc_name);
    let vpc_spec = VpcSpec::new()
        .with_cidr_block(&config.vpc_cidr)
        .with_dns_hostnames(true)
        .with_internet_gateway(GatewaySetting::Managed);

    let mut vpc_id = None;
    for round in 1..=2 {
        info!("Convergence round {}", round);
        let result = converger
            .converge(&VpcReconciler, &vpc_identity, &vpc_spec, &options)
            .await
            .context("VPC convergence failed")?;
        info!("VPC: {} Action(s), path {:?}", result.actions.len(), result.path);
        vpc_id = result.current().map(|vpc| vpc.id.clone());
    }

    // Nothing exists yet in a dry run, so there is no subnet to launch into
    if let Some(vpc) = vpc_id {
        let subnet = provider.add_subnet(&vpc, &subnet_of(&config.vpc_cidr)).await;

        let instance = converger
            .converge(
                &InstanceReconciler,
                &Identity::named("web"),
                &InstanceSpec::new()
                    .with_image("ami-0a1b2c3d")
                    .with_instance_type("t3.micro")
                    .with_subnet(subnet)
                    .with_tag("team", "platform"),
                &options,
            )
            .await
            .context("instance convergence failed")?;
        info!("Instance: {} Action(s)", instance.actions.len());
    }

    let zone = converger
        .converge(
            &HostedZoneReconciler,
            &Identity::named(&config.zone),
            &HostedZoneSpec::new().with_comment("managed by converge-core"),
            &options,
        )
        .await
        .context("hosted zone convergence failed")?;
    println!("{}", zone.actions_json()?);

    if config.purge {
        let purge = options.clone().with_purge(true);
        let destroyed = converger
            .destroy(&VpcReconciler, &vpc_identity, &purge)
            .await
            .context("VPC purge failed")?;
        info!("Purge: {} Action(s)", destroyed.actions.len());

        converger
            .destroy(&HostedZoneReconciler, &Identity::named(&config.zone), &options)
            .await
            .context("hosted zone destroy failed")?;
    }

    // Closing the sink ends the printer
    drop(converger);
    printer.await?;
    Ok(())
}

/// First /24 inside a VPC CIDR, for the demo subnet
fn subnet_of(vpc_cidr: &str) -> String {
    let base = vpc_cidr.split('/').next().unwrap_or("10.0.0.0");
    let octets: Vec<&str> = base.split('.').collect();
    match octets.as_slice() {
        [a, b, c, _] => format!("{}.{}.{}.0/24", a, b, c),
        _ => "10.0.0.0/24".to_string(),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DemoExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DemoExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DemoExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DemoExitCode::RuntimeError.into();
        }
    };

    match rt.block_on(run(config)) {
        Ok(()) => {
            info!("Demo finished");
            DemoExitCode::Success.into()
        }
        Err(e) => {
            error!("Demo failed: {:#}", e);
            DemoExitCode::RuntimeError.into()
        }
    }
}
