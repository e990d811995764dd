//! Designate Operator - reconciles DesignateProducer services

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt, ResourceExt};

use designate_common::crd::{DesignateProducer, Topology};
use designate_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use designate_common::{DEFAULT_TOPOLOGY_LABEL, FIELD_MANAGER};
use designate_producer::ControllerConfig;

mod controller_runner;

/// Designate operator - dependency-aware reconciliation of Designate services
#[derive(Parser, Debug)]
#[command(name = "designate-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Installs the CRDs, then reconciles DesignateProducer resources until
    /// SIGTERM.
    Controller,
}

/// Reconciler tunables
#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Requeue delay while a dependency is still coming up
    #[arg(long, env = "DESIGNATE_UNREADY_REQUEUE_SECS", default_value_t = 10, global = true)]
    unready_requeue_secs: u64,

    /// Requeue delay while a reference points at a missing resource
    #[arg(long, env = "DESIGNATE_MISCONFIG_REQUEUE_SECS", default_value_t = 60, global = true)]
    misconfiguration_requeue_secs: u64,

    /// First requeue delay after a backend error
    #[arg(long, env = "DESIGNATE_TRANSIENT_REQUEUE_SECS", default_value_t = 5, global = true)]
    transient_requeue_secs: u64,

    /// Ceiling for backend error backoff
    #[arg(long, env = "DESIGNATE_TRANSIENT_REQUEUE_MAX_SECS", default_value_t = 300, global = true)]
    transient_requeue_max_secs: u64,

    /// Requeue delay once a producer is Ready
    #[arg(long, env = "DESIGNATE_STEADY_REQUEUE_SECS", default_value_t = 300, global = true)]
    steady_requeue_secs: u64,

    /// Time budget for one reconcile pass
    #[arg(long, env = "DESIGNATE_PASS_DEADLINE_SECS", default_value_t = 30, global = true)]
    pass_deadline_secs: u64,

    /// Label selector (`key=value,...`) picking the Topology for an unnamed reference
    #[arg(long, env = "DESIGNATE_DEFAULT_TOPOLOGY_SELECTOR", global = true)]
    default_topology_selector: Option<String>,
}

impl ControllerArgs {
    fn to_config(&self) -> anyhow::Result<ControllerConfig> {
        let selector = match &self.default_topology_selector {
            Some(s) => parse_selector(s)?,
            None => parse_selector(&format!("{}=true", DEFAULT_TOPOLOGY_LABEL))?,
        };
        Ok(ControllerConfig {
            unready_requeue: Duration::from_secs(self.unready_requeue_secs),
            misconfiguration_requeue: Duration::from_secs(self.misconfiguration_requeue_secs),
            transient_requeue: Duration::from_secs(self.transient_requeue_secs),
            transient_requeue_max: Duration::from_secs(self.transient_requeue_max_secs),
            steady_requeue: Duration::from_secs(self.steady_requeue_secs),
            pass_deadline: Duration::from_secs(self.pass_deadline_secs),
            default_topology_selector: selector,
        })
    }
}

/// Parse `key=value,key2=value2` into a matchLabels selector
fn parse_selector(s: &str) -> anyhow::Result<LabelSelector> {
    let labels = s
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            let (k, v) = term
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("selector term '{}' is not key=value", term))?;
            Ok((k.trim().to_string(), v.trim().to_string()))
        })
        .collect::<anyhow::Result<_>>()?;
    Ok(LabelSelector {
        match_labels: Some(labels),
        ..Default::default()
    })
}

fn crds() -> Vec<CustomResourceDefinition> {
    vec![DesignateProducer::crd(), Topology::crd()]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller.to_config()?).await,
    }
}

/// Install the operator's CRDs with server-side apply
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in crds() {
        let name = crd.name_any();
        tracing::info!(crd = %name, "Installing CRD...");
        api.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All Designate CRDs installed/updated");
    Ok(())
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!(?config, "Designate controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    tracing::info!("Starting controllers:");
    controller_runner::build_producer_controller(client, config).await;

    tracing::info!("Designate controller shutting down");
    Ok(())
}
