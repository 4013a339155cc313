//! mvirt-infra: cluster edge network ensurer.
//!
//! Reconciles (or deletes) the tier-1 gateway, workers segment, SNAT and DHCP
//! setup of one cluster and persists the resulting references in a state file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_infra::remote::rest::{RestClient, RestConfig};
use mvirt_infra::{InfraEnsurer, InfraSpec, InfraState};

/// mvirt infrastructure ensurer
#[derive(Parser, Debug)]
#[command(name = "mvirt-infra", version, about)]
struct Args {
    /// Control plane base URL
    #[arg(long, env = "MVIRT_INFRA_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "MVIRT_INFRA_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MVIRT_INFRA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Accept self-signed certificates
    #[arg(long)]
    insecure: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Do not try to recover lost references
    #[arg(long)]
    no_recover: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update the infrastructure
    Reconcile {
        /// Spec file (JSON)
        #[arg(long)]
        spec: PathBuf,

        /// State file (JSON), created if missing
        #[arg(long)]
        state: PathBuf,

        /// Keep reconciling every N seconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Delete the infrastructure
    Delete {
        #[arg(long)]
        state: PathBuf,

        /// Spec file, enables recovery of references missing from the state
        #[arg(long)]
        spec: Option<PathBuf>,
    },

    /// Print the state file
    ShowState {
        #[arg(long)]
        state: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_infra=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if let Command::ShowState { state } = &args.command {
        let state = InfraState::load(state).context("Failed to load state")?;
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let endpoint = args.endpoint.context("--endpoint is required")?;
    info!("Control plane endpoint: {}", endpoint);
    let client = Arc::new(
        RestClient::new(RestConfig {
            endpoint,
            username: args.username.context("--username is required")?,
            password: args.password.context("--password is required")?,
            insecure: args.insecure,
            timeout: Duration::from_secs(args.timeout),
        })
        .context("Failed to create control plane client")?,
    );
    let ensurer = InfraEnsurer::new(client.clone(), client).try_recover(!args.no_recover);

    match args.command {
        Command::Reconcile {
            spec,
            state,
            interval,
        } => {
            let spec = load_spec(&spec).await?;
            match interval {
                Some(secs) => reconcile_loop(&ensurer, &spec, &state, Duration::from_secs(secs)).await,
                None => reconcile(&ensurer, &spec, &state).await,
            }
        }
        Command::Delete { state, spec } => {
            let spec = match spec {
                Some(path) => Some(load_spec(&path).await?),
                None => None,
            };
            delete(&ensurer, spec.as_ref(), &state).await
        }
        Command::ShowState { .. } => Ok(()),
    }
}

async fn load_spec(path: &Path) -> Result<InfraSpec> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read spec {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("Invalid spec {}", path.display()))
}

/// One reconcile run. The state is saved whether or not it succeeded.
async fn reconcile(ensurer: &InfraEnsurer, spec: &InfraSpec, state_path: &Path) -> Result<()> {
    let mut state = InfraState::load(state_path).context("Failed to load state")?;
    let result = ensurer.ensure_infrastructure(spec, &mut state).await;
    state.save(state_path).context("Failed to save state")?;
    result.context("Reconcile failed")?;
    info!("Infrastructure reconciled: {}", spec.full_cluster_name());
    Ok(())
}

async fn reconcile_loop(
    ensurer: &InfraEnsurer,
    spec: &InfraSpec,
    state_path: &Path,
    interval: Duration,
) -> Result<()> {
    loop {
        if let Err(e) = reconcile(ensurer, spec, state_path).await {
            error!("{:#}", e);
        }

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, stopping");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn delete(ensurer: &InfraEnsurer, spec: Option<&InfraSpec>, state_path: &Path) -> Result<()> {
    let mut state = InfraState::load(state_path).context("Failed to load state")?;
    let result = ensurer.ensure_infrastructure_deleted(spec, &mut state).await;
    state.save(state_path).context("Failed to save state")?;
    result.context("Delete failed")?;
    info!("Infrastructure deleted");
    Ok(())
}
