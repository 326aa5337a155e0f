//! Valet Operator - client-credential lifecycle management

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use prometheus::Registry;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use valet::azure::{AzureClientSecret, AzureProvider};
use valet::framework::{self, InstrumentedProvider, Provider};
use valet::mock::{ClientSecret, MockProvider};
use valet::server;

/// Valet - CRD-driven Kubernetes operator for client-credential rotation
#[derive(Parser, Debug)]
#[command(name = "valet", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Azure AD provider (default mode)
    Azure(RunArgs),

    /// Run the mock provider (for e2e testing without an identity provider)
    Mock(RunArgs),
}

/// Controller runtime arguments
#[derive(Parser, Debug)]
struct RunArgs {
    /// Metrics and health-probe endpoint bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for both provider CRDs
        let azure = serde_yaml::to_string(&AzureClientSecret::crd())?;
        let mock = serde_yaml::to_string(&ClientSecret::crd())?;
        println!("{azure}---\n{mock}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Mock(args)) => {
            run_controller(MockProvider::new(), args).await
        }
        Some(Commands::Azure(args)) => run_controller(AzureProvider::from_env()?, args).await,
        None => {
            run_controller(
                AzureProvider::from_env()?,
                RunArgs {
                    metrics_addr: "0.0.0.0:8080".parse()?,
                },
            )
            .await
        }
    }
}

/// Run the controller for the given provider until shutdown
async fn run_controller<P: Provider>(provider: P, args: RunArgs) -> anyhow::Result<()> {
    tracing::info!("valet controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?;

    let registry = Arc::new(Registry::new());
    let instrumented = InstrumentedProvider::new(provider, &registry)
        .map_err(|e| anyhow::anyhow!("failed to register provider metrics: {e}"))?;

    let metrics_server = tokio::spawn(server::serve(args.metrics_addr, registry));

    framework::run(client, instrumented).await;

    metrics_server.abort();
    tracing::info!("valet controller shutting down");
    Ok(())
}
