use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::api::DynamicObject;
use autovpa::{controller, crd::VPAConfig, Error};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show a summary of configured namespaces and managed VPAs
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Seconds between periodic full re-sync passes
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 300)]
    resync_interval_secs: u64,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to inspect (all namespaces when omitted)
    #[arg(long, env = "INSPECT_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("autovpa Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let configs: kube::Api<VPAConfig> = match &args.namespace {
        Some(namespace) => kube::Api::namespaced(client.clone(), namespace),
        None => kube::Api::all(client.clone()),
    };
    let configs = configs
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;
    println!("VPAConfig resources: {}", configs.items.len());

    let ar = controller::vpa::vpa_api_resource();
    let vpas: kube::Api<DynamicObject> = match &args.namespace {
        Some(namespace) => kube::Api::namespaced_with(client, namespace, &ar),
        None => kube::Api::all_with(client, &ar),
    };
    match vpas.list(&Default::default()).await {
        Ok(vpas) => {
            let managed = vpas
                .items
                .iter()
                .filter(|vpa| controller::vpa::owner_of(vpa).is_some())
                .count();
            println!("Managed VerticalPodAutoscalers: {}", managed);
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("Managed VerticalPodAutoscalers: 0 (VPA CRD not installed)");
        }
        Err(e) => return Err(Error::KubeError(e)),
    }

    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }

    if args.resync_interval_secs == 0 {
        return Err(Error::ConfigError(
            "resync interval must be at least 1 second".to_string(),
        ));
    }

    info!("Starting autovpa operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let state = Arc::new(controller::ControllerState {
        client,
        cache: controller::ConfigCache::new(),
        resync_interval: Duration::from_secs(args.resync_interval_secs),
    });

    controller::run_operator(state).await
}
