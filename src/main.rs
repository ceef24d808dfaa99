use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{
    builder::{OsStringValueParser, PossibleValuesParser, TypedValueParser},
    Parser,
};
use kubewatch::{
    config::{self, BackoffSettings},
    reflector, registry, KubeTransport, Printer, Reflector, ResourceKind, Settings,
};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kubewatch", version, about = "Watches Kubernetes resources via its API.")]
struct CliArgs {
    /// Path to the kubeconfig file [default: $HOME/.kube/config if present, otherwise in-cluster].
    /// Pass an empty path to force the in-cluster configuration.
    #[arg(long, value_parser = OsStringValueParser::new().map(PathBuf::from))]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one.
    #[arg(long)]
    context: Option<String>,

    /// Set the resource type to be watched.
    #[arg(
        long,
        default_value = "services",
        value_parser = PossibleValuesParser::new(ResourceKind::NAMES.iter().copied())
            .try_map(|name| name.parse::<ResourceKind>()),
    )]
    resource: ResourceKind,

    /// Set the namespace to be watched [default: all namespaces].
    #[arg(long)]
    namespace: Option<String>,

    /// Maximum number of objects per list request.
    #[arg(long, default_value_t = 500)]
    page_size: u32,

    /// Server-side timeout of each watch request, in seconds.
    #[arg(long, default_value_t = config::MAX_WATCH_TIMEOUT)]
    watch_timeout: u32,

    /// Delay before the first reconnect attempt, in milliseconds.
    #[arg(long, default_value_t = 800)]
    backoff_initial_ms: u64,

    /// Upper bound on the reconnect delay, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    backoff_max_ms: u64,

    #[arg(long, default_value_t = log::LevelFilter::Info)]
    log_level: log::LevelFilter,
}

impl CliArgs {
    fn into_settings(self) -> Settings {
        Settings {
            kubeconfig: config::resolve_kubeconfig(self.kubeconfig, std::env::var_os("HOME")),
            context: self.context,
            namespace: self.namespace,
            page_size: self.page_size,
            watch_timeout: self.watch_timeout,
            backoff: BackoffSettings {
                initial: Duration::from_millis(self.backoff_initial_ms),
                max: Duration::from_millis(self.backoff_max_ms),
            },
            ..Settings::new(self.resource)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();
    env_logger::builder()
        .filter_level(cli_args.log_level)
        .init();

    match run(cli_args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("kubewatch: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<(), anyhow::Error> {
    registry::validate().context("invalid resource registry")?;

    let settings = args.into_settings();
    settings.validate()?;
    let client = config::client(&settings).await?;

    info!(
        "watching {} in {}",
        settings.resource,
        settings.namespace().unwrap_or("all namespaces")
    );
    let transport = KubeTransport::new(client, &settings);
    let printer = Printer::stdout(settings.resource);
    let handle = reflector::spawn(Reflector::new(transport, printer, settings.backoff.into()));

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("shutting down");
    handle.stop().await;
    Ok(())
}
