use clap::Parser;
use siren_core::Dispatcher;
use siren_schema::{parse_config_file, SirenConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tiny_http::Server;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "siren-server", about = "Siren dispatch coordinator HTTP server")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Directory holding the Siren store.
    #[arg(long, default_value = "./siren-data")]
    store: PathBuf,

    /// Config file (defaults to <store>/siren.toml, then built-in defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of request worker threads.
    #[arg(long, default_value_t = siren_server::DEFAULT_WORKERS)]
    workers: usize,
}

fn load_config(cli: &Cli) -> Result<SirenConfig, String> {
    let path = cli
        .config
        .clone()
        .or_else(|| Some(cli.store.join("siren.toml")).filter(|p| p.is_file()));
    match path {
        Some(path) => {
            info!("config: {}", path.display());
            parse_config_file(&path).map_err(|e| e.to_string())
        }
        None => Ok(SirenConfig::default()),
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = load_config(cli)?;
    let dispatcher = Dispatcher::open(&cli.store, &config).map_err(|e| e.to_string())?;
    let report = dispatcher.provision(&config).map_err(|e| e.to_string())?;
    if !report.is_empty() {
        info!(
            "provisioned units {:?} and items {:?}",
            report.units_created, report.items_created
        );
    }
    let dispatcher = Arc::new(dispatcher);

    let addr = format!("{}:{}", cli.host, cli.port);
    let server = Arc::new(Server::http(&addr).map_err(|e| format!("bind {addr}: {e}"))?);
    info!("starting siren-server on {addr}");
    info!("store directory: {}", cli.store.display());

    let workers = cli.workers.max(1);
    let handles = siren_server::spawn_workers(&server, &dispatcher, workers)
        .map_err(|e| format!("spawn workers: {e}"))?;

    let stopper = Arc::clone(&server);
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        siren_server::shutdown(&stopper, workers);
    })
    .map_err(|e| format!("install signal handler: {e}"))?;

    for handle in handles {
        if handle.join().is_err() {
            error!("HTTP worker panicked");
        }
    }
    info!("siren-server stopped");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            error!("{msg}");
            ExitCode::FAILURE
        }
    }
}
