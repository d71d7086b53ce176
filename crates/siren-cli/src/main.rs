mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::Failure;
use siren_core::{Dispatcher, MaintenanceAction, TransitionKind};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "siren",
    version,
    about = "Ambulance dispatch coordinator: incidents, units and supplies"
)]
struct Cli {
    /// Store directory shared by every siren process on this host.
    #[arg(long, default_value = "~/.local/share/siren", global = true)]
    store: String,

    /// Config file (defaults to <store>/siren.toml, then built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print records and errors as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log at trace level.
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision the configured fleet and inventory (idempotent).
    Init {
        /// Overwrite the store's siren.toml with the effective config.
        #[arg(long)]
        force: bool,
    },
    /// Open a new incident.
    Create {
        /// Incident ID.
        id: String,
        #[arg(long, default_value_t = 50.0, allow_negative_numbers = true)]
        x: f64,
        #[arg(long, default_value_t = 50.0, allow_negative_numbers = true)]
        y: f64,
    },
    /// Send a unit to a pending incident.
    Dispatch {
        /// Incident ID.
        id: String,
        /// Unit ID.
        unit: String,
    },
    /// Mark the bound unit as on scene.
    Arrive {
        id: String,
        /// Must match the bound unit when given.
        #[arg(long)]
        unit: Option<String>,
    },
    /// Mark the bound unit as transporting the patient.
    Transport {
        id: String,
        #[arg(long)]
        unit: Option<String>,
    },
    /// Close the incident and return the unit to base.
    Close {
        id: String,
        #[arg(long)]
        unit: Option<String>,
    },
    /// Fill a unit's tank.
    Refuel { unit: String },
    /// Restore a unit's health.
    Repair { unit: String },
    /// Restock a unit from inventory (one of each restock item).
    Restock { unit: String },
    /// Show stock levels, or adjust one item by a signed delta.
    Stock {
        /// Item key.
        key: Option<String>,
        /// Signed quantity change.
        #[arg(requires = "key", allow_negative_numbers = true)]
        delta: Option<i64>,
    },
    /// Show units, inventory, open incidents and recent closures.
    Status {
        /// Number of closed incidents to list.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one incident.
    Incident { id: String },
    /// Show one unit's status and readiness.
    Unit { id: String },
    /// Verify record checksums and cross-record invariants.
    VerifyStore,
    /// Print a shell completion script.
    Completions { shell: Shell },
}

/// `siren status | head` closes stdout early; exit quietly instead of
/// panicking on the failed print.
fn exit_quietly_on_closed_pipe() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        let closed = ["Broken pipe", "broken pipe", "os error 32", "failed printing to stdout"]
            .iter()
            .any(|needle| msg.contains(needle));
        if closed {
            std::process::exit(0);
        }
        previous(info);
    }));
}

fn main() -> ExitCode {
    exit_quietly_on_closed_pipe();
    let cli = Cli::parse();

    let level = match (cli.trace, cli.verbose) {
        (true, _) => "trace",
        (false, true) => "debug",
        (false, false) => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SIREN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let store_path = expand_tilde(&cli.store);
    let json = cli.json;

    match run(cli.command, &store_path, cli.config.as_deref(), json) {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            if json {
                eprintln!("{}", failure.to_json());
            } else {
                eprintln!("error: {}", failure.message);
            }
            ExitCode::from(failure.code)
        }
    }
}

fn run(
    command: Commands,
    store: &Path,
    config_path: Option<&Path>,
    json: bool,
) -> Result<u8, Failure> {
    use commands::{incident, maintain};

    let config = || commands::load_config(store, config_path);
    let open = || -> Result<Dispatcher, Failure> {
        commands::open_dispatcher(store, &config()?)
    };

    match command {
        Commands::Init { force } => commands::init::run(store, &config()?, force, json),
        Commands::Create { id, x, y } => incident::create(&open()?, &id, x, y, json),
        Commands::Dispatch { id, unit } => {
            incident::transition(&open()?, &id, TransitionKind::Dispatch, Some(&unit), json)
        }
        Commands::Arrive { id, unit } => {
            incident::transition(&open()?, &id, TransitionKind::Arrive, unit.as_deref(), json)
        }
        Commands::Transport { id, unit } => incident::transition(
            &open()?,
            &id,
            TransitionKind::Transport,
            unit.as_deref(),
            json,
        ),
        Commands::Close { id, unit } => {
            incident::transition(&open()?, &id, TransitionKind::Close, unit.as_deref(), json)
        }
        Commands::Refuel { unit } => {
            maintain::run(&open()?, &unit, MaintenanceAction::Refuel, json)
        }
        Commands::Repair { unit } => {
            maintain::run(&open()?, &unit, MaintenanceAction::Repair, json)
        }
        Commands::Restock { unit } => {
            maintain::run(&open()?, &unit, MaintenanceAction::Restock, json)
        }
        Commands::Stock { key, delta } => {
            commands::stock::run(&open()?, key.as_deref(), delta, json)
        }
        Commands::Status { limit } => commands::status::run(&open()?, limit, json),
        Commands::Incident { id } => incident::show(&open()?, &id, json),
        Commands::Unit { id } => maintain::show(&open()?, &id, json),
        Commands::VerifyStore => commands::verify_store::run(store, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
