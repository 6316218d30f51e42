use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vrouter::config;
use vrouter::control::{ControlServer, Controller};
use vrouter::dataplane::Datapath;
use vrouter::telemetry::init_logging;
use vrouter::{Error, Result};

/// How often neighbor cache states are re-evaluated
const NEIGHBOR_AGING_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "vrouter")]
#[command(about = "Multi-tenant virtual router with overlay tunnels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the router daemon
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "vrouter.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a configuration file without applying it
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "vrouter.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config {
            action: ConfigAction::Validate { config },
        } => cmd_config_validate(&config),
        Commands::Run { config } => cmd_run(&config),
    };
    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config_path: &Path) -> Result<()> {
    let cfg = config::load(config_path)?;
    init_logging(Some(&cfg.log));
    info!(config = %config_path.display(), "vrouter starting");

    let validation = config::validate(&cfg);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if validation.has_errors() {
        validation.print_diagnostics();
        return Err(Error::Config("validation failed".into()));
    }

    let datapath = Arc::new(Datapath::new(
        cfg.vtep.to_vtep(),
        &cfg.vtep.uplink,
        cfg.limits.clone(),
    ));
    let controller = Arc::new(Controller::new(Arc::clone(&datapath)));
    config::apply(&cfg, &controller)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let server = ControlServer::new(cfg.control.clone(), controller);
        let mut aging = tokio::time::interval(NEIGHBOR_AGING_INTERVAL);

        let serve = server.run();
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(serve, interrupt);
        loop {
            tokio::select! {
                result = &mut serve => return result,
                _ = aging.tick() => {
                    for name in datapath.namespace_names() {
                        if let Some(ns) = datapath.namespace(&name) {
                            ns.neighbors.refresh_states();
                        }
                    }
                }
                _ = &mut interrupt => {
                    info!("interrupt received, shutting down");
                    return Ok(());
                }
            }
        }
    })
}

fn cmd_config_validate(config_path: &Path) -> Result<()> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path)?;
    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err(Error::Config("validation failed".into()))
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
