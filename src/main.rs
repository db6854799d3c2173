//! Gaoler - FreeBSD jail lifecycle orchestrator
//!
//! Thin operator front-end over the library: loads a TOML manifest and
//! drives each selected jail through the orchestrator.

use gaoler::cli::{Cli, Commands};
use gaoler::manifest::{self, GaolerConfig, JailDef};
use gaoler::process::{HostRunner, Runner};
use gaoler::zfs::{Storage, ZfsStorage};
use gaoler::{Error, Jail, Orchestrator, Result, StartOutcome, StopOutcome};
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        // Commands that don't require config
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }

        Commands::Check => {
            let config = manifest::load(&cli.config)?;
            let app = App::new(&config);
            check(&config, &app)
        }

        Commands::Status { jail } => {
            let config = manifest::load(&cli.config)?;
            let app = App::new(&config);

            println!("{:<20} {:<38} {:<10}", "NAME", "UUID", "STATE");
            println!("{}", "-".repeat(70));
            for def in config.select(jail.as_deref())? {
                let state = app
                    .jail(def)?
                    .map(|mut j| app.orchestrator.status(&mut j).to_string());
                println!(
                    "{:<20} {:<38} {:<10}",
                    def.name,
                    def.uuid.as_deref().unwrap_or("-"),
                    state.as_deref().unwrap_or("Offline")
                );
            }
            Ok(())
        }

        Commands::Start { jail, all } => {
            let config = manifest::load(&cli.config)?;
            let app = App::new(&config);
            for def in targets(&config, jail.as_deref(), all)? {
                app.start(def)?;
            }
            Ok(())
        }

        Commands::Stop { jail, all } => {
            let config = manifest::load(&cli.config)?;
            let app = App::new(&config);
            // Reverse manifest order
            for def in targets(&config, jail.as_deref(), all)?.into_iter().rev() {
                app.stop(def)?;
            }
            Ok(())
        }

        Commands::Restart { jail, all } => {
            let config = manifest::load(&cli.config)?;
            let app = App::new(&config);
            for def in targets(&config, jail.as_deref(), all)? {
                app.stop(def)?;
                app.start(def)?;
            }
            Ok(())
        }
    }
}

/// Jails a lifecycle command applies to; also warns when not running as root
fn targets<'a>(config: &'a GaolerConfig, jail: Option<&str>, all: bool) -> Result<Vec<&'a JailDef>> {
    if jail.is_none() && !all {
        return Err(Error::ConfigValidation(
            "Specify a jail name or use --all".into(),
        ));
    }

    if !nix::unistd::geteuid().is_root() {
        eprintln!("Warning: not running as root, jail operations will likely fail");
    }

    config.select(jail)
}

/// Wired-up host collaborators for one manifest
struct App<'a> {
    config: &'a GaolerConfig,
    runner: Arc<dyn Runner>,
    orchestrator: Orchestrator,
}

impl<'a> App<'a> {
    fn new(config: &'a GaolerConfig) -> Self {
        let runner: Arc<dyn Runner> = Arc::new(HostRunner::new().with_timeout(config.config.timeout()));
        let storage: Arc<dyn Storage> = Arc::new(ZfsStorage::new(Arc::clone(&runner)));
        let orchestrator = Orchestrator::new(Arc::clone(&runner), storage);

        Self {
            config,
            runner,
            orchestrator,
        }
    }

    /// Build the in-memory jail; `None` if it has no identity yet
    fn jail(&self, def: &JailDef) -> Result<Option<Jail>> {
        if def.uuid.is_none() {
            return Ok(None);
        }

        let mut jail = def.to_jail(&self.config.config, &self.runner)?;
        if def.boot_environments {
            jail.load_boot_environments(self.orchestrator.storage())?;
        }
        Ok(Some(jail))
    }

    /// A jail that can be driven through its lifecycle
    fn managed(&self, def: &JailDef) -> Result<Jail> {
        self.jail(def)?.ok_or_else(|| {
            Error::ConfigValidation(format!(
                "Jail '{}' has no uuid; run 'gaoler check' for a suggestion",
                def.name
            ))
        })
    }

    fn start(&self, def: &JailDef) -> Result<()> {
        let mut jail = self.managed(def)?;
        println!("Starting jail '{}'...", def.name);
        match self.orchestrator.boot(&mut jail)? {
            StartOutcome::Started => println!("Jail '{}' started", def.name),
            StartOutcome::AlreadyOnline => println!("Jail '{}' is already running", def.name),
        }
        Ok(())
    }

    fn stop(&self, def: &JailDef) -> Result<()> {
        let mut jail = self.managed(def)?;
        println!("Stopping jail '{}'...", def.name);
        match self.orchestrator.stop(&mut jail)? {
            StopOutcome::Stopped => println!("Jail '{}' stopped", def.name),
            StopOutcome::AlreadyOffline => println!("Jail '{}' is not running", def.name),
            StopOutcome::SupervisorGone => {
                println!("Jail '{}' had already exited; cleaned up its mounts and devices", def.name)
            }
        }
        Ok(())
    }
}

/// Validate the manifest and report each jail's identity and root path
fn check(config: &GaolerConfig, app: &App<'_>) -> Result<()> {
    println!("Configuration is valid.");

    println!("\nJails:");
    for def in &config.jails {
        let mut jail = match app.jail(def) {
            Ok(Some(jail)) => jail,
            Ok(None) => {
                println!(
                    "  {}: no uuid (suggested: uuid = \"{}\")",
                    def.name,
                    Uuid::new_v4()
                );
                continue;
            }
            Err(e) => {
                println!("  {}: {}", def.name, e);
                continue;
            }
        };

        match app.orchestrator.validate(&mut jail) {
            Ok(path) => println!("  {}: {} -> {}", def.name, jail.uuid, path.display()),
            Err(e) => println!("  {}: {} ({})", def.name, jail.uuid, e),
        }
    }

    Ok(())
}
