//! Rogue - intercepting proxy core
//!
//! Command-line front end: root CA management, session listing and report
//! export.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rogue::app::Config;
use rogue::proxy::{CertificateAuthority, RootIdentity, RootSubject};
use rogue::reporting::SessionExporter;
use rogue::session::SessionStore;
use rogue::RogueError;

/// Intercepting proxy core
#[derive(Parser, Debug)]
#[command(name = "rogue")]
#[command(author, version, about = "Intercepting proxy core", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ROGUE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "ROGUE_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, global = true, env = "ROGUE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable JSON structured logging
    #[arg(long, global = true, env = "ROGUE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the root certificate authority
    Ca {
        #[command(subcommand)]
        action: CaAction,
    },

    /// List recorded sessions
    Sessions,

    /// Export a session as a Markdown report
    Export {
        /// Session file name, as listed by `rogue sessions`
        name: String,

        /// Report path (defaults to the session name with an .md extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum CaAction {
    /// Generate the root CA unless it already exists
    Init,
    /// Show the installed root CA
    Show,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the default configuration
    Generate,
    /// Load and validate the configuration
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle special commands first
    if matches!(cli.command, Command::Config { action: ConfigAction::Generate }) {
        return generate_default_config();
    }

    init_logging(&cli)?;

    let result = run(&cli);
    if let Err(e) = &result {
        if let Some(err) = e.downcast_ref::<RogueError>() {
            eprintln!("{}", err.user_message());
        }
    }
    result
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match &cli.command {
        Command::Ca { action } => {
            let ca = CertificateAuthority::from_config(&config.certificate);
            if let CaAction::Init = action {
                if ca.ensure(&RootSubject::from(&config.certificate))? {
                    println!("Generated a new root CA");
                } else {
                    println!("Root CA already present, leaving it untouched");
                }
            }
            let identity = ca.load()?;
            print_identity(&ca, &identity);
        }
        Command::Sessions => {
            let store = SessionStore::new(&config.logging.session_dir);
            let sessions = store.list()?;
            if sessions.is_empty() {
                println!("No sessions in {}", store.dir().display());
            }
            for name in sessions {
                println!("{}", name);
            }
        }
        Command::Export { name, output } => {
            let output = output
                .clone()
                .unwrap_or_else(|| Path::new(name).with_extension("md"));
            let exporter = SessionExporter::new(SessionStore::new(&config.logging.session_dir));
            let sections = exporter.render(name, &output)?;
            println!("Wrote {} sections to {}", sections, output.display());
        }
        Command::Config { action } => match action {
            ConfigAction::Generate => generate_default_config()?,
            ConfigAction::Validate => {
                config.validate().context("Configuration is invalid")?;
                println!("Configuration is valid");
            }
        },
    }

    Ok(())
}

fn print_identity(ca: &CertificateAuthority, identity: &RootIdentity) {
    let info = identity.info();
    println!(
        "Subject:     O={}, CN={}",
        info.organization.as_deref().unwrap_or("-"),
        info.common_name.as_deref().unwrap_or("-")
    );
    println!("Serial:      {}", info.serial);
    println!(
        "Valid:       {} to {} ({} days)",
        info.not_before.format("%Y-%m-%d %H:%M:%S UTC"),
        info.not_after.format("%Y-%m-%d %H:%M:%S UTC"),
        info.validity_days()
    );
    println!("CA:          {}", if info.is_ca { "yes" } else { "no" });
    println!("Certificate: {}", ca.cert_path().display());
    println!("Key:         {}", ca.key_path().display());
}

/// Initialize logging; output goes to stderr so command output stays clean
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        // File-based logging with daily rotation
        let dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let filename = log_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("rogue.log");
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, filename);

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);

            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false);

            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// Print the default configuration as TOML
fn generate_default_config() -> Result<()> {
    let toml = Config::default()
        .to_toml()
        .context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}
