//! Command-line shell over the identity reconciliation core.
//!
//! # Responsibility
//! - Parse `(email?, phone?)` requests and print the resolved identity as
//!   JSON.
//! - List stored contacts for administrative inspection.
//!
//! # Usage
//!
//! ```bash
//! identity_cli --db contacts.sqlite3 identify --email a@x.com --phone-number 111
//! identity_cli --db contacts.sqlite3 list
//! ```

use clap::{Parser, Subcommand};
use identity_core::{
    core_version, default_log_level, init_logging, open_db_with, DbOptions, IdentityError,
    IdentityService, SqliteContactStore,
};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "identity_cli")]
#[command(version)]
#[command(about = "Resolve customer identities across email and phone touch-points")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file holding the contacts table
    #[arg(long, env = "IDENTITY_DB_PATH", default_value = "identity.sqlite3")]
    db: PathBuf,

    /// How long to wait for another writer before failing
    #[arg(long, env = "IDENTITY_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    busy_timeout_ms: u64,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, env = "IDENTITY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Absolute directory for rolling log files; logging is off when unset
    #[arg(long, env = "IDENTITY_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one observation and print the consolidated identity
    Identify {
        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone_number: Option<String>,
    },

    /// Print every stored contact
    List,

    /// Print the core library version
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            match err.downcast_ref::<IdentityError>() {
                Some(IdentityError::InvalidInput) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, &log_dir.to_string_lossy())?;
        info!(
            "event=cli_start module=cli status=ok core_version={}",
            core_version()
        );
    }

    if let Commands::Version = cli.command {
        println!("identity_core version={}", core_version());
        return Ok(());
    }

    let options = DbOptions {
        busy_timeout: Duration::from_millis(cli.busy_timeout_ms),
    };
    let mut conn = open_db_with(&cli.db, &options)?;
    let store = SqliteContactStore::try_new(&mut conn)?;
    let mut service = IdentityService::new(store);

    match cli.command {
        Commands::Identify {
            email,
            phone_number,
        } => {
            let view = service.resolve(email.as_deref(), phone_number.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::List => {
            let contacts = service.list_all()?;
            println!("{}", serde_json::to_string_pretty(&contacts)?);
        }
        Commands::Version => {}
    }

    Ok(())
}
