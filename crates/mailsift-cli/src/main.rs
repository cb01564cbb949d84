mod cli;
mod config;
mod storage;

use clap::Parser;
use color_eyre::Result;
use mailsift_core::store::ProcessedStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::ConfigCommand;

/// Entry point wiring the CLI to the encrypted processed-mail ledger.
fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Status => {
            let store = storage::open_store(&config)?;
            println!("{} processed-mail records", store.record_count()?);
        }
        cli::Command::Check { message_id } => {
            let store = storage::open_store(&config)?;
            if store.is_processed(&message_id)? {
                println!("{message_id}: already processed");
            } else {
                println!("{message_id}: not processed");
            }
        }
        cli::Command::RotateKey => {
            let store = storage::open_store(&config)?;
            store.rotate_key()?;
            println!("Key rotated; store re-encrypted under the new key.");
        }
        cli::Command::Health => {
            let store = storage::open_store(&config)?;
            run_store_health(&store)?;
            println!("Storage: ok");
        }
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Version => print_version(),
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("mailsift {}", env!("CARGO_PKG_VERSION"));
}

/// A full decrypting read exercises the keyring, the cipher, and the
/// corruption-fallback path in one go.
fn run_store_health<S: ProcessedStore>(store: &S) -> Result<()> {
    let records = store.records()?;
    tracing::debug!(records = records.len(), "health check read the full collection");
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
