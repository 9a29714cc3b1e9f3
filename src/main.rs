use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use wallet_ledger::application::ledger::Ledger;
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::ports::SharedLedgerStore;
use wallet_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use wallet_ledger::infrastructure::notifier::TracingNotifier;
use wallet_ledger::interfaces::csv::command_reader::CommandReader;
use wallet_ledger::interfaces::csv::replay::CommandReplayer;
use wallet_ledger::interfaces::csv::wallet_writer::WalletWriter;
use wallet_ledger::telemetry::{self, LogFormat};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file. `LEDGER__*` environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn open_store(db_path: Option<PathBuf>) -> Result<SharedLedgerStore> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = wallet_ledger::infrastructure::rocksdb::RocksDBStore::open(&path).into_diagnostic()?;
            info!(path = %path.display(), "using RocksDB storage");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        None => {
            info!("using in-memory storage");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    let config = LedgerConfig::load(cli.config.as_deref()).into_diagnostic()?;
    let store = open_store(cli.db_path)?;
    let ledger = Ledger::new(store, config, Arc::new(TracingNotifier));
    let mut replayer = CommandReplayer::new(ledger.clone());

    // Process commands
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (row, command) in reader.commands().enumerate() {
        match command {
            Ok(command) => {
                if let Err(e) = replayer.apply(command).await {
                    error!(row = row + 1, "Error processing command: {e}");
                }
            }
            Err(e) => {
                error!(row = row + 1, "Error reading command: {e}");
            }
        }
    }

    let wallets = ledger.wallets_snapshot().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    Ok(())
}
