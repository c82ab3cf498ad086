//! Operator CLI for the wallet ledger.
//!
//! Creates wallets, reads balances, applies deposits and withdrawals, and
//! runs the schema migrations against the configured PostgreSQL database.

mod commands;
mod config;
mod logging;

use anyhow::Error;
use ctrlc::set_handler;
use pico_args::Arguments;
use tracing::{error, info, warn};
use wallet_ledger::db::Database;

use commands::{Command, CommandError};
use config::CtlConfig;

const HELP: &str = "\
Operate on the wallet ledger

USAGE:
  walletctl [OPTIONS] <COMMAND>

COMMANDS:
  create                       Create a wallet with zero balance; prints its id
  balance  <WALLET_ID>         Print the committed balance
  deposit  <WALLET_ID> <AMOUNT>  Add AMOUNT; prints the balance afterwards
  withdraw <WALLET_ID> <AMOUNT>  Remove AMOUNT; prints the balance afterwards
  migrate                      Apply pending schema migrations

OPTIONS:
  --db-url      URL            Database connection string  [default: env DATABASE_URL]
  --timeout-ms  MS             Deadline for the whole command  [default: env WALLETCTL_TIMEOUT_MS or none]
  --log         FILTER         Log filter directive  [default: env RUST_LOG or info,sqlx=warn]

FLAGS:
  -h, --help                   Print help information

ENVIRONMENT:
  DATABASE_URL                 PostgreSQL connection string
  DB_LOCK_TIMEOUT_MS           Row lock wait in milliseconds (default: 5000)
  DB_QUERY_TIMEOUT_MS          Read timeout in milliseconds (default: 5000)
  (See .env file for all configuration options)

EXIT CODES:
  2 invalid input, 3 wallet not found, 4 business rule violated,
  5 database failure, 6 consistency failure, 75 retryable, 130 cancelled
";

struct Args {
    database_url: Option<String>,
    timeout_ms: Option<u64>,
    log_filter: Option<String>,
    command: Command,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        database_url: pargs.opt_value_from_str("--db-url")?,
        timeout_ms: pargs.opt_value_from_str("--timeout-ms")?,
        log_filter: pargs.opt_value_from_str("--log")?,
        command: Command::parse(&mut pargs)?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        anyhow::bail!("Unexpected arguments: {remaining:?}\n\n{HELP}");
    }

    logging::init(args.log_filter.as_deref());

    let config = CtlConfig::from_env(args.database_url, args.timeout_ms)?;
    config.validate()?;

    // Catching signals for cancellation; the open transaction rolls back.
    let (ctx, cancel) = config.request_context().cancellable();
    set_handler(move || {
        warn!("Interrupt received, cancelling");
        cancel.cancel();
    })?;

    let db = Database::new(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
    info!("Database connected successfully");

    let outcome = commands::execute(&db, &ctx, args.command).await;
    db.close().await;

    match outcome {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(CommandError::Wallet(err)) => {
            error!(kind = ?err.kind(), retryable = err.is_retryable(), "{err}");
            eprintln!("error: {}", err.client_message());
            std::process::exit(commands::exit_code(&err));
        }
        Err(err @ CommandError::Migrate(_)) => Err(err.into()),
    }
}
