//! Command parsing and execution.

use pico_args::Arguments;
use rust_decimal::Decimal;
use uuid::Uuid;
use wallet_ledger::db::{Database, RequestContext};
use wallet_ledger::wallet::{ErrorKind, OperationRequest, WalletError, WalletService};

/// A single CLI invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create,
    Balance(Uuid),
    Operate(OperationRequest),
    Migrate,
}

/// Errors surfaced to `main`
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Migration failed: {0}")]
    Migrate(String),
}

impl Command {
    /// Parse the subcommand and its positional arguments
    pub fn parse(pargs: &mut Arguments) -> Result<Self, pico_args::Error> {
        let name = pargs.subcommand()?.ok_or(pico_args::Error::MissingArgument)?;

        match name.as_str() {
            "create" => Ok(Self::Create),
            "balance" => Ok(Self::Balance(pargs.free_from_fn(parse_wallet_id)?)),
            "deposit" => Ok(Self::Operate(OperationRequest::deposit(
                pargs.free_from_fn(parse_wallet_id)?,
                pargs.free_from_fn(parse_amount)?,
            ))),
            "withdraw" => Ok(Self::Operate(OperationRequest::withdraw(
                pargs.free_from_fn(parse_wallet_id)?,
                pargs.free_from_fn(parse_amount)?,
            ))),
            "migrate" => Ok(Self::Migrate),
            other => Err(pico_args::Error::ArgumentParsingFailed {
                cause: format!("unknown command '{other}'"),
            }),
        }
    }
}

/// Accept only the canonical hyphenated form
fn parse_wallet_id(raw: &str) -> Result<Uuid, String> {
    if raw.len() != 36 {
        return Err(format!("'{raw}' is not a canonical UUID"));
    }
    Uuid::parse_str(raw).map_err(|e| format!("'{raw}' is not a canonical UUID: {e}"))
}

/// Parse a decimal amount, refusing anything that would lose precision
fn parse_amount(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str_exact(raw.trim()).map_err(|e| format!("'{raw}' is not an exact decimal: {e}"))
}

/// Run a command and return what should be printed on stdout
pub async fn execute(
    db: &Database,
    ctx: &RequestContext,
    command: Command,
) -> Result<String, CommandError> {
    let service = WalletService::new(db.store());

    match command {
        Command::Create => {
            let wallet = service.create_wallet(ctx).await?;
            tracing::info!(wallet_id = %wallet.id, "Wallet created");
            Ok(wallet.id.to_string())
        }
        Command::Balance(wallet_id) => Ok(service.get_balance(wallet_id).await?.to_string()),
        Command::Operate(request) => {
            service.perform_operation(ctx, request).await?;
            tracing::info!(
                wallet_id = %request.wallet_id,
                operation = %request.operation_type,
                amount = %request.amount,
                "Operation committed"
            );
            // Read after commit; another session may already have moved it.
            Ok(service.get_balance(request.wallet_id).await?.to_string())
        }
        Command::Migrate => {
            db.migrate()
                .await
                .map_err(|e| CommandError::Migrate(e.to_string()))?;
            Ok("migrations applied".to_string())
        }
    }
}

/// Process exit code for a failed wallet operation
///
/// Retryable infrastructure failures use `EX_TEMPFAIL` so scripts can loop.
pub fn exit_code(err: &WalletError) -> i32 {
    if err.is_retryable() {
        return 75;
    }
    match err.kind() {
        ErrorKind::Validation => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::BusinessRule => 4,
        ErrorKind::Infrastructure => 5,
        ErrorKind::Consistency => 6,
        ErrorKind::Cancelled => 130,
    }
}
