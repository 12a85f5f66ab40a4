#![forbid(unsafe_code)]

//! **intentusnet-cli** – Operator surface for the IntentusNet runtime.
//!
//! Exit codes are part of the contract: 0 success/verified/consistent,
//! 1 failure/miss/corrupted/over-budget, 2 operator intervention required.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use intentusnet_contract::{CostEstimator, FlatRateEstimator};
use intentusnet_recovery::{BlockReason, RecoveryDecision, RecoveryError};
use intentusnet_runtime::{
    auth_token_from_env, auto_confirm_from_env, IntentusRuntime, RuntimeConfig, RuntimeMode,
};
use intentusnet_types::IntentEnvelope;
use intentusnet_wal::{wal_path, WalReader};

mod output;
use output::{render_list, render_value, OutputFormat};

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "intentusnet")]
#[command(about = "IntentusNet - deterministic execution runtime CLI")]
#[command(version)]
struct Cli {
    /// Base directory holding wal/, records/, locks/ and idempotency/
    #[arg(long, default_value = "intentusnet_data")]
    base_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Bearer token for destructive operations (required when
    /// INTENTUSNET_AUTH_TOKEN is set)
    #[arg(long)]
    auth_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute an intent envelope
    Route {
        /// Path to the envelope JSON file
        envelope: PathBuf,
    },
    /// Introspect recorded executions
    Executions {
        #[command(subcommand)]
        command: ExecutionsCommand,
    },
    /// Print the stored response of a past execution (no agent runs)
    Retrieve {
        /// Execution id
        execution_id: Uuid,
    },
    /// Manage incomplete executions
    Recovery {
        #[command(subcommand)]
        command: RecoveryCommand,
    },
    /// Inspect and verify execution WALs
    Wal {
        #[command(subcommand)]
        command: WalCommand,
    },
    /// Verify execution records
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },
    /// Pre-execution cost check against a budget
    Estimate {
        /// Path to the envelope JSON file
        envelope: PathBuf,
        /// Budget in cost units
        #[arg(long)]
        budget: f64,
    },
}

#[derive(Subcommand)]
enum ExecutionsCommand {
    /// List recorded executions
    List,
    /// Show one execution record in full
    Show { execution_id: Uuid },
    /// Show the WAL trace of one execution
    Trace { execution_id: Uuid },
    /// Compare the deterministic traces of two executions
    Diff { first: Uuid, second: Uuid },
}

#[derive(Subcommand)]
enum RecoveryCommand {
    /// Enumerate incomplete executions and their decisions
    Scan,
    /// Resume one incomplete execution (destructive)
    Resume { execution_id: Uuid },
    /// Abort one incomplete execution (destructive)
    Abort { execution_id: Uuid },
}

#[derive(Subcommand)]
enum WalCommand {
    /// Print every WAL entry
    Inspect { execution_id: Uuid },
    /// Verify sequence, hash chain and signatures
    Verify { execution_id: Uuid },
}

#[derive(Subcommand)]
enum RecordsCommand {
    /// Cross-check a record against its WAL
    Verify { execution_id: Uuid },
}

//─────────────────────────────
//  Main
//─────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::from(1);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = RuntimeConfig::at(&cli.base_dir);
    match cli.command {
        Commands::Route { envelope } => {
            refuse_in_read_only("route")?;
            let envelope = load_envelope(&envelope)?;
            let runtime = IntentusRuntime::new(config).await?;
            let outcome = runtime.submit(envelope).await?;
            info!(execution_id = %outcome.execution_id, "routed");
            render_value(
                cli.output,
                &json!({
                    "executionId": outcome.execution_id.to_string(),
                    "deduplicated": outcome.deduplicated,
                    "response": outcome.response,
                }),
            );
            Ok(if outcome.response.is_success() { 0 } else { 1 })
        }

        Commands::Executions { command } => {
            let runtime = IntentusRuntime::new(config).await?;
            handle_executions(&runtime, command, cli.output).await
        }

        Commands::Retrieve { execution_id } => {
            let runtime = IntentusRuntime::new(config).await?;
            match runtime.retrieve(execution_id).await {
                Ok(response) => {
                    render_value(cli.output, &serde_json::to_value(&response)?);
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("retrieve failed: {e}");
                    Ok(1)
                }
            }
        }

        Commands::Recovery { command } => {
            let runtime = IntentusRuntime::new(config).await?;
            handle_recovery(&runtime, command, cli.output, cli.auth_token.as_deref()).await
        }

        Commands::Wal { command } => handle_wal(&config, command, cli.output).await,

        Commands::Records { command } => {
            let runtime = IntentusRuntime::new(config).await?;
            let RecordsCommand::Verify { execution_id } = command;
            match runtime.verify_record(execution_id).await {
                Ok(record) => {
                    render_value(
                        cli.output,
                        &json!({
                            "executionId": execution_id.to_string(),
                            "consistent": true,
                            "recordHash": record.record_hash,
                        }),
                    );
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("record verification failed: {e}");
                    Ok(1)
                }
            }
        }

        Commands::Estimate { envelope, budget } => {
            let envelope = load_envelope(&envelope)?;
            let estimated = FlatRateEstimator::default().estimate(&envelope).await;
            let within = estimated <= budget;
            render_value(
                cli.output,
                &json!({
                    "intent": envelope.intent.to_string(),
                    "estimatedCost": estimated,
                    "budget": budget,
                    "withinBudget": within,
                }),
            );
            Ok(if within { 0 } else { 1 })
        }
    }
}

//─────────────────────────────
//  Command handlers
//─────────────────────────────

async fn handle_executions(
    runtime: &IntentusRuntime,
    command: ExecutionsCommand,
    output: OutputFormat,
) -> Result<u8> {
    match command {
        ExecutionsCommand::List => {
            let mut rows = Vec::new();
            for id in runtime.record_store().list().await? {
                let record = runtime.record_store().load(id).await?;
                rows.push(json!({
                    "executionId": id.to_string(),
                    "intent": record.intent.to_string(),
                    "status": record.response.status,
                    "events": record.events.len(),
                    "startedAt": record.started_at.to_rfc3339(),
                }));
            }
            render_list(output, &rows);
            Ok(0)
        }
        ExecutionsCommand::Show { execution_id } => {
            let record = runtime.record_store().load(execution_id).await?;
            render_value(output, &serde_json::to_value(&record)?);
            Ok(0)
        }
        ExecutionsCommand::Trace { execution_id } => {
            let rows = trace_rows(&runtime.config().wal_dir(), execution_id).await?;
            render_list(output, &rows);
            Ok(0)
        }
        ExecutionsCommand::Diff { first, second } => {
            let a = trace_rows(&runtime.config().wal_dir(), first).await?;
            let b = trace_rows(&runtime.config().wal_dir(), second).await?;
            let identical = deterministic_projection(&a) == deterministic_projection(&b);
            render_value(
                output,
                &json!({
                    "first": first.to_string(),
                    "second": second.to_string(),
                    "identicalTrace": identical,
                    "firstEntries": a.len(),
                    "secondEntries": b.len(),
                }),
            );
            Ok(0)
        }
    }
}

async fn handle_recovery(
    runtime: &IntentusRuntime,
    command: RecoveryCommand,
    output: OutputFormat,
    auth_token: Option<&str>,
) -> Result<u8> {
    match command {
        RecoveryCommand::Scan => {
            let incomplete = runtime.recovery().scan().await?;
            let mut needs_operator = false;
            let mut rows = Vec::new();
            for found in &incomplete {
                if let RecoveryDecision::Block { reason } = &found.decision {
                    needs_operator = true;
                    // Corrupted chains cannot be extended; everything else
                    // gets the blocked marker journaled.
                    if *reason != BlockReason::WalCorrupted {
                        runtime.recovery().mark_blocked(found.execution_id, *reason).await?;
                    }
                }
                rows.push(serde_json::to_value(found)?);
            }
            render_list(output, &rows);
            Ok(if needs_operator { 2 } else { 0 })
        }
        RecoveryCommand::Resume { execution_id } => {
            authorize_destructive("recovery resume", auth_token)?;
            let incomplete = runtime.recovery().scan().await?;
            let Some(found) = incomplete.iter().find(|e| e.execution_id == execution_id) else {
                eprintln!("execution {execution_id} is not incomplete");
                return Ok(2);
            };
            match runtime.recovery().resume(found, runtime.registry()).await {
                Ok(outcome) => {
                    render_value(
                        output,
                        &json!({
                            "executionId": execution_id.to_string(),
                            "outcome": format!("{outcome:?}"),
                        }),
                    );
                    Ok(0)
                }
                Err(RecoveryError::Blocked { reason, .. }) => {
                    eprintln!("execution {execution_id} is blocked: {reason}");
                    Ok(2)
                }
                Err(e) => Err(e.into()),
            }
        }
        RecoveryCommand::Abort { execution_id } => {
            authorize_destructive("recovery abort", auth_token)?;
            match runtime.recovery().abort(execution_id).await {
                Ok(_) => {
                    render_value(
                        output,
                        &json!({"executionId": execution_id.to_string(), "outcome": "Aborted"}),
                    );
                    Ok(0)
                }
                Err(RecoveryError::NotIncomplete(_)) => {
                    eprintln!("execution {execution_id} is not incomplete");
                    Ok(2)
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn handle_wal(
    config: &RuntimeConfig,
    command: WalCommand,
    output: OutputFormat,
) -> Result<u8> {
    match command {
        WalCommand::Inspect { execution_id } => {
            let rows = trace_rows(&config.wal_dir(), execution_id).await?;
            render_list(output, &rows);
            Ok(0)
        }
        WalCommand::Verify { execution_id } => {
            let path = wal_path(&config.wal_dir(), execution_id);
            match WalReader::verify(&path, None).await {
                Ok(outcome) => {
                    render_value(
                        output,
                        &json!({
                            "executionId": execution_id.to_string(),
                            "entries": outcome.entries.len(),
                            "truncated": outcome.truncated,
                            "verified": true,
                        }),
                    );
                    Ok(0)
                }
                Err(e) => {
                    eprintln!("WAL verification failed: {e}");
                    Ok(1)
                }
            }
        }
    }
}

//─────────────────────────────
//  Helpers
//─────────────────────────────

async fn trace_rows(wal_dir: &std::path::Path, execution_id: Uuid) -> Result<Vec<Value>> {
    let outcome = WalReader::read(&wal_path(wal_dir, execution_id))
        .await
        .with_context(|| format!("failed to read WAL for {execution_id}"))?;
    Ok(outcome
        .entries
        .iter()
        .map(|e| {
            json!({
                "seq": e.seq,
                "entryType": e.kind.as_str(),
                "agent": e.payload.get("agent").cloned().unwrap_or(Value::Null),
                "stepId": e.payload.get("stepId").cloned().unwrap_or(Value::Null),
                "timestamp": e.timestamp_iso,
            })
        })
        .collect())
}

/// The trace projection that must be identical across deterministic runs:
/// everything except timestamps.
fn deterministic_projection(rows: &[Value]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            json!({
                "seq": row["seq"],
                "entryType": row["entryType"],
                "agent": row["agent"],
                "stepId": row["stepId"],
            })
        })
        .collect()
}

fn load_envelope(path: &std::path::Path) -> Result<IntentEnvelope> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read envelope file '{}'", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("envelope file '{}' is not a valid envelope", path.display()))
}

fn refuse_in_read_only(operation: &str) -> Result<()> {
    if RuntimeMode::from_env() == RuntimeMode::ReadOnly {
        anyhow::bail!("'{operation}' is refused while INTENTUSNET_MODE=read_only");
    }
    Ok(())
}

fn authorize_destructive(operation: &str, provided: Option<&str>) -> Result<()> {
    refuse_in_read_only(operation)?;

    if let Some(expected) = auth_token_from_env() {
        match provided {
            Some(token) if token == expected => {}
            _ => anyhow::bail!("'{operation}' requires --auth-token matching INTENTUSNET_AUTH_TOKEN"),
        }
    }

    if !auto_confirm_from_env() {
        eprint!("{operation} is destructive. Proceed? [y/N] ");
        std::io::stderr().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            anyhow::bail!("'{operation}' aborted by operator");
        }
    }
    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    Ok(())
}
