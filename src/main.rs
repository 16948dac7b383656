//! cash-core CLI: a subprocess-invoked front end over the orchestrator
//! control surface (§6). Each subcommand opens the database, applies
//! config defaults, runs exactly one operation, prints a JSON result
//! document to stdout, and maps internal failures onto the exit codes
//! below. Progress events are written to stderr as
//! `PROGRESS:<percent>:<message>` so a caller can stream status without
//! parsing stdout.

use anyhow::{Context, Result};
use cash_core::compliance;
use cash_core::config::{self, Bootstrap, Config};
use cash_core::db;
use cash_core::model::{AccountType, ResearchQueueStatus, Stage};
use cash_core::orchestrator::Orchestrator;
use cash_core::research_queue;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cash-core", about = "Savings-product catalog pipeline and depositor-protection compliance engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run stages A-F over one feed file.
    ProcessFile {
        path: PathBuf,
        #[arg(long)]
        stop_after: Option<String>,
    },
    /// Run stages D-F over the full raw table, without re-reading any file.
    RebuildFromRaw,
    /// Report the last known progress event for a batch.
    GetProgress { batch_id: String },
    /// Request cancellation of a running or queued batch.
    Cancel { batch_id: String },
    /// Dump the audit trail for a batch, optionally scoped to one stage.
    GetAudit {
        batch_id: String,
        #[arg(long)]
        stage: Option<String>,
    },
    /// Inspect or resolve entries in the unmatched-bank-name research queue.
    ResearchQueue {
        #[command(subcommand)]
        action: ResearchQueueAction,
    },
    /// Depositor-protection compliance engine (read-only).
    Compliance {
        #[command(subcommand)]
        action: ComplianceAction,
    },
}

#[derive(Subcommand, Debug)]
enum ResearchQueueAction {
    List,
    Resolve { name: String },
    Dismiss { name: String },
}

#[derive(Subcommand, Debug)]
enum ComplianceAction {
    Report,
    Plan {
        #[arg(long = "account-type")]
        account_type: Option<String>,
    },
}

fn main() -> ExitCode {
    load_env();
    init_tracing();

    match run() {
        Ok(RunOutcome::Success(value)) => {
            print_result(&value);
            ExitCode::from(0)
        }
        Ok(RunOutcome::Warning(value)) => {
            print_result(&value);
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "command failed");
            print_result(&serde_json::json!({ "error": e.to_string() }));
            ExitCode::from(2)
        }
    }
}

enum RunOutcome {
    Success(serde_json::Value),
    Warning(serde_json::Value),
}

fn run() -> Result<RunOutcome> {
    let cli = Cli::parse();
    let bootstrap = Bootstrap::from_env().context("reading process bootstrap")?;
    let mut conn = db::open(&bootstrap.database_path).context("opening database")?;
    config::ensure_defaults(&conn).context("seeding default config")?;
    let mut cfg = Config::load(&conn).context("loading config")?;

    match cli.command {
        Command::ProcessFile { path, stop_after } => {
            let stop_after_stage = stop_after
                .as_deref()
                .map(|s| {
                    Stage::from_str_loose(s)
                        .with_context(|| format!("unrecognized --stop-after value: {s}"))
                })
                .transpose()?;

            let orchestrator = Orchestrator::new();
            let summary = orchestrator.process_file(&mut conn, &mut cfg, &path, stop_after_stage, |event| {
                eprintln!("PROGRESS:{}:{}", event.percent, event.message);
                info!(batch_id = %event.batch_id, stage = ?event.stage, percent = event.percent, "{}", event.message);
            })?;

            let value = serde_json::to_value(&summary)?;
            if summary.committed == 0 && summary.records_read == 0 {
                Ok(RunOutcome::Warning(value))
            } else {
                Ok(RunOutcome::Success(value))
            }
        }
        Command::RebuildFromRaw => {
            let orchestrator = Orchestrator::new();
            let summary = orchestrator.rebuild_from_raw(&mut conn, &mut cfg)?;
            let value = serde_json::to_value(&summary)?;
            if summary.records_read == 0 {
                Ok(RunOutcome::Warning(value))
            } else {
                Ok(RunOutcome::Success(value))
            }
        }
        Command::GetProgress { batch_id } => {
            let orchestrator = Orchestrator::new();
            let event = orchestrator.get_progress(&conn, &batch_id)?;
            Ok(RunOutcome::Success(serde_json::to_value(&event)?))
        }
        Command::Cancel { batch_id } => {
            let orchestrator = Orchestrator::new();
            orchestrator.cancel(&conn, &batch_id)?;
            Ok(RunOutcome::Success(serde_json::json!({ "batch_id": batch_id, "cancel_requested": true })))
        }
        Command::GetAudit { batch_id, stage } => {
            let stage = stage
                .as_deref()
                .map(|s| {
                    Stage::from_str_loose(s).with_context(|| format!("unrecognized --stage value: {s}"))
                })
                .transpose()?;
            let orchestrator = Orchestrator::new();
            let audit = orchestrator.get_audit(&conn, &batch_id, stage)?;
            Ok(RunOutcome::Success(audit))
        }
        Command::ResearchQueue { action } => match action {
            ResearchQueueAction::List => {
                let entries = research_queue::list(&conn, Some(ResearchQueueStatus::Open))?;
                let value = serde_json::to_value(&entries)?;
                if entries.is_empty() {
                    Ok(RunOutcome::Warning(value))
                } else {
                    Ok(RunOutcome::Success(value))
                }
            }
            ResearchQueueAction::Resolve { name } => {
                let found = research_queue::set_status(&conn, &name, ResearchQueueStatus::Resolved)?;
                let value = serde_json::json!({ "name": name, "found": found });
                if found {
                    Ok(RunOutcome::Success(value))
                } else {
                    Ok(RunOutcome::Warning(value))
                }
            }
            ResearchQueueAction::Dismiss { name } => {
                let found = research_queue::set_status(&conn, &name, ResearchQueueStatus::Dismissed)?;
                let value = serde_json::json!({ "name": name, "found": found });
                if found {
                    Ok(RunOutcome::Success(value))
                } else {
                    Ok(RunOutcome::Warning(value))
                }
            }
        },
        Command::Compliance { action } => match action {
            ComplianceAction::Report => {
                let report = compliance::compute_report(&conn, &cfg)?;
                let value = serde_json::to_value(&report)?;
                if !report.warnings.is_empty() {
                    Ok(RunOutcome::Warning(value))
                } else {
                    Ok(RunOutcome::Success(value))
                }
            }
            ComplianceAction::Plan { account_type } => {
                let account_type_filter = account_type
                    .as_deref()
                    .map(|s| {
                        AccountType::from_loose(s)
                            .with_context(|| format!("unrecognized --account-type value: {s}"))
                    })
                    .transpose()?;

                let report = compliance::compute_report(&conn, &cfg)?;
                let candidates = load_catalog_candidates(&conn)?;
                let prefs = cash_core::compliance::limits::load_institution_prefs(&conn)?;
                let plans = compliance::plan_diversification(
                    &report.exposures,
                    &candidates,
                    &prefs,
                    account_type_filter,
                    &cfg,
                );
                let value = serde_json::to_value(&plans)?;
                if plans.is_empty() {
                    Ok(RunOutcome::Warning(value))
                } else {
                    Ok(RunOutcome::Success(value))
                }
            }
        },
    }
}

/// Loads the current `products` catalog for use as diversification targets.
/// Deliberately separate from `model::RawProduct` loading in the
/// orchestrator: this reads the *committed* catalog, not the raw staging
/// table, since only committed products are valid move-to targets.
fn load_catalog_candidates(conn: &rusqlite::Connection) -> Result<Vec<cash_core::model::CatalogProduct>> {
    use cash_core::model::CatalogProduct;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    let mut stmt = conn.prepare(
        "SELECT id, source, method, platform, raw_platform, bank_name, account_type, aer_rate,
                gross_rate, term_months, notice_period_days, min_deposit, max_deposit,
                fscs_protected, special_features, scrape_date, regulator_id, confidence_score,
                business_key, batch_id, quality_score
         FROM products",
    )?;
    let rows = stmt.query_map([], |row| {
        let account_type_raw: String = row.get(6)?;
        let aer_rate_raw: String = row.get(7)?;
        let gross_rate_raw: Option<String> = row.get(8)?;
        let min_deposit_raw: String = row.get(11)?;
        let max_deposit_raw: Option<String> = row.get(12)?;
        let scrape_date_raw: String = row.get(15)?;
        Ok((
            row.get::<_, Option<i64>>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            account_type_raw,
            aer_rate_raw,
            gross_rate_raw,
            row.get::<_, Option<i64>>(9)?,
            row.get::<_, Option<i64>>(10)?,
            min_deposit_raw,
            max_deposit_raw,
            row.get::<_, i64>(13)?,
            row.get::<_, Option<String>>(14)?,
            scrape_date_raw,
            row.get::<_, Option<String>>(16)?,
            row.get::<_, f64>(17)?,
            row.get::<_, String>(18)?,
            row.get::<_, String>(19)?,
            row.get::<_, f64>(20)?,
        ))
    })?;

    let mut products = Vec::new();
    for row in rows {
        let (
            id,
            source,
            method,
            platform,
            raw_platform,
            bank_name,
            account_type_raw,
            aer_rate_raw,
            gross_rate_raw,
            term_months,
            notice_period_days,
            min_deposit_raw,
            max_deposit_raw,
            fscs_protected,
            special_features,
            scrape_date_raw,
            regulator_id,
            confidence_score,
            business_key,
            batch_id,
            quality_score,
        ) = row.context("reading products row")?;

        let Some(account_type) = AccountType::from_loose(&account_type_raw) else {
            continue;
        };
        let Ok(aer_rate) = Decimal::from_str(&aer_rate_raw) else {
            continue;
        };
        let min_deposit = Decimal::from_str(&min_deposit_raw).unwrap_or(Decimal::ZERO);
        let scrape_date = scrape_date_raw.parse().unwrap_or_else(|_| chrono::Utc::now());

        products.push(CatalogProduct {
            id,
            source,
            method,
            platform,
            raw_platform,
            bank_name,
            account_type,
            aer_rate,
            gross_rate: gross_rate_raw.and_then(|s| Decimal::from_str(&s).ok()),
            term_months,
            notice_period_days,
            min_deposit,
            max_deposit: max_deposit_raw.and_then(|s| Decimal::from_str(&s).ok()),
            fscs_protected: fscs_protected != 0,
            special_features,
            scrape_date,
            regulator_id,
            confidence_score,
            business_key,
            batch_id,
            quality_score,
        });
    }
    Ok(products)
}

fn print_result(value: &serde_json::Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => println!("{{\"error\":\"failed to serialize result: {e}\"}}"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cash_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    let _ = dotenv::dotenv();
}
