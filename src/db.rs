//! Connection bootstrap and schema management.
//!
//! Mirrors the teacher's `SCHEMA_SQL` const + `PRAGMA` bootstrap in
//! `signals/db_storage.rs`: WAL journal mode for concurrent readers during
//! writes, one `CREATE TABLE IF NOT EXISTS` block applied idempotently at
//! startup, foreign keys enforced per §5.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS config (
    config_key TEXT PRIMARY KEY,
    config_value TEXT NOT NULL,
    config_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products_raw (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    method TEXT NOT NULL,
    platform TEXT NOT NULL,
    raw_platform TEXT NOT NULL,
    bank_name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    aer_rate TEXT NOT NULL,
    gross_rate TEXT,
    term_months INTEGER,
    notice_period_days INTEGER,
    min_deposit TEXT NOT NULL,
    max_deposit TEXT,
    fscs_protected INTEGER NOT NULL,
    special_features TEXT,
    scrape_date TEXT NOT NULL,
    regulator_id TEXT,
    confidence_score REAL NOT NULL DEFAULT 0.0,
    business_key TEXT,
    batch_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_raw_source_method ON products_raw(source, method);
CREATE INDEX IF NOT EXISTS idx_products_raw_batch ON products_raw(batch_id);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    method TEXT NOT NULL,
    platform TEXT NOT NULL,
    raw_platform TEXT NOT NULL,
    bank_name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    aer_rate TEXT NOT NULL,
    gross_rate TEXT,
    term_months INTEGER,
    notice_period_days INTEGER,
    min_deposit TEXT NOT NULL,
    max_deposit TEXT,
    fscs_protected INTEGER NOT NULL,
    special_features TEXT,
    scrape_date TEXT NOT NULL,
    regulator_id TEXT,
    confidence_score REAL NOT NULL DEFAULT 0.0,
    business_key TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    quality_score REAL NOT NULL,
    UNIQUE(business_key, platform)
);

CREATE INDEX IF NOT EXISTS idx_products_business_key ON products(business_key);
CREATE INDEX IF NOT EXISTS idx_products_regulator ON products(regulator_id);

CREATE TABLE IF NOT EXISTS regulator_lookup (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    search_name TEXT NOT NULL,
    regulator_id TEXT NOT NULL,
    canonical_name TEXT NOT NULL,
    match_type TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    match_rank INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_regulator_lookup_search_name ON regulator_lookup(search_name);

CREATE TABLE IF NOT EXISTS institution_prefs (
    regulator_id TEXT PRIMARY KEY,
    personal_limit TEXT,
    easy_access_required_above_default INTEGER NOT NULL DEFAULT 0,
    trust_level REAL NOT NULL DEFAULT 1.0,
    risk_notes TEXT,
    protection_type TEXT NOT NULL DEFAULT 'standard'
);

CREATE TABLE IF NOT EXISTS research_queue (
    name TEXT PRIMARY KEY,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    occurrence_count INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'open'
);

CREATE TABLE IF NOT EXISTS deposits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    regulator_id TEXT NOT NULL,
    bank TEXT NOT NULL,
    balance TEXT NOT NULL,
    sub_type TEXT NOT NULL,
    is_joint_account INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_deposits_regulator ON deposits(regulator_id);

CREATE TABLE IF NOT EXISTS batch_master (
    batch_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    file_path TEXT NOT NULL,
    source TEXT NOT NULL,
    method TEXT NOT NULL,
    status TEXT NOT NULL,
    cancel_requested INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS ingestion_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL REFERENCES batch_master(batch_id),
    record_ordinal INTEGER NOT NULL,
    validation_status TEXT NOT NULL,
    validation_details_json TEXT NOT NULL,
    filter_outcome TEXT,
    platform_source_metadata_json TEXT NOT NULL,
    UNIQUE(batch_id, record_ordinal)
);

CREATE TABLE IF NOT EXISTS matching_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL REFERENCES batch_master(batch_id),
    record_ordinal INTEGER NOT NULL,
    product_id INTEGER,
    original_bank_name TEXT NOT NULL,
    normalized_bank_name TEXT NOT NULL,
    normalization_steps_json TEXT NOT NULL,
    database_query_method TEXT NOT NULL,
    match_type TEXT,
    final_regulator_id TEXT,
    final_confidence REAL NOT NULL,
    decision_routing TEXT NOT NULL,
    manual_override_timestamp TEXT,
    UNIQUE(batch_id, record_ordinal)
);

CREATE TABLE IF NOT EXISTS dedup_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL REFERENCES batch_master(batch_id),
    group_id TEXT NOT NULL,
    business_key TEXT NOT NULL,
    platforms_in_group_json TEXT NOT NULL,
    quality_scores_json TEXT NOT NULL,
    winner_product_id TEXT,
    rejected_products_metadata_json TEXT NOT NULL,
    UNIQUE(batch_id, group_id)
);
"#;

/// Opens (creating if absent) the SQLite database at `path` and applies the
/// schema. Safe to call repeatedly; every statement is idempotent.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("opening database at {}", path.display()))?;
    conn.execute_batch(SCHEMA_SQL)
        .context("applying core schema")?;
    info!(path = %path.display(), "database ready");
    Ok(conn)
}

/// Opens an in-memory database with the schema applied; used by unit tests.
#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("opening in-memory database")?;
    conn.execute_batch(SCHEMA_SQL)
        .context("applying core schema")?;
    Ok(conn)
}
