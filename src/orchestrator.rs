//! Component H: Orchestrator.
//!
//! Drives stages A→F for one file (or, for `rebuild_from_raw`, D→F over
//! the whole raw table), manages batch identifiers, publishes progress
//! events, and polls for cancellation at record- and stage-loop
//! boundaries. Per-record CPU-bound work (validation, normalization, name
//! matching) runs on a bounded `rayon` pool sized from
//! `orchestrator.worker_threads`; all writes go through the single
//! connection the caller hands in, applied in original record order so
//! results stay deterministic regardless of how the pool scheduled them.

use crate::audit::{IngestionAuditRow, MatchingAuditRow, PlatformSourceMetadata, ValidationDetails, ValidationStatus};
use crate::catalog::{self, BatchSummary};
use crate::config::Config;
use crate::dedup;
use crate::error::{CoreError, RecordRejectReason};
use crate::ingestion::{feed, normalize, raw_store};
use crate::matching::{self, cache::CacheHandle};
use crate::model::{FeedFile, FeedProduct, RawProduct, Stage};
use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Orchestrator {
    pub cache: CacheHandle,
    cancel_flags: parking_lot::Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            cache: CacheHandle::new(),
            cancel_flags: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn cancellation_flag(&self, batch_id: &str) -> Arc<AtomicBool> {
        self.cancel_flags
            .lock()
            .entry(batch_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Signals cancellation both in-process (for an embedding caller
    /// polling the same `Orchestrator`) and via the persisted
    /// `batch_master.cancel_requested` flag any other process can observe —
    /// the CLI normally runs one subcommand per invocation, so `cancel` and
    /// `process-file` are usually separate processes.
    pub fn cancel(&self, conn: &Connection, batch_id: &str) -> Result<()> {
        self.cancellation_flag(batch_id).store(true, Ordering::SeqCst);
        conn.execute(
            "UPDATE batch_master SET cancel_requested = 1 WHERE batch_id = ?1",
            params![batch_id],
        )
        .context("persisting cancellation request")?;
        Ok(())
    }

    fn is_cancelled(&self, conn: &Connection, batch_id: &str, flag: &AtomicBool) -> bool {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        conn.query_row(
            "SELECT cancel_requested FROM batch_master WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v != 0)
        .unwrap_or(false)
    }

    fn deterministic_batch_id(bytes: &[u8], source: &str, method: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.update(source.as_bytes());
        hasher.update(method.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn existing_batch_status(conn: &Connection, batch_id: &str) -> Result<Option<String>> {
        conn.query_row(
            "SELECT status FROM batch_master WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )
        .optional()
        .context("checking for an existing batch_master row")
    }

    pub fn get_progress(&self, conn: &Connection, batch_id: &str) -> Result<crate::model::ProgressEvent> {
        let status: String = conn
            .query_row(
                "SELECT status FROM batch_master WHERE batch_id = ?1",
                params![batch_id],
                |row| row.get(0),
            )
            .context("loading batch status for progress")?;
        let percent = match status.as_str() {
            "committed" | "already_committed" => 100,
            "cancelled" | "envelope_invalid" | "config_invalid" | "store_unavailable" => 0,
            _ => 50,
        };
        Ok(crate::model::ProgressEvent {
            batch_id: batch_id.to_string(),
            stage: Stage::Commit,
            percent,
            message: status,
        })
    }

    pub fn get_audit(&self, conn: &Connection, batch_id: &str, stage: Option<Stage>) -> Result<serde_json::Value> {
        let mut result = serde_json::Map::new();

        if stage.is_none() || stage == Some(Stage::Ingestion) || stage == Some(Stage::Filter) {
            let mut stmt = conn.prepare(
                "SELECT record_ordinal, validation_status, validation_details_json, filter_outcome, platform_source_metadata_json
                 FROM ingestion_audit WHERE batch_id = ?1 ORDER BY record_ordinal",
            )?;
            let rows: Vec<serde_json::Value> = stmt
                .query_map(params![batch_id], |row| {
                    Ok(serde_json::json!({
                        "record_ordinal": row.get::<_, i64>(0)?,
                        "validation_status": row.get::<_, String>(1)?,
                        "validation_details": row.get::<_, String>(2)?,
                        "filter_outcome": row.get::<_, Option<String>>(3)?,
                        "platform_source_metadata": row.get::<_, String>(4)?,
                    }))
                })?
                .collect::<rusqlite::Result<_>>()?;
            result.insert("ingestion_audit".to_string(), serde_json::Value::Array(rows));
        }

        if stage.is_none() || stage == Some(Stage::Matching) {
            let mut stmt = conn.prepare(
                "SELECT record_ordinal, original_bank_name, normalized_bank_name, database_query_method,
                        match_type, final_regulator_id, final_confidence, decision_routing
                 FROM matching_audit WHERE batch_id = ?1 ORDER BY record_ordinal",
            )?;
            let rows: Vec<serde_json::Value> = stmt
                .query_map(params![batch_id], |row| {
                    Ok(serde_json::json!({
                        "record_ordinal": row.get::<_, i64>(0)?,
                        "original_bank_name": row.get::<_, String>(1)?,
                        "normalized_bank_name": row.get::<_, String>(2)?,
                        "database_query_method": row.get::<_, String>(3)?,
                        "match_type": row.get::<_, Option<String>>(4)?,
                        "final_regulator_id": row.get::<_, Option<String>>(5)?,
                        "final_confidence": row.get::<_, f64>(6)?,
                        "decision_routing": row.get::<_, String>(7)?,
                    }))
                })?
                .collect::<rusqlite::Result<_>>()?;
            result.insert("matching_audit".to_string(), serde_json::Value::Array(rows));
        }

        if stage.is_none() || stage == Some(Stage::Dedup) || stage == Some(Stage::Commit) {
            let mut stmt = conn.prepare(
                "SELECT group_id, business_key, platforms_in_group_json, quality_scores_json, winner_product_id, rejected_products_metadata_json
                 FROM dedup_audit WHERE batch_id = ?1 ORDER BY group_id",
            )?;
            let rows: Vec<serde_json::Value> = stmt
                .query_map(params![batch_id], |row| {
                    Ok(serde_json::json!({
                        "group_id": row.get::<_, String>(0)?,
                        "business_key": row.get::<_, String>(1)?,
                        "platforms_in_group": row.get::<_, String>(2)?,
                        "quality_scores": row.get::<_, String>(3)?,
                        "winner_product_id": row.get::<_, Option<String>>(4)?,
                        "rejected_products_metadata": row.get::<_, String>(5)?,
                    }))
                })?
                .collect::<rusqlite::Result<_>>()?;
            result.insert("dedup_audit".to_string(), serde_json::Value::Array(rows));
        }

        Ok(serde_json::Value::Object(result))
    }

    /// Runs D→F over the entire current `products_raw` table, without
    /// re-reading any feed files. Used to recompute the catalog after
    /// lookup-table or config changes.
    pub fn rebuild_from_raw(&self, conn: &mut Connection, config: &mut Config) -> Result<BatchSummary> {
        config.refresh_if_version_changed(conn)?;
        self.cache.refresh_if_version_changed(conn)?;

        let batch_id =
            Self::deterministic_batch_id(Utc::now().to_rfc3339().as_bytes(), "rebuild", "rebuild");
        let flag = self.cancellation_flag(&batch_id);

        conn.execute(
            "INSERT INTO batch_master (batch_id, started_at, file_path, source, method, status)
             VALUES (?1, ?2, '<rebuild>', 'rebuild', 'rebuild', 'running')",
            params![batch_id, Utc::now().to_rfc3339()],
        )
        .context("creating rebuild batch_master row")?;

        let mut raw_products = load_all_raw(conn)?;
        let mut summary = BatchSummary {
            records_read: raw_products.len(),
            valid: raw_products.len(),
            ..Default::default()
        };

        self.run_matching(conn, &batch_id, config, &mut raw_products, &flag, &mut summary)?;
        self.run_dedup_and_commit(conn, &batch_id, config, &raw_products, &mut summary)?;
        Ok(summary)
    }

    /// Runs stages A→F for one feed file.
    pub fn process_file(
        &self,
        conn: &mut Connection,
        config: &mut Config,
        path: &Path,
        stop_after_stage: Option<Stage>,
        mut on_progress: impl FnMut(crate::model::ProgressEvent),
    ) -> Result<BatchSummary> {
        let (bytes, file) = feed::read_feed_file(path)?;
        let (source, method) = feed::validate_envelope(&file)?;

        let batch_id = Self::deterministic_batch_id(&bytes, &source, &method);

        if let Some(status) = Self::existing_batch_status(conn, &batch_id)? {
            if status == "committed" {
                info!(batch_id, "batch already committed, short-circuiting");
                return Ok(BatchSummary {
                    warnings: vec!["already_committed".to_string()],
                    ..Default::default()
                });
            }
        }

        config.refresh_if_version_changed(conn)?;
        self.cache.refresh_if_version_changed(conn)?;
        let flag = self.cancellation_flag(&batch_id);

        conn.execute(
            "INSERT OR REPLACE INTO batch_master (batch_id, started_at, file_path, source, method, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'running')",
            params![batch_id, Utc::now().to_rfc3339(), path.display().to_string(), source, method],
        )
        .context("creating batch_master row")?;

        let mut summary = BatchSummary {
            records_read: file.products.len(),
            ..Default::default()
        };

        on_progress(crate::model::ProgressEvent {
            batch_id: batch_id.clone(),
            stage: Stage::Ingestion,
            percent: 5,
            message: format!("read {} records", file.products.len()),
        });

        let mut raw_products = self.run_ingestion_and_filter(
            conn,
            &batch_id,
            &source,
            &method,
            config,
            &file,
            stop_after_stage,
            &mut summary,
        )?;

        if should_stop(stop_after_stage, Stage::Ingestion) {
            return self.finish_early(conn, &batch_id, summary);
        }

        if should_stop(stop_after_stage, Stage::Filter) {
            return self.finish_early(conn, &batch_id, summary);
        }

        raw_store::replace_slice(conn, &source, &method, &raw_products).context("accumulating raw records")?;
        raw_products = load_raw_for(conn, &source, &method)?;

        on_progress(crate::model::ProgressEvent {
            batch_id: batch_id.clone(),
            stage: Stage::RawAccumulation,
            percent: 30,
            message: format!("accumulated {} raw records", raw_products.len()),
        });

        if should_stop(stop_after_stage, Stage::RawAccumulation) {
            return self.finish_early(conn, &batch_id, summary);
        }

        self.run_matching(conn, &batch_id, config, &mut raw_products, &flag, &mut summary)?;
        on_progress(crate::model::ProgressEvent {
            batch_id: batch_id.clone(),
            stage: Stage::Matching,
            percent: 60,
            message: format!("matched {} / {} records", summary.matched, raw_products.len()),
        });

        if should_stop(stop_after_stage, Stage::Matching) {
            return self.finish_early(conn, &batch_id, summary);
        }

        if self.is_cancelled(conn, &batch_id, &flag) {
            conn.execute(
                "UPDATE batch_master SET status = 'cancelled', finished_at = ?2 WHERE batch_id = ?1",
                params![batch_id, Utc::now().to_rfc3339()],
            )?;
            return Err(CoreError::BatchCancelled { batch_id }.into());
        }

        self.run_dedup_and_commit(conn, &batch_id, config, &raw_products, &mut summary)?;

        on_progress(crate::model::ProgressEvent {
            batch_id: batch_id.clone(),
            stage: Stage::Commit,
            percent: 100,
            message: format!("committed {} products", summary.committed),
        });

        Ok(summary)
    }

    fn finish_early(&self, conn: &Connection, batch_id: &str, summary: BatchSummary) -> Result<BatchSummary> {
        conn.execute(
            "UPDATE batch_master SET finished_at = ?2 WHERE batch_id = ?1",
            params![batch_id, Utc::now().to_rfc3339()],
        )
        .context("marking early-stop finish time")?;
        Ok(summary)
    }

    /// Component A, and — unless the caller asked to stop right after it —
    /// component B in the same pass, since both run over the same
    /// parallel record scan. When `stop_after_stage` names `Ingestion`,
    /// only schema validation (component A) runs: `normalize::apply`
    /// (component B's rate-threshold/platform filter) is never called, so
    /// a record that would have been filtered is indistinguishable here
    /// from one that would have passed — both are just "valid so far".
    #[allow(clippy::too_many_arguments)]
    fn run_ingestion_and_filter(
        &self,
        conn: &Connection,
        batch_id: &str,
        source: &str,
        method: &str,
        config: &Config,
        file: &FeedFile,
        stop_after_stage: Option<Stage>,
        summary: &mut BatchSummary,
    ) -> Result<Vec<RawProduct>> {
        let worker_threads = config.get_i64("orchestrator.worker_threads", 4).max(1) as usize;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .build()
            .context("building ingestion worker pool")?;

        if should_stop(stop_after_stage, Stage::Ingestion) {
            let outcomes: Vec<ValidationOutcome> = pool.install(|| {
                file.products
                    .par_iter()
                    .enumerate()
                    .map(validate_only)
                    .collect()
            });

            for outcome in outcomes {
                crate::audit::insert_ingestion_audit(conn, &outcome.audit_row(batch_id))
                    .context("writing ingestion_audit row")?;
                if outcome.result.is_ok() {
                    summary.valid += 1;
                }
            }
            return Ok(Vec::new());
        }

        let outcomes: Vec<RecordOutcome> = pool.install(|| {
            file.products
                .par_iter()
                .enumerate()
                .map(|(ordinal, product)| classify_record(ordinal, product, source, method, config))
                .collect()
        });

        let mut raw_products = Vec::new();
        for outcome in outcomes {
            crate::audit::insert_ingestion_audit(conn, &outcome.audit_row(batch_id))
                .context("writing ingestion_audit row")?;
            match outcome.kind {
                RecordKind::Invalid(_) => {}
                RecordKind::Filtered(_) => summary.filtered += 1,
                RecordKind::Passed(normalized) => {
                    summary.valid += 1;
                    raw_products.push(to_raw_product(normalized, source, method, batch_id));
                }
            }
        }
        Ok(raw_products)
    }

    fn run_matching(
        &self,
        conn: &Connection,
        batch_id: &str,
        config: &Config,
        raw_products: &mut [RawProduct],
        flag: &AtomicBool,
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let cache = self.cache.read();
        for (ordinal, raw) in raw_products.iter_mut().enumerate() {
            if ordinal % 256 == 0 && self.is_cancelled(conn, batch_id, flag) {
                warn!(batch_id, "cancellation observed during matching stage");
                break;
            }

            let outcome = matching::resolve(&raw.bank_name, &cache, config);
            let needs_review = outcome.needs_review(config);

            raw.regulator_id = outcome.regulator_id.clone();
            raw.confidence_score = outcome.confidence;
            if let Some(id) = raw.id {
                conn.execute(
                    "UPDATE products_raw SET regulator_id = ?2, confidence_score = ?3 WHERE id = ?1",
                    params![id, raw.regulator_id, raw.confidence_score],
                )
                .context("persisting matcher result onto products_raw")?;
            }

            if outcome.regulator_id.is_some() {
                summary.matched += 1;
            } else {
                summary.unmatched += 1;
                if config.get_bool("matching.enable_research_queue", true)
                    && config.get_bool("matching.auto_flag_unmatched", true)
                {
                    crate::research_queue::upsert(conn, &raw.bank_name, config)
                        .context("flagging unmatched bank name")?;
                }
            }

            let audit_row = MatchingAuditRow {
                batch_id: batch_id.to_string(),
                record_ordinal: ordinal as i64,
                product_id: raw.id,
                original_bank_name: raw.bank_name.clone(),
                normalized_bank_name: outcome.normalized_name,
                normalization_steps: outcome.normalization_steps,
                database_query_method: outcome.database_query_method,
                match_type: outcome.match_type,
                final_regulator_id: outcome.regulator_id,
                final_confidence: outcome.confidence,
                decision_routing: if needs_review {
                    crate::model::DecisionRouting::NeedsReview
                } else {
                    crate::model::DecisionRouting::Accepted
                },
                manual_override_timestamp: None,
            };
            crate::audit::insert_matching_audit(conn, &audit_row).context("writing matching_audit row")?;
        }
        Ok(())
    }

    fn run_dedup_and_commit(
        &self,
        conn: &mut Connection,
        batch_id: &str,
        config: &Config,
        raw_products: &[RawProduct],
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let groups = dedup::group_and_score(raw_products, config);
        let tx = conn.transaction().context("opening catalog commit transaction")?;

        for raw in raw_products {
            if let Some(id) = raw.id {
                let business_key = dedup::compute_business_key(raw, config);
                tx.execute(
                    "UPDATE products_raw SET business_key = ?2 WHERE id = ?1",
                    params![id, business_key],
                )
                .context("persisting business_key onto products_raw")?;
            }
        }

        catalog::commit(&tx, batch_id, &groups, summary).context("committing catalog")?;
        tx.commit().context("finalizing catalog commit transaction")?;
        Ok(())
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn should_stop(stop_after_stage: Option<Stage>, reached: Stage) -> bool {
    matches!(stop_after_stage, Some(stop) if reached >= stop)
}

fn load_raw_for(conn: &Connection, source: &str, method: &str) -> Result<Vec<RawProduct>> {
    load_raw_where(conn, "WHERE source = ?1 AND method = ?2", params![source, method])
}

fn load_all_raw(conn: &Connection) -> Result<Vec<RawProduct>> {
    load_raw_where(conn, "", params![])
}

fn load_raw_where(conn: &Connection, clause: &str, bind: impl rusqlite::Params) -> Result<Vec<RawProduct>> {
    let sql = format!(
        "SELECT id, source, method, platform, raw_platform, bank_name, account_type, aer_rate, gross_rate,
                term_months, notice_period_days, min_deposit, max_deposit, fscs_protected, special_features,
                scrape_date, regulator_id, confidence_score, business_key, batch_id
         FROM products_raw {clause}"
    );
    let mut stmt = conn.prepare(&sql).context("preparing products_raw scan")?;
    let rows = stmt
        .query_map(bind, |row| {
            let account_type_raw: String = row.get(6)?;
            let aer_rate_raw: String = row.get(7)?;
            let gross_rate_raw: Option<String> = row.get(8)?;
            let min_deposit_raw: String = row.get(11)?;
            let max_deposit_raw: Option<String> = row.get(12)?;
            let scrape_date_raw: String = row.get(15)?;
            Ok(RawProduct {
                id: row.get(0)?,
                source: row.get(1)?,
                method: row.get(2)?,
                platform: row.get(3)?,
                raw_platform: row.get(4)?,
                bank_name: row.get(5)?,
                account_type: crate::model::AccountType::from_loose(&account_type_raw)
                    .unwrap_or(crate::model::AccountType::EasyAccess),
                aer_rate: aer_rate_raw.parse().unwrap_or_default(),
                gross_rate: gross_rate_raw.and_then(|s| s.parse().ok()),
                term_months: row.get(9)?,
                notice_period_days: row.get(10)?,
                min_deposit: min_deposit_raw.parse().unwrap_or_default(),
                max_deposit: max_deposit_raw.and_then(|s| s.parse().ok()),
                fscs_protected: row.get::<_, i64>(13)? != 0,
                special_features: row.get(14)?,
                scrape_date: scrape_date_raw.parse().unwrap_or_else(|_| Utc::now()),
                regulator_id: row.get(16)?,
                confidence_score: row.get(17)?,
                business_key: row.get(18)?,
                batch_id: row.get(19)?,
            })
        })
        .context("querying products_raw")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("collecting products_raw rows")?;
    Ok(rows)
}

enum RecordKind {
    Invalid(RecordRejectReason),
    Filtered(RecordRejectReason),
    Passed(normalize::NormalizedRecord),
}

struct RecordOutcome {
    ordinal: usize,
    original_bank_name: Option<String>,
    original_platform: Option<String>,
    metadata: PlatformSourceMetadata,
    kind: RecordKind,
}

impl RecordOutcome {
    fn audit_row(&self, batch_id: &str) -> IngestionAuditRow {
        let (validation_status, filter_outcome, reason_for_details) = match &self.kind {
            RecordKind::Invalid(reason) => (ValidationStatus::Invalid, None, Some(*reason)),
            RecordKind::Filtered(reason) => (ValidationStatus::Valid, Some(*reason), None),
            RecordKind::Passed(_) => (ValidationStatus::Valid, None, None),
        };
        IngestionAuditRow {
            batch_id: batch_id.to_string(),
            record_ordinal: self.ordinal as i64,
            validation_status,
            validation_details: ValidationDetails {
                reason: reason_for_details,
                original_bank_name: self.original_bank_name.clone(),
                original_platform: self.original_platform.clone(),
            },
            filter_outcome,
            platform_source_metadata: self.metadata.clone(),
        }
    }
}

/// Component A only, used when the caller stops before component B runs.
struct ValidationOutcome {
    ordinal: usize,
    original_bank_name: Option<String>,
    original_platform: Option<String>,
    result: Result<(), RecordRejectReason>,
}

impl ValidationOutcome {
    fn audit_row(&self, batch_id: &str) -> IngestionAuditRow {
        let (validation_status, reason) = match self.result {
            Ok(()) => (ValidationStatus::Valid, None),
            Err(reason) => (ValidationStatus::Invalid, Some(reason)),
        };
        IngestionAuditRow {
            batch_id: batch_id.to_string(),
            record_ordinal: self.ordinal as i64,
            validation_status,
            validation_details: ValidationDetails {
                reason,
                original_bank_name: self.original_bank_name.clone(),
                original_platform: self.original_platform.clone(),
            },
            filter_outcome: None,
            platform_source_metadata: empty_metadata(&self.original_platform),
        }
    }
}

fn validate_only((ordinal, product): (usize, &FeedProduct)) -> ValidationOutcome {
    ValidationOutcome {
        ordinal,
        original_bank_name: product.bank_name.clone(),
        original_platform: product.platform.clone(),
        result: feed::validate_record(ordinal, product).map(|_| ()),
    }
}

fn empty_metadata(original_platform: &Option<String>) -> PlatformSourceMetadata {
    PlatformSourceMetadata {
        platform_raw: original_platform.clone().unwrap_or_default(),
        platform_canonical: String::new(),
        source: String::new(),
        method: String::new(),
        extra: HashMap::new(),
    }
}

fn classify_record(
    ordinal: usize,
    product: &FeedProduct,
    source: &str,
    method: &str,
    config: &Config,
) -> RecordOutcome {
    let original_bank_name = product.bank_name.clone();
    let original_platform = product.platform.clone();

    match feed::validate_record(ordinal, product) {
        Err(reason) => RecordOutcome {
            ordinal,
            metadata: empty_metadata(&original_platform),
            original_bank_name,
            original_platform,
            kind: RecordKind::Invalid(reason),
        },
        Ok(validated) => match normalize::apply(validated, source, method, config) {
            Err(reason) => RecordOutcome {
                ordinal,
                metadata: empty_metadata(&original_platform),
                original_bank_name,
                original_platform,
                kind: RecordKind::Filtered(reason),
            },
            Ok((normalized, metadata)) => RecordOutcome {
                ordinal,
                metadata,
                original_bank_name,
                original_platform,
                kind: RecordKind::Passed(normalized),
            },
        },
    }
}

fn to_raw_product(normalized: normalize::NormalizedRecord, source: &str, method: &str, batch_id: &str) -> RawProduct {
    RawProduct {
        id: None,
        source: source.to_string(),
        method: method.to_string(),
        platform: normalized.platform_canonical,
        raw_platform: normalized.platform_raw,
        bank_name: normalized.bank_name,
        account_type: normalized.account_type,
        aer_rate: normalized.aer_rate,
        gross_rate: normalized.gross_rate,
        term_months: normalized.term_months,
        notice_period_days: normalized.notice_period_days,
        min_deposit: normalized.min_deposit,
        max_deposit: normalized.max_deposit,
        fscs_protected: normalized.fscs_protected,
        special_features: normalized.special_features,
        scrape_date: normalized.scrape_date,
        regulator_id: None,
        confidence_score: 0.0,
        business_key: None,
        batch_id: batch_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::io::Write;

    fn write_feed_file(dir: &tempfile::TempDir, name: &str, json: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    const SAMPLE_FEED: &str = r#"
    { "metadata": { "source": "moneyfacts", "method": "easy_access" },
      "products": [
        { "bankName": "Santander", "platform": "MoneyFacts", "accountType": "easy_access",
          "aerRate": 2.1, "grossRate": 2.1, "minDeposit": 1, "maxDeposit": 1000000,
          "fscsProtected": true, "scrapedAt": "2024-01-15T10:00:00Z" }
      ] }
    "#;

    #[test]
    fn process_file_commits_one_product() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let mut conn = db::open(&db_path).unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        let mut config = Config::load(&conn).unwrap();

        let feed_path = write_feed_file(&dir, "feed.json", SAMPLE_FEED);
        let orchestrator = Orchestrator::new();
        let summary = orchestrator
            .process_file(&mut conn, &mut config, &feed_path, None, |_| {})
            .unwrap();

        assert_eq!(summary.records_read, 1);
        assert_eq!(summary.committed, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn reprocessing_same_file_short_circuits_as_already_committed() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let mut conn = db::open(&db_path).unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        let mut config = Config::load(&conn).unwrap();

        let feed_path = write_feed_file(&dir, "feed.json", SAMPLE_FEED);
        let orchestrator = Orchestrator::new();
        orchestrator
            .process_file(&mut conn, &mut config, &feed_path, None, |_| {})
            .unwrap();

        let second = orchestrator
            .process_file(&mut conn, &mut config, &feed_path, None, |_| {})
            .unwrap();
        assert!(second.warnings.contains(&"already_committed".to_string()));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn stop_after_filter_leaves_raw_table_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let mut conn = db::open(&db_path).unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        let mut config = Config::load(&conn).unwrap();

        let feed_path = write_feed_file(&dir, "feed.json", SAMPLE_FEED);
        let orchestrator = Orchestrator::new();
        let summary = orchestrator
            .process_file(&mut conn, &mut config, &feed_path, Some(Stage::Filter), |_| {})
            .unwrap();
        assert_eq!(summary.valid, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM products_raw", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn stop_after_ingestion_never_runs_the_filter() {
        // A rate of 0.01 would be dropped by the default rate-threshold
        // filter; if filtering ran anyway before the stop-after check,
        // `valid` would come back 0 instead of 1.
        const BELOW_THRESHOLD_FEED: &str = r#"
        { "metadata": { "source": "moneyfacts", "method": "easy_access" },
          "products": [
            { "bankName": "Santander", "platform": "MoneyFacts", "accountType": "easy_access",
              "aerRate": 0.01, "minDeposit": 1, "fscsProtected": true,
              "scrapedAt": "2024-01-15T10:00:00Z" }
          ] }
        "#;

        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let mut conn = db::open(&db_path).unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        let mut config = Config::load(&conn).unwrap();

        let feed_path = write_feed_file(&dir, "feed.json", BELOW_THRESHOLD_FEED);
        let orchestrator = Orchestrator::new();
        let summary = orchestrator
            .process_file(&mut conn, &mut config, &feed_path, Some(Stage::Ingestion), |_| {})
            .unwrap();
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.filtered, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM products_raw", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
