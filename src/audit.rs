//! Typed audit records.
//!
//! Per the design note "audit metadata... modeled in memory as typed
//! records to prevent schema drift", every audit payload is a real struct
//! here and is only turned into a JSON string at the point it is bound to
//! a `rusqlite` statement — never passed around the pipeline as a loose
//! `serde_json::Value`.

use crate::error::RecordRejectReason;
use crate::model::{DatabaseQueryMethod, DecisionRouting, MatchType};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub reason: Option<RecordRejectReason>,
    pub original_bank_name: Option<String>,
    pub original_platform: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSourceMetadata {
    pub platform_raw: String,
    pub platform_canonical: String,
    pub source: String,
    pub method: String,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionAuditRow {
    pub batch_id: String,
    pub record_ordinal: i64,
    pub validation_status: ValidationStatus,
    pub validation_details: ValidationDetails,
    pub filter_outcome: Option<RecordRejectReason>,
    pub platform_source_metadata: PlatformSourceMetadata,
}

pub fn insert_ingestion_audit(conn: &Connection, row: &IngestionAuditRow) -> Result<()> {
    let details_json =
        serde_json::to_string(&row.validation_details).context("serializing validation details")?;
    let metadata_json = serde_json::to_string(&row.platform_source_metadata)
        .context("serializing platform source metadata")?;
    conn.execute(
        "INSERT OR IGNORE INTO ingestion_audit
            (batch_id, record_ordinal, validation_status, validation_details_json, filter_outcome, platform_source_metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.batch_id,
            row.record_ordinal,
            match row.validation_status {
                ValidationStatus::Valid => "valid",
                ValidationStatus::Invalid => "invalid",
            },
            details_json,
            row.filter_outcome.map(|r| r.to_string()),
            metadata_json,
        ],
    )
    .context("inserting ingestion_audit row")?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingAuditRow {
    pub batch_id: String,
    pub record_ordinal: i64,
    pub product_id: Option<i64>,
    pub original_bank_name: String,
    pub normalized_bank_name: String,
    pub normalization_steps: Vec<String>,
    pub database_query_method: DatabaseQueryMethod,
    pub match_type: Option<MatchType>,
    pub final_regulator_id: Option<String>,
    pub final_confidence: f64,
    pub decision_routing: DecisionRouting,
    pub manual_override_timestamp: Option<DateTime<Utc>>,
}

pub fn insert_matching_audit(conn: &Connection, row: &MatchingAuditRow) -> Result<()> {
    let steps_json =
        serde_json::to_string(&row.normalization_steps).context("serializing normalization steps")?;
    conn.execute(
        "INSERT OR IGNORE INTO matching_audit
            (batch_id, record_ordinal, product_id, original_bank_name, normalized_bank_name,
             normalization_steps_json, database_query_method, match_type, final_regulator_id,
             final_confidence, decision_routing, manual_override_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.batch_id,
            row.record_ordinal,
            row.product_id,
            row.original_bank_name,
            row.normalized_bank_name,
            steps_json,
            row.database_query_method.as_str(),
            row.match_type.map(|m| m.as_str()),
            row.final_regulator_id,
            row.final_confidence,
            row.decision_routing.as_str(),
            row.manual_override_timestamp.map(|t| t.to_rfc3339()),
        ],
    )
    .context("inserting matching_audit row")?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub product_id: Option<i64>,
    pub platform: String,
    pub quality_score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupAuditRow {
    pub batch_id: String,
    pub group_id: String,
    pub business_key: String,
    pub platforms_in_group: Vec<String>,
    pub quality_scores: HashMap<String, f64>,
    pub winner_product_id: Option<String>,
    pub rejected_products: Vec<RejectedCandidate>,
    pub frn_divergence_warning: Option<String>,
}

pub fn insert_dedup_audit(conn: &Connection, row: &DedupAuditRow) -> Result<()> {
    let platforms_json =
        serde_json::to_string(&row.platforms_in_group).context("serializing platforms_in_group")?;
    let scores_json =
        serde_json::to_string(&row.quality_scores).context("serializing quality_scores")?;
    let rejected_json = serde_json::to_string(&serde_json::json!({
        "rejected": row.rejected_products,
        "frn_divergence_warning": row.frn_divergence_warning,
    }))
    .context("serializing rejected_products_metadata")?;
    conn.execute(
        "INSERT OR IGNORE INTO dedup_audit
            (batch_id, group_id, business_key, platforms_in_group_json, quality_scores_json,
             winner_product_id, rejected_products_metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.batch_id,
            row.group_id,
            row.business_key,
            platforms_json,
            scores_json,
            row.winner_product_id,
            rejected_json,
        ],
    )
    .context("inserting dedup_audit row")?;
    Ok(())
}
