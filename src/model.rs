//! Shared data types for the ingestion/matching/dedup pipeline and the
//! compliance engine: feed envelope DTOs, persisted row types, and the
//! small enums that encode business vocabulary (account type, match type,
//! protection type, ...).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------
// Feed envelope (external interface, §6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FeedFile {
    pub metadata: FeedMetadata,
    pub products: Vec<FeedProduct>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedMetadata {
    pub source: Option<String>,
    pub method: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedProduct {
    pub bank_name: Option<String>,
    pub platform: Option<String>,
    pub account_type: Option<String>,
    pub aer_rate: Option<serde_json::Value>,
    pub gross_rate: Option<serde_json::Value>,
    pub term_months: Option<i64>,
    pub notice_period_days: Option<i64>,
    pub min_deposit: Option<serde_json::Value>,
    pub max_deposit: Option<serde_json::Value>,
    #[serde(default)]
    pub fscs_protected: bool,
    pub special_features: Option<String>,
    pub scraped_at: Option<String>,
    /// Any product key not named above, kept so it's still auditable.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------
// Account type (§3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    EasyAccess,
    Notice,
    FixedTerm,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EasyAccess => "easy_access",
            Self::Notice => "notice",
            Self::FixedTerm => "fixed_term",
        }
    }

    /// Maps loose, scraped account-type strings onto the canonical enum.
    /// Returns `None` if nothing recognizable matches.
    pub fn from_loose(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect();
        match normalized.as_str() {
            "easyaccess" | "instantaccess" | "easy" => Some(Self::EasyAccess),
            "notice" | "noticeaccount" => Some(Self::Notice),
            "fixedterm" | "fixedrate" | "fixed" | "bond" | "fixedtermbond" => {
                Some(Self::FixedTerm)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------
// Raw and curated product rows (§3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProduct {
    pub id: Option<i64>,
    pub source: String,
    pub method: String,
    pub platform: String,
    pub raw_platform: String,
    pub bank_name: String,
    pub account_type: AccountType,
    pub aer_rate: Decimal,
    pub gross_rate: Option<Decimal>,
    pub term_months: Option<i64>,
    pub notice_period_days: Option<i64>,
    pub min_deposit: Decimal,
    pub max_deposit: Option<Decimal>,
    pub fscs_protected: bool,
    pub special_features: Option<String>,
    pub scrape_date: DateTime<Utc>,
    pub regulator_id: Option<String>,
    pub confidence_score: f64,
    pub business_key: Option<String>,
    pub batch_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: Option<i64>,
    pub source: String,
    pub method: String,
    pub platform: String,
    pub raw_platform: String,
    pub bank_name: String,
    pub account_type: AccountType,
    pub aer_rate: Decimal,
    pub gross_rate: Option<Decimal>,
    pub term_months: Option<i64>,
    pub notice_period_days: Option<i64>,
    pub min_deposit: Decimal,
    pub max_deposit: Option<Decimal>,
    pub fscs_protected: bool,
    pub special_features: Option<String>,
    pub scrape_date: DateTime<Utc>,
    pub regulator_id: Option<String>,
    pub confidence_score: f64,
    pub business_key: String,
    pub batch_id: String,
    pub quality_score: f64,
}

impl CatalogProduct {
    pub fn from_winner(raw: RawProduct, quality_score: f64) -> Self {
        Self {
            id: raw.id,
            source: raw.source,
            method: raw.method,
            platform: raw.platform,
            raw_platform: raw.raw_platform,
            bank_name: raw.bank_name,
            account_type: raw.account_type,
            aer_rate: raw.aer_rate,
            gross_rate: raw.gross_rate,
            term_months: raw.term_months,
            notice_period_days: raw.notice_period_days,
            min_deposit: raw.min_deposit,
            max_deposit: raw.max_deposit,
            fscs_protected: raw.fscs_protected,
            special_features: raw.special_features,
            scrape_date: raw.scrape_date,
            regulator_id: raw.regulator_id,
            confidence_score: raw.confidence_score,
            business_key: raw.business_key.unwrap_or_default(),
            batch_id: raw.batch_id,
            quality_score,
        }
    }
}

// ---------------------------------------------------------------------
// Regulator lookup cache (§3, §4.D)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ManualOverride,
    DirectMatch,
    NameVariation,
    SharedBrand,
    Alias,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualOverride => "manual_override",
            Self::DirectMatch => "direct_match",
            Self::NameVariation => "name_variation",
            Self::SharedBrand => "shared_brand",
            Self::Alias => "alias",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorLookupRow {
    pub search_name: String,
    pub regulator_id: String,
    pub canonical_name: String,
    pub match_type: MatchType,
    pub confidence_score: f64,
    pub match_rank: i64,
}

/// The algorithm family audited as `database_query_method` (§4.D). Distinct
/// from `MatchType`, which is the *provenance* of the winning lookup row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseQueryMethod {
    ExactMatch,
    SharedBrand,
    Alias,
    Fuzzy,
    Unknown,
}

impl DatabaseQueryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::SharedBrand => "shared_brand",
            Self::Alias => "alias",
            Self::Fuzzy => "fuzzy",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRouting {
    Accepted,
    NeedsReview,
}

impl DecisionRouting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::NeedsReview => "needs_review",
        }
    }
}

// ---------------------------------------------------------------------
// Institution preferences (§3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionType {
    Standard,
    PersonalOverride,
    GovernmentProtected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionPrefs {
    pub regulator_id: String,
    pub personal_limit: Option<Decimal>,
    pub easy_access_required_above_default: bool,
    pub trust_level: f64,
    pub risk_notes: Option<String>,
    pub protection_type: ProtectionType,
}

// ---------------------------------------------------------------------
// Research queue (§3, §4.D)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchQueueStatus {
    Open,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQueueEntry {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: i64,
    pub status: ResearchQueueStatus,
}

// ---------------------------------------------------------------------
// Deposits (§3, compliance engine input)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: Option<i64>,
    pub regulator_id: String,
    pub bank: String,
    pub balance: Decimal,
    pub sub_type: AccountType,
    pub is_joint_account: bool,
    pub is_active: bool,
}

// ---------------------------------------------------------------------
// Batch master & orchestrator control surface (§3, §6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Committed,
    AlreadyCommitted,
    Cancelled,
    EnvelopeInvalid,
    ConfigInvalid,
    StoreUnavailable,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Committed => "committed",
            Self::AlreadyCommitted => "already_committed",
            Self::Cancelled => "cancelled",
            Self::EnvelopeInvalid => "envelope_invalid",
            Self::ConfigInvalid => "config_invalid",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMaster {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub file_path: String,
    pub source: String,
    pub method: String,
    pub status: BatchStatus,
}

/// Values accepted by the `--stop-after` CLI flag / `stop_after_stage` API
/// parameter (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Filter,
    RawAccumulation,
    Matching,
    Dedup,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Filter => "filter",
            Self::RawAccumulation => "raw_accumulation",
            Self::Matching => "matching",
            Self::Dedup => "dedup",
            Self::Commit => "commit",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ingestion" => Some(Self::Ingestion),
            "filter" => Some(Self::Filter),
            "raw_accumulation" | "raw-accumulation" => Some(Self::RawAccumulation),
            "matching" => Some(Self::Matching),
            "dedup" => Some(Self::Dedup),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

/// A progress event published by the orchestrator (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub batch_id: String,
    pub stage: Stage,
    pub percent: u8,
    pub message: String,
}
