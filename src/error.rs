//! Error taxonomy for the ingestion/matching/dedup pipeline and the
//! compliance engine.
//!
//! Each variant corresponds to one of the error kinds named in the core
//! design: per-record errors never abort a batch, whole-batch errors carry
//! enough context to be written into `batch_master.status` verbatim.

use std::fmt;

#[derive(Debug)]
pub enum CoreError {
    /// File header missing required fields. Fatal to the batch; no raw writes.
    EnvelopeInvalid(String),
    /// A required config key is missing or malformed at orchestrator init.
    ConfigInvalid(String),
    /// Database open or lock failure.
    StoreUnavailable(String),
    /// Winner selection deadlocked below the minimum quality floor.
    DedupConflict { business_key: String, reason: String },
    /// User- or timeout-initiated cancellation.
    BatchCancelled { batch_id: String },
    Sqlite(rusqlite::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvelopeInvalid(msg) => write!(f, "invalid feed envelope: {msg}"),
            Self::ConfigInvalid(key) => write!(f, "invalid or missing config key: {key}"),
            Self::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::DedupConflict { business_key, reason } => {
                write!(f, "dedup conflict for business key {business_key}: {reason}")
            }
            Self::BatchCancelled { batch_id } => write!(f, "batch {batch_id} cancelled"),
            Self::Sqlite(e) => write!(f, "sqlite error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Per-record classification produced by stage A (the envelope itself is
/// either entirely valid or rejected wholesale as `EnvelopeInvalid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordRejectReason {
    MissingBankName,
    MissingPlatform,
    MissingAccountType,
    InvalidAerRate,
    NegativeMinDeposit,
    MaxDepositNotGreaterThanMin,
    BadScrapeDate,
    RateBelowThreshold,
    UnrecognizedAccountType,
}

impl fmt::Display for RecordRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingBankName => "missing_bank_name",
            Self::MissingPlatform => "missing_platform",
            Self::MissingAccountType => "missing_account_type",
            Self::InvalidAerRate => "invalid_aer_rate",
            Self::NegativeMinDeposit => "negative_min_deposit",
            Self::MaxDepositNotGreaterThanMin => "max_deposit_not_greater_than_min",
            Self::BadScrapeDate => "bad_scrape_date",
            Self::RateBelowThreshold => "rate_below_threshold",
            Self::UnrecognizedAccountType => "unrecognized_account_type",
        };
        write!(f, "{s}")
    }
}
