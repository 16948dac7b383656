//! Component B: Normalizer & Filter.
//!
//! Canonicalizes platform/account-type fields and applies the
//! per-account-type minimum rate thresholds from `config` (§4.B). Records
//! that pass become `NormalizedRecord`s ready for raw accumulation;
//! records that don't are reported with a `RecordRejectReason` so the
//! caller can write the `filter_outcome` into `ingestion_audit`.

use crate::audit::PlatformSourceMetadata;
use crate::config::Config;
use crate::error::RecordRejectReason;
use crate::ingestion::feed::ValidatedRecord;
use crate::model::AccountType;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub bank_name: String,
    pub platform_raw: String,
    pub platform_canonical: String,
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
    pub extra: HashMap<String, serde_json::Value>,
}

pub fn canonicalize_platform(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn rate_threshold_for(account_type: AccountType, config: &Config) -> Decimal {
    let key = match account_type {
        AccountType::EasyAccess => "ingestion.rate_threshold.easy_access",
        AccountType::Notice => "ingestion.rate_threshold.notice",
        AccountType::FixedTerm => "ingestion.rate_threshold.fixed_term",
    };
    let default = match account_type {
        AccountType::EasyAccess => 1.5,
        AccountType::Notice => 1.8,
        AccountType::FixedTerm => 2.0,
    };
    Decimal::from_f64(config.get_f64(key, default)).unwrap_or(Decimal::new(default as i64, 0))
}

/// Applies account-type mapping and the rate-threshold filter. On success
/// also returns the `platform_source_metadata` the caller writes into
/// `ingestion_audit`.
pub fn apply(
    validated: ValidatedRecord,
    source: &str,
    method: &str,
    config: &Config,
) -> Result<(NormalizedRecord, PlatformSourceMetadata), RecordRejectReason> {
    let account_type = AccountType::from_loose(&validated.account_type_raw)
        .ok_or(RecordRejectReason::UnrecognizedAccountType)?;

    let threshold = rate_threshold_for(account_type, config);
    if validated.aer_rate < threshold {
        return Err(RecordRejectReason::RateBelowThreshold);
    }

    let platform_canonical = canonicalize_platform(&validated.platform);
    let metadata = PlatformSourceMetadata {
        platform_raw: validated.platform.clone(),
        platform_canonical: platform_canonical.clone(),
        source: source.to_string(),
        method: method.to_string(),
        extra: validated.extra.clone(),
    };

    Ok((
        NormalizedRecord {
            bank_name: validated.bank_name,
            platform_raw: validated.platform,
            platform_canonical,
            account_type,
            aer_rate: validated.aer_rate,
            gross_rate: validated.gross_rate,
            term_months: validated.term_months,
            notice_period_days: validated.notice_period_days,
            min_deposit: validated.min_deposit,
            max_deposit: validated.max_deposit,
            fscs_protected: validated.fscs_protected,
            special_features: validated.special_features,
            scrape_date: validated.scrape_date,
            extra: validated.extra,
        },
        metadata,
    ))
}
