//! Component A: Feed Reader & Validator.
//!
//! Parses the feed envelope, rejects it wholesale when `source`/`method`
//! are missing, and validates each product record against the schema in
//! §4.A. A record that fails any check is NOT passed downstream; it is
//! reported back to the caller so the orchestrator can write its
//! `ingestion_audit` row and move on to the next record.

use crate::error::{CoreError, RecordRejectReason};
use crate::model::{FeedFile, FeedProduct};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;

/// Reads a feed file and parses its envelope, returning the raw bytes
/// alongside the parsed file — the orchestrator hashes those same bytes
/// into the batch id, so it must see exactly what was on disk rather than
/// re-reading it a second time.
pub fn read_feed_file(path: &Path) -> Result<(Vec<u8>, FeedFile), CoreError> {
    let bytes = std::fs::read(path)?;
    let file: FeedFile = serde_json::from_slice(&bytes)
        .map_err(|e| CoreError::EnvelopeInvalid(format!("malformed JSON: {e}")))?;
    Ok((bytes, file))
}

/// Returns `(source, method)` or rejects the whole file.
pub fn validate_envelope(file: &FeedFile) -> Result<(String, String), CoreError> {
    let source = file
        .metadata
        .source
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CoreError::EnvelopeInvalid("missing metadata.source".to_string()))?
        .clone();
    let method = file
        .metadata
        .method
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CoreError::EnvelopeInvalid("missing metadata.method".to_string()))?
        .clone();
    Ok((source, method))
}

/// A record that passed stage-A schema validation. Account-type mapping
/// and rate-threshold filtering happen downstream in `normalize`.
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub ordinal: usize,
    pub bank_name: String,
    pub platform: String,
    pub account_type_raw: String,
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

fn value_to_decimal(v: &serde_json::Value) -> Option<Decimal> {
    match v {
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .or_else(|| Decimal::from_f64(n.as_i64()? as f64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts RFC 3339 and the common free-form variants scraped feeds carry,
/// canonicalizing all of them to UTC (Design Note: "feed files... carry
/// dates as free-form strings; the spec requires ISO-8601").
pub fn canonicalize_scrape_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Validates one product record against §4.A's schema checks.
pub fn validate_record(
    ordinal: usize,
    product: &FeedProduct,
) -> Result<ValidatedRecord, RecordRejectReason> {
    let bank_name = product
        .bank_name
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(RecordRejectReason::MissingBankName)?;

    let platform = product
        .platform
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(RecordRejectReason::MissingPlatform)?;

    let account_type_raw = product
        .account_type
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(RecordRejectReason::MissingAccountType)?;

    let aer_rate = product
        .aer_rate
        .as_ref()
        .and_then(value_to_decimal)
        .filter(|d| *d > Decimal::ZERO)
        .ok_or(RecordRejectReason::InvalidAerRate)?;

    let gross_rate = product.gross_rate.as_ref().and_then(value_to_decimal);

    let min_deposit = product
        .min_deposit
        .as_ref()
        .and_then(value_to_decimal)
        .unwrap_or(Decimal::ZERO);
    if min_deposit < Decimal::ZERO {
        return Err(RecordRejectReason::NegativeMinDeposit);
    }

    let max_deposit = product.max_deposit.as_ref().and_then(value_to_decimal);
    if let Some(max_d) = max_deposit {
        if max_d <= min_deposit {
            return Err(RecordRejectReason::MaxDepositNotGreaterThanMin);
        }
    }

    let scrape_date = product
        .scraped_at
        .as_deref()
        .and_then(canonicalize_scrape_date)
        .ok_or(RecordRejectReason::BadScrapeDate)?;

    Ok(ValidatedRecord {
        ordinal,
        bank_name,
        platform,
        account_type_raw,
        aer_rate,
        gross_rate,
        term_months: product.term_months,
        notice_period_days: product.notice_period_days,
        min_deposit,
        max_deposit,
        fscs_protected: product.fscs_protected,
        special_features: product.special_features.clone(),
        scrape_date,
        extra: product.extra.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_product() -> FeedProduct {
        FeedProduct {
            bank_name: Some("Santander".to_string()),
            platform: Some("MoneyFacts".to_string()),
            account_type: Some("easy_access".to_string()),
            aer_rate: Some(serde_json::json!(2.1)),
            gross_rate: Some(serde_json::json!(2.1)),
            term_months: None,
            notice_period_days: None,
            min_deposit: Some(serde_json::json!(1)),
            max_deposit: Some(serde_json::json!(1_000_000)),
            fscs_protected: true,
            special_features: None,
            scraped_at: Some("2024-01-15T10:00:00Z".to_string()),
            extra: HashMap::new(),
        }
    }

    #[test]
    fn accepts_well_formed_record() {
        let record = validate_record(0, &base_product()).unwrap();
        assert_eq!(record.bank_name, "Santander");
        assert_eq!(record.aer_rate, Decimal::new(21, 1));
    }

    #[test]
    fn rejects_zero_rate() {
        let mut product = base_product();
        product.aer_rate = Some(serde_json::json!(0));
        assert_eq!(
            validate_record(0, &product).unwrap_err(),
            RecordRejectReason::InvalidAerRate
        );
    }

    #[test]
    fn rejects_max_not_greater_than_min() {
        let mut product = base_product();
        product.min_deposit = Some(serde_json::json!(500));
        product.max_deposit = Some(serde_json::json!(500));
        assert_eq!(
            validate_record(0, &product).unwrap_err(),
            RecordRejectReason::MaxDepositNotGreaterThanMin
        );
    }

    #[test]
    fn rejects_bad_scrape_date() {
        let mut product = base_product();
        product.scraped_at = Some("not-a-date".to_string());
        assert_eq!(
            validate_record(0, &product).unwrap_err(),
            RecordRejectReason::BadScrapeDate
        );
    }

    #[test]
    fn canonicalizes_common_date_variants() {
        assert!(canonicalize_scrape_date("2024-01-15T10:00:00Z").is_some());
        assert!(canonicalize_scrape_date("2024-01-15 10:00:00").is_some());
        assert!(canonicalize_scrape_date("2024-01-15").is_some());
        assert!(canonicalize_scrape_date("15th of Jan").is_none());
    }
}
