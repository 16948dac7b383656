//! Component E: Cross-Platform Deduplicator.
//!
//! Pure business logic only: grouping, business-key hashing, and quality
//! scoring. Writing `dedup_audit` and delta-applying `products` happens in
//! `catalog`, in the same transaction as the commit, because only that
//! transaction knows the winning rows' real `products.id` values.

use crate::audit::RejectedCandidate;
use crate::config::Config;
use crate::matching::normalize_name;
use crate::model::RawProduct;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Identity used in the business key: the regulator id when known,
/// otherwise the normalized bank name (§4.E).
fn business_identity(raw: &RawProduct, config: &Config) -> String {
    match &raw.regulator_id {
        Some(id) => id.clone(),
        None => normalize_name::normalize(&raw.bank_name, config).0,
    }
}

/// Rounds `rate` to the nearest `dedup.rate_bucket_size` so that
/// platform-to-platform rounding noise (e.g. 2.10% vs 2.099%) doesn't
/// split otherwise-identical products into separate business keys.
fn bucket_rate(rate: Decimal, config: &Config) -> Decimal {
    let bucket_size = Decimal::from_f64(config.get_f64("dedup.rate_bucket_size", 0.05))
        .unwrap_or(Decimal::new(5, 2));
    if bucket_size <= Decimal::ZERO {
        return rate;
    }
    (rate / bucket_size).round() * bucket_size
}

pub fn compute_business_key(raw: &RawProduct, config: &Config) -> String {
    let identity = business_identity(raw, config);
    let bucket = bucket_rate(raw.aer_rate, config);
    let raw_key = format!(
        "{}|{}|{}|{}|{}",
        identity,
        raw.account_type.as_str(),
        raw.term_months.map(|v| v.to_string()).unwrap_or_default(),
        raw.notice_period_days
            .map(|v| v.to_string())
            .unwrap_or_default(),
        bucket,
    );
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Weighted-sum quality score in `[0, 1]` (§4.E). Weights and the
/// per-source trust tier are configuration-driven.
pub fn quality_score(raw: &RawProduct, config: &Config) -> f64 {
    let weight_frn = config.get_f64("dedup.weight_frn", 0.4);
    let weight_completeness = config.get_f64("dedup.weight_completeness", 0.2);
    let weight_recency = config.get_f64("dedup.weight_recency", 0.2);
    let weight_source_trust = config.get_f64("dedup.weight_source_trust", 0.15);
    let weight_special_features = config.get_f64("dedup.weight_special_features", 0.05);

    let frn_score = if raw.regulator_id.is_some() {
        raw.confidence_score
    } else {
        0.0
    };

    let has_special_features = raw
        .special_features
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());

    let mut present = 0u8;
    if raw.term_months.is_some() {
        present += 1;
    }
    if raw.notice_period_days.is_some() {
        present += 1;
    }
    if raw.min_deposit > Decimal::ZERO {
        present += 1;
    }
    if raw.max_deposit.is_some() {
        present += 1;
    }
    if has_special_features {
        present += 1;
    }
    let completeness_score = present as f64 / 5.0;

    let age_days = (Utc::now() - raw.scrape_date).num_days().max(0) as f64;
    let recency_score = (1.0 - age_days / 365.0).clamp(0.0, 1.0);

    let source_key = format!("dedup.source_trust.{}", raw.source);
    let default_trust = config.get_f64("dedup.source_trust.default", 0.5);
    let source_trust_score = config.get_f64(&source_key, default_trust);

    let special_features_score = if has_special_features { 1.0 } else { 0.0 };

    weight_frn * frn_score
        + weight_completeness * completeness_score
        + weight_recency * recency_score
        + weight_source_trust * source_trust_score
        + weight_special_features * special_features_score
}

/// A scored record plus the business key it was grouped under.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub raw: RawProduct,
    pub business_key: String,
    pub score: f64,
}

/// The outcome of deduplicating one business-key group.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub business_key: String,
    pub platforms: Vec<String>,
    /// Keyed `"<platform>:<raw_id>"` → score, for every candidate considered.
    pub scores: HashMap<String, f64>,
    /// One winner per platform, already carrying its `quality_score`.
    pub winners: HashMap<String, crate::model::CatalogProduct>,
    pub rejected: Vec<RejectedCandidate>,
    pub frn_divergence_warning: Option<String>,
    /// `true` when every candidate in the group scored below
    /// `dedup.min_quality_floor`; `winners` is empty in that case.
    pub is_conflict: bool,
}

fn score_key(platform: &str, raw_id: Option<i64>) -> String {
    format!("{platform}:{}", raw_id.unwrap_or(-1))
}

/// Groups `records` by business key and, within each group, picks one
/// winner per platform by quality score (§4.E).
pub fn group_and_score(records: &[RawProduct], config: &Config) -> Vec<GroupOutcome> {
    let min_quality_floor = config.get_f64("dedup.min_quality_floor", 0.2);

    let mut by_key: HashMap<String, Vec<ScoredRecord>> = HashMap::new();
    for raw in records {
        let business_key = compute_business_key(raw, config);
        let score = quality_score(raw, config);
        by_key
            .entry(business_key.clone())
            .or_default()
            .push(ScoredRecord {
                raw: raw.clone(),
                business_key,
                score,
            });
    }

    by_key
        .into_iter()
        .map(|(business_key, candidates)| evaluate_group(business_key, candidates, min_quality_floor))
        .collect()
}

fn evaluate_group(
    business_key: String,
    candidates: Vec<ScoredRecord>,
    min_quality_floor: f64,
) -> GroupOutcome {
    let mut scores = HashMap::new();
    let mut platforms: Vec<String> = Vec::new();
    let mut distinct_regulator_ids: Vec<String> = Vec::new();

    for candidate in &candidates {
        scores.insert(
            score_key(&candidate.raw.platform, candidate.raw.id),
            candidate.score,
        );
        if !platforms.contains(&candidate.raw.platform) {
            platforms.push(candidate.raw.platform.clone());
        }
        if let Some(id) = &candidate.raw.regulator_id {
            if !distinct_regulator_ids.contains(id) {
                distinct_regulator_ids.push(id.clone());
            }
        }
    }

    let frn_divergence_warning = if distinct_regulator_ids.len() > 1 {
        Some(format!(
            "business key {business_key} groups records with divergent regulator ids: {}",
            distinct_regulator_ids.join(", ")
        ))
    } else {
        None
    };

    let best_overall = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::MIN, f64::max);

    if best_overall < min_quality_floor {
        let rejected = candidates
            .into_iter()
            .map(|c| RejectedCandidate {
                product_id: c.raw.id,
                platform: c.raw.platform.clone(),
                quality_score: c.score,
                reason: "below_minimum_quality_floor".to_string(),
            })
            .collect();
        return GroupOutcome {
            business_key,
            platforms,
            scores,
            winners: HashMap::new(),
            rejected,
            frn_divergence_warning,
            is_conflict: true,
        };
    }

    let mut by_platform: HashMap<String, Vec<ScoredRecord>> = HashMap::new();
    for candidate in candidates {
        by_platform
            .entry(candidate.raw.platform.clone())
            .or_default()
            .push(candidate);
    }

    let mut winners = HashMap::new();
    let mut rejected = Vec::new();

    for (platform, mut group) in by_platform {
        group.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        let mut iter = group.into_iter();
        let winner = iter.next().expect("platform group is never empty");
        winners.insert(
            platform.clone(),
            crate::model::CatalogProduct::from_winner(winner.raw, winner.score),
        );
        for loser in iter {
            rejected.push(RejectedCandidate {
                product_id: loser.raw.id,
                platform: loser.raw.platform.clone(),
                quality_score: loser.score,
                reason: "lower_quality_score_same_platform".to_string(),
            });
        }
    }

    GroupOutcome {
        business_key,
        platforms,
        scores,
        winners,
        rejected,
        frn_divergence_warning,
        is_conflict: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::AccountType;
    use chrono::Utc;

    fn base_config() -> Config {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        Config::load(&conn).unwrap()
    }

    fn raw(id: i64, platform: &str, regulator_id: Option<&str>, confidence: f64) -> RawProduct {
        RawProduct {
            id: Some(id),
            source: "moneyfacts".to_string(),
            method: "easy_access".to_string(),
            platform: platform.to_string(),
            raw_platform: platform.to_string(),
            bank_name: "Santander".to_string(),
            account_type: AccountType::EasyAccess,
            aer_rate: Decimal::new(21, 1),
            gross_rate: None,
            term_months: None,
            notice_period_days: None,
            min_deposit: Decimal::ONE,
            max_deposit: Some(Decimal::new(1_000_000, 0)),
            fscs_protected: true,
            special_features: Some("cashback".to_string()),
            scrape_date: Utc::now(),
            regulator_id: regulator_id.map(str::to_string),
            confidence_score: confidence,
            business_key: None,
            batch_id: "batch-1".to_string(),
        }
    }

    #[test]
    fn cross_platform_duplicates_both_win_their_own_platform() {
        let config = base_config();
        let records = vec![
            raw(1, "direct", Some("FRN-1"), 1.0),
            raw(2, "ajbell", Some("FRN-1"), 1.0),
        ];
        let groups = group_and_score(&records, &config);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.winners.len(), 2);
        assert!(group.winners.contains_key("direct"));
        assert!(group.winners.contains_key("ajbell"));
        assert!(group.frn_divergence_warning.is_none());
    }

    #[test]
    fn same_platform_duplicate_picks_higher_confidence_winner() {
        let config = base_config();
        let records = vec![
            raw(1, "direct", Some("FRN-1"), 0.5),
            raw(2, "direct", Some("FRN-1"), 1.0),
        ];
        let groups = group_and_score(&records, &config);
        let group = &groups[0];
        assert_eq!(group.winners.len(), 1);
        assert_eq!(group.rejected.len(), 1);
        let winner = &group.winners["direct"];
        assert_eq!(winner.confidence_score, 1.0);
    }

    #[test]
    fn divergent_frns_in_same_group_produce_warning() {
        let config = base_config();
        let records = vec![
            raw(1, "direct", Some("FRN-1"), 1.0),
            raw(2, "ajbell", Some("FRN-2"), 1.0),
        ];
        let groups = group_and_score(&records, &config);
        assert!(groups[0].frn_divergence_warning.is_some());
    }

    #[test]
    fn group_below_floor_is_a_conflict_with_no_winners() {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        conn.execute(
            "UPDATE config SET config_value = '0.9' WHERE config_key = 'dedup.min_quality_floor'",
            [],
        )
        .unwrap();
        let config = Config::load(&conn).unwrap();

        // No regulator id, no special features, no optional fields: scores low.
        let mut low_quality = raw(1, "direct", None, 0.0);
        low_quality.special_features = None;
        low_quality.max_deposit = None;
        low_quality.term_months = None;

        let groups = group_and_score(&[low_quality], &config);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_conflict);
        assert!(groups[0].winners.is_empty());
        assert_eq!(groups[0].rejected.len(), 1);
    }
}
