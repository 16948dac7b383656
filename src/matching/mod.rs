//! Component D: Regulator-ID Matcher.
//!
//! Six strategies tried in a fixed priority order, modeled as a tagged
//! variant rather than a trait-object hierarchy (Design Note: "tagged
//! variant over strategies" — composition over inheritance, the same
//! shape as the teacher's signal-strategy dispatch). The first strategy
//! to produce a hit wins; disabling a strategy via config removes it from
//! the chain entirely, so it can never be recorded as the winner.

pub mod cache;
pub mod fuzzy;
pub mod normalize_name;

use crate::config::Config;
use crate::model::{DatabaseQueryMethod, MatchType, RegulatorLookupRow};
use cache::LookupCache;

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub normalized_name: String,
    pub normalization_steps: Vec<String>,
    pub database_query_method: DatabaseQueryMethod,
    pub match_type: Option<MatchType>,
    pub regulator_id: Option<String>,
    pub confidence: f64,
}

impl MatchOutcome {
    fn unmatched(normalized_name: String, normalization_steps: Vec<String>) -> Self {
        Self {
            normalized_name,
            normalization_steps,
            database_query_method: DatabaseQueryMethod::Unknown,
            match_type: None,
            regulator_id: None,
            confidence: 0.0,
        }
    }

    /// Per §4.D, a record routes to manual review when nothing matched or
    /// when the winning confidence falls below the configured threshold.
    pub fn needs_review(&self, config: &Config) -> bool {
        let threshold = config.get_f64("matching.confidence_threshold_high", 0.7);
        self.regulator_id.is_none() || self.confidence < threshold
    }
}

#[derive(Debug, Clone, Copy)]
enum Strategy {
    ManualOverride,
    DirectMatch,
    NameVariation,
    SharedBrand,
    Alias,
    Fuzzy,
}

const CHAIN: [Strategy; 6] = [
    Strategy::ManualOverride,
    Strategy::DirectMatch,
    Strategy::NameVariation,
    Strategy::SharedBrand,
    Strategy::Alias,
    Strategy::Fuzzy,
];

impl Strategy {
    fn enabled(self, config: &Config) -> bool {
        let key = match self {
            Self::ManualOverride => "matching.enable_manual_override",
            Self::DirectMatch => "matching.enable_direct_match",
            Self::NameVariation => "matching.enable_name_variation",
            Self::SharedBrand => "matching.enable_shared_brand",
            Self::Alias => "matching.enable_alias",
            Self::Fuzzy => "matching.enable_fuzzy",
        };
        config.get_bool(key, true)
    }

    fn match_type(self) -> Option<MatchType> {
        match self {
            Self::ManualOverride => Some(MatchType::ManualOverride),
            Self::DirectMatch => Some(MatchType::DirectMatch),
            Self::NameVariation => Some(MatchType::NameVariation),
            Self::SharedBrand => Some(MatchType::SharedBrand),
            Self::Alias => Some(MatchType::Alias),
            Self::Fuzzy => None,
        }
    }

    fn query_method(self) -> DatabaseQueryMethod {
        match self {
            Self::ManualOverride | Self::DirectMatch | Self::NameVariation => {
                DatabaseQueryMethod::ExactMatch
            }
            Self::SharedBrand => DatabaseQueryMethod::SharedBrand,
            Self::Alias => DatabaseQueryMethod::Alias,
            Self::Fuzzy => DatabaseQueryMethod::Fuzzy,
        }
    }

    fn attempt<'a>(
        self,
        normalized_name: &str,
        cache: &'a LookupCache,
        config: &Config,
    ) -> Option<(&'a RegulatorLookupRow, f64)> {
        match self {
            Self::Fuzzy => fuzzy_attempt(normalized_name, cache, config),
            _ => exact_attempt(normalized_name, cache, self.match_type().unwrap()),
        }
    }
}

/// Among rows for `normalized_name` with the given `match_type`, the
/// lowest `match_rank` wins (invariant: rank=1 is the row selected on an
/// exact hit).
fn exact_attempt(
    normalized_name: &str,
    cache: &LookupCache,
    match_type: MatchType,
) -> Option<(&RegulatorLookupRow, f64)> {
    cache
        .rows_for(normalized_name)
        .iter()
        .filter(|row| row.match_type == match_type)
        .min_by_key(|row| row.match_rank)
        .map(|row| {
            let confidence = match match_type {
                MatchType::ManualOverride | MatchType::DirectMatch => 1.0,
                _ => row.confidence_score,
            };
            (row, confidence)
        })
}

/// Edit-distance search against every active `search_name` in the cache.
/// Accepted only if similarity clears `fuzzy_threshold` and edit distance
/// is within `max_edit_distance`; ties broken by lowest `match_rank`.
fn fuzzy_attempt<'a>(
    normalized_name: &str,
    cache: &'a LookupCache,
    config: &Config,
) -> Option<(&'a RegulatorLookupRow, f64)> {
    let threshold = config.get_f64("matching.fuzzy_threshold", 0.85);
    let max_edit_distance = config.get_i64("matching.max_edit_distance", 2) as usize;

    let mut best: Option<(&RegulatorLookupRow, f64)> = None;
    for row in cache.all_rows() {
        let distance = fuzzy::levenshtein(normalized_name, &row.search_name);
        if distance > max_edit_distance {
            continue;
        }
        let similarity = fuzzy::similarity(normalized_name, &row.search_name);
        if similarity < threshold {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_row, best_sim)) => {
                similarity > best_sim
                    || (similarity == best_sim && row.match_rank < best_row.match_rank)
            }
        };
        if better {
            best = Some((row, similarity));
        }
    }
    best
}

/// Runs the full normalization + strategy chain for one bank name.
pub fn resolve(original_name: &str, cache: &LookupCache, config: &Config) -> MatchOutcome {
    let (normalized_name, normalization_steps) = normalize_name::normalize(original_name, config);

    for strategy in CHAIN {
        if !strategy.enabled(config) {
            continue;
        }
        if let Some((row, confidence)) = strategy.attempt(&normalized_name, cache, config) {
            return MatchOutcome {
                normalized_name,
                normalization_steps,
                database_query_method: strategy.query_method(),
                match_type: Some(row.match_type),
                regulator_id: Some(row.regulator_id.clone()),
                confidence,
            };
        }
    }

    MatchOutcome::unmatched(normalized_name, normalization_steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seeded_config_and_cache() -> (Config, LookupCache) {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        let config = Config::load(&conn).unwrap();

        conn.execute(
            "INSERT INTO regulator_lookup (search_name, regulator_id, canonical_name, match_type, confidence_score, match_rank)
             VALUES
                ('SANTANDER', 'FRN-999', 'Santander UK plc (manual)', 'manual_override', 1.0, 1),
                ('SANTANDER', 'FRN-111', 'Santander UK plc', 'direct_match', 1.0, 2)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO regulator_lookup (search_name, regulator_id, canonical_name, match_type, confidence_score, match_rank)
             VALUES ('MARCUS BY GOLDMAN SACHS', 'FRN-222', 'Goldman Sachs International Bank', 'shared_brand', 0.9, 1)",
            [],
        )
        .unwrap();

        let mut cache = LookupCache::default();
        cache.refresh_if_version_changed(&conn).unwrap();
        (config, cache)
    }

    #[test]
    fn manual_override_wins_over_direct_match() {
        let (config, cache) = seeded_config_and_cache();
        let outcome = resolve("Santander", &cache, &config);
        assert_eq!(outcome.regulator_id.as_deref(), Some("FRN-999"));
        assert_eq!(outcome.match_type, Some(MatchType::ManualOverride));
        assert_eq!(outcome.confidence, 1.0);
        assert!(!outcome.needs_review(&config));
    }

    #[test]
    fn shared_brand_strategy_used_when_no_exact_hit() {
        let (config, cache) = seeded_config_and_cache();
        let outcome = resolve("Marcus by Goldman Sachs", &cache, &config);
        assert_eq!(outcome.regulator_id.as_deref(), Some("FRN-222"));
        assert_eq!(outcome.match_type, Some(MatchType::SharedBrand));
        assert_eq!(outcome.database_query_method, DatabaseQueryMethod::SharedBrand);
    }

    #[test]
    fn disabled_strategy_is_never_the_winner() {
        let (_unused_config, cache) = seeded_config_and_cache();
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        conn.execute(
            "UPDATE config SET config_value = 'false' WHERE config_key = 'matching.enable_manual_override'",
            [],
        )
        .unwrap();
        let config = Config::load(&conn).unwrap();

        let outcome = resolve("Santander", &cache, &config);
        assert_eq!(outcome.match_type, Some(MatchType::DirectMatch));
        assert_eq!(outcome.regulator_id.as_deref(), Some("FRN-111"));
    }

    #[test]
    fn unmatched_name_routes_to_review() {
        let (config, cache) = seeded_config_and_cache();
        let outcome = resolve("Some Totally Unknown Building Society", &cache, &config);
        assert!(outcome.regulator_id.is_none());
        assert!(outcome.needs_review(&config));
    }
}
