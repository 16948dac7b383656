//! Greedy diversification planner (§4.G): given breaches and a catalog of
//! candidate products, proposes where to move excess balances so no
//! institution's effective limit is re-breached and the rate given up
//! stays within tolerance.

use crate::compliance::limits::InstitutionExposure;
use crate::config::Config;
use crate::model::{AccountType, CatalogProduct, InstitutionPrefs};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct DiversificationAllocation {
    pub target_regulator_id: String,
    pub amount: Decimal,
    pub rate: Decimal,
    pub rate_loss: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiversificationPlan {
    pub source_regulator_id: String,
    pub excess: Decimal,
    pub allocations: Vec<DiversificationAllocation>,
    pub notes: Vec<String>,
}

/// Best rate on offer per institution, restricted to `account_type_filter`
/// when given. Used both to find the source's current rate and to rank
/// candidate targets.
fn best_rate_by_institution(
    candidates: &[CatalogProduct],
    account_type_filter: Option<AccountType>,
) -> HashMap<String, &CatalogProduct> {
    let mut best: HashMap<String, &CatalogProduct> = HashMap::new();
    for product in candidates {
        if let Some(filter) = account_type_filter {
            if product.account_type != filter {
                continue;
            }
        }
        let Some(regulator_id) = &product.regulator_id else {
            continue;
        };
        match best.get(regulator_id) {
            Some(existing) if existing.aer_rate >= product.aer_rate => {}
            _ => {
                best.insert(regulator_id.clone(), product);
            }
        }
    }
    best
}

/// Traverses breaches in excess-descending order, greedily allocating
/// headroom at other institutions. Headroom is decremented locally as
/// allocations are made so later breaches see already-consumed capacity.
pub fn plan_diversification(
    exposures: &[InstitutionExposure],
    candidates: &[CatalogProduct],
    institution_prefs: &HashMap<String, InstitutionPrefs>,
    account_type_filter: Option<AccountType>,
    config: &Config,
) -> Vec<DiversificationPlan> {
    let max_rate_loss = Decimal::from_f64(config.get_f64("compliance.default_rate_loss_tolerance", 0.5))
        .unwrap_or(Decimal::new(5, 1));

    let mut headroom: HashMap<String, Decimal> = exposures
        .iter()
        .map(|e| (e.regulator_id.clone(), (e.effective_limit - e.aggregate).max(Decimal::ZERO)))
        .collect();

    let best_rates = best_rate_by_institution(candidates, account_type_filter);

    let mut breaches: Vec<&InstitutionExposure> = exposures
        .iter()
        .filter(|e| e.excess_amount > Decimal::ZERO)
        .collect();
    breaches.sort_by(|a, b| b.excess_amount.cmp(&a.excess_amount));

    let mut plans = Vec::new();

    for breach in breaches {
        let mut notes = Vec::new();
        let source_rate = best_rates
            .get(&breach.regulator_id)
            .map(|p| p.aer_rate)
            .unwrap_or(Decimal::ZERO);

        let mut remaining = breach.excess_amount;
        let mut allocations = Vec::new();

        let mut targets: Vec<(&String, &&CatalogProduct)> = best_rates
            .iter()
            .filter(|(id, _)| **id != breach.regulator_id)
            .collect();
        targets.sort_by(|a, b| b.1.aer_rate.cmp(&a.1.aer_rate));

        for (target_id, product) in targets {
            if remaining <= Decimal::ZERO {
                break;
            }
            let rate_loss = (source_rate - product.aer_rate).max(Decimal::ZERO);
            if rate_loss > max_rate_loss {
                continue;
            }
            let requires_easy_access = institution_prefs
                .get(target_id.as_str())
                .is_some_and(|p| p.easy_access_required_above_default);
            if requires_easy_access && product.account_type != AccountType::EasyAccess {
                continue;
            }
            let available = *headroom.get(target_id).unwrap_or(&Decimal::ZERO);
            if available <= Decimal::ZERO {
                continue;
            }
            let amount = available.min(remaining);
            if amount <= Decimal::ZERO {
                continue;
            }

            allocations.push(DiversificationAllocation {
                target_regulator_id: target_id.clone(),
                amount,
                rate: product.aer_rate,
                rate_loss,
            });
            remaining -= amount;
            headroom.insert(target_id.clone(), available - amount);
        }

        if remaining > Decimal::ZERO {
            notes.push(format!(
                "could not fully allocate excess: {remaining} remains unplaced"
            ));
        }

        plans.push(DiversificationPlan {
            source_regulator_id: breach.regulator_id.clone(),
            excess: breach.excess_amount,
            allocations,
            notes,
        });
    }

    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::limits::Status;
    use crate::model::ProtectionType;
    use chrono::Utc;

    fn exposure(regulator_id: &str, aggregate: i64, effective: i64, excess: i64) -> InstitutionExposure {
        InstitutionExposure {
            regulator_id: regulator_id.to_string(),
            aggregate: Decimal::new(aggregate, 0),
            effective_limit: Decimal::new(effective, 0),
            is_joint: false,
            protection_type: ProtectionType::Standard,
            status: Status::Violation,
            excess_amount: Decimal::new(excess, 0),
            severity: None,
        }
    }

    fn product(regulator_id: &str, rate: &str) -> CatalogProduct {
        CatalogProduct {
            id: Some(1),
            source: "moneyfacts".to_string(),
            method: "easy_access".to_string(),
            platform: "direct".to_string(),
            raw_platform: "direct".to_string(),
            bank_name: "Bank".to_string(),
            account_type: AccountType::EasyAccess,
            aer_rate: rate.parse().unwrap(),
            gross_rate: None,
            term_months: None,
            notice_period_days: None,
            min_deposit: Decimal::ONE,
            max_deposit: None,
            fscs_protected: true,
            special_features: None,
            scrape_date: Utc::now(),
            regulator_id: Some(regulator_id.to_string()),
            confidence_score: 1.0,
            business_key: "bk".to_string(),
            batch_id: "b".to_string(),
            quality_score: 0.9,
        }
    }

    #[test]
    fn allocates_excess_to_highest_rate_target_with_headroom() {
        let exposures = vec![exposure("OVER", 90_000, 85_000, 5_000)];
        let candidates = vec![
            product("OVER", "2.00"),
            product("TARGET_LOW", "1.80"),
            product("TARGET_HIGH", "2.10"),
        ];
        let config = {
            let conn = crate::db::open_in_memory().unwrap();
            crate::config::ensure_defaults(&conn).unwrap();
            Config::load(&conn).unwrap()
        };

        // Give TARGET_HIGH headroom via an exposure entry with spare capacity.
        let mut full_exposures = exposures.clone();
        full_exposures.push(InstitutionExposure {
            regulator_id: "TARGET_HIGH".to_string(),
            aggregate: Decimal::ZERO,
            effective_limit: Decimal::new(85_000, 0),
            is_joint: false,
            protection_type: ProtectionType::Standard,
            status: Status::Compliant,
            excess_amount: Decimal::ZERO,
            severity: None,
        });

        let prefs = HashMap::new();
        let plans = plan_diversification(&full_exposures, &candidates, &prefs, None, &config);
        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.source_regulator_id, "OVER");
        assert!(!plan.allocations.is_empty());
        assert_eq!(plan.allocations[0].target_regulator_id, "TARGET_HIGH");
    }
}
