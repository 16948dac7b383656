//! Component F: Catalog Commit & Audit Sink.
//!
//! Everything happens in one transaction: delta-apply `products` for the
//! business keys touched by this batch, write `dedup_audit`, mark
//! `batch_master.status = committed`. This is also where `dedup_audit`
//! learns the real `products.id` of each winner, which is why dedup's
//! grouping logic (`dedup::group_and_score`) never writes audit rows
//! itself — only `catalog::commit` knows those ids.

use crate::audit::DedupAuditRow;
use crate::dedup::GroupOutcome;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BatchSummary {
    pub records_read: usize,
    pub valid: usize,
    pub filtered: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub deduped_groups: usize,
    pub committed: usize,
    pub warnings: Vec<String>,
}

/// Deletes existing `products` rows for the business keys this batch
/// touched, inserts the winners, writes `dedup_audit`, and marks the
/// batch committed — all inside `conn`'s active transaction.
pub fn commit(
    tx: &Connection,
    batch_id: &str,
    groups: &[GroupOutcome],
    summary: &mut BatchSummary,
) -> Result<()> {
    for group in groups {
        // Scoped to this group's own platforms, not the whole business key:
        // a business key can be shared with a platform committed by an
        // earlier batch that this group never touched (scenario: two feed
        // files for the same bank/rate on different platforms), and that
        // row must survive untouched.
        for platform in &group.platforms {
            tx.execute(
                "DELETE FROM products WHERE business_key = ?1 AND platform = ?2",
                params![group.business_key, platform],
            )
            .context("deleting stale products for business key/platform")?;
        }

        let mut winner_ids: std::collections::HashMap<String, i64> = std::collections::HashMap::new();

        for (platform, winner) in &group.winners {
            tx.execute(
                "INSERT INTO products
                    (source, method, platform, raw_platform, bank_name, account_type, aer_rate,
                     gross_rate, term_months, notice_period_days, min_deposit, max_deposit,
                     fscs_protected, special_features, scrape_date, regulator_id,
                     confidence_score, business_key, batch_id, quality_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    winner.source,
                    winner.method,
                    winner.platform,
                    winner.raw_platform,
                    winner.bank_name,
                    winner.account_type.as_str(),
                    winner.aer_rate.to_string(),
                    winner.gross_rate.map(|d| d.to_string()),
                    winner.term_months,
                    winner.notice_period_days,
                    winner.min_deposit.to_string(),
                    winner.max_deposit.map(|d| d.to_string()),
                    winner.fscs_protected as i64,
                    winner.special_features,
                    winner.scrape_date.to_rfc3339(),
                    winner.regulator_id,
                    winner.confidence_score,
                    winner.business_key,
                    winner.batch_id,
                    winner.quality_score,
                ],
            )
            .context("inserting catalog winner row")?;
            winner_ids.insert(platform.clone(), tx.last_insert_rowid());
            summary.committed += 1;
        }

        if let Some(warning) = &group.frn_divergence_warning {
            summary.warnings.push(warning.clone());
        }

        let winner_product_id = if winner_ids.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&winner_ids)
                    .context("serializing winner product ids")?,
            )
        };

        let row = DedupAuditRow {
            batch_id: batch_id.to_string(),
            group_id: group.business_key.clone(),
            business_key: group.business_key.clone(),
            platforms_in_group: group.platforms.clone(),
            quality_scores: group.scores.clone(),
            winner_product_id,
            rejected_products: group.rejected.clone(),
            frn_divergence_warning: group.frn_divergence_warning.clone(),
        };
        crate::audit::insert_dedup_audit(tx, &row).context("writing dedup_audit row")?;

        if group.is_conflict {
            summary
                .warnings
                .push(format!("business key {} below minimum quality floor", group.business_key));
        }
    }

    summary.deduped_groups = groups.len();

    tx.execute(
        "UPDATE batch_master SET status = 'committed', finished_at = ?2 WHERE batch_id = ?1",
        params![batch_id, chrono::Utc::now().to_rfc3339()],
    )
    .context("marking batch committed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db;
    use crate::dedup;
    use crate::model::AccountType;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn seed_batch(conn: &Connection, batch_id: &str) {
        conn.execute(
            "INSERT INTO batch_master (batch_id, started_at, file_path, source, method, status)
             VALUES (?1, ?2, 'f.json', 's', 'm', 'running')",
            params![batch_id, Utc::now().to_rfc3339()],
        )
        .unwrap();
    }

    fn raw(platform: &str) -> crate::model::RawProduct {
        crate::model::RawProduct {
            id: Some(1),
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
            max_deposit: None,
            fscs_protected: true,
            special_features: None,
            scrape_date: Utc::now(),
            regulator_id: Some("FRN-1".to_string()),
            confidence_score: 1.0,
            business_key: None,
            batch_id: "batch-1".to_string(),
        }
    }

    #[test]
    fn commit_inserts_winner_and_marks_batch_committed() {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        let config = Config::load(&conn).unwrap();
        seed_batch(&conn, "batch-1");

        let records = vec![raw("direct")];
        let groups = dedup::group_and_score(&records, &config);

        let mut summary = BatchSummary::default();
        commit(&conn, "batch-1", &groups, &mut summary).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(summary.committed, 1);

        let status: String = conn
            .query_row(
                "SELECT status FROM batch_master WHERE batch_id = 'batch-1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "committed");
    }

    #[test]
    fn committing_a_second_batch_leaves_other_platforms_of_the_same_business_key_alone() {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        let config = Config::load(&conn).unwrap();
        seed_batch(&conn, "batch-1");
        seed_batch(&conn, "batch-2");

        let first_batch = vec![raw("direct")];
        let first_groups = dedup::group_and_score(&first_batch, &config);
        let mut first_summary = BatchSummary::default();
        commit(&conn, "batch-1", &first_groups, &mut first_summary).unwrap();

        // Second batch's slice only ever saw "ajbell" — same business key,
        // different platform, arriving from a different (source, method).
        let second_batch = vec![raw("ajbell")];
        let second_groups = dedup::group_and_score(&second_batch, &config);
        let mut second_summary = BatchSummary::default();
        commit(&conn, "batch-2", &second_groups, &mut second_summary).unwrap();

        let platforms: Vec<String> = conn
            .prepare("SELECT platform FROM products ORDER BY platform")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(platforms, vec!["ajbell".to_string(), "direct".to_string()]);
    }
}
