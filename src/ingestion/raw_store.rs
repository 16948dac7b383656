//! Component C: Raw Accumulator.
//!
//! Method-scoped delete-then-insert: replacing `(source, method)` never
//! touches any other slice of `products_raw`. Runs inside a single
//! transaction so a failure midway leaves the prior slice intact rather
//! than half-deleted (§4.C `AccumulationConflict`).

use crate::model::RawProduct;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};

/// Deletes the `(source, method)` slice and bulk-inserts `records`.
/// Returns the number of rows inserted.
pub fn replace_slice(
    conn: &mut Connection,
    source: &str,
    method: &str,
    records: &[RawProduct],
) -> Result<usize> {
    let tx = conn.transaction().context("opening raw-accumulator transaction")?;
    tx.execute(
        "DELETE FROM products_raw WHERE source = ?1 AND method = ?2",
        params![source, method],
    )
    .context("deleting prior (source, method) slice")?;

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO products_raw
                    (source, method, platform, raw_platform, bank_name, account_type, aer_rate,
                     gross_rate, term_months, notice_period_days, min_deposit, max_deposit,
                     fscs_protected, special_features, scrape_date, regulator_id,
                     confidence_score, business_key, batch_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            )
            .context("preparing raw insert statement")?;

        for record in records {
            stmt.execute(params![
                record.source,
                record.method,
                record.platform,
                record.raw_platform,
                record.bank_name,
                record.account_type.as_str(),
                record.aer_rate.to_string(),
                record.gross_rate.map(|d| d.to_string()),
                record.term_months,
                record.notice_period_days,
                record.min_deposit.to_string(),
                record.max_deposit.map(|d| d.to_string()),
                record.fscs_protected as i64,
                record.special_features,
                record.scrape_date.to_rfc3339(),
                record.regulator_id,
                record.confidence_score,
                record.business_key,
                record.batch_id,
            ])
            .context("inserting raw product row")?;
        }
    }

    tx.commit().context("committing raw-accumulator transaction")?;
    Ok(records.len())
}

pub fn count_for(conn: &Connection, source: &str, method: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM products_raw WHERE source = ?1 AND method = ?2",
        params![source, method],
        |row| row.get(0),
    )
    .context("counting raw rows for (source, method)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::AccountType;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn sample(source: &str, method: &str, bank: &str) -> RawProduct {
        RawProduct {
            id: None,
            source: source.to_string(),
            method: method.to_string(),
            platform: "moneyfacts".to_string(),
            raw_platform: "MoneyFacts".to_string(),
            bank_name: bank.to_string(),
            account_type: AccountType::EasyAccess,
            aer_rate: Decimal::new(21, 1),
            gross_rate: None,
            term_months: None,
            notice_period_days: None,
            min_deposit: Decimal::ZERO,
            max_deposit: None,
            fscs_protected: true,
            special_features: None,
            scrape_date: Utc::now(),
            regulator_id: None,
            confidence_score: 0.0,
            business_key: None,
            batch_id: "batch-1".to_string(),
        }
    }

    #[test]
    fn method_scoped_replacement_leaves_other_slices_untouched() {
        let mut conn = db::open_in_memory().unwrap();

        let easy = vec![sample("moneyfacts", "easy_access", "Bank A"); 3];
        replace_slice(&mut conn, "moneyfacts", "easy_access", &easy).unwrap();

        let fixed = vec![sample("moneyfacts", "fixed_term", "Bank B"); 5];
        replace_slice(&mut conn, "moneyfacts", "fixed_term", &fixed).unwrap();

        assert_eq!(count_for(&conn, "moneyfacts", "easy_access").unwrap(), 3);
        assert_eq!(count_for(&conn, "moneyfacts", "fixed_term").unwrap(), 5);

        let easy_again = vec![sample("moneyfacts", "easy_access", "Bank A2"); 2];
        replace_slice(&mut conn, "moneyfacts", "easy_access", &easy_again).unwrap();

        assert_eq!(count_for(&conn, "moneyfacts", "easy_access").unwrap(), 2);
        assert_eq!(count_for(&conn, "moneyfacts", "fixed_term").unwrap(), 5);
    }
}
