//! Unknown-name queue: names the matcher couldn't resolve accumulate here
//! for manual triage instead of silently dropping the record (§4.D).
//! Overflow policy pinned in `DESIGN.md`: an existing entry always gets
//! bumped; a genuinely new name is dropped once the queue is at capacity.

use crate::config::Config;
use crate::model::{ResearchQueueEntry, ResearchQueueStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

fn status_str(status: ResearchQueueStatus) -> &'static str {
    match status {
        ResearchQueueStatus::Open => "open",
        ResearchQueueStatus::Resolved => "resolved",
        ResearchQueueStatus::Dismissed => "dismissed",
    }
}

fn status_from_str(s: &str) -> ResearchQueueStatus {
    match s {
        "resolved" => ResearchQueueStatus::Resolved,
        "dismissed" => ResearchQueueStatus::Dismissed,
        _ => ResearchQueueStatus::Open,
    }
}

/// Whether `name` already has an (open or not) entry.
fn exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM research_queue WHERE name = ?1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .context("checking research_queue membership")
    .map(|row| row.is_some())
}

fn open_count(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM research_queue WHERE status = 'open'",
        [],
        |row| row.get(0),
    )
    .context("counting open research_queue entries")
}

/// Records that `name` failed to match. Returns `true` if the name is now
/// tracked (inserted or bumped), `false` if it was dropped due to
/// capacity.
pub fn upsert(conn: &Connection, name: &str, config: &Config) -> Result<bool> {
    let now = Utc::now();

    if exists(conn, name)? {
        conn.execute(
            "UPDATE research_queue SET last_seen = ?2, occurrence_count = occurrence_count + 1
             WHERE name = ?1",
            params![name, now.to_rfc3339()],
        )
        .context("bumping existing research_queue entry")?;
        return Ok(true);
    }

    let max_size = config.get_i64("matching.research_queue_max_size", 500);
    if open_count(conn)? >= max_size {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO research_queue (name, first_seen, last_seen, occurrence_count, status)
         VALUES (?1, ?2, ?2, 1, 'open')",
        params![name, now.to_rfc3339()],
    )
    .context("inserting new research_queue entry")?;
    Ok(true)
}

pub fn list(conn: &Connection, status: Option<ResearchQueueStatus>) -> Result<Vec<ResearchQueueEntry>> {
    let sql = match status {
        Some(_) => {
            "SELECT name, first_seen, last_seen, occurrence_count, status FROM research_queue WHERE status = ?1 ORDER BY occurrence_count DESC"
        }
        None => {
            "SELECT name, first_seen, last_seen, occurrence_count, status FROM research_queue ORDER BY occurrence_count DESC"
        }
    };
    let mut stmt = conn.prepare(sql).context("preparing research_queue list")?;

    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<ResearchQueueEntry> {
        let first_seen: String = row.get(1)?;
        let last_seen: String = row.get(2)?;
        let status_raw: String = row.get(4)?;
        Ok(ResearchQueueEntry {
            name: row.get(0)?,
            first_seen: first_seen
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            last_seen: last_seen.parse().unwrap_or_else(|_| Utc::now()),
            occurrence_count: row.get(3)?,
            status: status_from_str(&status_raw),
        })
    };

    let rows = match status {
        Some(s) => stmt
            .query_map(params![status_str(s)], map_row)
            .context("querying research_queue by status")?
            .collect::<rusqlite::Result<Vec<_>>>(),
        None => stmt
            .query_map([], map_row)
            .context("querying research_queue")?
            .collect::<rusqlite::Result<Vec<_>>>(),
    };
    rows.context("collecting research_queue rows")
}

pub fn set_status(conn: &Connection, name: &str, status: ResearchQueueStatus) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE research_queue SET status = ?2 WHERE name = ?1",
            params![name, status_str(status)],
        )
        .context("updating research_queue status")?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn config_with_max_size(max: i64) -> Config {
        let conn = db::open_in_memory().unwrap();
        crate::config::ensure_defaults(&conn).unwrap();
        conn.execute(
            "UPDATE config SET config_value = ?1 WHERE config_key = 'matching.research_queue_max_size'",
            params![max.to_string()],
        )
        .unwrap();
        Config::load(&conn).unwrap()
    }

    #[test]
    fn new_name_inserted_and_bumped_on_repeat() {
        let conn = db::open_in_memory().unwrap();
        let config = config_with_max_size(500);

        assert!(upsert(&conn, "Mystery Bank", &config).unwrap());
        assert!(upsert(&conn, "Mystery Bank", &config).unwrap());

        let entries = list(&conn, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].occurrence_count, 2);
    }

    #[test]
    fn existing_entry_bumped_even_at_capacity_but_new_dropped() {
        let conn = db::open_in_memory().unwrap();
        let config = config_with_max_size(1);

        assert!(upsert(&conn, "Bank A", &config).unwrap());
        // Queue is now at capacity (1 open entry); a brand new name is dropped.
        assert!(!upsert(&conn, "Bank B", &config).unwrap());
        // The existing entry still gets bumped regardless of capacity.
        assert!(upsert(&conn, "Bank A", &config).unwrap());

        let entries = list(&conn, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Bank A");
        assert_eq!(entries[0].occurrence_count, 2);
    }

    #[test]
    fn set_status_resolves_entry() {
        let conn = db::open_in_memory().unwrap();
        let config = config_with_max_size(500);
        upsert(&conn, "Bank A", &config).unwrap();

        assert!(set_status(&conn, "Bank A", ResearchQueueStatus::Resolved).unwrap());
        let entries = list(&conn, Some(ResearchQueueStatus::Resolved)).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(list(&conn, Some(ResearchQueueStatus::Open)).unwrap().is_empty());
    }
}
