//! In-memory mirror of `regulator_lookup`, refreshed on a content-version
//! check the same way `config::Config` guards its own reload (Design Note:
//! cache handles shared across worker threads). Grouped by `search_name`
//! so a strategy lookup is a hash lookup plus a linear scan of a handful
//! of rows, never a table scan.

use crate::model::{MatchType, RegulatorLookupRow};
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct LookupCache {
    by_search_name: HashMap<String, Vec<RegulatorLookupRow>>,
    version: u64,
}

impl LookupCache {
    fn content_version(conn: &Connection) -> Result<u64> {
        use std::hash::{Hash, Hasher};
        let mut stmt = conn
            .prepare(
                "SELECT search_name, regulator_id, canonical_name, match_type, confidence_score, match_rank
                 FROM regulator_lookup ORDER BY id",
            )
            .context("preparing regulator_lookup version scan")?;
        let mut rows = stmt.query([])?;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        while let Some(row) = rows.next()? {
            let search_name: String = row.get(0)?;
            let regulator_id: String = row.get(1)?;
            let canonical_name: String = row.get(2)?;
            let match_type: String = row.get(3)?;
            let confidence: f64 = row.get(4)?;
            let rank: i64 = row.get(5)?;
            search_name.hash(&mut hasher);
            regulator_id.hash(&mut hasher);
            canonical_name.hash(&mut hasher);
            match_type.hash(&mut hasher);
            confidence.to_string().hash(&mut hasher);
            rank.hash(&mut hasher);
        }
        Ok(hasher.finish())
    }

    fn reload(&mut self, conn: &Connection) -> Result<()> {
        let mut stmt = conn
            .prepare(
                "SELECT search_name, regulator_id, canonical_name, match_type, confidence_score, match_rank
                 FROM regulator_lookup",
            )
            .context("preparing regulator_lookup reload")?;
        let mut rows = stmt.query([])?;
        let mut by_search_name: HashMap<String, Vec<RegulatorLookupRow>> = HashMap::new();
        while let Some(row) = rows.next()? {
            let match_type_raw: String = row.get(3)?;
            let match_type = match match_type_raw.as_str() {
                "manual_override" => MatchType::ManualOverride,
                "direct_match" => MatchType::DirectMatch,
                "name_variation" => MatchType::NameVariation,
                "shared_brand" => MatchType::SharedBrand,
                "alias" => MatchType::Alias,
                other => {
                    anyhow::bail!("unrecognized match_type in regulator_lookup: {other}")
                }
            };
            let lookup_row = RegulatorLookupRow {
                search_name: row.get(0)?,
                regulator_id: row.get(1)?,
                canonical_name: row.get(2)?,
                match_type,
                confidence_score: row.get(4)?,
                match_rank: row.get(5)?,
            };
            by_search_name
                .entry(lookup_row.search_name.clone())
                .or_default()
                .push(lookup_row);
        }
        self.version = Self::content_version(conn)?;
        self.by_search_name = by_search_name;
        Ok(())
    }

    /// Returns whether a reload happened.
    pub fn refresh_if_version_changed(&mut self, conn: &Connection) -> Result<bool> {
        let new_version = Self::content_version(conn)?;
        if new_version == self.version && !self.by_search_name.is_empty() {
            return Ok(false);
        }
        self.reload(conn)?;
        Ok(true)
    }

    pub fn rows_for(&self, search_name: &str) -> &[RegulatorLookupRow] {
        self.by_search_name
            .get(search_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_rows(&self) -> impl Iterator<Item = &RegulatorLookupRow> {
        self.by_search_name.values().flatten()
    }
}

/// Shared handle: a single refresh lock serializes reloads while readers
/// take the cheap read side of the `RwLock` concurrently.
#[derive(Clone)]
pub struct CacheHandle {
    inner: Arc<RwLock<LookupCache>>,
    refresh_lock: Arc<Mutex<()>>,
}

impl CacheHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(LookupCache::default())),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn refresh_if_version_changed(&self, conn: &Connection) -> Result<bool> {
        let _guard = self.refresh_lock.lock();
        let mut cache = self.inner.write();
        cache.refresh_if_version_changed(conn)
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, LookupCache> {
        self.inner.read()
    }
}

impl Default for CacheHandle {
    fn default() -> Self {
        Self::new()
    }
}
