//! Vector index: a similarity-searchable cache over the memory log.
//!
//! Rows live in `index_entries` (see [`crate::db::schema`]). Ranking uses
//! sqlite-vec's `vec_distance_cosine` over the rows that survive the
//! filter's `WHERE` clause, so filters always apply before `LIMIT k`.
//!
//! The index never owns data the log does not have. It can be dropped and
//! rebuilt at any time with [`VectorIndex::replace_all`].

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db;
use crate::error::{Error, Result};
use crate::memory::types::{MemoryEntry, MemoryType, Metadata, SearchFilter};
use crate::memory::{bytes_to_embedding, check_embedding, embedding_to_bytes};

/// The attributes searches filter on.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexAttributes {
    pub memory_type: MemoryType,
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,
    pub consolidated: bool,
}

impl From<&MemoryEntry> for IndexAttributes {
    fn from(entry: &MemoryEntry) -> Self {
        Self {
            memory_type: entry.memory_type,
            importance: entry.importance,
            timestamp: entry.timestamp,
            metadata: entry.metadata.clone(),
            consolidated: entry.consolidated,
        }
    }
}

/// A full row, used when rebuilding.
#[derive(Debug, Clone)]
pub struct IndexRow {
    pub id: u64,
    pub embedding: Vec<f32>,
    pub attributes: IndexAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    /// Cosine similarity, higher is closer.
    pub score: f64,
}

/// Access bookkeeping for one indexed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessStats {
    pub count: u32,
    pub last_accessed: Option<i64>,
}

pub struct VectorIndex {
    conn: Connection,
    model_id: String,
    dimensions: usize,
    was_reset: bool,
}

impl VectorIndex {
    /// Open (or create) an on-disk index for vectors from `model_id`.
    ///
    /// If the stored vectors came from a different model or dimension they
    /// are discarded; [`was_reset`](Self::was_reset) reports it.
    pub fn open(path: impl AsRef<Path>, model_id: &str, dimensions: usize) -> Result<Self> {
        let conn = db::open_database(path).map_err(Error::IndexOpen)?;
        Self::from_connection(conn, model_id, dimensions)
    }

    pub fn open_in_memory(model_id: &str, dimensions: usize) -> Result<Self> {
        let conn = db::open_memory_database().map_err(Error::IndexOpen)?;
        Self::from_connection(conn, model_id, dimensions)
    }

    fn from_connection(conn: Connection, model_id: &str, dimensions: usize) -> Result<Self> {
        let stored_model = db::migrations::get_embedding_model(&conn)?;
        let stored_dims = db::migrations::get_embedding_dimensions(&conn)?;
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM index_entries", [], |r| r.get(0))?;

        let matches = stored_model.as_deref() == Some(model_id) && stored_dims == Some(dimensions);
        let was_reset = !matches && rows > 0;
        if was_reset {
            tracing::warn!(
                stored_model = stored_model.as_deref().unwrap_or("(unset)"),
                configured_model = model_id,
                rows,
                "embedding model changed, discarding index"
            );
            conn.execute("DELETE FROM index_entries", [])?;
        }
        db::migrations::set_embedding_model(&conn, model_id)?;
        db::migrations::set_embedding_dimensions(&conn, dimensions)?;

        Ok(Self {
            conn,
            model_id: model_id.to_string(),
            dimensions,
            was_reset,
        })
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert or replace the vector and attributes for `id`. Access counts
    /// of an existing row are kept.
    pub fn upsert(&self, id: u64, embedding: &[f32], attributes: &IndexAttributes) -> Result<()> {
        check_embedding(embedding, self.dimensions)?;
        upsert_row(&self.conn, id, embedding, attributes, AccessStats::default())
    }

    /// Remove `id`. Returns whether a row existed.
    pub fn remove(&self, id: u64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM index_entries WHERE id = ?1", [id as i64])?;
        Ok(n > 0)
    }

    /// Remove several ids in one transaction. Returns how many rows existed.
    pub fn remove_many(&self, ids: &[u64]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM index_entries WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute([*id as i64])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Overwrite importance and the consolidated flag for existing rows.
    pub fn set_attributes(&self, updates: &[(u64, f64, bool)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE index_entries SET importance = ?2, consolidated = ?3 WHERE id = ?1",
            )?;
            for (id, importance, consolidated) in updates {
                stmt.execute(params![*id as i64, importance.clamp(0.0, 1.0), consolidated])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Bump access counters for entries that were just returned to a caller.
    pub fn record_access(&self, ids: &[u64]) -> Result<()> {
        let now = Utc::now().timestamp_micros();
        let mut stmt = self.conn.prepare_cached(
            "UPDATE index_entries SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
        )?;
        for id in ids {
            stmt.execute(params![*id as i64, now])?;
        }
        Ok(())
    }

    /// Replace the whole index with `rows` in a single transaction.
    ///
    /// Holding `&mut self` for the duration keeps searches out until the
    /// new contents are committed. Access counts carry over for ids that
    /// are still present.
    pub fn replace_all(&mut self, rows: &[IndexRow]) -> Result<usize> {
        for row in rows {
            check_embedding(&row.embedding, self.dimensions)?;
        }
        let access = self.access_stats()?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM index_entries", [])?;
        for row in rows {
            let stats = access.get(&row.id).copied().unwrap_or_default();
            upsert_row(&tx, row.id, &row.embedding, &row.attributes, stats)?;
        }
        tx.commit()?;

        tracing::info!(rows = rows.len(), model = %self.model_id, "index rebuilt");
        Ok(rows.len())
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM index_entries", [])?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Rank indexed entries by cosine similarity to `query`.
    ///
    /// Ordered by descending score; equal scores put the more recent entry
    /// first. `filter` restricts the candidate set before the `k` cut.
    pub fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        check_embedding(query, self.dimensions)?;

        let (clause, mut values) = filter_clause(filter)?;
        let sql = format!(
            "SELECT id, vec_distance_cosine(embedding, ?) AS distance
             FROM index_entries
             WHERE 1 = 1{clause}
             ORDER BY distance ASC, created_at DESC, id DESC
             LIMIT ?"
        );
        values.insert(0, Value::Blob(embedding_to_bytes(query).to_vec()));
        values.push(Value::Integer(k as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let hits = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                let id: i64 = row.get(0)?;
                let distance: f64 = row.get(1)?;
                Ok(SearchHit {
                    id: id as u64,
                    score: 1.0 - distance,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM index_entries WHERE id = ?1", [id as i64], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM index_entries", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn ids(&self) -> Result<HashSet<u64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM index_entries")?;
        let ids = stmt
            .query_map([], |r| r.get::<_, i64>(0).map(|id| id as u64))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Stored `(importance, consolidated)` per id, for drift checks against the log.
    pub fn attributes(&self) -> Result<HashMap<u64, (f64, bool)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, importance, consolidated FROM index_entries")?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)? as u64,
                    (r.get::<_, f64>(1)?, r.get::<_, bool>(2)?),
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn access_stats(&self) -> Result<HashMap<u64, AccessStats>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, access_count, last_accessed FROM index_entries")?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)? as u64,
                    AccessStats {
                        count: r.get::<_, i64>(1)?.max(0) as u32,
                        last_accessed: r.get(2)?,
                    },
                ))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn embedding(&self, id: u64) -> Result<Option<Vec<f32>>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM index_entries WHERE id = ?1",
                [id as i64],
                |r| r.get(0),
            )
            .optional()?;
        Ok(bytes.map(|b| bytes_to_embedding(&b)))
    }

    /// Allocated database size in bytes.
    pub fn size_bytes(&self) -> Result<u64> {
        let pages: i64 = self.conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = self.conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok((pages * page_size).max(0) as u64)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// True if opening discarded vectors from a different model.
    pub fn was_reset(&self) -> bool {
        self.was_reset
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn upsert_row(
    conn: &Connection,
    id: u64,
    embedding: &[f32],
    attributes: &IndexAttributes,
    access: AccessStats,
) -> Result<()> {
    let metadata = serde_json::to_string(&attributes.metadata)?;
    conn.execute(
        "INSERT INTO index_entries
             (id, type, importance, created_at, metadata, consolidated, access_count, last_accessed, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             type = excluded.type,
             importance = excluded.importance,
             created_at = excluded.created_at,
             metadata = excluded.metadata,
             consolidated = excluded.consolidated,
             embedding = excluded.embedding",
        params![
            id as i64,
            attributes.memory_type.as_str(),
            attributes.importance.clamp(0.0, 1.0),
            attributes.timestamp.timestamp_micros(),
            metadata,
            attributes.consolidated,
            access.count as i64,
            access.last_accessed,
            embedding_to_bytes(embedding),
        ],
    )?;
    Ok(())
}

/// Build the `AND …` conditions for `filter` with their bound values, in
/// placeholder order.
fn filter_clause(filter: &SearchFilter) -> Result<(String, Vec<Value>)> {
    let mut clause = String::new();
    let mut values = Vec::new();

    if !filter.types.is_empty() {
        let placeholders = vec!["?"; filter.types.len()].join(", ");
        clause.push_str(&format!(" AND type IN ({placeholders})"));
        values.extend(
            filter
                .types
                .iter()
                .map(|t| Value::Text(t.as_str().to_string())),
        );
    }

    if let Some(min) = filter.min_importance {
        clause.push_str(" AND importance >= ?");
        values.push(Value::Real(min));
    }

    if filter.exclude_consolidated {
        clause.push_str(" AND consolidated = 0");
    }

    for (key, value) in &filter.metadata {
        if key.contains('"') {
            return Err(Error::Validation(format!(
                "metadata filter key may not contain '\"': {key}"
            )));
        }
        let path = format!("$.\"{key}\"");
        if value.is_null() {
            clause.push_str(" AND json_type(metadata, ?) = 'null'");
            values.push(Value::Text(path));
        } else {
            // Compare JSON types too, so `true` does not match `1`.
            clause.push_str(
                " AND json_type(metadata, ?) = json_type(?, '$') \
                 AND json_extract(metadata, ?) = json_extract(?, '$')",
            );
            let encoded = serde_json::to_string(value)?;
            values.push(Value::Text(path.clone()));
            values.push(Value::Text(encoded.clone()));
            values.push(Value::Text(path));
            values.push(Value::Text(encoded));
        }
    }

    Ok((clause, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const DIMS: usize = 8;

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        v[i % DIMS] = 1.0;
        v
    }

    fn attrs(memory_type: MemoryType, importance: f64, age_minutes: i64) -> IndexAttributes {
        IndexAttributes {
            memory_type,
            importance,
            timestamp: Utc::now() - Duration::minutes(age_minutes),
            metadata: Metadata::new(),
            consolidated: false,
        }
    }

    fn index() -> VectorIndex {
        VectorIndex::open_in_memory("test-axis", DIMS).unwrap()
    }

    #[test]
    fn search_ranks_by_similarity() {
        let idx = index();
        idx.upsert(1, &axis(0), &attrs(MemoryType::Semantic, 0.5, 0)).unwrap();
        idx.upsert(2, &axis(1), &attrs(MemoryType::Semantic, 0.5, 0)).unwrap();

        let hits = idx.search(&axis(1), 2, &SearchFilter::default()).unwrap();
        assert_eq!(hits[0].id, 2);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].id, 1);
    }

    #[test]
    fn ties_prefer_recent_entries() {
        let idx = index();
        idx.upsert(1, &axis(3), &attrs(MemoryType::Episodic, 0.5, 60)).unwrap();
        idx.upsert(2, &axis(3), &attrs(MemoryType::Episodic, 0.5, 1)).unwrap();
        idx.upsert(3, &axis(3), &attrs(MemoryType::Episodic, 0.5, 30)).unwrap();

        let ids: Vec<u64> = idx
            .search(&axis(3), 3, &SearchFilter::default())
            .unwrap()
            .iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn filters_apply_before_limit() {
        let idx = index();
        // Nine close episodic entries would crowd out the one semantic match
        // if filtering happened after the cut.
        for id in 1..=9 {
            idx.upsert(id, &axis(0), &attrs(MemoryType::Episodic, 0.5, 0)).unwrap();
        }
        idx.upsert(10, &axis(5), &attrs(MemoryType::Semantic, 0.5, 0)).unwrap();

        let hits = idx
            .search(&axis(0), 1, &SearchFilter::default().with_type(MemoryType::Semantic))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 10);
    }

    #[test]
    fn importance_and_metadata_filters() {
        let idx = index();
        let mut tagged = attrs(MemoryType::Semantic, 0.9, 0);
        tagged.metadata.insert("topic".into(), "tea".into());
        tagged.metadata.insert("step".into(), serde_json::json!(4));
        idx.upsert(1, &axis(0), &tagged).unwrap();
        idx.upsert(2, &axis(0), &attrs(MemoryType::Semantic, 0.2, 0)).unwrap();

        let by_importance = idx
            .search(&axis(0), 5, &SearchFilter::default().min_importance(0.5))
            .unwrap();
        assert_eq!(by_importance.len(), 1);
        assert_eq!(by_importance[0].id, 1);

        let by_text = idx
            .search(&axis(0), 5, &SearchFilter::default().with_metadata("topic", "tea"))
            .unwrap();
        assert_eq!(by_text.len(), 1);

        let by_number = idx
            .search(&axis(0), 5, &SearchFilter::default().with_metadata("step", 4))
            .unwrap();
        assert_eq!(by_number.len(), 1);

        for other_type in [serde_json::json!(4.0), serde_json::json!("4")] {
            let hits = idx
                .search(&axis(0), 5, &SearchFilter::default().with_metadata("step", other_type))
                .unwrap();
            assert!(hits.is_empty());
        }

        let miss = idx
            .search(&axis(0), 5, &SearchFilter::default().with_metadata("topic", "coffee"))
            .unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn upsert_replaces_and_remove_deletes() {
        let idx = index();
        idx.upsert(7, &axis(0), &attrs(MemoryType::Semantic, 0.5, 0)).unwrap();
        idx.upsert(7, &axis(2), &attrs(MemoryType::Semantic, 0.8, 0)).unwrap();
        assert_eq!(idx.len().unwrap(), 1);
        assert_eq!(idx.embedding(7).unwrap().unwrap(), axis(2));

        assert!(idx.remove(7).unwrap());
        assert!(!idx.remove(7).unwrap());
        assert!(idx.is_empty().unwrap());
    }

    #[test]
    fn rejects_wrong_dimension() {
        let idx = index();
        let err = idx
            .upsert(1, &[1.0, 0.0], &attrs(MemoryType::Semantic, 0.5, 0))
            .unwrap_err();
        assert!(matches!(err, Error::Embedding { .. }));
    }

    #[test]
    fn replace_all_keeps_access_counts() {
        let mut idx = index();
        idx.upsert(1, &axis(0), &attrs(MemoryType::Semantic, 0.5, 0)).unwrap();
        idx.upsert(2, &axis(1), &attrs(MemoryType::Semantic, 0.5, 0)).unwrap();
        idx.record_access(&[1]).unwrap();
        idx.record_access(&[1]).unwrap();

        let rows = vec![IndexRow {
            id: 1,
            embedding: axis(4),
            attributes: attrs(MemoryType::Semantic, 0.5, 0),
        }];
        assert_eq!(idx.replace_all(&rows).unwrap(), 1);
        assert_eq!(idx.ids().unwrap(), HashSet::from([1]));
        assert_eq!(idx.access_stats().unwrap()[&1].count, 2);
    }

    #[test]
    fn model_change_discards_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let idx = VectorIndex::open(&path, "model-a", DIMS).unwrap();
            idx.upsert(1, &axis(0), &attrs(MemoryType::Semantic, 0.5, 0)).unwrap();
        }
        let same = VectorIndex::open(&path, "model-a", DIMS).unwrap();
        assert!(!same.was_reset());
        assert_eq!(same.len().unwrap(), 1);
        drop(same);

        let changed = VectorIndex::open(&path, "model-b", DIMS).unwrap();
        assert!(changed.was_reset());
        assert!(changed.is_empty().unwrap());
    }
}
