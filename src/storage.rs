//! Detection record storage and history queries.
//!
//! One relational table of immutable `DetectionRecord` rows. The store trait
//! has a SQLite implementation for the daemons and an in-memory one for
//! tests; both order history strictly by timestamp descending with ties
//! broken by insertion order.

use anyhow::{anyhow, Result};
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use crate::error::QueryError;

/// Persisted, immutable summary of one completed detection request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionRecord {
    pub id: i64,
    /// Creation instant, whole seconds since the Unix epoch (UTC).
    pub timestamp: i64,
    pub people_count: i64,
    /// Externally fetchable reference (`/images/{id}.{ext}`), never a
    /// filesystem path.
    pub result_image_url: String,
    /// Caller-supplied name, stored as-is for display only.
    pub original_filename: String,
}

/// Fields of a record about to be committed; `id` is assigned by the store.
#[derive(Clone, Debug)]
pub struct NewDetectionRecord {
    pub timestamp: i64,
    pub people_count: i64,
    pub result_image_url: String,
    pub original_filename: String,
}

/// AND-combined history filters. All bounds are inclusive; timestamps are
/// epoch seconds.
#[derive(Clone, Debug, Default)]
pub struct RecordFilter {
    pub min_people: Option<i64>,
    pub max_people: Option<i64>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
}

const MIN_PAGE_LIMIT: i64 = 1;
const MAX_PAGE_LIMIT: i64 = 100;
const DEFAULT_PAGE_LIMIT: i64 = 10;

/// Validated pagination window.
#[derive(Clone, Copy, Debug)]
pub struct PageRequest {
    skip: i64,
    limit: i64,
}

impl PageRequest {
    pub fn new(skip: i64, limit: i64) -> Result<Self, QueryError> {
        if skip < 0 {
            return Err(QueryError::InvalidParameter(format!(
                "skip must be >= 0, got {skip}"
            )));
        }
        if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(QueryError::InvalidParameter(format!(
                "limit must be between {MIN_PAGE_LIMIT} and {MAX_PAGE_LIMIT}, got {limit}"
            )));
        }
        Ok(Self { skip, limit })
    }

    pub fn skip(&self) -> i64 {
        self.skip
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Record store contract. Reads never mutate state; `insert` is the only
/// write and happens exactly once per successful pipeline request.
pub trait RecordStore: Send {
    fn insert(&mut self, record: &NewDetectionRecord) -> Result<DetectionRecord>;

    /// Page through records matching `filter`, newest first, returning the
    /// page plus the total match count.
    fn query(
        &self,
        filter: &RecordFilter,
        page: &PageRequest,
    ) -> Result<(Vec<DetectionRecord>, u64)>;

    fn count(&self, filter: &RecordFilter) -> Result<u64>;

    fn get_by_id(&self, id: i64) -> Result<Option<DetectionRecord>>;
}

pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detection_records (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              people_count INTEGER NOT NULL,
              result_image_url TEXT NOT NULL,
              original_filename TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_created ON detection_records(created_at);
            "#,
        )?;
        Ok(())
    }

    fn where_clause(filter: &RecordFilter) -> (String, Vec<i64>) {
        let mut clauses = Vec::new();
        let mut bind = Vec::new();
        if let Some(min_people) = filter.min_people {
            clauses.push("people_count >= ?");
            bind.push(min_people);
        }
        if let Some(max_people) = filter.max_people {
            clauses.push("people_count <= ?");
            bind.push(max_people);
        }
        if let Some(date_from) = filter.date_from {
            clauses.push("created_at >= ?");
            bind.push(date_from);
        }
        if let Some(date_to) = filter.date_to {
            clauses.push("created_at <= ?");
            bind.push(date_to);
        }
        if clauses.is_empty() {
            (String::new(), bind)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), bind)
        }
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(&mut self, record: &NewDetectionRecord) -> Result<DetectionRecord> {
        if record.people_count < 0 {
            return Err(anyhow!("people_count must be >= 0"));
        }
        self.conn.execute(
            r#"
            INSERT INTO detection_records(created_at, people_count, result_image_url, original_filename)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.timestamp,
                record.people_count,
                record.result_image_url,
                record.original_filename
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(DetectionRecord {
            id,
            timestamp: record.timestamp,
            people_count: record.people_count,
            result_image_url: record.result_image_url.clone(),
            original_filename: record.original_filename.clone(),
        })
    }

    fn query(
        &self,
        filter: &RecordFilter,
        page: &PageRequest,
    ) -> Result<(Vec<DetectionRecord>, u64)> {
        let total = self.count(filter)?;

        let (where_sql, mut bind) = Self::where_clause(filter);
        let sql = format!(
            "SELECT id, created_at, people_count, result_image_url, original_filename \
             FROM detection_records{where_sql} \
             ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?"
        );
        bind.push(page.limit());
        bind.push(page.skip());

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(DetectionRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                people_count: row.get(2)?,
                result_image_url: row.get(3)?,
                original_filename: row.get(4)?,
            });
        }
        Ok((records, total))
    }

    fn count(&self, filter: &RecordFilter) -> Result<u64> {
        let (where_sql, bind) = Self::where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM detection_records{where_sql}");
        let mut stmt = self.conn.prepare(&sql)?;
        let count: i64 = stmt.query_row(params_from_iter(bind), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<DetectionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at, people_count, result_image_url, original_filename \
             FROM detection_records WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(DetectionRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                people_count: row.get(2)?,
                result_image_url: row.get(3)?,
                original_filename: row.get(4)?,
            }))
        } else {
            Ok(None)
        }
    }
}

/// In-memory store mirroring the SQLite semantics, for tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    records: Vec<DetectionRecord>,
    next_id: i64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(record: &DetectionRecord, filter: &RecordFilter) -> bool {
        if let Some(min_people) = filter.min_people {
            if record.people_count < min_people {
                return false;
            }
        }
        if let Some(max_people) = filter.max_people {
            if record.people_count > max_people {
                return false;
            }
        }
        if let Some(date_from) = filter.date_from {
            if record.timestamp < date_from {
                return false;
            }
        }
        if let Some(date_to) = filter.date_to {
            if record.timestamp > date_to {
                return false;
            }
        }
        true
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert(&mut self, record: &NewDetectionRecord) -> Result<DetectionRecord> {
        if record.people_count < 0 {
            return Err(anyhow!("people_count must be >= 0"));
        }
        self.next_id += 1;
        let record = DetectionRecord {
            id: self.next_id,
            timestamp: record.timestamp,
            people_count: record.people_count,
            result_image_url: record.result_image_url.clone(),
            original_filename: record.original_filename.clone(),
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn query(
        &self,
        filter: &RecordFilter,
        page: &PageRequest,
    ) -> Result<(Vec<DetectionRecord>, u64)> {
        let mut matched: Vec<&DetectionRecord> = self
            .records
            .iter()
            .filter(|record| Self::matches(record, filter))
            .collect();
        // stable sort keeps insertion order within equal timestamps
        matched.sort_by_key(|record| std::cmp::Reverse(record.timestamp));
        let total = matched.len() as u64;
        let page_records = matched
            .into_iter()
            .skip(page.skip() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok((page_records, total))
    }

    fn count(&self, filter: &RecordFilter) -> Result<u64> {
        Ok(self
            .records
            .iter()
            .filter(|record| Self::matches(record, filter))
            .count() as u64)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<DetectionRecord>> {
        Ok(self.records.iter().find(|record| record.id == id).cloned())
    }
}
