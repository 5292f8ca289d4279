// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Move log and settings storage

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::Result;

/// Outcome of one organize attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    Success,
    Failed,
    Skipped,
}

impl MoveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveStatus::Success => "success",
            MoveStatus::Failed => "failed",
            MoveStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for MoveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoveStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(MoveStatus::Success),
            "failed" => Ok(MoveStatus::Failed),
            "skipped" => Ok(MoveStatus::Skipped),
            other => Err(format!("unknown move status: {}", other)),
        }
    }
}

/// A single organize attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMoveRecord {
    /// Row id, assigned on append
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub source_path: String,
    /// Where the file ended up; absent unless the move succeeded
    pub destination_path: Option<String>,
    pub category: String,
    pub size_bytes: u64,
    pub status: MoveStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    /// blake3 of the moved content
    pub content_hash: Option<String>,
    /// Failure text or skip reason
    pub message: Option<String>,
}

/// Filters for [`LogStore::query`]; newest records come first
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    pub category: Option<String>,
    pub status: Option<MoveStatus>,
    pub tag: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

/// Aggregates over the move log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStats {
    pub total_records: i64,
    pub total_moves: i64,
    pub total_bytes: i64,
    pub by_category: Vec<CategoryCount>,
    pub by_status: BTreeMap<String, i64>,
    /// Records per day over the last seven days, newest first
    pub recent_activity: Vec<DayCount>,
    pub popular_tags: Vec<TagCount>,
    /// Moved files whose content matches an earlier move
    pub duplicate_files: i64,
}

/// Move log backed by SQLite (thread-safe wrapper)
#[derive(Clone)]
pub struct LogStore {
    conn: Arc<Mutex<Connection>>,
}

const RECORD_COLUMNS: &str = "id, moved_at, source_path, destination_path, category, size_bytes, status, tags, content_hash, message";

impl LogStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        // A panic elsewhere cannot leave the connection half-written
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS file_moves (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                moved_at TEXT NOT NULL,
                source_path TEXT NOT NULL,
                destination_path TEXT,
                category TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                content_hash TEXT,
                message TEXT
            );

            CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_moves_moved_at ON file_moves(moved_at);
            CREATE INDEX IF NOT EXISTS idx_moves_category ON file_moves(category);
            CREATE INDEX IF NOT EXISTS idx_moves_status ON file_moves(status);
            CREATE INDEX IF NOT EXISTS idx_moves_hash ON file_moves(content_hash);
        "#)?;
        Ok(())
    }

    /// Append a record, returning its row id
    pub fn append(&self, record: &FileMoveRecord) -> Result<i64> {
        let conn = self.lock_conn();
        let tags = serde_json::to_string(&record.tags)?;
        conn.execute(
            r#"INSERT INTO file_moves (moved_at, source_path, destination_path, category, size_bytes, status, tags, content_hash, message)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                format_timestamp(&record.timestamp),
                record.source_path,
                record.destination_path,
                record.category,
                i64::try_from(record.size_bytes).unwrap_or(i64::MAX),
                record.status.as_str(),
                tags,
                record.content_hash,
                record.message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Records matching the filters, newest first
    pub fn query(&self, filters: &LogQuery) -> Result<Vec<FileMoveRecord>> {
        let mut sql = format!("SELECT {} FROM file_moves WHERE 1=1", RECORD_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = &filters.category {
            sql.push_str(" AND category = ?");
            values.push(Value::Text(category.clone()));
        }
        if let Some(status) = filters.status {
            sql.push_str(" AND status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(tag) = &filters.tag {
            sql.push_str(" AND EXISTS (SELECT 1 FROM json_each(file_moves.tags) WHERE json_each.value = ?)");
            values.push(Value::Text(tag.clone()));
        }
        if let Some(since) = &filters.since {
            sql.push_str(" AND moved_at >= ?");
            values.push(Value::Text(format_timestamp(since)));
        }
        if let Some(until) = &filters.until {
            sql.push_str(" AND moved_at <= ?");
            values.push(Value::Text(format_timestamp(until)));
        }

        sql.push_str(" ORDER BY moved_at DESC, id DESC LIMIT ? OFFSET ?");
        values.push(Value::Integer(filters.limit.map_or(-1, |l| l as i64)));
        values.push(Value::Integer(filters.offset.unwrap_or(0) as i64));

        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Most recent records
    pub fn recent(&self, limit: usize) -> Result<Vec<FileMoveRecord>> {
        self.query(&LogQuery {
            limit: Some(limit),
            ..LogQuery::default()
        })
    }

    /// Number of stored records
    pub fn count(&self) -> Result<i64> {
        let conn = self.lock_conn();
        conn.query_row("SELECT COUNT(*) FROM file_moves", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Aggregate statistics
    pub fn stats(&self) -> Result<LogStats> {
        let conn = self.lock_conn();

        let total_records: i64 = conn.query_row("SELECT COUNT(*) FROM file_moves", [], |row| row.get(0))?;
        let (total_moves, total_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM file_moves WHERE status = 'success'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(
            r#"SELECT category, COUNT(*) AS cnt, COALESCE(SUM(size_bytes), 0)
               FROM file_moves WHERE status = 'success'
               GROUP BY category ORDER BY cnt DESC, category"#,
        )?;
        let by_category = stmt
            .query_map([], |row| {
                Ok(CategoryCount {
                    category: row.get(0)?,
                    count: row.get(1)?,
                    bytes: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM file_moves GROUP BY status")?;
        let by_status = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        let week_ago = format_timestamp(&(Utc::now() - ChronoDuration::days(7)));
        let mut stmt = conn.prepare(
            r#"SELECT substr(moved_at, 1, 10) AS day, COUNT(*)
               FROM file_moves WHERE moved_at >= ?1
               GROUP BY day ORDER BY day DESC"#,
        )?;
        let recent_activity = stmt
            .query_map(params![week_ago], |row| {
                Ok(DayCount {
                    date: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT tags FROM file_moves WHERE status = 'success' AND tags != '[]'")?;
        let mut tag_counts: HashMap<String, i64> = HashMap::new();
        for tags in stmt.query_map([], |row| row.get::<_, String>(0))? {
            let tags: Vec<String> = serde_json::from_str(&tags?)?;
            for tag in tags {
                *tag_counts.entry(tag).or_insert(0) += 1;
            }
        }
        let mut popular_tags: Vec<TagCount> = tag_counts
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        popular_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        popular_tags.truncate(10);

        let duplicate_files: i64 = conn.query_row(
            r#"SELECT COALESCE(SUM(n - 1), 0) FROM (
                   SELECT COUNT(*) AS n FROM file_moves
                   WHERE status = 'success' AND content_hash IS NOT NULL
                   GROUP BY content_hash HAVING n > 1
               )"#,
            [],
            |row| row.get(0),
        )?;

        Ok(LogStats {
            total_records,
            total_moves,
            total_bytes,
            by_category,
            by_status,
            recent_activity,
            popular_tags,
            duplicate_files,
        })
    }

    /// All stored settings
    pub fn get_settings(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT key, value FROM app_settings ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut settings = BTreeMap::new();
        for (key, value) in rows {
            settings.insert(key, serde_json::from_str(&value)?);
        }
        Ok(settings)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.lock_conn();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a setting
    pub fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            r#"INSERT INTO app_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            params![key, serde_json::to_string(value)?, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    /// Cheap liveness probe
    pub fn ping(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileMoveRecord> {
    let moved_at: String = row.get(1)?;
    let size: i64 = row.get(5)?;
    let status: String = row.get(6)?;
    let tags: String = row.get(7)?;

    Ok(FileMoveRecord {
        id: Some(row.get(0)?),
        timestamp: DateTime::parse_from_rfc3339(&moved_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(1, e))?,
        source_path: row.get(2)?,
        destination_path: row.get(3)?,
        category: row.get(4)?,
        size_bytes: u64::try_from(size).unwrap_or(0),
        status: status
            .parse()
            .map_err(|e: String| conversion_error(6, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion_error(7, e))?,
        content_hash: row.get(8)?,
        message: row.get(9)?,
    })
}
