// Exception store - repository contract plus the sqlite implementation
//
// The core dictates the access contract: atomic per-entity read-modify-write
// (compare-and-swap on a version column) and append-only history/comments.
// Nested lists are stored as JSON text columns.

use crate::model::{Exception, ExceptionStatus, ExceptionType, Severity};
use crate::query::{AssigneeFilter, ExceptionFilter, PageRequest};
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, types::Value, Connection};
use std::sync::Mutex;

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Outcome of a compare-and-swap write.
#[derive(Debug)]
pub enum CasOutcome {
    /// Write landed; carries the stored entity with its new version
    Applied(Exception),
    /// Someone else wrote first; entity unchanged
    VersionMismatch,
    /// Entity does not exist (e.g. deleted by retention outside the core)
    Missing,
}

/// Repository contract for the shared exception store. Any transactional
/// backend works as long as per-entity writes are atomic.
pub trait ExceptionStore {
    /// Persist a new exception; returns the stored entity (version = 1).
    fn insert(&self, exception: &Exception) -> Result<Exception>;

    fn get(&self, id: &str) -> Result<Option<Exception>>;

    /// Write `updated` only if the stored version still equals
    /// `expected_version`. On success the stored version is bumped by one.
    fn compare_and_swap(&self, expected_version: i64, updated: &Exception) -> Result<CasOutcome>;

    /// Filtered, paginated view. The page request must already be
    /// normalized; returns the page items and the unpaginated total.
    fn query(&self, filter: &ExceptionFilter, page: PageRequest) -> Result<(Vec<Exception>, u64)>;

    fn count(&self) -> Result<u64>;
}

// ============================================================================
// SQLITE IMPLEMENTATION
// ============================================================================

pub struct SqliteExceptionStore {
    conn: Mutex<Connection>,
}

impl SqliteExceptionStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open exception store at {path:?}"))?;
        setup_database(&conn)?;
        Ok(SqliteExceptionStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteExceptionStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exceptions (
            id TEXT PRIMARY KEY,
            exception_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            amount REAL NOT NULL,
            source_record TEXT,
            target_record TEXT,
            differences TEXT NOT NULL,
            ai_suggestion TEXT,
            status TEXT NOT NULL,
            assigned_to TEXT,
            resolution TEXT,
            history TEXT NOT NULL,
            comments TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exceptions_status ON exceptions(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exceptions_severity ON exceptions(severity)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exceptions_assigned_to ON exceptions(assigned_to)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exceptions_timestamp ON exceptions(timestamp)",
        [],
    )?;

    Ok(())
}

const SELECT_COLUMNS: &str = "id, exception_type, severity, amount, source_record, target_record,
     differences, ai_suggestion, status, assigned_to, resolution, history, comments,
     timestamp, version";

fn row_to_exception(row: &rusqlite::Row<'_>) -> rusqlite::Result<Exception> {
    let exception_type_str: String = row.get(1)?;
    let severity_str: String = row.get(2)?;
    let source_record_json: Option<String> = row.get(4)?;
    let target_record_json: Option<String> = row.get(5)?;
    let differences_json: String = row.get(6)?;
    let ai_suggestion_json: Option<String> = row.get(7)?;
    let status_str: String = row.get(8)?;
    let history_json: String = row.get(11)?;
    let comments_json: String = row.get(12)?;
    let timestamp_str: String = row.get(13)?;

    Ok(Exception {
        id: row.get(0)?,
        exception_type: ExceptionType::parse(&exception_type_str)
            .ok_or(rusqlite::Error::InvalidQuery)?,
        severity: Severity::parse(&severity_str).ok_or(rusqlite::Error::InvalidQuery)?,
        amount: row.get(3)?,
        source_record: source_record_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        target_record: target_record_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        differences: serde_json::from_str(&differences_json)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        ai_suggestion: ai_suggestion_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        status: ExceptionStatus::parse(&status_str).ok_or(rusqlite::Error::InvalidQuery)?,
        assigned_to: row.get(9)?,
        resolution: row.get(10)?,
        history: serde_json::from_str(&history_json).map_err(|_| rusqlite::Error::InvalidQuery)?,
        comments: serde_json::from_str(&comments_json).map_err(|_| rusqlite::Error::InvalidQuery)?,
        timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&chrono::Utc),
        version: row.get(14)?,
    })
}

/// Build the WHERE clause and its parameters from a filter.
/// Filters combine with logical AND; ranges are inclusive.
fn build_where(filter: &ExceptionFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(exception_type) = filter.exception_type {
        clauses.push("exception_type = ?".to_string());
        values.push(Value::Text(exception_type.as_str().to_string()));
    }
    if let Some(severity) = filter.severity {
        clauses.push("severity = ?".to_string());
        values.push(Value::Text(severity.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?".to_string());
        values.push(Value::Text(status.as_str().to_string()));
    }
    match &filter.assignee {
        Some(AssigneeFilter::Unassigned) => clauses.push("assigned_to IS NULL".to_string()),
        Some(AssigneeFilter::Reviewer(reviewer)) => {
            clauses.push("assigned_to = ?".to_string());
            values.push(Value::Text(reviewer.clone()));
        }
        None => {}
    }
    if let Some(min) = filter.amount_min {
        clauses.push("amount >= ?".to_string());
        values.push(Value::Real(min));
    }
    if let Some(max) = filter.amount_max {
        clauses.push("amount <= ?".to_string());
        values.push(Value::Real(max));
    }
    // Timestamps are stored as RFC3339 UTC, which compares lexicographically
    if let Some(from) = filter.date_from {
        clauses.push("timestamp >= ?".to_string());
        values.push(Value::Text(from.to_rfc3339()));
    }
    if let Some(to) = filter.date_to {
        clauses.push("timestamp <= ?".to_string());
        values.push(Value::Text(to.to_rfc3339()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    (where_sql, values)
}

impl ExceptionStore for SqliteExceptionStore {
    fn insert(&self, exception: &Exception) -> Result<Exception> {
        let conn = self.lock();

        let mut stored = exception.clone();
        stored.version = 1;

        conn.execute(
            "INSERT INTO exceptions (
                id, exception_type, severity, amount, source_record, target_record,
                differences, ai_suggestion, status, assigned_to, resolution,
                history, comments, timestamp, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                stored.id,
                stored.exception_type.as_str(),
                stored.severity.as_str(),
                stored.amount,
                stored
                    .source_record
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                stored
                    .target_record
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&stored.differences)?,
                stored
                    .ai_suggestion
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                stored.status.as_str(),
                stored.assigned_to,
                stored.resolution,
                serde_json::to_string(&stored.history)?,
                serde_json::to_string(&stored.comments)?,
                stored.timestamp.to_rfc3339(),
                stored.version,
            ],
        )
        .context("Failed to insert exception")?;

        Ok(stored)
    }

    fn get(&self, id: &str) -> Result<Option<Exception>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM exceptions WHERE id = ?1"
        ))?;

        let mut rows = stmt.query_map(params![id], row_to_exception)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn compare_and_swap(&self, expected_version: i64, updated: &Exception) -> Result<CasOutcome> {
        let conn = self.lock();

        let mut stored = updated.clone();
        stored.version = expected_version + 1;

        let rows = conn
            .execute(
                "UPDATE exceptions SET
                    status = ?1,
                    assigned_to = ?2,
                    resolution = ?3,
                    history = ?4,
                    comments = ?5,
                    version = ?6
                 WHERE id = ?7 AND version = ?8",
                params![
                    stored.status.as_str(),
                    stored.assigned_to,
                    stored.resolution,
                    serde_json::to_string(&stored.history)?,
                    serde_json::to_string(&stored.comments)?,
                    stored.version,
                    stored.id,
                    expected_version,
                ],
            )
            .context("Failed to update exception")?;

        if rows == 1 {
            return Ok(CasOutcome::Applied(stored));
        }

        // Distinguish a lost race from a missing row
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM exceptions WHERE id = ?1",
                params![stored.id],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)?;

        if exists {
            Ok(CasOutcome::VersionMismatch)
        } else {
            Ok(CasOutcome::Missing)
        }
    }

    fn query(&self, filter: &ExceptionFilter, page: PageRequest) -> Result<(Vec<Exception>, u64)> {
        let conn = self.lock();
        let (where_sql, values) = build_where(filter);

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM exceptions{where_sql}"),
            params_from_iter(values.iter()),
            |row| row.get::<_, i64>(0),
        )? as u64;

        // Stable ordering so consecutive pages never skip or repeat items
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM exceptions{where_sql}
             ORDER BY timestamp DESC, id ASC
             LIMIT ? OFFSET ?"
        ))?;

        let mut all_values = values;
        all_values.push(Value::Integer(page.limit as i64));
        all_values.push(Value::Integer(page.offset() as i64));

        let items = stmt
            .query_map(params_from_iter(all_values.iter()), row_to_exception)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((items, total))
    }

    fn count(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM exceptions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ============================================================================
// TESTS
// ============================================================================
