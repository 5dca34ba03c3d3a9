//! Database operations using rusqlite.
//!
//! Checkpoints, the tail journal, finished sessions and capability records
//! all live in one SQLite file.

use crate::metrics::capability::{CapabilityKind, CapabilityRecord, CapabilitySource};
use crate::recording::recorder::RecorderEvent;
use crate::recording::types::{ScoreBasis, SessionSummary};
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::storage::{
    CheckpointStore, MetricLogStore, SessionCursor, SessionQuery, SessionStore, StoredCheckpoint,
    TailEntry, TailJournal,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &PathBuf) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute a query and return the number of rows affected.
    pub fn execute(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<usize, DatabaseError> {
        self.conn
            .execute(sql, params)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Begin a transaction.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>, DatabaseError> {
        self.conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }

    fn query_checkpoints(
        &self,
        session_id: &Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<StoredCheckpoint>, DatabaseError> {
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT sequence, journal_position, created_at, reason, payload
                 FROM checkpoints WHERE session_id = ?1
                 ORDER BY sequence DESC LIMIT ?2",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![session_id.to_string(), limit], |row| {
                Ok(CheckpointRow {
                    sequence: row.get(0)?,
                    journal_position: row.get(1)?,
                    created_at: row.get(2)?,
                    reason: row.get(3)?,
                    payload: row.get(4)?,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut checkpoints = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            checkpoints.push(row.into_checkpoint(*session_id)?);
        }
        Ok(checkpoints)
    }
}

// ========== Checkpoints ==========

impl CheckpointStore for Database {
    fn persist_checkpoint(&self, checkpoint: &StoredCheckpoint) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO checkpoints
                 (session_id, sequence, journal_position, created_at, reason, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    checkpoint.session_id.to_string(),
                    to_sql_u64(checkpoint.sequence)?,
                    to_sql_u64(checkpoint.journal_position)?,
                    checkpoint.created_at.to_rfc3339(),
                    checkpoint.reason,
                    checkpoint.payload,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        tracing::debug!(
            "Persisted checkpoint {} for session {} at journal position {}",
            checkpoint.sequence,
            checkpoint.session_id,
            checkpoint.journal_position
        );
        Ok(())
    }

    fn load_latest_checkpoint(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<StoredCheckpoint>, DatabaseError> {
        Ok(self.query_checkpoints(session_id, Some(1))?.into_iter().next())
    }

    fn load_checkpoints(&self, session_id: &Uuid) -> Result<Vec<StoredCheckpoint>, DatabaseError> {
        self.query_checkpoints(session_id, None)
    }

    fn prune_checkpoints(&self, session_id: &Uuid, keep: usize) -> Result<usize, DatabaseError> {
        let id = session_id.to_string();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let removed = tx
            .execute(
                "DELETE FROM checkpoints WHERE session_id = ?1 AND sequence NOT IN (
                     SELECT sequence FROM checkpoints WHERE session_id = ?1
                     ORDER BY sequence DESC LIMIT ?2)",
                params![id, keep as i64],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        // The journal is only needed above the oldest checkpoint still kept
        let oldest: Option<i64> = tx
            .query_row(
                "SELECT MIN(journal_position) FROM checkpoints WHERE session_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if let Some(oldest) = oldest {
            tx.execute(
                "DELETE FROM tail_journal WHERE session_id = ?1 AND position <= ?2",
                params![id, oldest],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        Ok(removed)
    }

    fn clear_checkpoints(&self, session_id: &Uuid) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM checkpoints WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn checkpointed_sessions(&self) -> Result<Vec<Uuid>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT session_id FROM checkpoints ORDER BY session_id")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut sessions = Vec::new();
        for row in rows {
            let id = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            sessions.push(parse_uuid(&id)?);
        }
        Ok(sessions)
    }
}

// ========== Tail Journal ==========

impl TailJournal for Database {
    fn append_tail(&self, session_id: &Uuid, entries: &[TailEntry]) -> Result<(), DatabaseError> {
        if entries.is_empty() {
            return Ok(());
        }
        let id = session_id.to_string();
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO tail_journal (session_id, position, payload)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            for entry in entries {
                let payload = bincode::serialize(&entry.event)
                    .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
                stmt.execute(params![id, to_sql_u64(entry.position)?, payload])
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }

    fn tail_after(&self, session_id: &Uuid, position: u64) -> Result<Vec<TailEntry>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT position, payload FROM tail_journal
                 WHERE session_id = ?1 AND position > ?2 ORDER BY position",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![session_id.to_string(), to_sql_u64(position)?],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (position, payload) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            let event: RecorderEvent = bincode::deserialize(&payload)
                .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
            entries.push(TailEntry {
                position: from_sql_u64(position)?,
                event,
            });
        }
        Ok(entries)
    }

    fn clear_tail(&self, session_id: &Uuid) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM tail_journal WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }
}

// ========== Sessions ==========

const SESSION_COLUMNS: &str = "summary_json, stress_score, scored_with, score_basis";

impl SessionStore for Database {
    fn append_session_record(&self, summary: &SessionSummary) -> Result<(), DatabaseError> {
        let summary_json = serde_json::to_string(summary)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT OR REPLACE INTO sessions
                 (id, profile_id, category, started_at, started_at_us, ended_at, moving_secs,
                  stress_score, scored_with, score_basis, summary_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    summary.session_id.to_string(),
                    summary.profile_id.to_string(),
                    serde_json::to_string(&summary.category)
                        .map_err(|e| DatabaseError::SerializationError(e.to_string()))?,
                    summary.started_at.to_rfc3339(),
                    summary.started_at.timestamp_micros(),
                    summary.ended_at.to_rfc3339(),
                    to_sql_u64(summary.moving_secs)?,
                    summary.stress_score,
                    summary.scored_with,
                    summary.score_basis.map(score_basis_str),
                    summary_json,
                    now,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        tracing::info!("Stored session {}", summary.session_id);
        Ok(())
    }

    fn session_record(&self, session_id: &Uuid) -> Result<Option<SessionSummary>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id.to_string()],
                SessionRow::from_row,
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.map(SessionRow::into_summary).transpose()
    }

    fn completed_sessions(
        &self,
        profile_id: &Uuid,
        query: SessionQuery,
    ) -> Result<Vec<SessionSummary>, DatabaseError> {
        let from = query.from.map_or(i64::MIN, |t| t.timestamp_micros());
        let until = query.until.map_or(i64::MAX, |t| t.timestamp_micros());
        let (after_us, after_id) = match query.after {
            Some(cursor) => (cursor.started_at.timestamp_micros(), cursor.session_id.to_string()),
            None => (i64::MIN, String::new()),
        };
        let limit = query.limit.map_or(-1, |l| l as i64);

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM sessions
                 WHERE profile_id = ?1 AND started_at_us >= ?2 AND started_at_us < ?3
                   AND (started_at_us > ?4 OR (started_at_us = ?4 AND id > ?5))
                 ORDER BY started_at_us, id LIMIT ?6",
                SESSION_COLUMNS
            ))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(
                params![profile_id.to_string(), from, until, after_us, after_id, limit],
                SessionRow::from_row,
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut sessions = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            sessions.push(row.into_summary()?);
        }
        Ok(sessions)
    }

    fn update_stress_score(
        &self,
        session_id: &Uuid,
        stress_score: Option<f64>,
        scored_with: Option<f64>,
        basis: Option<ScoreBasis>,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn
            .execute(
                "UPDATE sessions SET stress_score = ?2, scored_with = ?3, score_basis = ?4,
                 updated_at = ?5 WHERE id = ?1",
                params![
                    session_id.to_string(),
                    stress_score,
                    scored_with,
                    basis.map(score_basis_str),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("session {}", session_id)));
        }
        Ok(())
    }

    fn save_rescore_cursor(
        &self,
        record_id: &Uuid,
        profile_id: &Uuid,
        cursor: Option<SessionCursor>,
    ) -> Result<(), DatabaseError> {
        let cursor_json = cursor
            .map(|c| serde_json::to_string(&c))
            .transpose()
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO rescore_jobs (record_id, profile_id, cursor_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record_id.to_string(),
                    profile_id.to_string(),
                    cursor_json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn load_rescore_cursor(
        &self,
        record_id: &Uuid,
    ) -> Result<Option<Option<SessionCursor>>, DatabaseError> {
        let cursor_json: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT cursor_json FROM rescore_jobs WHERE record_id = ?1",
                params![record_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        match cursor_json {
            None => Ok(None),
            Some(None) => Ok(Some(None)),
            Some(Some(json)) => {
                let cursor = serde_json::from_str(&json)
                    .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
                Ok(Some(Some(cursor)))
            }
        }
    }

    fn clear_rescore_cursor(&self, record_id: &Uuid) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM rescore_jobs WHERE record_id = ?1",
                params![record_id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }
}

// ========== Capability Records ==========

const CAPABILITY_COLUMNS: &str = "id, profile_id, kind, value, valid_from, recorded_at, source";

impl MetricLogStore for Database {
    fn insert_capability(&self, record: &CapabilityRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO capability_records
                 (id, profile_id, kind, value, valid_from, valid_from_us, recorded_at,
                  recorded_at_us, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.profile_id.to_string(),
                    record.kind.as_str(),
                    record.value,
                    record.valid_from.to_rfc3339(),
                    record.valid_from.timestamp_micros(),
                    record.recorded_at.to_rfc3339(),
                    record.recorded_at.timestamp_micros(),
                    record.source.as_str(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    DatabaseError::ConstraintViolation(format!("capability record {}", record.id))
                }
                e => DatabaseError::QueryFailed(e.to_string()),
            })?;
        Ok(())
    }

    fn capability_record(&self, id: &Uuid) -> Result<Option<CapabilityRecord>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM capability_records WHERE id = ?1", CAPABILITY_COLUMNS),
                params![id.to_string()],
                CapabilityRow::from_row,
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.map(CapabilityRow::into_record).transpose()
    }

    fn capability_records(&self, profile_id: &Uuid) -> Result<Vec<CapabilityRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM capability_records WHERE profile_id = ?1
                 ORDER BY valid_from_us, recorded_at_us",
                CAPABILITY_COLUMNS
            ))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![profile_id.to_string()], CapabilityRow::from_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            records.push(row.into_record()?);
        }
        Ok(records)
    }

    fn get_metric_at_date(
        &self,
        profile_id: &Uuid,
        kind: CapabilityKind,
        date: DateTime<Utc>,
    ) -> Result<Option<f64>, DatabaseError> {
        self.conn
            .query_row(
                "SELECT value FROM capability_records
                 WHERE profile_id = ?1 AND kind = ?2 AND valid_from_us <= ?3
                 ORDER BY valid_from_us DESC, recorded_at_us DESC LIMIT 1",
                params![profile_id.to_string(), kind.as_str(), date.timestamp_micros()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }
}

// ========== Row Helpers ==========

struct CheckpointRow {
    sequence: i64,
    journal_position: i64,
    created_at: String,
    reason: String,
    payload: String,
}

impl CheckpointRow {
    fn into_checkpoint(self, session_id: Uuid) -> Result<StoredCheckpoint, DatabaseError> {
        Ok(StoredCheckpoint {
            session_id,
            sequence: from_sql_u64(self.sequence)?,
            journal_position: from_sql_u64(self.journal_position)?,
            created_at: parse_timestamp(&self.created_at)?,
            reason: self.reason,
            payload: self.payload,
        })
    }
}

struct SessionRow {
    summary_json: String,
    stress_score: Option<f64>,
    scored_with: Option<f64>,
    score_basis: Option<String>,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            summary_json: row.get(0)?,
            stress_score: row.get(1)?,
            scored_with: row.get(2)?,
            score_basis: row.get(3)?,
        })
    }

    fn into_summary(self) -> Result<SessionSummary, DatabaseError> {
        let mut summary: SessionSummary = serde_json::from_str(&self.summary_json)
            .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
        // Score columns are updated in place by re-scoring
        summary.stress_score = self.stress_score;
        summary.scored_with = self.scored_with;
        summary.score_basis = self.score_basis.as_deref().and_then(parse_score_basis);
        Ok(summary)
    }
}

struct CapabilityRow {
    id: String,
    profile_id: String,
    kind: String,
    value: f64,
    valid_from: String,
    recorded_at: String,
    source: String,
}

impl CapabilityRow {
    fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            profile_id: row.get(1)?,
            kind: row.get(2)?,
            value: row.get(3)?,
            valid_from: row.get(4)?,
            recorded_at: row.get(5)?,
            source: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<CapabilityRecord, DatabaseError> {
        let kind = CapabilityKind::parse(&self.kind).ok_or_else(|| {
            DatabaseError::DeserializationError(format!("unknown capability kind '{}'", self.kind))
        })?;
        Ok(CapabilityRecord {
            id: parse_uuid(&self.id)?,
            profile_id: parse_uuid(&self.profile_id)?,
            kind,
            value: self.value,
            valid_from: parse_timestamp(&self.valid_from)?,
            recorded_at: parse_timestamp(&self.recorded_at)?,
            source: CapabilitySource::parse(&self.source),
        })
    }
}

fn score_basis_str(basis: ScoreBasis) -> &'static str {
    match basis {
        ScoreBasis::Power => "power",
        ScoreBasis::HeartRate => "heart_rate",
    }
}

fn parse_score_basis(s: &str) -> Option<ScoreBasis> {
    match s {
        "power" => Some(ScoreBasis::Power),
        "heart_rate" => Some(ScoreBasis::HeartRate),
        _ => None,
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

fn to_sql_u64(value: u64) -> Result<i64, DatabaseError> {
    i64::try_from(value).map_err(|e| DatabaseError::SerializationError(e.to_string()))
}

fn from_sql_u64(value: i64) -> Result<u64, DatabaseError> {
    u64::try_from(value).map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
