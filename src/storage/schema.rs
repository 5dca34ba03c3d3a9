//! Database schema definitions.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Finished sessions
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL,
    category TEXT NOT NULL,
    started_at TEXT NOT NULL,
    started_at_us INTEGER NOT NULL,
    ended_at TEXT NOT NULL,
    moving_secs INTEGER NOT NULL,
    stress_score REAL,
    scored_with REAL,
    score_basis TEXT,
    summary_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_profile_start ON sessions(profile_id, started_at_us);

-- Recorder checkpoints, several per active session
CREATE TABLE IF NOT EXISTS checkpoints (
    session_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    journal_position INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    reason TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (session_id, sequence)
);

-- Accepted readings not yet covered by a checkpoint
CREATE TABLE IF NOT EXISTS tail_journal (
    session_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (session_id, position)
);

-- Athlete capability records (thresholds, weight, heart-rate bounds)
CREATE TABLE IF NOT EXISTS capability_records (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    value REAL NOT NULL,
    valid_from TEXT NOT NULL,
    valid_from_us INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    recorded_at_us INTEGER NOT NULL,
    source TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_capability_records_lookup
    ON capability_records(profile_id, kind, valid_from_us);

-- Progress of interrupted re-scoring batches
CREATE TABLE IF NOT EXISTS rescore_jobs (
    record_id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL,
    cursor_json TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// Schema version table, created before any migration runs.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;
