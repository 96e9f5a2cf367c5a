//! SQL schema for the Consult SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
///
/// Timestamps are fixed-width RFC 3339 UTC strings, so comparing and ordering
/// them as text is the same as ordering them in time.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cases (
    case_id             TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    age                 INTEGER NOT NULL,
    gender              TEXT NOT NULL,
    common_symptoms     TEXT NOT NULL DEFAULT '[]',  -- JSON array, sorted
    additional_symptoms TEXT,
    urgency_level       TEXT NOT NULL,   -- 'low' | 'medium' | 'high' | 'emergency'
    status              TEXT NOT NULL DEFAULT 'waiting',
    version             INTEGER NOT NULL DEFAULT 1,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    CHECK (updated_at >= created_at)
);

-- Messages are strictly append-only.
CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    case_id    TEXT NOT NULL REFERENCES cases(case_id),
    sender     TEXT NOT NULL,   -- 'patient' | 'responder'
    text       TEXT NOT NULL,
    timestamp  TEXT NOT NULL,
    CHECK (length(trim(text)) > 0)
);

CREATE TRIGGER IF NOT EXISTS messages_no_update
BEFORE UPDATE ON messages
BEGIN
    SELECT RAISE(ABORT, 'messages are append-only');
END;

CREATE TRIGGER IF NOT EXISTS messages_no_delete
BEFORE DELETE ON messages
BEGIN
    SELECT RAISE(ABORT, 'messages are append-only');
END;

CREATE INDEX IF NOT EXISTS cases_status_idx     ON cases(status);
CREATE INDEX IF NOT EXISTS cases_created_idx    ON cases(created_at);
CREATE INDEX IF NOT EXISTS messages_thread_idx  ON messages(case_id, timestamp, message_id);

PRAGMA user_version = 1;
";
