//! Job Store (C5): durable job ledger, conversation persistence, state
//! machine enforcement, and idempotency by stable event id.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use ingest_types::{
    is_transition_allowed, Checksum, Conversation, ConversationTurn, ErrorCode, IngestionJob,
    IngestionStatus, StableEventId,
};

use crate::sqlite_security::prepare_db_path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ingestion_jobs (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    stable_event_id         TEXT NOT NULL UNIQUE,
    source_bucket           TEXT NOT NULL,
    source_key              TEXT NOT NULL,
    trace_id                TEXT,
    checksum                TEXT,
    schema_version          TEXT,
    status                  TEXT NOT NULL,
    retry_count             INTEGER NOT NULL DEFAULT 0,
    max_retries             INTEGER NOT NULL DEFAULT 3,
    created_at              TEXT NOT NULL,
    started_at              TEXT,
    completed_at            TEXT,
    last_error_at           TEXT,
    error_code              TEXT,
    error_message           TEXT,
    error_stack             TEXT,
    processing_metadata     TEXT NOT NULL DEFAULT '{}',
    conversation_id         INTEGER,
    file_size_bytes         INTEGER,
    processing_duration_ms  INTEGER
);

CREATE TABLE IF NOT EXISTS conversations (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    title               TEXT,
    date                TEXT NOT NULL,
    duration_minutes    INTEGER,
    language            TEXT,
    conversation_type   TEXT NOT NULL,
    transcript          TEXT NOT NULL,
    participants        TEXT NOT NULL,
    location_name       TEXT,
    location_lat        REAL,
    location_lon        REAL,
    confidence_score    REAL NOT NULL,
    main_topics         TEXT NOT NULL DEFAULT '[]',
    tags                TEXT NOT NULL DEFAULT '[]',
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_turns (
    conversation_id     INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    turn_index          INTEGER NOT NULL,
    speaker             TEXT NOT NULL,
    text                TEXT NOT NULL,
    timestamp_ms        INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, turn_index)
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a job for stable_event_id {0} already exists")]
    DuplicateEvent(String),
    #[error("no job found for stable_event_id {0}")]
    NotFound(String),
    #[error("illegal status transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: IngestionStatus,
        to: IngestionStatus,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Durable job ledger and conversation store.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (creating if absent) a database file, hardening its
    /// permissions the way the rest of the workspace hardens SQLite state.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        prepare_db_path(path)?;
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open an in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[must_use]
    pub fn find_by_stable_event_id(
        &self,
        id: &StableEventId,
    ) -> Result<Option<IngestionJob>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM ingestion_jobs WHERE stable_event_id = ?1",
                params![id.as_str()],
                row_to_job,
            )
            .optional()
            .map_err(StoreError::from)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        id: &StableEventId,
        bucket: &str,
        key: &str,
        initial_status: IngestionStatus,
        trace_id: Option<&str>,
        checksum: Option<&Checksum>,
        schema_version: Option<&str>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<IngestionJob, StoreError> {
        if self.find_by_stable_event_id(id)?.is_some() {
            return Err(StoreError::DuplicateEvent(id.to_string()));
        }
        self.conn.execute(
            "INSERT INTO ingestion_jobs
                (stable_event_id, source_bucket, source_key, trace_id, checksum,
                 schema_version, status, retry_count, max_retries, created_at,
                 started_at, processing_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, '{}')",
            params![
                id.as_str(),
                bucket,
                key,
                trace_id,
                checksum.map(Checksum::as_str),
                schema_version,
                initial_status.as_str(),
                max_retries,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        self.find_by_stable_event_id(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Commit a status transition and an optional metadata patch atomically.
    /// Enforces the state machine.
    pub fn advance(
        &self,
        job_id: i64,
        to: IngestionStatus,
        processing_metadata_patch: Option<&serde_json::Value>,
    ) -> Result<IngestionJob, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let current: IngestionStatus = tx.query_row(
            "SELECT status FROM ingestion_jobs WHERE id = ?1",
            params![job_id],
            |row| {
                let s: String = row.get(0)?;
                Ok(s.parse::<IngestionStatus>().unwrap_or(IngestionStatus::Failed))
            },
        )?;
        if !is_transition_allowed(current, to) {
            tracing::warn!(job_id, ?current, ?to, "rejected illegal status transition");
            return Err(StoreError::IllegalTransition { from: current, to });
        }
        tracing::warn!(job_id, from = ?current, to = ?to, "job status transition");

        if let Some(patch) = processing_metadata_patch {
            let existing: String = tx.query_row(
                "SELECT processing_metadata FROM ingestion_jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )?;
            let mut merged: serde_json::Value =
                serde_json::from_str(&existing).unwrap_or_else(|_| serde_json::json!({}));
            if let (Some(merged_obj), Some(patch_obj)) = (merged.as_object_mut(), patch.as_object())
            {
                for (k, v) in patch_obj {
                    merged_obj.insert(k.clone(), v.clone());
                }
            }
            tx.execute(
                "UPDATE ingestion_jobs SET status = ?1, processing_metadata = ?2 WHERE id = ?3",
                params![to.as_str(), merged.to_string(), job_id],
            )?;
        } else {
            tx.execute(
                "UPDATE ingestion_jobs SET status = ?1 WHERE id = ?2",
                params![to.as_str(), job_id],
            )?;
        }

        if to == IngestionStatus::Completed {
            tx.execute(
                "UPDATE ingestion_jobs SET completed_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), job_id],
            )?;
        }

        tx.commit()?;
        self.find_by_id(job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Mark a job for retry: back to `downloading`, bumping `retry_count`
    /// and refreshing `started_at`, clearing any prior `completed_at`.
    pub fn mark_retry(&self, job_id: i64, at: DateTime<Utc>) -> Result<IngestionJob, StoreError> {
        tracing::warn!(job_id, "job status transition: failed -> downloading (retry)");
        self.conn.execute(
            "UPDATE ingestion_jobs
             SET status = ?1, retry_count = retry_count + 1, started_at = ?2, completed_at = NULL
             WHERE id = ?3",
            params![IngestionStatus::Downloading.as_str(), at.to_rfc3339(), job_id],
        )?;
        self.find_by_id(job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    pub fn mark_failed(
        &self,
        job_id: i64,
        error_code: ErrorCode,
        message: &str,
        stack: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<IngestionJob, StoreError> {
        tracing::error!(job_id, error_code = error_code.as_str(), error_message = message, "job marked failed");
        self.conn.execute(
            "UPDATE ingestion_jobs
             SET status = ?1, error_code = ?2, error_message = ?3, error_stack = ?4, last_error_at = ?5
             WHERE id = ?6",
            params![
                IngestionStatus::Failed.as_str(),
                error_code.as_str(),
                message,
                stack,
                at.to_rfc3339(),
                job_id,
            ],
        )?;
        self.find_by_id(job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Persist a conversation and its turns in one transaction, linking
    /// `job.conversation_id` to the new conversation row.
    pub fn persist_conversation(
        &mut self,
        job_id: i64,
        conversation: &Conversation,
        turns: &[ConversationTurn],
    ) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        let (lat, lon) = conversation
            .location_gps
            .map_or((None, None), |(lat, lon)| (Some(lat), Some(lon)));
        tx.execute(
            "INSERT INTO conversations
                (title, date, duration_minutes, language, conversation_type, transcript,
                 participants, location_name, location_lat, location_lon, confidence_score,
                 main_topics, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                conversation.title,
                conversation.date.to_rfc3339(),
                conversation.duration_minutes,
                conversation.language,
                conversation_type_str(conversation.conversation_type),
                conversation.transcript,
                conversation.participants.to_string(),
                conversation.location_name,
                lat,
                lon,
                conversation.confidence_score,
                serde_json::to_string(&conversation.main_topics).unwrap_or_default(),
                serde_json::to_string(&conversation.tags).unwrap_or_default(),
                conversation.created_at.to_rfc3339(),
            ],
        )?;
        let conversation_id = tx.last_insert_rowid();

        for turn in turns {
            tx.execute(
                "INSERT INTO conversation_turns (conversation_id, turn_index, speaker, text, timestamp_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![conversation_id, turn.turn_index, turn.speaker, turn.text, turn.timestamp_ms],
            )?;
        }

        tx.execute(
            "UPDATE ingestion_jobs SET conversation_id = ?1 WHERE id = ?2",
            params![conversation_id, job_id],
        )?;

        tx.commit()?;
        Ok(conversation_id)
    }

    pub fn set_topics(&self, conversation_id: i64, topics: &[String]) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE conversations SET main_topics = ?1 WHERE id = ?2",
            params![serde_json::to_string(topics).unwrap_or_default(), conversation_id],
        )?;
        Ok(())
    }

    fn find_by_id(&self, job_id: i64) -> Result<Option<IngestionJob>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM ingestion_jobs WHERE id = ?1",
                params![job_id],
                row_to_job,
            )
            .optional()
            .map_err(StoreError::from)
    }
}

fn conversation_type_str(t: ingest_types::ConversationType) -> &'static str {
    use ingest_types::ConversationType::*;
    match t {
        Monologue => "monologue",
        OneToOne => "one_to_one",
        SmallGroup => "small_group",
        Meeting => "meeting",
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestionJob> {
    let stable_event_id: String = row.get("stable_event_id")?;
    let status: String = row.get("status")?;
    let checksum: Option<String> = row.get("checksum")?;
    let error_code: Option<String> = row.get("error_code")?;
    let processing_metadata: String = row.get("processing_metadata")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let last_error_at: Option<String> = row.get("last_error_at")?;

    Ok(IngestionJob {
        id: row.get("id")?,
        stable_event_id: StableEventId::new(&stable_event_id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        source_bucket: row.get("source_bucket")?,
        source_key: row.get("source_key")?,
        trace_id: row.get("trace_id")?,
        checksum: checksum
            .map(|c| Checksum::new(&c))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        schema_version: row.get("schema_version")?,
        status: status
            .parse()
            .map_err(|e: ingest_types::UnknownStatus| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        created_at: parse_dt(&created_at)?,
        started_at: started_at.map(|s| parse_dt(&s)).transpose()?,
        completed_at: completed_at.map(|s| parse_dt(&s)).transpose()?,
        last_error_at: last_error_at.map(|s| parse_dt(&s)).transpose()?,
        error_code: error_code.and_then(|c| ErrorCode::ALL.iter().copied().find(|e| e.as_str() == c)),
        error_message: row.get("error_message")?,
        error_stack: row.get("error_stack")?,
        processing_metadata: serde_json::from_str(&processing_metadata).unwrap_or(serde_json::Value::Null),
        conversation_id: row.get("conversation_id")?,
        file_size_bytes: row.get("file_size_bytes")?,
        processing_duration_ms: row.get("processing_duration_ms")?,
    })
}

fn parse_dt(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}
