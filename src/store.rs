//! Session and violation persistence.
//!
//! Writes are idempotent upserts keyed by generated identifiers, so the
//! orchestrator can re-publish a session record as often as it likes and a
//! replayed alert insert cannot duplicate a row.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::monitor::session::{MonitoringSession, SessionState};
use crate::monitor::ViolationAlert;
use crate::recognize::Severity;

/// A persisted alert plus the ticket attached out-of-band, if any.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViolationRecord {
    #[serde(flatten)]
    pub alert: ViolationAlert,
    pub ticket_id: Option<String>,
}

/// Durable storage for sessions and their violations.
pub trait SessionStore: Send {
    fn upsert_session(&mut self, session: &MonitoringSession) -> Result<()>;
    fn insert_violation(&mut self, alert: &ViolationAlert) -> Result<()>;
    /// Attach a ticket identifier to an already-stored violation.
    fn attach_ticket(&mut self, alert_id: &str, ticket_id: &str) -> Result<()>;
    fn get_session(&mut self, session_id: &str) -> Result<Option<MonitoringSession>>;
    /// All sessions, most recently created first.
    fn list_sessions(&mut self) -> Result<Vec<MonitoringSession>>;
    /// A session's violations in detection-timestamp order.
    fn session_violations(&mut self, session_id: &str) -> Result<Vec<ViolationRecord>>;
}

// ----------------------------------------------------------------------------
// Sqlite store
// ----------------------------------------------------------------------------

pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS monitoring_sessions (
              id TEXT PRIMARY KEY,
              source_path TEXT NOT NULL,
              state TEXT NOT NULL,
              frame_rate REAL NOT NULL DEFAULT 0,
              total_frames INTEGER NOT NULL DEFAULT 0,
              duration_s REAL NOT NULL DEFAULT 0,
              current_frame INTEGER NOT NULL DEFAULT 0,
              current_timestamp_s REAL NOT NULL DEFAULT 0,
              violation_count INTEGER NOT NULL DEFAULT 0,
              analysis_interval_s REAL NOT NULL,
              auto_ticket INTEGER NOT NULL,
              created_at INTEGER NOT NULL,
              started_at INTEGER,
              completed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS violations (
              id TEXT PRIMARY KEY,
              session_id TEXT NOT NULL,
              timestamp_s REAL NOT NULL,
              frame_index INTEGER NOT NULL,
              hazard_type TEXT NOT NULL,
              severity TEXT NOT NULL,
              observation TEXT NOT NULL,
              location TEXT NOT NULL,
              osha_code TEXT,
              osha_title TEXT,
              plain_english TEXT,
              remediation TEXT,
              estimated_fix_time TEXT,
              frame_path TEXT NOT NULL,
              video_clip_path TEXT,
              ticket_id TEXT,
              detected_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_violations_session
              ON violations(session_id, timestamp_s);
            "#,
        )?;
        Ok(())
    }
}

impl SessionStore for SqliteSessionStore {
    fn upsert_session(&mut self, session: &MonitoringSession) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO monitoring_sessions (
              id, source_path, state, frame_rate, total_frames, duration_s,
              current_frame, current_timestamp_s, violation_count,
              analysis_interval_s, auto_ticket, created_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
              state = excluded.state,
              frame_rate = excluded.frame_rate,
              total_frames = excluded.total_frames,
              duration_s = excluded.duration_s,
              current_frame = excluded.current_frame,
              current_timestamp_s = excluded.current_timestamp_s,
              violation_count = excluded.violation_count,
              started_at = excluded.started_at,
              completed_at = excluded.completed_at
            "#,
            params![
                session.id,
                session.source_path,
                session.state.as_str(),
                session.frame_rate,
                session.total_frames as i64,
                session.duration_s,
                session.current_frame as i64,
                session.current_timestamp_s,
                session.violation_count as i64,
                session.analysis_interval_s,
                session.auto_ticket,
                session.created_at_s as i64,
                session.started_at_s.map(|v| v as i64),
                session.completed_at_s.map(|v| v as i64),
            ],
        )?;
        Ok(())
    }

    fn insert_violation(&mut self, alert: &ViolationAlert) -> Result<()> {
        // Replays keep the original row; alerts are immutable once emitted.
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO violations (
              id, session_id, timestamp_s, frame_index, hazard_type, severity,
              observation, location, osha_code, osha_title, plain_english,
              remediation, estimated_fix_time, frame_path, video_clip_path,
              ticket_id, detected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, NULL, ?16)
            "#,
            params![
                alert.alert_id,
                alert.session_id,
                alert.timestamp_s,
                alert.frame_index as i64,
                alert.hazard_type,
                alert.severity.as_str(),
                alert.observation,
                alert.location,
                alert.osha_code,
                alert.osha_title,
                alert.plain_english,
                alert.remediation,
                alert.estimated_fix_time,
                alert.frame_path,
                alert.video_clip_path,
                alert.detected_at_s as i64,
            ],
        )?;
        Ok(())
    }

    fn attach_ticket(&mut self, alert_id: &str, ticket_id: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE violations SET ticket_id = ?1 WHERE id = ?2",
            params![ticket_id, alert_id],
        )?;
        if updated == 0 {
            return Err(anyhow!("no stored violation with id '{alert_id}'"));
        }
        Ok(())
    }

    fn get_session(&mut self, session_id: &str) -> Result<Option<MonitoringSession>> {
        let session = self
            .conn
            .query_row(
                "SELECT id, source_path, state, frame_rate, total_frames, duration_s,
                        current_frame, current_timestamp_s, violation_count,
                        analysis_interval_s, auto_ticket, created_at, started_at, completed_at
                 FROM monitoring_sessions WHERE id = ?1",
                params![session_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn list_sessions(&mut self) -> Result<Vec<MonitoringSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_path, state, frame_rate, total_frames, duration_s,
                    current_frame, current_timestamp_s, violation_count,
                    analysis_interval_s, auto_ticket, created_at, started_at, completed_at
             FROM monitoring_sessions ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], session_from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn session_violations(&mut self, session_id: &str) -> Result<Vec<ViolationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, timestamp_s, frame_index, hazard_type, severity,
                    observation, location, osha_code, osha_title, plain_english,
                    remediation, estimated_fix_time, frame_path, video_clip_path,
                    ticket_id, detected_at
             FROM violations WHERE session_id = ?1 ORDER BY timestamp_s, id",
        )?;
        let rows = stmt.query_map(params![session_id], violation_from_row)?;
        let mut violations = Vec::new();
        for row in rows {
            violations.push(row?);
        }
        Ok(violations)
    }
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MonitoringSession> {
    let state_raw: String = row.get(2)?;
    let state = SessionState::parse(&state_raw).unwrap_or(SessionState::Failed);
    Ok(MonitoringSession {
        id: row.get(0)?,
        source_path: row.get(1)?,
        state,
        frame_rate: row.get(3)?,
        total_frames: row.get::<_, i64>(4)? as u64,
        duration_s: row.get(5)?,
        current_frame: row.get::<_, i64>(6)? as u64,
        current_timestamp_s: row.get(7)?,
        violation_count: row.get::<_, i64>(8)? as u64,
        analysis_interval_s: row.get(9)?,
        auto_ticket: row.get(10)?,
        created_at_s: row.get::<_, i64>(11)? as u64,
        started_at_s: row.get::<_, Option<i64>>(12)?.map(|v| v as u64),
        completed_at_s: row.get::<_, Option<i64>>(13)?.map(|v| v as u64),
    })
}

fn violation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ViolationRecord> {
    let severity_raw: String = row.get(5)?;
    Ok(ViolationRecord {
        alert: ViolationAlert {
            alert_id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp_s: row.get(2)?,
            frame_index: row.get::<_, i64>(3)? as u64,
            hazard_type: row.get(4)?,
            severity: Severity::parse(&severity_raw).unwrap_or_default(),
            observation: row.get(6)?,
            location: row.get(7)?,
            osha_code: row.get(8)?,
            osha_title: row.get(9)?,
            plain_english: row.get(10)?,
            remediation: row.get(11)?,
            estimated_fix_time: row.get(12)?,
            frame_path: row.get(13)?,
            video_clip_path: row.get(14)?,
            detected_at_s: row.get::<_, i64>(16)? as u64,
        },
        ticket_id: row.get(15)?,
    })
}

// ----------------------------------------------------------------------------
// In-memory store (tests, demo)
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: HashMap<String, MonitoringSession>,
    violations: Vec<ViolationRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn upsert_session(&mut self, session: &MonitoringSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn insert_violation(&mut self, alert: &ViolationAlert) -> Result<()> {
        if self
            .violations
            .iter()
            .any(|v| v.alert.alert_id == alert.alert_id)
        {
            return Ok(());
        }
        self.violations.push(ViolationRecord {
            alert: alert.clone(),
            ticket_id: None,
        });
        Ok(())
    }

    fn attach_ticket(&mut self, alert_id: &str, ticket_id: &str) -> Result<()> {
        let record = self
            .violations
            .iter_mut()
            .find(|v| v.alert.alert_id == alert_id)
            .ok_or_else(|| anyhow!("no stored violation with id '{alert_id}'"))?;
        record.ticket_id = Some(ticket_id.to_string());
        Ok(())
    }

    fn get_session(&mut self, session_id: &str) -> Result<Option<MonitoringSession>> {
        Ok(self.sessions.get(session_id).cloned())
    }

    fn list_sessions(&mut self) -> Result<Vec<MonitoringSession>> {
        let mut sessions: Vec<MonitoringSession> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.created_at_s
                .cmp(&a.created_at_s)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(sessions)
    }

    fn session_violations(&mut self, session_id: &str) -> Result<Vec<ViolationRecord>> {
        let mut violations: Vec<ViolationRecord> = self
            .violations
            .iter()
            .filter(|v| v.alert.session_id == session_id)
            .cloned()
            .collect();
        violations.sort_by(|a, b| {
            a.alert
                .timestamp_s
                .partial_cmp(&b.alert.timestamp_s)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(id: &str) -> MonitoringSession {
        MonitoringSession::new(id, "stub://yard?fps=30&frames=900", 1.5, true, 1_700_000_000)
    }

    fn sample_alert(session_id: &str, seq: u64, ts: f64) -> ViolationAlert {
        ViolationAlert {
            alert_id: format!("{session_id}_{seq}"),
            session_id: session_id.to_string(),
            timestamp_s: ts,
            frame_index: (ts * 30.0) as u64,
            hazard_type: "PPE".into(),
            severity: Severity::High,
            observation: "Worker without a hard hat".into(),
            location: "scaffolding".into(),
            osha_code: Some("29 CFR 1926.100".into()),
            osha_title: Some("Head Protection".into()),
            plain_english: Some("A worker is not wearing a hard hat.".into()),
            remediation: Some("Provide a hard hat.".into()),
            estimated_fix_time: Some("Immediate".into()),
            frame_path: "frames/frame_000000.jpg".into(),
            video_clip_path: None,
            detected_at_s: 1_700_000_100,
        }
    }

    fn exercise_store(store: &mut dyn SessionStore) {
        let mut session = sample_session("s1");
        store.upsert_session(&session).unwrap();

        session.state = SessionState::Processing;
        session.violation_count = 2;
        store.upsert_session(&session).unwrap();

        let loaded = store.get_session("s1").unwrap().expect("session exists");
        assert_eq!(loaded.state, SessionState::Processing);
        assert_eq!(loaded.violation_count, 2);

        store.insert_violation(&sample_alert("s1", 2, 10.0)).unwrap();
        store.insert_violation(&sample_alert("s1", 1, 0.0)).unwrap();
        // Replay is a no-op.
        store.insert_violation(&sample_alert("s1", 1, 0.0)).unwrap();

        let violations = store.session_violations("s1").unwrap();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].alert.alert_id, "s1_1");
        assert_eq!(violations[1].alert.alert_id, "s1_2");

        store.attach_ticket("s1_1", "SAFETY-1234").unwrap();
        let violations = store.session_violations("s1").unwrap();
        assert_eq!(violations[0].ticket_id.as_deref(), Some("SAFETY-1234"));
        assert!(store.attach_ticket("missing", "SAFETY-0").is_err());

        assert!(store.get_session("unknown").unwrap().is_none());
        assert_eq!(store.list_sessions().unwrap().len(), 1);
    }

    #[test]
    fn sqlite_store_round_trips() {
        let mut store = SqliteSessionStore::open_in_memory().unwrap();
        exercise_store(&mut store);
    }

    #[test]
    fn in_memory_store_round_trips() {
        let mut store = InMemorySessionStore::new();
        exercise_store(&mut store);
    }
}
