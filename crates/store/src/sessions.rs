//! Session, settings, turn, and step persistence.

use rusqlite::{params, OptionalExtension};

use loft_domain::error::{Error, Result};

use crate::rows::{
    SessionRow, SessionSettingsRow, SessionStatus, StepRow, StepStatus, TurnRow, TurnSummary,
};
use crate::{db_err, now_rfc3339, Store};

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    let status: String = row.get("status")?;
    Ok(SessionRow {
        id: row.get("id")?,
        title: row.get("title")?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Idle),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn step_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepRow> {
    let status: String = row.get("status")?;
    Ok(StepRow {
        id: row.get("id")?,
        turn_id: row.get("turn_id")?,
        idx: row.get("idx")?,
        status: StepStatus::parse(&status).unwrap_or(StepStatus::Error),
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
    })
}

impl Store {
    // ── Sessions ──────────────────────────────────────────────────

    pub fn create_session(&self, title: &str) -> Result<SessionRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO sessions (id, title, status, created_at, updated_at)
                 VALUES (?1, ?2, 'idle', ?3, ?3)",
                params![id, title, now],
            )
            .map_err(db_err)?;
        Ok(SessionRow {
            id,
            title: title.to_owned(),
            status: SessionStatus::Idle,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<SessionRow> {
        self.conn()
            .query_row(
                "SELECT id, title, status, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![session_id],
                session_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, status, created_at, updated_at
                 FROM sessions ORDER BY updated_at DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], session_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE sessions SET title = ?2, updated_at = ?3 WHERE id = ?1",
                params![session_id, title, now_rfc3339()],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![session_id, status.as_str(), now_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Cascade-deletes every owned row (turns, steps, events, versions,
    /// changes, requests, context items).
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    // ── Settings ──────────────────────────────────────────────────

    pub fn get_settings(&self, session_id: &str) -> Result<Option<SessionSettingsRow>> {
        self.conn()
            .query_row(
                "SELECT session_id, override_model FROM session_settings WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(SessionSettingsRow {
                        session_id: row.get(0)?,
                        override_model: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    pub fn put_settings(&self, session_id: &str, override_model: Option<&str>) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO session_settings (session_id, override_model) VALUES (?1, ?2)
                 ON CONFLICT(session_id) DO UPDATE SET override_model = ?2",
                params![session_id, override_model],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn delete_settings(&self, session_id: &str) -> Result<()> {
        self.conn()
            .execute(
                "DELETE FROM session_settings WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(db_err)?;
        Ok(())
    }

    // ── Turns ─────────────────────────────────────────────────────

    pub fn create_turn(&self, session_id: &str, user_text: &str) -> Result<TurnRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO turns (id, session_id, user_text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, session_id, user_text, now],
            )
            .map_err(db_err)?;
        Ok(TurnRow {
            id,
            session_id: session_id.to_owned(),
            user_text: user_text.to_owned(),
            created_at: now,
        })
    }

    pub fn get_turn(&self, turn_id: &str) -> Result<TurnRow> {
        self.conn()
            .query_row(
                "SELECT id, session_id, user_text, created_at FROM turns WHERE id = ?1",
                params![turn_id],
                |row| {
                    Ok(TurnRow {
                        id: row.get(0)?,
                        session_id: row.get(1)?,
                        user_text: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("turn {turn_id}")))
    }

    /// Prior exchanges for a session, oldest first. The assistant text is
    /// taken from each turn's `final` event when one exists.
    pub fn turn_history(&self, session_id: &str) -> Result<Vec<TurnSummary>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.user_text, t.created_at,
                        (SELECT e.payload FROM events e
                          WHERE e.turn_id = t.id AND e.kind = 'final'
                          ORDER BY e.id LIMIT 1)
                 FROM turns t
                 WHERE t.session_id = ?1
                 ORDER BY t.created_at, t.id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                let payload: Option<String> = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    payload,
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(turn_id, user_text, created_at, payload)| {
                let assistant_text = payload
                    .and_then(|p| serde_json::from_str::<serde_json::Value>(&p).ok())
                    .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(String::from));
                TurnSummary {
                    turn_id,
                    user_text,
                    assistant_text,
                    created_at,
                }
            })
            .collect())
    }

    // ── Steps ─────────────────────────────────────────────────────

    pub fn create_step(&self, turn_id: &str, idx: u32) -> Result<StepRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO steps (id, turn_id, idx, status, started_at)
                 VALUES (?1, ?2, ?3, 'running', ?4)",
                params![id, turn_id, idx, now],
            )
            .map_err(db_err)?;
        Ok(StepRow {
            id,
            turn_id: turn_id.to_owned(),
            idx,
            status: StepStatus::Running,
            started_at: now,
            finished_at: None,
        })
    }

    pub fn finish_step(&self, step_id: &str, status: StepStatus) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE steps SET status = ?2, finished_at = ?3 WHERE id = ?1",
                params![step_id, status.as_str(), now_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn steps_for_turn(&self, turn_id: &str) -> Result<Vec<StepRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, turn_id, idx, status, started_at, finished_at
                 FROM steps WHERE turn_id = ?1 ORDER BY idx",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![turn_id], step_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}
