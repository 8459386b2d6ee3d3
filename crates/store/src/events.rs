//! The append-only event log.
//!
//! `append_event` is the single place `(id, seq)` pairs are minted: the
//! per-session `last_seq` bump and the event insert commit in one
//! transaction, so the global rowid order and the per-session seq order can
//! never diverge from each other or from what a replay sees.

use rusqlite::params;

use loft_domain::error::{Error, Result};
use loft_domain::event::{now_ts, EventEnvelope};

use crate::{db_err, now_rfc3339, Store};

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventEnvelope> {
    let payload: String = row.get("payload")?;
    Ok(EventEnvelope {
        id: row.get("id")?,
        seq: row.get("seq")?,
        ts: row.get("ts")?,
        session_id: row.get("session_id")?,
        turn_id: row.get("turn_id")?,
        step_id: row.get("step_id")?,
        kind: row.get("kind")?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
    })
}

const SELECT_EVENT: &str =
    "SELECT id, seq, session_id, turn_id, step_id, ts, kind, payload FROM events";

impl Store {
    /// Append one event, allocating its global id and per-session seq.
    ///
    /// Returns the fully stamped envelope. Fails with `NotFound` when the
    /// session does not exist.
    pub fn append_event(
        &self,
        session_id: &str,
        turn_id: Option<&str>,
        step_id: Option<&str>,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<EventEnvelope> {
        let ts = now_ts();
        let payload_text = serde_json::to_string(payload)?;

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(db_err)?;

        let seq: i64 = tx
            .query_row(
                "UPDATE sessions SET last_seq = last_seq + 1, updated_at = ?2
                 WHERE id = ?1 RETURNING last_seq",
                params![session_id, now_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("session {session_id}"))
                }
                other => db_err(other),
            })?;

        tx.execute(
            "INSERT INTO events (seq, session_id, turn_id, step_id, ts, kind, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![seq, session_id, turn_id, step_id, ts, kind, payload_text],
        )
        .map_err(db_err)?;
        let id = tx.last_insert_rowid();

        tx.commit().map_err(db_err)?;

        Ok(EventEnvelope {
            id,
            seq,
            ts,
            session_id: session_id.to_owned(),
            turn_id: turn_id.map(str::to_owned),
            step_id: step_id.map(str::to_owned),
            kind: kind.to_owned(),
            payload: payload.clone(),
        })
    }

    /// Events of one session with `id > since`, in id order.
    pub fn events_since(
        &self,
        session_id: &str,
        since_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<EventEnvelope>> {
        let conn = self.conn();
        let sql = format!(
            "{SELECT_EVENT} WHERE session_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![session_id, since_id, limit], event_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Events of one session with `seq > since_seq`, in seq order.
    pub fn events_since_seq(
        &self,
        session_id: &str,
        since_seq: i64,
        limit: Option<usize>,
    ) -> Result<Vec<EventEnvelope>> {
        let conn = self.conn();
        let sql = format!(
            "{SELECT_EVENT} WHERE session_id = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![session_id, since_seq, limit], event_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// All events of a session, in id order (exports).
    pub fn events_for_session(&self, session_id: &str) -> Result<Vec<EventEnvelope>> {
        self.events_since(session_id, 0, None)
    }

    /// Cross-session suffix with `id > since`, for unfiltered subscribers.
    pub fn events_since_all(
        &self,
        since_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<EventEnvelope>> {
        let conn = self.conn();
        let sql = format!("{SELECT_EVENT} WHERE id > ?1 ORDER BY id LIMIT ?2");
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![since_id, limit], event_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Highest assigned global id, 0 when the log is empty.
    pub fn latest_event_id(&self) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT COALESCE(MAX(id), 0) FROM events",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(n: u32) -> serde_json::Value {
        json!({ "state": format!("marker-{n}") })
    }

    #[test]
    fn seq_is_dense_per_session_and_id_global() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_session("a").unwrap();
        let b = store.create_session("b").unwrap();

        let mut last_id = 0;
        for round in 0..3 {
            let ea = store
                .append_event(&a.id, None, None, "status", &payload(round))
                .unwrap();
            let eb = store
                .append_event(&b.id, None, None, "status", &payload(round))
                .unwrap();
            assert_eq!(ea.seq, round as i64 + 1);
            assert_eq!(eb.seq, round as i64 + 1);
            assert!(ea.id > last_id);
            assert!(eb.id > ea.id);
            last_id = eb.id;
        }
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .append_event("ghost", None, None, "status", &payload(0))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn events_since_returns_exact_suffix() {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("s").unwrap();

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(
                store
                    .append_event(&s.id, None, None, "status", &payload(n))
                    .unwrap()
                    .id,
            );
        }

        let suffix = store.events_since(&s.id, ids[1], None).unwrap();
        let got: Vec<i64> = suffix.iter().map(|e| e.id).collect();
        assert_eq!(got, ids[2..].to_vec());

        // A foreign session's events never leak in.
        let other = store.create_session("other").unwrap();
        store
            .append_event(&other.id, None, None, "status", &payload(9))
            .unwrap();
        let suffix = store.events_since(&s.id, 0, None).unwrap();
        assert!(suffix.iter().all(|e| e.session_id == s.id));
    }

    #[test]
    fn events_since_seq_matches_seq_order() {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("s").unwrap();
        for n in 0..4 {
            store
                .append_event(&s.id, None, None, "status", &payload(n))
                .unwrap();
        }
        let tail = store.events_since_seq(&s.id, 2, None).unwrap();
        let seqs: Vec<i64> = tail.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn payload_round_trips_through_storage() {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("s").unwrap();
        let payload = json!({"tool_call_id": "tc1", "ok": true, "duration_ms": 12});
        store
            .append_event(&s.id, None, None, "tool_result", &payload)
            .unwrap();

        let events = store.events_for_session(&s.id).unwrap();
        assert_eq!(events[0].kind, "tool_result");
        assert_eq!(events[0].payload, payload);
    }

    #[test]
    fn latest_event_id_tracks_appends() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.latest_event_id().unwrap(), 0);
        let s = store.create_session("s").unwrap();
        let e = store
            .append_event(&s.id, None, None, "status", &payload(0))
            .unwrap();
        assert_eq!(store.latest_event_id().unwrap(), e.id);
    }

    #[test]
    fn turn_and_step_ids_are_stored() {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("s").unwrap();
        let turn = store.create_turn(&s.id, "msg").unwrap();
        let step = store.create_step(&turn.id, 0).unwrap();

        let e = store
            .append_event(&s.id, Some(&turn.id), Some(&step.id), "status", &payload(0))
            .unwrap();
        assert_eq!(e.turn_id.as_deref(), Some(turn.id.as_str()));

        let back = store.events_for_session(&s.id).unwrap();
        assert_eq!(back[0].step_id.as_deref(), Some(step.id.as_str()));
    }
}
