//! File versions (pre-image snapshots) and file changes (diff records).

use rusqlite::{params, OptionalExtension};

use loft_domain::error::{Error, Result};

use crate::rows::{FileChangeRow, FileVersionMeta, FileVersionRow};
use crate::{db_err, now_rfc3339, Store};

fn meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileVersionMeta> {
    let size: i64 = row.get("size")?;
    Ok(FileVersionMeta {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        path: row.get("path")?,
        idx: row.get("idx")?,
        size: size.max(0) as u64,
        note: row.get("note")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    /// Snapshot content as the next version of `path` in this session.
    /// The per-path `idx` is allocated inside the insert transaction, so
    /// indices stay dense even under concurrent writers.
    pub fn add_file_version(
        &self,
        session_id: &str,
        path: &str,
        content: &[u8],
        note: Option<&str>,
    ) -> Result<FileVersionMeta> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(db_err)?;
        let idx: u32 = tx
            .query_row(
                "SELECT COALESCE(MAX(idx), 0) + 1 FROM file_versions
                 WHERE session_id = ?1 AND path = ?2",
                params![session_id, path],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        tx.execute(
            "INSERT INTO file_versions (id, session_id, path, idx, content, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, session_id, path, idx, content, note, now],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(FileVersionMeta {
            id,
            session_id: session_id.to_owned(),
            path: path.to_owned(),
            idx,
            size: content.len() as u64,
            note: note.map(str::to_owned),
            created_at: now,
        })
    }

    /// Version metadata for one path, oldest first.
    pub fn file_versions(&self, session_id: &str, path: &str) -> Result<Vec<FileVersionMeta>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, path, idx, LENGTH(content) AS size, note, created_at
                 FROM file_versions WHERE session_id = ?1 AND path = ?2 ORDER BY idx",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id, path], meta_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Full version content by id.
    pub fn get_file_version(&self, version_id: &str) -> Result<FileVersionRow> {
        self.conn()
            .query_row(
                "SELECT id, session_id, path, idx, LENGTH(content) AS size, note, created_at,
                        content
                 FROM file_versions WHERE id = ?1",
                params![version_id],
                |row| {
                    Ok(FileVersionRow {
                        meta: meta_from_row(row)?,
                        content: row.get("content")?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("file version {version_id}")))
    }

    /// Record one successful mutation's diff.
    pub fn add_file_change(
        &self,
        session_id: &str,
        turn_id: Option<&str>,
        step_id: Option<&str>,
        path: &str,
        diff: &str,
    ) -> Result<FileChangeRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO file_changes (id, session_id, turn_id, step_id, path, diff, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, session_id, turn_id, step_id, path, diff, now],
            )
            .map_err(db_err)?;
        Ok(FileChangeRow {
            id,
            session_id: session_id.to_owned(),
            turn_id: turn_id.map(str::to_owned),
            step_id: step_id.map(str::to_owned),
            path: path.to_owned(),
            diff: diff.to_owned(),
            created_at: now,
        })
    }

    /// All changes of one session, oldest first (exports).
    pub fn file_changes(&self, session_id: &str) -> Result<Vec<FileChangeRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, turn_id, step_id, path, diff, created_at
                 FROM file_changes WHERE session_id = ?1 ORDER BY created_at, id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(FileChangeRow {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    turn_id: row.get(2)?,
                    step_id: row.get(3)?,
                    path: row.get(4)?,
                    diff: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}
