//! Pinned context items and their cached summaries.

use rusqlite::{params, OptionalExtension};

use loft_domain::error::{Error, Result};

use crate::rows::ContextItemRow;
use crate::{db_err, now_rfc3339, Store};

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextItemRow> {
    let pinned: i64 = row.get("pinned")?;
    Ok(ContextItemRow {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        kind: row.get("kind")?,
        title: row.get("title")?,
        content_ref: row.get("content_ref")?,
        pinned: pinned != 0,
        summary: row.get("summary")?,
        summary_sha256: row.get("summary_sha256")?,
        created_at: row.get("created_at")?,
    })
}

const SELECT_ITEM: &str = "SELECT id, session_id, kind, title, content_ref, pinned, \
                           summary, summary_sha256, created_at FROM context_items";

impl Store {
    pub fn add_context_item(
        &self,
        session_id: &str,
        kind: &str,
        title: &str,
        content_ref: &str,
        pinned: bool,
    ) -> Result<ContextItemRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO context_items
                 (id, session_id, kind, title, content_ref, pinned, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, session_id, kind, title, content_ref, pinned as i64, now],
            )
            .map_err(db_err)?;
        Ok(ContextItemRow {
            id,
            session_id: session_id.to_owned(),
            kind: kind.to_owned(),
            title: title.to_owned(),
            content_ref: content_ref.to_owned(),
            pinned,
            summary: None,
            summary_sha256: None,
            created_at: now,
        })
    }

    pub fn get_context_item(&self, id: &str) -> Result<ContextItemRow> {
        let sql = format!("{SELECT_ITEM} WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id], item_from_row)
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("context item {id}")))
    }

    pub fn list_context_items(
        &self,
        session_id: &str,
        pinned_only: bool,
    ) -> Result<Vec<ContextItemRow>> {
        let conn = self.conn();
        let sql = if pinned_only {
            format!("{SELECT_ITEM} WHERE session_id = ?1 AND pinned = 1 ORDER BY created_at, id")
        } else {
            format!("{SELECT_ITEM} WHERE session_id = ?1 ORDER BY created_at, id")
        };
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], item_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn set_context_pinned(&self, id: &str, pinned: bool) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE context_items SET pinned = ?2 WHERE id = ?1",
                params![id, pinned as i64],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("context item {id}")));
        }
        Ok(())
    }

    /// Cache a synthesized summary keyed by the content hash it was built
    /// from; a later hash mismatch invalidates it.
    pub fn set_context_summary(&self, id: &str, summary: &str, sha256: &str) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE context_items SET summary = ?2, summary_sha256 = ?3 WHERE id = ?1",
                params![id, summary, sha256],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("context item {id}")));
        }
        Ok(())
    }
}
