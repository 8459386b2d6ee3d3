//! Permission requests, per-tool policies, and the global mode singleton.

use rusqlite::{params, OptionalExtension};

use loft_domain::error::{Error, Result};
use loft_domain::policy::{PermissionMode, PermissionScope, PermissionStatus, ToolPolicy};

use crate::rows::{PermissionRequestRow, ToolPolicyRow};
use crate::{db_err, now_rfc3339, Store};

fn request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionRequestRow> {
    let input: String = row.get("input")?;
    let status: String = row.get("status")?;
    let scope: Option<String> = row.get("scope")?;
    Ok(PermissionRequestRow {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        turn_id: row.get("turn_id")?,
        step_id: row.get("step_id")?,
        tool_name: row.get("tool_name")?,
        input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
        status: PermissionStatus::parse(&status).unwrap_or(PermissionStatus::Expired),
        scope: scope.as_deref().and_then(PermissionScope::parse),
        created_at: row.get("created_at")?,
        resolved_at: row.get("resolved_at")?,
    })
}

const SELECT_REQUEST: &str = "SELECT id, session_id, turn_id, step_id, tool_name, input, \
                              status, scope, created_at, resolved_at FROM permission_requests";

impl Store {
    // ── Permission requests ───────────────────────────────────────

    pub fn create_permission_request(
        &self,
        session_id: &str,
        turn_id: Option<&str>,
        step_id: Option<&str>,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> Result<PermissionRequestRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO permission_requests
                 (id, session_id, turn_id, step_id, tool_name, input, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
                params![
                    id,
                    session_id,
                    turn_id,
                    step_id,
                    tool_name,
                    serde_json::to_string(input)?,
                    now
                ],
            )
            .map_err(db_err)?;
        Ok(PermissionRequestRow {
            id,
            session_id: session_id.to_owned(),
            turn_id: turn_id.map(str::to_owned),
            step_id: step_id.map(str::to_owned),
            tool_name: tool_name.to_owned(),
            input: input.clone(),
            status: PermissionStatus::Pending,
            scope: None,
            created_at: now,
            resolved_at: None,
        })
    }

    pub fn get_permission_request(&self, id: &str) -> Result<PermissionRequestRow> {
        let sql = format!("{SELECT_REQUEST} WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id], request_from_row)
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("permission request {id}")))
    }

    /// Move a request out of `pending`. Returns `false` when the request
    /// was already resolved (the single-transition guard).
    pub fn resolve_permission_request(
        &self,
        id: &str,
        status: PermissionStatus,
        scope: Option<PermissionScope>,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());
        let changed = self
            .conn()
            .execute(
                "UPDATE permission_requests
                 SET status = ?2, scope = ?3, resolved_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    id,
                    status.as_str(),
                    scope.map(PermissionScope::as_str),
                    now_rfc3339()
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    pub fn pending_permission_requests(
        &self,
        session_id: &str,
    ) -> Result<Vec<PermissionRequestRow>> {
        let conn = self.conn();
        let sql = format!(
            "{SELECT_REQUEST} WHERE session_id = ?1 AND status = 'pending' ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], request_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Expire every pending request of a turn (cancellation path).
    /// Returns the ids that were expired.
    pub fn expire_pending_for_turn(&self, turn_id: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "UPDATE permission_requests SET status = 'expired', resolved_at = ?2
                 WHERE turn_id = ?1 AND status = 'pending' RETURNING id",
            )
            .map_err(db_err)?;
        let ids = stmt
            .query_map(params![turn_id, now_rfc3339()], |row| row.get(0))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(db_err)?;
        Ok(ids)
    }

    // ── Tool policies ─────────────────────────────────────────────

    pub fn set_tool_policy(&self, tool_name: &str, policy: ToolPolicy) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tool_policies (tool_name, policy) VALUES (?1, ?2)
                 ON CONFLICT(tool_name) DO UPDATE SET policy = ?2",
                params![tool_name, policy.as_str()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_tool_policy(&self, tool_name: &str) -> Result<Option<ToolPolicy>> {
        let policy: Option<String> = self
            .conn()
            .query_row(
                "SELECT policy FROM tool_policies WHERE tool_name = ?1",
                params![tool_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(policy.as_deref().and_then(ToolPolicy::parse))
    }

    pub fn list_tool_policies(&self) -> Result<Vec<ToolPolicyRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT tool_name, policy FROM tool_policies ORDER BY tool_name")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let policy: String = row.get(1)?;
                Ok((name, policy))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|(tool_name, policy)| {
                ToolPolicy::parse(&policy).map(|policy| ToolPolicyRow { tool_name, policy })
            })
            .collect())
    }

    // ── Permission mode singleton ─────────────────────────────────

    pub fn permission_mode(&self) -> Result<Option<PermissionMode>> {
        let mode: Option<String> = self
            .conn()
            .query_row("SELECT mode FROM permission_mode WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)?;
        Ok(mode.as_deref().and_then(PermissionMode::parse))
    }

    pub fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO permission_mode (id, mode) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET mode = ?1",
                params![mode.as_str()],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_resolves_exactly_once() {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("s").unwrap();
        let req = store
            .create_permission_request(&s.id, None, None, "write_file", &json!({"path": "a"}))
            .unwrap();

        let first = store
            .resolve_permission_request(&req.id, PermissionStatus::Approved, Some(PermissionScope::Once))
            .unwrap();
        assert!(first);

        // Second transition is rejected.
        let second = store
            .resolve_permission_request(&req.id, PermissionStatus::Denied, None)
            .unwrap();
        assert!(!second);

        let fetched = store.get_permission_request(&req.id).unwrap();
        assert_eq!(fetched.status, PermissionStatus::Approved);
        assert_eq!(fetched.scope, Some(PermissionScope::Once));
        assert!(fetched.resolved_at.is_some());
    }

    #[test]
    fn pending_listing_excludes_resolved() {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("s").unwrap();
        let r1 = store
            .create_permission_request(&s.id, None, None, "fetch", &json!({}))
            .unwrap();
        let _r2 = store
            .create_permission_request(&s.id, None, None, "write_file", &json!({}))
            .unwrap();

        store
            .resolve_permission_request(&r1.id, PermissionStatus::Denied, None)
            .unwrap();

        let pending = store.pending_permission_requests(&s.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_name, "write_file");
    }

    #[test]
    fn expire_pending_for_turn_only_touches_that_turn() {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("s").unwrap();
        let t1 = store.create_turn(&s.id, "one").unwrap();
        let t2 = store.create_turn(&s.id, "two").unwrap();

        let in_t1 = store
            .create_permission_request(&s.id, Some(&t1.id), None, "fetch", &json!({}))
            .unwrap();
        let in_t2 = store
            .create_permission_request(&s.id, Some(&t2.id), None, "fetch", &json!({}))
            .unwrap();

        let expired = store.expire_pending_for_turn(&t1.id).unwrap();
        assert_eq!(expired, vec![in_t1.id.clone()]);

        assert_eq!(
            store.get_permission_request(&in_t1.id).unwrap().status,
            PermissionStatus::Expired
        );
        assert_eq!(
            store.get_permission_request(&in_t2.id).unwrap().status,
            PermissionStatus::Pending
        );
    }

    #[test]
    fn tool_policy_upsert_overwrites() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_tool_policy("fetch").unwrap().is_none());

        store.set_tool_policy("fetch", ToolPolicy::Ask).unwrap();
        store.set_tool_policy("fetch", ToolPolicy::Allow).unwrap();
        assert_eq!(
            store.get_tool_policy("fetch").unwrap(),
            Some(ToolPolicy::Allow)
        );

        let all = store.list_tool_policies().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].policy, ToolPolicy::Allow);
    }

    #[test]
    fn permission_mode_singleton() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.permission_mode().unwrap().is_none());

        store.set_permission_mode(PermissionMode::Allow).unwrap();
        store.set_permission_mode(PermissionMode::Ask).unwrap();
        assert_eq!(
            store.permission_mode().unwrap(),
            Some(PermissionMode::Ask)
        );
    }
}
