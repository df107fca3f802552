//! Membership overrides: audit records of users manually added to an
//! inferred session.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use sesh_core::{format_timestamp, SessionId, UserId};

use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberOverrideRow {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub added_by_user_id: UserId,
    pub added_at: DateTime<Utc>,
}

pub struct MemberOverrideRepo;

impl MemberOverrideRepo {
    /// Record that `user_id` was added by `added_by`. A repeated add keeps the
    /// original record.
    pub fn insert_ignore(
        conn: &Connection,
        session_id: &SessionId,
        user_id: &UserId,
        added_by: &UserId,
    ) -> Result<bool, StoreError> {
        let inserted = conn.execute(
            "INSERT INTO session_member_overrides (session_id, user_id, added_by_user_id, added_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id, user_id) DO NOTHING",
            params![
                session_id.as_str(),
                user_id.as_str(),
                added_by.as_str(),
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn exists(
        conn: &Connection,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM session_member_overrides WHERE session_id = ?1 AND user_id = ?2",
                params![session_id.as_str(), user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn delete(
        conn: &Connection,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        let deleted = conn.execute(
            "DELETE FROM session_member_overrides WHERE session_id = ?1 AND user_id = ?2",
            params![session_id.as_str(), user_id.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Overrides of a session in the order they were added.
    pub fn list(
        conn: &Connection,
        session_id: &SessionId,
    ) -> Result<Vec<MemberOverrideRow>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT session_id, user_id, added_by_user_id, added_at
             FROM session_member_overrides WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([session_id.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(MemberOverrideRow {
                session_id: SessionId::from_raw(row_helpers::get::<String>(
                    row,
                    0,
                    "session_member_overrides",
                    "session_id",
                )?),
                user_id: UserId::from_raw(row_helpers::get::<String>(
                    row,
                    1,
                    "session_member_overrides",
                    "user_id",
                )?),
                added_by_user_id: UserId::from_raw(row_helpers::get::<String>(
                    row,
                    2,
                    "session_member_overrides",
                    "added_by_user_id",
                )?),
                added_at: row_helpers::get_timestamp(
                    row,
                    3,
                    "session_member_overrides",
                    "added_at",
                )?,
            });
        }
        Ok(out)
    }
}
