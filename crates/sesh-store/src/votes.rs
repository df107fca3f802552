use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use sesh_core::{format_timestamp, SessionId, UserId};

use crate::error::StoreError;

/// Up/down totals for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTotals {
    pub upvotes: u32,
    pub downvotes: u32,
}

impl VoteTotals {
    pub fn score(&self) -> i64 {
        i64::from(self.upvotes) - i64::from(self.downvotes)
    }
}

pub struct VoteRepo;

impl VoteRepo {
    /// Set the user's vote on a session. `value` must be `1` or `-1`.
    pub fn cast(
        conn: &Connection,
        session_id: &SessionId,
        user_id: &UserId,
        value: i8,
    ) -> Result<(), StoreError> {
        if value != 1 && value != -1 {
            return Err(StoreError::Conflict(format!("invalid vote value {value}")));
        }
        conn.execute(
            "INSERT INTO session_votes (session_id, user_id, value, voted_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id, user_id)
             DO UPDATE SET value = excluded.value, voted_at = excluded.voted_at",
            params![session_id.as_str(), user_id.as_str(), value, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn remove(
        conn: &Connection,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        let deleted = conn.execute(
            "DELETE FROM session_votes WHERE session_id = ?1 AND user_id = ?2",
            params![session_id.as_str(), user_id.as_str()],
        )?;
        Ok(deleted > 0)
    }

    pub fn totals(conn: &Connection, session_id: &SessionId) -> Result<VoteTotals, StoreError> {
        let (up, down): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN value = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN value = -1 THEN 1 ELSE 0 END), 0)
             FROM session_votes WHERE session_id = ?1",
            [session_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(VoteTotals {
            upvotes: up as u32,
            downvotes: down as u32,
        })
    }
}
