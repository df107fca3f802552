use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sesh_core::{format_timestamp, SessionCounts, SessionGroup, SessionId, UserId};

use crate::error::StoreError;
use crate::row_helpers;
use crate::ticks::SessionAggregate;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredSessionRow {
    pub id: SessionId,
    pub user_id: UserId,
    pub first_tick_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub counts: SessionCounts,
    pub created_at: DateTime<Utc>,
}

impl InferredSessionRow {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

const SESSION_COLUMNS: &str = "id, user_id, first_tick_at, last_tick_at, ended_at, name,
     description, tick_count, total_sends, total_flashes, total_attempts, created_at";

/// Stateless inferred session repository. Every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    pub fn get(
        conn: &Connection,
        id: &SessionId,
    ) -> Result<Option<InferredSessionRow>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM inferred_sessions WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }

    /// Create a session row with zeroed counts unless the id already exists.
    ///
    /// Returns `true` when this call created the row. Two writers minting the
    /// same deterministic id converge on one row.
    #[instrument(skip(conn), fields(session_id = %id, user_id = %user_id))]
    pub fn insert_if_absent(
        conn: &Connection,
        id: &SessionId,
        user_id: &UserId,
        first_tick_at: &DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let at = format_timestamp(first_tick_at);
        let inserted = conn.execute(
            "INSERT INTO inferred_sessions (id, user_id, first_tick_at, last_tick_at, created_at)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(id) DO NOTHING",
            params![id.as_str(), user_id.as_str(), at, format_timestamp(&Utc::now())],
        )?;
        Ok(inserted > 0)
    }

    /// Accumulating upsert for a clustered group: bounds only ever widen, so
    /// concurrent upserts converge whatever their order. Counts written here
    /// are provisional until the session is recalculated.
    #[instrument(
        skip(conn, group),
        fields(session_id = %group.session_id, ticks = group.tick_uuids.len())
    )]
    pub fn upsert_bounds(conn: &Connection, group: &SessionGroup) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO inferred_sessions
                 (id, user_id, first_tick_at, last_tick_at, tick_count, total_sends, total_flashes,
                  total_attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 first_tick_at = MIN(inferred_sessions.first_tick_at, excluded.first_tick_at),
                 last_tick_at = MAX(inferred_sessions.last_tick_at, excluded.last_tick_at)",
            params![
                group.session_id.as_str(),
                group.user_id.as_str(),
                format_timestamp(&group.first_tick_at),
                format_timestamp(&group.last_tick_at),
                group.counts.tick_count,
                group.counts.total_sends,
                group.counts.total_flashes,
                group.counts.total_attempts,
                format_timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Overwrite counts and bounds with a replayed aggregate. With no
    /// aggregate the counts are zeroed and the bounds kept.
    pub fn store_aggregate(
        conn: &Connection,
        id: &SessionId,
        aggregate: Option<&SessionAggregate>,
    ) -> Result<(), StoreError> {
        let changed = match aggregate {
            Some(agg) => conn.execute(
                "UPDATE inferred_sessions
                 SET tick_count = ?2, total_sends = ?3, total_flashes = ?4, total_attempts = ?5,
                     first_tick_at = ?6, last_tick_at = ?7
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    agg.counts.tick_count,
                    agg.counts.total_sends,
                    agg.counts.total_flashes,
                    agg.counts.total_attempts,
                    format_timestamp(&agg.first_tick_at),
                    format_timestamp(&agg.last_tick_at),
                ],
            )?,
            None => conn.execute(
                "UPDATE inferred_sessions
                 SET tick_count = 0, total_sends = 0, total_flashes = 0, total_attempts = 0
                 WHERE id = ?1",
                [id.as_str()],
            )?,
        };
        if changed == 0 {
            debug!(session_id = %id, "aggregate for unknown session discarded");
        }
        Ok(())
    }

    /// Set `ended_at` unless the session is already ended. Returns `true`
    /// when this call closed it.
    #[instrument(skip(conn), fields(session_id = %id))]
    pub fn close(
        conn: &Connection,
        id: &SessionId,
        ended_at: &DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let changed = conn.execute(
            "UPDATE inferred_sessions SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
            params![id.as_str(), format_timestamp(ended_at)],
        )?;
        Ok(changed > 0)
    }

    /// The user's open session with the latest activity.
    pub fn latest_open(
        conn: &Connection,
        user_id: &UserId,
    ) -> Result<Option<InferredSessionRow>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM inferred_sessions
             WHERE user_id = ?1 AND ended_at IS NULL
             ORDER BY last_tick_at DESC, id DESC
             LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([user_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }

    /// Close every open session of the user except the latest one, each at
    /// its own `last_tick_at`. Returns the number of sessions closed.
    #[instrument(skip(conn), fields(user_id = %user_id))]
    pub fn close_superseded(conn: &Connection, user_id: &UserId) -> Result<usize, StoreError> {
        let closed = conn.execute(
            "UPDATE inferred_sessions SET ended_at = last_tick_at
             WHERE user_id = ?1 AND ended_at IS NULL
               AND id != (
                   SELECT id FROM inferred_sessions
                   WHERE user_id = ?1 AND ended_at IS NULL
                   ORDER BY last_tick_at DESC, id DESC
                   LIMIT 1
               )",
            [user_id.as_str()],
        )?;
        Ok(closed)
    }

    /// Patch name and description. `None` leaves a field untouched, an empty
    /// string clears it.
    pub fn update_details(
        conn: &Connection,
        id: &SessionId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let changed = conn.execute(
            "UPDATE inferred_sessions SET
                 name = CASE WHEN ?2 IS NULL THEN name WHEN ?2 = '' THEN NULL ELSE ?2 END,
                 description = CASE WHEN ?3 IS NULL THEN description
                                    WHEN ?3 = '' THEN NULL ELSE ?3 END
             WHERE id = ?1",
            params![id.as_str(), name, description],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    pub fn count_open(conn: &Connection, user_id: &UserId) -> Result<i64, StoreError> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM inferred_sessions WHERE user_id = ?1 AND ended_at IS NULL",
            [user_id.as_str()],
            |row| row.get(0),
        )?)
    }
}

pub(crate) fn row_to_session(row: &rusqlite::Row<'_>) -> Result<InferredSessionRow, StoreError> {
    Ok(InferredSessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "inferred_sessions", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "inferred_sessions",
            "user_id",
        )?),
        first_tick_at: row_helpers::get_timestamp(row, 2, "inferred_sessions", "first_tick_at")?,
        last_tick_at: row_helpers::get_timestamp(row, 3, "inferred_sessions", "last_tick_at")?,
        ended_at: row_helpers::get_timestamp_opt(row, 4, "inferred_sessions", "ended_at")?,
        name: row_helpers::get_opt(row, 5, "inferred_sessions", "name")?,
        description: row_helpers::get_opt(row, 6, "inferred_sessions", "description")?,
        counts: SessionCounts {
            tick_count: row_helpers::get(row, 7, "inferred_sessions", "tick_count")?,
            total_sends: row_helpers::get(row, 8, "inferred_sessions", "total_sends")?,
            total_flashes: row_helpers::get(row, 9, "inferred_sessions", "total_flashes")?,
            total_attempts: row_helpers::get(row, 10, "inferred_sessions", "total_attempts")?,
        },
        created_at: row_helpers::get_timestamp(row, 11, "inferred_sessions", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use sesh_core::{inferred_session_id, parse_timestamp, TickUuid};

    fn ts(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).unwrap()
    }

    fn group(user: &str, first: &str, last: &str, ticks: u32) -> SessionGroup {
        let user_id = UserId::from_raw(user);
        SessionGroup {
            session_id: inferred_session_id(&user_id, &ts(first)),
            user_id,
            first_tick_at: ts(first),
            last_tick_at: ts(last),
            tick_uuids: (0..ticks).map(|i| TickUuid::from_raw(format!("t{i}"))).collect(),
            counts: SessionCounts {
                tick_count: ticks,
                total_sends: ticks,
                total_flashes: 0,
                total_attempts: 0,
            },
        }
    }

    #[test]
    fn insert_if_absent_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let user = UserId::from_raw("u1");
            let at = ts("2024-01-15T10:00:00Z");
            let id = inferred_session_id(&user, &at);
            assert!(SessionRepo::insert_if_absent(conn, &id, &user, &at)?);
            assert!(!SessionRepo::insert_if_absent(conn, &id, &user, &at)?);

            let row = SessionRepo::get(conn, &id)?.unwrap();
            assert_eq!(row.counts, SessionCounts::default());
            assert_eq!(row.first_tick_at, at);
            assert_eq!(row.last_tick_at, at);
            assert!(row.is_open());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn upsert_bounds_only_widens() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let first = group("u1", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z", 3);
            SessionRepo::upsert_bounds(conn, &first)?;

            let mut narrower = first.clone();
            narrower.first_tick_at = ts("2024-01-15T10:30:00Z");
            narrower.last_tick_at = ts("2024-01-15T12:00:00Z");
            SessionRepo::upsert_bounds(conn, &narrower)?;

            let row = SessionRepo::get(conn, &first.session_id)?.unwrap();
            assert_eq!(row.first_tick_at, ts("2024-01-15T10:00:00Z"));
            assert_eq!(row.last_tick_at, ts("2024-01-15T12:00:00Z"));
            assert_eq!(row.counts.tick_count, 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn store_aggregate_overwrites_and_zeroes() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let g = group("u1", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z", 3);
            SessionRepo::upsert_bounds(conn, &g)?;

            let agg = SessionAggregate {
                counts: SessionCounts::from_statuses([sesh_core::TickStatus::Flash]),
                first_tick_at: ts("2024-01-15T10:15:00Z"),
                last_tick_at: ts("2024-01-15T10:15:00Z"),
            };
            SessionRepo::store_aggregate(conn, &g.session_id, Some(&agg))?;
            let row = SessionRepo::get(conn, &g.session_id)?.unwrap();
            assert_eq!(row.counts, agg.counts);
            assert_eq!(row.first_tick_at, agg.first_tick_at);

            SessionRepo::store_aggregate(conn, &g.session_id, None)?;
            let row = SessionRepo::get(conn, &g.session_id)?.unwrap();
            assert_eq!(row.counts, SessionCounts::default());
            assert_eq!(row.first_tick_at, agg.first_tick_at);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn close_happens_once() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let g = group("u1", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z", 1);
            SessionRepo::upsert_bounds(conn, &g)?;
            assert!(SessionRepo::close(conn, &g.session_id, &g.last_tick_at)?);
            assert!(!SessionRepo::close(conn, &g.session_id, &ts("2024-02-01T00:00:00Z"))?);

            let row = SessionRepo::get(conn, &g.session_id)?.unwrap();
            assert_eq!(row.ended_at, Some(g.last_tick_at));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn close_superseded_keeps_latest_open() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let user = UserId::from_raw("u1");
            let morning = group("u1", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z", 1);
            let evening = group("u1", "2024-01-15T18:00:00Z", "2024-01-15T18:30:00Z", 1);
            let other = group("u2", "2024-01-15T09:00:00Z", "2024-01-15T09:30:00Z", 1);
            for g in [&morning, &evening, &other] {
                SessionRepo::upsert_bounds(conn, g)?;
            }

            assert_eq!(SessionRepo::close_superseded(conn, &user)?, 1);
            assert_eq!(SessionRepo::count_open(conn, &user)?, 1);

            let latest = SessionRepo::latest_open(conn, &user)?.unwrap();
            assert_eq!(latest.id, evening.session_id);
            let closed = SessionRepo::get(conn, &morning.session_id)?.unwrap();
            assert_eq!(closed.ended_at, Some(morning.last_tick_at));
            assert_eq!(SessionRepo::count_open(conn, &UserId::from_raw("u2"))?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn update_details_patches_and_clears() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let g = group("u1", "2024-01-15T10:00:00Z", "2024-01-15T11:00:00Z", 1);
            SessionRepo::upsert_bounds(conn, &g)?;

            SessionRepo::update_details(conn, &g.session_id, Some("Board night"), Some("v5s"))?;
            SessionRepo::update_details(conn, &g.session_id, None, Some(""))?;
            let row = SessionRepo::get(conn, &g.session_id)?.unwrap();
            assert_eq!(row.name.as_deref(), Some("Board night"));
            assert!(row.description.is_none());

            let nope = SessionId::from_raw("nope");
            let missing = SessionRepo::update_details(conn, &nope, Some("x"), None);
            assert!(matches!(missing, Err(StoreError::NotFound(_))));
            Ok(())
        })
        .unwrap();
    }
}
