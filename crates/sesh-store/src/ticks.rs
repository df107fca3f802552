//! Tick repository: CRUD and bulk session reassignment for the `ticks` table.
//!
//! `inferred_session_id` and `previous_inferred_session_id` are the only
//! columns this crate mutates after insert.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use sesh_core::{
    format_timestamp, SessionCounts, SessionId, TickForGrouping, TickStatus, TickUuid, UserId,
};

use crate::error::StoreError;
use crate::parties::PartyRepo;
use crate::row_helpers;

/// A stored tick row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRow {
    pub id: i64,
    pub uuid: TickUuid,
    pub user_id: UserId,
    pub climb_uuid: String,
    pub board_type: String,
    pub difficulty: Option<i64>,
    pub status: TickStatus,
    pub climbed_at: DateTime<Utc>,
    pub explicit_session_id: Option<SessionId>,
    pub inferred_session_id: Option<SessionId>,
    pub previous_inferred_session_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
}

impl TickRow {
    pub fn for_grouping(&self) -> TickForGrouping {
        TickForGrouping {
            uuid: self.uuid.clone(),
            user_id: self.user_id.clone(),
            climbed_at: self.climbed_at,
            status: self.status,
            explicit_session_id: self.explicit_session_id.clone(),
            inferred_session_id: self.inferred_session_id.clone(),
        }
    }
}

/// A tick as delivered by the ingestion pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTick {
    pub uuid: TickUuid,
    pub user_id: UserId,
    #[serde(default)]
    pub climb_uuid: String,
    #[serde(default)]
    pub board_type: String,
    #[serde(default)]
    pub difficulty: Option<i64>,
    pub status: TickStatus,
    pub climbed_at: DateTime<Utc>,
    #[serde(default)]
    pub explicit_session_id: Option<SessionId>,
}

/// Conjunctive filter for [`TickRepo::query`]. Unset fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct TickFilter {
    pub user_id: Option<UserId>,
    pub exclude_uuid: Option<TickUuid>,
    /// Neither explicit nor inferred session set.
    pub unassigned_only: bool,
    /// No explicit (party) session set.
    pub exclude_explicit: bool,
    pub inferred_session_id: Option<SessionId>,
    pub explicit_session_id: Option<SessionId>,
    /// Inclusive lower bound on `climbed_at`.
    pub climbed_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `climbed_at`.
    pub climbed_to: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOrder {
    ClimbedAtAsc,
    ClimbedAtDesc,
}

/// Replay-computed aggregate of the ticks pointing at one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionAggregate {
    pub counts: SessionCounts,
    pub first_tick_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
}

const TICK_COLUMNS: &str = "id, uuid, user_id, climb_uuid, board_type, difficulty, status,
     climbed_at, explicit_session_id, inferred_session_id, previous_inferred_session_id,
     created_at";

/// Stateless tick repository. Every method takes `&Connection`.
pub struct TickRepo;

impl TickRepo {
    /// Insert a tick. Duplicate uuids are a [`StoreError::Conflict`].
    #[instrument(skip(conn, tick), fields(tick_uuid = %tick.uuid, user_id = %tick.user_id))]
    pub fn insert(conn: &Connection, tick: &NewTick) -> Result<TickRow, StoreError> {
        let now = format_timestamp(&Utc::now());
        let inserted = conn.execute(
            "INSERT INTO ticks (uuid, user_id, climb_uuid, board_type, difficulty, status,
                                climbed_at, explicit_session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(uuid) DO NOTHING",
            params![
                tick.uuid.as_str(),
                tick.user_id.as_str(),
                tick.climb_uuid,
                tick.board_type,
                tick.difficulty,
                tick.status.to_string(),
                format_timestamp(&tick.climbed_at),
                tick.explicit_session_id.as_ref().map(SessionId::as_str),
                now,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Conflict(format!("tick {} already exists", tick.uuid)));
        }
        if let Some(party) = &tick.explicit_session_id {
            PartyRepo::refresh(conn, party)?;
        }
        Self::get_by_uuid(conn, &tick.uuid)?
            .ok_or_else(|| StoreError::NotFound(format!("tick {}", tick.uuid)))
    }

    pub fn get_by_uuid(conn: &Connection, uuid: &TickUuid) -> Result<Option<TickRow>, StoreError> {
        let sql = format!("SELECT {TICK_COLUMNS} FROM ticks WHERE uuid = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([uuid.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_tick(row)?)),
            None => Ok(None),
        }
    }

    /// Filtered, ordered tick query.
    pub fn query(
        conn: &Connection,
        filter: &TickFilter,
        order: TickOrder,
        limit: Option<u32>,
    ) -> Result<Vec<TickRow>, StoreError> {
        let mut sql = format!("SELECT {TICK_COLUMNS} FROM ticks WHERE 1=1");
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(user_id) = &filter.user_id {
            values.push(Box::new(user_id.as_str().to_string()));
            sql.push_str(&format!(" AND user_id = ?{}", values.len()));
        }
        if let Some(uuid) = &filter.exclude_uuid {
            values.push(Box::new(uuid.as_str().to_string()));
            sql.push_str(&format!(" AND uuid != ?{}", values.len()));
        }
        if filter.unassigned_only {
            sql.push_str(" AND explicit_session_id IS NULL AND inferred_session_id IS NULL");
        }
        if filter.exclude_explicit {
            sql.push_str(" AND explicit_session_id IS NULL");
        }
        if let Some(session_id) = &filter.inferred_session_id {
            values.push(Box::new(session_id.as_str().to_string()));
            sql.push_str(&format!(" AND inferred_session_id = ?{}", values.len()));
        }
        if let Some(session_id) = &filter.explicit_session_id {
            values.push(Box::new(session_id.as_str().to_string()));
            sql.push_str(&format!(" AND explicit_session_id = ?{}", values.len()));
        }
        if let Some(from) = &filter.climbed_from {
            values.push(Box::new(format_timestamp(from)));
            sql.push_str(&format!(" AND climbed_at >= ?{}", values.len()));
        }
        if let Some(to) = &filter.climbed_to {
            values.push(Box::new(format_timestamp(to)));
            sql.push_str(&format!(" AND climbed_at <= ?{}", values.len()));
        }

        sql.push_str(match order {
            TickOrder::ClimbedAtAsc => " ORDER BY climbed_at ASC, id ASC",
            TickOrder::ClimbedAtDesc => " ORDER BY climbed_at DESC, id DESC",
        });
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let value_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(value_refs.as_slice())?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_tick(row)?);
        }
        Ok(results)
    }

    /// Point ticks at `session_id` (or clear the pointer with `None`).
    #[instrument(skip(conn, uuids), fields(count = uuids.len()))]
    pub fn set_inferred_session(
        conn: &Connection,
        uuids: &[TickUuid],
        session_id: Option<&SessionId>,
    ) -> Result<usize, StoreError> {
        let mut stmt =
            conn.prepare_cached("UPDATE ticks SET inferred_session_id = ?1 WHERE uuid = ?2")?;
        let mut changed = 0;
        for uuid in uuids {
            changed += stmt.execute(params![session_id.map(SessionId::as_str), uuid.as_str()])?;
        }
        Ok(changed)
    }

    /// Move ticks into `session_id`, keeping their current session as the
    /// undo pointer (even when it is null).
    #[instrument(skip(conn, uuids), fields(session_id = %session_id, count = uuids.len()))]
    pub fn reassign_to_session(
        conn: &Connection,
        uuids: &[TickUuid],
        session_id: &SessionId,
    ) -> Result<usize, StoreError> {
        let mut stmt = conn.prepare_cached(
            "UPDATE ticks
             SET previous_inferred_session_id = inferred_session_id, inferred_session_id = ?1
             WHERE uuid = ?2",
        )?;
        let mut changed = 0;
        for uuid in uuids {
            changed += stmt.execute(params![session_id.as_str(), uuid.as_str()])?;
        }
        Ok(changed)
    }

    /// Undo [`Self::reassign_to_session`] for ticks that carry an undo pointer.
    #[instrument(skip(conn, uuids), fields(count = uuids.len()))]
    pub fn restore_previous(conn: &Connection, uuids: &[TickUuid]) -> Result<usize, StoreError> {
        let mut stmt = conn.prepare_cached(
            "UPDATE ticks
             SET inferred_session_id = previous_inferred_session_id,
                 previous_inferred_session_id = NULL
             WHERE uuid = ?1 AND previous_inferred_session_id IS NOT NULL",
        )?;
        let mut changed = 0;
        for uuid in uuids {
            changed += stmt.execute([uuid.as_str()])?;
        }
        Ok(changed)
    }

    /// Clear the inferred session of ticks still pointing at `session_id`.
    pub fn clear_inferred_session(
        conn: &Connection,
        uuids: &[TickUuid],
        session_id: &SessionId,
    ) -> Result<usize, StoreError> {
        let mut stmt = conn.prepare_cached(
            "UPDATE ticks SET inferred_session_id = NULL
             WHERE uuid = ?1 AND inferred_session_id = ?2",
        )?;
        let mut changed = 0;
        for uuid in uuids {
            changed += stmt.execute(params![uuid.as_str(), session_id.as_str()])?;
        }
        Ok(changed)
    }

    /// Recompute counts and time bounds from the ticks currently pointing at
    /// `session_id`. `None` when no tick points at it.
    pub fn aggregate_session(
        conn: &Connection,
        session_id: &SessionId,
    ) -> Result<Option<SessionAggregate>, StoreError> {
        let (count, sends, flashes, attempts, first, last): (
            i64,
            i64,
            i64,
            i64,
            Option<String>,
            Option<String>,
        ) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status IN ('flash', 'send') THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'flash' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'attempt' THEN 1 ELSE 0 END), 0),
                    MIN(climbed_at),
                    MAX(climbed_at)
             FROM ticks WHERE inferred_session_id = ?1",
            [session_id.as_str()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

        let (Some(first), Some(last)) = (first, last) else {
            return Ok(None);
        };
        if count == 0 {
            return Ok(None);
        }

        Ok(Some(SessionAggregate {
            counts: SessionCounts {
                tick_count: count as u32,
                total_sends: sends as u32,
                total_flashes: flashes as u32,
                total_attempts: attempts as u32,
            },
            first_tick_at: row_helpers::parse_timestamp(&first, "ticks", "climbed_at")?,
            last_tick_at: row_helpers::parse_timestamp(&last, "ticks", "climbed_at")?,
        }))
    }

    /// Users owning at least one tick with no session of either kind.
    pub fn users_with_unassigned(conn: &Connection) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM ticks
             WHERE explicit_session_id IS NULL AND inferred_session_id IS NULL
             ORDER BY user_id",
        )?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users.into_iter().map(UserId::from_raw).collect())
    }
}

pub(crate) fn row_to_tick(row: &rusqlite::Row<'_>) -> Result<TickRow, StoreError> {
    let status: String = row_helpers::get(row, 6, "ticks", "status")?;
    Ok(TickRow {
        id: row_helpers::get(row, 0, "ticks", "id")?,
        uuid: TickUuid::from_raw(row_helpers::get::<String>(row, 1, "ticks", "uuid")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "ticks", "user_id")?),
        climb_uuid: row_helpers::get(row, 3, "ticks", "climb_uuid")?,
        board_type: row_helpers::get(row, 4, "ticks", "board_type")?,
        difficulty: row_helpers::get_opt(row, 5, "ticks", "difficulty")?,
        status: row_helpers::parse_enum(&status, "ticks", "status")?,
        climbed_at: row_helpers::get_timestamp(row, 7, "ticks", "climbed_at")?,
        explicit_session_id: row_helpers::get_opt::<String>(row, 8, "ticks", "explicit_session_id")?
            .map(SessionId::from_raw),
        inferred_session_id: row_helpers::get_opt::<String>(row, 9, "ticks", "inferred_session_id")?
            .map(SessionId::from_raw),
        previous_inferred_session_id: row_helpers::get_opt::<String>(
            row,
            10,
            "ticks",
            "previous_inferred_session_id",
        )?
        .map(SessionId::from_raw),
        created_at: row_helpers::get_timestamp(row, 11, "ticks", "created_at")?,
    })
}
