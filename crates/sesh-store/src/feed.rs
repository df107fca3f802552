//! Read-side queries backing the session feed, session detail and the user
//! tick feed.
//!
//! Feed rows unify two kinds of session: inferred sessions that still have at
//! least one tick, and party sessions from the `party_sessions` rollup. Each
//! kind is filtered and limited in its own branch before the branches are
//! merged, and vote totals are only counted for the merged candidates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use sesh_core::{format_timestamp, SessionCounts, SessionId, UserId};

use crate::error::StoreError;
use crate::row_helpers;
use crate::ticks::{row_to_tick, TickRow};
use crate::votes::VoteTotals;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Inferred,
    Party,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inferred => write!(f, "inferred"),
            Self::Party => write!(f, "party"),
        }
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inferred" => Ok(Self::Inferred),
            "party" => Ok(Self::Party),
            other => Err(format!("unknown session kind: {other}")),
        }
    }
}

/// One listable session, inferred or party.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSessionRow {
    pub session_id: SessionId,
    pub kind: SessionKind,
    /// Inferred: the owning user. Party: the user of the earliest tick.
    pub owner_id: UserId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub first_tick_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub counts: SessionCounts,
}

/// Per-user breakdown inside one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRow {
    pub user_id: UserId,
    pub counts: SessionCounts,
    pub first_tick_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct FeedFilter {
    /// Only sessions this user has ticks in.
    pub participant: Option<UserId>,
    /// Only sessions whose last tick is at or after this instant.
    pub active_since: Option<DateTime<Utc>>,
}

/// Keyset position in a `(timestamp, id)` descending listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeysetAfter<I> {
    pub timestamp: DateTime<Utc>,
    pub id: I,
}

const INFERRED_BRANCH: &str = "SELECT s.id AS session_id, 'inferred' AS kind,
           s.user_id AS owner_id, s.name AS name, s.description AS description,
           s.first_tick_at AS first_tick_at, s.last_tick_at AS last_tick_at,
           s.ended_at AS ended_at, s.tick_count AS tick_count, s.total_sends AS total_sends,
           s.total_flashes AS total_flashes, s.total_attempts AS total_attempts
    FROM inferred_sessions s
    WHERE s.tick_count > 0";

const PARTY_BRANCH: &str = "SELECT s.id, 'party', s.owner_id, NULL, NULL,
           s.first_tick_at, s.last_tick_at, NULL,
           s.tick_count, s.total_sends, s.total_flashes, s.total_attempts
    FROM party_sessions s
    WHERE 1=1";

const FEED_COLUMNS: &str = "f.session_id, f.kind, f.owner_id, f.name, f.description,
       f.first_tick_at, f.last_tick_at, f.ended_at,
       f.tick_count, f.total_sends, f.total_flashes, f.total_attempts";

const VOTE_COLUMNS: &str = "(SELECT COUNT(*) FROM session_votes v
        WHERE v.session_id = f.session_id AND v.value = 1) AS upvotes,
       (SELECT COUNT(*) FROM session_votes v
        WHERE v.session_id = f.session_id AND v.value = -1) AS downvotes";

const RECENCY_ORDER: &str = "ORDER BY s.last_tick_at DESC, s.id DESC";

/// Vote-based orderings for [`FeedRepo::page_by_score`]. Ties fall back to
/// recency, then session id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreRank {
    /// Net votes.
    Top,
    /// Net votes decayed by age, see [`sesh_core::hot_score`].
    Hot,
    /// Balanced, heavily voted first, see [`sesh_core::controversial_score`].
    Controversial,
}

impl ScoreRank {
    fn order_expr(self) -> &'static str {
        match self {
            Self::Top => "(r.upvotes - r.downvotes)",
            Self::Hot => "sesh_hot_score(r.upvotes - r.downvotes, r.last_tick_at)",
            Self::Controversial => "sesh_controversial_score(r.upvotes, r.downvotes)",
        }
    }
}

/// A feed row with its vote totals.
pub type FeedEntry = (FeedSessionRow, VoteTotals);

type SqlValues = Vec<Box<dyn rusqlite::types::ToSql>>;

/// Bound parameters shared by both branches, with their placeholder indexes.
#[derive(Default)]
struct BranchConditions {
    values: SqlValues,
    participant: Option<usize>,
    active_since: Option<usize>,
    after: Option<(usize, usize)>,
}

impl BranchConditions {
    fn new(filter: &FeedFilter, after: Option<&KeysetAfter<SessionId>>) -> Self {
        let mut conds = Self::default();
        if let Some(user_id) = &filter.participant {
            conds.participant = Some(conds.bind(user_id.as_str().to_string()));
        }
        if let Some(since) = &filter.active_since {
            conds.active_since = Some(conds.bind(format_timestamp(since)));
        }
        if let Some(after) = after {
            let ts = conds.bind(format_timestamp(&after.timestamp));
            let id = conds.bind(after.id.as_str().to_string());
            conds.after = Some((ts, id));
        }
        conds
    }

    fn bind<T: rusqlite::types::ToSql + 'static>(&mut self, value: T) -> usize {
        self.values.push(Box::new(value));
        self.values.len()
    }

    /// One kind's SELECT with every condition applied to its own table.
    fn branch(&self, kind: SessionKind) -> String {
        let (base, tick_column) = match kind {
            SessionKind::Inferred => (INFERRED_BRANCH, "inferred_session_id"),
            SessionKind::Party => (PARTY_BRANCH, "explicit_session_id"),
        };
        let mut sql = base.to_string();
        if let Some(idx) = self.participant {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM ticks p \
                  WHERE p.{tick_column} = s.id AND p.user_id = ?{idx})"
            ));
        }
        if let Some(idx) = self.active_since {
            sql.push_str(&format!(" AND s.last_tick_at >= ?{idx}"));
        }
        if let Some((ts, id)) = self.after {
            sql.push_str(&format!(
                " AND (s.last_tick_at < ?{ts} OR (s.last_tick_at = ?{ts} AND s.id < ?{id}))"
            ));
        }
        sql
    }
}

pub struct FeedRepo;

impl FeedRepo {
    /// Newest-first page on `(last_tick_at, session_id)`. Returns at most
    /// `limit` rows; callers ask for one extra row to detect more pages.
    pub fn page_by_recency(
        conn: &Connection,
        filter: &FeedFilter,
        after: Option<&KeysetAfter<SessionId>>,
        limit: u32,
    ) -> Result<Vec<FeedEntry>, StoreError> {
        let conds = BranchConditions::new(filter, after);
        let sql = format!(
            "SELECT {FEED_COLUMNS}, {VOTE_COLUMNS} FROM (
                 SELECT * FROM ({inferred} {RECENCY_ORDER} LIMIT {limit})
                 UNION ALL
                 SELECT * FROM ({party} {RECENCY_ORDER} LIMIT {limit})
             ) f
             ORDER BY f.last_tick_at DESC, f.session_id DESC
             LIMIT {limit}",
            inferred = conds.branch(SessionKind::Inferred),
            party = conds.branch(SessionKind::Party),
        );
        query_entries(conn, &sql, &conds.values)
    }

    /// Page of the filtered feed ordered by a vote score, skipping `offset`
    /// rows. Returns at most `limit` rows.
    pub fn page_by_score(
        conn: &Connection,
        filter: &FeedFilter,
        rank: ScoreRank,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<FeedEntry>, StoreError> {
        let mut conds = BranchConditions::new(filter, None);
        let limit_idx = conds.bind(i64::from(limit));
        let offset_idx = conds.bind(i64::try_from(offset).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT * FROM (
                 SELECT {FEED_COLUMNS}, {VOTE_COLUMNS} FROM (
                     {inferred}
                     UNION ALL
                     {party}
                 ) f
             ) r
             ORDER BY {score} DESC, r.last_tick_at DESC, r.session_id DESC
             LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            inferred = conds.branch(SessionKind::Inferred),
            party = conds.branch(SessionKind::Party),
            score = rank.order_expr(),
        );
        query_entries(conn, &sql, &conds.values)
    }

    /// Resolve a session id of either kind. Inferred sessions are returned
    /// even when they no longer hold any tick.
    pub fn get(
        conn: &Connection,
        session_id: &SessionId,
    ) -> Result<Option<FeedSessionRow>, StoreError> {
        if let Some(s) = crate::sessions::SessionRepo::get(conn, session_id)? {
            return Ok(Some(FeedSessionRow {
                session_id: s.id,
                kind: SessionKind::Inferred,
                owner_id: s.user_id,
                name: s.name,
                description: s.description,
                first_tick_at: s.first_tick_at,
                last_tick_at: s.last_tick_at,
                ended_at: s.ended_at,
                counts: s.counts,
            }));
        }

        let sql = format!("SELECT {FEED_COLUMNS} FROM ({PARTY_BRANCH} AND s.id = ?1) f");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([session_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_feed(row)?)),
            None => Ok(None),
        }
    }

    /// Users with ticks in the session, in order of their first tick.
    pub fn participants(
        conn: &Connection,
        session_id: &SessionId,
        kind: SessionKind,
    ) -> Result<Vec<ParticipantRow>, StoreError> {
        let column = match kind {
            SessionKind::Inferred => "inferred_session_id",
            SessionKind::Party => "explicit_session_id",
        };
        let sql = format!(
            "SELECT user_id, COUNT(*),
                    SUM(CASE WHEN status IN ('flash', 'send') THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'flash' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'attempt' THEN 1 ELSE 0 END),
                    MIN(climbed_at)
             FROM ticks WHERE {column} = ?1
             GROUP BY user_id
             ORDER BY MIN(climbed_at) ASC, user_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([session_id.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(ParticipantRow {
                user_id: UserId::from_raw(row_helpers::get::<String>(row, 0, "ticks", "user_id")?),
                counts: SessionCounts {
                    tick_count: row_helpers::get(row, 1, "ticks", "status")?,
                    total_sends: row_helpers::get(row, 2, "ticks", "status")?,
                    total_flashes: row_helpers::get(row, 3, "ticks", "status")?,
                    total_attempts: row_helpers::get(row, 4, "ticks", "status")?,
                },
                first_tick_at: row_helpers::get_timestamp(row, 5, "ticks", "climbed_at")?,
            });
        }
        Ok(out)
    }

    /// Ticks of one session of either kind, newest first.
    pub fn session_ticks(
        conn: &Connection,
        session_id: &SessionId,
        kind: SessionKind,
    ) -> Result<Vec<TickRow>, StoreError> {
        let filter = match kind {
            SessionKind::Inferred => crate::ticks::TickFilter {
                inferred_session_id: Some(session_id.clone()),
                ..Default::default()
            },
            SessionKind::Party => crate::ticks::TickFilter {
                explicit_session_id: Some(session_id.clone()),
                ..Default::default()
            },
        };
        crate::ticks::TickRepo::query(conn, &filter, crate::ticks::TickOrder::ClimbedAtDesc, None)
    }

    /// Newest-first page of a user's ticks on `(climbed_at, id)`.
    pub fn user_ticks_page(
        conn: &Connection,
        user_id: &UserId,
        after: Option<&KeysetAfter<i64>>,
        limit: u32,
    ) -> Result<Vec<TickRow>, StoreError> {
        let mut sql = String::from(
            "SELECT id, uuid, user_id, climb_uuid, board_type, difficulty, status, climbed_at,
                    explicit_session_id, inferred_session_id, previous_inferred_session_id,
                    created_at
             FROM ticks WHERE user_id = ?1",
        );
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(user_id.as_str().to_string())];
        if let Some(after) = after {
            values.push(Box::new(format_timestamp(&after.timestamp)));
            values.push(Box::new(after.id));
            sql.push_str(" AND (climbed_at < ?2 OR (climbed_at = ?2 AND id < ?3))");
        }
        sql.push_str(&format!(" ORDER BY climbed_at DESC, id DESC LIMIT {limit}"));

        let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(refs.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_tick(row)?);
        }
        Ok(out)
    }
}

fn row_to_feed(row: &rusqlite::Row<'_>) -> Result<FeedSessionRow, StoreError> {
    let kind: String = row_helpers::get(row, 1, "feed", "kind")?;
    Ok(FeedSessionRow {
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "feed", "session_id")?),
        kind: row_helpers::parse_enum(&kind, "feed", "kind")?,
        owner_id: UserId::from_raw(row_helpers::get::<String>(row, 2, "feed", "owner_id")?),
        name: row_helpers::get_opt(row, 3, "feed", "name")?,
        description: row_helpers::get_opt(row, 4, "feed", "description")?,
        first_tick_at: row_helpers::get_timestamp(row, 5, "feed", "first_tick_at")?,
        last_tick_at: row_helpers::get_timestamp(row, 6, "feed", "last_tick_at")?,
        ended_at: row_helpers::get_timestamp_opt(row, 7, "feed", "ended_at")?,
        counts: SessionCounts {
            tick_count: row_helpers::get(row, 8, "feed", "tick_count")?,
            total_sends: row_helpers::get(row, 9, "feed", "total_sends")?,
            total_flashes: row_helpers::get(row, 10, "feed", "total_flashes")?,
            total_attempts: row_helpers::get(row, 11, "feed", "total_attempts")?,
        },
    })
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    values: &[Box<dyn rusqlite::types::ToSql>],
) -> Result<Vec<FeedEntry>, StoreError> {
    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(refs.as_slice())?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let votes = VoteTotals {
            upvotes: row_helpers::get(row, 12, "session_votes", "value")?,
            downvotes: row_helpers::get(row, 13, "session_votes", "value")?,
        };
        out.push((row_to_feed(row)?, votes));
    }
    Ok(out)
}
