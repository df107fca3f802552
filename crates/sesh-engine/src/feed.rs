//! Paginated listings: the session feed and a user's tick history.
//!
//! The chronological sort pages with keyset cursors. The vote-based sorts
//! rank in SQL and page with offset cursors, since a vote between two
//! requests can reorder them. A cursor of the wrong shape for the sort is
//! treated like a malformed one and serves the first page.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use sesh_core::{format_timestamp, parse_timestamp, Cursor, KeysetCursor, SessionId, UserId};
use sesh_store::feed::{FeedEntry, FeedFilter, FeedRepo, FeedSessionRow, KeysetAfter, ScoreRank};
use sesh_store::ticks::TickRow;
use sesh_store::votes::VoteTotals;
use sesh_store::StoreError;

use crate::config::EngineConfig;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSort {
    #[default]
    New,
    Top,
    Hot,
    Controversial,
}

impl FeedSort {
    /// SQL ranking behind a vote-based sort. `None` for [`FeedSort::New`].
    fn score_rank(self) -> Option<ScoreRank> {
        match self {
            Self::New => None,
            Self::Top => Some(ScoreRank::Top),
            Self::Hot => Some(ScoreRank::Hot),
            Self::Controversial => Some(ScoreRank::Controversial),
        }
    }
}

impl FromStr for FeedSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "top" => Ok(Self::Top),
            "hot" => Ok(Self::Hot),
            "controversial" => Ok(Self::Controversial),
            other => Err(format!("unknown sort: {other}")),
        }
    }
}

impl fmt::Display for FeedSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Top => "top",
            Self::Hot => "hot",
            Self::Controversial => "controversial",
        };
        f.write_str(s)
    }
}

/// Activity window for the vote-based sorts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    Hour,
    Day,
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl TimePeriod {
    /// Earliest `last_tick_at` still inside the window.
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let span = match self {
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
            Self::Week => Duration::days(7),
            Self::Month => Duration::days(30),
            Self::Year => Duration::days(365),
            Self::All => return None,
        };
        Some(now - span)
    }
}

impl FromStr for TimePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            "all" => Ok(Self::All),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionFeedQuery {
    pub sort: FeedSort,
    /// Ignored by [`FeedSort::New`].
    pub period: TimePeriod,
    pub user_id: Option<UserId>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
    pub now: DateTime<Utc>,
}

impl SessionFeedQuery {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            sort: FeedSort::default(),
            period: TimePeriod::default(),
            user_id: None,
            cursor: None,
            limit: None,
            now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: FeedSessionRow,
    pub votes: VoteTotals,
}

impl From<FeedEntry> for SessionSummary {
    fn from((session, votes): FeedEntry) -> Self {
        Self { session, votes }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPage {
    pub ticks: Vec<TickRow>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Keyset position from a decoded cursor. Offset cursors, unparsable
/// timestamps and ids rejected by `parse_id` yield `None`.
fn keyset_after<I>(
    cursor: Option<Cursor>,
    parse_id: impl FnOnce(String) -> Option<I>,
) -> Option<KeysetAfter<I>> {
    match cursor? {
        Cursor::Keyset(k) => Some(KeysetAfter {
            timestamp: parse_timestamp(&k.timestamp).ok()?,
            id: parse_id(k.id)?,
        }),
        Cursor::Offset(_) => None,
    }
}

fn keyset_token(timestamp: &DateTime<Utc>, id: String) -> String {
    Cursor::Keyset(KeysetCursor {
        timestamp: format_timestamp(timestamp),
        id,
    })
    .encode()
}

/// One page of the session feed.
pub fn session_feed(
    conn: &Connection,
    query: &SessionFeedQuery,
    config: &EngineConfig,
) -> Result<SessionPage, StoreError> {
    let page_size = config.page_size(query.limit);
    let cursor = query.cursor.as_deref().and_then(Cursor::decode);

    let Some(rank) = query.sort.score_rank() else {
        let after = keyset_after(cursor, |id| Some(SessionId::from_raw(id)));
        let filter = FeedFilter {
            participant: query.user_id.clone(),
            active_since: None,
        };
        let mut entries = FeedRepo::page_by_recency(conn, &filter, after.as_ref(), page_size + 1)?;
        let has_more = entries.len() > page_size as usize;
        entries.truncate(page_size as usize);
        let cursor = has_more.then(|| entries.last()).flatten().map(|(last, _)| {
            keyset_token(&last.last_tick_at, last.session_id.as_str().to_string())
        });
        return Ok(SessionPage {
            sessions: entries.into_iter().map(SessionSummary::from).collect(),
            cursor,
            has_more,
        });
    };

    let offset = match cursor {
        Some(Cursor::Offset(offset)) => offset,
        _ => 0,
    };
    let filter = FeedFilter {
        participant: query.user_id.clone(),
        active_since: query.period.since(query.now),
    };
    let mut entries = FeedRepo::page_by_score(conn, &filter, rank, offset, page_size + 1)?;
    let has_more = entries.len() > page_size as usize;
    entries.truncate(page_size as usize);
    Ok(SessionPage {
        sessions: entries.into_iter().map(SessionSummary::from).collect(),
        cursor: has_more.then(|| Cursor::Offset(offset + u64::from(page_size)).encode()),
        has_more,
    })
}

/// One page of a user's ticks, newest first.
pub fn user_ticks(
    conn: &Connection,
    user_id: &UserId,
    cursor: Option<&str>,
    limit: Option<u32>,
    config: &EngineConfig,
) -> Result<TickPage, StoreError> {
    let page_size = config.page_size(limit);
    let after = keyset_after(cursor.and_then(Cursor::decode), |id| id.parse::<i64>().ok());

    let mut ticks = FeedRepo::user_ticks_page(conn, user_id, after.as_ref(), page_size + 1)?;
    let has_more = ticks.len() > page_size as usize;
    ticks.truncate(page_size as usize);
    let cursor = has_more
        .then(|| ticks.last())
        .flatten()
        .map(|last| keyset_token(&last.climbed_at, last.id.to_string()));
    Ok(TickPage { ticks, cursor, has_more })
}
