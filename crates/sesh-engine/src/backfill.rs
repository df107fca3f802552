//! Batch backfill: cluster every ungrouped tick into inferred sessions.
//!
//! Work is split into batches of at most `batch_size` ticks per user, each
//! committed in its own transaction. Assigned ticks drop out of the next
//! fetch, so a run can stop at any batch boundary and resume later.

use std::collections::BTreeSet;
use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use sesh_core::{group_user_ticks, SessionId, UserId};
use sesh_store::sessions::SessionRepo;
use sesh_store::ticks::{TickFilter, TickOrder, TickRepo};
use sesh_store::Database;

use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::recalc::recalculate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackfillScope {
    User(UserId),
    AllUsers,
}

/// Summary of one backfill run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub users: u32,
    pub batches: u32,
    pub ticks_assigned: u64,
    pub sessions_touched: u64,
    /// Stopped early by cancellation or deadline.
    pub cancelled: bool,
}

/// Result of one committed batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub ticks_assigned: usize,
    pub sessions: Vec<SessionId>,
}

/// Cluster one batch of a user's ungrouped ticks. An empty outcome means the
/// user has nothing left to assign.
#[instrument(skip(conn, config), fields(user_id = %user_id))]
pub fn backfill_batch(
    conn: &Connection,
    user_id: &UserId,
    config: &EngineConfig,
) -> Result<BatchOutcome, SessionError> {
    let unassigned = TickRepo::query(
        conn,
        &TickFilter {
            user_id: Some(user_id.clone()),
            unassigned_only: true,
            ..Default::default()
        },
        TickOrder::ClimbedAtAsc,
        Some(config.batch_size),
    )?;
    if unassigned.is_empty() {
        return Ok(BatchOutcome::default());
    }

    let open = SessionRepo::latest_open(conn, user_id)?;
    let grouping: Vec<_> = unassigned.iter().map(|t| t.for_grouping()).collect();
    let mut groups = group_user_ticks(user_id, &grouping, config.gap);

    if let (Some(open), Some(first)) = (&open, groups.first_mut()) {
        let distance = first.first_tick_at - open.last_tick_at;
        if distance >= chrono::Duration::zero() && distance <= config.gap {
            first.session_id = open.id.clone();
        }
    }

    let mut outcome = BatchOutcome::default();
    for group in &groups {
        SessionRepo::upsert_bounds(conn, group)?;
        outcome.ticks_assigned +=
            TickRepo::set_inferred_session(conn, &group.tick_uuids, Some(&group.session_id))?;
        recalculate(conn, &group.session_id)?;
        outcome.sessions.push(group.session_id.clone());
    }
    let superseded = SessionRepo::close_superseded(conn, user_id)?;

    debug!(
        ticks = outcome.ticks_assigned,
        sessions = outcome.sessions.len(),
        superseded,
        "backfill batch committed"
    );
    Ok(outcome)
}

/// Run backfill until every user in scope is drained, the token is
/// cancelled, or the deadline passes. Cancellation is only observed between
/// batches; committed batches stay committed.
#[instrument(skip(db, config, cancel))]
pub fn run_backfill(
    db: &Database,
    scope: &BackfillScope,
    config: &EngineConfig,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<BackfillReport, SessionError> {
    let users = match scope {
        BackfillScope::User(id) => vec![id.clone()],
        BackfillScope::AllUsers => db.with_conn(TickRepo::users_with_unassigned)?,
    };

    let mut report = BackfillReport::default();
    let mut touched = BTreeSet::new();
    let stop = || cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d);

    'users: for user_id in &users {
        let mut user_had_work = false;
        loop {
            if stop() {
                report.cancelled = true;
                break 'users;
            }
            let outcome = db.transaction(|conn| backfill_batch(conn, user_id, config))?;
            if outcome.ticks_assigned == 0 {
                break;
            }
            user_had_work = true;
            report.batches += 1;
            report.ticks_assigned += outcome.ticks_assigned as u64;
            touched.extend(outcome.sessions);
        }
        if user_had_work {
            report.users += 1;
        }
    }

    report.sessions_touched = touched.len() as u64;
    info!(
        users = report.users,
        batches = report.batches,
        ticks = report.ticks_assigned,
        sessions = report.sessions_touched,
        cancelled = report.cancelled,
        "backfill finished"
    );
    Ok(report)
}
