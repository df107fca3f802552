//! Incremental assignment: place one freshly recorded tick into a session.
//!
//! Runs inside the caller's transaction. The new session id is derived from
//! the tick itself, so two racing assignments of the same boundary tick mint
//! the same id and the idempotent insert lets them converge on one row.

use chrono::Duration;
use rusqlite::Connection;
use tracing::{debug, instrument};

use sesh_core::{inferred_session_id, SessionId};
use sesh_store::sessions::SessionRepo;
use sesh_store::ticks::{TickFilter, TickOrder, TickRepo, TickRow};

use crate::error::SessionError;
use crate::recalc::recalculate;

/// How a tick ended up grouped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// Joined the session of the user's most recent tick.
    Joined(SessionId),
    /// Started a new session.
    Started {
        session_id: SessionId,
        closed: Option<SessionId>,
    },
    /// Already grouped (explicit or inferred); nothing changed.
    Unchanged(Option<SessionId>),
}

impl Assignment {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Joined(id) => Some(id),
            Self::Started { session_id, .. } => Some(session_id),
            Self::Unchanged(id) => id.as_ref(),
        }
    }
}

/// Assign `tick` to an inferred session.
#[instrument(skip(conn, tick), fields(tick_uuid = %tick.uuid, user_id = %tick.user_id))]
pub fn assign_tick(
    conn: &Connection,
    tick: &TickRow,
    gap: Duration,
) -> Result<Assignment, SessionError> {
    if tick.explicit_session_id.is_some() {
        return Ok(Assignment::Unchanged(None));
    }
    if let Some(existing) = &tick.inferred_session_id {
        return Ok(Assignment::Unchanged(Some(existing.clone())));
    }

    let previous = TickRepo::query(
        conn,
        &TickFilter {
            user_id: Some(tick.user_id.clone()),
            exclude_uuid: Some(tick.uuid.clone()),
            exclude_explicit: true,
            ..Default::default()
        },
        TickOrder::ClimbedAtDesc,
        Some(1),
    )?
    .into_iter()
    .next();

    if let Some(prev) = &previous {
        let within_gap = (tick.climbed_at - prev.climbed_at).abs() <= gap;
        if let (true, Some(session_id)) = (within_gap, &prev.inferred_session_id) {
            let uuids = std::slice::from_ref(&tick.uuid);
            TickRepo::set_inferred_session(conn, uuids, Some(session_id))?;
            recalculate(conn, session_id)?;
            debug!(session_id = %session_id, "tick joined session");
            return Ok(Assignment::Joined(session_id.clone()));
        }
    }

    let session_id = inferred_session_id(&tick.user_id, &tick.climbed_at);
    let created =
        SessionRepo::insert_if_absent(conn, &session_id, &tick.user_id, &tick.climbed_at)?;
    TickRepo::set_inferred_session(conn, std::slice::from_ref(&tick.uuid), Some(&session_id))?;
    recalculate(conn, &session_id)?;

    let mut closed = None;
    if let Some(prev) = &previous {
        let prev_session = prev.inferred_session_id.as_ref().filter(|id| **id != session_id);
        if let Some(prev_session) = prev_session {
            if SessionRepo::close(conn, prev_session, &prev.climbed_at)? {
                closed = Some(prev_session.clone());
            }
        }
    }
    let superseded = SessionRepo::close_superseded(conn, &tick.user_id)?;

    debug!(
        session_id = %session_id,
        created,
        closed = ?closed,
        superseded,
        "tick started session"
    );
    Ok(Assignment::Started { session_id, closed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_tick, ts};
    use sesh_core::{TickStatus, TickUuid, UserId};
    use sesh_store::Database;

    fn assign(db: &Database, uuid: &str) -> Assignment {
        db.transaction(|conn| -> Result<Assignment, SessionError> {
            let tick = TickRepo::get_by_uuid(conn, &TickUuid::from_raw(uuid))?.unwrap();
            assign_tick(conn, &tick, sesh_core::default_gap())
        })
        .unwrap()
    }

    #[test]
    fn first_tick_starts_session_with_derived_id() {
        let db = Database::in_memory().unwrap();
        insert_tick(&db, "t1", "u1", "2024-01-15T10:00:00Z", TickStatus::Flash);

        let result = assign(&db, "t1");
        let expected = inferred_session_id(&UserId::from_raw("u1"), &ts("2024-01-15T10:00:00Z"));
        assert_eq!(result, Assignment::Started { session_id: expected.clone(), closed: None });

        db.with_conn(|conn| {
            let session = SessionRepo::get(conn, &expected)?.unwrap();
            assert_eq!(session.counts.tick_count, 1);
            assert_eq!(session.counts.total_flashes, 1);
            assert!(session.is_open());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn tick_within_gap_joins_previous_session() {
        let db = Database::in_memory().unwrap();
        insert_tick(&db, "t1", "u1", "2024-01-15T10:00:00Z", TickStatus::Send);
        let first = assign(&db, "t1");
        insert_tick(&db, "t2", "u1", "2024-01-15T14:00:00Z", TickStatus::Attempt);

        let second = assign(&db, "t2");
        assert_eq!(second, Assignment::Joined(first.session_id().unwrap().clone()));

        db.with_conn(|conn| {
            let session = SessionRepo::get(conn, first.session_id().unwrap())?.unwrap();
            assert_eq!(session.counts.tick_count, 2);
            assert_eq!(session.last_tick_at, ts("2024-01-15T14:00:00Z"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn tick_past_gap_starts_new_session_and_closes_previous() {
        let db = Database::in_memory().unwrap();
        insert_tick(&db, "t1", "u1", "2024-01-15T10:00:00Z", TickStatus::Send);
        let first = assign(&db, "t1");
        insert_tick(&db, "t2", "u1", "2024-01-15T14:00:00.001Z", TickStatus::Send);

        let second = assign(&db, "t2");
        let first_id = first.session_id().unwrap().clone();
        match &second {
            Assignment::Started { session_id, closed } => {
                assert_ne!(session_id, &first_id);
                assert_eq!(closed.as_ref(), Some(&first_id));
            }
            other => panic!("expected a new session, got {other:?}"),
        }

        db.with_conn(|conn| {
            let old = SessionRepo::get(conn, &first_id)?.unwrap();
            assert_eq!(old.ended_at, Some(ts("2024-01-15T10:00:00Z")));
            assert_eq!(SessionRepo::count_open(conn, &UserId::from_raw("u1"))?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn explicit_ticks_are_left_alone() {
        let db = Database::in_memory().unwrap();
        let mut tick =
            crate::test_support::new_tick("p1", "u1", "2024-01-15T10:00:00Z", TickStatus::Send);
        tick.explicit_session_id = Some(SessionId::from_raw("party"));
        db.with_conn(|conn| TickRepo::insert(conn, &tick)).unwrap();

        assert_eq!(assign(&db, "p1"), Assignment::Unchanged(None));
        db.with_conn(|conn| {
            assert!(SessionRepo::latest_open(conn, &UserId::from_raw("u1"))?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn explicit_neighbours_are_not_joined() {
        let db = Database::in_memory().unwrap();
        let mut party =
            crate::test_support::new_tick("p1", "u1", "2024-01-15T10:00:00Z", TickStatus::Send);
        party.explicit_session_id = Some(SessionId::from_raw("party"));
        db.with_conn(|conn| TickRepo::insert(conn, &party)).unwrap();
        insert_tick(&db, "t1", "u1", "2024-01-15T10:10:00Z", TickStatus::Send);

        let result = assign(&db, "t1");
        assert!(matches!(result, Assignment::Started { closed: None, .. }));
    }

    #[test]
    fn reassigning_is_a_no_op() {
        let db = Database::in_memory().unwrap();
        insert_tick(&db, "t1", "u1", "2024-01-15T10:00:00Z", TickStatus::Send);
        let first = assign(&db, "t1");
        let again = assign(&db, "t1");
        assert_eq!(again, Assignment::Unchanged(first.session_id().cloned()));
    }

    #[test]
    fn users_never_share_sessions() {
        let db = Database::in_memory().unwrap();
        insert_tick(&db, "a1", "alice", "2024-01-15T10:00:00Z", TickStatus::Send);
        insert_tick(&db, "b1", "bob", "2024-01-15T10:05:00Z", TickStatus::Send);
        let a = assign(&db, "a1");
        let b = assign(&db, "b1");
        assert_ne!(a.session_id(), b.session_id());
        assert!(matches!(b, Assignment::Started { closed: None, .. }));
    }
}
