//! Manual membership edits on inferred sessions.
//!
//! Adding a user moves their ticks from around the session's time window into
//! it, remembering each tick's previous session. Removing a user moves those
//! ticks back. Both run inside one transaction supplied by the caller, so a
//! failed edit leaves no partial state behind.

use std::collections::BTreeSet;

use rusqlite::Connection;
use tracing::{info, instrument, warn};

use sesh_core::{SessionId, TickUuid, UserId};
use sesh_store::overrides::MemberOverrideRepo;
use sesh_store::sessions::{InferredSessionRow, SessionRepo};
use sesh_store::ticks::{TickFilter, TickOrder, TickRepo};
use sesh_store::users::UserRepo;

use crate::assignment::assign_tick;
use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::recalc::{recalculate, recalculate_all};

/// Resolve the session and check that `actor` owns it or was added to it.
pub fn require_participant(
    conn: &Connection,
    session_id: &SessionId,
    actor: &UserId,
) -> Result<InferredSessionRow, SessionError> {
    let session = SessionRepo::get(conn, session_id)?
        .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
    if &session.user_id == actor || MemberOverrideRepo::exists(conn, session_id, actor)? {
        return Ok(session);
    }
    Err(SessionError::NotParticipant {
        session_id: session_id.clone(),
        user_id: actor.clone(),
    })
}

/// Pull `user_id`'s non-party ticks inside the session window (padded by
/// the membership buffer) into the session.
#[instrument(
    skip(conn, config),
    fields(session_id = %session_id, actor = %actor, user_id = %user_id)
)]
pub fn add_member(
    conn: &Connection,
    actor: &UserId,
    session_id: &SessionId,
    user_id: &UserId,
    config: &EngineConfig,
) -> Result<usize, SessionError> {
    let session = require_participant(conn, session_id, actor)?;
    if !UserRepo::exists(conn, user_id)? {
        return Err(SessionError::UserNotFound(user_id.clone()));
    }

    let window = TickFilter {
        user_id: Some(user_id.clone()),
        exclude_explicit: true,
        climbed_from: Some(session.first_tick_at - config.membership_buffer),
        climbed_to: Some(session.last_tick_at + config.membership_buffer),
        ..Default::default()
    };
    let candidates = TickRepo::query(conn, &window, TickOrder::ClimbedAtAsc, None)?;
    if candidates.is_empty() {
        return Err(SessionError::NoOverlappingEvents {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
        });
    }

    // Ticks already in the session keep their undo pointer.
    let moving: Vec<_> = candidates
        .iter()
        .filter(|t| t.inferred_session_id.as_ref() != Some(session_id))
        .collect();
    let losers: BTreeSet<SessionId> = moving
        .iter()
        .filter_map(|t| t.inferred_session_id.clone())
        .collect();
    let uuids: Vec<TickUuid> = moving.iter().map(|t| t.uuid.clone()).collect();

    let moved = TickRepo::reassign_to_session(conn, &uuids, session_id)?;
    let newly_added = MemberOverrideRepo::insert_ignore(conn, session_id, user_id, actor)?;

    recalculate(conn, session_id)?;
    recalculate_all(conn, &losers)?;

    info!(moved, emptied_from = losers.len(), newly_added, "member added");
    Ok(moved)
}

/// Undo [`add_member`] for `user_id`: every one of their ticks in the
/// session goes back to where it came from.
#[instrument(
    skip(conn, config),
    fields(session_id = %session_id, actor = %actor, user_id = %user_id)
)]
pub fn remove_member(
    conn: &Connection,
    actor: &UserId,
    session_id: &SessionId,
    user_id: &UserId,
    config: &EngineConfig,
) -> Result<usize, SessionError> {
    let session = require_participant(conn, session_id, actor)?;
    if &session.user_id == user_id {
        return Err(SessionError::CannotRemoveOwner(session_id.clone()));
    }

    let members_ticks = TickRepo::query(
        conn,
        &TickFilter {
            user_id: Some(user_id.clone()),
            inferred_session_id: Some(session_id.clone()),
            ..Default::default()
        },
        TickOrder::ClimbedAtAsc,
        None,
    )?;

    let (restorable, orphans): (Vec<_>, Vec<_>) = members_ticks
        .iter()
        .partition(|t| t.previous_inferred_session_id.is_some());
    let receivers: BTreeSet<SessionId> = restorable
        .iter()
        .filter_map(|t| t.previous_inferred_session_id.clone())
        .collect();

    let restore: Vec<TickUuid> = restorable.iter().map(|t| t.uuid.clone()).collect();
    let mut moved = TickRepo::restore_previous(conn, &restore)?;

    if !orphans.is_empty() {
        // A forward add always leaves a pointer; reaching this means the tick
        // was placed here some other way.
        warn!(count = orphans.len(), "ticks without undo pointer, reassigning from scratch");
        let orphan_uuids: Vec<TickUuid> = orphans.iter().map(|t| t.uuid.clone()).collect();
        TickRepo::clear_inferred_session(conn, &orphan_uuids, session_id)?;
        for uuid in &orphan_uuids {
            let tick = TickRepo::get_by_uuid(conn, uuid)?
                .ok_or_else(|| SessionError::TickNotFound(uuid.clone()))?;
            assign_tick(conn, &tick, config.gap)?;
            moved += 1;
        }
    }

    let had_override = MemberOverrideRepo::delete(conn, session_id, user_id)?;

    recalculate(conn, session_id)?;
    recalculate_all(conn, &receivers)?;

    info!(moved, restored_to = receivers.len(), had_override, "member removed");
    Ok(moved)
}

/// Rename or describe a session. `None` leaves a field unchanged and an
/// empty string clears it.
#[instrument(skip(conn, name, description), fields(session_id = %session_id, actor = %actor))]
pub fn update_session(
    conn: &Connection,
    actor: &UserId,
    session_id: &SessionId,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<(), SessionError> {
    require_participant(conn, session_id, actor)?;
    let name = name.map(str::trim);
    let description = description.map(str::trim);
    SessionRepo::update_details(conn, session_id, name, description)?;
    Ok(())
}
