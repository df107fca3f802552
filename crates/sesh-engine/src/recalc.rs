//! Aggregate recalculation.
//!
//! Session counts are never maintained incrementally: every writer calls
//! [`recalculate`] after moving ticks, which replays the ticks currently
//! pointing at the session and overwrites the stored aggregate.

use rusqlite::Connection;
use tracing::{debug, instrument};

use sesh_core::{SessionCounts, SessionId};
use sesh_store::sessions::SessionRepo;
use sesh_store::ticks::TickRepo;
use sesh_store::StoreError;

/// Recompute and store the aggregate of one session. Returns the new counts;
/// a session nobody points at keeps its row with zeroed counts.
#[instrument(skip(conn), fields(session_id = %session_id))]
pub fn recalculate(conn: &Connection, session_id: &SessionId) -> Result<SessionCounts, StoreError> {
    let aggregate = TickRepo::aggregate_session(conn, session_id)?;
    SessionRepo::store_aggregate(conn, session_id, aggregate.as_ref())?;
    let counts = aggregate.map(|a| a.counts).unwrap_or_default();
    debug!(tick_count = counts.tick_count, "session recalculated");
    Ok(counts)
}

/// Recalculate several sessions, each once, in the order given.
pub fn recalculate_all<'a>(
    conn: &Connection,
    session_ids: impl IntoIterator<Item = &'a SessionId>,
) -> Result<(), StoreError> {
    let mut seen = std::collections::BTreeSet::new();
    for id in session_ids {
        if seen.insert(id) {
            recalculate(conn, id)?;
        }
    }
    Ok(())
}
