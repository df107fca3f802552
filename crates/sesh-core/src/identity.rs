//! Deterministic inferred-session identity.
//!
//! An inferred session id is a UUID v5 over `"{user_id}:{first_tick_at}"`,
//! where the timestamp is in canonical form (see [`format_timestamp`]). Two
//! processes that cluster the same ticks therefore agree on the id without
//! coordinating, and a repeated insert of the same boundary is a no-op.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ids::{SessionId, UserId};
use crate::ticks::format_timestamp;

/// Namespace for inferred session ids (the RFC 4122 X.500 namespace).
pub const INFERRED_SESSION_NAMESPACE: Uuid = Uuid::NAMESPACE_X500;

pub fn inferred_session_id(user_id: &UserId, first_tick_at: &DateTime<Utc>) -> SessionId {
    let name = format!("{}:{}", user_id, format_timestamp(first_tick_at));
    SessionId::from_raw(Uuid::new_v5(&INFERRED_SESSION_NAMESPACE, name.as_bytes()).to_string())
}
