//! Pure domain logic for session inference: ids, ticks, gap clustering,
//! feed ranking and the cursor codec. Nothing in this crate touches storage.

pub mod clustering;
pub mod cursor;
pub mod identity;
pub mod ids;
pub mod ranking;
pub mod ticks;

pub use clustering::{
    default_gap, group_ticks_into_sessions, group_user_ticks, SessionCounts, SessionGroup,
    SESSION_GAP_MS,
};
pub use cursor::{Cursor, KeysetCursor};
pub use identity::inferred_session_id;
pub use ids::{SessionId, TickUuid, UserId};
pub use ranking::{controversial_score, hot_score};
pub use ticks::{format_timestamp, parse_timestamp, TickForGrouping, TickStatus};
