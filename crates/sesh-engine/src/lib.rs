//! Session inference engine: incremental assignment, batch backfill,
//! aggregate recalculation, membership edits and the read-side feeds, all on
//! top of `sesh-store`.

pub mod assignment;
pub mod backfill;
pub mod config;
pub mod detail;
pub mod error;
pub mod feed;
pub mod membership;
pub mod recalc;
pub mod service;

pub use assignment::Assignment;
pub use backfill::{BackfillReport, BackfillScope};
pub use config::EngineConfig;
pub use detail::SessionDetail;
pub use error::SessionError;
pub use feed::{FeedSort, SessionFeedQuery, SessionPage, TickPage, TimePeriod};
pub use service::SessionService;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};
    use sesh_core::{TickStatus, TickUuid, UserId};
    use sesh_store::ticks::{NewTick, TickRepo};
    use sesh_store::users::UserRepo;
    use sesh_store::Database;
    use tokio_util::sync::CancellationToken;

    use crate::backfill::{run_backfill, BackfillScope};
    use crate::config::EngineConfig;

    pub fn ts(raw: &str) -> DateTime<Utc> {
        sesh_core::parse_timestamp(raw).unwrap()
    }

    pub fn new_tick(uuid: &str, user: &str, at: &str, status: TickStatus) -> NewTick {
        NewTick {
            uuid: TickUuid::from_raw(uuid),
            user_id: UserId::from_raw(user),
            climb_uuid: format!("climb-{uuid}"),
            board_type: "kilter".into(),
            difficulty: None,
            status,
            climbed_at: ts(at),
            explicit_session_id: None,
        }
    }

    /// Insert an ungrouped tick, registering its user.
    pub fn insert_tick(db: &Database, uuid: &str, user: &str, at: &str, status: TickStatus) {
        insert_graded(db, uuid, user, at, status, None);
    }

    pub fn insert_graded(
        db: &Database,
        uuid: &str,
        user: &str,
        at: &str,
        status: TickStatus,
        difficulty: Option<i64>,
    ) {
        let mut tick = new_tick(uuid, user, at, status);
        tick.difficulty = difficulty;
        db.with_conn(|conn| {
            UserRepo::ensure(conn, &tick.user_id, None)?;
            TickRepo::insert(conn, &tick)
        })
        .unwrap();
    }

    pub fn backfill_all(db: &Database) {
        run_backfill(
            db,
            &BackfillScope::AllUsers,
            &EngineConfig::default(),
            &CancellationToken::new(),
            None,
        )
        .unwrap();
    }
}
