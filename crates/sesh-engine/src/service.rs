use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use sesh_core::{SessionCounts, SessionId, TickUuid, UserId};
use sesh_store::feed::FeedRepo;
use sesh_store::sessions::SessionRepo;
use sesh_store::ticks::{NewTick, TickRepo, TickRow};
use sesh_store::users::UserRepo;
use sesh_store::votes::{VoteRepo, VoteTotals};
use sesh_store::Database;

use crate::assignment::{assign_tick, Assignment};
use crate::backfill::{run_backfill, BackfillReport, BackfillScope};
use crate::config::EngineConfig;
use crate::detail::{load_detail, SessionDetail};
use crate::error::{require_actor, require_id, SessionError};
use crate::feed::{session_feed, user_ticks, SessionFeedQuery, SessionPage, TickPage};
use crate::membership;
use crate::recalc::recalculate;

/// Entry point for every session operation. Each mutation runs in its own
/// IMMEDIATE transaction.
#[derive(Clone)]
pub struct SessionService {
    db: Database,
    config: EngineConfig,
}

impl SessionService {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persist a tick, then group it. A grouping failure is logged and the
    /// tick is returned ungrouped for the next backfill to pick up.
    #[instrument(skip(self, tick), fields(tick_uuid = %tick.uuid, user_id = %tick.user_id))]
    pub fn record_tick(&self, tick: NewTick) -> Result<TickRow, SessionError> {
        require_id(&tick.uuid, "uuid")?;
        require_id(&tick.user_id, "userId")?;

        let row = self.db.transaction(|conn| -> Result<TickRow, SessionError> {
            UserRepo::ensure(conn, &tick.user_id, None)?;
            Ok(TickRepo::insert(conn, &tick)?)
        })?;

        match self.assign(&row.uuid) {
            Ok(_) => Ok(self
                .db
                .with_conn(|conn| TickRepo::get_by_uuid(conn, &row.uuid))?
                .unwrap_or(row)),
            Err(error) => {
                warn!(
                    error = %error,
                    kind = error.error_kind(),
                    "session assignment failed, tick left ungrouped"
                );
                Ok(row)
            }
        }
    }

    /// Run incremental assignment for a stored tick.
    pub fn assign(&self, uuid: &TickUuid) -> Result<Assignment, SessionError> {
        self.db.transaction(|conn| {
            let tick = TickRepo::get_by_uuid(conn, uuid)?
                .ok_or_else(|| SessionError::TickNotFound(uuid.clone()))?;
            assign_tick(conn, &tick, self.config.gap)
        })
    }

    pub fn backfill(
        &self,
        scope: &BackfillScope,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<BackfillReport, SessionError> {
        run_backfill(&self.db, scope, &self.config, cancel, deadline)
    }

    pub fn add_member(
        &self,
        actor: Option<&UserId>,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<SessionDetail, SessionError> {
        let actor = require_actor(actor)?;
        require_id(session_id, "sessionId")?;
        require_id(user_id, "userId")?;
        self.db.transaction(|conn| {
            membership::add_member(conn, actor, session_id, user_id, &self.config)?;
            existing_detail(conn, session_id)
        })
    }

    pub fn remove_member(
        &self,
        actor: Option<&UserId>,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<SessionDetail, SessionError> {
        let actor = require_actor(actor)?;
        require_id(session_id, "sessionId")?;
        require_id(user_id, "userId")?;
        self.db.transaction(|conn| {
            membership::remove_member(conn, actor, session_id, user_id, &self.config)?;
            existing_detail(conn, session_id)
        })
    }

    pub fn update_session(
        &self,
        actor: Option<&UserId>,
        session_id: &SessionId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<SessionDetail, SessionError> {
        let actor = require_actor(actor)?;
        require_id(session_id, "sessionId")?;
        self.db.transaction(|conn| {
            membership::update_session(conn, actor, session_id, name, description)?;
            existing_detail(conn, session_id)
        })
    }

    /// Recompute one inferred session's aggregate from its ticks.
    pub fn recalculate(&self, session_id: &SessionId) -> Result<SessionCounts, SessionError> {
        self.db.transaction(|conn| {
            if SessionRepo::get(conn, session_id)?.is_none() {
                return Err(SessionError::SessionNotFound(session_id.clone()));
            }
            Ok(recalculate(conn, session_id)?)
        })
    }

    pub fn session_detail(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SessionDetail>, SessionError> {
        Ok(self.db.with_conn(|conn| load_detail(conn, session_id))?)
    }

    pub fn session_feed(&self, query: &SessionFeedQuery) -> Result<SessionPage, SessionError> {
        Ok(self.db.with_conn(|conn| session_feed(conn, query, &self.config))?)
    }

    pub fn user_ticks(
        &self,
        user_id: &UserId,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<TickPage, SessionError> {
        Ok(self
            .db
            .with_conn(|conn| user_ticks(conn, user_id, cursor, limit, &self.config))?)
    }

    /// Vote `1` or `-1` on a session; `0` withdraws the actor's vote.
    pub fn cast_vote(
        &self,
        actor: Option<&UserId>,
        session_id: &SessionId,
        value: i8,
    ) -> Result<VoteTotals, SessionError> {
        let actor = require_actor(actor)?;
        require_id(session_id, "sessionId")?;
        if !matches!(value, -1..=1) {
            return Err(SessionError::InvalidInput(format!("vote must be -1, 0 or 1, got {value}")));
        }
        self.db.transaction(|conn| {
            if FeedRepo::get(conn, session_id)?.is_none() {
                return Err(SessionError::SessionNotFound(session_id.clone()));
            }
            if value == 0 {
                VoteRepo::remove(conn, session_id, actor)?;
            } else {
                VoteRepo::cast(conn, session_id, actor, value)?;
            }
            Ok(VoteRepo::totals(conn, session_id)?)
        })
    }
}

fn existing_detail(
    conn: &rusqlite::Connection,
    session_id: &SessionId,
) -> Result<SessionDetail, SessionError> {
    load_detail(conn, session_id)?.ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))
}
