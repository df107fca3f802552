use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use sesh_core::{SessionCounts, SessionId, TickStatus, UserId};
use sesh_store::feed::{FeedRepo, SessionKind};
use sesh_store::ticks::TickRow;
use sesh_store::users::UserRepo;
use sesh_store::votes::{VoteRepo, VoteTotals};
use sesh_store::StoreError;

/// Full view of one session, inferred or party.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub owner_id: UserId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub first_tick_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    #[serde(flatten)]
    pub counts: SessionCounts,
    pub board_types: Vec<String>,
    pub participants: Vec<Participant>,
    pub grade_distribution: Vec<GradeBucket>,
    pub hardest_send: Option<i64>,
    pub votes: VoteTotals,
    /// Newest first.
    pub ticks: Vec<TickRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub is_owner: bool,
    #[serde(flatten)]
    pub counts: SessionCounts,
}

/// Outcomes at one difficulty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GradeBucket {
    pub difficulty: i64,
    pub flash: u32,
    pub send: u32,
    pub attempt: u32,
}

/// Per-difficulty outcome counts, hardest first. Ungraded ticks are skipped.
pub fn grade_distribution(ticks: &[TickRow]) -> Vec<GradeBucket> {
    let mut buckets: BTreeMap<i64, GradeBucket> = BTreeMap::new();
    for tick in ticks {
        let Some(difficulty) = tick.difficulty else { continue };
        let bucket = buckets.entry(difficulty).or_insert(GradeBucket {
            difficulty,
            ..Default::default()
        });
        match tick.status {
            TickStatus::Flash => bucket.flash += 1,
            TickStatus::Send => bucket.send += 1,
            TickStatus::Attempt => bucket.attempt += 1,
        }
    }
    buckets.into_values().rev().collect()
}

/// Highest difficulty that was flashed or sent.
pub fn hardest_send(ticks: &[TickRow]) -> Option<i64> {
    ticks
        .iter()
        .filter(|t| t.status.is_send())
        .filter_map(|t| t.difficulty)
        .max()
}

/// Load the detail view. `None` when no session of either kind has this id.
pub fn load_detail(
    conn: &Connection,
    session_id: &SessionId,
) -> Result<Option<SessionDetail>, StoreError> {
    let Some(row) = FeedRepo::get(conn, session_id)? else {
        return Ok(None);
    };

    let ticks = FeedRepo::session_ticks(conn, session_id, row.kind)?;
    let breakdown = FeedRepo::participants(conn, session_id, row.kind)?;
    let user_ids: Vec<UserId> = breakdown.iter().map(|p| p.user_id.clone()).collect();
    let names = UserRepo::display_names(conn, &user_ids)?;

    let participants = breakdown
        .into_iter()
        .map(|p| Participant {
            display_name: names.get(&p.user_id).cloned(),
            is_owner: p.user_id == row.owner_id,
            user_id: p.user_id,
            counts: p.counts,
        })
        .collect();

    let board_types: BTreeSet<String> = ticks
        .iter()
        .filter(|t| !t.board_type.is_empty())
        .map(|t| t.board_type.clone())
        .collect();

    let minutes = (row.last_tick_at - row.first_tick_at).num_minutes();

    Ok(Some(SessionDetail {
        duration_minutes: (minutes > 0).then_some(minutes),
        board_types: board_types.into_iter().collect(),
        participants,
        grade_distribution: grade_distribution(&ticks),
        hardest_send: hardest_send(&ticks),
        votes: VoteRepo::totals(conn, session_id)?,
        ticks,
        session_id: row.session_id,
        kind: row.kind,
        owner_id: row.owner_id,
        name: row.name,
        description: row.description,
        first_tick_at: row.first_tick_at,
        last_tick_at: row.last_tick_at,
        ended_at: row.ended_at,
        counts: row.counts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::{run_backfill, BackfillScope};
    use crate::config::EngineConfig;
    use crate::test_support::{insert_graded, ts};
    use sesh_core::inferred_session_id;
    use sesh_store::Database;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn distribution_is_hardest_first() {
        let db = Database::in_memory().unwrap();
        insert_graded(&db, "a", "u1", "2024-01-15T10:00:00Z", TickStatus::Flash, Some(18));
        insert_graded(&db, "b", "u1", "2024-01-15T10:10:00Z", TickStatus::Attempt, Some(22));
        insert_graded(&db, "c", "u1", "2024-01-15T10:20:00Z", TickStatus::Send, Some(18));
        insert_graded(&db, "d", "u1", "2024-01-15T10:30:00Z", TickStatus::Send, None);
        let ticks = db
            .with_conn(|conn| {
                sesh_store::ticks::TickRepo::query(
                    conn,
                    &Default::default(),
                    sesh_store::ticks::TickOrder::ClimbedAtAsc,
                    None,
                )
            })
            .unwrap();

        assert_eq!(
            grade_distribution(&ticks),
            vec![
                GradeBucket { difficulty: 22, flash: 0, send: 0, attempt: 1 },
                GradeBucket { difficulty: 18, flash: 1, send: 1, attempt: 0 },
            ]
        );
        assert_eq!(hardest_send(&ticks), Some(18));
    }

    #[test]
    fn detail_of_inferred_session() {
        let db = Database::in_memory().unwrap();
        insert_graded(&db, "a", "u1", "2024-01-15T10:00:00Z", TickStatus::Flash, Some(20));
        insert_graded(&db, "b", "u1", "2024-01-15T11:30:00Z", TickStatus::Attempt, Some(24));
        db.with_conn(|conn| {
            conn.execute("UPDATE users SET display_name = 'Uno' WHERE id = 'u1'", [])?;
            Ok(())
        })
        .unwrap();
        run_backfill(
            &db,
            &BackfillScope::AllUsers,
            &EngineConfig::default(),
            &CancellationToken::new(),
            None,
        )
        .unwrap();

        let id = inferred_session_id(&UserId::from_raw("u1"), &ts("2024-01-15T10:00:00Z"));
        let detail = db.with_conn(|conn| load_detail(conn, &id)).unwrap().unwrap();
        assert_eq!(detail.kind, SessionKind::Inferred);
        assert_eq!(detail.counts.tick_count, 2);
        assert_eq!(detail.duration_minutes, Some(90));
        assert_eq!(detail.board_types, vec!["kilter".to_string()]);
        assert_eq!(detail.hardest_send, Some(20));
        assert_eq!(detail.ticks[0].uuid.as_str(), "b");
        assert_eq!(detail.participants.len(), 1);
        assert!(detail.participants[0].is_owner);
        assert_eq!(detail.participants[0].display_name.as_deref(), Some("Uno"));

        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["kind"], "inferred");
        assert_eq!(json["tickCount"], 2);
        assert_eq!(json["participants"][0]["isOwner"], true);
        assert_eq!(json["firstTickAt"], "2024-01-15T10:00:00Z");
    }

    #[test]
    fn unknown_session_is_none() {
        let db = Database::in_memory().unwrap();
        let detail = db.with_conn(|conn| load_detail(conn, &SessionId::from_raw("nope"))).unwrap();
        assert!(detail.is_none());
    }
}
