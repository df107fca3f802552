//! Gap-based clustering of ticks into inferred sessions.
//!
//! Ticks of one user are sorted by `climbed_at`; a new session starts whenever
//! the gap to the previous tick is strictly greater than the threshold. A gap
//! exactly equal to the threshold stays in the same session.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::inferred_session_id;
use crate::ids::{SessionId, TickUuid, UserId};
use crate::ticks::{TickForGrouping, TickStatus};

/// Default inactivity gap that closes a session (4 hours).
pub const SESSION_GAP_MS: i64 = 4 * 60 * 60 * 1000;

/// Default gap as a [`Duration`].
pub fn default_gap() -> Duration {
    Duration::milliseconds(SESSION_GAP_MS)
}

/// Per-session outcome counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub tick_count: u32,
    pub total_sends: u32,
    pub total_flashes: u32,
    pub total_attempts: u32,
}

impl SessionCounts {
    pub fn record(&mut self, status: TickStatus) {
        self.tick_count += 1;
        match status {
            TickStatus::Flash => {
                self.total_flashes += 1;
                self.total_sends += 1;
            }
            TickStatus::Send => self.total_sends += 1,
            TickStatus::Attempt => self.total_attempts += 1,
        }
    }

    pub fn from_statuses(statuses: impl IntoIterator<Item = TickStatus>) -> Self {
        statuses.into_iter().fold(Self::default(), |mut acc, status| {
            acc.record(status);
            acc
        })
    }
}

/// One clustered burst of a single user's ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionGroup {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub first_tick_at: DateTime<Utc>,
    pub last_tick_at: DateTime<Utc>,
    pub tick_uuids: Vec<TickUuid>,
    pub counts: SessionCounts,
}

/// Group unassigned ticks into sessions.
///
/// Ticks carrying an explicit or inferred session id are ignored. Output is
/// grouped per user (users in id order), each user's groups in ascending time.
pub fn group_ticks_into_sessions(ticks: &[TickForGrouping], gap: Duration) -> Vec<SessionGroup> {
    let mut by_user: BTreeMap<&UserId, Vec<&TickForGrouping>> = BTreeMap::new();
    for tick in ticks.iter().filter(|t| t.is_unassigned()) {
        by_user.entry(&tick.user_id).or_default().push(tick);
    }

    let mut groups = Vec::new();
    for (user_id, user_ticks) in by_user {
        groups.extend(group_user_ticks(user_id, user_ticks, gap));
    }
    groups
}

/// Group one user's ticks. Callers guarantee every tick belongs to `user_id`.
pub fn group_user_ticks<'a>(
    user_id: &UserId,
    ticks: impl IntoIterator<Item = &'a TickForGrouping>,
    gap: Duration,
) -> Vec<SessionGroup> {
    let mut sorted: Vec<&TickForGrouping> = ticks.into_iter().collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| {
        a.climbed_at
            .cmp(&b.climbed_at)
            .then_with(|| a.uuid.cmp(&b.uuid))
    });

    let mut groups = Vec::new();
    let mut current: Vec<&TickForGrouping> = vec![sorted[0]];

    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next.climbed_at - prev.climbed_at > gap {
            groups.push(build_group(user_id, &current));
            current = vec![next];
        } else {
            current.push(next);
        }
    }
    groups.push(build_group(user_id, &current));
    groups
}

fn build_group(user_id: &UserId, ticks: &[&TickForGrouping]) -> SessionGroup {
    // Callers never pass an empty slice.
    let first_tick_at = ticks[0].climbed_at;
    let last_tick_at = ticks[ticks.len() - 1].climbed_at;

    SessionGroup {
        session_id: inferred_session_id(user_id, &first_tick_at),
        user_id: user_id.clone(),
        first_tick_at,
        last_tick_at,
        tick_uuids: ticks.iter().map(|t| t.uuid.clone()).collect(),
        counts: SessionCounts::from_statuses(ticks.iter().map(|t| t.status)),
    }
}
