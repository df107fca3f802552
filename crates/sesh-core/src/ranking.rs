//! Vote-based ranking scores for the session feed.

use chrono::{DateTime, Utc};

/// Seconds of recency worth one order of magnitude of net votes.
pub const HOT_DECAY_SECS: f64 = 45_000.0;

/// `sign(score) * ln(max(|score|, 1)) + epoch_seconds / 45000`.
pub fn hot_score(score: i64, last_tick_at: DateTime<Utc>) -> f64 {
    let magnitude = (score.unsigned_abs().max(1) as f64).ln();
    let sign = score.signum() as f64;
    sign * magnitude + last_tick_at.timestamp() as f64 / HOT_DECAY_SECS
}

/// Balanced, heavily voted sessions rank highest. No votes ranks zero.
pub fn controversial_score(upvotes: u32, downvotes: u32) -> f64 {
    let total = f64::from(upvotes) + f64::from(downvotes);
    if total == 0.0 {
        return 0.0;
    }
    let minority = f64::from(upvotes.min(downvotes));
    minority / total * (total + 1.0).ln()
}
