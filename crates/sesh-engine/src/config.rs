use chrono::Duration;

use sesh_core::SESSION_GAP_MS;

pub const MEMBERSHIP_WINDOW_BUFFER_MS: i64 = 30 * 60 * 1000;
pub const BACKFILL_BATCH_SIZE: u32 = 5000;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Tunables of the session engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Inactivity gap that closes a session. A gap equal to it does not split.
    pub gap: Duration,
    /// Padding on both sides of a session when looking for a member's ticks.
    pub membership_buffer: Duration,
    pub batch_size: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gap: Duration::milliseconds(SESSION_GAP_MS),
            membership_buffer: Duration::milliseconds(MEMBERSHIP_WINDOW_BUFFER_MS),
            batch_size: BACKFILL_BATCH_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Requested page size clamped to `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.gap.num_hours(), 4);
        assert_eq!(config.membership_buffer.num_minutes(), 30);
        assert_eq!(config.batch_size, 5000);
    }

    #[test]
    fn page_size_clamps() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size(None), 20);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(7)), 7);
        assert_eq!(config.page_size(Some(10_000)), 100);
    }
}
