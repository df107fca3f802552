use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TickUuid, UserId};

/// Outcome of a single climb attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    Flash,
    Send,
    Attempt,
}

impl TickStatus {
    /// Flashes count as sends too.
    pub fn is_send(self) -> bool {
        matches!(self, Self::Flash | Self::Send)
    }
}

impl std::fmt::Display for TickStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flash => write!(f, "flash"),
            Self::Send => write!(f, "send"),
            Self::Attempt => write!(f, "attempt"),
        }
    }
}

impl std::str::FromStr for TickStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flash" => Ok(Self::Flash),
            "send" => Ok(Self::Send),
            "attempt" => Ok(Self::Attempt),
            other => Err(format!("unknown tick status: {other}")),
        }
    }
}

/// The slice of a tick the clustering engine needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickForGrouping {
    pub uuid: TickUuid,
    pub user_id: UserId,
    pub climbed_at: DateTime<Utc>,
    pub status: TickStatus,
    pub explicit_session_id: Option<SessionId>,
    pub inferred_session_id: Option<SessionId>,
}

impl TickForGrouping {
    /// Already grouped ticks are not clustering candidates.
    pub fn is_unassigned(&self) -> bool {
        self.explicit_session_id.is_none() && self.inferred_session_id.is_none()
    }
}

/// Canonical timestamp form: RFC 3339, UTC, millisecond precision
/// (`2024-01-15T10:00:00.000Z`). Stored columns and session identities use it,
/// so lexical order matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [TickStatus::Flash, TickStatus::Send, TickStatus::Attempt] {
            let parsed: TickStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("project".parse::<TickStatus>().is_err());
    }

    #[test]
    fn flash_is_a_send() {
        assert!(TickStatus::Flash.is_send());
        assert!(TickStatus::Send.is_send());
        assert!(!TickStatus::Attempt.is_send());
    }

    #[test]
    fn timestamp_format_is_fixed_width_utc() {
        let ts = parse_timestamp("2024-01-15T12:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-15T10:00:00.000Z");
    }

    #[test]
    fn timestamp_keeps_millis() {
        let ts = parse_timestamp("2024-01-15T14:00:00.001Z").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-15T14:00:00.001Z");
    }
}
