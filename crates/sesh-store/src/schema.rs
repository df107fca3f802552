/// SQL DDL for the sesh database.
/// Timestamps are canonical RFC 3339 text (see `sesh_core::format_timestamp`),
/// so string comparison is chronological comparison.
pub const SCHEMA_VERSION: u32 = 2;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    climb_uuid TEXT NOT NULL DEFAULT '',
    board_type TEXT NOT NULL DEFAULT '',
    difficulty INTEGER,
    status TEXT NOT NULL,
    climbed_at TEXT NOT NULL,
    explicit_session_id TEXT,
    inferred_session_id TEXT,
    previous_inferred_session_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inferred_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    first_tick_at TEXT NOT NULL,
    last_tick_at TEXT NOT NULL,
    ended_at TEXT,
    name TEXT,
    description TEXT,
    tick_count INTEGER NOT NULL DEFAULT 0,
    total_sends INTEGER NOT NULL DEFAULT 0,
    total_flashes INTEGER NOT NULL DEFAULT 0,
    total_attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Party sessions, one row per explicit_session_id, refreshed on tick insert.
CREATE TABLE IF NOT EXISTS party_sessions (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    first_tick_at TEXT NOT NULL,
    last_tick_at TEXT NOT NULL,
    tick_count INTEGER NOT NULL,
    total_sends INTEGER NOT NULL,
    total_flashes INTEGER NOT NULL,
    total_attempts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS session_member_overrides (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES inferred_sessions(id),
    user_id TEXT NOT NULL,
    added_by_user_id TEXT NOT NULL,
    added_at TEXT NOT NULL,
    UNIQUE(session_id, user_id)
);

CREATE TABLE IF NOT EXISTS session_votes (
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    value INTEGER NOT NULL CHECK (value IN (-1, 1)),
    voted_at TEXT NOT NULL,
    PRIMARY KEY (session_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_ticks_user_climbed ON ticks(user_id, climbed_at);
CREATE INDEX IF NOT EXISTS idx_ticks_inferred ON ticks(inferred_session_id);
CREATE INDEX IF NOT EXISTS idx_ticks_explicit ON ticks(explicit_session_id);
CREATE INDEX IF NOT EXISTS idx_ticks_unassigned ON ticks(user_id, climbed_at)
    WHERE explicit_session_id IS NULL AND inferred_session_id IS NULL;
CREATE INDEX IF NOT EXISTS idx_sessions_user_open
    ON inferred_sessions(user_id, ended_at, last_tick_at);
CREATE INDEX IF NOT EXISTS idx_sessions_last_tick ON inferred_sessions(last_tick_at, id);
CREATE INDEX IF NOT EXISTS idx_party_last_tick ON party_sessions(last_tick_at, id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Version 1 derived party sessions from `ticks` at read time. Populates
/// `party_sessions` from the ticks already stored.
pub const MIGRATE_V1_TO_V2: &str = r#"
INSERT OR REPLACE INTO party_sessions
    (id, owner_id, first_tick_at, last_tick_at,
     tick_count, total_sends, total_flashes, total_attempts)
SELECT t.explicit_session_id,
       (SELECT o.user_id FROM ticks o
        WHERE o.explicit_session_id = t.explicit_session_id
        ORDER BY o.climbed_at ASC, o.id ASC LIMIT 1),
       MIN(t.climbed_at), MAX(t.climbed_at), COUNT(*),
       SUM(CASE WHEN t.status IN ('flash', 'send') THEN 1 ELSE 0 END),
       SUM(CASE WHEN t.status = 'flash' THEN 1 ELSE 0 END),
       SUM(CASE WHEN t.status = 'attempt' THEN 1 ELSE 0 END)
FROM ticks t
WHERE t.explicit_session_id IS NOT NULL
GROUP BY t.explicit_session_id;
UPDATE schema_version SET version = 2;
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
