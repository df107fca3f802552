//! Party session rollups: one `party_sessions` row per explicit session id,
//! recomputed from its ticks whenever one is inserted.

use rusqlite::Connection;

use sesh_core::SessionId;

use crate::error::StoreError;

const REFRESH: &str = "INSERT INTO party_sessions
        (id, owner_id, first_tick_at, last_tick_at,
         tick_count, total_sends, total_flashes, total_attempts)
    SELECT ?1,
           (SELECT o.user_id FROM ticks o
            WHERE o.explicit_session_id = ?1
            ORDER BY o.climbed_at ASC, o.id ASC LIMIT 1),
           MIN(t.climbed_at), MAX(t.climbed_at), COUNT(*),
           SUM(CASE WHEN t.status IN ('flash', 'send') THEN 1 ELSE 0 END),
           SUM(CASE WHEN t.status = 'flash' THEN 1 ELSE 0 END),
           SUM(CASE WHEN t.status = 'attempt' THEN 1 ELSE 0 END)
    FROM ticks t
    WHERE t.explicit_session_id = ?1
    GROUP BY t.explicit_session_id
    ON CONFLICT(id) DO UPDATE SET
        owner_id = excluded.owner_id,
        first_tick_at = excluded.first_tick_at,
        last_tick_at = excluded.last_tick_at,
        tick_count = excluded.tick_count,
        total_sends = excluded.total_sends,
        total_flashes = excluded.total_flashes,
        total_attempts = excluded.total_attempts";

pub struct PartyRepo;

impl PartyRepo {
    /// Recompute a party's rollup from its ticks. A party with no ticks is
    /// left untouched.
    pub fn refresh(conn: &Connection, session_id: &SessionId) -> Result<(), StoreError> {
        conn.execute(REFRESH, [session_id.as_str()])?;
        Ok(())
    }

    pub fn count(conn: &Connection) -> Result<u64, StoreError> {
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM party_sessions", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::ticks::test_support::new_tick;
    use crate::ticks::TickRepo;
    use sesh_core::TickStatus;

    #[test]
    fn insert_keeps_rollup_current() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let party = SessionId::from_raw("party-1");
            let mut tick = new_tick("p1", "u2", "2024-01-15T10:30:00Z", TickStatus::Send);
            tick.explicit_session_id = Some(party.clone());
            TickRepo::insert(conn, &tick)?;
            assert_eq!(PartyRepo::count(conn)?, 1);

            let mut earlier = new_tick("p2", "u1", "2024-01-15T10:00:00Z", TickStatus::Attempt);
            earlier.explicit_session_id = Some(party.clone());
            TickRepo::insert(conn, &earlier)?;

            let (owner, first, count): (String, String, i64) = conn.query_row(
                "SELECT owner_id, first_tick_at, tick_count FROM party_sessions WHERE id = ?1",
                [party.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            assert_eq!(owner, "u1");
            assert_eq!(first, "2024-01-15T10:00:00.000Z");
            assert_eq!(count, 2);
            assert_eq!(PartyRepo::count(conn)?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn refresh_without_ticks_writes_nothing() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            PartyRepo::refresh(conn, &SessionId::from_raw("ghost"))?;
            assert_eq!(PartyRepo::count(conn)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn ticks_without_party_are_not_rolled_up() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let tick = new_tick("t1", "u1", "2024-01-15T10:00:00Z", TickStatus::Send);
            TickRepo::insert(conn, &tick)?;
            assert_eq!(PartyRepo::count(conn)?, 0);
            Ok(())
        })
        .unwrap();
    }
}
