//! Scalar SQL functions used by the feed's score ordering.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use sesh_core::{controversial_score, hot_score, parse_timestamp};

/// `sesh_hot_score(net_votes, last_tick_at)`
pub const HOT_SCORE: &str = "sesh_hot_score";
/// `sesh_controversial_score(upvotes, downvotes)`
pub const CONTROVERSIAL_SCORE: &str = "sesh_controversial_score";

/// Register the ranking functions on a connection.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function(HOT_SCORE, 2, flags, |ctx| {
        let score: i64 = ctx.get(0)?;
        let raw: String = ctx.get(1)?;
        let last_tick_at =
            parse_timestamp(&raw).map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
        Ok(hot_score(score, last_tick_at))
    })?;
    conn.create_scalar_function(CONTROVERSIAL_SCORE, 2, flags, |ctx| {
        let upvotes: u32 = ctx.get(0)?;
        let downvotes: u32 = ctx.get(1)?;
        Ok(controversial_score(upvotes, downvotes))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register(&conn).unwrap();
        conn
    }

    #[test]
    fn hot_score_matches_rust() {
        let conn = conn();
        let at = "2024-01-15T10:00:00.000Z";
        let sql: f64 = conn
            .query_row("SELECT sesh_hot_score(-3, ?1)", [at], |row| row.get(0))
            .unwrap();
        assert_eq!(sql, hot_score(-3, parse_timestamp(at).unwrap()));
    }

    #[test]
    fn controversial_score_matches_rust() {
        let conn = conn();
        let sql: f64 = conn
            .query_row("SELECT sesh_controversial_score(4, 3)", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sql, controversial_score(4, 3));
        let zero: f64 = conn
            .query_row("SELECT sesh_controversial_score(0, 0)", [], |row| row.get(0))
            .unwrap();
        assert_eq!(zero, 0.0);
    }

    #[test]
    fn malformed_timestamp_fails_the_query() {
        let conn = conn();
        let result: rusqlite::Result<f64> =
            conn.query_row("SELECT sesh_hot_score(1, 'yesterday')", [], |row| row.get(0));
        assert!(result.is_err());
    }
}
