//! User registry: the store's view of who exists.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use sesh_core::{format_timestamp, UserId};

use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stateless user repository. Every method takes `&Connection`.
pub struct UserRepo;

impl UserRepo {
    /// Register a user if unknown. Returns `true` when a row was inserted.
    pub fn ensure(
        conn: &Connection,
        user_id: &UserId,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError> {
        let now = format_timestamp(&Utc::now());
        let inserted = conn.execute(
            "INSERT INTO users (id, display_name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING",
            params![user_id.as_str(), display_name, now],
        )?;
        Ok(inserted > 0)
    }

    pub fn exists(conn: &Connection, user_id: &UserId) -> Result<bool, StoreError> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                [user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(conn: &Connection, user_id: &UserId) -> Result<Option<UserRow>, StoreError> {
        let mut stmt =
            conn.prepare("SELECT id, display_name, created_at FROM users WHERE id = ?1")?;
        let mut rows = stmt.query([user_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(UserRow {
                id: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "id")?),
                display_name: row_helpers::get_opt(row, 1, "users", "display_name")?,
                created_at: row_helpers::get_timestamp(row, 2, "users", "created_at")?,
            })),
            None => Ok(None),
        }
    }

    /// Display names for a set of users; unknown users are absent from the map.
    pub fn display_names(
        conn: &Connection,
        user_ids: &[UserId],
    ) -> Result<std::collections::HashMap<UserId, String>, StoreError> {
        let mut names = std::collections::HashMap::new();
        let mut stmt = conn.prepare_cached(
            "SELECT display_name FROM users WHERE id = ?1 AND display_name IS NOT NULL",
        )?;
        for user_id in user_ids {
            let name: Option<String> = stmt
                .query_row([user_id.as_str()], |row| row.get(0))
                .optional()?;
            if let Some(name) = name {
                names.insert(user_id.clone(), name);
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn ensure_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let user = UserId::from_raw("u1");
            assert!(UserRepo::ensure(conn, &user, Some("Alex"))?);
            assert!(!UserRepo::ensure(conn, &user, Some("Other"))?);

            let row = UserRepo::get(conn, &user)?.unwrap();
            assert_eq!(row.display_name.as_deref(), Some("Alex"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn exists_reports_unknown_users() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let user = UserId::from_raw("u1");
            assert!(!UserRepo::exists(conn, &user)?);
            UserRepo::ensure(conn, &user, None)?;
            assert!(UserRepo::exists(conn, &user)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn display_names_skip_unnamed_and_unknown() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            UserRepo::ensure(conn, &UserId::from_raw("named"), Some("Named"))?;
            UserRepo::ensure(conn, &UserId::from_raw("anon"), None)?;
            let names = UserRepo::display_names(
                conn,
                &[
                    UserId::from_raw("named"),
                    UserId::from_raw("anon"),
                    UserId::from_raw("ghost"),
                ],
            )?;
            assert_eq!(names.len(), 1);
            assert_eq!(names[&UserId::from_raw("named")], "Named");
            Ok(())
        })
        .unwrap();
    }
}
