use crate::Database;
use crate::models::{MessageRow, SubscriptionRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, ErrorCode};

const MESSAGE_COLUMNS: &str = "id, from_user_id, to_user_id, content, created_at";

impl Database {
    // -- Users --

    /// Insert a user. Returns `None` if the username is already taken.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                (username, password_hash),
            ) {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Everyone except `user_id`, ordered by username.
    pub fn list_users_except(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password_hash, created_at FROM users
                 WHERE id != ?1 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([user_id], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message. Id and timestamp are assigned by the store.
    pub fn insert_message(&self, from_user_id: i64, to_user_id: i64, content: &str) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                &format!(
                    "INSERT INTO messages (from_user_id, to_user_id, content) VALUES (?1, ?2, ?3)
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                rusqlite::params![from_user_id, to_user_id, content],
                map_message,
            )?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                map_message,
            )
            .optional()
        })
    }

    /// Delete-if-exists. Returns whether a row was removed.
    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    /// Messages between two users in ascending id order.
    ///
    /// With `before`, only ids below it are considered. `limit` keeps the
    /// newest rows of that range; `None` returns all of them.
    pub fn get_conversation(
        &self,
        user_a: i64,
        user_b: i64,
        limit: Option<u32>,
        before: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, i64::from);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE ((from_user_id = ?1 AND to_user_id = ?2)
                     OR (from_user_id = ?2 AND to_user_id = ?1))
                   AND (?3 IS NULL OR id < ?3)
                 ORDER BY id DESC
                 LIMIT ?4"
            ))?;

            let mut rows = stmt
                .query_map(rusqlite::params![user_a, user_b, before, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    // -- Push subscriptions --

    /// Insert or replace in place, keyed by endpoint.
    pub fn upsert_subscription(
        &self,
        endpoint: &str,
        user_id: i64,
        p256dh: &str,
        auth: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO push_subscriptions (endpoint, user_id, p256dh, auth)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(endpoint) DO UPDATE SET
                     user_id = excluded.user_id,
                     p256dh = excluded.p256dh,
                     auth = excluded.auth",
                rusqlite::params![endpoint, user_id, p256dh, auth],
            )?;
            Ok(())
        })
    }

    pub fn get_subscriptions_for_user(&self, user_id: i64) -> Result<Vec<SubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT endpoint, user_id, p256dh, auth FROM push_subscriptions
                 WHERE user_id = ?1 ORDER BY created_at, endpoint",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(SubscriptionRow {
                        endpoint: row.get(0)?,
                        user_id: row.get(1)?,
                        p256dh: row.get(2)?,
                        auth: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete-if-exists, so concurrent prunes of one endpoint are harmless.
    pub fn delete_subscription(&self, endpoint: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM push_subscriptions WHERE endpoint = ?1",
                [endpoint],
            )?;
            Ok(removed > 0)
        })
    }
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, filter: &str, value: P) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password_hash, created_at FROM users WHERE {filter}"
    ))?;
    stmt.query_row([value], map_user).optional()
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        from_user_id: row.get(1)?,
        to_user_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user("alice", "h").unwrap().unwrap();
        let b = db.create_user("bob", "h").unwrap().unwrap();
        let c = db.create_user("carol", "h").unwrap().unwrap();
        (db, a, b, c)
    }

    #[test]
    fn duplicate_username_is_none() {
        let (db, ..) = db_with_users();
        assert!(db.create_user("alice", "other").unwrap().is_none());
    }

    #[test]
    fn lists_peers_without_self() {
        let (db, a, ..) = db_with_users();
        let names: Vec<String> = db
            .list_users_except(a)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["bob", "carol"]);
    }

    #[test]
    fn conversation_is_scoped_and_ordered_by_id() {
        let (db, a, b, c) = db_with_users();
        let m1 = db.insert_message(a, b, "one").unwrap();
        let _other = db.insert_message(a, c, "not ours").unwrap();
        let m2 = db.insert_message(b, a, "two").unwrap();
        let m3 = db.insert_message(a, b, "three").unwrap();

        let rows = db.get_conversation(b, a, None, None).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![m1.id, m2.id, m3.id]);
        assert!(m1.id < m2.id && m2.id < m3.id);
    }

    #[test]
    fn conversation_paging_keeps_newest_before_cursor() {
        let (db, a, b, _) = db_with_users();
        let ids: Vec<i64> = (0..5)
            .map(|i| db.insert_message(a, b, &format!("m{i}")).unwrap().id)
            .collect();

        let page = db.get_conversation(a, b, Some(2), Some(ids[4])).unwrap();
        let got: Vec<i64> = page.iter().map(|r| r.id).collect();
        assert_eq!(got, vec![ids[2], ids[3]]);
    }

    #[test]
    fn ids_are_not_reused_after_deleting_the_newest() {
        let (db, a, b, _) = db_with_users();
        let first = db.insert_message(a, b, "x").unwrap();
        assert!(db.delete_message(first.id).unwrap());
        let second = db.insert_message(a, b, "y").unwrap();
        assert!(second.id > first.id);
    }

    #[test]
    fn delete_message_is_idempotent() {
        let (db, a, b, _) = db_with_users();
        let m = db.insert_message(a, b, "bye").unwrap();
        assert!(db.delete_message(m.id).unwrap());
        assert!(!db.delete_message(m.id).unwrap());
        assert!(db.get_message(m.id).unwrap().is_none());
    }

    #[test]
    fn message_to_unknown_user_violates_foreign_key() {
        let (db, a, ..) = db_with_users();
        assert!(db.insert_message(a, 9999, "nobody").is_err());
    }

    #[test]
    fn subscription_upsert_replaces_in_place() {
        let (db, a, b, _) = db_with_users();
        db.upsert_subscription("https://push.example/1", a, "k1", "s1").unwrap();
        db.upsert_subscription("https://push.example/1", b, "k2", "s2").unwrap();

        assert!(db.get_subscriptions_for_user(a).unwrap().is_empty());
        let subs = db.get_subscriptions_for_user(b).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].p256dh, "k2");
        assert_eq!(subs[0].auth, "s2");
    }

    #[test]
    fn subscription_delete_is_idempotent() {
        let (db, a, ..) = db_with_users();
        db.upsert_subscription("https://push.example/1", a, "k", "s").unwrap();
        db.upsert_subscription("https://push.example/2", a, "k", "s").unwrap();

        assert!(db.delete_subscription("https://push.example/1").unwrap());
        assert!(!db.delete_subscription("https://push.example/1").unwrap());

        let left = db.get_subscriptions_for_user(a).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].endpoint, "https://push.example/2");
    }

    #[test]
    fn inserted_message_converts_to_model() {
        let (db, a, b, _) = db_with_users();
        let message = db.insert_message(a, b, "hello").unwrap().into_message().unwrap();
        assert_eq!(message.content, "hello");
        assert_eq!(message.from_user_id.0, a);
    }
}
