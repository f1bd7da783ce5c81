//! Association tables as explicit edge sets.
//!
//! Each table holds `(source, target)` pairs with a primary key on the pair,
//! so an edge is either present or absent; there is no way to record it twice.

use std::collections::HashSet;
use std::marker::PhantomData;

use rusqlite::OptionalExtension;

use crate::models::{MessageId, UserId};
use crate::{Database, Result};

/// Describes one association table.
pub trait EdgeKind {
    type Source: rusqlite::ToSql + rusqlite::types::FromSql + Copy;
    type Target: rusqlite::ToSql + rusqlite::types::FromSql + Copy + Eq + std::hash::Hash;

    const TABLE: &'static str;
    const SOURCE: &'static str;
    const TARGET: &'static str;
}

/// follower → followed
pub enum Follow {}

impl EdgeKind for Follow {
    type Source = UserId;
    type Target = UserId;

    const TABLE: &'static str = "follows";
    const SOURCE: &'static str = "follower_id";
    const TARGET: &'static str = "followed_id";
}

/// user → liked message
pub enum Like {}

impl EdgeKind for Like {
    type Source = UserId;
    type Target = MessageId;

    const TABLE: &'static str = "likes";
    const SOURCE: &'static str = "user_id";
    const TARGET: &'static str = "message_id";
}

pub struct EdgeSet<'a, K: EdgeKind> {
    db: &'a Database,
    _kind: PhantomData<K>,
}

impl Database {
    pub fn follows(&self) -> EdgeSet<'_, Follow> {
        EdgeSet { db: self, _kind: PhantomData }
    }

    pub fn likes(&self) -> EdgeSet<'_, Like> {
        EdgeSet { db: self, _kind: PhantomData }
    }
}

impl<K: EdgeKind> EdgeSet<'_, K> {
    /// Insert the edge. Returns false if it was already present.
    pub fn add(&self, source: K::Source, target: K::Target) -> Result<bool> {
        self.db.with_conn_mut(|conn| {
            let n = conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
                    K::TABLE,
                    K::SOURCE,
                    K::TARGET
                ),
                (source, target),
            )?;
            Ok(n > 0)
        })
    }

    /// Remove the edge. Returns false if it was not present.
    pub fn remove(&self, source: K::Source, target: K::Target) -> Result<bool> {
        self.db.with_conn_mut(|conn| {
            let n = conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
                    K::TABLE,
                    K::SOURCE,
                    K::TARGET
                ),
                (source, target),
            )?;
            Ok(n > 0)
        })
    }

    pub fn contains(&self, source: K::Source, target: K::Target) -> Result<bool> {
        self.db.with_conn(|conn| {
            let found = conn
                .query_row(
                    &format!(
                        "SELECT 1 FROM {} WHERE {} = ?1 AND {} = ?2",
                        K::TABLE,
                        K::SOURCE,
                        K::TARGET
                    ),
                    (source, target),
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Toggle membership in one transaction: removes if present, inserts if not.
    /// Returns true when the edge was added.
    pub fn toggle(&self, source: K::Source, target: K::Target) -> Result<bool> {
        self.db.with_conn_mut(|conn| {
            let removed = conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
                    K::TABLE,
                    K::SOURCE,
                    K::TARGET
                ),
                (source, target),
            )?;
            if removed > 0 {
                return Ok(false);
            }
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
                    K::TABLE,
                    K::SOURCE,
                    K::TARGET
                ),
                (source, target),
            )?;
            Ok(true)
        })
    }

    /// Every target reachable from `source`.
    pub fn targets(&self, source: K::Source) -> Result<HashSet<K::Target>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM {} WHERE {} = ?1",
                K::TARGET,
                K::TABLE,
                K::SOURCE
            ))?;
            let set = stmt
                .query_map([source], |row| row.get(0))?
                .collect::<std::result::Result<HashSet<_>, _>>()?;
            Ok(set)
        })
    }

    pub fn count_for_target(&self, target: K::Target) -> Result<i64> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", K::TABLE, K::TARGET),
                [target],
                |row| row.get(0),
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::models::NewUser;
    use crate::Database;

    fn setup() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let author = db
            .create_user(&NewUser {
                username: "testuser",
                email: "test@test.com",
                password_hash: "HASHED_PASSWORD",
                image_url: None,
            })
            .unwrap();
        let fan = db
            .create_user(&NewUser {
                username: "otheruser",
                email: "other@test.com",
                password_hash: "PASSWORD",
                image_url: None,
            })
            .unwrap();
        let msg = db.insert_message(author.id, "Message to like").unwrap();
        (db, author.id, fan.id, msg.id)
    }

    #[test]
    fn like_is_recorded_once() {
        let (db, _, fan, msg) = setup();

        assert!(db.likes().add(fan, msg).unwrap());
        assert!(!db.likes().add(fan, msg).unwrap());

        assert!(db.likes().contains(fan, msg).unwrap());
        assert_eq!(db.likes().targets(fan).unwrap().len(), 1);
        assert_eq!(db.likes().count_for_target(msg).unwrap(), 1);
    }

    #[test]
    fn like_then_unlike_returns_to_zero() {
        let (db, _, fan, msg) = setup();

        db.likes().add(fan, msg).unwrap();
        assert!(db.likes().remove(fan, msg).unwrap());

        assert!(!db.likes().contains(fan, msg).unwrap());
        assert_eq!(db.likes().count_for_target(msg).unwrap(), 0);
        assert!(db.likes().targets(fan).unwrap().is_empty());
    }

    #[test]
    fn toggle_flips_membership() {
        let (db, _, fan, msg) = setup();

        assert!(db.likes().toggle(fan, msg).unwrap());
        assert!(db.likes().contains(fan, msg).unwrap());
        assert!(!db.likes().toggle(fan, msg).unwrap());
        assert!(!db.likes().contains(fan, msg).unwrap());
    }

    #[test]
    fn deleting_message_clears_its_likes() {
        let (db, _, fan, msg) = setup();
        db.likes().add(fan, msg).unwrap();

        db.delete_message(msg).unwrap();
        assert!(!db.likes().contains(fan, msg).unwrap());
    }

    #[test]
    fn follow_is_directed() {
        let (db, author, fan, _) = setup();

        db.follows().add(fan, author).unwrap();
        assert!(db.follows().contains(fan, author).unwrap());
        assert!(!db.follows().contains(author, fan).unwrap());

        assert!(db.follows().remove(fan, author).unwrap());
        assert!(!db.follows().remove(fan, author).unwrap());
    }

    #[test]
    fn like_of_missing_message_is_rejected() {
        let (db, _, fan, _) = setup();
        assert!(db.likes().add(fan, 9999).is_err());
    }
}
