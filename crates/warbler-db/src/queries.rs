use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::migrations::{DEFAULT_HEADER_IMAGE_URL, DEFAULT_IMAGE_URL};
use crate::models::{
    MessageId, MessageRow, NewUser, ProfileUpdate, UserCounts, UserId, UserRow,
};
use crate::{Database, DbError, Result};

const USER_COLUMNS: &str =
    "u.id, u.username, u.email, u.password, u.image_url, u.header_image_url, u.bio, u.location";

const MESSAGE_COLUMNS: &str = "m.id, m.text, m.timestamp, m.user_id, u.username, u.image_url";

impl Database {
    // -- Users --

    /// Insert a user. Duplicate usernames or emails surface as
    /// `DbError::Conflict` and leave no row behind.
    pub fn create_user(&self, new: &NewUser<'_>) -> Result<UserRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password, image_url) VALUES (?1, ?2, ?3, ?4)",
                (
                    new.username,
                    new.email,
                    new.password_hash,
                    new.image_url.unwrap_or(DEFAULT_IMAGE_URL),
                ),
            )?;
            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)?.ok_or_else(|| DbError::from(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    pub fn get_user_by_id(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?1"
            ))?;
            Ok(stmt.query_row([username], user_from_row).optional()?)
        })
    }

    /// All users, or those whose username contains `q` literally.
    pub fn search_users(&self, q: Option<&str>) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let pattern = format!("%{}%", escape_like(q.unwrap_or_default()));
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u
                 WHERE u.username LIKE ?1 ESCAPE '\\'
                 ORDER BY u.username"
            ))?;
            let rows = stmt
                .query_map([pattern], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_profile(&self, id: UserId, update: &ProfileUpdate<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users
                 SET username = ?2, email = ?3, image_url = ?4, header_image_url = ?5,
                     bio = ?6, location = ?7
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    update.username,
                    update.email,
                    update.image_url.unwrap_or(DEFAULT_IMAGE_URL),
                    update.header_image_url.unwrap_or(DEFAULT_HEADER_IMAGE_URL),
                    update.bio,
                    update.location,
                ],
            )?;
            Ok(())
        })
    }

    pub fn update_password(&self, id: UserId, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                rusqlite::params![id, password_hash],
            )?;
            Ok(())
        })
    }

    /// Delete a user; messages, likes and follow edges go with it.
    /// Returns false when no such user exists.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        self.with_conn_mut(|conn| Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id])? > 0))
    }

    pub fn user_counts(&self, id: UserId) -> Result<UserCounts> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM messages WHERE user_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE follower_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE followed_id = ?1),
                    (SELECT COUNT(*) FROM likes WHERE user_id = ?1)",
                [id],
                |row| {
                    Ok(UserCounts {
                        messages: row.get(0)?,
                        following: row.get(1)?,
                        followers: row.get(2)?,
                        likes: row.get(3)?,
                    })
                },
            )?)
        })
    }

    /// Users that `id` follows.
    pub fn following_of(&self, id: UserId) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u
                 JOIN follows f ON f.followed_id = u.id
                 WHERE f.follower_id = ?1
                 ORDER BY u.username"
            ))?;
            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Users following `id`.
    pub fn followers_of(&self, id: UserId) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users u
                 JOIN follows f ON f.follower_id = u.id
                 WHERE f.followed_id = ?1
                 ORDER BY u.username"
            ))?;
            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message owned by `user_id`.
    pub fn insert_message(&self, user_id: UserId, text: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (text, user_id) VALUES (?1, ?2)",
                rusqlite::params![text, user_id],
            )?;
            let id = conn.last_insert_rowid();
            query_message(conn, id)?.ok_or_else(|| DbError::from(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Delete a message and its like edges. Returns false when it did not exist.
    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0)
        })
    }

    /// Newest messages written by `user_id`.
    pub fn messages_by_user(&self, user_id: UserId, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "m.user_id = ?1",
                rusqlite::params![user_id, limit],
            )
        })
    }

    /// Home timeline: newest messages by `user_id` and everyone they follow.
    pub fn timeline(&self, user_id: UserId, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "m.user_id = ?1
                 OR m.user_id IN (SELECT followed_id FROM follows WHERE follower_id = ?1)",
                rusqlite::params![user_id, limit],
            )
        })
    }

    /// Messages liked by `user_id`, newest first.
    pub fn liked_messages(&self, user_id: UserId, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_messages(
                conn,
                "m.id IN (SELECT message_id FROM likes WHERE user_id = ?1)",
                rusqlite::params![user_id, limit],
            )
        })
    }
}

fn query_user_by_id(conn: &Connection, id: UserId) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"))?;
    Ok(stmt.query_row([id], user_from_row).optional()?)
}

fn query_message(conn: &Connection, id: MessageId) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         JOIN users u ON u.id = m.user_id
         WHERE m.id = ?1"
    ))?;
    Ok(stmt.query_row([id], message_from_row).optional()?)
}

/// `filter` binds the user id as `?1`; the limit is always `?2`.
fn query_messages(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         JOIN users u ON u.id = m.user_id
         WHERE {filter}
         ORDER BY m.timestamp DESC, m.id DESC
         LIMIT ?2"
    ))?;

    let rows = stmt
        .query_map(params, message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        image_url: row.get(4)?,
        header_image_url: row.get(5)?,
        bio: row.get(6)?,
        location: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let raw: String = row.get(2)?;
    Ok(MessageRow {
        id: row.get(0)?,
        text: row.get(1)?,
        timestamp: parse_timestamp(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        user_id: row.get(3)?,
        author_username: row.get(4)?,
        author_image_url: row.get(5)?,
    })
}

/// Backslash-escape LIKE wildcards so `term` matches literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// SQLite stores `datetime('now')` as "YYYY-MM-DD HH:MM:SS" without timezone.
fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(db: &Database, name: &str) -> UserRow {
        let email = format!("{name}@test.com");
        db.create_user(&NewUser {
            username: name,
            email: &email,
            password_hash: "HASHED_PASSWORD",
            image_url: None,
        })
        .unwrap()
    }

    #[test]
    fn create_user_applies_defaults() {
        let db = Database::open_in_memory().unwrap();
        let u = user(&db, "testuser");
        assert_eq!(u.username, "testuser");
        assert_eq!(u.image_url, DEFAULT_IMAGE_URL);
        assert_eq!(u.header_image_url, DEFAULT_HEADER_IMAGE_URL);
        assert!(u.bio.is_none());
    }

    #[test]
    fn duplicate_username_is_rejected_without_a_second_row() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "testuser");

        let err = db
            .create_user(&NewUser {
                username: "testuser",
                email: "other@test.com",
                password_hash: "x",
                image_url: None,
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict("username")));

        let err = db
            .create_user(&NewUser {
                username: "someoneelse",
                email: "testuser@test.com",
                password_hash: "x",
                image_url: None,
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict("email")));

        assert_eq!(db.search_users(None).unwrap().len(), 1);
    }

    #[test]
    fn message_belongs_to_its_user() {
        let db = Database::open_in_memory().unwrap();
        let u = user(&db, "testuser");

        let msg = db.insert_message(u.id, "Test message").unwrap();
        assert_eq!(msg.user_id, u.id);
        assert_eq!(msg.author_username, "testuser");

        let mine = db.messages_by_user(u.id, 100).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].text, "Test message");
    }

    #[test]
    fn message_requires_existing_owner() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_message(42, "orphan").is_err());
    }

    #[test]
    fn message_text_is_bounded() {
        let db = Database::open_in_memory().unwrap();
        let u = user(&db, "testuser");
        assert!(db.insert_message(u.id, "").is_err());
        assert!(db.insert_message(u.id, &"x".repeat(141)).is_err());
        assert!(db.insert_message(u.id, &"x".repeat(140)).is_ok());
    }

    #[test]
    fn delete_message_makes_lookup_absent() {
        let db = Database::open_in_memory().unwrap();
        let u = user(&db, "testuser");
        let msg = db.insert_message(u.id, "Delete me").unwrap();

        assert!(db.delete_message(msg.id).unwrap());
        assert!(db.get_message(msg.id).unwrap().is_none());
        assert!(!db.delete_message(msg.id).unwrap());
    }

    #[test]
    fn timeline_includes_self_and_followed_only() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");

        db.insert_message(a.id, "from alice").unwrap();
        db.insert_message(b.id, "from bob").unwrap();
        db.insert_message(c.id, "from carol").unwrap();
        db.follows().add(a.id, b.id).unwrap();

        let texts: Vec<String> = db
            .timeline(a.id, 100)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["from bob", "from alice"]);
    }

    #[test]
    fn follow_listings_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        db.follows().add(a.id, b.id).unwrap();

        assert_eq!(db.following_of(a.id).unwrap()[0].id, b.id);
        assert_eq!(db.followers_of(b.id).unwrap()[0].id, a.id);
        assert!(db.followers_of(a.id).unwrap().is_empty());

        let counts = db.user_counts(a.id).unwrap();
        assert_eq!(counts.following, 1);
        assert_eq!(counts.followers, 0);
    }

    #[test]
    fn deleting_user_cascades() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        let a_msg = db.insert_message(a.id, "by alice").unwrap();
        let b_msg = db.insert_message(b.id, "by bob").unwrap();
        db.follows().add(a.id, b.id).unwrap();
        db.follows().add(b.id, a.id).unwrap();
        db.likes().add(a.id, b_msg.id).unwrap();
        db.likes().add(b.id, a_msg.id).unwrap();

        assert!(db.delete_user(a.id).unwrap());

        assert!(db.get_message(a_msg.id).unwrap().is_none());
        assert!(db.get_message(b_msg.id).unwrap().is_some());
        assert!(db.followers_of(b.id).unwrap().is_empty());
        assert!(db.following_of(b.id).unwrap().is_empty());
        assert_eq!(db.user_counts(b.id).unwrap(), UserCounts {
            messages: 1,
            ..UserCounts::default()
        });
    }

    #[test]
    fn update_profile_conflict_leaves_row_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        user(&db, "bob");

        let err = db
            .update_profile(a.id, &ProfileUpdate {
                username: "bob",
                email: "alice@test.com",
                image_url: None,
                header_image_url: None,
                bio: Some("hi"),
                location: None,
            })
            .unwrap_err();
        assert!(err.is_conflict());

        let a = db.get_user_by_id(a.id).unwrap().unwrap();
        assert_eq!(a.username, "alice");
        assert!(a.bio.is_none());
    }

    #[test]
    fn search_matches_substring() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "alice");
        user(&db, "malik");
        user(&db, "bob");

        let names: Vec<String> = db
            .search_users(Some("li"))
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alice", "malik"]);
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "a_b");
        user(&db, "axb");
        user(&db, "100%");

        let names = |q: &str| -> Vec<String> {
            db.search_users(Some(q))
                .unwrap()
                .into_iter()
                .map(|u| u.username)
                .collect()
        };
        assert_eq!(names("_"), vec!["a_b"]);
        assert_eq!(names("%"), vec!["100%"]);
        assert!(names("\\").is_empty());
        assert_eq!(names("x"), vec!["axb"]);
    }
}
