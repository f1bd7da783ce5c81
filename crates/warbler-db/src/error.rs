use rusqlite::ErrorCode;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(rusqlite::Error),

    /// A UNIQUE constraint on the named column rejected the write.
    #[error("{0} already taken")]
    Conflict(&'static str),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, Some(msg)) = &err {
            if code.code == ErrorCode::ConstraintViolation && msg.starts_with("UNIQUE") {
                if msg.contains("users.username") {
                    return DbError::Conflict("username");
                }
                if msg.contains("users.email") {
                    return DbError::Conflict("email");
                }
            }
        }
        DbError::Sqlite(err)
    }
}

impl DbError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict(_))
    }
}
