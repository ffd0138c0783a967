use thiserror::Error;

/// Outcomes of a command that the user should see as a plain message rather
/// than a raw database error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("user '{0}' already exists")]
    UserAlreadyExists(String),
    #[error("user '{0}' doesn't exist")]
    UserNotFound(String),
    #[error("no user is logged in; run `gator login <name>` first")]
    NotLoggedIn,
    #[error("a feed with url '{0}' already exists")]
    FeedAlreadyExists(String),
    #[error("no feed with url '{0}'")]
    FeedNotFound(String),
    #[error("{user} already follows '{feed}'")]
    AlreadyFollowing { user: String, feed: String },
}

/// True when `err` is a UNIQUE constraint failure reported by the database.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
