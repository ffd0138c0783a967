//! The user↔feed follow graph.
//!
//! A (user, feed) pair is either followed or not; following twice is rejected
//! by the `UNIQUE(user_id, feed_id)` constraint and unfollowing a pair that is
//! not followed is a no-op.

use sqlx::{FromRow, SqliteConnection};
use tracing::info;

use crate::db::{insert_feed, now, Database, Feed, User};
use crate::error::{is_unique_violation, CommandError};

/// A follow row joined with the names it connects, for display.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub created_at: String,
    pub updated_at: String,
    pub user_name: String,
    pub feed_name: String,
}

const SELECT_FEED_FOLLOW: &str = r#"
    SELECT feed_follows.id, feed_follows.user_id, feed_follows.feed_id,
           feed_follows.created_at, feed_follows.updated_at,
           users.name AS user_name, feeds.name AS feed_name
    FROM feed_follows
    JOIN users ON users.id = feed_follows.user_id
    JOIN feeds ON feeds.id = feed_follows.feed_id
"#;

impl Database {
    pub async fn create_feed_follow(&self, user_id: i64, feed_id: i64) -> anyhow::Result<FeedFollow> {
        let mut tx = self.pool.begin().await?;
        let follow = insert_feed_follow(&mut *tx, user_id, feed_id).await?;
        tx.commit().await?;
        Ok(follow)
    }

    /// Returns whether a follow row was actually removed.
    pub async fn delete_feed_follow(&self, user_id: i64, feed_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_feed_follows_for_user(&self, user_id: i64) -> anyhow::Result<Vec<FeedFollow>> {
        let sql = format!("{} WHERE feed_follows.user_id = ? ORDER BY feed_follows.id", SELECT_FEED_FOLLOW);
        let follows = sqlx::query_as::<_, FeedFollow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(follows)
    }

    /// Creates a feed owned by `user` and follows it, in one transaction.
    pub async fn add_feed(&self, user: &User, name: &str, url: &str) -> anyhow::Result<(Feed, FeedFollow)> {
        let mut tx = self.pool.begin().await?;
        let feed = insert_feed(&mut *tx, user.id, name, url).await?;
        let follow = insert_feed_follow(&mut *tx, user.id, feed.id).await?;
        tx.commit().await?;

        info!(user = %user.name, feed = %feed.name, url = %feed.url, "Added feed");
        Ok((feed, follow))
    }

    /// Follows the existing feed at `url`.
    pub async fn follow(&self, user: &User, url: &str) -> anyhow::Result<FeedFollow> {
        let feed = self
            .get_feed_by_url(url)
            .await?
            .ok_or_else(|| CommandError::FeedNotFound(url.to_string()))?;
        self.create_feed_follow(user.id, feed.id).await
    }

    /// Unfollows the feed at `url`; the flag is false if `user` wasn't following it.
    pub async fn unfollow(&self, user: &User, url: &str) -> anyhow::Result<(Feed, bool)> {
        let feed = self
            .get_feed_by_url(url)
            .await?
            .ok_or_else(|| CommandError::FeedNotFound(url.to_string()))?;
        let removed = self.delete_feed_follow(user.id, feed.id).await?;
        Ok((feed, removed))
    }
}

/// Inserts the row and reads it back with names, on the caller's connection so
/// it can take part in a wider transaction.
async fn insert_feed_follow(
    conn: &mut SqliteConnection,
    user_id: i64,
    feed_id: i64,
) -> anyhow::Result<FeedFollow> {
    let now = now();
    let result = sqlx::query(
        r#"
        INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(feed_id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await;

    let inserted = match result {
        Ok(inserted) => inserted,
        Err(e) if is_unique_violation(&e) => {
            let names: (String, String) = sqlx::query_as(
                "SELECT users.name, feeds.name FROM users, feeds WHERE users.id = ? AND feeds.id = ?",
            )
            .bind(user_id)
            .bind(feed_id)
            .fetch_one(&mut *conn)
            .await?;
            return Err(CommandError::AlreadyFollowing {
                user: names.0,
                feed: names.1,
            }
            .into());
        }
        Err(e) => return Err(e.into()),
    };

    let sql = format!("{} WHERE feed_follows.id = ?", SELECT_FEED_FOLLOW);
    let follow = sqlx::query_as::<_, FeedFollow>(&sql)
        .bind(inserted.last_insert_rowid())
        .fetch_one(&mut *conn)
        .await?;
    Ok(follow)
}
