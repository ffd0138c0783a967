use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, SqliteConnection, SqlitePool,
};
use tracing::debug;

use crate::error::{is_unique_violation, CommandError};

#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub created_at: String,
    pub updated_at: String,
    pub last_fetched_at: Option<String>,
}

/// A feed together with the name of the user who added it.
#[derive(Debug, Clone, FromRow)]
pub struct FeedWithCreator {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub feed_name: String,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<String>,
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

/// One process-wide connection. SQLite in-memory databases live and die with
/// their connection, so the pool never recycles it.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_fetched_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, feed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                description TEXT,
                published_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes every row in every table. Only meant for development.
    pub async fn reset(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["posts", "feed_follows", "feeds", "users"] {
            let result = sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
            debug!(table, rows = result.rows_affected(), "Cleared table");
        }
        tx.commit().await?;
        Ok(())
    }

    // Users

    pub async fn create_user(&self, name: &str) -> anyhow::Result<User> {
        let now = now();
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING id, name, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(e) if is_unique_violation(&e) => {
                Err(CommandError::UserAlreadyExists(name.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_user(&self, name: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    // Feeds

    pub async fn create_feed(&self, user_id: i64, name: &str, url: &str) -> anyhow::Result<Feed> {
        let mut conn = self.pool.acquire().await?;
        insert_feed(&mut *conn, user_id, name, url).await
    }

    pub async fn list_feeds(&self) -> anyhow::Result<Vec<FeedWithCreator>> {
        let feeds = sqlx::query_as::<_, FeedWithCreator>(
            r#"
            SELECT feeds.id, feeds.name, feeds.url, users.name AS user_name
            FROM feeds
            JOIN users ON users.id = feeds.user_id
            ORDER BY feeds.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn mark_feed_fetched(&self, feed_id: i64) -> anyhow::Result<()> {
        let now = now();
        sqlx::query("UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The feed fetched longest ago; feeds never fetched come first.
    pub async fn get_next_feed_to_fetch(&self) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    // Posts

    /// Returns `false` when a post with the same url is already stored.
    pub async fn create_post(
        &self,
        feed_id: i64,
        title: &str,
        url: &str,
        description: Option<&str>,
        published_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let now = now();
        let published_str = published_at.map(|p| p.to_rfc3339());

        let result = sqlx::query(
            r#"
            INSERT INTO posts (feed_id, title, url, description, published_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(feed_id)
        .bind(title)
        .bind(url)
        .bind(description)
        .bind(published_str)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Newest posts from the feeds `user_id` follows.
    pub async fn get_posts_for_user(&self, user_id: i64, limit: i64) -> anyhow::Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT posts.id, posts.feed_id, feeds.name AS feed_name, posts.title,
                   posts.url, posts.description, posts.published_at
            FROM posts
            JOIN feed_follows ON feed_follows.feed_id = posts.feed_id
            JOIN feeds ON feeds.id = posts.feed_id
            WHERE feed_follows.user_id = ?
            ORDER BY posts.published_at DESC NULLS LAST, posts.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}

pub(crate) async fn insert_feed(
    conn: &mut SqliteConnection,
    user_id: i64,
    name: &str,
    url: &str,
) -> anyhow::Result<Feed> {
    let now = now();
    let result = sqlx::query_as::<_, Feed>(
        r#"
        INSERT INTO feeds (name, url, user_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, name, url, user_id, created_at, updated_at, last_fetched_at
        "#,
    )
    .bind(name)
    .bind(url)
    .bind(user_id)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(feed) => Ok(feed),
        Err(e) if is_unique_violation(&e) => {
            Err(CommandError::FeedAlreadyExists(url.to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) async fn create_test_db() -> Database {
    let db = Database::new("sqlite::memory:").await.unwrap();
    db.initialize().await.unwrap();
    db
}
