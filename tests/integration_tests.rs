//! Integration tests for the gator RSS aggregator
//!
//! These tests drive the public API end to end: config file, file-backed
//! database, the follow graph and feed ingestion against a mock HTTP server.

mod common {
    use clap::Parser;
    use gator::commands::{App, Cli};
    use gator::config::Config;
    use gator::db::Database;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database url
    pub fn create_db_url(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}", db_path.display())
    }

    pub fn config_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join(".gatorconfig.json")
    }

    pub async fn open_db(temp_dir: &TempDir) -> Database {
        let db = Database::new(&create_db_url(temp_dir)).await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    /// Builds an app the way `main` does: config from disk, then the database it names.
    pub async fn open_app(temp_dir: &TempDir) -> App {
        let path = config_path(temp_dir);
        if !path.exists() {
            Config {
                db_url: create_db_url(temp_dir),
                current_user_name: String::new(),
            }
            .save(&path)
            .unwrap();
        }

        let config = Config::load(&path).unwrap();
        let db = Database::new(&config.db_url).await.unwrap();
        db.initialize().await.unwrap();
        App::new(db, config, path).unwrap()
    }

    pub async fn run(app: &mut App, args: &[&str]) -> anyhow::Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("gator").chain(args.iter().copied()))?;
        let mut out = Vec::new();
        app.run(cli.command, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }
}

mod database_integration_tests {
    use super::common::*;

    #[tokio::test]
    async fn test_database_persistence() {
        let temp_dir = create_temp_dir();

        {
            let db = open_db(&temp_dir).await;
            let user = db.create_user("kahya").await.unwrap();
            let (feed, _) = db
                .add_feed(&user, "Persistent Feed", "https://persistent.com/rss")
                .await
                .unwrap();
            db.create_post(
                feed.id,
                "Persistent Article",
                "https://persistent.com/article",
                None,
                None,
            )
            .await
            .unwrap();
        }

        // Reopen without reinitializing
        {
            let db = gator::db::Database::new(&create_db_url(&temp_dir)).await.unwrap();

            let user = db.get_user("kahya").await.unwrap().unwrap();
            let follows = db.get_feed_follows_for_user(user.id).await.unwrap();
            assert_eq!(follows.len(), 1);
            assert_eq!(follows[0].feed_name, "Persistent Feed");

            let posts = db.get_posts_for_user(user.id, 10).await.unwrap();
            assert_eq!(posts.len(), 1);
            assert_eq!(posts[0].title, "Persistent Article");
        }
    }

    #[tokio::test]
    async fn test_reset_clears_follow_graph() {
        let temp_dir = create_temp_dir();
        let db = open_db(&temp_dir).await;

        let owner = db.create_user("kahya").await.unwrap();
        let reader = db.create_user("holgith").await.unwrap();
        let (feed, _) = db
            .add_feed(&owner, "Owned", "https://owned.com/rss")
            .await
            .unwrap();
        db.follow(&reader, &feed.url).await.unwrap();

        db.reset().await.unwrap();

        assert!(db.list_users().await.unwrap().is_empty());
        assert!(db.list_feeds().await.unwrap().is_empty());
        assert!(db
            .get_feed_follows_for_user(reader.id)
            .await
            .unwrap()
            .is_empty());
    }
}

mod command_integration_tests {
    use super::common::*;
    use gator::config::Config;
    use gator::error::CommandError;

    #[tokio::test]
    async fn test_current_user_survives_restart() {
        let temp_dir = create_temp_dir();

        {
            let mut app = open_app(&temp_dir).await;
            run(&mut app, &["register", "kahya"]).await.unwrap();
            run(&mut app, &["addfeed", "Blog", "https://blog.example.com/rss"])
                .await
                .unwrap();
        }

        let saved = Config::load(config_path(&temp_dir)).unwrap();
        assert_eq!(saved.current_user_name, "kahya");

        let mut app = open_app(&temp_dir).await;
        let output = run(&mut app, &["following"]).await.unwrap();
        assert_eq!(output, "kahya is following:\n  - Blog\n");
    }

    #[tokio::test]
    async fn test_two_users_share_a_feed() {
        let temp_dir = create_temp_dir();
        let mut app = open_app(&temp_dir).await;

        run(&mut app, &["register", "kahya"]).await.unwrap();
        run(&mut app, &["addfeed", "Blog", "https://blog.example.com/rss"])
            .await
            .unwrap();
        run(&mut app, &["register", "holgith"]).await.unwrap();
        run(&mut app, &["follow", "https://blog.example.com/rss"])
            .await
            .unwrap();

        let err = run(&mut app, &["follow", "https://blog.example.com/rss"])
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CommandError>(),
            Some(&CommandError::AlreadyFollowing {
                user: "holgith".to_string(),
                feed: "Blog".to_string(),
            })
        );

        let err = run(&mut app, &["addfeed", "Dup", "https://blog.example.com/rss"])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CommandError>(),
            Some(CommandError::FeedAlreadyExists(_))
        ));

        let output = run(&mut app, &["feeds"]).await.unwrap();
        assert_eq!(output.matches("Name: ").count(), 1);
        assert!(!output.contains("Dup"));

        run(&mut app, &["login", "kahya"]).await.unwrap();
        let output = run(&mut app, &["users"]).await.unwrap();
        assert_eq!(output, "* kahya (current)\n* holgith\n");
    }

    #[tokio::test]
    async fn test_usage_errors() {
        let temp_dir = create_temp_dir();
        let mut app = open_app(&temp_dir).await;

        let err = run(&mut app, &["addfeed", "missing-url"]).await.unwrap_err();
        assert!(err.downcast_ref::<clap::Error>().is_some());
    }
}

mod ingestion_integration_tests {
    use super::common::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BLOG_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
    <channel>
        <title>Boot.dev Blog</title>
        <link>https://blog.example.com</link>
        <description>Articles &amp;amp; tutorials</description>
        <item>
            <title>Learn Rust &amp;amp; SQL</title>
            <link>https://blog.example.com/rust-sql</link>
            <description>Ownership, borrowing &amp;amp; queries</description>
            <pubDate>Tue, 10 Dec 2024 09:00:00 GMT</pubDate>
        </item>
        <item>
            <title>Why RSS</title>
            <link>https://blog.example.com/why-rss</link>
            <description>Because feeds are great</description>
            <pubDate>Mon, 09 Dec 2024 09:00:00 GMT</pubDate>
        </item>
    </channel>
</rss>
"#;

    async fn start_feed_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .and(header("User-Agent", "gator"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(BLOG_RSS)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_agg_prints_unescaped_json() {
        let server = start_feed_server().await;
        let temp_dir = create_temp_dir();
        let mut app = open_app(&temp_dir).await;

        let url = format!("{}/index.xml", server.uri());
        let output = run(&mut app, &["agg", &url]).await.unwrap();

        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        let items = json["channel"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(json["channel"]["description"], "Articles & tutorials");
        assert_eq!(items[0]["title"], "Learn Rust & SQL");
        assert_eq!(items[0]["description"], "Ownership, borrowing & queries");
    }

    #[tokio::test]
    async fn test_agg_does_not_store_posts() {
        let server = start_feed_server().await;
        let temp_dir = create_temp_dir();
        let mut app = open_app(&temp_dir).await;
        run(&mut app, &["register", "kahya"]).await.unwrap();

        let url = format!("{}/index.xml", server.uri());
        run(&mut app, &["addfeed", "Blog", &url]).await.unwrap();
        run(&mut app, &["agg", &url]).await.unwrap();

        let output = run(&mut app, &["browse"]).await.unwrap();
        assert!(output.starts_with("No posts yet"));
    }

    #[tokio::test]
    async fn test_agg_unreachable_feed_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let temp_dir = create_temp_dir();
        let mut app = open_app(&temp_dir).await;

        let url = format!("{}/index.xml", server.uri());
        let result = run(&mut app, &["agg", &url]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scrape_then_browse() {
        let server = start_feed_server().await;
        let temp_dir = create_temp_dir();
        let mut app = open_app(&temp_dir).await;
        run(&mut app, &["register", "kahya"]).await.unwrap();

        let url = format!("{}/index.xml", server.uri());
        run(&mut app, &["addfeed", "Blog", &url]).await.unwrap();

        let output = run(&mut app, &["scrape"]).await.unwrap();
        assert_eq!(output, "Scraped Blog: 2 items, 2 new posts\n");

        let output = run(&mut app, &["scrape"]).await.unwrap();
        assert_eq!(output, "Scraped Blog: 2 items, 0 new posts\n");

        let output = run(&mut app, &["browse", "1"]).await.unwrap();
        assert!(output.starts_with("Learn Rust & SQL (Blog)\n"));
        assert!(!output.contains("Why RSS"));

        let output = run(&mut app, &["browse"]).await.unwrap();
        assert!(output.contains("Why RSS (Blog)"));

        // A user who doesn't follow the feed sees nothing
        run(&mut app, &["register", "holgith"]).await.unwrap();
        let output = run(&mut app, &["browse"]).await.unwrap();
        assert!(output.starts_with("No posts yet"));
    }
}
