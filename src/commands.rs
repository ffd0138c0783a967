use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::db::{Database, User};
use crate::error::CommandError;
use crate::fetcher::{Fetcher, DEMO_FEED_URL};

const FEEDS_BANNER: &str = "******** FEEDS ********";

#[derive(Parser, Debug)]
#[command(name = "gator", about = "A command-line RSS feed aggregator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// Delete every user, feed, follow and post
    Reset,
    /// List registered users
    Users,
    /// Add a feed and follow it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// Fetch a feed once and print it as JSON
    Agg {
        #[arg(default_value = DEMO_FEED_URL)]
        url: String,
    },
    /// List all feeds and who added them
    Feeds,
    /// Follow an existing feed by url
    Follow { url: String },
    /// List the feeds the current user follows
    Following,
    /// Stop following a feed by url
    Unfollow { url: String },
    /// Fetch the least recently fetched feed and store its posts
    Scrape,
    /// Show the newest posts from followed feeds
    Browse {
        #[arg(default_value_t = 2, value_parser = clap::value_parser!(i64).range(1..))]
        limit: i64,
    },
}

/// Everything a command needs: the database, the HTTP fetcher and the config
/// that names the current user.
pub struct App {
    db: Database,
    fetcher: Fetcher,
    config: Config,
    config_path: PathBuf,
}

impl App {
    pub fn new(db: Database, config: Config, config_path: PathBuf) -> anyhow::Result<Self> {
        Ok(Self {
            db,
            fetcher: Fetcher::new()?,
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run<W: Write>(&mut self, command: Command, out: &mut W) -> anyhow::Result<()> {
        match command {
            Command::Register { name } => self.register(&name, out).await,
            Command::Login { name } => self.login(&name, out).await,
            Command::Reset => self.reset(out).await,
            Command::Users => self.users(out).await,
            Command::Agg { url } => self.agg(&url, out).await,
            Command::Feeds => self.feeds(out).await,
            Command::Scrape => self.scrape(out).await,
            Command::AddFeed { name, url } => {
                let user = self.logged_in_user().await?;
                self.add_feed(&user, &name, &url, out).await
            }
            Command::Follow { url } => {
                let user = self.logged_in_user().await?;
                self.follow(&user, &url, out).await
            }
            Command::Following => {
                let user = self.logged_in_user().await?;
                self.following(&user, out).await
            }
            Command::Unfollow { url } => {
                let user = self.logged_in_user().await?;
                self.unfollow(&user, &url, out).await
            }
            Command::Browse { limit } => {
                let user = self.logged_in_user().await?;
                self.browse(&user, limit, out).await
            }
        }
    }

    /// Resolves the config's current user for the login-scoped commands.
    async fn logged_in_user(&self) -> anyhow::Result<User> {
        let name = self.config.current_user().ok_or(CommandError::NotLoggedIn)?;
        let user = self
            .db
            .get_user(name)
            .await?
            .ok_or_else(|| CommandError::UserNotFound(name.to_string()))?;
        Ok(user)
    }

    async fn register<W: Write>(&mut self, name: &str, out: &mut W) -> anyhow::Result<()> {
        if self.db.get_user(name).await?.is_some() {
            return Err(CommandError::UserAlreadyExists(name.to_string()).into());
        }

        let user = self.db.create_user(name).await?;
        self.config.set_user(&user.name, &self.config_path)?;

        writeln!(out, "User {} created and logged in", user.name)?;
        Ok(())
    }

    async fn login<W: Write>(&mut self, name: &str, out: &mut W) -> anyhow::Result<()> {
        if self.db.get_user(name).await?.is_none() {
            return Err(CommandError::UserNotFound(name.to_string()).into());
        }

        self.config.set_user(name, &self.config_path)?;

        writeln!(out, "Logged in as {}", name)?;
        Ok(())
    }

    async fn reset<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        self.db.reset().await?;
        writeln!(out, "Database reset")?;
        Ok(())
    }

    async fn users<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let users = self.db.list_users().await?;
        if users.is_empty() {
            writeln!(out, "No users registered yet")?;
            return Ok(());
        }

        for user in users {
            if self.config.current_user() == Some(user.name.as_str()) {
                writeln!(out, "* {} (current)", user.name)?;
            } else {
                writeln!(out, "* {}", user.name)?;
            }
        }
        Ok(())
    }

    async fn agg<W: Write>(&self, url: &str, out: &mut W) -> anyhow::Result<()> {
        let feed = self.fetcher.fetch_feed(url).await?;
        writeln!(out, "{}", serde_json::to_string_pretty(&feed)?)?;
        Ok(())
    }

    async fn feeds<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let feeds = self.db.list_feeds().await?;
        if feeds.is_empty() {
            writeln!(out, "No feeds available")?;
            return Ok(());
        }

        writeln!(out, "{}", FEEDS_BANNER)?;
        for (i, feed) in feeds.iter().enumerate() {
            if i > 0 {
                writeln!(out, "-------------------------")?;
            }
            writeln!(out, "Name: {}", feed.name)?;
            writeln!(out, "URL: {}", feed.url)?;
            writeln!(out, "Added by: {}", feed.user_name)?;
        }
        writeln!(out, "{}", FEEDS_BANNER)?;
        Ok(())
    }

    async fn scrape<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        match self.fetcher.scrape_next_feed(&self.db).await? {
            Some(report) => writeln!(
                out,
                "Scraped {}: {} items, {} new posts",
                report.feed.name, report.items, report.inserted
            )?,
            None => writeln!(out, "No feeds to scrape")?,
        }
        Ok(())
    }

    async fn add_feed<W: Write>(
        &self,
        user: &User,
        name: &str,
        url: &str,
        out: &mut W,
    ) -> anyhow::Result<()> {
        let (feed, follow) = self.db.add_feed(user, name, url).await?;

        writeln!(out, "Feed added:")?;
        writeln!(out, "  Name: {}", feed.name)?;
        writeln!(out, "  URL:  {}", feed.url)?;
        writeln!(out, "{} now follows {}", follow.user_name, follow.feed_name)?;
        Ok(())
    }

    async fn follow<W: Write>(&self, user: &User, url: &str, out: &mut W) -> anyhow::Result<()> {
        let follow = self.db.follow(user, url).await?;
        writeln!(out, "{} now follows {}", follow.user_name, follow.feed_name)?;
        Ok(())
    }

    async fn following<W: Write>(&self, user: &User, out: &mut W) -> anyhow::Result<()> {
        let follows = self.db.get_feed_follows_for_user(user.id).await?;
        if follows.is_empty() {
            writeln!(out, "{} isn't following any feeds", user.name)?;
            return Ok(());
        }

        writeln!(out, "{} is following:", user.name)?;
        for follow in follows {
            writeln!(out, "  - {}", follow.feed_name)?;
        }
        Ok(())
    }

    async fn unfollow<W: Write>(&self, user: &User, url: &str, out: &mut W) -> anyhow::Result<()> {
        let (feed, removed) = self.db.unfollow(user, url).await?;
        if removed {
            writeln!(out, "{} unfollowed {}", user.name, feed.name)?;
        } else {
            writeln!(out, "{} wasn't following {}", user.name, feed.name)?;
        }
        Ok(())
    }

    async fn browse<W: Write>(&self, user: &User, limit: i64, out: &mut W) -> anyhow::Result<()> {
        let posts = self.db.get_posts_for_user(user.id, limit).await?;
        if posts.is_empty() {
            writeln!(out, "No posts yet; run `gator scrape` to fetch some")?;
            return Ok(());
        }

        for post in posts {
            writeln!(out, "{} ({})", post.title, post.feed_name)?;
            writeln!(out, "  {}", post.url)?;
            if let Some(published) = &post.published_at {
                writeln!(out, "  published {}", published)?;
            }
            if let Some(description) = &post.description {
                writeln!(out, "  {}", description)?;
            }
        }
        Ok(())
    }
}
