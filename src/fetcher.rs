use std::borrow::Cow;

use anyhow::Context;
use chrono::{DateTime, Utc};
use feed_rs::model::Text;
use feed_rs::parser;
use quick_xml::escape::resolve_html5_entity;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{Database, Feed};

/// The feed `gator agg` prints when no url is given.
pub const DEMO_FEED_URL: &str = "https://www.wagslane.dev/index.xml";

const USER_AGENT: &str = "gator";

// Longest entity name we try to resolve ("CounterClockwiseContourIntegral" is 31).
const MAX_ENTITY_LEN: usize = 32;

/// What `&#128;` through `&#159;` stand for: Windows-1252, not the C1 controls.
const WINDOWS_1252_C1: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Entity names HTML5 still accepts without a trailing `;`.
const LEGACY_ENTITIES: &[&str] = &[
    "AElig", "AMP", "Aacute", "Acirc", "Agrave", "Aring", "Atilde", "Auml", "COPY", "Ccedil",
    "ETH", "Eacute", "Ecirc", "Egrave", "Euml", "GT", "Iacute", "Icirc", "Igrave", "Iuml", "LT",
    "Ntilde", "Oacute", "Ocirc", "Ograve", "Oslash", "Otilde", "Ouml", "QUOT", "REG", "THORN",
    "Uacute", "Ucirc", "Ugrave", "Uuml", "Yacute", "aacute", "acirc", "acute", "aelig", "agrave",
    "amp", "aring", "atilde", "auml", "brvbar", "ccedil", "cedil", "cent", "copy", "curren", "deg",
    "divide", "eacute", "ecirc", "egrave", "eth", "euml", "frac12", "frac14", "frac34", "gt",
    "iacute", "icirc", "iexcl", "igrave", "iquest", "iuml", "laquo", "lt", "macr", "micro",
    "middot", "nbsp", "not", "ntilde", "oacute", "ocirc", "ograve", "ordf", "ordm", "oslash",
    "otilde", "ouml", "para", "plusmn", "pound", "quot", "raquo", "reg", "sect", "shy", "sup1",
    "sup2", "sup3", "szlig", "thorn", "times", "uacute", "ucirc", "ugrave", "uml", "uuml",
    "yacute", "yen", "yuml",
];

#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection failure or a non-2xx response
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("could not parse feed: {0}")]
    Parse(#[from] parser::ParseFeedError),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RssFeed {
    pub channel: Channel,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: Option<DateTime<Utc>>,
}

/// Outcome of one scrape cycle.
#[derive(Debug)]
pub struct ScrapeReport {
    pub feed: Feed,
    pub items: usize,
    pub inserted: usize,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// No request timeout is set; callers bound the wait by dropping the future.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    pub async fn fetch_feed(&self, url: &str) -> Result<RssFeed, FetchError> {
        info!(url, "Fetching feed");

        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let feed = parse_feed(&bytes)?;

        debug!(url, items = feed.channel.items.len(), "Parsed feed");
        Ok(feed)
    }

    /// Fetches the stalest feed and stores its items as posts.
    ///
    /// Returns `None` when there are no feeds. The feed is marked fetched
    /// before the request goes out, so a feed that keeps failing still moves to
    /// the back of the queue.
    pub async fn scrape_next_feed(&self, db: &Database) -> anyhow::Result<Option<ScrapeReport>> {
        let Some(feed) = db.get_next_feed_to_fetch().await? else {
            return Ok(None);
        };

        db.mark_feed_fetched(feed.id).await?;
        self.scrape_feed(db, feed).await.map(Some)
    }

    async fn scrape_feed(&self, db: &Database, feed: Feed) -> anyhow::Result<ScrapeReport> {
        let content = self
            .fetch_feed(&feed.url)
            .await
            .with_context(|| format!("failed to fetch feed '{}'", feed.name))?;

        let items = content.channel.items.len();
        let mut inserted = 0;
        for item in content.channel.items {
            if item.link.is_empty() {
                warn!(feed = %feed.name, title = %item.title, "Skipping item with no link");
                continue;
            }

            let title = if item.title.is_empty() {
                "Untitled"
            } else {
                item.title.as_str()
            };
            let description = Some(item.description.as_str()).filter(|d| !d.is_empty());

            if db
                .create_post(feed.id, title, &item.link, description, item.pub_date)
                .await?
            {
                inserted += 1;
            }
        }

        info!(feed = %feed.name, items, inserted, "Scraped feed");
        Ok(ScrapeReport {
            feed,
            items,
            inserted,
        })
    }
}

/// Parses RSS or Atom into a channel and its items, in document order.
pub fn parse_feed(bytes: &[u8]) -> Result<RssFeed, FetchError> {
    let parsed = parser::parse(bytes)?;

    let items = parsed
        .entries
        .into_iter()
        .map(|entry| {
            let description = match entry.summary {
                Some(summary) => text_content(Some(summary)),
                None => entry
                    .content
                    .and_then(|c| c.body)
                    .map(|body| unescape_html(&body).into_owned())
                    .unwrap_or_default(),
            };

            RssItem {
                title: text_content(entry.title),
                link: entry.links.first().map(|l| l.href.clone()).unwrap_or_default(),
                description,
                pub_date: entry.published.or(entry.updated),
            }
        })
        .collect();

    Ok(RssFeed {
        channel: Channel {
            title: text_content(parsed.title),
            link: parsed.links.first().map(|l| l.href.clone()).unwrap_or_default(),
            description: text_content(parsed.description),
            items,
        },
    })
}

fn text_content(text: Option<Text>) -> String {
    text.map(|t| unescape_html(&t.content).into_owned())
        .unwrap_or_default()
}

/// Decodes HTML character references (`&amp;`, `&eacute;`, `&#39;`, `&#x2014;`).
///
/// Feed text arrives already XML-decoded once, so this is the second pass that
/// catches double-encoded upstream content. Numeric references follow the
/// HTML5 rules and the legacy names (`&amp`, `&lt`, `&copy`...) resolve without
/// a trailing `;`. Anything else is kept as written.
pub fn unescape_html(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        let consumed = match after.strip_prefix('#') {
            Some(number) => decode_numeric(number, &mut out).map(|len| len + 1),
            None => decode_named(after, &mut out),
        };

        match consumed {
            Some(len) => rest = &after[len..],
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

/// Returns how many bytes of `number` (the text after `&#`) were decoded.
fn decode_numeric(number: &str, out: &mut String) -> Option<usize> {
    let (radix, prefix) = match number.as_bytes().first() {
        Some(b'x' | b'X') => (16, 1),
        _ => (10, 0),
    };

    let body = &number[prefix..];
    let digits = body
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(body.len());
    if digits == 0 {
        return None;
    }

    let code = body[..digits]
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0u32, |acc, d| acc.saturating_mul(radix).saturating_add(d));
    out.push(numeric_char(code));

    let mut len = prefix + digits;
    if body[digits..].starts_with(';') {
        len += 1;
    }
    Some(len)
}

fn numeric_char(code: u32) -> char {
    match code {
        0 => char::REPLACEMENT_CHARACTER,
        0x80..=0x9F => WINDOWS_1252_C1[(code - 0x80) as usize],
        // surrogates and anything past U+10FFFF
        _ => char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER),
    }
}

/// Returns how many bytes of `after` (the text after `&`) were decoded.
fn decode_named(after: &str, out: &mut String) -> Option<usize> {
    let len = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len())
        .min(MAX_ENTITY_LEN);
    let name = &after[..len];
    if name.is_empty() {
        return None;
    }

    if after[len..].starts_with(';') {
        if let Some(value) = resolve_html5_entity(name) {
            out.push_str(value);
            return Some(len + 1);
        }
    }

    // Longest legacy name that prefixes the run, e.g. `&notit;` is `¬it;`
    let legacy = (2..=len)
        .rev()
        .map(|end| &name[..end])
        .find(|prefix| LEGACY_ENTITIES.contains(prefix))?;
    let value = resolve_html5_entity(legacy)?;
    out.push_str(value);
    Some(legacy.len())
}
