//! Static registry of the NYCT subway GTFS-RT feeds.
//!
//! Each feed covers a fixed set of line codes; callers request lines and the
//! registry resolves them to the minimal set of feeds. The registry is an
//! explicit value constructed at startup, not ambient state.

use std::collections::BTreeSet;

use thiserror::Error;

/// One named real-time data source and the line codes it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub id: String,
    pub endpoint: String,
    pub lines: BTreeSet<String>,
}

impl FeedDescriptor {
    fn new(id: &str, endpoint: &str, lines: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn carries_line(&self, line: &str) -> bool {
        self.lines.contains(line)
    }
}

/// Caller mistakes detected before any network activity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown subway line: {0}")]
    UnknownLine(String),
    #[error("unknown feed id: {0}")]
    UnknownFeed(String),
    #[error("no lines or feeds requested")]
    EmptySelection,
}

/// Immutable mapping from feed id to endpoint and line set.
#[derive(Debug, Clone)]
pub struct FeedRegistry {
    feeds: Vec<FeedDescriptor>,
}

const MTA_BASE: &str = "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds";

impl FeedRegistry {
    /// The eight NYCT subway feeds. No API key is required by the provider.
    pub fn nyct() -> Self {
        let feeds = vec![
            FeedDescriptor::new(
                "ace",
                &format!("{MTA_BASE}/nyct%2Fgtfs-ace"),
                &["A", "C", "E", "H", "FS"],
            ),
            FeedDescriptor::new(
                "bdfm",
                &format!("{MTA_BASE}/nyct%2Fgtfs-bdfm"),
                &["B", "D", "F", "M"],
            ),
            FeedDescriptor::new("g", &format!("{MTA_BASE}/nyct%2Fgtfs-g"), &["G"]),
            FeedDescriptor::new("jz", &format!("{MTA_BASE}/nyct%2Fgtfs-jz"), &["J", "Z"]),
            FeedDescriptor::new(
                "nqrw",
                &format!("{MTA_BASE}/nyct%2Fgtfs-nqrw"),
                &["N", "Q", "R", "W"],
            ),
            FeedDescriptor::new("l", &format!("{MTA_BASE}/nyct%2Fgtfs-l"), &["L"]),
            FeedDescriptor::new(
                "123456",
                &format!("{MTA_BASE}/nyct%2Fgtfs"),
                &["1", "2", "3", "4", "5", "6", "7", "S"],
            ),
            FeedDescriptor::new("sir", &format!("{MTA_BASE}/nyct%2Fgtfs-si"), &["SIR"]),
        ];
        Self { feeds }
    }

    /// Build a registry from explicit descriptors (used by tests to point
    /// feeds at mock endpoints).
    pub fn from_descriptors(feeds: Vec<FeedDescriptor>) -> Self {
        Self { feeds }
    }

    pub fn all(&self) -> &[FeedDescriptor] {
        &self.feeds
    }

    pub fn get(&self, feed_id: &str) -> Option<&FeedDescriptor> {
        self.feeds.iter().find(|f| f.id == feed_id)
    }

    /// Resolves line codes to the minimal set of feeds covering them.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::UnknownLine`] for any code no feed carries;
    /// nothing is resolved partially.
    pub fn resolve_lines(&self, lines: &[String]) -> Result<Vec<&FeedDescriptor>, InputError> {
        if lines.is_empty() {
            return Err(InputError::EmptySelection);
        }

        let mut needed: BTreeSet<&str> = BTreeSet::new();
        for line in lines {
            let feed = self
                .feeds
                .iter()
                .find(|f| f.carries_line(line))
                .ok_or_else(|| InputError::UnknownLine(line.clone()))?;
            needed.insert(feed.id.as_str());
        }

        Ok(self
            .feeds
            .iter()
            .filter(|f| needed.contains(f.id.as_str()))
            .collect())
    }

    /// Resolves explicit feed ids, rejecting unknown ones.
    pub fn resolve_feeds(&self, feed_ids: &[String]) -> Result<Vec<&FeedDescriptor>, InputError> {
        if feed_ids.is_empty() {
            return Err(InputError::EmptySelection);
        }

        let mut resolved = Vec::new();
        for id in feed_ids {
            let feed = self
                .get(id)
                .ok_or_else(|| InputError::UnknownFeed(id.clone()))?;
            if !resolved.iter().any(|f: &&FeedDescriptor| f.id == feed.id) {
                resolved.push(feed);
            }
        }
        Ok(resolved)
    }
}
