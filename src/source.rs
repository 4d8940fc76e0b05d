//! Magnet locator validation
//!
//! Only the syntactic shape is checked here; whether the swarm can actually produce
//! metadata is the transfer adapter's business.

use crate::error::{Error, Result};
use url::Url;

/// A syntactically valid magnet URI
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocator {
    raw: String,
    info_hash: String,
    display_name: Option<String>,
    trackers: Vec<String>,
}

impl SourceLocator {
    /// Parse and validate a magnet URI
    ///
    /// Accepts `urn:btih:` topics with a 40-character hex or 32-character base32 hash,
    /// and `urn:btmh:` (BitTorrent v2) multihash topics.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(Error::InvalidSource("source is empty".to_string()));
        }

        let url = Url::parse(raw)
            .map_err(|e| Error::InvalidSource(format!("not a URI ({e}): {raw}")))?;
        if url.scheme() != "magnet" {
            return Err(Error::InvalidSource(format!(
                "expected a magnet URI, got scheme '{}'",
                url.scheme()
            )));
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" if info_hash.is_none() => info_hash = parse_topic(&value),
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| {
            Error::InvalidSource("magnet URI has no valid 'xt' info-hash topic".to_string())
        })?;

        Ok(Self {
            raw: raw.to_string(),
            info_hash,
            display_name,
            trackers,
        })
    }

    /// The URI as submitted (trimmed)
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Info-hash from the exact topic, lower-cased
    pub fn info_hash(&self) -> &str {
        &self.info_hash
    }

    /// Display name hint (`dn`), if present
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Tracker URLs (`tr`), in URI order
    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }
}

fn parse_topic(topic: &str) -> Option<String> {
    if let Some(hash) = topic.strip_prefix("urn:btih:") {
        let valid = match hash.len() {
            40 => hash.chars().all(|c| c.is_ascii_hexdigit()),
            32 => hash
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_lowercase() || ('2'..='7').contains(&c)),
            _ => false,
        };
        return valid.then(|| hash.to_ascii_lowercase());
    }
    if let Some(hash) = topic.strip_prefix("urn:btmh:") {
        let valid = hash.len() >= 4 && hash.chars().all(|c| c.is_ascii_hexdigit());
        return valid.then(|| hash.to_ascii_lowercase());
    }
    None
}
