//! Payload identifier matching

use std::path::Path;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::cache::EventCache;
use crate::config::ProducerConfig;
use crate::event::RawEvent;
use crate::normalize::raw_host;

/// Trailing source-file lines searched by the status fallback
pub const FALLBACK_SCAN_LINES: usize = 400;

/// Case-insensitive patterns for payload identifiers
#[derive(Debug, Clone)]
pub struct PayloadMatcher {
    pattern: Regex,
    host_pattern: Regex,
}

impl PayloadMatcher {
    pub fn new(pattern: &str, host_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            host_pattern: RegexBuilder::new(host_pattern).case_insensitive(true).build()?,
        })
    }

    pub fn from_config(config: &ProducerConfig) -> Result<Self, regex::Error> {
        Self::new(&config.payload_pattern, &config.payload_host_pattern)
    }

    /// First identifier in a producer log line: capture group 1, else the whole match
    pub fn find(&self, line: &str) -> Option<String> {
        let captures = self.pattern.captures(line)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().to_string())
    }

    /// Whether an event host looks like a payload identifier
    pub fn is_payload_host(&self, host: &str) -> bool {
        !host.is_empty() && self.host_pattern.is_match(host)
    }

    /// Best-effort payload from recorded events
    ///
    /// Searches the cache newest-first, then the last [`FALLBACK_SCAN_LINES`]
    /// lines of the source file newest-first.
    pub async fn scan(&self, cache: &EventCache, source_file: &Path) -> Option<String> {
        if let Some(event) = cache.find_newest(|event| self.is_payload_host(&event.host)) {
            debug!(host = %event.host, "PayloadMatcher::scan: found in cache");
            return Some(event.host);
        }

        let bytes = tokio::fs::read(source_file).await.ok()?;
        let content = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(FALLBACK_SCAN_LINES);

        let found = lines[start..]
            .iter()
            .rev()
            .filter_map(|line| serde_json::from_str::<RawEvent>(line).ok())
            .map(|raw| raw_host(&raw))
            .find(|host| self.is_payload_host(host));
        debug!(?found, "PayloadMatcher::scan: searched source file");
        found
    }
}
