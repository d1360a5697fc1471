//! Canonical event model
//!
//! One `CanonicalEvent` is produced per decoded source line, regardless of which
//! protocol (DNS, HTTP, SMTP, ...) or producer version wrote it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw source record: an arbitrary JSON object as written by the producer
pub type RawEvent = Map<String, Value>;

/// A raw HTTP request split into its parts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedHttp {
    /// Request method (first token of the request line)
    pub method: String,

    /// Request target (second token of the request line)
    pub path: String,

    /// Header names with original casing; later duplicates overwrite earlier ones
    pub headers: BTreeMap<String, String>,

    /// Everything after the first blank line
    pub body: String,
}

impl ParsedHttp {
    /// Look up a header value ignoring name casing
    ///
    /// An exact-case match wins over a case-insensitive one.
    pub fn header(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.headers.get(name) {
            return Some(value.as_str());
        }
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// DNS query details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQuery {
    pub qname: String,
    pub qtype: String,
}

/// The normalized representation of one captured interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Uppercased protocol name, empty if unknown
    pub protocol: String,

    /// Seconds since the Unix epoch
    pub timestamp: u64,

    /// Originating address, empty if unresolved
    pub source: String,

    /// Interaction id / domain that was hit, empty if unresolved
    pub host: String,

    /// Present only when the raw record carried a query name or type
    pub dns: Option<DnsQuery>,

    /// Present only when the raw record carried a parseable request blob
    pub http: Option<ParsedHttp>,

    /// The original request blob
    pub raw: Option<String>,
}
