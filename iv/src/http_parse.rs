//! Raw HTTP request splitting
//!
//! Interaction logs carry the captured request as one opaque text blob. This
//! splits it into request line, headers and body without validating anything.

use crate::event::ParsedHttp;

/// Split a raw request blob into method, path, headers and body
///
/// Returns `None` for an empty blob or one with no head section. Never fails:
/// header lines without a colon are ignored and missing request-line tokens
/// become empty strings.
pub fn parse_raw_request(raw: &str) -> Option<ParsedHttp> {
    if raw.is_empty() {
        return None;
    }

    let normalized = raw.replace("\r\n", "\n");
    let (head, body) = match normalized.split_once("\n\n") {
        Some((head, body)) => (head, body),
        None => (normalized.as_str(), ""),
    };

    let mut lines = head.lines();
    let request_line = lines.next()?;

    let mut tokens = request_line.split_whitespace();
    let method = tokens.next().unwrap_or_default().to_string();
    let path = tokens.next().unwrap_or_default().to_string();

    let mut parsed = ParsedHttp {
        method,
        path,
        body: body.to_string(),
        ..Default::default()
    };

    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            parsed.headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Some(parsed)
}
