//! Field normalization across producer schemas
//!
//! Producers disagree on field names (`remote_address` vs `remote-address`,
//! `qname` vs `query_name`, ...). Each canonical attribute has an ordered table
//! of candidate fields; the first present, non-empty candidate wins.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

use crate::event::{CanonicalEvent, DnsQuery, ParsedHttp, RawEvent};
use crate::http_parse::parse_raw_request;

/// Numeric timestamps at or above this are epoch milliseconds, below it epoch seconds.
///
/// 10^12 seconds is roughly the year 33658, so no plausible second-epoch reaches it,
/// while every millisecond-epoch after September 2001 does. Fixed, not configurable.
pub const MILLIS_THRESHOLD: f64 = 1e12;

const PROTOCOL_FIELDS: &[&str] = &["protocol", "type"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "time"];
const RAW_REQUEST_FIELDS: &[&str] = &["raw-request", "request"];
const SOURCE_FIELDS: &[&str] = &["remote_address", "remote_addr", "remote-address", "source"];
const SOURCE_HEADERS: &[&str] = &["X-Forwarded-For", "X-Real-IP"];
const HOST_FIELDS: &[&str] = &["host", "full-id", "domain"];
const HOST_HEADERS: &[&str] = &["Host"];
const QNAME_FIELDS: &[&str] = &["qname", "query_name"];
const QTYPE_FIELDS: &[&str] = &["qtype", "query_type"];

/// Current wall-clock time in epoch seconds
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// First candidate field that is present and non-empty
fn first_present<'a>(raw: &'a RawEvent, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().filter_map(|field| raw.get(*field)).find(|value| is_truthy(value))
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn first_text(raw: &RawEvent, fields: &[&str]) -> String {
    first_present(raw, fields).map(to_text).unwrap_or_default()
}

fn first_header(http: Option<&ParsedHttp>, names: &[&str]) -> String {
    let Some(http) = http else {
        return String::new();
    };
    names
        .iter()
        .filter_map(|name| http.header(name))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Host as recorded in the raw fields only, ignoring request headers
pub fn raw_host(raw: &RawEvent) -> String {
    first_text(raw, HOST_FIELDS)
}

/// The raw request blob carried by the record, if any
pub fn raw_request(raw: &RawEvent) -> Option<String> {
    first_present(raw, RAW_REQUEST_FIELDS).map(to_text)
}

fn epoch_from_number(n: f64) -> Option<u64> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    let secs = if n >= MILLIS_THRESHOLD { n / 1000.0 } else { n };
    Some(secs as u64)
}

fn epoch_from_iso(s: &str) -> Option<u64> {
    let s = s.trim();
    let with_offset = s.strip_suffix('Z').map(|rest| format!("{rest}+00:00"));
    let candidate = with_offset.as_deref().unwrap_or(s);

    let secs = if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
        dt.timestamp()
    } else if let Ok(dt) = DateTime::parse_from_str(candidate, "%Y-%m-%d %H:%M:%S%.f%:z") {
        dt.timestamp()
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, "%Y-%m-%dT%H:%M:%S%.f") {
        naive.and_utc().timestamp()
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, "%Y-%m-%d %H:%M:%S%.f") {
        naive.and_utc().timestamp()
    } else if let Ok(date) = NaiveDate::parse_from_str(candidate, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)?.and_utc().timestamp()
    } else {
        return None;
    };

    u64::try_from(secs).ok()
}

/// Resolve a raw timestamp value to epoch seconds
///
/// Numbers use the millisecond/second threshold. Strings are tried as ISO-8601
/// first (naive times are read as UTC), then as numbers. Anything else, including
/// negative or non-finite values, falls back to `now`.
pub fn normalize_timestamp(value: Option<&Value>, now: u64) -> u64 {
    let resolved = match value {
        Some(Value::Number(n)) => n.as_f64().and_then(epoch_from_number),
        Some(Value::String(s)) => epoch_from_iso(s).or_else(|| s.trim().parse::<f64>().ok().and_then(epoch_from_number)),
        _ => None,
    };
    resolved.unwrap_or(now)
}

/// Build the canonical event for one raw record
///
/// Never fails: unresolvable attributes become empty strings or absent sections.
pub fn normalize(raw: &RawEvent, http: Option<ParsedHttp>) -> CanonicalEvent {
    normalize_at(raw, http, now_epoch_secs())
}

/// Same as [`normalize`] with an explicit fallback clock
pub fn normalize_at(raw: &RawEvent, http: Option<ParsedHttp>, now: u64) -> CanonicalEvent {
    let protocol = first_text(raw, PROTOCOL_FIELDS).to_uppercase();
    let timestamp = normalize_timestamp(first_present(raw, TIMESTAMP_FIELDS), now);

    let mut source = first_text(raw, SOURCE_FIELDS);
    if source.is_empty() {
        source = first_header(http.as_ref(), SOURCE_HEADERS);
    }

    let mut host = first_text(raw, HOST_FIELDS);
    if host.is_empty() {
        host = first_header(http.as_ref(), HOST_HEADERS);
    }

    let qname = first_text(raw, QNAME_FIELDS);
    let qtype = first_text(raw, QTYPE_FIELDS);
    let dns = (!qname.is_empty() || !qtype.is_empty()).then_some(DnsQuery { qname, qtype });

    CanonicalEvent {
        protocol,
        timestamp,
        source,
        host,
        dns,
        http,
        raw: raw_request(raw),
    }
}

/// Decode one source line and normalize it
///
/// Returns `None` for blank lines and anything that is not a JSON object.
pub fn parse_line(line: &str) -> Option<CanonicalEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let raw: RawEvent = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, len = line.len(), "parse_line: skipping undecodable line");
            return None;
        }
    };

    let http = raw_request(&raw).and_then(|blob| parse_raw_request(&blob));
    Some(normalize(&raw, http))
}
