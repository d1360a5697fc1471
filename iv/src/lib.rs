//! Interactview - live viewer for out-of-band interaction logs
//!
//! An external producer (interactsh-client, in a container or as a child
//! process) appends one JSON object per captured interaction to a source file.
//! Interactview tails that file, normalizes every record into a
//! [`CanonicalEvent`], keeps a bounded cache of recent events, pushes new events
//! to any number of live subscribers, and supervises the producer itself.
//!
//! # Modules
//!
//! - [`http_parse`] - Raw HTTP request splitting
//! - [`normalize`] - Raw record to canonical event
//! - [`cache`] - Bounded event cache and warm-up
//! - [`tail`] - Tailing cursors and the ingestion task
//! - [`broadcast`] - Per-subscriber live frames with keep-alive
//! - [`runtime`] - Producer runtime capability interface
//! - [`supervisor`] - Producer lifecycle and payload discovery
//! - [`server`] - HTTP routes
//! - [`client`] - Client for a running server
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod broadcast;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod http_parse;
pub mod normalize;
pub mod runtime;
pub mod server;
pub mod supervisor;
pub mod tail;

// Re-export commonly used types
pub use broadcast::{Frame, Subscription, SubscriptionOptions};
pub use cache::EventCache;
pub use config::Config;
pub use error::SupervisorError;
pub use event::{CanonicalEvent, DnsQuery, ParsedHttp, RawEvent};
pub use runtime::{CommandOutcome, ProducerRuntime};
pub use supervisor::{StartOptions, StartOutcome, StatusReport, Supervisor};
pub use tail::{Tailer, spawn_ingest};
