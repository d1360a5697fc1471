//! Live broadcast channel
//!
//! Every subscriber gets its own [`Subscription`]: a fresh tailing cursor plus a
//! keep-alive timer. Frames are either one event or a keep-alive comment; the
//! keep-alive fires when nothing of either kind was emitted for the interval.
//! Dropping the subscription releases the cursor and its file handle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::cache::EventCache;
use crate::event::CanonicalEvent;
use crate::tail::Tailer;

/// Default idle interval before a keep-alive frame is emitted
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Comment text carried by keep-alive frames
pub const KEEPALIVE_COMMENT: &str = "ping";

/// One message pushed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event(CanonicalEvent),
    KeepAlive,
}

/// Settings shared by all subscriptions
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionOptions {
    pub keepalive: Duration,
    pub poll_interval: Duration,
    pub writes_cache: bool,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            keepalive: DEFAULT_KEEPALIVE,
            poll_interval: crate::tail::DEFAULT_POLL_INTERVAL,
            writes_cache: false,
        }
    }
}

/// One subscriber's view of the live stream
pub struct Subscription {
    id: Uuid,
    tailer: Tailer,
    keepalive: Duration,
    last_emit: Instant,
}

impl Subscription {
    /// Attach a fresh cursor at the current end of `path`
    pub async fn attach(path: &Path, cache: Arc<EventCache>, options: SubscriptionOptions) -> std::io::Result<Self> {
        let tailer = Tailer::attach(path, cache, options.writes_cache, options.poll_interval).await?;
        let id = Uuid::now_v7();
        debug!(%id, ?path, "Subscriber attached");
        Ok(Self {
            id,
            tailer,
            keepalive: options.keepalive,
            last_emit: Instant::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next frame
    ///
    /// Returns an event as soon as one is read, or a keep-alive once the interval
    /// since the last emitted frame has elapsed.
    pub async fn next_frame(&mut self) -> Frame {
        let deadline = self.last_emit + self.keepalive;
        let frame = tokio::select! {
            event = self.tailer.next_event() => Frame::Event(event),
            _ = tokio::time::sleep_until(deadline) => Frame::KeepAlive,
        };
        self.last_emit = Instant::now();
        frame
    }

    /// Endless stream of frames; ends only when dropped
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let frame = subscription.next_frame().await;
            Some((frame, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(id = %self.id, path = ?self.tailer.path(), "Subscriber detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;
    use tempfile::TempDir;

    fn options(keepalive: Duration) -> SubscriptionOptions {
        SubscriptionOptions {
            keepalive,
            poll_interval: Duration::from_millis(20),
            writes_cache: true,
        }
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_event_frames_are_delivered() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let mut sub = Subscription::attach(&path, cache, options(Duration::from_secs(15)))
            .await
            .unwrap();
        append(&path, "{\"protocol\":\"http\"}\n");

        let frame = tokio::time::timeout(Duration::from_secs(5), sub.next_frame()).await.unwrap();
        match frame {
            Frame::Event(event) => assert_eq!(event.protocol, "HTTP"),
            Frame::KeepAlive => panic!("expected an event frame"),
        }
    }

    #[tokio::test]
    async fn test_keepalive_when_idle() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let sub = Subscription::attach(&path, cache, options(Duration::from_millis(150)))
            .await
            .unwrap();
        let mut stream = Box::pin(sub.into_stream());

        let first = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap();
        assert_eq!(first, Some(Frame::KeepAlive));

        append(&path, "{\"protocol\":\"dns\"}\n");
        let mut saw_event = false;
        for _ in 0..10 {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap();
            if let Frame::Event(event) = frame {
                assert_eq!(event.protocol, "DNS");
                saw_event = true;
                break;
            }
        }
        assert!(saw_event);
    }

    #[tokio::test]
    async fn test_subscribers_are_independent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let mut early = Subscription::attach(&path, cache.clone(), options(Duration::from_secs(15)))
            .await
            .unwrap();
        append(&path, "{\"timestamp\":1}\n");

        let mut late = Subscription::attach(&path, cache.clone(), options(Duration::from_secs(15)))
            .await
            .unwrap();
        append(&path, "{\"timestamp\":2}\n");

        let first = tokio::time::timeout(Duration::from_secs(5), early.next_frame()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), early.next_frame()).await.unwrap();
        let only = tokio::time::timeout(Duration::from_secs(5), late.next_frame()).await.unwrap();

        assert!(matches!(first, Frame::Event(ref e) if e.timestamp == 1));
        assert!(matches!(second, Frame::Event(ref e) if e.timestamp == 2));
        assert!(matches!(only, Frame::Event(ref e) if e.timestamp == 2));
        assert_ne!(early.id(), late.id());
    }
}
