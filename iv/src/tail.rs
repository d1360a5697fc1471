//! Tailing reader over the append-only source file
//!
//! Each [`Tailer`] is an independent cursor: its own file handle, its own offset,
//! starting at the end of file as it was at attach time. Lines written before
//! attachment are never replayed through a cursor; warm-up covers history.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::EventCache;
use crate::event::CanonicalEvent;
use crate::normalize::parse_line;

/// Default idle delay between end-of-file checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Create the source file (and its directory) if absent
pub async fn ensure_source_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(())
}

/// An independent read cursor over the source file
pub struct Tailer {
    path: PathBuf,
    reader: BufReader<File>,
    cache: Arc<EventCache>,
    writes_cache: bool,
    poll_interval: Duration,
    pending: Vec<u8>,
    seen_generation: u64,
}

impl Tailer {
    /// Open `path` (creating it if absent) and position at its current end
    ///
    /// When `writes_cache` is set every delivered event is also appended to `cache`,
    /// and the cursor becomes the cache's live writer (warm-up stands down).
    /// The cache generation is consulted either way so lines read before a
    /// truncate are never delivered afterwards.
    pub async fn attach(
        path: impl AsRef<Path>,
        cache: Arc<EventCache>,
        writes_cache: bool,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, writes_cache, "Tailer::attach: called");

        ensure_source_file(&path).await?;
        let mut file = File::open(&path).await?;
        let offset = file.seek(SeekFrom::End(0)).await?;

        debug!(?path, offset, "Tailer::attach: positioned at end of file");
        if writes_cache {
            cache.mark_live_writer();
        }
        let seen_generation = cache.generation();
        Ok(Self {
            path,
            reader: BufReader::new(file),
            cache,
            writes_cache,
            poll_interval,
            pending: Vec::new(),
            seen_generation,
        })
    }

    /// Path this cursor follows
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one complete line if one is available
    ///
    /// A trailing fragment without a newline stays buffered until the producer
    /// finishes it. Safe to cancel: partial bytes are kept in `pending`.
    async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending).await?;
        if read == 0 || self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(Some(line))
    }

    async fn rewind(&mut self) -> std::io::Result<()> {
        self.reader.seek(SeekFrom::Start(0)).await?;
        self.pending.clear();
        Ok(())
    }

    /// Rewind to the start if the file shrank below our position
    async fn check_truncation(&mut self) -> std::io::Result<()> {
        let position = self.reader.stream_position().await?;
        let len = tokio::fs::metadata(&self.path).await?.len();
        if len < position {
            info!(path = ?self.path, position, len, "Source file truncated, rewinding cursor");
            self.rewind().await?;
        }
        Ok(())
    }

    /// Wait for and return the next newly appended event
    ///
    /// Never returns an error: undecodable lines are skipped and I/O failures are
    /// logged and retried after the idle delay.
    pub async fn next_event(&mut self) -> CanonicalEvent {
        loop {
            let generation = self.cache.generation();
            if generation != self.seen_generation {
                // the cache is only cleared right after the file is truncated
                info!(path = ?self.path, generation, "Cache cleared, rewinding cursor");
                if let Err(e) = self.rewind().await {
                    warn!(path = ?self.path, error = %e, "Failed to rewind cursor");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                self.seen_generation = generation;
            }
            match self.read_line().await {
                Ok(Some(line)) => {
                    let Some(event) = parse_line(&line) else {
                        continue;
                    };
                    let fresh = if self.writes_cache {
                        self.cache.append_in(generation, event.clone())
                    } else {
                        self.cache.generation() == generation
                    };
                    if fresh {
                        return event;
                    }
                    debug!(path = ?self.path, "Tailer::next_event: dropped line read before truncation");
                }
                Ok(None) => {
                    if let Err(e) = self.check_truncation().await {
                        warn!(path = ?self.path, error = %e, "Failed to check source file length");
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    warn!(path = ?self.path, error = %e, "Failed to read source file");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

/// Spawn the long-lived ingestion task that drains a cursor into the cache
pub fn spawn_ingest(path: PathBuf, cache: Arc<EventCache>, poll_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tailer = match Tailer::attach(&path, cache, true, poll_interval).await {
            Ok(tailer) => tailer,
            Err(e) => {
                error!(?path, error = %e, "Failed to attach ingestion cursor");
                return;
            }
        };
        info!(?path, "Ingestion task started");

        loop {
            let event = tailer.next_event().await;
            debug!(protocol = %event.protocol, host = %event.host, "Ingested event");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const POLL: Duration = Duration::from_millis(20);

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    async fn next(tailer: &mut Tailer) -> CanonicalEvent {
        tokio::time::timeout(Duration::from_secs(5), tailer.next_event())
            .await
            .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_attach_creates_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("interactions.ndjson");

        let tailer = Tailer::attach(&path, Arc::new(EventCache::default()), true, POLL).await;
        assert!(tailer.is_ok());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_existing_lines_are_not_replayed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        std::fs::write(&path, "{\"protocol\":\"old\"}\n").unwrap();

        let cache = Arc::new(EventCache::default());
        let mut tailer = Tailer::attach(&path, cache.clone(), true, POLL).await.unwrap();

        append(&path, "{\"protocol\":\"new\"}\n");
        let event = next(&mut tailer).await;

        assert_eq!(event.protocol, "NEW");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_skips_garbage_and_blank_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");

        let mut tailer = Tailer::attach(&path, Arc::new(EventCache::default()), true, POLL)
            .await
            .unwrap();

        append(&path, "garbage\n\n{\"protocol\":\"dns\"}\n");
        assert_eq!(next(&mut tailer).await.protocol, "DNS");
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");

        let mut tailer = Tailer::attach(&path, Arc::new(EventCache::default()), true, POLL)
            .await
            .unwrap();

        append(&path, "{\"protocol\":");
        let early = tokio::time::timeout(Duration::from_millis(150), tailer.next_event()).await;
        assert!(early.is_err());

        append(&path, "\"smtp\"}\n");
        assert_eq!(next(&mut tailer).await.protocol, "SMTP");
    }

    #[tokio::test]
    async fn test_delivers_in_file_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");

        let mut tailer = Tailer::attach(&path, Arc::new(EventCache::default()), true, POLL)
            .await
            .unwrap();

        append(&path, "{\"timestamp\":1}\n{\"timestamp\":2}\n{\"timestamp\":3}\n");
        for expected in 1..=3 {
            assert_eq!(next(&mut tailer).await.timestamp, expected);
        }
    }

    #[tokio::test]
    async fn test_independent_cursors_each_write_cache() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let mut first = Tailer::attach(&path, cache.clone(), true, POLL).await.unwrap();
        let mut second = Tailer::attach(&path, cache.clone(), true, POLL).await.unwrap();

        append(&path, "{\"protocol\":\"dns\"}\n");
        next(&mut first).await;
        next(&mut second).await;

        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_read_only_cursor_leaves_cache_alone() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let mut tailer = Tailer::attach(&path, cache.clone(), false, POLL).await.unwrap();
        append(&path, "{\"protocol\":\"dns\"}\n");
        next(&mut tailer).await;

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_rewinds_after_truncation() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let mut tailer = Tailer::attach(&path, cache.clone(), true, POLL).await.unwrap();
        append(&path, "{\"protocol\":\"before\",\"host\":\"padding-padding-padding\"}\n");
        next(&mut tailer).await;

        std::fs::write(&path, "").unwrap();
        cache.clear();
        // cursor observes the shorter file while idle
        let pending = tokio::time::timeout(Duration::from_millis(100), tailer.next_event()).await;
        assert!(pending.is_err());

        append(&path, "{\"protocol\":\"after\"}\n");
        assert_eq!(next(&mut tailer).await.protocol, "AFTER");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_rewinds_on_clear_even_if_file_regrew() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let mut tailer = Tailer::attach(&path, cache.clone(), true, POLL).await.unwrap();
        append(&path, "{\"protocol\":\"old\"}\n");
        next(&mut tailer).await;

        // new run writes more than the old offset before the cursor looks again
        std::fs::write(&path, "{\"protocol\":\"first\",\"host\":\"a-much-longer-host-name\"}\n").unwrap();
        cache.clear();

        assert_eq!(next(&mut tailer).await.protocol, "FIRST");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_ingest_fills_cache() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        let cache = Arc::new(EventCache::default());

        let handle = spawn_ingest(path.clone(), cache.clone(), POLL);
        // wait for the task to attach at end of file
        while !path.exists() {
            tokio::time::sleep(POLL).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        append(&path, "{\"protocol\":\"http\"}\n");
        for _ in 0..100 {
            if !cache.is_empty() {
                break;
            }
            tokio::time::sleep(POLL).await;
        }

        assert_eq!(cache.len(), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_warm_up_does_not_duplicate_pending_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.ndjson");
        std::fs::write(&path, "").unwrap();
        let cache = Arc::new(EventCache::default());

        // slow poll so the line sits unread while warm-up runs
        let handle = spawn_ingest(path.clone(), cache.clone(), Duration::from_millis(200));
        for _ in 0..250 {
            if cache.has_live_writer() {
                break;
            }
            tokio::time::sleep(POLL).await;
        }
        assert!(cache.has_live_writer());

        append(&path, "{\"host\":\"one\"}\n");
        assert_eq!(cache.warm_up(&path, 200).await, 0);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let hosts: Vec<String> = cache.snapshot(10).into_iter().map(|e| e.host).collect();
        assert_eq!(hosts, vec!["one".to_string()]);
        handle.abort();
    }
}
