//! Durable on-disk spill + replay for batches that cannot be shipped
//! live.
//!
//! File layout: `CRC32(url_len_be32 || url || payload) || url_len_be32
//! || url || payload`, written to `<unix-seconds>_<random>.writing`
//! then atomically renamed to `.backlog`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::clickhouse;
use crate::error::{abort_fatal, BacklogError};
use crate::limiter::Limiter;

const REPLAY_INTERVAL: Duration = Duration::from_secs(30);

pub struct Backlog {
    dir: PathBuf,
    limiter: Limiter,
    http_client: reqwest::Client,
    shutdown: CancellationToken,
    write_lock: AsyncMutex<()>,
    tracker: TaskTracker,
}

impl Backlog {
    /// Create the backlog directory if missing and delete any stale
    /// `.writing` file left over from a crash mid-write.
    ///
    /// `limiter` is the single process-wide outbound-request budget,
    /// shared with the [`crate::uploader::Uploader`]'s live-send path
    /// so total outbound concurrency is capped once, not per-path.
    pub async fn new(
        dir: impl Into<PathBuf>,
        limiter: Limiter,
        http_client: reqwest::Client,
        shutdown: CancellationToken,
    ) -> Result<Self, BacklogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| BacklogError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|source| BacklogError::ReadDir {
                path: dir.display().to_string(),
                source,
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| BacklogError::ReadDir {
                path: dir.display().to_string(),
                source,
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("writing") {
                if let Err(err) = fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %err, "unable to delete stale .writing file");
                }
            }
        }

        Ok(Self {
            dir,
            limiter,
            http_client,
            shutdown,
            write_lock: AsyncMutex::new(()),
            tracker: TaskTracker::new(),
        })
    }

    /// Durably persist `(url, payload)`. Any I/O error here is fatal —
    /// the caller is expected to abort the process.
    pub async fn submit(&self, url: &str, payload: &[u8]) -> Result<(), BacklogError> {
        let _write_guard = self.write_lock.lock().await;

        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let random: u64 = rand::thread_rng().gen();
        let tmp_path = self.dir.join(format!("{unix_secs}_{random:016x}.writing"));
        let final_path = tmp_path.with_extension("backlog");

        let url_bytes = url.as_bytes();
        let url_len = url_bytes.len() as u32;

        let mut framed = Vec::with_capacity(4 + url_bytes.len() + payload.len());
        framed.extend_from_slice(&url_len.to_be_bytes());
        framed.extend_from_slice(url_bytes);
        framed.extend_from_slice(payload);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&framed);
        let crc = hasher.finalize();

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(BacklogError::Write)?;
        file.write_all(&crc.to_be_bytes())
            .await
            .map_err(BacklogError::Write)?;
        file.write_all(&framed).await.map_err(BacklogError::Write)?;
        file.flush().await.map_err(BacklogError::Write)?;
        file.sync_all().await.map_err(BacklogError::Write)?;
        drop(file);

        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(BacklogError::Rename)?;

        metrics::counter!("backlog_spilled_total").increment(1);
        Ok(())
    }

    /// Run the replay loop: an initial scan, then every 30s, until
    /// shutdown. Awaits all in-flight deliveries before returning.
    pub async fn run(&self) {
        self.replay_once().await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(REPLAY_INTERVAL) => self.replay_once().await,
                _ = self.shutdown.cancelled() => break,
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn replay_once(&self) {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "unable to scan backlog directory");
                return;
            }
        };

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "error while scanning backlog directory");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("backlog") {
                continue;
            }

            let permit_limiter = self.limiter.clone();
            let http_client = self.http_client.clone();
            self.tracker.spawn(async move {
                let _permit = permit_limiter.acquire().await;
                deliver_one(path, http_client).await;
            });
        }
    }
}

async fn deliver_one(path: PathBuf, http_client: reqwest::Client) {
    match read_and_verify(&path).await {
        Ok(None) => {
            metrics::counter!("backlog_invalid_crc_total").increment(1);
            if let Err(err) = fs::remove_file(&path).await {
                tracing::error!(path = %path.display(), error = %err, "unable to delete corrupt backlog file");
            }
        }
        Ok(Some((url, payload))) => match clickhouse::upload(&http_client, &url, payload).await {
            Ok(()) => {
                metrics::counter!("backlog_replay_success_total").increment(1);
                if let Err(err) = fs::remove_file(&path).await {
                    // The file would otherwise be re-shipped forever.
                    abort_fatal("backlog: unable to delete delivered file", &err);
                }
            }
            Err(err) => {
                metrics::counter!("backlog_replay_failure_total").increment(1);
                tracing::warn!(path = %path.display(), error = %err, "backlog replay failed, leaving file in place");
            }
        },
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unable to read backlog file, leaving in place");
        }
    }
}

/// Read and CRC-verify one backlog file. `Ok(None)` means the CRC
/// didn't match (caller deletes it); `Ok(Some(..))` is `(url, payload)`.
async fn read_and_verify(path: &Path) -> std::io::Result<Option<(String, Vec<u8>)>> {
    let mut file = fs::File::open(path).await?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).await?;

    if contents.len() < 8 {
        return Ok(None);
    }
    let stored_crc = u32::from_be_bytes(contents[0..4].try_into().unwrap());
    let framed = &contents[4..];

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(framed);
    if hasher.finalize() != stored_crc {
        return Ok(None);
    }

    if framed.len() < 4 {
        return Ok(None);
    }
    let url_len = u32::from_be_bytes(framed[0..4].try_into().unwrap()) as usize;
    if framed.len() < 4 + url_len {
        return Ok(None);
    }
    let url = match std::str::from_utf8(&framed[4..4 + url_len]) {
        Ok(url) => url.to_string(),
        Err(_) => return Ok(None),
    };
    let payload = framed[4 + url_len..].to_vec();
    Ok(Some((url, payload)))
}
