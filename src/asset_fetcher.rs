//! Idempotent single-asset downloads into deterministic local paths.
//!
//! Bodies are streamed into a uniquely named `.part` file next to the
//! destination, validated when they are audio, and renamed into place, so a
//! file at the destination is always complete. Concurrent requests for the
//! same destination share one network fetch.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::errors::FetchError;
use crate::media_validator::is_valid_media_file;

const CHUNK_SIZE: usize = 8192;
const FOLLOWER_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    /// Validated with the media sniffer before it becomes visible.
    Audio,
}

/// Opens a streaming body for a remote resource.
pub trait AssetSource: Send + Sync {
    fn open(&self, url: &str, timeout: Duration) -> Result<Box<dyn Read + Send>, FetchError>;
}

/// `AssetSource` backed by a shared `ureq` agent.
pub struct HttpAssetSource {
    http_client: ureq::Agent,
    user_agent: String,
}

impl HttpAssetSource {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .build();
        Self {
            http_client,
            user_agent: user_agent.into(),
        }
    }

    fn classify_ureq_failure(error: ureq::Error) -> FetchError {
        match error {
            ureq::Error::Status(code, _) => FetchError::Http(format!("status {code}")),
            ureq::Error::Transport(transport) => {
                let message = transport.to_string();
                let lowered = message.to_ascii_lowercase();
                if lowered.contains("timed out") || lowered.contains("timeout") {
                    FetchError::Timeout(message)
                } else {
                    FetchError::Http(message)
                }
            }
        }
    }
}

impl AssetSource for HttpAssetSource {
    fn open(&self, url: &str, timeout: Duration) -> Result<Box<dyn Read + Send>, FetchError> {
        let response = self
            .http_client
            .get(url)
            .set("User-Agent", &self.user_agent)
            .timeout(timeout)
            .call()
            .map_err(Self::classify_ureq_failure)?;
        Ok(Box::new(response.into_reader()))
    }
}

#[derive(Default)]
struct InFlightFetch {
    outcome: Mutex<Option<Result<PathBuf, FetchError>>>,
    ready: Condvar,
}

type InFlightMap = Mutex<HashMap<PathBuf, Arc<InFlightFetch>>>;

/// Publishes the leader's outcome and clears the in-flight entry, even on unwind.
struct InFlightGuard<'a> {
    map: &'a InFlightMap,
    destination: PathBuf,
    slot: Arc<InFlightFetch>,
    outcome: Option<Result<PathBuf, FetchError>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err(FetchError::Io("fetch aborted".to_string())));
        // Unmapped before waking followers so a retrying follower starts a fresh fetch.
        self.map
            .lock()
            .expect("in-flight map lock poisoned")
            .remove(&self.destination);
        *self.slot.outcome.lock().expect("in-flight slot lock poisoned") = Some(outcome);
        self.slot.ready.notify_all();
    }
}

pub struct AssetFetcher {
    source: Arc<dyn AssetSource>,
    audio_timeout: Duration,
    image_timeout: Duration,
    in_flight: InFlightMap,
}

impl AssetFetcher {
    pub fn new(
        source: Arc<dyn AssetSource>,
        audio_timeout: Duration,
        image_timeout: Duration,
    ) -> Self {
        Self {
            source,
            audio_timeout,
            image_timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Downloads `url` to `destination` unless a file is already there.
    pub fn fetch(
        &self,
        url: &str,
        destination: &Path,
        kind: AssetKind,
    ) -> Result<PathBuf, FetchError> {
        self.fetch_cancellable(url, destination, kind, &|| false)
    }

    /// Like [`AssetFetcher::fetch`], polling `is_cancelled` between body chunks.
    ///
    /// A shared fetch cancelled by its leader is retried here as long as this
    /// caller itself has not been cancelled.
    pub fn fetch_cancellable(
        &self,
        url: &str,
        destination: &Path,
        kind: AssetKind,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<PathBuf, FetchError> {
        loop {
            match self.fetch_attempt(url, destination, kind, is_cancelled) {
                Err(FetchError::Cancelled) if !is_cancelled() => {
                    debug!(
                        "Shared fetch for {} was cancelled by its leader, retrying",
                        destination.display()
                    );
                }
                outcome => return outcome,
            }
        }
    }

    fn fetch_attempt(
        &self,
        url: &str,
        destination: &Path,
        kind: AssetKind,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<PathBuf, FetchError> {
        if destination.exists() {
            debug!("Cache hit for {}", destination.display());
            return Ok(destination.to_path_buf());
        }
        if is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let (slot, is_leader) = {
            let mut in_flight = self.in_flight.lock().expect("in-flight map lock poisoned");
            match in_flight.get(destination) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let slot = Arc::new(InFlightFetch::default());
                    in_flight.insert(destination.to_path_buf(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !is_leader {
            debug!(
                "Joining in-flight fetch for {} instead of issuing a duplicate request",
                destination.display()
            );
            return Self::await_leader(&slot, is_cancelled);
        }

        let mut guard = InFlightGuard {
            map: &self.in_flight,
            destination: destination.to_path_buf(),
            slot,
            outcome: None,
        };
        // A previous leader may have finished between the existence check and the map lookup.
        let outcome = if destination.exists() {
            Ok(destination.to_path_buf())
        } else {
            let outcome = self.download(url, destination, kind, is_cancelled);
            match &outcome {
                Ok(path) => info!("Fetched {} -> {}", url, path.display()),
                Err(FetchError::Cancelled) => debug!("Fetch of {} cancelled", url),
                Err(error) => warn!("Fetch of {} failed: {}", url, error),
            }
            outcome
        };
        guard.outcome = Some(outcome.clone());
        outcome
    }

    fn await_leader(
        slot: &InFlightFetch,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<PathBuf, FetchError> {
        let mut outcome = slot.outcome.lock().expect("in-flight slot lock poisoned");
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            if is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let (next, _) = slot
                .ready
                .wait_timeout(outcome, FOLLOWER_POLL_INTERVAL)
                .expect("in-flight slot lock poisoned");
            outcome = next;
        }
    }

    fn timeout_for(&self, kind: AssetKind) -> Duration {
        match kind {
            AssetKind::Audio => self.audio_timeout,
            AssetKind::Image => self.image_timeout,
        }
    }

    fn temp_path_for(destination: &Path, parent: &Path) -> PathBuf {
        let file_name = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "asset".to_string());
        parent.join(format!(".{file_name}.{}.part", Uuid::new_v4().simple()))
    }

    fn download(
        &self,
        url: &str,
        destination: &Path,
        kind: AssetKind,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<PathBuf, FetchError> {
        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut body = self.source.open(url, self.timeout_for(kind))?;
        let temp_path = Self::temp_path_for(destination, parent);
        let result = Self::write_body(&mut body, &temp_path, is_cancelled).and_then(|()| {
            if kind == AssetKind::Audio && !is_valid_media_file(&temp_path) {
                warn!(
                    "Downloaded body for {} is not binary media, discarding",
                    destination.display()
                );
                return Err(FetchError::CopyrightOrInvalid);
            }
            fs::rename(&temp_path, destination)?;
            Ok(())
        });
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result.map(|()| destination.to_path_buf())
    }

    fn write_body(
        body: &mut dyn Read,
        temp_path: &Path,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<(), FetchError> {
        let mut file = File::create(temp_path)?;
        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            if is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let read = body.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])?;
        }
        file.sync_all()?;
        Ok(())
    }
}
