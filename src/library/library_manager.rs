//! Library orchestration runtime component.
//!
//! This manager turns searches into track records plus background thumbnail
//! prefetch, caches and validates audio before playback or favoriting, and
//! keeps its favorites view re-read from the store after every mutation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};

use crate::asset_fetcher::{AssetFetcher, AssetKind};
use crate::config::PathsConfig;
use crate::db_manager::{DbManager, FavoriteEntry, FavoriteOrder, NewFavorite};
use crate::errors::{FetchError, LibraryError, PlaybackError, StoreError, UserFacingError};
use crate::fetch_coordinator::{FetchCoordinator, FetchTask};
use crate::playback::{position_for_progress, progress_for_position, PlaybackTransport};
use crate::protocol::{BatchId, LibraryAction, LibraryMessage, Message, PlaybackMessage};
use crate::search_session::SearchSession;
use crate::track::{image_file_name, TrackRecord};

/// One page of search results plus the thumbnail batch prefetching for it.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub query: String,
    pub page: u32,
    pub tracks: Vec<TrackRecord>,
    /// `None` when the coordinator no longer accepts work.
    pub image_batch: Option<BatchId>,
}

/// Collaborators owned by the library manager.
pub struct LibraryComponents {
    pub paths: PathsConfig,
    pub search_session: SearchSession,
    pub fetcher: Arc<AssetFetcher>,
    pub coordinator: FetchCoordinator,
    pub transport: Box<dyn PlaybackTransport>,
}

/// Coordinates search, caching, favorites and playback hand-off.
pub struct LibraryManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    db_manager: DbManager,
    paths: PathsConfig,
    search_session: SearchSession,
    fetcher: Arc<AssetFetcher>,
    coordinator: FetchCoordinator,
    transport: Box<dyn PlaybackTransport>,
    favorites: Vec<FavoriteEntry>,
    current_tracks: Vec<TrackRecord>,
    now_playing: Option<PathBuf>,
    paused: bool,
    loader_workers: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl LibraryManager {
    /// Creates a library manager bound to bus channels and storage backend.
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        db_manager: DbManager,
        components: LibraryComponents,
    ) -> Self {
        let LibraryComponents {
            paths,
            search_session,
            fetcher,
            coordinator,
            transport,
        } = components;
        Self {
            bus_consumer,
            bus_producer,
            db_manager,
            paths,
            search_session,
            fetcher,
            coordinator,
            transport,
            favorites: Vec::new(),
            current_tracks: Vec::new(),
            now_playing: None,
            paused: false,
            loader_workers: Vec::new(),
            shut_down: false,
        }
    }

    fn emit(&self, message: LibraryMessage) {
        let _ = self.bus_producer.send(Message::Library(message));
    }

    fn emit_failure(&self, action: LibraryAction, error: &LibraryError) {
        let kind = UserFacingError::from(error);
        warn!("{:?} failed ({}): {}", action, kind.message(), error);
        self.emit(LibraryMessage::OperationFailed {
            action,
            kind,
            detail: error.to_string(),
        });
    }

    /// Runs the query and starts thumbnail prefetch without waiting for it.
    pub fn search(&mut self, query: &str, page: u32) -> Result<SearchPage, LibraryError> {
        let tracks = self.search_session.search(query, page)?;
        Ok(self.finish_search(tracks))
    }

    pub fn next_page(&mut self) -> Result<SearchPage, LibraryError> {
        let tracks = self.search_session.next_page()?;
        Ok(self.finish_search(tracks))
    }

    pub fn previous_page(&mut self) -> Result<SearchPage, LibraryError> {
        let tracks = self.search_session.previous_page()?;
        Ok(self.finish_search(tracks))
    }

    fn finish_search(&mut self, tracks: Vec<TrackRecord>) -> SearchPage {
        let image_batch = self.prefetch_images(&tracks);
        self.current_tracks = tracks.clone();
        SearchPage {
            query: self.search_session.query().unwrap_or_default().to_string(),
            page: self.search_session.page(),
            tracks,
            image_batch,
        }
    }

    fn prefetch_images(&self, tracks: &[TrackRecord]) -> Option<BatchId> {
        let tasks: Vec<FetchTask> = tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| !track.picture_url().is_empty())
            .map(|(row, track)| FetchTask {
                resource_url: track.picture_url().to_string(),
                destination_path: self
                    .paths
                    .image_dir
                    .join(image_file_name(track.picture_url())),
                correlation_id: row,
                kind: AssetKind::Image,
            })
            .collect();
        match self.coordinator.dispatch(tasks) {
            Ok(batch) => {
                // Thumbnails of an older page must never bind to the rows of this one.
                self.coordinator.cancel_batches_before(batch);
                Some(batch)
            }
            Err(error) => {
                warn!("Thumbnail prefetch skipped: {}", error);
                None
            }
        }
    }

    pub fn cached_audio_path(&self, track: &TrackRecord, dir: &Path) -> PathBuf {
        track.cache_key().audio_path_in(dir)
    }

    /// Blocks until the track's audio exists and is validated under `dir`.
    pub fn ensure_cached(&self, track: &TrackRecord, dir: &Path) -> Result<PathBuf, FetchError> {
        let destination = self.cached_audio_path(track, dir);
        self.fetcher
            .fetch(track.play_url(), &destination, AssetKind::Audio)
    }

    /// Saves the track into the songs directory.
    pub fn download(&self, track: &TrackRecord) -> Result<PathBuf, FetchError> {
        self.ensure_cached(track, &self.paths.songs_dir)
    }

    /// Caches then stores the track; nothing is stored when caching fails.
    pub fn favorite(&mut self, track: &TrackRecord) -> Result<i64, LibraryError> {
        self.ensure_cached(track, &self.paths.cache_dir)?;
        let id = self.db_manager.insert_favorite(&NewFavorite::from(track))?;
        self.refresh_favorites()?;
        Ok(id)
    }

    /// Caches every track and stores the ones that succeeded in one transaction.
    /// Returns the stored count and the per-track fetch failures.
    pub fn favorite_many(
        &mut self,
        tracks: &[TrackRecord],
    ) -> Result<(usize, Vec<(TrackRecord, FetchError)>), LibraryError> {
        let cache_dir = self.paths.cache_dir.clone();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for track in tracks {
            match self.ensure_cached(track, &cache_dir) {
                Ok(_) => accepted.push(NewFavorite::from(track)),
                Err(err) => rejected.push((track.clone(), err)),
            }
        }
        let stored = self.db_manager.insert_favorites(&accepted)?;
        if stored > 0 {
            self.refresh_favorites()?;
        }
        Ok((stored, rejected))
    }

    pub fn remove_favorite(&mut self, id: i64) -> Result<usize, LibraryError> {
        let deleted = self.db_manager.delete_favorite(id)?;
        self.refresh_favorites()?;
        Ok(deleted)
    }

    /// Re-reads the listing from the store and publishes it.
    pub fn refresh_favorites(&mut self) -> Result<&[FavoriteEntry], StoreError> {
        self.favorites = self.db_manager.list_favorites(FavoriteOrder::Id)?;
        self.emit(LibraryMessage::FavoritesUpdated(self.favorites.clone()));
        Ok(&self.favorites)
    }

    pub fn favorites(&self) -> &[FavoriteEntry] {
        &self.favorites
    }

    /// Hands an already cached track to the playback transport.
    pub fn play(&mut self, track: &TrackRecord) -> Result<PathBuf, PlaybackError> {
        let path = self.cached_audio_path(track, &self.paths.cache_dir);
        if !path.exists() {
            return Err(PlaybackError::NotCached(path.display().to_string()));
        }
        if !self.transport.load(&path) {
            return Err(PlaybackError::LoadFailed(path.display().to_string()));
        }
        self.transport.play();
        self.now_playing = Some(path.clone());
        self.paused = false;
        info!("Playback started: {}", path.display());
        self.emit_playback(PlaybackMessage::Started { path: path.clone() });
        Ok(path)
    }

    fn emit_playback(&self, message: PlaybackMessage) {
        let _ = self.bus_producer.send(Message::Playback(message));
    }

    /// Pauses a playing track, resumes a paused one, or else starts the first
    /// favorite, falling back to the first row of the last search.
    pub fn toggle_playback(&mut self) -> Result<PathBuf, LibraryError> {
        if let Some(path) = self.now_playing.clone() {
            if self.transport.is_playing() {
                self.transport.pause();
                self.paused = true;
                info!("Playback paused: {}", path.display());
                self.emit_playback(PlaybackMessage::Paused);
                return Ok(path);
            }
            if self.paused {
                self.transport.play();
                self.paused = false;
                info!("Playback resumed: {}", path.display());
                self.emit_playback(PlaybackMessage::Resumed);
                return Ok(path);
            }
        }
        let fallback = self
            .db_manager
            .list_favorites(FavoriteOrder::Id)?
            .first()
            .map(FavoriteEntry::to_track)
            .or_else(|| self.current_tracks.first().cloned())
            .ok_or(PlaybackError::NothingToPlay)?;
        let cache_dir = self.paths.cache_dir.clone();
        self.ensure_cached(&fallback, &cache_dir)?;
        Ok(self.play(&fallback)?)
    }

    pub fn stop_playback(&mut self) {
        self.transport.stop();
        self.paused = false;
        self.now_playing = None;
        self.emit_playback(PlaybackMessage::Stopped);
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.transport.set_volume(volume.min(100));
    }

    /// Moves to `percent` of the current track; `None` while the duration is unknown.
    pub fn seek_to_progress(&mut self, percent: u8) -> Option<u64> {
        let duration_ms = self.transport.duration();
        if duration_ms == 0 {
            return None;
        }
        let position_ms = position_for_progress(duration_ms, percent);
        self.transport.set_position(position_ms);
        debug!("Seeked to {} ms of {} ms", position_ms, duration_ms);
        Some(position_ms)
    }

    /// Publishes the transport position for the seek bar.
    pub fn report_progress(&self) -> PlaybackMessage {
        let position_ms = self.transport.position();
        let duration_ms = self.transport.duration();
        let progress = PlaybackMessage::Progress {
            position_ms,
            duration_ms,
            percent: progress_for_position(position_ms, duration_ms),
        };
        self.emit_playback(progress.clone());
        progress
    }

    /// Reads the favorites on a worker with its own store handle and posts `FavoritesLoaded`.
    pub fn load_favorites_in_background(&mut self) {
        self.loader_workers.retain(|worker| !worker.is_finished());
        let database_path = self.paths.database_path.clone();
        let bus_producer = self.bus_producer.clone();
        let spawned = thread::Builder::new()
            .name("favorites-loader".to_string())
            .spawn(move || {
                let entries = DbManager::open(&database_path)
                    .and_then(|db_manager| db_manager.list_favorites(FavoriteOrder::Id))
                    .unwrap_or_else(|err| {
                        error!("Failed to load favorites: {}", err);
                        Vec::new()
                    });
                info!("Favorites loaded: {} entries", entries.len());
                let _ = bus_producer.send(Message::Library(LibraryMessage::FavoritesLoaded(
                    entries,
                )));
            });
        match spawned {
            Ok(handle) => self.loader_workers.push(handle),
            Err(err) => {
                error!("Failed to spawn favorites loader: {}", err);
                self.emit(LibraryMessage::FavoritesLoaded(Vec::new()));
            }
        }
    }

    /// Stops background work, joins it, and removes the thumbnail directory.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.coordinator.shutdown();
        for worker in self.loader_workers.drain(..) {
            if worker.join().is_err() {
                error!("Favorites loader terminated due to panic");
            }
        }
        self.transport.stop();
        let image_dir = &self.paths.image_dir;
        if image_dir.exists() {
            match std::fs::remove_dir_all(image_dir) {
                Ok(()) => info!("Removed thumbnail directory {}", image_dir.display()),
                Err(err) => error!(
                    "Failed to remove thumbnail directory {}: {}",
                    image_dir.display(),
                    err
                ),
            }
        }
        self.emit(LibraryMessage::ShutdownComplete);
    }

    fn publish_search(
        &mut self,
        action: Result<SearchPage, LibraryError>,
        query: String,
        page: u32,
    ) {
        match action {
            Ok(result) => self.emit(LibraryMessage::SearchCompleted {
                query: result.query,
                page: result.page,
                tracks: result.tracks,
                image_batch: result.image_batch,
            }),
            Err(err) => {
                warn!("Search '{}' page {} failed: {}", query, page, err);
                self.emit(LibraryMessage::SearchFailed {
                    query,
                    page,
                    error: UserFacingError::from(&err).message().to_string(),
                });
            }
        }
    }

    fn current_position(&self) -> (String, u32) {
        (
            self.search_session.query().unwrap_or_default().to_string(),
            self.search_session.page(),
        )
    }

    fn handle_play_request(&mut self, track: TrackRecord) {
        let cache_dir = self.paths.cache_dir.clone();
        match self.ensure_cached(&track, &cache_dir) {
            Ok(path) => self.emit(LibraryMessage::TrackCached {
                track: track.clone(),
                path,
            }),
            Err(err) => {
                self.emit_failure(LibraryAction::Play, &LibraryError::from(err));
                return;
            }
        }
        if let Err(err) = self.play(&track) {
            self.emit_failure(LibraryAction::Play, &LibraryError::from(err));
        }
    }

    /// Handles one bus message; returns `false` once the manager has shut down.
    pub fn handle_bus_message(&mut self, message: Message) -> bool {
        let Message::Library(message) = message else {
            return true;
        };
        match message {
            LibraryMessage::Search { query, page } => {
                let result = self.search(&query, page);
                self.publish_search(result, query, page);
            }
            LibraryMessage::NextPage => {
                let result = self.next_page();
                let (query, page) = self.current_position();
                self.publish_search(result, query, page);
            }
            LibraryMessage::PreviousPage => {
                let result = self.previous_page();
                let (query, page) = self.current_position();
                self.publish_search(result, query, page);
            }
            LibraryMessage::PlayTrack(track) => self.handle_play_request(track),
            LibraryMessage::DownloadTrack(track) => match self.download(&track) {
                Ok(path) => self.emit(LibraryMessage::TrackDownloaded { track, path }),
                Err(err) => self.emit_failure(LibraryAction::Download, &LibraryError::from(err)),
            },
            LibraryMessage::FavoriteTrack(track) => match self.favorite(&track) {
                Ok(id) => self.emit(LibraryMessage::FavoriteAdded { id, track }),
                Err(err) => self.emit_failure(LibraryAction::Favorite, &err),
            },
            LibraryMessage::FavoriteTracks(tracks) => match self.favorite_many(&tracks) {
                Ok((stored, rejected)) => {
                    for (track, err) in &rejected {
                        debug!("Skipped favorite {}: {}", track.display_label(), err);
                    }
                    self.emit(LibraryMessage::FavoritesBatchAdded {
                        stored,
                        rejected: rejected.len(),
                    });
                }
                Err(err) => self.emit_failure(LibraryAction::Favorite, &err),
            },
            LibraryMessage::RemoveFavorite(id) => {
                if let Err(err) = self.remove_favorite(id) {
                    self.emit_failure(LibraryAction::RemoveFavorite, &err);
                }
            }
            LibraryMessage::LoadFavorites => self.load_favorites_in_background(),
            LibraryMessage::TogglePlayback => {
                if let Err(err) = self.toggle_playback() {
                    self.emit_failure(LibraryAction::Playback, &err);
                }
            }
            LibraryMessage::StopPlayback => self.stop_playback(),
            LibraryMessage::SetVolume(volume) => self.set_volume(volume),
            LibraryMessage::SeekToProgress(percent) => {
                if self.seek_to_progress(percent).is_none() {
                    debug!("Seek ignored: nothing with a known duration is loaded");
                }
            }
            LibraryMessage::QueryProgress => {
                self.report_progress();
            }
            LibraryMessage::Shutdown => {
                self.shutdown();
                return false;
            }
            _ => {}
        }
        true
    }

    /// Starts the blocking event loop for library requests.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => {
                    if !self.handle_bus_message(message) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("LibraryManager lagged behind the bus by {} messages", skipped);
                }
                Err(RecvError::Closed) => {
                    self.shutdown();
                    break;
                }
            }
        }
    }
}

impl Drop for LibraryManager {
    fn drop(&mut self) {
        if !self.shut_down {
            self.coordinator.shutdown();
            for worker in self.loader_workers.drain(..) {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LibraryComponents, LibraryManager};
    use crate::asset_fetcher::tests::{unique_temp_dir, FakeSource, MP3_BYTES};
    use crate::asset_fetcher::AssetFetcher;
    use crate::config::PathsConfig;
    use crate::db_manager::{DbManager, FavoriteOrder, NewFavorite};
    use crate::errors::{FetchError, LibraryError, PlaybackError, UserFacingError};
    use crate::fetch_coordinator::FetchCoordinator;
    use crate::playback::tests::RecordingTransport;
    use crate::protocol::{FetchMessage, LibraryAction, LibraryMessage, Message, PlaybackMessage};
    use crate::search_session::tests::{chengdu_results, StaticProvider};
    use crate::search_session::SearchSession;
    use crate::track::TrackRecord;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver};

    const IMAGE_URL_A: &str = "http://p1.music.126.net/abc==/109951163.jpg?param=300x300";
    const IMAGE_URL_B: &str = "http://p1.music.126.net/def==/109951164.jpg?param=300x300";

    struct TempRoot(PathBuf);

    impl Drop for TempRoot {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    struct Harness {
        manager: LibraryManager,
        receiver: Receiver<Message>,
        source: Arc<FakeSource>,
        transport: RecordingTransport,
        root: PathBuf,
        _cleanup: TempRoot,
    }

    fn make_harness(provider_code: i64, source: FakeSource) -> Harness {
        make_harness_with_transport(provider_code, source, RecordingTransport::default())
    }

    fn make_harness_with_transport(
        provider_code: i64,
        source: FakeSource,
        transport: RecordingTransport,
    ) -> Harness {
        let root = unique_temp_dir("library_manager");
        std::fs::create_dir_all(&root).expect("root dir");
        let paths = PathsConfig {
            songs_dir: root.join("songs"),
            cache_dir: root.join("temp"),
            image_dir: root.join("image"),
            database_path: root.join("music.db"),
        };
        let (bus_sender, _) = broadcast::channel(256);
        let receiver = bus_sender.subscribe();
        let source = Arc::new(source);
        let fetcher = Arc::new(AssetFetcher::new(
            source.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        ));
        let coordinator = FetchCoordinator::new(Arc::clone(&fetcher), 3, bus_sender.clone())
            .expect("workers should spawn");
        let provider = StaticProvider {
            code: provider_code,
            tracks: chengdu_results(),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let db_manager = DbManager::open(&paths.database_path).expect("store should open");
        let manager = LibraryManager::new(
            bus_sender.subscribe(),
            bus_sender,
            db_manager,
            LibraryComponents {
                paths,
                search_session: SearchSession::new(Box::new(provider)),
                fetcher,
                coordinator,
                transport: Box::new(transport.clone()),
            },
        );
        Harness {
            manager,
            receiver,
            source,
            transport,
            root: root.clone(),
            _cleanup: TempRoot(root),
        }
    }

    fn wait_for_message<F>(
        receiver: &mut Receiver<Message>,
        timeout: Duration,
        mut predicate: F,
    ) -> Message
    where
        F: FnMut(&Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed"),
            }
        }
    }

    fn track(title: &str, url: &str) -> TrackRecord {
        TrackRecord::new(title, "赵雷", "", "赵雷", "赵雷", url)
    }

    #[test]
    fn test_favorite_caches_then_stores_exactly_one_entry() {
        let mut harness = make_harness(
            200,
            FakeSource::default().with_body("http://m/1.mp3", &MP3_BYTES),
        );
        let song = track("成都", "http://m/1.mp3");
        let before = harness.manager.refresh_favorites().expect("list").len();

        let id = harness.manager.favorite(&song).expect("favorite should succeed");

        assert_eq!(harness.manager.favorites().len(), before + 1);
        assert_eq!(harness.manager.favorites().last().map(|entry| entry.id), Some(id));
        let cached = harness
            .manager
            .cached_audio_path(&song, &harness.root.join("temp"));
        assert!(cached.exists());
        let updated = wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Library(LibraryMessage::FavoritesUpdated(entries))
                    if entries.len() == before + 1
            )
        });
        assert!(matches!(updated, Message::Library(LibraryMessage::FavoritesUpdated(_))));
    }

    #[test]
    fn test_rejected_audio_never_creates_a_favorite() {
        let mut harness = make_harness(
            200,
            FakeSource::default().with_body("http://m/blocked.mp3", b"<html>copyright</html>"),
        );
        let song = track("成都", "http://m/blocked.mp3");

        let err = harness
            .manager
            .favorite(&song)
            .expect_err("text body must be rejected");

        assert!(matches!(
            err,
            LibraryError::Fetch(FetchError::CopyrightOrInvalid)
        ));
        assert_eq!(
            UserFacingError::from(&err),
            UserFacingError::CopyrightOrInvalid
        );
        let stored = DbManager::open(&harness.root.join("music.db"))
            .expect("store")
            .list_favorites(FavoriteOrder::Id)
            .expect("list");
        assert!(stored.is_empty());
    }

    #[test]
    fn test_network_failure_never_creates_a_favorite() {
        let mut harness = make_harness(200, FakeSource::default());
        let song = track("成都", "http://m/missing.mp3");

        assert!(matches!(
            harness.manager.favorite(&song),
            Err(LibraryError::Fetch(FetchError::Http(_)))
        ));
        assert!(harness.manager.favorites().is_empty());
    }

    #[test]
    fn test_search_returns_records_and_prefetches_thumbnails_by_row() {
        let mut harness = make_harness(
            200,
            FakeSource::default()
                .with_body(IMAGE_URL_A, b"jpeg-a")
                .with_body(IMAGE_URL_B, b"jpeg-b"),
        );

        let page = harness.manager.search("成都", 1).expect("search");
        assert_eq!(page.tracks.len(), 2);
        let batch = page.image_batch.expect("prefetch dispatched");

        let mut rows = Vec::new();
        for _ in 0..2 {
            let message =
                wait_for_message(&mut harness.receiver, Duration::from_secs(5), |message| {
                    matches!(message, Message::Fetch(FetchMessage::Completed { .. }))
                });
            if let Message::Fetch(FetchMessage::Completed {
                batch: got_batch,
                correlation_id,
                path,
            }) = message
            {
                assert_eq!(got_batch, batch);
                assert!(path.starts_with(harness.root.join("image")));
                rows.push(correlation_id);
            }
        }
        rows.sort_unstable();
        assert_eq!(rows, vec![0, 1]);
        assert!(harness.root.join("image").join("109951163.jpg").exists());
    }

    #[test]
    fn test_search_provider_error_dispatches_nothing() {
        let mut harness = make_harness(403, FakeSource::default());

        assert!(matches!(
            harness.manager.search("成都", 1),
            Err(LibraryError::Search(_))
        ));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(harness.source.call_count(), 0);
    }

    #[test]
    fn test_play_requires_cached_audio() {
        let mut harness = make_harness(
            200,
            FakeSource::default().with_body("http://m/1.mp3", &MP3_BYTES),
        );
        let song = track("成都", "http://m/1.mp3");

        assert!(matches!(
            harness.manager.play(&song),
            Err(PlaybackError::NotCached(_))
        ));

        let cache_dir = harness.root.join("temp");
        let cached = harness
            .manager
            .ensure_cached(&song, &cache_dir)
            .expect("cache");
        let played = harness.manager.play(&song).expect("play cached track");

        assert_eq!(played, cached);
        assert_eq!(
            harness.transport.loaded.lock().expect("loaded lock").clone(),
            vec![cached]
        );
        assert!(*harness.transport.playing.lock().expect("playing lock"));
    }

    #[test]
    fn test_download_goes_to_songs_dir() {
        let harness = make_harness(
            200,
            FakeSource::default().with_body("http://m/1.mp3", &MP3_BYTES),
        );
        let song = track("成都", "http://m/1.mp3");

        let path = harness.manager.download(&song).expect("download");

        assert_eq!(path, harness.root.join("songs").join("成都--赵雷.mp3"));
        assert!(path.exists());
    }

    #[test]
    fn test_background_load_posts_favorites() {
        let mut harness = make_harness(200, FakeSource::default());
        DbManager::open(&harness.root.join("music.db"))
            .expect("store")
            .insert_favorite(&NewFavorite::from(&track("成都", "http://m/1.mp3")))
            .expect("insert");

        harness.manager.load_favorites_in_background();

        let loaded = wait_for_message(&mut harness.receiver, Duration::from_secs(5), |message| {
            matches!(message, Message::Library(LibraryMessage::FavoritesLoaded(_)))
        });
        match loaded {
            Message::Library(LibraryMessage::FavoritesLoaded(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].title, "成都");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_shutdown_removes_thumbnails_and_is_idempotent() {
        let mut harness = make_harness(200, FakeSource::default().with_body(IMAGE_URL_A, b"a"));
        harness.manager.search("成都", 1).expect("search");
        wait_for_message(&mut harness.receiver, Duration::from_secs(5), |message| {
            matches!(message, Message::Fetch(_))
        });

        harness.manager.shutdown();
        harness.manager.shutdown();

        assert!(!harness.root.join("image").exists());
        assert!(harness.manager.search("成都", 1).is_ok_and(|page| page.image_batch.is_none()));
    }

    #[test]
    fn test_run_loop_serves_requests_until_shutdown() {
        let harness = make_harness(
            200,
            FakeSource::default().with_body("http://m/blocked.mp3", b"{\"code\":404}"),
        );
        let Harness {
            mut manager,
            mut receiver,
            _cleanup,
            ..
        } = harness;
        let bus_sender = manager.bus_producer.clone();
        let service = thread::spawn(move || {
            manager.run();
            manager
        });

        let _ = bus_sender.send(Message::Library(LibraryMessage::Search {
            query: "成都".to_string(),
            page: 1,
        }));
        let completed = wait_for_message(&mut receiver, Duration::from_secs(5), |message| {
            matches!(message, Message::Library(LibraryMessage::SearchCompleted { .. }))
        });
        if let Message::Library(LibraryMessage::SearchCompleted { tracks, page, .. }) = completed {
            assert_eq!(tracks.len(), 2);
            assert_eq!(page, 1);
        }

        let _ = bus_sender.send(Message::Library(LibraryMessage::FavoriteTrack(track(
            "blocked",
            "http://m/blocked.mp3",
        ))));
        let failed = wait_for_message(&mut receiver, Duration::from_secs(5), |message| {
            matches!(message, Message::Library(LibraryMessage::OperationFailed { .. }))
        });
        if let Message::Library(LibraryMessage::OperationFailed { action, kind, .. }) = failed {
            assert_eq!(action, LibraryAction::Favorite);
            assert_eq!(kind, UserFacingError::CopyrightOrInvalid);
        }

        let _ = bus_sender.send(Message::Library(LibraryMessage::Shutdown));
        wait_for_message(&mut receiver, Duration::from_secs(5), |message| {
            matches!(message, Message::Library(LibraryMessage::ShutdownComplete))
        });
        let manager = service.join().expect("service thread should exit cleanly");
        assert!(manager.favorites().is_empty());
    }

    fn playback_messages(receiver: &mut Receiver<Message>) -> Vec<PlaybackMessage> {
        let mut seen = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(Message::Playback(message)) => seen.push(message),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return seen,
            }
        }
    }

    #[test]
    fn test_toggle_pauses_then_resumes_and_stop_is_reported() {
        let mut harness = make_harness(
            200,
            FakeSource::default().with_body("http://m/1.mp3", &MP3_BYTES),
        );
        let song = track("成都", "http://m/1.mp3");
        let cache_dir = harness.root.join("temp");
        harness.manager.ensure_cached(&song, &cache_dir).expect("cache");
        let path = harness.manager.play(&song).expect("play");

        assert_eq!(harness.manager.toggle_playback().expect("pause"), path);
        assert!(!*harness.transport.playing.lock().expect("playing lock"));
        assert_eq!(harness.manager.toggle_playback().expect("resume"), path);
        assert!(*harness.transport.playing.lock().expect("playing lock"));
        harness.manager.stop_playback();

        assert!(!*harness.transport.playing.lock().expect("playing lock"));
        assert_eq!(
            playback_messages(&mut harness.receiver),
            vec![
                PlaybackMessage::Started { path },
                PlaybackMessage::Paused,
                PlaybackMessage::Resumed,
                PlaybackMessage::Stopped,
            ]
        );
    }

    #[test]
    fn test_toggle_with_nothing_loaded_plays_first_favorite() {
        let mut harness = make_harness(
            200,
            FakeSource::default()
                .with_body("http://m/first.mp3", &MP3_BYTES)
                .with_body("http://m/second.mp3", &MP3_BYTES),
        );
        {
            let mut store = DbManager::open(&harness.root.join("music.db")).expect("store");
            store
                .insert_favorite(&NewFavorite::from(&track("first", "http://m/first.mp3")))
                .expect("insert first");
            store
                .insert_favorite(&NewFavorite::from(&track("second", "http://m/second.mp3")))
                .expect("insert second");
        }

        let path = harness.manager.toggle_playback().expect("first favorite plays");

        assert_eq!(path, harness.root.join("temp").join("first--赵雷.mp3"));
        assert_eq!(
            harness.transport.loaded.lock().expect("loaded lock").clone(),
            vec![path]
        );
        assert_eq!(harness.source.call_count(), 1);
    }

    #[test]
    fn test_toggle_falls_back_to_first_search_row() {
        let mut harness = make_harness(
            200,
            FakeSource::default().with_body("http://music.example/1.mp3", &MP3_BYTES),
        );
        harness.manager.search("成都", 1).expect("search");

        let path = harness.manager.toggle_playback().expect("first row plays");

        assert_eq!(path, harness.root.join("temp").join("成都--赵雷.mp3"));
    }

    #[test]
    fn test_toggle_with_nothing_to_play_fails() {
        let mut harness = make_harness(200, FakeSource::default());

        let err = harness
            .manager
            .toggle_playback()
            .expect_err("no favorites and no results");

        assert!(matches!(
            err,
            LibraryError::Playback(PlaybackError::NothingToPlay)
        ));
        assert!(harness.transport.loaded.lock().expect("loaded lock").is_empty());
    }

    #[test]
    fn test_seek_volume_and_progress_go_through_the_transport() {
        let transport = RecordingTransport {
            duration_ms: 200_000,
            ..RecordingTransport::default()
        };
        let mut harness = make_harness_with_transport(200, FakeSource::default(), transport);

        assert_eq!(harness.manager.seek_to_progress(25), Some(50_000));
        harness.manager.set_volume(180);
        let progress = harness.manager.report_progress();

        assert_eq!(*harness.transport.volume.lock().expect("volume lock"), 100);
        assert_eq!(
            progress,
            PlaybackMessage::Progress {
                position_ms: 50_000,
                duration_ms: 200_000,
                percent: 25,
            }
        );
        assert_eq!(playback_messages(&mut harness.receiver), vec![progress]);
    }

    #[test]
    fn test_seek_without_known_duration_is_ignored() {
        let mut harness = make_harness(200, FakeSource::default());
        assert_eq!(harness.manager.seek_to_progress(50), None);
        assert_eq!(*harness.transport.position_ms.lock().expect("position lock"), 0);
    }

    #[test]
    fn test_favorite_many_stores_only_validated_tracks() {
        let mut harness = make_harness(
            200,
            FakeSource::default()
                .with_body("http://m/ok1.mp3", &MP3_BYTES)
                .with_body("http://m/text.mp3", b"<html>copyright</html>")
                .with_body("http://m/ok2.mp3", &MP3_BYTES),
        );
        let tracks = vec![
            track("ok one", "http://m/ok1.mp3"),
            track("blocked", "http://m/text.mp3"),
            track("missing", "http://m/none.mp3"),
            track("ok two", "http://m/ok2.mp3"),
        ];

        let (stored, rejected) = harness.manager.favorite_many(&tracks).expect("batch");

        assert_eq!(stored, 2);
        let rejected: Vec<(&str, FetchError)> = rejected
            .iter()
            .map(|(track, err)| (track.title(), err.clone()))
            .collect();
        assert_eq!(rejected[0], ("blocked", FetchError::CopyrightOrInvalid));
        assert!(matches!(rejected[1], ("missing", FetchError::Http(_))));
        let titles: Vec<&str> = harness
            .manager
            .favorites()
            .iter()
            .map(|entry| entry.title.as_str())
            .collect();
        assert_eq!(titles, vec!["ok one", "ok two"]);
    }
}
