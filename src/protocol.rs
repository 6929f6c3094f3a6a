//! Event-bus protocol shared by all runtime components.
//!
//! Services never mutate state owned by the control flow; requests and
//! results travel as messages over one `tokio::sync::broadcast` bus.

use std::path::PathBuf;

use crate::db_manager::FavoriteEntry;
use crate::errors::UserFacingError;
use crate::track::TrackRecord;

/// Identifies one dispatched group of fetch tasks.
pub type BatchId = u64;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Library(LibraryMessage),
    Fetch(FetchMessage),
    Playback(PlaybackMessage),
}

/// Library-domain requests and notifications.
#[derive(Debug, Clone)]
pub enum LibraryMessage {
    Search {
        query: String,
        page: u32,
    },
    /// Re-run the last query one page further.
    NextPage,
    /// Re-run the last query one page back (never below page 1).
    PreviousPage,
    /// Cache into the play cache and start playback.
    PlayTrack(TrackRecord),
    /// Save into the songs directory.
    DownloadTrack(TrackRecord),
    FavoriteTrack(TrackRecord),
    /// Favorite several tracks, storing every one that caches successfully.
    FavoriteTracks(Vec<TrackRecord>),
    RemoveFavorite(i64),
    LoadFavorites,
    /// Pause when playing, resume when paused, otherwise start the first
    /// favorite (or the first search result when there are no favorites).
    TogglePlayback,
    StopPlayback,
    /// Percent, `0..=100`.
    SetVolume(u8),
    /// Seek-bar value in percent of the current track's duration.
    SeekToProgress(u8),
    /// Ask for a `PlaybackMessage::Progress` report.
    QueryProgress,
    Shutdown,

    /// Search results; thumbnails follow as `FetchMessage`s of `image_batch`.
    SearchCompleted {
        query: String,
        page: u32,
        tracks: Vec<TrackRecord>,
        image_batch: Option<BatchId>,
    },
    SearchFailed {
        query: String,
        page: u32,
        error: String,
    },
    TrackCached {
        track: TrackRecord,
        path: PathBuf,
    },
    TrackDownloaded {
        track: TrackRecord,
        path: PathBuf,
    },
    FavoriteAdded {
        id: i64,
        track: TrackRecord,
    },
    FavoritesBatchAdded {
        stored: usize,
        rejected: usize,
    },
    /// Authoritative favorites listing re-read from the store.
    FavoritesUpdated(Vec<FavoriteEntry>),
    /// Background load result; empty when the load failed.
    FavoritesLoaded(Vec<FavoriteEntry>),
    OperationFailed {
        action: LibraryAction,
        kind: UserFacingError,
        detail: String,
    },
    ShutdownComplete,
}

/// Action named in `LibraryMessage::OperationFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryAction {
    Play,
    /// Toggle, stop, volume and seek requests.
    Playback,
    Download,
    Favorite,
    RemoveFavorite,
}

/// Per-task completion notifications from the fetch coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMessage {
    Completed {
        batch: BatchId,
        correlation_id: usize,
        path: PathBuf,
    },
    Failed {
        batch: BatchId,
        correlation_id: usize,
        error: String,
    },
}

impl FetchMessage {
    pub fn batch(&self) -> BatchId {
        match self {
            FetchMessage::Completed { batch, .. } | FetchMessage::Failed { batch, .. } => *batch,
        }
    }

    pub fn correlation_id(&self) -> usize {
        match self {
            FetchMessage::Completed { correlation_id, .. }
            | FetchMessage::Failed { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Playback transport state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackMessage {
    Started {
        path: PathBuf,
    },
    Paused,
    Resumed,
    Stopped,
    Progress {
        position_ms: u64,
        duration_ms: u64,
        percent: u8,
    },
}
