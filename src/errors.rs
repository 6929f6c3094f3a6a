//! Error taxonomy shared by the acquisition and library components.

use std::io;

use thiserror::Error;

/// Failure of a single asset download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Non-2xx status or a transport failure other than a timeout.
    #[error("http request failed: {0}")]
    Http(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The body was a text/placeholder response instead of binary media.
    #[error("downloaded content is not usable media (copyright protected or invalid)")]
    CopyrightOrInvalid,
    #[error("filesystem error: {0}")]
    Io(String),
    #[error("fetch cancelled")]
    Cancelled,
}

impl From<io::Error> for FetchError {
    fn from(error: io::Error) -> Self {
        if matches!(
            error.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ) {
            return FetchError::Timeout(error.to_string());
        }
        FetchError::Io(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// Non-200 provider code, malformed body, or transport failure.
    #[error("search provider unavailable: {0}")]
    ProviderUnavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The statement failed and its transaction was rolled back.
    #[error("store transaction failed: {0}")]
    Transactional(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("track is not cached at {0}")]
    NotCached(String),
    #[error("playback transport could not load {0}")]
    LoadFailed(String),
    #[error("no favorites or search results to play")]
    NothingToPlay,
}

/// Errors surfaced by the library manager's operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Category shown to the user for a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacingError {
    CopyrightOrInvalid,
    Network,
    Storage,
    NotCached,
    PlaybackRejected,
    NothingToPlay,
    ProviderUnavailable,
    Cancelled,
}

impl UserFacingError {
    pub fn message(self) -> &'static str {
        match self {
            UserFacingError::CopyrightOrInvalid => {
                "This track cannot be obtained (copyright protected or unavailable)"
            }
            UserFacingError::Network => "Network request failed, check your connection",
            UserFacingError::Storage => "Could not save to the local library",
            UserFacingError::NotCached => "Track has not been downloaded yet",
            UserFacingError::PlaybackRejected => "The player could not open this track",
            UserFacingError::NothingToPlay => "Nothing to play",
            UserFacingError::ProviderUnavailable => "No songs found or search service unavailable",
            UserFacingError::Cancelled => "Operation cancelled",
        }
    }
}

impl From<&LibraryError> for UserFacingError {
    fn from(error: &LibraryError) -> Self {
        match error {
            LibraryError::Fetch(FetchError::CopyrightOrInvalid) => {
                UserFacingError::CopyrightOrInvalid
            }
            LibraryError::Fetch(FetchError::Cancelled) => UserFacingError::Cancelled,
            LibraryError::Fetch(FetchError::Io(_)) => UserFacingError::Storage,
            LibraryError::Fetch(_) => UserFacingError::Network,
            LibraryError::Search(_) => UserFacingError::ProviderUnavailable,
            LibraryError::Store(_) => UserFacingError::Storage,
            LibraryError::Playback(PlaybackError::NotCached(_)) => UserFacingError::NotCached,
            LibraryError::Playback(PlaybackError::LoadFailed(_)) => {
                UserFacingError::PlaybackRejected
            }
            LibraryError::Playback(PlaybackError::NothingToPlay) => UserFacingError::NothingToPlay,
        }
    }
}
