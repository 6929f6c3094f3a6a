//! Search provider abstractions and concrete implementations.

pub mod ricuo;

use crate::errors::SearchError;

/// Raw search result payload returned by provider adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderTrack {
    pub title: String,
    pub author: String,
    pub pic: String,
    /// Full lyrics text; credits are embedded as labeled lines.
    pub lrc: String,
    pub url: String,
}

/// Interface implemented by concrete catalog search adapters.
pub trait SearchProvider: Send + Sync {
    fn search(&self, query: &str, page: u32) -> Result<Vec<ProviderTrack>, SearchError>;
}
