//! Paginated catalog queries normalized into `TrackRecord`s.

use log::info;

use crate::backends::SearchProvider;
use crate::errors::SearchError;
use crate::track::TrackRecord;

const FIRST_PAGE: u32 = 1;

/// Remembers the last query so the pager can move through result pages.
pub struct SearchSession {
    provider: Box<dyn SearchProvider>,
    query: Option<String>,
    page: u32,
}

impl SearchSession {
    pub fn new(provider: Box<dyn SearchProvider>) -> Self {
        Self {
            provider,
            query: None,
            page: FIRST_PAGE,
        }
    }

    /// Runs `query` at `page` (clamped to 1) and records it as the current position.
    pub fn search(&mut self, query: &str, page: u32) -> Result<Vec<TrackRecord>, SearchError> {
        let page = page.max(FIRST_PAGE);
        self.query = Some(query.to_string());
        self.page = page;
        let raw = self.provider.search(query, page)?;
        let tracks: Vec<TrackRecord> = raw
            .iter()
            .map(|item| {
                TrackRecord::from_provider_fields(
                    &item.title,
                    &item.author,
                    &item.pic,
                    &item.lrc,
                    &item.url,
                )
            })
            .collect();
        info!(
            "Search '{}' page {} returned {} tracks",
            query,
            page,
            tracks.len()
        );
        Ok(tracks)
    }

    pub fn next_page(&mut self) -> Result<Vec<TrackRecord>, SearchError> {
        let query = self.current_query()?;
        self.search(&query, self.page.saturating_add(1))
    }

    pub fn previous_page(&mut self) -> Result<Vec<TrackRecord>, SearchError> {
        let query = self.current_query()?;
        self.search(&query, self.page.saturating_sub(1).max(FIRST_PAGE))
    }

    fn current_query(&self) -> Result<String, SearchError> {
        self.query
            .clone()
            .ok_or_else(|| SearchError::ProviderUnavailable("no previous search".to_string()))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}
