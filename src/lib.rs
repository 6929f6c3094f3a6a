//! Media acquisition and local library engine for the freetune music client.

pub mod app_bootstrap;
pub mod asset_fetcher;
pub mod backends;
pub mod config;
pub mod db_manager;
pub mod errors;
pub mod fetch_coordinator;
pub mod library;
pub mod media_validator;
pub mod playback;
pub mod protocol;
pub mod search_session;
pub mod track;
