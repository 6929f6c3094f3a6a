//! Form-post music search adapter (`{input, filter, type, page}` → `{code, data}`).

use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::backends::{ProviderTrack, SearchProvider};
use crate::config::ProviderConfig;
use crate::errors::SearchError;

const SUCCESS_CODE: i64 = 200;
// Mirrors the provider's behaviour of treating a missing code as forbidden.
const MISSING_CODE: i64 = 403;

/// Search adapter backed by `ureq`.
pub struct RicuoSearchAdapter {
    http_client: ureq::Agent,
    endpoint: String,
    source: String,
    user_agent: String,
}

impl RicuoSearchAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            http_client,
            endpoint: config.endpoint.trim().to_string(),
            source: config.source.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    fn request_json(&self, query: &str, page: u32) -> Result<Value, SearchError> {
        let page = page.to_string();
        let response = self
            .http_client
            .post(&self.endpoint)
            .set("User-Agent", &self.user_agent)
            .set("x-requested-with", "XMLHttpRequest")
            .send_form(&[
                ("input", query),
                ("filter", "name"),
                ("type", self.source.as_str()),
                ("page", page.as_str()),
            ])
            .map_err(|err| {
                SearchError::ProviderUnavailable(format!("search request failed: {err}"))
            })?;
        response.into_json::<Value>().map_err(|err| {
            SearchError::ProviderUnavailable(format!("search response parse failed: {err}"))
        })
    }

    fn string_field(item: &Value, key: &str) -> String {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Maps a decoded `{code, data}` payload onto provider tracks.
    pub fn parse_search_payload(payload: &Value) -> Result<Vec<ProviderTrack>, SearchError> {
        let code = payload
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(MISSING_CODE);
        if code != SUCCESS_CODE {
            return Err(SearchError::ProviderUnavailable(format!(
                "provider returned code {code}"
            )));
        }
        let items = match payload.get("data") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(SearchError::ProviderUnavailable(
                    "provider data is not a list".to_string(),
                ))
            }
        };
        Ok(items
            .iter()
            .map(|item| ProviderTrack {
                title: Self::string_field(item, "title"),
                author: Self::string_field(item, "author"),
                pic: Self::string_field(item, "pic"),
                lrc: Self::string_field(item, "lrc"),
                url: Self::string_field(item, "url"),
            })
            .collect())
    }
}

impl SearchProvider for RicuoSearchAdapter {
    fn search(&self, query: &str, page: u32) -> Result<Vec<ProviderTrack>, SearchError> {
        debug!("Searching provider for '{}' (page {})", query, page);
        let payload = self.request_json(query, page)?;
        Self::parse_search_payload(&payload).inspect_err(|err| {
            warn!("Search for '{}' page {} failed: {}", query, page, err);
        })
    }
}
