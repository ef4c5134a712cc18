//! Request and result types for the pharmacy search.

use serde::Serialize;

/// Coordinates and page size for one search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParameters {
    pub latitude: f64,
    pub longitude: f64,
    result_limit: usize,
}

impl SearchParameters {
    /// Builds search parameters, clamping `result_limit` to at least 1.
    pub fn new(latitude: f64, longitude: f64, result_limit: i64) -> Self {
        let result_limit = usize::try_from(result_limit.max(1)).unwrap_or(usize::MAX);
        Self {
            latitude,
            longitude,
            result_limit,
        }
    }

    /// Maximum number of entries to return; never zero.
    pub fn result_limit(&self) -> usize {
        self.result_limit
    }
}

/// Short-lived access token scraped from the site's client assets.
///
/// Extracted fresh for every search and dropped when the search completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
}

impl AccessToken {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// Normalized search outcome.
///
/// `count` always equals the number of entries. A search without matches has
/// `count == 0` and serializes `data` as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    count: usize,
    #[serde(rename = "data")]
    entries: Option<Vec<serde_json::Value>>,
}

impl SearchResult {
    /// The zero-match result.
    pub fn empty() -> Self {
        Self {
            count: 0,
            entries: None,
        }
    }

    /// Wraps upstream pharmacy records, preserving their order.
    pub fn from_entries(entries: Vec<serde_json::Value>) -> Self {
        if entries.is_empty() {
            return Self::empty();
        }
        Self {
            count: entries.len(),
            entries: Some(entries),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// `None` for a zero-match search.
    pub fn entries(&self) -> Option<&[serde_json::Value]> {
        self.entries.as_deref()
    }

    /// The message published on the data topic:
    /// `{"results": {"count": <n>, "data": [...] | null}}`.
    pub fn to_message(&self) -> serde_json::Value {
        serde_json::json!({
            "results": {
                "count": self.count,
                "data": self.entries,
            }
        })
    }
}
