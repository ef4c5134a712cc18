use serde::Serialize;
use thiserror::Error;

/// The step of the scrape protocol at which a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScrapeStage {
    FetchSearchPage,
    ExtractTokenFileRef,
    FetchTokenFile,
    ExtractToken,
    FetchSearchResults,
    ParseResults,
}

impl std::fmt::Display for ScrapeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeStage::FetchSearchPage => write!(f, "fetch search page"),
            ScrapeStage::ExtractTokenFileRef => write!(f, "extract token file reference"),
            ScrapeStage::FetchTokenFile => write!(f, "fetch token file"),
            ScrapeStage::ExtractToken => write!(f, "extract token"),
            ScrapeStage::FetchSearchResults => write!(f, "fetch search results"),
            ScrapeStage::ParseResults => write!(f, "parse search results"),
        }
    }
}

/// A failed scrape, tagged with the stage that failed.
///
/// Lives only as long as it takes to report it on the error topic.
#[derive(Debug, Error)]
#[error("{stage} failed: {message}")]
pub struct ScrapeFailure {
    pub stage: ScrapeStage,
    pub message: String,
}

impl ScrapeFailure {
    pub(crate) fn new(stage: ScrapeStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}
