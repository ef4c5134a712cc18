//! HTTP client for the emergency pharmacy search on aponet.de.
//!
//! A search takes three requests: the search page, the asset file it
//! references (which embeds a short-lived token), and the search endpoint
//! itself. Each request is attempted once.

use std::time::Duration;

use notdienst_core::AppConfig;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::Client;

use crate::error::{ScrapeFailure, ScrapeStage};
use crate::extract::{extract_token, extract_token_file_ref};
use crate::normalize::normalize_results;
use crate::types::{AccessToken, SearchParameters, SearchResult};

/// Bytes left as-is when encoding the token: ASCII alphanumerics and `-_.`.
const TOKEN_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Value of the `type` discriminator the search endpoint expects.
const SEARCH_PAGE_TYPE: u32 = 1981;

/// Settings the scrape needs, taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Site root without a trailing slash.
    pub base_uri: String,
    pub search_uri: String,
    pub token_file_pattern: Regex,
    pub token_pattern: Regex,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl ScrapeConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_uri: config.eps_base_uri.clone(),
            search_uri: config.eps_search_uri.clone(),
            token_file_pattern: config.token_file_pattern.clone(),
            token_pattern: config.token_pattern.clone(),
            timeout_secs: config.request_timeout_secs,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Client for the pharmacy search.
///
/// Holds no per-request state: every call to
/// [`ScrapeClient::fetch_nearest_pharmacies`] extracts its own token.
pub struct ScrapeClient {
    client: Client,
    config: ScrapeConfig,
}

impl ScrapeClient {
    /// Creates a client with the configured request timeout and `User-Agent`.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the underlying client cannot be
    /// constructed (e.g., invalid TLS config).
    pub fn new(config: ScrapeConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client, config })
    }

    /// Runs the full scrape for `params` and returns the nearest pharmacies
    /// on emergency duty.
    ///
    /// # Errors
    ///
    /// Returns a [`ScrapeFailure`] tagged with the first stage that failed.
    pub async fn fetch_nearest_pharmacies(
        &self,
        params: &SearchParameters,
    ) -> Result<SearchResult, ScrapeFailure> {
        let search_uri = &self.config.search_uri;
        let page = self
            .fetch_text(search_uri, ScrapeStage::FetchSearchPage)
            .await?;

        let reference =
            extract_token_file_ref(&self.config.token_file_pattern, &page, search_uri)?;
        let token_file_uri = self.token_file_uri(reference);
        tracing::debug!(token_file_uri, "located token file");

        let script = self
            .fetch_text(&token_file_uri, ScrapeStage::FetchTokenFile)
            .await?;
        let token = extract_token(&self.config.token_pattern, &script, &token_file_uri)?;

        let url = self.search_url(params, &token);
        tracing::debug!(url, "requesting search results");

        let body = self.fetch_search_results(&url).await?;
        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            ScrapeFailure::new(
                ScrapeStage::ParseResults,
                format!("search response from {search_uri} is not valid JSON: {e}"),
            )
        })?;

        let result = normalize_results(&value, params.result_limit())?;
        tracing::debug!(count = result.count(), "search results normalized");
        Ok(result)
    }

    /// Resolves a matched asset reference against the site root.
    fn token_file_uri(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_uri,
            reference.trim_start_matches('/')
        )
    }

    /// Builds the search endpoint URL.
    ///
    /// Coordinates are written as plain numbers and the bracketed parameter
    /// names are left unencoded; only the token is percent-encoded.
    fn search_url(&self, params: &SearchParameters, token: &AccessToken) -> String {
        format!(
            "{search}?tx_aponetpharmacy_search[action]=result\
             &tx_aponetpharmacy_search[controller]=Search\
             &tx_aponetpharmacy_search[search][lat]={lat}\
             &tx_aponetpharmacy_search[search][lng]={lng}\
             &tx_aponetpharmacy_search[search][radius]=0\
             &tx_aponetpharmacy_search[token]={token}\
             &type={SEARCH_PAGE_TYPE}",
            search = self.config.search_uri,
            lat = params.latitude,
            lng = params.longitude,
            token = utf8_percent_encode(token.as_str(), TOKEN_ENCODE_SET),
        )
    }

    /// GETs `url` and returns its non-empty body.
    async fn fetch_text(&self, url: &str, stage: ScrapeStage) -> Result<String, ScrapeFailure> {
        let response = self.client.get(url).send().await.map_err(|e| {
            ScrapeFailure::new(stage, format!("could not get the content of {url}: {e}"))
        })?;
        Self::read_body(response, url, stage).await
    }

    async fn fetch_search_results(&self, url: &str) -> Result<String, ScrapeFailure> {
        let stage = ScrapeStage::FetchSearchResults;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::ACCEPT_CHARSET, "utf-8, iso-8859-1")
            .send()
            .await
            .map_err(|e| {
                ScrapeFailure::new(
                    stage,
                    format!("could not get search results from {}: {e}", self.config.search_uri),
                )
            })?;
        Self::read_body(response, &self.config.search_uri, stage).await
    }

    async fn read_body(
        response: reqwest::Response,
        url: &str,
        stage: ScrapeStage,
    ) -> Result<String, ScrapeFailure> {
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeFailure::new(
                stage,
                format!("unexpected HTTP status {} from {url}", status.as_u16()),
            ));
        }

        let body = response.text().await.map_err(|e| {
            ScrapeFailure::new(stage, format!("could not read the body of {url}: {e}"))
        })?;
        if body.trim().is_empty() {
            return Err(ScrapeFailure::new(stage, format!("empty response from {url}")));
        }
        Ok(body)
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
