//! Token discovery in the search page and its client-side assets.
//!
//! Both steps insist on exactly one match. More than one means the page
//! layout changed and picking any of them could send a stale token.

use regex::Regex;

use crate::error::{ScrapeFailure, ScrapeStage};
use crate::types::AccessToken;

/// Find the single reference to the asset file that carries the token.
///
/// `source` names the page for error messages.
///
/// # Errors
///
/// Returns [`ScrapeStage::ExtractTokenFileRef`] if `pattern` matches zero or
/// more than one time.
pub fn extract_token_file_ref<'a>(
    pattern: &Regex,
    page: &'a str,
    source: &str,
) -> Result<&'a str, ScrapeFailure> {
    let matches: Vec<&str> = pattern.find_iter(page).map(|m| m.as_str()).collect();
    match matches.as_slice() {
        [reference] => Ok(*reference),
        other => Err(ScrapeFailure::new(
            ScrapeStage::ExtractTokenFileRef,
            format!(
                "expected exactly one token file reference in {source}, found {}",
                other.len()
            ),
        )),
    }
}

/// Capture the token from the asset file content.
///
/// # Errors
///
/// Returns [`ScrapeStage::ExtractToken`] unless `pattern` matches exactly
/// once with a non-empty first capture group.
pub fn extract_token(
    pattern: &Regex,
    content: &str,
    source: &str,
) -> Result<AccessToken, ScrapeFailure> {
    let tokens: Vec<Option<&str>> = pattern
        .captures_iter(content)
        .map(|caps| caps.get(1).map(|m| m.as_str()).filter(|t| !t.is_empty()))
        .collect();
    match tokens.as_slice() {
        [Some(token)] => Ok(AccessToken::new(*token)),
        [None] => Err(ScrapeFailure::new(
            ScrapeStage::ExtractToken,
            format!("token pattern matched in {source} but captured nothing"),
        )),
        other => Err(ScrapeFailure::new(
            ScrapeStage::ExtractToken,
            format!(
                "expected exactly one token in {source}, found {}",
                other.len()
            ),
        )),
    }
}
