//! Normalization of the upstream search response.
//!
//! ## Observed shape
//!
//! ```json
//! {"results": {
//!     "statistik": {"anzahl": 2},
//!     "apotheken": {"apotheke": [{...}, {...}]}
//! }}
//! ```
//!
//! `anzahl` is the match count. Pharmacy records are passed through untouched.
//! Some responses carry a single record as an object instead of a one-element
//! array; both are accepted.

use serde_json::Value;

use crate::error::{ScrapeFailure, ScrapeStage};
use crate::types::SearchResult;

/// Turn a decoded search response into a [`SearchResult`] holding at most
/// `limit` entries, in upstream order.
///
/// A reported count of zero is a valid, empty result.
///
/// # Errors
///
/// Returns [`ScrapeStage::ParseResults`] if the count is missing, or if a
/// non-zero count comes without a usable entry list. An empty list counts as
/// unusable.
pub fn normalize_results(body: &Value, limit: usize) -> Result<SearchResult, ScrapeFailure> {
    let reported = body
        .pointer("/results/statistik/anzahl")
        .and_then(as_count)
        .ok_or_else(|| {
            ScrapeFailure::new(
                ScrapeStage::ParseResults,
                "response has no results.statistik.anzahl count",
            )
        })?;

    if reported == 0 {
        tracing::debug!("search returned no pharmacies");
        return Ok(SearchResult::empty());
    }

    let entries = match body.pointer("/results/apotheken/apotheke") {
        Some(Value::Array(items)) if !items.is_empty() => {
            items.iter().take(limit).cloned().collect()
        }
        Some(item @ Value::Object(_)) => vec![item.clone()],
        _ => {
            return Err(ScrapeFailure::new(
                ScrapeStage::ParseResults,
                format!("response reports {reported} matches but has no results.apotheken.apotheke list"),
            ));
        }
    };

    Ok(SearchResult::from_entries(entries))
}

fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(count: u64, entries: Value) -> Value {
        json!({
            "results": {
                "statistik": {"anzahl": count},
                "apotheken": {"apotheke": entries}
            }
        })
    }

    #[test]
    fn zero_count_is_empty_result() {
        let body = json!({"results": {"statistik": {"anzahl": 0}}});
        assert_eq!(normalize_results(&body, 1).unwrap(), SearchResult::empty());
    }

    #[test]
    fn truncates_to_limit_preserving_order() {
        let body = response(
            3,
            json!([{"name": "Adler"}, {"name": "Bären"}, {"name": "Central"}]),
        );
        let result = normalize_results(&body, 2).unwrap();
        assert_eq!(result.count(), 2);
        assert_eq!(
            result.entries().unwrap(),
            &[json!({"name": "Adler"}), json!({"name": "Bären"})]
        );
    }

    #[test]
    fn limit_above_available_returns_everything() {
        let body = response(2, json!([{"name": "Adler"}, {"name": "Bären"}]));
        let result = normalize_results(&body, 10).unwrap();
        assert_eq!(result.count(), 2);
    }

    #[test]
    fn single_object_entry_is_accepted() {
        let body = response(1, json!({"name": "Adler"}));
        let result = normalize_results(&body, 5).unwrap();
        assert_eq!(result.count(), 1);
        assert_eq!(result.entries().unwrap()[0], json!({"name": "Adler"}));
    }

    #[test]
    fn string_count_is_accepted() {
        let body = json!({"results": {"statistik": {"anzahl": "0"}}});
        assert_eq!(normalize_results(&body, 1).unwrap(), SearchResult::empty());
    }

    #[test]
    fn missing_count_is_parse_failure() {
        let err = normalize_results(&json!({"results": {}}), 1).unwrap_err();
        assert_eq!(err.stage, ScrapeStage::ParseResults);
    }

    #[test]
    fn positive_count_with_empty_list_is_parse_failure() {
        let err = normalize_results(&response(3, json!([])), 1).unwrap_err();
        assert_eq!(err.stage, ScrapeStage::ParseResults);
        assert!(err.message.contains("reports 3 matches"), "{}", err.message);
    }

    #[test]
    fn positive_count_without_entries_is_parse_failure() {
        let body = json!({"results": {"statistik": {"anzahl": 2}}});
        let err = normalize_results(&body, 1).unwrap_err();
        assert_eq!(err.stage, ScrapeStage::ParseResults);
        assert!(err.message.contains("2 matches"), "{}", err.message);
    }
}
