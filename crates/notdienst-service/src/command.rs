//! Inbound command messages.
//!
//! Shape: `{"command": "update", "vars": {"latitude": 51.9, "longitude": 8.8, "show": 3}}`.
//! Every field of `vars`, and `vars` itself, is optional.

use notdienst_scraper::SearchParameters;
use serde::Deserialize;
use serde_json::Value;

/// What a command asks the service to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Scrape the current emergency pharmacies and publish them.
    Update,
    /// Missing, empty or unsupported action; carries the raw value.
    Unknown(String),
}

impl Action {
    fn from_field(raw: Option<&Value>) -> Self {
        match raw.and_then(Value::as_str) {
            Some("update") => Action::Update,
            Some(other) => Action::Unknown(other.to_string()),
            None => Action::Unknown(String::new()),
        }
    }
}

/// A decoded command message.
#[derive(Debug, Clone)]
pub struct Command {
    pub action: Action,
    /// The `vars` member, `Value::Null` when absent.
    pub parameters: Value,
    /// The whole decoded message, echoed back in error reports.
    pub payload: Value,
}

impl Command {
    /// Decodes a raw message body.
    ///
    /// Any valid JSON decodes; shape problems surface later as an unknown
    /// action or invalid parameters.
    ///
    /// # Errors
    ///
    /// Returns the decoder error if `raw` is not valid JSON.
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_slice(raw)?;
        let action = Action::from_field(payload.get("command"));
        let parameters = payload.get("vars").cloned().unwrap_or(Value::Null);
        Ok(Self {
            action,
            parameters,
            payload,
        })
    }

    /// Search parameters for an `update`, falling back to the configured
    /// coordinates and a single result.
    ///
    /// # Errors
    ///
    /// Returns the decoder error if `vars` is not an object or a field has the
    /// wrong type.
    pub fn search_parameters(
        &self,
        default_latitude: f64,
        default_longitude: f64,
    ) -> Result<SearchParameters, serde_json::Error> {
        let vars = match &self.parameters {
            Value::Null => UpdateVars::default(),
            object @ Value::Object(_) => UpdateVars::deserialize(object)?,
            _ => return Err(serde::de::Error::custom("vars must be an object")),
        };
        Ok(SearchParameters::new(
            vars.latitude.unwrap_or(default_latitude),
            vars.longitude.unwrap_or(default_longitude),
            vars.show.unwrap_or(1),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct UpdateVars {
    latitude: Option<f64>,
    longitude: Option<f64>,
    show: Option<i64>,
}
