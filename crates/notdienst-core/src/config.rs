use regex::Regex;

use crate::app_config::{AppConfig, Topics};
use crate::{ConfigError, SERVICE_NAME};

const DEFAULT_BASE_TOPIC: &str = "maschinengeist/services/safety/health/eps";
const DEFAULT_EPS_URI: &str = "https://www.aponet.de";
const DEFAULT_SEARCH_PATH: &str = "/apotheke/notdienstsuche";
const DEFAULT_TOKEN_FILE_PATTERN: &str = r"/typo3temp/assets/compressed/pharmacymap-\w+?\.js";
const DEFAULT_TOKEN_PATTERN: &str = r"randomToken\s*=\s*'(\w+)'";
const DEFAULT_MAX_PACKET_SIZE: u64 = 256 * 1024;
const MIN_PACKET_SIZE: u64 = 1024;
/// Largest remaining length an MQTT 3.1.1 packet can encode.
const MAX_PACKET_SIZE: u64 = 268_435_455;

/// Load service configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but malformed or out of range.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load service configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but malformed or out of range.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build service configuration using the provided env-var lookup function.
///
/// Every setting has a default, so an empty environment yields a valid config.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let non_empty = |var: &str, default: &str| -> Result<String, ConfigError> {
        let raw = or_default(var, default);
        if raw.trim().is_empty() {
            return Err(invalid(var, "must not be empty"));
        }
        Ok(raw)
    };

    let optional = |var: &str| -> Option<String> { lookup(var).ok().filter(|v| !v.is_empty()) };

    let parse_bounded = |var: &str, default: &str, min: u64, max: u64| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        let value = raw
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(var, &e.to_string()))?;
        if !(min..=max).contains(&value) {
            return Err(out_of_range(var, &raw, &format!("{min}..={max}")));
        }
        Ok(value)
    };

    let mqtt_host = non_empty("MQTT_HOST", "message-broker")?;
    let mqtt_port = parse_port("MQTT_PORT", &or_default("MQTT_PORT", "1883"))?;
    let mqtt_username = optional("MQTT_USERNAME");
    let mqtt_password = optional("MQTT_PASSWORD");
    let mqtt_client_id = non_empty("MQTT_CLIENT_ID", SERVICE_NAME)?;
    let mqtt_keep_alive = lookup("MQTT_KEEP_ALIVE")
        .ok()
        .and_then(|raw| parse_flag(&raw))
        .unwrap_or(true);
    // The CONNECT packet carries the interval as a 16-bit value.
    let mqtt_keep_alive_secs = parse_bounded(
        "MQTT_KEEP_ALIVE_SECS",
        "60",
        1,
        u64::from(u16::MAX),
    )?;
    let mqtt_max_packet_size = parse_bounded(
        "MQTT_MAX_PACKET_SIZE",
        &DEFAULT_MAX_PACKET_SIZE.to_string(),
        MIN_PACKET_SIZE,
        MAX_PACKET_SIZE,
    )?;
    let mqtt_max_packet_size = usize::try_from(mqtt_max_packet_size)
        .map_err(|e| invalid("MQTT_MAX_PACKET_SIZE", &e.to_string()))?;

    let base = non_empty("MQTT_BASE_TOPIC", DEFAULT_BASE_TOPIC)?;
    let derived = Topics::from_base(&base);
    let topics = Topics {
        data: non_empty("MQTT_DATA_TOPIC", &derived.data)?,
        error: non_empty("MQTT_ERROR_TOPIC", &derived.error)?,
        command: non_empty("MQTT_COMMAND_TOPIC", &derived.command)?,
        lwt: non_empty("MQTT_LWT_TOPIC", &derived.lwt)?,
        base: derived.base,
    };

    let eps_base_uri = parse_base_uri("EPS_URI", &or_default("EPS_URI", DEFAULT_EPS_URI))?;
    let search_path = or_default("EPS_SEARCH_PATH", DEFAULT_SEARCH_PATH);
    let eps_search_uri = format!("{eps_base_uri}/{}", search_path.trim_start_matches('/'));

    let token_file_pattern = parse_pattern(
        "EPS_TOKEN_FILE_PATTERN",
        &or_default("EPS_TOKEN_FILE_PATTERN", DEFAULT_TOKEN_FILE_PATTERN),
    )?;
    let token_pattern = parse_pattern(
        "EPS_TOKEN_PATTERN",
        &or_default("EPS_TOKEN_PATTERN", DEFAULT_TOKEN_PATTERN),
    )?;
    if token_pattern.captures_len() < 2 {
        return Err(invalid(
            "EPS_TOKEN_PATTERN",
            "pattern needs a capture group for the token",
        ));
    }

    let request_timeout_secs = parse_bounded("EPS_REQUEST_TIMEOUT_SECS", "30", 1, u64::MAX)?;
    let user_agent = or_default(
        "EPS_USER_AGENT",
        concat!("notdienst/", env!("CARGO_PKG_VERSION")),
    );

    let default_latitude = parse_coordinate(
        "DEFAULT_LATITUDE",
        &or_default("DEFAULT_LATITUDE", "51.9117"),
        90.0,
    )?;
    let default_longitude = parse_coordinate(
        "DEFAULT_LONGITUDE",
        &or_default("DEFAULT_LONGITUDE", "8.8394"),
        180.0,
    )?;

    let log_level = or_default("LOG_LEVEL", "info");
    let verbose = lookup("VERBOSE")
        .ok()
        .and_then(|raw| parse_flag(&raw))
        .unwrap_or(false);

    Ok(AppConfig {
        mqtt_host,
        mqtt_port,
        mqtt_username,
        mqtt_password,
        mqtt_client_id,
        mqtt_keep_alive,
        mqtt_keep_alive_secs,
        mqtt_max_packet_size,
        topics,
        eps_base_uri,
        eps_search_uri,
        token_file_pattern,
        token_pattern,
        request_timeout_secs,
        user_agent,
        default_latitude,
        default_longitude,
        log_level,
        verbose,
    })
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

fn out_of_range(var: &str, value: &str, range: &str) -> ConfigError {
    ConfigError::OutOfRange {
        var: var.to_string(),
        value: value.trim().to_string(),
        range: range.to_string(),
    }
}

/// Non-integers and integers outside 1..=65535 are reported separately.
fn parse_port(var: &str, raw: &str) -> Result<u16, ConfigError> {
    let value = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| invalid(var, &format!("'{}' is not an integer", raw.trim())))?;
    u16::try_from(value)
        .ok()
        .filter(|port| *port >= 1)
        .ok_or_else(|| out_of_range(var, raw, "1..=65535"))
}

fn parse_base_uri(var: &str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(var, "is set but empty"));
    }
    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| invalid(var, &format!("'{trimmed}' does not look like a valid URI: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid(
            var,
            &format!("'{trimmed}' must be an http(s) URI with a host"),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn parse_pattern(var: &str, raw: &str) -> Result<Regex, ConfigError> {
    Regex::new(raw).map_err(|e| invalid(var, &e.to_string()))
}

fn parse_coordinate(var: &str, raw: &str, bound: f64) -> Result<f64, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(var, "is set but empty"));
    }
    let value = trimmed
        .parse::<f64>()
        .map_err(|_| invalid(var, &format!("'{trimmed}' does not look like a float")))?;
    if !(-bound..=bound).contains(&value) {
        return Err(out_of_range(var, trimmed, &format!("-{bound}..={bound}")));
    }
    Ok(value)
}

/// Lenient boolean parsing. Returns `None` for anything unrecognized so the
/// caller can pick its own fallback.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
