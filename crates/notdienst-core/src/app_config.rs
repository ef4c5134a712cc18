use regex::Regex;

/// Broker topics used by the service.
///
/// All four are derived from the base topic unless overridden individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    /// Successful search results.
    pub data: String,
    /// Failure reports.
    pub error: String,
    /// Inbound commands.
    pub command: String,
    /// Online/offline status and last will.
    pub lwt: String,
}

impl Topics {
    /// Derives the default topic set from `base` using the fixed suffixes.
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            base: base.to_string(),
            data: format!("{base}/data"),
            error: format!("{base}/errors"),
            command: format!("{base}/command"),
            lwt: format!("{base}/lwt"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keep_alive: bool,
    pub mqtt_keep_alive_secs: u64,
    /// Upper bound for MQTT packets in both directions, in bytes.
    pub mqtt_max_packet_size: usize,
    pub topics: Topics,
    /// Site root without a trailing slash, e.g. `https://www.aponet.de`.
    pub eps_base_uri: String,
    /// Search page and search endpoint, `eps_base_uri` joined with the search path.
    pub eps_search_uri: String,
    /// Locates the client-side asset that carries the live token.
    pub token_file_pattern: Regex,
    /// Captures the token itself in group 1.
    pub token_pattern: Regex,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub default_latitude: f64,
    pub default_longitude: f64,
    pub log_level: String,
    pub verbose: bool,
}

impl AppConfig {
    /// The tracing filter directive to use when `RUST_LOG` is not set.
    pub fn effective_log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("mqtt_host", &self.mqtt_host)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_username", &self.mqtt_username)
            .field(
                "mqtt_password",
                &self.mqtt_password.as_ref().map(|_| "[redacted]"),
            )
            .field("mqtt_client_id", &self.mqtt_client_id)
            .field("mqtt_keep_alive", &self.mqtt_keep_alive)
            .field("mqtt_keep_alive_secs", &self.mqtt_keep_alive_secs)
            .field("mqtt_max_packet_size", &self.mqtt_max_packet_size)
            .field("topics", &self.topics)
            .field("eps_base_uri", &self.eps_base_uri)
            .field("eps_search_uri", &self.eps_search_uri)
            .field("token_file_pattern", &self.token_file_pattern.as_str())
            .field("token_pattern", &self.token_pattern.as_str())
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("default_latitude", &self.default_latitude)
            .field("default_longitude", &self.default_longitude)
            .field("log_level", &self.log_level)
            .field("verbose", &self.verbose)
            .finish()
    }
}
