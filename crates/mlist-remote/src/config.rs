use serde::{Deserialize, Serialize};

/// Default per-request timeout for HTTP transports.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Credentials and connection flags for one registry host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub host: String,
    /// Use plain HTTP instead of HTTPS.
    #[serde(default)]
    pub insecure: bool,
    /// Static bearer token sent on every request.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl RegistryConfig {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_basic(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_owned());
        self.password = Some(password.to_owned());
        self
    }

    #[must_use]
    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub(crate) fn basic_credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u, p)),
            _ => None,
        }
    }
}

/// Settings shared by the HTTP-backed transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
    /// Docker Engine endpoint, e.g. `http://127.0.0.1:2375` or `tcp://host:2375`.
    #[serde(default)]
    pub daemon_host: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            registries: Vec::new(),
            daemon_host: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TransportConfig {
    pub fn registry(&self, host: &str) -> Option<&RegistryConfig> {
        self.registries.iter().find(|r| r.host == host)
    }
}
