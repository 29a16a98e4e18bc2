//! Client configuration
//!
//! Values come from explicit setters or from `CRUX_*` environment variables
//! (with `.env` support). Nothing else in the crate reads the environment.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::Result;

pub const DEFAULT_API_HOST: &str = "https://api.cruxinformatics.com";
pub const DEFAULT_API_PREFIX: &str = "plat-api";

pub const ENV_API_KEY: &str = "CRUX_API_KEY";
pub const ENV_API_HOST: &str = "CRUX_API_HOST";
pub const ENV_API_PREFIX: &str = "CRUX_API_PREFIX";
pub const ENV_ONLY_USE_CRUX_DOMAINS: &str = "CRUX_ONLY_USE_CRUX_DOMAINS";

/// Connection settings for the platform API
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_host: String,
    pub api_prefix: String,
    /// Scheme (`http`, `https`, `all`) to proxy URL
    pub proxies: HashMap<String, String>,
    pub user_agent: String,
    /// Route all content through the API instead of storage URLs
    pub only_use_crux_domains: bool,
}

impl ClientConfig {
    /// Config with defaults for everything but the key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_host: DEFAULT_API_HOST.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            proxies: HashMap::new(),
            user_agent: default_user_agent(),
            only_use_crux_domains: false,
        }
    }

    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY).ok_or_else(|| Error::Configuration {
            message: format!("{ENV_API_KEY} is required"),
        })?;

        let mut config = Self::new(api_key);
        if let Some(host) = lookup(ENV_API_HOST) {
            config = config.with_api_host(host);
        }
        if let Some(prefix) = lookup(ENV_API_PREFIX) {
            config = config.with_api_prefix(prefix);
        }
        if let Some(flag) = lookup(ENV_ONLY_USE_CRUX_DOMAINS) {
            config.only_use_crux_domains = str_to_bool(&flag)?;
            debug!(only_use_crux_domains = config.only_use_crux_domains, "domain restriction set");
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn with_proxy(mut self, scheme: impl Into<String>, url: impl Into<String>) -> Self {
        self.proxies.insert(scheme.into(), url.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_only_use_crux_domains(mut self, only: bool) -> Self {
        self.only_use_crux_domains = only;
        self
    }

    /// Check the key is present and the host parses as an absolute URL
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Configuration {
                message: "API key is required".to_string(),
            });
        }
        let host = Url::parse(&self.api_host).map_err(|e| Error::Configuration {
            message: format!("Invalid API host {}: {e}", self.api_host),
        })?;
        if host.cannot_be_a_base() {
            return Err(Error::Configuration {
                message: format!("API host {} cannot be used as a base URL", self.api_host),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("api_host", &self.api_host)
            .field("api_prefix", &self.api_prefix)
            .field("proxies", &self.proxies)
            .field("user_agent", &self.user_agent)
            .field("only_use_crux_domains", &self.only_use_crux_domains)
            .finish()
    }
}

/// Parse `true`/`True`/`false`/`False`
pub fn str_to_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "True" => Ok(true),
        "false" | "False" => Ok(false),
        other => Err(Error::Configuration {
            message: format!("Expected true/True or false/False, got {other:?}"),
        }),
    }
}

/// `crux-rust/<version> <os_family>/<os> <arch>`
pub fn default_user_agent() -> String {
    format!(
        "crux-rust/{} {}/{} {}",
        env!("CARGO_PKG_VERSION"),
        sanitize_user_agent_part(std::env::consts::FAMILY),
        sanitize_user_agent_part(std::env::consts::OS),
        sanitize_user_agent_part(std::env::consts::ARCH),
    )
}

/// Collapse whitespace to `_` and drop characters not allowed in a product token
pub fn sanitize_user_agent_part(part: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    static BANNED: OnceLock<Regex> = OnceLock::new();

    let whitespace = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("Valid regex pattern"));
    let banned =
        BANNED.get_or_init(|| Regex::new(r"[^a-zA-Z0-9._+~-]").expect("Valid regex pattern"));

    let no_space = whitespace.replace_all(part, "_");
    let sanitized = banned.replace_all(&no_space, "");
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized.into_owned()
    }
}
