//! Authentication handling for the platform API

use crate::error::Error;
use crate::headers::Headers;
use crate::Result;

/// Applies credentials to outgoing API requests
pub trait AuthHandler: Send + Sync {
    /// Apply authentication to request headers
    fn apply_auth(&self, headers: &mut Headers) -> Result<()>;

    /// Validate that required credentials are available
    fn validate_credentials(&self) -> Result<()>;
}

/// Bearer token auth plus the client user agent
#[derive(Clone)]
pub struct BearerAuth {
    api_key: String,
    user_agent: String,
}

impl BearerAuth {
    pub fn new(api_key: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl AuthHandler for BearerAuth {
    fn apply_auth(&self, headers: &mut Headers) -> Result<()> {
        self.validate_credentials()?;
        headers.set("authorization", format!("Bearer {}", self.api_key));
        headers.set("user-agent", self.user_agent.clone());
        Ok(())
    }

    fn validate_credentials(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Configuration {
                message: "API key is empty".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth")
            .field("api_key", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_auth_overrides_caller_headers() {
        let auth = BearerAuth::new("secret", "crux-rust/0.1.0");
        let mut headers = Headers::new()
            .with("Authorization", "Basic nope")
            .with("X-Trace", "1");

        auth.apply_auth(&mut headers).unwrap();

        assert_eq!(headers.get("authorization"), Some("Bearer secret"));
        assert_eq!(headers.get("user-agent"), Some("crux-rust/0.1.0"));
        assert_eq!(headers.get("x-trace"), Some("1"));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let auth = BearerAuth::new("  ", "ua");
        assert!(matches!(
            auth.validate_credentials(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let auth = BearerAuth::new("secret", "ua");
        assert!(!format!("{auth:?}").contains("secret"));
    }
}
