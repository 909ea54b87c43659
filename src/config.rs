//! Service configuration
//!
//! Loaded from the process environment. Variable names are the upper-case
//! field names unless renamed below (`LANG`, `APPW_ROLE`).

use crate::delivery::GatewayConfig;
use crate::error::{PushError, Result};
use crate::registry::UpsertPolicy;
use crate::types::DEFAULT_TTL;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::path::PathBuf;

/// Bucket whose objects are readable without elevated credentials
pub const DEFAULT_MERGE_BUCKET: &str = "ws-partners-appw-merge-test";

/// Service configuration, loaded from the environment
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// VAPID subject / contact domain
    pub domain: String,

    pub vapid_public_key: String,

    pub vapid_private_key: String,

    /// Bucket holding the subscription registry
    pub state_bucket: String,

    /// Language tag a clip/episode must carry to be notified
    #[serde(rename = "lang")]
    pub target_language: String,

    /// Role assumed to read objects from foreign buckets
    #[serde(rename = "appw_role")]
    pub elevated_role: String,

    #[serde(default = "default_merge_bucket")]
    pub merge_bucket: String,

    #[serde(default = "default_registry_key")]
    pub registry_key: String,

    /// First key segment of administrative objects that never notify
    #[serde(default = "default_reserved_prefix")]
    pub reserved_prefix: String,

    #[serde(default = "default_role_session_name")]
    pub role_session_name: String,

    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    #[serde(default = "default_ttl")]
    pub default_ttl: u32,

    /// Enables compare-and-swap registry upserts with this many attempts
    #[serde(default)]
    pub upsert_max_attempts: Option<u32>,

    #[serde(default)]
    pub push_gateway_url: Option<String>,
}

fn default_merge_bucket() -> String {
    DEFAULT_MERGE_BUCKET.to_string()
}

fn default_registry_key() -> String {
    "subscriptions".to_string()
}

fn default_reserved_prefix() -> String {
    "schedule".to_string()
}

fn default_role_session_name() -> String {
    "dazzler-test".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            state_bucket: String::new(),
            target_language: String::new(),
            elevated_role: String::new(),
            merge_bucket: default_merge_bucket(),
            registry_key: default_registry_key(),
            reserved_prefix: default_reserved_prefix(),
            role_session_name: default_role_session_name(),
            static_dir: default_static_dir(),
            default_ttl: default_ttl(),
            upsert_max_attempts: None,
            push_gateway_url: None,
        }
    }
}

impl PushConfig {
    /// Load and validate configuration from the environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load and validate configuration from explicit key/value pairs
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: PushConfig = envy::from_iter(vars)
            .map_err(|e| PushError::Config(format!("Invalid environment: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required values and the VAPID key pair shape
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("DOMAIN", &self.domain),
            ("STATE_BUCKET", &self.state_bucket),
            ("LANG", &self.target_language),
            ("APPW_ROLE", &self.elevated_role),
            ("REGISTRY_KEY", &self.registry_key),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(PushError::Config(format!("{} must not be empty", name)));
            }
        }

        self.vapid_keys().validate()?;

        if self.upsert_max_attempts == Some(0) {
            return Err(PushError::Config(
                "UPSERT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn vapid_keys(&self) -> VapidKeys {
        VapidKeys {
            public_key: self.vapid_public_key.clone(),
            private_key: self.vapid_private_key.clone(),
        }
    }

    /// `Conditional` when `UPSERT_MAX_ATTEMPTS` is set
    pub fn upsert_policy(&self) -> UpsertPolicy {
        match self.upsert_max_attempts {
            Some(max_attempts) => UpsertPolicy::Conditional { max_attempts },
            None => UpsertPolicy::LastWriteWins,
        }
    }

    /// Gateway transport settings, when a gateway URL is configured
    pub fn gateway(&self) -> Option<GatewayConfig> {
        self.push_gateway_url.as_ref().map(|url| GatewayConfig {
            url: url.clone(),
            subject: self.domain.clone(),
            timeout_secs: 30,
        })
    }
}

/// VAPID application server key pair (URL-safe base64)
#[derive(Debug, Clone)]
pub struct VapidKeys {
    pub public_key: String,
    pub private_key: String,
}

impl VapidKeys {
    /// Check both keys decode to P-256 sized material
    pub fn validate(&self) -> Result<()> {
        if self.public_key.is_empty() || self.private_key.is_empty() {
            return Err(PushError::Config(
                "VAPID_PUBLIC_KEY and VAPID_PRIVATE_KEY must be set".to_string(),
            ));
        }

        let public = decode_key("VAPID_PUBLIC_KEY", &self.public_key)?;
        if public.len() != 65 || public[0] != 0x04 {
            return Err(PushError::Config(format!(
                "VAPID_PUBLIC_KEY must be an uncompressed P-256 point (65 bytes), got {} bytes",
                public.len()
            )));
        }

        let private = decode_key("VAPID_PRIVATE_KEY", &self.private_key)?;
        if private.len() != 32 {
            return Err(PushError::Config(format!(
                "VAPID_PRIVATE_KEY must be 32 bytes, got {}",
                private.len()
            )));
        }
        Ok(())
    }

    /// Raw public key bytes, as a browser `applicationServerKey`
    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        decode_key("VAPID_PUBLIC_KEY", &self.public_key)
    }
}

fn decode_key(name: &str, key: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(key.trim().trim_end_matches('='))
        .map_err(|e| PushError::Config(format!("{} is not URL-safe base64: {}", name, e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_public_key() -> String {
        let mut bytes = vec![0x04u8];
        bytes.extend([7u8; 64]);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub(crate) fn test_private_key() -> String {
        URL_SAFE_NO_PAD.encode([9u8; 32])
    }

    fn env() -> Vec<(String, String)> {
        vec![
            ("DOMAIN".into(), "mailto:ops@example.com".into()),
            ("VAPID_PUBLIC_KEY".into(), test_public_key()),
            ("VAPID_PRIVATE_KEY".into(), test_private_key()),
            ("STATE_BUCKET".into(), "push-state".into()),
            ("LANG".into(), "en".into()),
            ("APPW_ROLE".into(), "arn:aws:iam::1:role/appw".into()),
        ]
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = PushConfig::from_vars(env()).unwrap();
        assert_eq!(config.target_language, "en");
        assert_eq!(config.elevated_role, "arn:aws:iam::1:role/appw");
        assert_eq!(config.merge_bucket, DEFAULT_MERGE_BUCKET);
        assert_eq!(config.registry_key, "subscriptions");
        assert_eq!(config.reserved_prefix, "schedule");
        assert_eq!(config.role_session_name, "dazzler-test");
        assert_eq!(config.default_ttl, 5);
        assert_eq!(config.upsert_policy(), UpsertPolicy::LastWriteWins);
        assert!(config.gateway().is_none());
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = env();
        vars.push(("UPSERT_MAX_ATTEMPTS".into(), "4".into()));
        vars.push(("PUSH_GATEWAY_URL".into(), "http://gw/send".into()));
        vars.push(("DEFAULT_TTL".into(), "30".into()));

        let config = PushConfig::from_vars(vars).unwrap();
        assert_eq!(config.upsert_policy(), UpsertPolicy::Conditional { max_attempts: 4 });
        assert_eq!(config.default_ttl, 30);

        let gateway = config.gateway().unwrap();
        assert_eq!(gateway.url, "http://gw/send");
        assert_eq!(gateway.subject, "mailto:ops@example.com");
    }

    #[test]
    fn test_missing_variable() {
        let vars: Vec<_> = env().into_iter().filter(|(k, _)| k != "LANG").collect();
        let err = PushConfig::from_vars(vars).unwrap_err();
        assert!(matches!(err, PushError::Config(_)));
    }

    #[test]
    fn test_empty_required_value() {
        let mut config = PushConfig::from_vars(env()).unwrap();
        config.state_bucket = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_upsert_attempts_rejected() {
        let mut vars = env();
        vars.push(("UPSERT_MAX_ATTEMPTS".into(), "0".into()));
        assert!(PushConfig::from_vars(vars).is_err());
    }

    #[test]
    fn test_vapid_validation() {
        let keys = VapidKeys {
            public_key: test_public_key(),
            private_key: test_private_key(),
        };
        assert!(keys.validate().is_ok());
        assert_eq!(keys.public_key_bytes().unwrap().len(), 65);

        let padded = VapidKeys {
            public_key: format!("{}=", test_public_key()),
            private_key: test_private_key(),
        };
        assert!(padded.validate().is_ok());

        let short = VapidKeys {
            public_key: URL_SAFE_NO_PAD.encode([4u8; 33]),
            private_key: test_private_key(),
        };
        assert!(short.validate().is_err());

        let garbage = VapidKeys {
            public_key: "not base64!!".to_string(),
            private_key: test_private_key(),
        };
        assert!(garbage.validate().is_err());

        let missing = VapidKeys {
            public_key: String::new(),
            private_key: String::new(),
        };
        assert!(missing.validate().is_err());
    }
}
