//! Session configuration with fail-closed validation.
//!
//! Configuration comes from a TOML file; the serving binary lets CLI
//! arguments override individual fields. The environment toggle selects
//! production vs. local *transport* defaults (`SameSite`/`Secure` only) and
//! never changes secret handling.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::StorageMode;

/// Deployment environment toggle.
///
/// Affects the `SameSite`/`Secure` cookie defaults and the application
/// root path only. Secret handling is identical in both environments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Deployed behind HTTPS, typically under a path prefix.
    Production,
    /// Local development over plain HTTP.
    #[default]
    Local,
}

/// `SameSite` cookie policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    /// Cookie sent only on same-site requests.
    Strict,
    /// Cookie sent on same-site requests and top-level navigations.
    Lax,
    /// Cookie sent cross-site; requires `Secure`.
    None,
}

/// Resolved transport attributes attached to the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    /// Envelope and cookie lifetime in seconds.
    pub max_age_secs: u64,
    /// `SameSite` policy.
    pub same_site: SameSitePolicy,
    /// Require transport encryption.
    pub secure: bool,
    /// Hide the cookie from script access.
    pub http_only: bool,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            same_site: SameSitePolicy::Lax,
            secure: false,
            http_only: true,
        }
    }
}

/// Top-level session layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Path of the persisted secret ring (TOML).
    ///
    /// Required. There is intentionally no way to configure an in-process
    /// random ring: secret material must come from externally persisted
    /// configuration loaded deterministically at startup.
    pub secret_source: PathBuf,

    /// Envelope lifetime in seconds.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Idle expiry for server-side records, in seconds. Defaults to the
    /// envelope max-age.
    #[serde(default)]
    pub idle_expiry_secs: Option<u64>,

    /// Where session attributes live.
    #[serde(default)]
    pub storage: StorageMode,

    /// Deployment environment toggle.
    #[serde(default)]
    pub environment: Environment,

    /// Explicit `SameSite` override. Defaults per environment
    /// (production: `none`, local: `lax`).
    #[serde(default)]
    pub same_site: Option<SameSitePolicy>,

    /// Explicit `Secure` override. Defaults per environment
    /// (production: true, local: false).
    #[serde(default)]
    pub secure: Option<bool>,

    /// Hide the cookie from script access. Recommended true.
    #[serde(default = "default_http_only")]
    pub http_only: bool,

    /// Path prefix the application is served under in production
    /// (platform mounts, e.g. `/example`). Redirects are prefixed with
    /// this in production and go to `/` locally.
    #[serde(default)]
    pub path_prefix: Option<String>,
}

fn default_cookie_name() -> String {
    "sesh_session".to_string()
}

const fn default_max_age_secs() -> u64 {
    3600 * 12
}

const fn default_http_only() -> bool {
    true
}

impl SessionConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty() {
            return Err(ConfigError::Validation(
                "cookie_name must not be empty".to_string(),
            ));
        }
        if self.max_age_secs == 0 {
            return Err(ConfigError::Validation(
                "max_age_secs must be positive".to_string(),
            ));
        }
        if self.secret_source.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "secret_source must point at a persisted ring file".to_string(),
            ));
        }
        let same_site = self.same_site.unwrap_or_else(|| self.default_same_site());
        let secure = self.secure.unwrap_or_else(|| self.default_secure());
        if same_site == SameSitePolicy::None && !secure {
            return Err(ConfigError::Validation(
                "same_site = \"none\" requires secure = true; browsers reject it otherwise"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the effective cookie transport attributes, applying the
    /// environment defaults where no explicit override is present.
    #[must_use]
    pub fn cookie_attributes(&self) -> CookieAttributes {
        CookieAttributes {
            max_age_secs: self.max_age_secs,
            same_site: self.same_site.unwrap_or_else(|| self.default_same_site()),
            secure: self.secure.unwrap_or_else(|| self.default_secure()),
            http_only: self.http_only,
        }
    }

    /// Idle expiry for server-side records.
    #[must_use]
    pub fn idle_expiry_secs(&self) -> u64 {
        self.idle_expiry_secs.unwrap_or(self.max_age_secs)
    }

    /// The application root used as the redirect target: the configured
    /// path prefix in production, `/` locally.
    #[must_use]
    pub fn application_root(&self) -> String {
        match (self.environment, self.path_prefix.as_deref()) {
            (Environment::Production, Some(prefix)) if !prefix.is_empty() => {
                format!("{}/", prefix.trim_end_matches('/'))
            },
            _ => "/".to_string(),
        }
    }

    const fn default_same_site(&self) -> SameSitePolicy {
        match self.environment {
            Environment::Production => SameSitePolicy::None,
            Environment::Local => SameSitePolicy::Lax,
        }
    }

    const fn default_secure(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
