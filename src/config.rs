//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::CatalogRequest;

/// Provider and race settings derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "DO")]
pub struct ExitNodeConfig {
    /// DigitalOcean API token. This value is required.
    pub token: String,
    /// Region slug droplets are created in. Defaults to `fra1`.
    #[ortho_config(default = "fra1".to_owned())]
    pub region: String,
    /// Fragment matched against image slugs. Defaults to `ubuntu-22-04`.
    #[ortho_config(default = "ubuntu-22-04".to_owned())]
    pub image: String,
    /// Prefix for droplet names. Defaults to `do-exit`.
    #[ortho_config(default = "do-exit".to_owned())]
    pub name_prefix: String,
    /// Maximum number of droplets kept on the account at once, including
    /// droplets that existed before the race started.
    #[ortho_config(default = 3)]
    pub max_droplets: u32,
    /// Smallest acceptable droplet memory in megabytes.
    #[ortho_config(default = 1000)]
    pub min_memory_mb: u64,
    /// Total number of provisioning attempts allowed before the race gives
    /// up. Unset means failed attempts are replaced indefinitely.
    pub max_attempts: Option<u32>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ExitNodeConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [digitalocean] in exitnode.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("exitnode")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the catalog query for this configuration.
    #[must_use]
    pub fn catalog_request(&self) -> CatalogRequest {
        CatalogRequest {
            region: self.region.trim().to_owned(),
            image: self.image.trim().to_owned(),
            min_memory_mb: self.min_memory_mb,
        }
    }

    /// Returns the droplet ceiling as a collection size.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        usize::try_from(self.max_droplets).unwrap_or(usize::MAX)
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a numeric limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.token,
            &FieldMetadata::new("DigitalOcean API token", "DO_TOKEN", "token"),
        )?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("region slug", "DO_REGION", "region"),
        )?;
        Self::require_field(
            &self.image,
            &FieldMetadata::new("image name", "DO_IMAGE", "image"),
        )?;
        Self::require_field(
            &self.name_prefix,
            &FieldMetadata::new("droplet name prefix", "DO_NAME_PREFIX", "name_prefix"),
        )?;
        if self.max_droplets == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_droplets must be at least 1 (DO_MAX_DROPLETS)",
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(String::from(
                "max_attempts must be at least 1 when set (DO_MAX_ATTEMPTS)",
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
