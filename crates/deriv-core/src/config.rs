//! Per resource-type configuration

use crate::error::{DerivativesError, Result};
use serde::{Deserialize, Serialize};

/// When a lifecycle reaction runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleMode {
    /// Run immediately inside the lifecycle hook
    #[default]
    Foreground,
    /// Skip in the hook; the owner schedules the work itself
    Background,
}

/// Derivatives configuration
///
/// # Example
/// ```yaml
/// store_key: store
/// cache_key: cache
/// default_storage: thumbnails
/// delete_raw: true
/// promote: background
/// destroy: foreground
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativesConfig {
    /// Permanent storage key
    pub store_key: String,

    /// Staging storage key; artifacts stored here get promoted
    pub cache_key: String,

    /// Storage for new derivatives when no rule is registered
    /// (`None` means the permanent storage)
    pub default_storage: Option<String>,

    /// Remove temporary raw files once uploaded
    pub delete_raw: bool,

    /// Mode of the promote reaction
    pub promote: LifecycleMode,

    /// Mode of the destroy reaction
    pub destroy: LifecycleMode,
}

impl DerivativesConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set permanent storage key
    #[inline]
    #[must_use]
    pub fn with_store_key(mut self, key: impl Into<String>) -> Self {
        self.store_key = key.into();
        self
    }

    /// Set staging storage key
    #[inline]
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    /// Set default derivative storage
    #[inline]
    #[must_use]
    pub fn with_default_storage(mut self, key: impl Into<String>) -> Self {
        self.default_storage = Some(key.into());
        self
    }

    /// Set whether raw files are removed after upload
    #[inline]
    #[must_use]
    pub fn with_delete_raw(mut self, delete: bool) -> Self {
        self.delete_raw = delete;
        self
    }

    /// Set promote mode
    #[inline]
    #[must_use]
    pub fn with_promote_mode(mut self, mode: LifecycleMode) -> Self {
        self.promote = mode;
        self
    }

    /// Set destroy mode
    #[inline]
    #[must_use]
    pub fn with_destroy_mode(mut self, mode: LifecycleMode) -> Self {
        self.destroy = mode;
        self
    }

    /// Storage new derivatives go to by default
    #[inline]
    #[must_use]
    pub fn default_storage(&self) -> &str {
        self.default_storage.as_deref().unwrap_or(&self.store_key)
    }

    /// Whether `storage` is the staging backend
    #[inline]
    #[must_use]
    pub fn is_cache(&self, storage: &str) -> bool {
        storage == self.cache_key
    }

    /// Parse YAML configuration; missing fields take their defaults
    ///
    /// # Errors
    /// `DerivativesError::Config` on invalid YAML or field types
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| DerivativesError::Config(e.to_string()))
    }

    /// Parse JSON configuration; missing fields take their defaults
    ///
    /// # Errors
    /// `DerivativesError::Config` on invalid JSON or field types
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| DerivativesError::Config(e.to_string()))
    }
}

impl Default for DerivativesConfig {
    fn default() -> Self {
        Self {
            store_key: "store".to_string(),
            cache_key: "cache".to_string(),
            default_storage: None,
            delete_raw: true,
            promote: LifecycleMode::Foreground,
            destroy: LifecycleMode::Foreground,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DerivativesConfig::default();
        assert_eq!(config.store_key, "store");
        assert_eq!(config.cache_key, "cache");
        assert_eq!(config.default_storage(), "store");
        assert!(config.delete_raw);
        assert_eq!(config.promote, LifecycleMode::Foreground);
        assert!(config.is_cache("cache"));
    }

    #[test]
    fn builder() {
        let config = DerivativesConfig::new()
            .with_store_key("s3")
            .with_default_storage("thumbs")
            .with_delete_raw(false)
            .with_destroy_mode(LifecycleMode::Background);
        assert_eq!(config.default_storage(), "thumbs");
        assert_eq!(config.store_key, "s3");
        assert!(!config.delete_raw);
        assert_eq!(config.destroy, LifecycleMode::Background);
    }

    #[test]
    fn yaml_partial() {
        let config = DerivativesConfig::from_yaml_str("cache_key: tmp\npromote: background\n").unwrap();
        assert_eq!(config.cache_key, "tmp");
        assert_eq!(config.store_key, "store");
        assert_eq!(config.promote, LifecycleMode::Background);
    }

    #[test]
    fn json_roundtrip() {
        let config = DerivativesConfig::new().with_default_storage("x");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(DerivativesConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn invalid_mode_rejected() {
        let result = DerivativesConfig::from_yaml_str("destroy: sometimes");
        assert!(matches!(result, Err(DerivativesError::Config(_))));
    }
}
