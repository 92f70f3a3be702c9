use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Runtime settings for the catalog client.
///
/// Values come from (lowest to highest precedence): built-in defaults,
/// an optional `ebook-hub.toml` in the working directory, and
/// `EBOOK_HUB_*` environment variables (e.g. `EBOOK_HUB_PAGE_SIZE=20`).
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Number of documents requested from the store per page.
    pub page_size: usize,
    /// Quiet period before a search term change is dispatched.
    pub debounce_ms: u64,
    /// Maximum number of ids the store accepts in a single id lookup.
    pub batch_width: usize,
    /// MongoDB connection string. When absent the in-memory store is used.
    #[serde(default)]
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            debounce_ms: 500,
            batch_width: 10,
            mongodb_uri: None,
            mongodb_database: "ebook_hub".to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(config::Environment::with_prefix("EBOOK_HUB").try_parsing(true))
    }

    fn load_from(env: config::Environment) -> Result<Self, AppError> {
        let defaults = CatalogConfig::default();

        let settings = config::Config::builder()
            .set_default("page_size", defaults.page_size as u64)
            .and_then(|b| b.set_default("debounce_ms", defaults.debounce_ms))
            .and_then(|b| b.set_default("batch_width", defaults.batch_width as u64))
            .and_then(|b| b.set_default("mongodb_database", defaults.mongodb_database))
            .map_err(|e| AppError::Internal(format!("Invalid config defaults: {e}")))?
            .add_source(config::File::with_name("ebook-hub").required(false))
            .add_source(env)
            .build()
            .map_err(|e| AppError::BadRequest(format!("Failed to load configuration: {e}")))?;

        let config: CatalogConfig = settings
            .try_deserialize()
            .map_err(|e| AppError::BadRequest(format!("Invalid configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.page_size == 0 {
            return Err(AppError::BadRequest("page_size must be at least 1".into()));
        }
        if self.batch_width == 0 {
            return Err(AppError::BadRequest("batch_width must be at least 1".into()));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("EBOOK_HUB")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = CatalogConfig::load_from(env_from(&[])).unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.batch_width, 10);
        assert!(config.mongodb_uri.is_none());
        assert_eq!(config.mongodb_database, "ebook_hub");
    }

    #[test]
    fn test_env_overrides() {
        let config = CatalogConfig::load_from(env_from(&[
            ("EBOOK_HUB_PAGE_SIZE", "25"),
            ("EBOOK_HUB_MONGODB_URI", "mongodb://localhost:27017"),
        ]))
        .unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(
            config.mongodb_uri.as_deref(),
            Some("mongodb://localhost:27017")
        );
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let result = CatalogConfig::load_from(env_from(&[("EBOOK_HUB_PAGE_SIZE", "0")]));
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
