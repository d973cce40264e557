use thiserror::Error;
use url::Url;

/// Validated connection settings for the platform backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    base_url: String,
    api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct BackendConfigDraft {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendConfigError {
    #[error("backend base URL is missing")]
    MissingBaseUrl,

    #[error("invalid backend base URL")]
    InvalidBaseUrl,
}

impl BackendConfigDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize the draft into a usable config.
    ///
    /// # Errors
    ///
    /// Returns `BackendConfigError` if the base URL is missing or does not
    /// parse as an absolute URL.
    pub fn validate(self) -> Result<BackendConfig, BackendConfigError> {
        let base_url =
            normalize_optional(self.base_url).ok_or(BackendConfigError::MissingBaseUrl)?;
        let api_key = normalize_optional(self.api_key);

        if Url::parse(&base_url).is_err() {
            return Err(BackendConfigError::InvalidBaseUrl);
        }

        Ok(BackendConfig { base_url, api_key })
    }
}

impl BackendConfig {
    /// Rehydrate a config from persisted values.
    ///
    /// # Errors
    ///
    /// Returns `BackendConfigError` under the same rules as
    /// [`BackendConfigDraft::validate`].
    pub fn from_persisted(
        base_url: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, BackendConfigError> {
        BackendConfigDraft { base_url, api_key }.validate()
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_trims_and_requires_url() {
        let config = BackendConfigDraft {
            base_url: Some("  https://api.example.test/exams  ".to_string()),
            api_key: Some("   ".to_string()),
        }
        .validate()
        .unwrap();

        assert_eq!(config.base_url(), "https://api.example.test/exams");
        assert!(config.api_key().is_none());
    }

    #[test]
    fn validate_rejects_missing_or_bad_url() {
        assert!(matches!(
            BackendConfigDraft::new().validate(),
            Err(BackendConfigError::MissingBaseUrl)
        ));
        assert!(matches!(
            BackendConfigDraft {
                base_url: Some("not a url".to_string()),
                api_key: None,
            }
            .validate(),
            Err(BackendConfigError::InvalidBaseUrl)
        ));
    }
}
