use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("email is not on the allow list for this exam")]
    NotAllowListed,
}

/// Raw identity fields as captured from the start screen.
#[derive(Clone, Debug, Default)]
pub struct IdentityDraft {
    fields: BTreeMap<String, String>,
}

impl IdentityDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Validate the draft against the exam's identity requirements.
    ///
    /// Values are trimmed; blank values count as missing. When an allow list
    /// is configured it is matched case-insensitively against the `email`
    /// field, so an allow-listed exam effectively requires an email.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::MissingField` for the first required field
    /// that is absent or blank, and `IdentityError::NotAllowListed` when the
    /// email is not on a configured allow list.
    pub fn validate(
        self,
        required_fields: &[String],
        allow_list: Option<&[String]>,
    ) -> Result<StudentIdentity, IdentityError> {
        let fields: BTreeMap<String, String> = self
            .fields
            .into_iter()
            .map(|(name, value)| (name, value.trim().to_string()))
            .filter(|(_, value)| !value.is_empty())
            .collect();

        for name in required_fields {
            if !fields.contains_key(name) {
                return Err(IdentityError::MissingField(name.clone()));
            }
        }

        if let Some(allowed) = allow_list {
            let email = fields
                .get("email")
                .map(|value| value.to_lowercase())
                .ok_or(IdentityError::NotAllowListed)?;
            if !allowed.iter().any(|entry| entry.to_lowercase() == email) {
                return Err(IdentityError::NotAllowListed);
            }
        }

        Ok(StudentIdentity { fields })
    }
}

/// Validated identity of the student taking an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    fields: BTreeMap<String, String>,
}

impl StudentIdentity {
    /// Rebuild an identity from persisted fields. Validation already
    /// happened when the attempt was first captured.
    #[must_use]
    pub fn from_fields(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.field("email")
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.field("name")
    }

    /// Key addressing this student's durable progress.
    ///
    /// The lowercased email when present, otherwise the first captured field
    /// value; the same student must map to the same key across reloads.
    #[must_use]
    pub fn storage_key(&self) -> String {
        if let Some(email) = self.email() {
            return email.to_lowercase();
        }
        self.fields
            .values()
            .next()
            .map(|value| value.to_lowercase())
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<String> {
        vec!["name".to_string(), "email".to_string()]
    }

    #[test]
    fn validate_accepts_complete_fields() {
        let identity = IdentityDraft::new()
            .with_field("name", " Lina Haddad ")
            .with_field("email", "lina@example.com")
            .validate(&required(), None)
            .unwrap();

        assert_eq!(identity.display_name(), Some("Lina Haddad"));
        assert_eq!(identity.storage_key(), "lina@example.com");
    }

    #[test]
    fn validate_rejects_blank_required_field() {
        let err = IdentityDraft::new()
            .with_field("name", "   ")
            .with_field("email", "lina@example.com")
            .validate(&required(), None)
            .unwrap_err();

        assert_eq!(err, IdentityError::MissingField("name".to_string()));
    }

    #[test]
    fn validate_rejects_missing_field() {
        let err = IdentityDraft::new()
            .with_field("email", "lina@example.com")
            .validate(&required(), None)
            .unwrap_err();

        assert_eq!(err, IdentityError::MissingField("name".to_string()));
    }

    #[test]
    fn allow_list_matches_case_insensitively() {
        let allowed = vec!["Lina@Example.com".to_string()];
        let identity = IdentityDraft::new()
            .with_field("name", "Lina")
            .with_field("email", "lina@example.COM")
            .validate(&required(), Some(&allowed))
            .unwrap();

        assert_eq!(identity.storage_key(), "lina@example.com");
    }

    #[test]
    fn allow_list_rejects_unknown_email() {
        let allowed = vec!["someone@example.com".to_string()];
        let err = IdentityDraft::new()
            .with_field("name", "Lina")
            .with_field("email", "lina@example.com")
            .validate(&required(), Some(&allowed))
            .unwrap_err();

        assert_eq!(err, IdentityError::NotAllowListed);
    }

    #[test]
    fn allow_list_requires_email() {
        let allowed = vec!["someone@example.com".to_string()];
        let err = IdentityDraft::new()
            .with_field("name", "Lina")
            .validate(&["name".to_string()], Some(&allowed))
            .unwrap_err();

        assert_eq!(err, IdentityError::NotAllowListed);
    }

    #[test]
    fn storage_key_falls_back_without_email() {
        let identity = StudentIdentity::from_fields(BTreeMap::from([(
            "name".to_string(),
            "Lina".to_string(),
        )]));
        assert_eq!(identity.storage_key(), "lina");
    }
}
