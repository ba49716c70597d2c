//! Startup checks for deployment secrets (ticket signing key, payments binding
//! secret). Only production-like environments are checked; dev and test keep
//! their well-known defaults.

const MIN_SECRET_LEN: usize = 16;

const PLACEHOLDERS: &[&str] = &[
    "change-me",
    "changeme",
    "replace-me",
    "secret",
    "password",
    "devsecret",
    "devkey",
    "default",
    "dummy",
    "example",
    "test",
];

const PLACEHOLDER_FRAGMENTS: &[&str] = &[
    "change-me",
    "change_me",
    "replace-me",
    "replace_me",
    "set-me",
    "your-secret",
    "your_secret",
    "dev-secret",
    "dev_secret",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretPolicyError {
    #[error("{0} must be set in prod/staging")]
    Missing(String),
    #[error("{0} must be at least 16 characters in prod/staging")]
    TooShort(String),
    #[error("{0} looks like a placeholder/default value; use a strong random secret")]
    Placeholder(String),
}

pub fn is_production_like(env_name: &str) -> bool {
    matches!(
        env_name.trim().to_ascii_lowercase().as_str(),
        "prod" | "production" | "staging"
    )
}

/// Reject missing, short or placeholder-looking secrets in production-like
/// environments.
pub fn enforce(
    env_name: &str,
    key: &str,
    value: Option<&str>,
    required: bool,
) -> Result<(), SecretPolicyError> {
    if !is_production_like(env_name) {
        return Ok(());
    }
    let secret = value.map(str::trim).unwrap_or("");
    if secret.is_empty() {
        return if required {
            Err(SecretPolicyError::Missing(key.to_string()))
        } else {
            Ok(())
        };
    }
    if secret.len() < MIN_SECRET_LEN {
        return Err(SecretPolicyError::TooShort(key.to_string()));
    }
    if looks_like_placeholder(secret) {
        return Err(SecretPolicyError::Placeholder(key.to_string()));
    }
    Ok(())
}

fn looks_like_placeholder(secret: &str) -> bool {
    let s = secret.to_ascii_lowercase();
    PLACEHOLDERS.contains(&s.as_str()) || PLACEHOLDER_FRAGMENTS.iter().any(|f| s.contains(f))
}
