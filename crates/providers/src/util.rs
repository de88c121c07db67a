//! Shared helpers for the HTTP adapters: error mapping and credential
//! resolution.

use lq_domain::config::AuthConfig;
use lq_domain::error::{Error, Result};

/// Map a reqwest failure into the domain error taxonomy.
pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{provider}: {err}"))
    } else if err.is_connect() {
        Error::Http(format!("{provider}: connection failed: {err}"))
    } else {
        Error::Http(format!("{provider}: {err}"))
    }
}

/// Turn a non-success HTTP status plus body into a provider error.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(400).collect();
    Error::Provider {
        provider: provider.to_string(),
        message: format!("HTTP {status}: {snippet}"),
    }
}

/// Resolve an API key from the auth config, most explicit source first:
/// inline key, OS keychain entry, then environment variable.
pub(crate) fn resolve_api_key(provider: &str, auth: &AuthConfig) -> Result<String> {
    if let Some(key) = &auth.key {
        if !key.is_empty() {
            return Ok(key.clone());
        }
    }

    if let (Some(service), Some(account)) = (&auth.service, &auth.account) {
        match keyring::Entry::new(service, account).and_then(|e| e.get_password()) {
            Ok(secret) => return Ok(secret),
            Err(keyring::Error::NoEntry) => {
                tracing::debug!(provider, service = %service, "no keychain entry, falling back to env");
            }
            Err(e) => {
                tracing::warn!(provider, error = %e, "keychain lookup failed, falling back to env");
            }
        }
    }

    if let Some(var) = &auth.env {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }

    Err(Error::Auth(format!(
        "no credential found for provider '{provider}'"
    )))
}
