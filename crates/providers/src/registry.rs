//! Provider registry: config-driven construction and specifier resolution.
//!
//! Backends are built once from the provider config list; a request's
//! `provider:model` specifier resolves against the static catalogs here.
//! Adding a backend instance is a config change, not a code change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud_invoke::CloudInvokeBackend;
use crate::emulate::BufferedStream;
use crate::openai_compat::OpenAiCompatBackend;
use crate::token::{HttpTokenSource, TokenCache};
use crate::traits::ChatBackend;
use crate::util;
use lq_domain::chat::ModelSpecifier;
use lq_domain::config::{ModelEntry, ProviderConfig, ProviderKind};
use lq_domain::error::{Error, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

struct ProviderHandle {
    backend: Arc<dyn ChatBackend>,
    models: Vec<ModelEntry>,
}

/// A resolved specifier: the backend to call plus the catalog entry for the
/// model (which carries the tool-support flag).
#[derive(Clone)]
pub struct ResolvedModel {
    pub backend: Arc<dyn ChatBackend>,
    pub model: ModelEntry,
}

pub struct ProviderRegistry {
    providers: HashMap<String, ProviderHandle>,
}

impl ProviderRegistry {
    /// Build every configured backend. Fails fast on bad credentials so a
    /// misconfigured provider is caught at startup, not first use.
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let mut providers = HashMap::new();
        for config in configs {
            let backend = Self::build_backend(&client, config)?;
            tracing::info!(
                provider = %config.id,
                kind = ?config.kind,
                models = config.models.len(),
                "registered provider backend"
            );
            providers.insert(
                config.id.clone(),
                ProviderHandle {
                    backend,
                    models: config.models.clone(),
                },
            );
        }

        Ok(Self { providers })
    }

    fn build_backend(
        client: &reqwest::Client,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn ChatBackend>> {
        let api_key = util::resolve_api_key(&config.id, &config.auth)?;

        match config.kind {
            ProviderKind::OpenaiCompat => Ok(Arc::new(OpenAiCompatBackend::new(
                config.id.clone(),
                client.clone(),
                config.base_url.clone(),
                api_key,
            ))),
            ProviderKind::CloudInvoke => {
                let token_url = config.auth.token_url.clone().ok_or_else(|| {
                    Error::Config(format!(
                        "provider '{}' is cloud_invoke but has no auth.token_url",
                        config.id
                    ))
                })?;
                let tokens = Arc::new(TokenCache::new(Arc::new(HttpTokenSource::new(
                    client.clone(),
                    token_url,
                    api_key,
                ))));
                let backend = CloudInvokeBackend::new(
                    config.id.clone(),
                    client.clone(),
                    config.base_url.clone(),
                    tokens,
                );
                // Synchronous transport: hand out the buffering decorator so
                // callers get the same stream contract as native streamers.
                Ok(Arc::new(BufferedStream::new(Arc::new(backend))))
            }
        }
    }

    /// Resolve a `provider:model` specifier against the registered catalogs.
    pub fn resolve(&self, spec: &ModelSpecifier) -> Result<ResolvedModel> {
        let handle = self.providers.get(&spec.provider).ok_or_else(|| {
            Error::Config(format!("unknown provider '{}'", spec.provider))
        })?;

        let model = handle
            .models
            .iter()
            .find(|m| m.name == spec.model)
            .ok_or_else(|| {
                Error::Config(format!(
                    "model '{}' is not in provider '{}' catalog",
                    spec.model, spec.provider
                ))
            })?;

        if !model.enabled {
            return Err(Error::Config(format!(
                "model '{}' is disabled",
                spec.model
            )));
        }

        Ok(ResolvedModel {
            backend: Arc::clone(&handle.backend),
            model: model.clone(),
        })
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Register a pre-built backend. Test seam; production goes through
    /// `from_config`.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        backend: Arc<dyn ChatBackend>,
        models: Vec<ModelEntry>,
    ) {
        self.providers
            .insert(id.into(), ProviderHandle { backend, models });
    }

    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }
}
