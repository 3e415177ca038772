use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client as HttpClient;
use turnloop_commons::http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, create_client_with_timeouts,
};

use super::backends::{BACKENDS, BackendSpec, WireFormat};
use super::provider::{LLMError, LLMProvider};
use super::providers::{GeminiProvider, OpenAiCompatProvider};

type ProviderFactory = Box<dyn Fn(ProviderConfig) -> Box<dyn LLMProvider> + Send + Sync>;

struct Registration {
    spec: BackendSpec,
    build: ProviderFactory,
}

/// Backend registry: maps backend ids to their table row and a constructor
pub struct LLMFactory {
    providers: BTreeMap<String, Registration>,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

impl ProviderConfig {
    pub fn http_client(&self) -> HttpClient {
        create_client_with_timeouts(
            self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        )
    }
}

impl LLMFactory {
    pub fn new() -> Self {
        let mut factory = Self {
            providers: BTreeMap::new(),
        };

        for spec in BACKENDS {
            match spec.wire {
                WireFormat::OpenAiChat => factory.register_provider(spec, move |config| {
                    Box::new(OpenAiCompatProvider::from_config(spec, config))
                }),
                WireFormat::GeminiGenerateContent => factory.register_provider(spec, move |config| {
                    Box::new(GeminiProvider::from_config(spec, config))
                }),
            }
        }

        factory
    }

    /// Register a backend, replacing any existing registration with the same id
    pub fn register_provider<F>(&mut self, spec: BackendSpec, factory_fn: F)
    where
        F: Fn(ProviderConfig) -> Box<dyn LLMProvider> + Send + Sync + 'static,
    {
        self.providers.insert(
            spec.id.to_ascii_lowercase(),
            Registration {
                spec,
                build: Box::new(factory_fn),
            },
        );
    }

    pub fn spec(&self, backend_id: &str) -> Option<BackendSpec> {
        self.providers
            .get(&backend_id.trim().to_ascii_lowercase())
            .map(|registration| registration.spec)
    }

    #[allow(clippy::result_large_err)]
    pub fn create_provider(
        &self,
        backend_id: &str,
        config: ProviderConfig,
    ) -> Result<Box<dyn LLMProvider>, LLMError> {
        let registration = self
            .providers
            .get(&backend_id.trim().to_ascii_lowercase())
            .ok_or_else(|| LLMError::InvalidRequest {
                message: format!("Unknown provider: {backend_id}"),
                metadata: None,
            })?;

        Ok((registration.build)(config))
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn specs(&self) -> impl Iterator<Item = &BackendSpec> {
        self.providers.values().map(|registration| &registration.spec)
    }
}

impl Default for LLMFactory {
    fn default() -> Self {
        Self::new()
    }
}
