use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use modgraph_core::{
    Module, ModuleName, ModulePatch, ModuleRepository, ModuleSet, RepositoryError,
    RepositoryErrorKind,
};

/// Configuration for the HTTP module repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Base URL of the module service, without the `/api` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout in seconds for each request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Error body returned by the module service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// Module repository backed by a remote module service over HTTP
#[derive(Debug, Clone)]
pub struct HttpModuleRepository {
    config: HttpClientConfig,
    client: Client,
}

impl HttpModuleRepository {
    /// Create a repository with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                RepositoryError::transport(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    /// Create a repository for `base_url` with the given timeout
    pub fn with_url_and_timeout(
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, RepositoryError> {
        Self::new(HttpClientConfig {
            base_url: base_url.into(),
            timeout_secs,
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn modules_url(&self) -> String {
        format!("{}/api/modules", self.config.base_url.trim_end_matches('/'))
    }

    fn module_url(&self, name: &ModuleName) -> String {
        format!("{}/{}", self.modules_url(), name)
    }

    /// Maps a request failure to a transport error
    fn map_http_error(&self, error: reqwest::Error) -> RepositoryError {
        if error.is_timeout() {
            RepositoryError::transport(format!("Request timeout: {}", error))
        } else if error.is_connect() {
            RepositoryError::transport(format!("Connection error: {}", error))
        } else {
            RepositoryError::transport(format!("HTTP error: {}", error))
        }
    }

    /// Maps a non-success response onto the repository error taxonomy
    async fn map_error_response(&self, response: Response) -> RepositoryError {
        let status = response.status();
        let kind = match status {
            StatusCode::NOT_FOUND => RepositoryErrorKind::NotFound,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                RepositoryErrorKind::ValidationFailed
            }
            StatusCode::CONFLICT => RepositoryErrorKind::Conflict,
            _ => RepositoryErrorKind::Transport,
        };

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(ErrorBody {
                error,
                details: Some(details),
            }) => format!("{}: {}", error, details),
            Ok(ErrorBody { error, .. }) => error,
            Err(_) if text.trim().is_empty() => format!("HTTP error: {}", status),
            Err(_) => text,
        };

        warn!(status = %status, kind = %kind, "Module service returned an error");
        RepositoryError::new(kind, message)
    }

    async fn fetch_module(&self, name: &ModuleName) -> Result<Module, RepositoryError> {
        let response = self
            .client
            .get(self.module_url(name))
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;
        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }
        response.json::<Module>().await.map_err(|e| {
            RepositoryError::validation(format!("Failed to parse module {}: {}", name, e))
        })
    }
}

/// Decode the `name -> module` object returned by the module listing
pub(crate) fn decode_module_map(body: Map<String, Value>) -> Result<ModuleSet, RepositoryError> {
    let mut modules = ModuleSet::new();
    for (key, value) in body {
        let module: Module = serde_json::from_value(value).map_err(|e| {
            RepositoryError::validation(format!("Invalid module '{}': {}", key, e))
        })?;
        if module.name.as_str() != key {
            return Err(RepositoryError::validation(format!(
                "Module listed as '{}' is named '{}'",
                key, module.name
            )));
        }
        module.validate()?;
        modules.insert(module);
    }
    Ok(modules)
}

#[async_trait]
impl ModuleRepository for HttpModuleRepository {
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    async fn load(&self) -> Result<ModuleSet, RepositoryError> {
        let response = self
            .client
            .get(self.modules_url())
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;

        match response.status() {
            StatusCode::OK => {
                let body: Map<String, Value> = response.json().await.map_err(|e| {
                    RepositoryError::validation(format!("Failed to parse response: {}", e))
                })?;
                let modules = decode_module_map(body)?;
                debug!(module_count = modules.len(), "Loaded modules from service");
                Ok(modules)
            }
            _ => Err(self.map_error_response(response).await),
        }
    }

    #[instrument(skip(self, module), fields(module = %module.name))]
    async fn create(&self, module: &Module) -> Result<Module, RepositoryError> {
        let response = self
            .client
            .post(self.modules_url())
            .json(module)
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        // The service acknowledges with a message; echo bodies are accepted too
        let stored = response
            .json::<Module>()
            .await
            .ok()
            .filter(|stored| stored.name == module.name)
            .unwrap_or_else(|| module.clone());
        debug!("Created module");
        Ok(stored)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, name: &ModuleName, patch: &ModulePatch) -> Result<Module, RepositoryError> {
        let response = self
            .client
            .patch(self.module_url(name))
            .json(patch)
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }

        match response.json::<Module>().await {
            Ok(stored) if &stored.name == name => Ok(stored),
            _ => {
                debug!("Update acknowledged without a module body, fetching it");
                self.fetch_module(name).await
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &ModuleName) -> Result<(), RepositoryError> {
        let response = self
            .client
            .delete(self.module_url(name))
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;

        if !response.status().is_success() {
            return Err(self.map_error_response(response).await);
        }
        debug!("Deleted module");
        Ok(())
    }
}
