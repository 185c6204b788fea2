use async_trait::async_trait;
use azbp_core::Scope;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{Artifact, Blueprint, API_VERSION};

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0} was not found")]
    NotFound(String),
    #[error("unexpected status {status} from {path}: {body}")]
    Status { status: u16, path: String, body: String },
    #[error("request to the blueprint service failed")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode response from {path}")]
    Decode { path: String, #[source] source: serde_json::Error },
    #[error("blueprint store unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool { matches!(self, ApiError::NotFound(_)) }
}

/// The remote blueprint service. Blueprints are keyed by `(scope, name)`,
/// artifacts by `(scope, blueprint, name)`.
#[async_trait]
pub trait BlueprintApi: Send + Sync {
    async fn get_blueprint(&self, scope: &Scope, name: &str) -> Result<Blueprint, ApiError>;
    async fn create_or_update_blueprint(&self, scope: &Scope, name: &str, model: &Blueprint) -> Result<Blueprint, ApiError>;
    async fn delete_blueprint(&self, scope: &Scope, name: &str) -> Result<(), ApiError>;

    async fn get_artifact(&self, scope: &Scope, blueprint: &str, name: &str) -> Result<Artifact, ApiError>;
    async fn create_or_update_artifact(&self, scope: &Scope, blueprint: &str, name: &str, model: &Artifact) -> Result<Artifact, ApiError>;
    async fn delete_artifact(&self, scope: &Scope, blueprint: &str, name: &str) -> Result<(), ApiError>;
}

pub fn blueprint_path(scope: &Scope, name: &str) -> String {
    format!("{}/providers/Microsoft.Blueprint/blueprints/{}", scope.as_str().trim_end_matches('/'), name)
}

pub fn artifact_path(scope: &Scope, blueprint: &str, name: &str) -> String {
    format!("{}/artifacts/{}", blueprint_path(scope, blueprint), name)
}

/// Azure Resource Manager client. The bearer token is obtained by the caller.
pub struct ArmClient {
    http: Client,
    endpoint: String,
    api_version: String,
    token: SecretString,
}

impl ArmClient {
    pub fn new(endpoint: Option<String>, api_version: Option<String>, token: SecretString) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()).trim_end_matches('/').to_string(),
            api_version: api_version.unwrap_or_else(|| API_VERSION.to_string()),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, self.api_version)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!(%path, "GET");
        let resp = self.http.get(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .send().await?;
        decode(path, resp).await
    }

    async fn put<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        debug!(%path, "PUT");
        let resp = self.http.put(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send().await?;
        decode(path, resp).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        debug!(%path, "DELETE");
        let resp = self.http.delete(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .send().await?;
        deleted(path, resp).await
    }
}

/// 200 and 204 both mean the object is gone.
async fn deleted(path: &str, resp: reqwest::Response) -> Result<(), ApiError> {
    match resp.status() {
        StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
        StatusCode::NOT_FOUND => Err(ApiError::NotFound(path.to_string())),
        status => Err(ApiError::Status { status: status.as_u16(), path: path.to_string(), body: resp.text().await.unwrap_or_default() }),
    }
}

async fn decode<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(path.to_string()));
    }
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status { status: status.as_u16(), path: path.to_string(), body });
    }
    serde_json::from_str(&body).map_err(|source| ApiError::Decode { path: path.to_string(), source })
}

#[async_trait]
impl BlueprintApi for ArmClient {
    async fn get_blueprint(&self, scope: &Scope, name: &str) -> Result<Blueprint, ApiError> {
        self.get(&blueprint_path(scope, name)).await
    }
    async fn create_or_update_blueprint(&self, scope: &Scope, name: &str, model: &Blueprint) -> Result<Blueprint, ApiError> {
        self.put(&blueprint_path(scope, name), model).await
    }
    async fn delete_blueprint(&self, scope: &Scope, name: &str) -> Result<(), ApiError> {
        self.delete(&blueprint_path(scope, name)).await
    }
    async fn get_artifact(&self, scope: &Scope, blueprint: &str, name: &str) -> Result<Artifact, ApiError> {
        self.get(&artifact_path(scope, blueprint, name)).await
    }
    async fn create_or_update_artifact(&self, scope: &Scope, blueprint: &str, name: &str, model: &Artifact) -> Result<Artifact, ApiError> {
        self.put(&artifact_path(scope, blueprint, name), model).await
    }
    async fn delete_artifact(&self, scope: &Scope, blueprint: &str, name: &str) -> Result<(), ApiError> {
        self.delete(&artifact_path(scope, blueprint, name)).await
    }
}
