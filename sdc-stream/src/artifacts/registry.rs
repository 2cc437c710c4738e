//! Model registry client (MLflow tracking server REST API)
//!
//! Resolves `models:/<name>/<stage>` to a model version and downloads run
//! artifacts (`runs:/<run_id>/<path>`) into a local cache directory.
//!
//! # API Reference
//! - `POST /api/2.0/mlflow/registered-models/get-latest-versions`
//! - `GET  /get-artifact?path=<path>&run_uuid=<run_id>`

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ArtifactLoadError;

/// Default tracking server port when the URI names only a host
const DEFAULT_TRACKING_PORT: u16 = 5000;

/// Timeout for registry requests (artifacts are small JSON files)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Registered model version as returned by the registry
#[derive(Debug, Clone, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub run_id: String,
    /// Artifact URI of the logged model, e.g. `s3://bucket/1/<run>/artifacts/model`
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub current_stage: Option<String>,
}

impl ModelVersion {
    /// Path of the model directory relative to the run's artifact root
    pub fn artifact_path(&self) -> String {
        artifact_path_from_source(&self.source, &self.run_id)
    }
}

#[derive(Debug, Deserialize)]
struct LatestVersionsResponse {
    #[serde(default)]
    model_versions: Vec<ModelVersion>,
}

/// MLflow registry client
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http_client: Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(tracking_uri: &str) -> Result<Self, ArtifactLoadError> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            base_url: normalize_tracking_uri(tracking_uri),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Latest version of `name` in `stage` (`models:/<name>/<stage>`)
    pub async fn latest_version(
        &self,
        name: &str,
        stage: &str,
    ) -> Result<ModelVersion, ArtifactLoadError> {
        let url = format!(
            "{}/api/2.0/mlflow/registered-models/get-latest-versions",
            self.base_url
        );
        debug!(model = %name, stage = %stage, url = %url, "Querying model registry");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "name": name, "stages": [stage] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactLoadError::Registry {
                status: status.as_u16(),
                url,
            });
        }

        let body: LatestVersionsResponse = response.json().await?;
        let version = body
            .model_versions
            .into_iter()
            .next()
            .ok_or_else(|| ArtifactLoadError::NoVersion {
                name: name.to_string(),
                stage: stage.to_string(),
            })?;

        info!(
            model = %version.name,
            version = %version.version,
            run_id = %version.run_id,
            "Resolved registered model version"
        );
        Ok(version)
    }

    /// Download `runs:/<run_id>/<path>` to `dest_dir/<path>`
    pub async fn download_run_artifact(
        &self,
        run_id: &str,
        path: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ArtifactLoadError> {
        let url = format!("{}/get-artifact", self.base_url);
        debug!(run_id = %run_id, path = %path, "Downloading run artifact");

        let response = self
            .http_client
            .get(&url)
            .query(&[("path", path), ("run_uuid", run_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactLoadError::Registry {
                status: status.as_u16(),
                url: format!("{}?path={}&run_uuid={}", url, path, run_id),
            });
        }

        let bytes = response.bytes().await?;
        let target = dest_dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArtifactLoadError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&target, &bytes).map_err(|source| ArtifactLoadError::Io {
            path: target.clone(),
            source,
        })?;

        info!("Downloaded {} ({} bytes)", target.display(), bytes.len());
        Ok(target)
    }
}

/// Accept either a full URL or a bare host (`ec2-...amazonaws.com`)
pub fn normalize_tracking_uri(uri: &str) -> String {
    let uri = uri.trim().trim_end_matches('/');
    if uri.contains("://") {
        return uri.to_string();
    }
    if uri.contains(':') {
        format!("http://{}", uri)
    } else {
        format!("http://{}:{}", uri, DEFAULT_TRACKING_PORT)
    }
}

/// Model directory relative to the run artifact root
///
/// Handles `runs:/<run_id>/<path>`, `<scheme>://.../artifacts/<path>` and
/// falls back to `model` when the source carries no recognizable path.
pub fn artifact_path_from_source(source: &str, run_id: &str) -> String {
    let run_prefix = format!("runs:/{}/", run_id);
    let path = if let Some(rest) = source.strip_prefix(&run_prefix) {
        rest
    } else if let Some((_, rest)) = source.rsplit_once("/artifacts/") {
        rest
    } else {
        ""
    };

    let path = path.trim_matches('/');
    if path.is_empty() {
        "model".to_string()
    } else {
        path.to_string()
    }
}
