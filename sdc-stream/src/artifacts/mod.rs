//! Artifact loading
//!
//! Resolves the trained model, its label encoder and the reference dataset
//! once at startup and packages them as an immutable [`ArtifactBundle`].
//!
//! Resolution order:
//! 1. `MODEL_LOCATION` (local `model.json` or its directory) overrides the registry
//! 2. Otherwise `models:/<MODEL_NAME>/<STAGE>` is resolved through the registry
//!    and downloaded into the cache directory
//! 3. `ARTIFACT_LOCATION` (local `artifacts.json` or its directory) overrides
//!    the download of `runs:/<run_id>/artifacts/artifacts.json`

pub mod encoder;
pub mod model;
pub mod registry;

pub use encoder::{LabelDecoder, LabelEncoder};
pub use model::{Classifier, FeatureFrame, LinearClassifier, ModelArtifact};
pub use registry::RegistryClient;

use sdc_common::events::PREDICTION_COLUMN;
use sdc_common::{FeatureValue, Features};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ArtifactSettings;
use crate::error::ArtifactLoadError;

/// Model file name inside a model directory
pub const MODEL_FILE: &str = "model.json";
/// Encoder + reference file name inside the run's `artifacts/` directory
pub const ARTIFACTS_FILE: &str = "artifacts.json";
/// Version reported when a local model records no run id
pub const LOCAL_VERSION: &str = "local";

/// Label encoder and reference dataset stored next to the model
#[derive(Debug, Deserialize)]
pub struct AuxiliaryArtifacts {
    pub label_encoder: LabelEncoder,
    #[serde(default)]
    pub reference: Vec<Features>,
}

/// Immutable serving artifacts shared by every request
pub struct ArtifactBundle {
    model: Box<dyn Classifier>,
    label_decoder: Box<dyn LabelDecoder>,
    reference: Option<Vec<Features>>,
    version_id: String,
}

impl ArtifactBundle {
    pub fn new(
        model: Box<dyn Classifier>,
        label_decoder: Box<dyn LabelDecoder>,
        reference: Option<Vec<Features>>,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            model,
            label_decoder,
            reference: reference.filter(|rows| !rows.is_empty()),
            version_id: version_id.into(),
        }
    }

    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }

    pub fn label_decoder(&self) -> &dyn LabelDecoder {
        self.label_decoder.as_ref()
    }

    /// Training-time reference distribution, if one was shipped with the model
    pub fn reference(&self) -> Option<&[Features]> {
        self.reference.as_deref()
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    /// Fill the `prediction` column of reference rows that lack one
    ///
    /// Rows the model cannot score get a null prediction so they still count
    /// towards the missing-value metrics.
    pub fn with_labelled_reference(mut self) -> Self {
        let Some(mut rows) = self.reference.take() else {
            return self;
        };

        let mut labelled = 0usize;
        let mut failed = 0usize;
        for row in rows.iter_mut().filter(|r| !r.contains_key(PREDICTION_COLUMN)) {
            let value = match crate::predict::predict(&self, row) {
                Ok(label) => {
                    labelled += 1;
                    FeatureValue::Text(label)
                }
                Err(_) => {
                    failed += 1;
                    FeatureValue::Null
                }
            };
            row.insert(PREDICTION_COLUMN.to_string(), value);
        }

        if labelled + failed > 0 {
            info!(labelled, failed, "Labelled reference dataset with the loaded model");
        }
        if failed > 0 {
            warn!(failed, "Reference rows could not be scored; prediction left null");
        }

        self.reference = Some(rows);
        self
    }
}

impl fmt::Debug for ArtifactBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactBundle")
            .field("version_id", &self.version_id)
            .field("features", &self.model.feature_names())
            .field("classes", &self.label_decoder.classes())
            .field("reference_rows", &self.reference.as_ref().map_or(0, Vec::len))
            .finish()
    }
}

/// Where the model comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// Explicit local override (`MODEL_LOCATION`)
    Local(PathBuf),
    /// `models:/<name>/<stage>`
    Registry { name: String, stage: String },
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "{}", path.display()),
            ModelSource::Registry { name, stage } => write!(f, "models:/{}/{}", name, stage),
        }
    }
}

/// One-shot loader for the serving artifacts
pub struct ArtifactLoader {
    model_source: ModelSource,
    artifact_location: Option<PathBuf>,
    registry: Option<RegistryClient>,
    cache_dir: PathBuf,
}

impl ArtifactLoader {
    pub fn new(
        model_source: ModelSource,
        artifact_location: Option<PathBuf>,
        registry: Option<RegistryClient>,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            model_source,
            artifact_location,
            registry,
            cache_dir,
        }
    }

    pub fn from_settings(settings: &ArtifactSettings) -> Result<Self, ArtifactLoadError> {
        let model_source = match &settings.model_location {
            Some(path) => ModelSource::Local(path.clone()),
            None => ModelSource::Registry {
                name: settings.model_name.clone(),
                stage: settings.stage.clone(),
            },
        };
        let registry = settings
            .tracking_uri
            .as_deref()
            .map(RegistryClient::new)
            .transpose()?;

        Ok(Self::new(
            model_source,
            settings.artifact_location.clone(),
            registry,
            settings.cache_dir.clone(),
        ))
    }

    pub fn model_source(&self) -> &ModelSource {
        &self.model_source
    }

    /// Resolve, download if needed, and deserialize all artifacts
    pub async fn load(&self) -> Result<ArtifactBundle, ArtifactLoadError> {
        info!("Loading model from {}", self.model_source);

        let (model_path, registry_run_id) = match &self.model_source {
            ModelSource::Local(path) => (resolve_file(path, MODEL_FILE), None),
            ModelSource::Registry { name, stage } => {
                let registry = self.registry()?;
                let version = registry.latest_version(name, stage).await?;
                let remote = format!("{}/{}", version.artifact_path(), MODEL_FILE);
                let local = registry
                    .download_run_artifact(&version.run_id, &remote, &self.run_cache(&version.run_id))
                    .await?;
                (local, Some(version.run_id))
            }
        };

        let artifact: ModelArtifact = read_json(&model_path)?;
        let run_id = registry_run_id.or(artifact.run_id);
        let model = artifact.classifier.into_classifier()?;

        let artifacts_path = match &self.artifact_location {
            Some(path) => resolve_file(path, ARTIFACTS_FILE),
            None => {
                let run_id = run_id
                    .as_deref()
                    .ok_or_else(|| ArtifactLoadError::MissingRunId(model_path.clone()))?;
                let remote = format!("artifacts/{}", ARTIFACTS_FILE);
                self.registry()?
                    .download_run_artifact(run_id, &remote, &self.run_cache(run_id))
                    .await?
            }
        };

        let auxiliary: AuxiliaryArtifacts = read_json(&artifacts_path)?;
        let version_id = run_id.unwrap_or_else(|| LOCAL_VERSION.to_string());

        let bundle = ArtifactBundle::new(
            model,
            Box::new(auxiliary.label_encoder),
            Some(auxiliary.reference),
            version_id,
        )
        .with_labelled_reference();

        info!(bundle = ?bundle, "Artifacts loaded");
        Ok(bundle)
    }

    fn registry(&self) -> Result<&RegistryClient, ArtifactLoadError> {
        self.registry.as_ref().ok_or(ArtifactLoadError::NoRegistry)
    }

    fn run_cache(&self, run_id: &str) -> PathBuf {
        self.cache_dir.join(run_id)
    }
}

/// A location may name the file itself or the directory containing it
fn resolve_file(location: &Path, file_name: &str) -> PathBuf {
    if location.is_dir() {
        location.join(file_name)
    } else {
        location.to_path_buf()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactLoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| ArtifactLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ArtifactLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
