//! Service configuration
//!
//! Settings resolve in the usual order: command line, environment, TOML file
//! (`sdc-stream.toml`), compiled default. The environment variable names
//! match the ones the deployment already sets (`MODEL_LOCATION`,
//! `PREDICTIONS_OUTPUT_STREAM`, ...).

use clap::Parser;
use sdc_common::config::{default_data_dir, parse_flag, resolve_setting, LoggingConfig};
use sdc_common::time::secs_to_duration;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::{EmissionPolicy, PoolSettings};

pub const MODULE_NAME: &str = "sdc-stream";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_MODEL_NAME: &str = "student-dropout-classifier";
pub const DEFAULT_STAGE: &str = "Staging";
pub const DEFAULT_OUTPUT_STREAM: &str = "student-dropout-output-stream";

/// Command-line arguments for sdc-stream
#[derive(Parser, Debug, Default)]
#[command(name = "sdc-stream")]
#[command(about = "Streaming student-dropout inference service")]
#[command(version)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "SDC_PORT")]
    pub port: Option<u16>,

    /// TOML config file
    #[arg(short, long, env = "SDC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Metrics database path
    #[arg(short, long, env = "SDC_DATABASE")]
    pub database: Option<PathBuf>,

    /// Disable emission and monitoring (same as TEST_RUN=True)
    #[arg(long)]
    pub test_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub max_in_flight: usize,
    pub job_timeout_secs: u64,
    /// Bounded wait for in-flight jobs at shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            job_timeout_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

impl MonitoringConfig {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_in_flight: self.max_in_flight,
            job_timeout: secs_to_duration(self.job_timeout_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        secs_to_duration(self.shutdown_grace_secs)
    }
}

/// `sdc-stream.toml`
///
/// ```toml
/// port = 8080
/// model_name = "student-dropout-classifier"
/// stage = "Production"
/// tracking_uri = "http://mlflow.internal:5000"
/// emission_policy = "best_effort"
///
/// [monitoring]
/// max_in_flight = 32
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub database_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub model_location: Option<PathBuf>,
    pub artifact_location: Option<PathBuf>,
    pub model_name: Option<String>,
    pub stage: Option<String>,
    pub tracking_uri: Option<String>,
    pub output_stream: Option<String>,
    pub kinesis_endpoint: Option<String>,
    pub emission_policy: Option<EmissionPolicy>,
    pub test_run: Option<bool>,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

/// Inputs of the artifact loader
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSettings {
    pub model_location: Option<PathBuf>,
    pub artifact_location: Option<PathBuf>,
    pub model_name: String,
    pub stage: String,
    pub tracking_uri: Option<String>,
    pub cache_dir: PathBuf,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub test_run: bool,
    pub artifacts: ArtifactSettings,
    pub output_stream: String,
    /// Endpoint override; `None` publishes to AWS
    pub kinesis_endpoint: Option<String>,
    pub emission_policy: EmissionPolicy,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Resolve from parsed args, a loaded TOML file and an environment lookup
    pub fn resolve<F>(args: &Args, toml: TomlConfig, env: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = default_data_dir();
        let non_blank = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let port = match args.port {
            Some(port) => port,
            None => toml.port.unwrap_or(DEFAULT_PORT),
        };

        let database_path = args
            .database
            .clone()
            .or(toml.database_path)
            .unwrap_or_else(|| data_dir.join("metrics.db"));

        let test_run = args.test_run
            || non_blank("TEST_RUN").map_or(toml.test_run.unwrap_or(false), |v| parse_flag(&v));

        let emission_policy = match non_blank("SDC_EMISSION_POLICY") {
            Some(value) => value.parse()?,
            None => toml.emission_policy.unwrap_or_default(),
        };

        let artifacts = ArtifactSettings {
            model_location: non_blank("MODEL_LOCATION")
                .map(PathBuf::from)
                .or(toml.model_location),
            artifact_location: non_blank("ARTIFACT_LOCATION")
                .map(PathBuf::from)
                .or(toml.artifact_location),
            model_name: resolve_setting(
                None,
                env("MODEL_NAME"),
                toml.model_name.as_deref(),
                DEFAULT_MODEL_NAME,
            ),
            stage: resolve_setting(None, env("STAGE"), toml.stage.as_deref(), DEFAULT_STAGE),
            tracking_uri: non_blank("MLFLOW_TRACKING_URI").or(toml.tracking_uri),
            cache_dir: toml.cache_dir.unwrap_or_else(|| data_dir.join("artifacts")),
        };

        Ok(Self {
            bind_address: toml
                .bind_address
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            port,
            database_path,
            test_run,
            artifacts,
            output_stream: resolve_setting(
                None,
                env("PREDICTIONS_OUTPUT_STREAM"),
                toml.output_stream.as_deref(),
                DEFAULT_OUTPUT_STREAM,
            ),
            kinesis_endpoint: non_blank("KINESIS_ENDPOINT_URL").or(toml.kinesis_endpoint),
            emission_policy,
            monitoring: toml.monitoring,
            logging: toml.logging,
        })
    }

    /// Resolve against the process environment
    pub fn from_env(args: &Args, toml: TomlConfig) -> Result<Self, String> {
        Self::resolve(args, toml, |key| std::env::var(key).ok())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| format!("invalid bind address {}:{}: {}", self.bind_address, self.port, e))
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::resolve(&Args::default(), TomlConfig::default(), env(&[])).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.test_run);
        assert_eq!(config.artifacts.model_name, "student-dropout-classifier");
        assert_eq!(config.artifacts.stage, "Staging");
        assert_eq!(config.artifacts.model_location, None);
        assert_eq!(config.output_stream, DEFAULT_OUTPUT_STREAM);
        assert_eq!(config.kinesis_endpoint, None);
        assert_eq!(config.emission_policy, EmissionPolicy::Propagate);
        assert_eq!(config.monitoring.max_in_flight, 64);
        assert_eq!(config.monitoring.pool_settings().job_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_environment_overrides_toml() {
        let toml: TomlConfig = toml::from_str(
            r#"
            model_name = "from-toml"
            stage = "Production"
            output_stream = "toml-stream"
            "#,
        )
        .unwrap();
        let config = ServiceConfig::resolve(
            &Args::default(),
            toml,
            env(&[
                ("MODEL_NAME", "from-env"),
                ("MODEL_LOCATION", "/models/dropout"),
                ("TEST_RUN", "True"),
                ("KINESIS_ENDPOINT_URL", "http://localstack:4566"),
            ]),
        )
        .unwrap();

        assert_eq!(config.artifacts.model_name, "from-env");
        assert_eq!(config.artifacts.stage, "Production");
        assert_eq!(config.output_stream, "toml-stream");
        assert_eq!(config.artifacts.model_location, Some(PathBuf::from("/models/dropout")));
        assert!(config.test_run);
        assert_eq!(config.kinesis_endpoint.as_deref(), Some("http://localstack:4566"));
    }

    #[test]
    fn test_cli_overrides_everything() {
        let args = Args {
            port: Some(9001),
            database: Some(PathBuf::from("/tmp/cli.db")),
            test_run: true,
            ..Args::default()
        };
        let toml = TomlConfig {
            port: Some(7000),
            database_path: Some(PathBuf::from("/tmp/toml.db")),
            ..TomlConfig::default()
        };
        let config = ServiceConfig::resolve(&args, toml, env(&[("TEST_RUN", "False")])).unwrap();

        assert_eq!(config.port, 9001);
        assert_eq!(config.database_path(), Path::new("/tmp/cli.db"));
        assert!(config.test_run);
    }

    #[test]
    fn test_test_run_flag_values() {
        let resolve = |value: &str| {
            ServiceConfig::resolve(&Args::default(), TomlConfig::default(), env(&[("TEST_RUN", value)]))
                .unwrap()
                .test_run
        };
        assert!(resolve("True"));
        assert!(resolve("true"));
        assert!(!resolve("False"));
        // Blank falls through to the default
        assert!(!resolve("  "));
    }

    #[test]
    fn test_emission_policy_sources() {
        let toml: TomlConfig = toml::from_str("emission_policy = \"best_effort\"").unwrap();
        let config = ServiceConfig::resolve(&Args::default(), toml.clone(), env(&[])).unwrap();
        assert_eq!(config.emission_policy, EmissionPolicy::BestEffort);

        let config = ServiceConfig::resolve(
            &Args::default(),
            toml.clone(),
            env(&[("SDC_EMISSION_POLICY", "propagate")]),
        )
        .unwrap();
        assert_eq!(config.emission_policy, EmissionPolicy::Propagate);

        assert!(ServiceConfig::resolve(
            &Args::default(),
            toml,
            env(&[("SDC_EMISSION_POLICY", "sometimes")])
        )
        .is_err());
    }

    #[test]
    fn test_monitoring_section() {
        let toml: TomlConfig = toml::from_str(
            r#"
            [monitoring]
            max_in_flight = 8
            job_timeout_secs = 2
            "#,
        )
        .unwrap();
        let config = ServiceConfig::resolve(&Args::default(), toml, env(&[])).unwrap();
        assert_eq!(config.monitoring.max_in_flight, 8);
        assert_eq!(config.monitoring.job_timeout_secs, 2);
        assert_eq!(config.monitoring.shutdown_grace_secs, 10);
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("MODEL_NAME", "env-model");
        std::env::set_var("STAGE", "Production");
        let config = ServiceConfig::from_env(&Args::default(), TomlConfig::default()).unwrap();
        std::env::remove_var("MODEL_NAME");
        std::env::remove_var("STAGE");

        assert_eq!(config.artifacts.model_name, "env-model");
        assert_eq!(config.artifacts.stage, "Production");
    }

    #[test]
    fn test_socket_addr() {
        let config = ServiceConfig::resolve(&Args::default(), TomlConfig::default(), env(&[])).unwrap();
        assert_eq!(config.socket_addr().unwrap().port(), DEFAULT_PORT);
    }
}
