//! Downstream emitter
//!
//! Publishes each [`PredictionResult`] to the predictions output stream,
//! partitioned by `student_id` so records for one student stay ordered.
//!
//! The live variant uses the Kinesis SDK. Without an endpoint override it
//! talks to AWS with credentials and region from the usual AWS environment;
//! `KINESIS_ENDPOINT_URL` points it at LocalStack or another compatible
//! endpoint instead.

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_kinesis::config::{Credentials, Region};
use aws_sdk_kinesis::error::{DisplayErrorContext, SdkError};
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::Client;
use sdc_common::PredictionResult;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::EmissionError;

/// Single attempt; a slow stream must not stall the batch
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Region used with static development credentials
const LOCAL_REGION: &str = "us-east-1";

#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, result: &PredictionResult) -> Result<(), EmissionError>;
}

/// Test-mode emitter: accepts everything, touches nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmitter;

#[async_trait]
impl Emitter for NoopEmitter {
    async fn emit(&self, _result: &PredictionResult) -> Result<(), EmissionError> {
        Ok(())
    }
}

/// Kinesis stream emitter
#[derive(Debug, Clone)]
pub struct KinesisEmitter {
    client: Client,
    stream_name: String,
}

impl KinesisEmitter {
    pub fn new(client: Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }

    /// Client from the AWS environment, optionally redirected to `endpoint`
    pub async fn from_environment(endpoint: Option<&str>, stream_name: impl Into<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(REQUEST_TIMEOUT)
                    .build(),
            );
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        Self::new(Client::new(&sdk_config), stream_name)
    }

    /// Client for a local endpoint with static development credentials
    pub fn local(endpoint: &str, stream_name: impl Into<String>) -> Self {
        let config = aws_sdk_kinesis::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(LOCAL_REGION))
            .credentials_provider(Credentials::new("test", "test", None, None, "sdc-local"))
            .endpoint_url(endpoint)
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(REQUEST_TIMEOUT)
                    .build(),
            )
            .build();
        Self::new(Client::from_conf(config), stream_name)
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    async fn put_record(&self, result: &PredictionResult) -> Result<(), EmissionError> {
        let payload = serde_json::to_vec(result)?;

        let output = self
            .client
            .put_record()
            .stream_name(&self.stream_name)
            .data(Blob::new(payload))
            .partition_key(result.partition_key())
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(context) => EmissionError::Rejected {
                    status: context.raw().status().as_u16(),
                    body: DisplayErrorContext(context.err()).to_string(),
                },
                other => EmissionError::Transport(DisplayErrorContext(&other).to_string()),
            })?;

        debug!(
            student_id = %result.prediction.student_id,
            shard_id = %output.shard_id(),
            sequence_number = %output.sequence_number(),
            "Prediction published"
        );
        Ok(())
    }
}

#[async_trait]
impl Emitter for KinesisEmitter {
    async fn emit(&self, result: &PredictionResult) -> Result<(), EmissionError> {
        self.put_record(result).await.map_err(|e| {
            error!(
                stream = %self.stream_name,
                student_id = %result.prediction.student_id,
                error = %e,
                "Failed to publish prediction"
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_emitter_accepts() {
        let result = PredictionResult::new("m", "v", "Dropout", 1.into());
        assert!(NoopEmitter.emit(&result).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let emitter = KinesisEmitter::local("http://127.0.0.1:9", "predictions");
        let result = PredictionResult::new("m", "v", "Dropout", 1.into());
        assert!(matches!(
            emitter.emit(&result).await,
            Err(EmissionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_environment_client_keeps_stream_name() {
        let emitter = KinesisEmitter::from_environment(Some("http://127.0.0.1:9"), "predictions").await;
        assert_eq!(emitter.stream_name(), "predictions");
    }
}
