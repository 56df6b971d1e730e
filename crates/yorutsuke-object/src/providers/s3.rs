//! S3-compatible provider using [`object_store::aws::AmazonS3Builder`].
//!
//! Works with AWS S3, MinIO, and any S3-compatible service.

#[cfg(feature = "config")]
use clap::Args;
use object_store::aws::AmazonS3Builder;
use serde::{Deserialize, Serialize};

use crate::{Error, ObjectStoreClient, Result};

/// Default AWS region.
const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    /// Bucket holding uploads, receipts and batch output.
    #[cfg_attr(feature = "config", arg(long = "s3-bucket", env = "S3_BUCKET"))]
    pub bucket: String,

    /// AWS region.
    #[cfg_attr(
        feature = "config",
        arg(long = "s3-region", env = "AWS_REGION", default_value = DEFAULT_REGION)
    )]
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint URL (e.g. `http://localhost:9000` for MinIO).
    #[cfg_attr(feature = "config", arg(long = "s3-endpoint", env = "S3_ENDPOINT"))]
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key ID for static credentials.
    #[cfg_attr(feature = "config", arg(long = "s3-access-key-id", env = "AWS_ACCESS_KEY_ID"))]
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key for static credentials.
    #[cfg_attr(
        feature = "config",
        arg(long = "s3-secret-access-key", env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)
    )]
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Session token for temporary credentials.
    #[cfg_attr(
        feature = "config",
        arg(long = "s3-session-token", env = "AWS_SESSION_TOKEN", hide_env_values = true)
    )]
    #[serde(default)]
    pub session_token: Option<String>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_owned()
}

impl S3Config {
    /// Creates a config for `bucket` in the default region.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }

    /// Sets a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets static credentials.
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }
}

/// Factory for S3-backed [`ObjectStoreClient`]s.
pub struct S3Provider;

impl S3Provider {
    /// Provider identifier used in error labels.
    pub const ID: &str = "s3";

    /// Builds a client for the configured bucket.
    ///
    /// Plain-HTTP endpoints are allowed so that local MinIO works.
    pub fn connect(config: &S3Config) -> Result<ObjectStoreClient> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }

        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }

        let store = builder
            .build()
            .map_err(|e| Error::connection(e.to_string(), Self::ID))?;

        tracing::debug!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "connected S3 object store"
        );

        Ok(ObjectStoreClient::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connects_to_minio_endpoint() {
        let config = S3Config::new("receipts")
            .with_endpoint("http://localhost:9000")
            .with_credentials("minio", "minio123");

        assert!(S3Provider::connect(&config).is_ok());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: S3Config = serde_json::from_str(r#"{ "bucket": "b" }"#).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(config.endpoint.is_none());
    }
}
