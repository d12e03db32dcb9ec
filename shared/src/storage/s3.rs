use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use miette::{miette, Result};
use tracing::debug;

use crate::errors::StorageError;
use crate::storage::{validate_key, BlobStore};

/// Access to one S3 (or S3-compatible) bucket, authenticated with an access key pair.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3BlobStore {
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self> {
        if bucket.is_empty() || bucket.contains('/') {
            return Err(miette!("Invalid bucket name: {bucket:?}."));
        }

        if access_key_id.is_empty() || secret_access_key.is_empty() {
            return Err(miette!("Missing S3 credentials for bucket {bucket}."));
        }

        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "capturer-configuration",
        );

        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials);

        if let Some(endpoint) = endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(miette!(
                    "Storage endpoint must be an http(s) URL, got {endpoint:?}."
                ));
            }

            // Custom endpoints are S3-compatible gateways, which expect path-style addressing.
            config = config.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(config.build()),
            bucket: bucket.to_string(),
            endpoint: endpoint.map(|endpoint| endpoint.trim_end_matches('/').to_string()),
        })
    }
}

/// Service errors keep their S3 error code, everything else is a transport failure.
fn storage_error<E, R>(error: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match error.as_service_error() {
        Some(service_error) => StorageError::Service {
            code: service_error.code().unwrap_or("Unknown").to_string(),
            message: service_error.message().unwrap_or_default().to_string(),
        },
        None => StorageError::Transport(DisplayErrorContext(&error).to_string()),
    }
}

fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, extension)| extension) {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn describe(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{endpoint}/{}", self.bucket),
            None => format!("s3://{}", self.bucket),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| {
                let is_missing = error
                    .as_service_error()
                    .map(|service_error| service_error.is_no_such_key())
                    .unwrap_or(false);

                if is_missing {
                    StorageError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    storage_error(error)
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|error| StorageError::Transport(error.to_string()))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(storage_error)?;

            let page_keys: Vec<String> = page
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .map(str::to_string)
                .collect();

            debug!(
                bucket = %self.bucket,
                page_size = page_keys.len(),
                "Listed a page of objects."
            );

            keys.extend(page_keys);

            if !page.is_truncated().unwrap_or(false) {
                break;
            }

            match page.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => {
                    return Err(StorageError::Parse(
                        "Truncated listing without a continuation token.".to_string(),
                    ))
                }
            }
        }

        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;

        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(error)
                if error
                    .as_service_error()
                    .map(|service_error| service_error.is_not_found())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(error) => Err(storage_error(error)),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(content_type_for_key(key))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(storage_error)?;

        Ok(())
    }
}
