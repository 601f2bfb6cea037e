pub mod client_builder;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, EncodingType, ObjectIdentifier};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_smithy_types_convert::date_time::DateTimeExt;

use crate::storage::ObjectStore;
use crate::types::{ListEntry, ListPage};

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "AccessDenied", "InternalError") and the human-readable error
/// message from the response. For other error types (network, timeout,
/// construction failure), returns "N/A" as the code and the full error
/// description as the message.
fn extract_sdk_error_details<E: std::fmt::Display + ProvideErrorMetadata>(
    e: &SdkError<E>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), e.to_string())
    }
}

fn url_decode(raw: &str) -> Result<String> {
    Ok(urlencoding::decode(raw)
        .with_context(|| format!("failed to URL-decode listed key '{raw}'"))?
        .into_owned())
}

/// S3 implementation of [`ObjectStore`].
///
/// A thin mapping onto the SDK: every method issues one API call and
/// attaches the S3 error code/message as context on failure. Listing
/// requests ask for `encoding-type=url` and decode keys before they leave
/// this module, so downstream stages only ever see plain strings.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: String,
}

impl S3Storage {
    pub fn new(client: Client, region: String) -> Self {
        Self { client, region }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(String::from))
            .set_continuation_token(continuation_token)
            .max_keys(max_keys)
            .encoding_type(EncodingType::Url)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    prefix = prefix,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 ListObjectsV2 API call failed for s3://{}/{}: {} ({}).",
                    bucket,
                    prefix,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow::anyhow!(e).context("aws_sdk_s3::client::list_objects_v2() failed.")
            })?;

        let mut objects = Vec::with_capacity(output.contents().len());
        for object in output.contents() {
            let key = url_decode(object.key().unwrap_or_default())?;
            let last_modified = object
                .last_modified()
                .and_then(|t| t.to_chrono_utc().ok());
            let size = object.size().unwrap_or(0).max(0) as u64;
            objects.push(ListEntry::object(bucket, key, size, last_modified));
        }

        let mut common_prefixes = Vec::with_capacity(output.common_prefixes().len());
        for cp in output.common_prefixes() {
            if let Some(raw) = cp.prefix() {
                common_prefixes.push(url_decode(raw)?);
            }
        }

        let next_continuation_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    key = key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 GetObject API call failed for s3://{}/{}: {} ({}).",
                    bucket,
                    key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow::anyhow!(e).context("aws_sdk_s3::client::get_object() failed.")
            })?;

        Ok(output.body)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()> {
        let copy_source = format!("/{src_bucket}/{src_key}");
        self.client
            .copy_object()
            .bucket(dest_bucket)
            .key(dest_key)
            .copy_source(&copy_source)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::warn!(
                    copy_source = copy_source,
                    dest_bucket = dest_bucket,
                    dest_key = dest_key,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 CopyObject API call failed for {} -> s3://{}/{}: {} ({}).",
                    copy_source,
                    dest_bucket,
                    dest_key,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow::anyhow!(e).context("aws_sdk_s3::client::copy_object() failed.")
            })?;

        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<DeleteObjectsOutput> {
        let object_count = keys.len();
        let identifiers = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .context("failed to build ObjectIdentifier")?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .context("failed to build Delete request")?;

        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    object_count = object_count,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 DeleteObjects API call failed for {} objects in bucket '{}': {} ({}).",
                    object_count,
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow::anyhow!(e).context("aws_sdk_s3::client::delete_objects() failed.")
            })
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self.client.list_buckets().send().await.map_err(|e| {
            let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
            tracing::error!(
                s3_error_code = s3_error_code,
                s3_error_message = s3_error_message,
                "S3 ListBuckets API call failed: {} ({}).",
                s3_error_code,
                s3_error_message,
            );
            anyhow::anyhow!(e).context("aws_sdk_s3::client::list_buckets() failed.")
        })?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(String::from))
            .collect())
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        let output = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| {
                let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
                tracing::error!(
                    bucket = bucket,
                    s3_error_code = s3_error_code,
                    s3_error_message = s3_error_message,
                    "S3 GetBucketLocation API call failed for bucket '{}': {} ({}).",
                    bucket,
                    s3_error_code,
                    s3_error_message,
                );
                anyhow::anyhow!(e).context("aws_sdk_s3::client::get_bucket_location() failed.")
            })?;

        // us-east-1 is reported as an empty/absent constraint.
        Ok(match output.location_constraint() {
            None => "us-east-1".to_string(),
            Some(lc) if lc.as_str().is_empty() => "us-east-1".to_string(),
            Some(lc) => lc.as_str().to_string(),
        })
    }

    fn region(&self) -> &str {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_decode_plain_and_encoded() {
        assert_eq!(url_decode("a/b/c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(url_decode("a%20b/c%2Bd").unwrap(), "a b/c+d");
        assert_eq!(url_decode("ctrl%01char").unwrap(), "ctrl\u{1}char");
    }

    #[tokio::test]
    async fn storage_reports_configured_region() {
        let config = crate::config::ClientConfig {
            endpoint_url: Some("http://localhost:9000".to_string()),
            force_path_style: true,
        };
        let (client, _region) = client_builder::build_client(&config).await;
        let storage = S3Storage::new(client, "eu-west-1".to_string());
        assert_eq!(storage.region(), "eu-west-1");
    }
}
