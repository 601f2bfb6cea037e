//! S3 client construction from the default credential chain.
//!
//! Credentials, the region, and profiles are resolved by aws-config
//! (environment variables first, then the shared config / credentials
//! files). Only the endpoint and addressing style are overridable, for
//! S3-compatible services such as MinIO.

use aws_sdk_s3::Client;

use crate::config::ClientConfig;

const FALLBACK_REGION: &str = "us-east-1";

/// Build an S3 client plus the region it resolved to.
///
/// The region is returned separately because bucket enumeration compares
/// bucket locations against it.
pub async fn build_client(config: &ClientConfig) -> (Client, String) {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

    if let Some(ref endpoint) = config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;
    let region = sdk_config
        .region()
        .map(|r| r.to_string())
        .unwrap_or_else(|| FALLBACK_REGION.to_string());

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(config.force_path_style)
        .build();

    (Client::from_conf(s3_config), region)
}
