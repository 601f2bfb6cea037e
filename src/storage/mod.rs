use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsOutput;
use aws_sdk_s3::primitives::ByteStream;
use dyn_clone::DynClone;

use crate::config::ClientConfig;
use crate::types::ListPage;

pub mod s3;

/// Type alias for a boxed ObjectStore trait object.
pub type Storage = Box<dyn ObjectStore + Send + Sync>;

/// The object-store seam used by every pipeline.
///
/// The S3 implementation lives in [`s3`]; tests substitute mocks. All
/// methods assume the underlying client performs its own signing and
/// transport-level (5xx/429) retries; the one place fasts3 layers its own
/// request-level retry on top is the listing loop in `lister`, which is
/// the only call issued in a tight enough loop to need it.
#[async_trait]
pub trait ObjectStore: DynClone {
    /// One page of a ListObjectsV2 call. Keys and common prefixes in the
    /// returned page are URL-decoded. `next_continuation_token` is `Some`
    /// while the server reports the listing truncated.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage>;

    /// GET an object, returning its body stream.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream>;

    /// Server-side copy of a single object.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()>;

    /// Batch-delete up to 1000 keys from one bucket. The caller is
    /// responsible for batching; partial failures are reported in the
    /// returned output, not as an `Err`.
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<DeleteObjectsOutput>;

    /// Names of all buckets owned by the caller.
    async fn list_buckets(&self) -> Result<Vec<String>>;

    /// The region a bucket lives in.
    async fn bucket_region(&self, bucket: &str) -> Result<String>;

    /// The region this client is configured for.
    fn region(&self) -> &str;
}

dyn_clone::clone_trait_object!(ObjectStore);

/// Create the S3 storage backend for a CLI invocation.
pub async fn create_storage(client_config: &ClientConfig) -> Storage {
    let (client, region) = s3::client_builder::build_client(client_config).await;
    Box::new(s3::S3Storage::new(client, region))
}
