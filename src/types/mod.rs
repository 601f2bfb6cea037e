use chrono::{DateTime, Utc};

pub mod error;

/// Capacity of the listing channel between the lister and its consumer
/// pipeline. Bounded so listing applies back-pressure instead of buffering
/// an entire bucket in memory.
pub const LISTING_QUEUE_SIZE: usize = 10_000;

/// Capacity of each pipeline's result channel.
pub const RESULT_QUEUE_SIZE: usize = 1_000;

/// The normalized record flowing through every pipeline.
///
/// Produced by the listing fanout, consumed exactly once by one worker.
/// A `ListEntry` with `is_prefix == true` represents a common prefix
/// (pseudo-directory); it is printed by `ls` but is never a target for
/// stream/get/cp/rm, which skip it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub is_prefix: bool,
    pub bucket: String,
    /// URL-decoded object key (or common prefix, including its trailing
    /// delimiter). Empty for synthetic bucket entries.
    pub key: String,
    /// Object size in bytes; 0 for prefixes.
    pub size: u64,
    /// Last-modified timestamp; `None` for prefixes.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ListEntry {
    pub fn object(
        bucket: &str,
        key: String,
        size: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            is_prefix: false,
            bucket: bucket.to_string(),
            key,
            size,
            last_modified,
        }
    }

    pub fn prefix(bucket: &str, key: String) -> Self {
        Self {
            is_prefix: true,
            bucket: bucket.to_string(),
            key,
            size: 0,
            last_modified: None,
        }
    }

    /// The textual URI `s3://<bucket>/<key>`.
    ///
    /// A synthetic bucket entry (empty key) renders as `s3://<bucket>`
    /// with no trailing slash.
    pub fn full_key(&self) -> String {
        if self.key.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.key)
        }
    }
}

/// One page of a server-side LIST call, already URL-decoded.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListEntry>,
    pub common_prefixes: Vec<String>,
    /// `Some` while the server reports the listing as truncated.
    pub next_continuation_token: Option<String>,
}

/// A single listable unit: one (bucket, prefix) pair.
///
/// The effective delimiter is decided by the stage issuing the request:
/// the user's delimiter during prefix expansion and non-recursive
/// listing, none at all for recursive listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingJob {
    pub bucket: String,
    pub prefix: String,
}

impl ListingJob {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}
