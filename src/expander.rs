//! Prefix expansion: turning user URIs into listable jobs.
//!
//! Three concerns live here, in the order they run:
//!
//! 1. Bucket enumeration for bucket-prefix queries (`s3://buc`).
//! 2. Search-depth expansion: the prefix tree is walked one level at a
//!    time, serially, before any recursive listing starts. Object items
//!    seen along the way flow straight to the output channel; common
//!    prefixes become the next level's jobs. Pre-computing the depth
//!    levels serially means no producer ever recurses while holding a
//!    gate permit.
//! 3. The final parallel fanout over the leaf jobs (see [`crate::lister`]).

use std::sync::Arc;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::lister::{self, ListOptions};
use crate::storage::Storage;
use crate::types::{LISTING_QUEUE_SIZE, ListEntry, ListingJob};
use crate::uri::S3Uri;
use crate::workers::{ErrorSink, spawn_stage};

/// Start the listing pipeline for a set of URIs.
///
/// Returns the entries channel consumed by one worker pipeline (or the
/// `ls` print loop). The channel closes when listing completes; a listing
/// failure is recorded in `sink` and also closes the channel, so
/// consumers always terminate.
pub fn spawn_listing(
    storage: Storage,
    uris: Vec<S3Uri>,
    options: ListOptions,
    sink: ErrorSink,
) -> Receiver<ListEntry> {
    let (entries_tx, entries_rx) = async_channel::bounded(LISTING_QUEUE_SIZE);

    spawn_stage("listing", sink, async move {
        let options = Arc::new(options);
        let gate = Arc::new(Semaphore::new(options.max_parallel));

        let mut jobs = expand_buckets(&storage, &uris, &options, &entries_tx).await?;

        for level in 0..options.search_depth {
            if jobs.is_empty() {
                break;
            }
            debug!(level, jobs = jobs.len(), "expanding prefixes one level down.");
            jobs = expand_level(&storage, gate.clone(), jobs, options.clone(), &entries_tx).await?;
        }

        lister::fan_out(&storage, gate, jobs, options, &entries_tx).await
    });

    entries_rx
}

/// Normalize URIs into listing jobs, expanding bucket-prefix queries.
///
/// A matched bucket becomes a job only when the invocation will actually
/// walk into it (`recursive` or a positive search depth) and only if it
/// lives in the client's region; otherwise listing it would fail
/// cross-region, so it is skipped with a warning. Without recursion the
/// bucket is reported as a synthetic prefix entry instead.
async fn expand_buckets(
    storage: &Storage,
    uris: &[S3Uri],
    options: &ListOptions,
    entries: &Sender<ListEntry>,
) -> Result<Vec<ListingJob>> {
    let mut jobs = Vec::new();

    for uri in uris {
        if !uri.is_bucket_prefix_query() {
            jobs.push(ListingJob::new(&uri.bucket, &uri.prefix));
            continue;
        }

        let buckets = storage.list_buckets().await?;
        for bucket in buckets.iter().filter(|b| b.starts_with(&uri.bucket)) {
            if options.recursive || options.search_depth > 0 {
                let bucket_region = storage.bucket_region(bucket).await?;
                if bucket_region != storage.region() {
                    warn!(
                        bucket = bucket,
                        bucket_region = bucket_region,
                        client_region = storage.region(),
                        "skipping bucket '{}' in region {} (client region is {})",
                        bucket,
                        bucket_region,
                        storage.region(),
                    );
                    continue;
                }
                jobs.push(ListingJob::new(bucket, ""));
            } else {
                let entry = ListEntry::prefix(bucket, String::new());
                if entries.send(entry).await.is_err() {
                    return Ok(jobs);
                }
            }
        }
    }

    Ok(jobs)
}

/// List every job non-recursively, in parallel, and return the next
/// level's jobs.
///
/// Objects at this level are final output; each common prefix becomes a
/// child job with exactly one trailing delimiter.
async fn expand_level(
    storage: &Storage,
    gate: Arc<Semaphore>,
    jobs: Vec<ListingJob>,
    options: Arc<ListOptions>,
    entries: &Sender<ListEntry>,
) -> Result<Vec<ListingJob>> {
    let mut producers: JoinSet<Result<Vec<ListingJob>>> = JoinSet::new();

    for job in jobs {
        let storage = dyn_clone::clone_box(&**storage);
        let gate = gate.clone();
        let options = options.clone();
        let entries = entries.clone();

        producers.spawn(async move {
            let _permit = gate.acquire_owned().await.unwrap();

            let mut children = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let Some(page) = lister::list_page_with_retry(
                    &storage,
                    &job,
                    Some(options.delimiter.as_str()),
                    continuation_token.take(),
                )
                .await?
                else {
                    break;
                };

                for entry in page.objects {
                    if !lister::object_matches(&options, &entry) {
                        continue;
                    }
                    if entries.send(entry).await.is_err() {
                        return Ok(children);
                    }
                }

                for common_prefix in page.common_prefixes {
                    if common_prefix == options.delimiter {
                        continue;
                    }
                    let trimmed = common_prefix.trim_end_matches(options.delimiter.as_str());
                    children.push(ListingJob::new(
                        &job.bucket,
                        format!("{}{}", trimmed, options.delimiter),
                    ));
                }

                match page.next_continuation_token {
                    Some(token) => continuation_token = Some(token),
                    None => break,
                }
            }

            Ok(children)
        });
    }

    let mut next_level = Vec::new();
    while let Some(join_result) = producers.join_next().await {
        match join_result {
            Err(e) => return Err(anyhow::anyhow!("prefix expansion task panicked: {e}")),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(children)) => next_level.extend(children),
        }
    }

    Ok(next_level)
}
