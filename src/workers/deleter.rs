//! The batched-delete pipeline.
//!
//! N workers drain the shared listing channel. Each worker holds one
//! gate permit for its whole lifetime, which is safe here because delete
//! workers never spawn further gated work and the gate is private to the
//! rm invocation. Keys accumulate in a per-worker buffer that flushes as
//! one DeleteObjects request when it reaches the protocol limit of 1000
//! keys, when the incoming bucket changes (every request targets exactly
//! one bucket), and at channel close.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::storage::Storage;
use crate::types::{ListEntry, RESULT_QUEUE_SIZE};
use crate::workers::{ErrorSink, spawn_stage};

/// Maximum keys per DeleteObjects request (protocol limit).
pub const MAX_BATCH_SIZE: usize = 1000;

/// Spawn the delete pipeline over a listing channel.
///
/// Returns a channel of successfully deleted entries. The channel closes
/// after every worker has flushed its final batch.
pub fn spawn(
    storage: Storage,
    entries: Receiver<ListEntry>,
    max_parallel: usize,
    sink: ErrorSink,
) -> Receiver<ListEntry> {
    let (deleted_tx, deleted_rx) = async_channel::bounded(RESULT_QUEUE_SIZE);
    let gate = Arc::new(Semaphore::new(max_parallel));

    for worker_index in 0..max_parallel {
        let storage = dyn_clone::clone_box(&*storage);
        let entries = entries.clone();
        let deleted = deleted_tx.clone();
        let gate = gate.clone();

        spawn_stage("delete worker", sink.clone(), async move {
            let _permit = gate.acquire_owned().await.unwrap();

            let mut batch: Vec<ListEntry> = Vec::with_capacity(MAX_BATCH_SIZE);
            while let Ok(entry) = entries.recv().await {
                if entry.is_prefix {
                    continue;
                }
                if let Some(first) = batch.first() {
                    if first.bucket != entry.bucket {
                        flush(&storage, &mut batch, &deleted).await?;
                    }
                }
                batch.push(entry);
                if batch.len() >= MAX_BATCH_SIZE {
                    flush(&storage, &mut batch, &deleted).await?;
                }
            }
            flush(&storage, &mut batch, &deleted).await?;

            debug!(worker_index, "delete worker completed.");
            Ok(())
        });
    }

    deleted_rx
}

/// Issue one DeleteObjects request for the buffered batch, then emit the
/// deleted entries. Per-key failures reported inside an otherwise
/// successful response are logged and withheld from the results.
async fn flush(
    storage: &Storage,
    batch: &mut Vec<ListEntry>,
    deleted: &Sender<ListEntry>,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let bucket = batch[0].bucket.clone();
    let keys: Vec<String> = batch.iter().map(|e| e.key.clone()).collect();
    debug!(
        bucket = bucket,
        batch_size = keys.len(),
        "sending DeleteObjects batch request."
    );

    let output = storage.delete_objects(&bucket, keys).await?;

    let mut failed: HashSet<String> = HashSet::new();
    for error in output.errors() {
        let key = error.key().unwrap_or("unknown");
        warn!(
            bucket = bucket,
            key = key,
            code = error.code().unwrap_or("unknown"),
            message = error.message().unwrap_or("no message"),
            "DeleteObjects partial failure for key '{}': {} ({}).",
            key,
            error.code().unwrap_or("unknown"),
            error.message().unwrap_or("no message"),
        );
        failed.insert(key.to_string());
    }

    for entry in batch.drain(..) {
        if failed.contains(&entry.key) {
            continue;
        }
        if deleted.send(entry).await.is_err() {
            return Ok(());
        }
    }

    Ok(())
}
