//! The copy pipeline: server-side copies within the store.

use std::sync::Arc;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::storage::Storage;
use crate::types::{ListEntry, RESULT_QUEUE_SIZE};
use crate::uri::S3Uri;
use crate::workers::{ErrorSink, spawn_stage};

#[derive(Debug, Clone)]
pub struct CpOptions {
    pub source: S3Uri,
    pub dest: S3Uri,
    pub delimiter: String,
    pub recursive: bool,
    pub flat: bool,
    pub max_parallel: usize,
}

/// One completed copy: the source full key and the entry now living at
/// the destination.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub source: String,
    pub dest: ListEntry,
}

/// Spawn the copy pipeline over a listing of the source URI.
///
/// A failed copy is logged and dropped; the pipeline keeps going. Every
/// successful copy is reported on the returned channel.
pub fn spawn(
    storage: Storage,
    entries: Receiver<ListEntry>,
    options: CpOptions,
    sink: ErrorSink,
) -> Receiver<CopyOutcome> {
    let (copies_tx, copies_rx) = async_channel::bounded(RESULT_QUEUE_SIZE);

    spawn_stage("object copier", sink, async move {
        let gate = Arc::new(Semaphore::new(options.max_parallel));
        let mut workers: JoinSet<Result<()>> = JoinSet::new();

        while let Ok(entry) = entries.recv().await {
            if entry.is_prefix {
                continue;
            }

            while let Some(join_result) = workers.try_join_next() {
                unwrap_worker(join_result)?;
            }

            let permit = gate.clone().acquire_owned().await.unwrap();
            let storage = dyn_clone::clone_box(&*storage);
            let copies = copies_tx.clone();
            let options = options.clone();

            workers.spawn(async move {
                let _permit = permit;
                copy_one(&storage, entry, &options, &copies).await
            });
        }

        while let Some(join_result) = workers.join_next().await {
            unwrap_worker(join_result)?;
        }
        Ok(())
    });

    copies_rx
}

fn unwrap_worker(join_result: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match join_result {
        Err(e) => Err(anyhow::anyhow!("copy worker panicked: {e}")),
        Ok(result) => result,
    }
}

async fn copy_one(
    storage: &Storage,
    entry: ListEntry,
    options: &CpOptions,
    copies: &Sender<CopyOutcome>,
) -> Result<()> {
    let dest_key = destination_key(
        &entry.key,
        &options.source.prefix,
        &options.dest.prefix,
        &options.delimiter,
        options.flat,
        options.recursive,
    );

    match storage
        .copy_object(&entry.bucket, &entry.key, &options.dest.bucket, &dest_key)
        .await
    {
        Ok(()) => {
            debug!(
                source = %entry.full_key(),
                dest_bucket = options.dest.bucket,
                dest_key = dest_key,
                "copied.",
            );
            let dest = ListEntry::object(
                &options.dest.bucket,
                dest_key,
                entry.size,
                entry.last_modified,
            );
            let outcome = CopyOutcome {
                source: entry.full_key(),
                dest,
            };
            let _ = copies.send(outcome).await;
        }
        Err(e) => {
            // per-item failure: report and keep the pipeline going
            error!("error: {e:#}");
        }
    }

    Ok(())
}

/// Compute the destination key for one source key.
///
/// * `flat` keeps only the last delimiter-segment of the source key.
/// * `recursive` strips the longest common leading segment sequence
///   between the source key and the source prefix, then keeps the rest.
/// * Otherwise the source key is used unchanged.
///
/// The destination prefix is prepended with exactly one delimiter
/// between it and the relative key.
pub(crate) fn destination_key(
    src_key: &str,
    src_prefix: &str,
    dest_prefix: &str,
    delimiter: &str,
    flat: bool,
    recursive: bool,
) -> String {
    let relative: String = if flat {
        src_key
            .rsplit(delimiter)
            .next()
            .unwrap_or(src_key)
            .to_string()
    } else if recursive {
        let src_segments: Vec<&str> = src_key.split(delimiter).collect();
        let prefix_segments: Vec<&str> = src_prefix
            .split(delimiter)
            .filter(|s| !s.is_empty())
            .collect();
        let common = src_segments
            .iter()
            .zip(prefix_segments.iter())
            .take_while(|(a, b)| a == b)
            .count();
        src_segments[common..].join(delimiter)
    } else {
        src_key.to_string()
    };

    if dest_prefix.is_empty() {
        relative
    } else if dest_prefix.ends_with(delimiter) {
        format!("{dest_prefix}{relative}")
    } else {
        format!("{dest_prefix}{delimiter}{relative}")
    }
}
