//! The download pipeline: objects to local files named by their key.

use std::path::{Component, Path};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::storage::Storage;
use crate::types::{ListEntry, RESULT_QUEUE_SIZE};
use crate::workers::{ErrorSink, spawn_stage};

#[derive(Debug, Clone)]
pub struct GetOptions {
    pub skip_existing: bool,
    pub max_parallel: usize,
}

/// Spawn the download pipeline over a listing channel.
///
/// Each downloaded object is written to a file named exactly by its key
/// (path separator `/`), creating parent directories as needed. The
/// returned channel yields one entry per completed download.
pub fn spawn(
    storage: Storage,
    entries: Receiver<ListEntry>,
    options: GetOptions,
    sink: ErrorSink,
) -> Receiver<ListEntry> {
    let (downloads_tx, downloads_rx) = async_channel::bounded(RESULT_QUEUE_SIZE);

    spawn_stage("object downloader", sink, async move {
        let gate = Arc::new(Semaphore::new(options.max_parallel));
        let mut workers: JoinSet<Result<()>> = JoinSet::new();

        while let Ok(entry) = entries.recv().await {
            if entry.is_prefix {
                continue;
            }
            // a hostile key name must not write outside the working tree
            if has_parent_traversal(&entry.key) {
                warn!(
                    key = %entry.full_key(),
                    "skipping key with '..' path segment",
                );
                continue;
            }
            if options.skip_existing && Path::new(&entry.key).exists() {
                debug!(key = %entry.full_key(), "already exists locally, skipping.");
                continue;
            }

            while let Some(join_result) = workers.try_join_next() {
                unwrap_worker(join_result)?;
            }

            let permit = gate.clone().acquire_owned().await.unwrap();
            let storage = dyn_clone::clone_box(&*storage);
            let downloads = downloads_tx.clone();

            workers.spawn(async move {
                let _permit = permit;
                download_one(&storage, entry, &downloads).await
            });
        }

        while let Some(join_result) = workers.join_next().await {
            unwrap_worker(join_result)?;
        }
        Ok(())
    });

    downloads_rx
}

fn unwrap_worker(join_result: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match join_result {
        Err(e) => Err(anyhow::anyhow!("download worker panicked: {e}")),
        Ok(result) => result,
    }
}

fn has_parent_traversal(key: &str) -> bool {
    Path::new(key)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

async fn download_one(
    storage: &Storage,
    entry: ListEntry,
    downloads: &Sender<ListEntry>,
) -> Result<()> {
    let dest = Path::new(&entry.key);
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let body = storage.get_object(&entry.bucket, &entry.key).await?;
    let mut reader = body.into_async_read();
    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("failed to create file {}", dest.display()))?;
    tokio::io::copy(&mut reader, &mut file)
        .await
        .with_context(|| format!("failed to write {}", dest.display()))?;

    debug!(key = %entry.full_key(), dest = %dest.display(), "downloaded.");
    let _ = downloads.send(entry).await;
    Ok(())
}
