//! The stream pipeline: object bodies to stdout.
//!
//! One gated worker per object. In line mode the whole body is buffered,
//! gunzipped when the key extension says so, and emitted as
//! newline-terminated fragments; in raw mode the body is forwarded as
//! 64-byte chunks without decompression. Fragments from different
//! objects may interleave unless `ordered` shrinks the gate to one
//! permit, in which case permits are granted in dispatch order and every
//! byte of one object precedes any byte of the next.

use std::io::{BufRead, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use bytes::{Bytes, BytesMut};
use flate2::read::MultiGzDecoder;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::storage::Storage;
use crate::types::{ListEntry, RESULT_QUEUE_SIZE};
use crate::workers::{ErrorSink, spawn_stage};

/// Raw-mode chunk size.
const RAW_CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub include_key_name: bool,
    pub ordered: bool,
    pub raw: bool,
    pub max_parallel: usize,
}

/// Spawn the stream pipeline over a listing channel.
///
/// Returns the fragment channel; the caller writes fragments to stdout
/// verbatim. The channel closes when all objects have been streamed.
pub fn spawn(
    storage: Storage,
    entries: Receiver<ListEntry>,
    options: StreamOptions,
    sink: ErrorSink,
) -> Receiver<Bytes> {
    let (fragments_tx, fragments_rx) = async_channel::bounded(RESULT_QUEUE_SIZE);

    spawn_stage("object streamer", sink, async move {
        let capacity = if options.ordered {
            1
        } else {
            options.max_parallel
        };
        let gate = Arc::new(Semaphore::new(capacity));
        let mut workers: JoinSet<Result<()>> = JoinSet::new();

        while let Ok(entry) = entries.recv().await {
            if entry.is_prefix {
                continue;
            }

            reap_finished(&mut workers)?;

            let permit = gate.clone().acquire_owned().await.unwrap();
            let storage = dyn_clone::clone_box(&*storage);
            let fragments = fragments_tx.clone();
            let options = options.clone();

            workers.spawn(async move {
                let _permit = permit;
                stream_one(&storage, &entry, &options, &fragments).await
            });
        }

        while let Some(join_result) = workers.join_next().await {
            unwrap_worker(join_result)?;
        }
        Ok(())
    });

    fragments_rx
}

fn reap_finished(workers: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(join_result) = workers.try_join_next() {
        unwrap_worker(join_result)?;
    }
    Ok(())
}

fn unwrap_worker(join_result: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match join_result {
        Err(e) => Err(anyhow::anyhow!("stream worker panicked: {e}")),
        Ok(result) => result,
    }
}

async fn stream_one(
    storage: &Storage,
    entry: &ListEntry,
    options: &StreamOptions,
    fragments: &Sender<Bytes>,
) -> Result<()> {
    let full_key = entry.full_key();
    debug!(key = %full_key, "streaming object.");

    let body = storage.get_object(&entry.bucket, &entry.key).await?;

    if options.raw {
        let mut reader = body.into_async_read();
        let mut chunk = [0u8; RAW_CHUNK_SIZE];
        loop {
            let n = reader
                .read(&mut chunk)
                .await
                .with_context(|| format!("failed to read body of {full_key}"))?;
            if n == 0 {
                break;
            }
            let fragment = frame(options, &full_key, &chunk[..n], false);
            if fragments.send(fragment).await.is_err() {
                return Ok(());
            }
        }
    } else {
        let collected = body
            .collect()
            .await
            .with_context(|| format!("failed to read body of {full_key}"))?
            .into_bytes();
        let decoded = decompress_by_ext(&entry.key, collected);

        let mut reader = decoded.as_ref();
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("failed to read line from {full_key}"))?;
            if n == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let fragment = frame(options, &full_key, &line, true);
            if fragments.send(fragment).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Build one output fragment, prefixing the key name when requested and
/// terminating lines with a newline.
fn frame(options: &StreamOptions, full_key: &str, payload: &[u8], newline: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(full_key.len() + payload.len() + 4);
    if options.include_key_name {
        buf.extend_from_slice(b"[");
        buf.extend_from_slice(full_key.as_bytes());
        buf.extend_from_slice(b"] ");
    }
    buf.extend_from_slice(payload);
    if newline {
        buf.extend_from_slice(b"\n");
    }
    buf.freeze()
}

/// Gunzip bodies whose key ends in `.gz`/`.gzip`; anything that fails to
/// decode is passed through untouched (mislabelled objects happen).
fn decompress_by_ext(key: &str, raw: Bytes) -> Bytes {
    if !(key.ends_with(".gz") || key.ends_with(".gzip")) {
        return raw;
    }
    let mut decoded = Vec::new();
    match MultiGzDecoder::new(raw.as_ref()).read_to_end(&mut decoded) {
        Ok(_) => Bytes::from(decoded),
        Err(_) => raw,
    }
}
