/*!
# fasts3

fasts3 is a multi-threaded S3 utility. For buckets with millions of keys
it parallelizes listing across independent prefix branches and fans out
per-object work under a bounded concurrency budget.

## Architecture

Every command is the same pipeline with a different tail:

```text
URIs → PrefixExpander → ListingFanout → one worker pipeline → stdout
```

The expander turns user URIs into listable (bucket, prefix) jobs,
optionally walking `--search-depth` levels of the prefix tree first so
each subtree gets its own parallel producer. The fanout drains the
server's paginated listing under a counting semaphore and emits
[`ListEntry`] records into one bounded channel. Five consumers exist:
`ls` printing, body streaming, download, server-side copy, and batched
delete (1000 keys per request, one bucket per request).

All functionality lives in this library crate; the `fasts3` binary is a
thin wrapper that parses arguments into a [`Config`] and drives one
pipeline per invocation.

## Library usage

```no_run
use fasts3::lister::ListOptions;
use fasts3::workers::ErrorSink;
use fasts3::{expander, storage};

# async fn example() -> anyhow::Result<()> {
let store = storage::create_storage(&Default::default()).await;
let uris = vec![fasts3::S3Uri::parse("s3://demo/logs/")?];
let options = ListOptions {
    delimiter: "/".to_string(),
    recursive: true,
    search_depth: 0,
    key_regex: None,
    max_parallel: 10,
};

let sink = ErrorSink::new();
let entries = expander::spawn_listing(store, uris, options, sink.clone());
while let Ok(entry) = entries.recv().await {
    println!("{}", entry.full_key());
}
sink.wait_idle().await;
sink.into_result()
# }
```
*/

pub mod config;
pub mod expander;
pub mod format;
pub mod lister;
pub mod storage;
pub mod types;
pub mod uri;
pub mod workers;

pub use config::Config;
pub use config::args::{CLIArgs, build_config_from_args, parse_from_args};
pub use types::ListEntry;
pub use types::error::{FastS3Error, exit_code_from_error};
pub use uri::S3Uri;
pub use workers::ErrorSink;
