use std::io::Write;

use anyhow::Result;
use clap::Parser;
use tracing::trace;

use fasts3::config::{CommandConfig, Config, resolve_max_parallel};
use fasts3::lister::ListOptions;
use fasts3::workers::copier::{self, CpOptions};
use fasts3::workers::deleter;
use fasts3::workers::downloader::{self, GetOptions};
use fasts3::workers::streamer::{self, StreamOptions};
use fasts3::workers::ErrorSink;
use fasts3::{CLIArgs, exit_code_from_error, expander, format, storage};

mod tracing_init;

/// fasts3 - A faster S3 utility.
///
/// This binary is a thin wrapper over the fasts3 library: parse
/// arguments, initialize tracing, run one pipeline, print its results.
#[tokio::main]
async fn main() {
    let config = load_config_exit_if_err();

    start_tracing_if_necessary(&config);
    trace!("config = {:?}", config);

    if let Err(e) = run(config).await {
        eprintln!("Encountered an error: {e:#}");
        std::process::exit(exit_code_from_error(&e));
    }
}

fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Encountered an error: {message}");
            std::process::exit(1);
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    match config.tracing_config {
        Some(ref tracing_config) => {
            tracing_init::init_tracing(tracing_config);
            true
        }
        None => false,
    }
}

fn list_options(config: &Config, recursive: bool) -> ListOptions {
    ListOptions {
        delimiter: config.delimiter.clone(),
        recursive,
        search_depth: config.search_depth,
        key_regex: config.key_regex.clone(),
        max_parallel: resolve_max_parallel(config.max_parallel),
    }
}

async fn run(config: Config) -> Result<()> {
    let max_parallel = resolve_max_parallel(config.max_parallel);
    let storage = storage::create_storage(&config.client).await;
    let sink = ErrorSink::new();

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());

    match config.command.clone() {
        CommandConfig::Ls {
            uris,
            recursive,
            with_date,
            human_readable,
        } => {
            let entries =
                expander::spawn_listing(storage, uris, list_options(&config, recursive), sink.clone());
            while let Ok(entry) = entries.recv().await {
                writeln!(out, "{}", format::format_entry(&entry, human_readable, with_date))?;
            }
        }

        CommandConfig::Stream {
            uris,
            include_key_name,
            ordered,
            raw,
        } => {
            let listing_storage = dyn_clone::clone_box(&*storage);
            let entries = expander::spawn_listing(
                listing_storage,
                uris,
                list_options(&config, true),
                sink.clone(),
            );
            let fragments = streamer::spawn(
                storage,
                entries,
                StreamOptions {
                    include_key_name,
                    ordered,
                    raw,
                    max_parallel,
                },
                sink.clone(),
            );
            while let Ok(fragment) = fragments.recv().await {
                out.write_all(&fragment)?;
            }
        }

        CommandConfig::Get {
            uris,
            recursive,
            skip_existing,
        } => {
            let listing_storage = dyn_clone::clone_box(&*storage);
            let entries = expander::spawn_listing(
                listing_storage,
                uris,
                list_options(&config, recursive),
                sink.clone(),
            );
            let downloads = downloader::spawn(
                storage,
                entries,
                GetOptions {
                    skip_existing,
                    max_parallel,
                },
                sink.clone(),
            );
            while let Ok(entry) = downloads.recv().await {
                writeln!(out, "Downloaded {} -> {}", entry.full_key(), entry.key)?;
            }
        }

        CommandConfig::Cp {
            source,
            dest,
            recursive,
            flat,
        } => {
            let listing_storage = dyn_clone::clone_box(&*storage);
            let entries = expander::spawn_listing(
                listing_storage,
                vec![source.clone()],
                list_options(&config, recursive),
                sink.clone(),
            );
            let copies = copier::spawn(
                storage,
                entries,
                CpOptions {
                    source,
                    dest,
                    delimiter: config.delimiter.clone(),
                    recursive,
                    flat,
                    max_parallel,
                },
                sink.clone(),
            );
            while let Ok(outcome) = copies.recv().await {
                writeln!(out, "Copied {} -> {}", outcome.source, outcome.dest.full_key())?;
            }
        }

        CommandConfig::Rm { uris, recursive } => {
            let listing_storage = dyn_clone::clone_box(&*storage);
            let entries = expander::spawn_listing(
                listing_storage,
                uris,
                list_options(&config, recursive),
                sink.clone(),
            );
            let deleted = deleter::spawn(storage, entries, max_parallel, sink.clone());
            while let Ok(entry) = deleted.recv().await {
                writeln!(out, "Deleted {}", entry.full_key())?;
            }
        }
    }

    out.flush()?;
    sink.wait_idle().await;
    sink.into_result()
}
