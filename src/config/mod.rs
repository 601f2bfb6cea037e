use fancy_regex::Regex;

use crate::uri::S3Uri;

pub mod args;

/// Main configuration for one fasts3 invocation.
///
/// Built from [`CLIArgs`](args::CLIArgs) via `Config::try_from`. Holds the
/// client settings, the shared listing parameters, and the selected
/// command with its per-command options.
#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub tracing_config: Option<TracingConfig>,
    /// Concurrency budget for each pipeline instance. `None` means the
    /// flag was not given; resolve with [`resolve_max_parallel`].
    pub max_parallel: Option<usize>,
    pub delimiter: String,
    pub search_depth: usize,
    pub key_regex: Option<Regex>,
    pub command: CommandConfig,
}

/// The selected subcommand and its options.
#[derive(Debug, Clone)]
pub enum CommandConfig {
    Ls {
        uris: Vec<S3Uri>,
        recursive: bool,
        with_date: bool,
        human_readable: bool,
    },
    Stream {
        uris: Vec<S3Uri>,
        include_key_name: bool,
        ordered: bool,
        raw: bool,
    },
    Get {
        uris: Vec<S3Uri>,
        recursive: bool,
        skip_existing: bool,
    },
    Cp {
        source: S3Uri,
        dest: S3Uri,
        recursive: bool,
        flat: bool,
    },
    Rm {
        uris: Vec<S3Uri>,
        recursive: bool,
    },
}

/// S3 client configuration.
///
/// Credentials and the region come from the default provider chain
/// (environment variables take precedence, then the shared config /
/// credentials files). Only the endpoint and addressing style are
/// overridable here, for S3-compatible services.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// Tracing (logging) configuration for the binary.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
}

/// Resolve the effective concurrency budget.
///
/// The flag value wins when given; otherwise the budget is
/// `max(10, 4 x CPU count)` so small machines still get useful fan-out.
pub fn resolve_max_parallel(flag: Option<usize>) -> usize {
    flag.unwrap_or_else(|| {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        args::DEFAULT_MAX_PARALLEL.max(4 * cpus)
    })
}
