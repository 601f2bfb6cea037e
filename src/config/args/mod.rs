use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use fancy_regex::Regex;
use std::ffi::OsString;

use crate::config::{ClientConfig, CommandConfig, Config, TracingConfig};
use crate::types::error::FastS3Error;
use crate::uri::S3Uri;

// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_PARALLEL: usize = 10;
pub const DEFAULT_DELIMITER: &str = "/";
pub const DEFAULT_SEARCH_DEPTH: usize = 0;

const ERROR_MESSAGE_CP_ARGS: &str = "must include one source and one destination URI";

// ---------------------------------------------------------------------------
// Value parser helpers
// ---------------------------------------------------------------------------

fn check_s3_uri(s: &str) -> Result<String, String> {
    if s.starts_with("s3://") {
        Ok(s.to_string())
    } else {
        Err(format!(
            "{s} not a valid S3 uri, Please enter a valid S3 uri. Ex: s3://mary/had/a/little/lamb"
        ))
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// fasts3 - A faster S3 utility.
///
/// Examples:
///   fasts3 ls -r s3://my-bucket/logs/
///   fasts3 stream --key-regex '.*\.json\.gz$' s3://my-bucket/events/
///   fasts3 cp -r s3://src/logs/2024/ s3://dst/backup/
#[derive(Parser, Clone, Debug)]
#[command(name = "fasts3", version, about = "A faster S3 utility", long_about = None)]
pub struct CLIArgs {
    /// Maximum number of calls to make to S3 simultaneously [default: max(10, 4 x CPUs)]
    #[arg(short = 'p', long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_parallel: Option<u64>,

    /// Delimiter to use while listing
    #[arg(long, global = true, default_value = DEFAULT_DELIMITER)]
    pub delimiter: String,

    /// Dictates how many prefix groups to walk down before parallelizing list calls
    #[arg(long, global = true, default_value_t = DEFAULT_SEARCH_DEPTH)]
    pub search_depth: usize,

    /// Regex filter for keys
    #[arg(long, global = true, default_value = "")]
    pub key_regex: String,

    /// Endpoint to make S3 requests against (e.g. a MinIO or Wasabi URL)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Enables path-style addressing (needed by some S3-compatible services)
    #[arg(long, global = true)]
    pub path_style_addressing: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: CLICommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CLICommand {
    /// List S3 prefixes and keys
    Ls {
        /// One or more S3 URIs, ex: s3://mary/had/a/little/lamb/
        #[arg(value_parser = check_s3_uri, required = true)]
        s3_uris: Vec<String>,

        /// Get all keys for this prefix
        #[arg(short = 'r', long)]
        recursive: bool,

        /// Include the last modified date
        #[arg(short = 'd', long)]
        with_date: bool,

        /// Output human-readable object sizes
        #[arg(short = 'H', long)]
        human_readable: bool,
    },

    /// Stream the S3 objects' contents to stdout
    Stream {
        #[arg(value_parser = check_s3_uri, required = true)]
        s3_uris: Vec<String>,

        /// Include the key name in streamed output
        #[arg(short = 'i', long)]
        include_key_name: bool,

        /// Read the keys in-order, not mixing output from different keys
        /// (this will reduce the parallelism to 1)
        #[arg(short = 'o', long)]
        ordered: bool,

        /// Raw object stream (do not uncompress or delimit the stream)
        #[arg(short = 'r', long)]
        raw: bool,
    },

    /// Download files from S3
    Get {
        #[arg(value_parser = check_s3_uri, required = true)]
        s3_uris: Vec<String>,

        /// Get all keys for this prefix
        #[arg(short = 'r', long)]
        recursive: bool,

        /// Skips downloading keys which already exist on the local file system
        #[arg(short = 'x', long)]
        skip_existing: bool,
    },

    /// Copy files within S3
    Cp {
        /// Exactly one source and one destination URI
        #[arg(value_parser = check_s3_uri, required = true)]
        s3_uris: Vec<String>,

        /// Copy all keys for this prefix
        #[arg(short = 'r', long)]
        recursive: bool,

        /// Copy all source files into a flat destination folder
        /// (vs. corresponding subfolders)
        #[arg(short = 'f', long)]
        flat: bool,
    },

    /// Delete files within S3
    Rm {
        #[arg(value_parser = check_s3_uri, required = true)]
        s3_uris: Vec<String>,

        /// Delete all keys for this prefix
        #[arg(short = 'r', long)]
        recursive: bool,
    },
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Config conversion
// ---------------------------------------------------------------------------

fn parse_uris(raw: &[String]) -> Result<Vec<S3Uri>, String> {
    raw.iter()
        .map(|s| S3Uri::parse(s).map_err(|e| e.to_string()))
        .collect()
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        let key_regex = if args.key_regex.is_empty() {
            None
        } else {
            Some(
                Regex::new(&args.key_regex)
                    .map_err(|e| FastS3Error::InvalidRegex(e.to_string()).to_string())?,
            )
        };

        let command = match &args.command {
            CLICommand::Ls {
                s3_uris,
                recursive,
                with_date,
                human_readable,
            } => CommandConfig::Ls {
                uris: parse_uris(s3_uris)?,
                recursive: *recursive,
                with_date: *with_date,
                human_readable: *human_readable,
            },
            CLICommand::Stream {
                s3_uris,
                include_key_name,
                ordered,
                raw,
            } => CommandConfig::Stream {
                uris: parse_uris(s3_uris)?,
                include_key_name: *include_key_name,
                ordered: *ordered,
                raw: *raw,
            },
            CLICommand::Get {
                s3_uris,
                recursive,
                skip_existing,
            } => CommandConfig::Get {
                uris: parse_uris(s3_uris)?,
                recursive: *recursive,
                skip_existing: *skip_existing,
            },
            CLICommand::Cp {
                s3_uris,
                recursive,
                flat,
            } => {
                if s3_uris.len() != 2 {
                    return Err(
                        FastS3Error::InvalidUsage(ERROR_MESSAGE_CP_ARGS.to_string()).to_string()
                    );
                }
                let mut uris = parse_uris(s3_uris)?;
                let dest = uris.pop().unwrap();
                let source = uris.pop().unwrap();
                CommandConfig::Cp {
                    source,
                    dest,
                    recursive: *recursive,
                    flat: *flat,
                }
            }
            CLICommand::Rm { s3_uris, recursive } => CommandConfig::Rm {
                uris: parse_uris(s3_uris)?,
                recursive: *recursive,
            },
        };

        let tracing_config = args
            .verbosity
            .log_level()
            .map(|tracing_level| TracingConfig { tracing_level });

        Ok(Config {
            client: ClientConfig {
                endpoint_url: args.endpoint.clone(),
                force_path_style: args.path_style_addressing,
            },
            tracing_config,
            max_parallel: args.max_parallel.map(|n| n as usize),
            delimiter: args.delimiter,
            search_depth: args.search_depth,
            key_regex,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ls_defaults() {
        let config = build_config_from_args(vec!["fasts3", "ls", "s3://demo/a/"]).unwrap();
        assert_eq!(config.delimiter, "/");
        assert_eq!(config.search_depth, 0);
        assert!(config.key_regex.is_none());
        assert!(config.max_parallel.is_none());
        match config.command {
            CommandConfig::Ls {
                uris,
                recursive,
                with_date,
                human_readable,
            } => {
                assert_eq!(uris.len(), 1);
                assert_eq!(uris[0].bucket, "demo");
                assert_eq!(uris[0].prefix, "a/");
                assert!(!recursive);
                assert!(!with_date);
                assert!(!human_readable);
            }
            other => panic!("expected ls, got {other:?}"),
        }
    }

    #[test]
    fn ls_flags() {
        let config = build_config_from_args(vec![
            "fasts3",
            "ls",
            "-r",
            "-d",
            "-H",
            "--search-depth",
            "2",
            "--key-regex",
            r"\.log$",
            "-p",
            "32",
            "s3://demo/",
        ])
        .unwrap();
        assert_eq!(config.search_depth, 2);
        assert!(config.key_regex.is_some());
        assert_eq!(config.max_parallel, Some(32));
        assert!(matches!(
            config.command,
            CommandConfig::Ls {
                recursive: true,
                with_date: true,
                human_readable: true,
                ..
            }
        ));
    }

    #[test]
    fn stream_flags() {
        let config = build_config_from_args(vec![
            "fasts3",
            "stream",
            "-i",
            "-o",
            "s3://demo/file1",
            "s3://demo/file2",
        ])
        .unwrap();
        match config.command {
            CommandConfig::Stream {
                uris,
                include_key_name,
                ordered,
                raw,
            } => {
                assert_eq!(uris.len(), 2);
                assert!(include_key_name);
                assert!(ordered);
                assert!(!raw);
            }
            other => panic!("expected stream, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_s3_uri() {
        let result = build_config_from_args(vec!["fasts3", "ls", "http://demo/a/"]);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("not a valid S3 uri"));
    }

    #[test]
    fn cp_requires_exactly_two_uris() {
        let result = build_config_from_args(vec!["fasts3", "cp", "s3://src/a/"]);
        assert_eq!(
            result.unwrap_err(),
            "must include one source and one destination URI"
        );

        let result =
            build_config_from_args(vec!["fasts3", "cp", "s3://a/", "s3://b/", "s3://c/"]);
        assert!(result.is_err());
    }

    #[test]
    fn cp_source_and_dest_order() {
        let config = build_config_from_args(vec![
            "fasts3",
            "cp",
            "-r",
            "s3://src/logs/2024/",
            "s3://dst/backup/",
        ])
        .unwrap();
        match config.command {
            CommandConfig::Cp {
                source,
                dest,
                recursive,
                flat,
            } => {
                assert_eq!(source.bucket, "src");
                assert_eq!(source.prefix, "logs/2024/");
                assert_eq!(dest.bucket, "dst");
                assert_eq!(dest.prefix, "backup/");
                assert!(recursive);
                assert!(!flat);
            }
            other => panic!("expected cp, got {other:?}"),
        }
    }

    #[test]
    fn invalid_key_regex_is_rejected() {
        let result =
            build_config_from_args(vec!["fasts3", "rm", "--key-regex", "(unclosed", "s3://b/"]);
        assert!(result.unwrap_err().contains("invalid key regex"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let config = build_config_from_args(vec![
            "fasts3",
            "rm",
            "-r",
            "--delimiter",
            "|",
            "s3://demo/a/",
        ])
        .unwrap();
        assert_eq!(config.delimiter, "|");
        assert!(matches!(
            config.command,
            CommandConfig::Rm {
                recursive: true,
                ..
            }
        ));
    }

    #[test]
    fn endpoint_and_path_style() {
        let config = build_config_from_args(vec![
            "fasts3",
            "ls",
            "--endpoint",
            "http://localhost:9000",
            "--path-style-addressing",
            "s3://demo/",
        ])
        .unwrap();
        assert_eq!(
            config.client.endpoint_url.as_deref(),
            Some("http://localhost:9000")
        );
        assert!(config.client.force_path_style);
    }
}
