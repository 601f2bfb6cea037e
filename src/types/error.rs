use anyhow::Error;
use thiserror::Error;

/// Application-level error types for fasts3.
///
/// Most failures travel through the pipelines as plain `anyhow::Error`
/// with context attached at the failing call. The variants below exist
/// for errors the binary needs to classify, mainly to pick an exit code
/// or a user-facing message.
#[derive(Error, Debug, PartialEq)]
pub enum FastS3Error {
    /// Invalid S3 URI format.
    #[error("{0} not a valid S3 uri, Please enter a valid S3 uri. Ex: s3://mary/had/a/little/lamb")]
    InvalidUri(String),

    /// Invalid regex pattern supplied via --key-regex.
    #[error("invalid key regex: {0}")]
    InvalidRegex(String),

    /// Wrong number / shape of positional arguments.
    #[error("{0}")]
    InvalidUsage(String),
}

impl FastS3Error {
    /// Process exit code for this error.
    ///
    /// Everything is a plain failure (1); argument-shape problems found
    /// after clap parsing (e.g. cp's two-URI rule) also exit 1, matching
    /// the CLI contract.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<FastS3Error>() {
        return err.exit_code();
    }
    1
}
