use anyhow::Result;

use crate::types::error::FastS3Error;

/// A parsed `s3://` URI.
///
/// Splitting the text on `/` puts the bucket at index 2 and the re-joined
/// remainder in `prefix` (possibly empty). A URI with nothing after the
/// bucket fragment and no trailing slash (`s3://` or `s3://buc`) is a
/// *bucket-prefix query*: it addresses the set of buckets whose names
/// start with the fragment, not a location inside one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct S3Uri {
    pub bucket: String,
    pub prefix: String,
    bucket_query: bool,
}

impl S3Uri {
    pub fn parse(uri: &str) -> Result<Self> {
        let Some(rest) = uri.strip_prefix("s3://") else {
            return Err(FastS3Error::InvalidUri(uri.to_string()).into());
        };

        match rest.split_once('/') {
            Some((bucket, prefix)) => Ok(Self {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                bucket_query: false,
            }),
            None => Ok(Self {
                bucket: rest.to_string(),
                prefix: String::new(),
                bucket_query: true,
            }),
        }
    }

    /// True for `s3://` / `s3://buc` forms that enumerate buckets by name
    /// prefix instead of listing inside one bucket.
    pub fn is_bucket_prefix_query(&self) -> bool {
        self.bucket_query
    }

    /// Canonical text of this URI. Round-trips `parse` exactly: an empty
    /// prefix is preserved and no trailing slash is invented.
    pub fn format(&self) -> String {
        if self.bucket_query {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }
}

impl std::fmt::Display for S3Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    // For every valid URI, format(parse(U)) == U: the empty prefix is
    // preserved and no trailing slash is added.
    proptest! {
        #[test]
        fn uri_round_trip(
            bucket in "[a-z0-9.-]{1,40}",
            prefix in "[a-zA-Z0-9/._-]{0,60}",
            with_slash in proptest::bool::ANY,
        ) {
            let text = if with_slash {
                format!("s3://{bucket}/{prefix}")
            } else {
                format!("s3://{bucket}")
            };
            let uri = S3Uri::parse(&text).unwrap();
            prop_assert_eq!(uri.format(), text);
        }
    }
}
