use crate::{Error, Result};
use std::net::Ipv4Addr;

const RESERVED_PREFIXES: &[&str] = &["xn--", "sthree-", "amzn-s3-demo-"];
const RESERVED_SUFFIXES: &[&str] = &["-s3alias", "--ol-s3", ".mrap", "--x-s3", "--table-s3"];

/// Check `name` against the S3 bucket naming rules.
///
/// Runs before any request is made; every violation is a configuration error.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let len = name.len();
    if !(3..=255).contains(&len) {
        return Err(invalid(format!(
            "bucket name must be between 3 and 255 characters; got {len}"
        )));
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(invalid(
            "bucket name can contain only lowercase letters, numbers, periods, and hyphens",
        ));
    }

    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let bytes = name.as_bytes();
    if !alnum(bytes[0]) || !alnum(bytes[len - 1]) {
        return Err(invalid("bucket name must begin and end with a letter or number"));
    }

    if name.contains("..") {
        return Err(invalid("bucket name must not contain consecutive periods"));
    }

    if name.matches('.').count() == 3 && name.parse::<Ipv4Addr>().is_ok() {
        return Err(invalid("bucket name must not be formatted as an IP address"));
    }

    if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| name.starts_with(**p)) {
        return Err(invalid(format!(
            "bucket name must not start with the reserved prefix \"{prefix}\""
        )));
    }

    if let Some(suffix) = RESERVED_SUFFIXES.iter().find(|s| name.ends_with(**s)) {
        return Err(invalid(format!(
            "bucket name must not end with the reserved suffix \"{suffix}\""
        )));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::configuration(message)
}
