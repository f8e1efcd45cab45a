#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Network operations for orchard
//!
//! This crate handles artifact transfer: a retrying HTTP client, the
//! `Fetcher` capability the download worker depends on, and SHA-256
//! verification of what was fetched.

mod client;
mod fetcher;
mod verify;

pub use client::{NetClient, NetConfig};
pub use fetcher::{Fetcher, HttpFetcher};
pub use verify::{sha256_file, verify_sha256};

use orchard_errors::{Error, NetworkError};
use reqwest::Url;

/// # Errors
///
/// Returns `NetworkError::InvalidUrl` if `url` does not parse.
pub fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert!(parse_url("https://cdn.example/com.example.foo/5/base.apk").is_ok());
        assert!(matches!(
            parse_url("base.apk"),
            Err(Error::Network(NetworkError::InvalidUrl(_)))
        ));
    }
}
