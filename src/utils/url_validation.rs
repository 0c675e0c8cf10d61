//! Endpoint URL validation
//!
//! Explicit endpoint URLs bypass region routing, so they are checked once when
//! the configuration is built. A valid endpoint URL:
//! - Uses the `wss` scheme (`ws` is accepted only for loopback hosts)
//! - Has a host
//! - Carries no embedded user credentials and no fragment

use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be wss, got: {0}")]
    SecureSchemeRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not embed credentials; use the authentication settings instead")]
    EmbeddedCredentials,

    #[error("URL must not contain a fragment")]
    FragmentNotAllowed,
}

/// Checks if a URL host refers to the local machine
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        None => false,
    }
}

/// Validates an explicit service endpoint URL
///
/// # Example
/// ```rust
/// use usp_client::utils::url_validation::validate_endpoint_url;
///
/// assert!(validate_endpoint_url("wss://westus.stt.speech.microsoft.com/speech").is_ok());
/// assert!(validate_endpoint_url("ws://127.0.0.1:9000/speech").is_ok());
///
/// // Plaintext is only allowed against loopback hosts
/// assert!(validate_endpoint_url("ws://speech.example.com/speech").is_err());
/// assert!(validate_endpoint_url("https://speech.example.com/speech").is_err());
/// ```
pub fn validate_endpoint_url(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;

    if parsed.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    match parsed.scheme() {
        "wss" => {}
        "ws" if is_loopback_host(&parsed) => {}
        other => {
            warn!(url = %url, "Rejected endpoint URL with insecure or unsupported scheme");
            return Err(UrlValidationError::SecureSchemeRequired(other.to_string()));
        }
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }

    if parsed.fragment().is_some() {
        return Err(UrlValidationError::FragmentNotAllowed);
    }

    Ok(parsed)
}
