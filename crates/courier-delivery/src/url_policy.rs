//! Destination URL validation.
//!
//! Accepts only absolute `http`/`https` URLs with a non-empty host.
//! Loopback and private destinations are rejected unless explicitly
//! allowed, and an optional allow-list regular expression constrains the
//! full URL.

use regex::Regex;
use thiserror::Error;
use url::Url;

/// Why a destination URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlViolation {
    /// The string is not an absolute URL.
    #[error("not an absolute URL: {0}")]
    NotAbsolute(String),

    /// Scheme other than http/https.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Host component missing or empty.
    #[error("URL has no host")]
    EmptyHost,

    /// Loopback or private destination while those are disallowed.
    #[error("private destination not allowed: {0}")]
    PrivateDestination(String),

    /// URL did not match the configured allow-list.
    #[error("URL not covered by the allow-list")]
    AllowlistMismatch,
}

/// Validation policy for destination URLs.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    allow_private: bool,
    allowlist: Option<Regex>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self { allow_private: false, allowlist: None }
    }
}

impl UrlPolicy {
    /// Builds a policy; `allowlist` is a regular expression matched against
    /// the full URL when present.
    pub fn new(allow_private: bool, allowlist: Option<&str>) -> Result<Self, regex::Error> {
        let allowlist = allowlist.map(Regex::new).transpose()?;
        Ok(Self { allow_private, allowlist })
    }

    /// Validates a raw URL string against the policy.
    pub fn validate(&self, raw: &str) -> Result<Url, UrlViolation> {
        let url = Url::parse(raw).map_err(|_| UrlViolation::NotAbsolute(raw.to_string()))?;

        match url.scheme() {
            "http" | "https" => {},
            other => return Err(UrlViolation::UnsupportedScheme(other.to_string())),
        }

        let host = url.host().ok_or(UrlViolation::EmptyHost)?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(UrlViolation::EmptyHost);
        }

        if !self.allow_private && is_private_host(&host) {
            return Err(UrlViolation::PrivateDestination(host.to_string()));
        }

        if let Some(allowlist) = &self.allowlist {
            if !allowlist.is_match(url.as_str()) {
                return Err(UrlViolation::AllowlistMismatch);
            }
        }

        Ok(url)
    }

    /// Breaker key for a validated URL: scheme plus authority.
    pub fn host_key(url: &Url) -> String {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        }
    }
}

fn is_private_host(host: &url::Host<&str>) -> bool {
    match host {
        url::Host::Ipv4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        },
        url::Host::Ipv6(v6) => v6.is_loopback() || v6.is_unspecified(),
        url::Host::Domain(domain) => {
            let lowered = domain.to_ascii_lowercase();
            lowered == "localhost" || lowered.ends_with(".localhost")
        },
    }
}
