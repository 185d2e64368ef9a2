//! Destination identity used as the connection pool key.

use std::fmt;
use std::str::FromStr;

use crate::error::UriError;

/// A destination: scheme, host and port.
///
/// Two sites with equal fields are interchangeable, so `Site` is used
/// directly as the key of the connection pool. Sites are cheap values which
/// upper layers create per request.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Site {
    scheme: String,
    host: String,
    port: u16,
}

impl Site {
    /// Create a site from its parts.
    ///
    /// IPv6 hosts may be given with or without brackets.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// Build a site from the scheme, host and port of `uri`.
    ///
    /// The port defaults to 80 for `http` and 443 for `https`.
    pub fn from_uri(uri: &http::Uri) -> Result<Self, UriError> {
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| UriError::MissingScheme(uri.clone()))?;
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| UriError::MissingHost(uri.clone()))?;

        let scheme = scheme.to_ascii_lowercase();
        let default =
            default_port(&scheme).ok_or_else(|| UriError::UnsupportedScheme(scheme.clone()))?;
        let port = uri.port_u16().unwrap_or(default);

        Ok(Self::new(scheme, host, port))
    }

    /// A new site for the destination of `uri`, leaving `self` untouched.
    ///
    /// Used when a redirect points at a different destination.
    pub fn move_to(&self, uri: &http::Uri) -> Result<Self, UriError> {
        Self::from_uri(uri)
    }

    /// The scheme, lowercased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The host, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether connections to this site use TLS.
    pub fn use_ssl(&self) -> bool {
        self.scheme == "https"
    }

    /// `host:port`, with brackets around IPv6 hosts.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Render as `<scheme>://<host>:<port>`.
    pub fn addr(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }

    pub(crate) fn has_default_port(&self) -> bool {
        default_port(&self.scheme) == Some(self.port)
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

impl TryFrom<&http::Uri> for Site {
    type Error = UriError;

    fn try_from(value: &http::Uri) -> Result<Self, Self::Error> {
        Self::from_uri(value)
    }
}

impl FromStr for Site {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri = http::Uri::from_str(s)?;
        Self::from_uri(&uri)
    }
}
