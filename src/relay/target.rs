//! URL value types for the relay: the resolved upstream target and the
//! relay's own externally visible endpoint.

use super::query::is_reserved;
use crate::error::{RelayError, Result};
use axum::http::{HeaderMap, header};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use url::{Url, form_urlencoded};

/// File-extension marker identifying HLS playlists in a target path.
pub const PLAYLIST_EXTENSION: &str = ".m3u8";

/// Characters that would end, split or be decoded differently inside a
/// form-encoded query value.
pub const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b';')
    .add(b'=');

/// Escape `value` for use after `url=` in a relay query string.
pub fn escape_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Case-insensitive check for an absolute `http://` or `https://` reference.
pub fn has_http_scheme(reference: &str) -> bool {
    let lower = |n: usize| reference.get(..n).map(|p| p.to_ascii_lowercase());
    lower(7).as_deref() == Some("http://") || lower(8).as_deref() == Some("https://")
}

/// The upstream resource a relay request points at.
///
/// Holds the target URL after the caller's passthrough parameters have been
/// merged into its query string.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetDescriptor {
    url: Url,
}

impl TargetDescriptor {
    /// Parse the caller's `url` value and append passthrough query pairs.
    ///
    /// # Errors
    /// [`RelayError::InvalidTarget`] for unparseable URLs, non-HTTP(S)
    /// schemes, or URLs without a host.
    pub fn parse(raw: &str, passthrough: &[(String, String)]) -> Result<Self> {
        let mut url =
            Url::parse(raw).map_err(|e| RelayError::InvalidTarget(format!("{}: {}", raw, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::InvalidTarget(format!(
                "scheme '{}' not supported, only http/https",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(RelayError::InvalidTarget(format!("no host in {}", raw)));
        }

        if !passthrough.is_empty() {
            url.query_pairs_mut().extend_pairs(passthrough);
        }

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host with an explicit port when the URL carries one.
    pub fn host_with_port(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// `scheme://host[:port]`
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme(), self.host_with_port())
    }

    /// Path with the final segment removed, keeping the trailing `/`.
    pub fn directory(&self) -> &str {
        let path = self.url.path();
        match path.rfind('/') {
            Some(idx) => &path[..=idx],
            None => "/",
        }
    }

    /// Target query pairs whose names do not collide with relay parameters.
    pub fn leftover_params(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .filter(|(key, _)| !is_reserved(key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    pub fn is_playlist_path(&self) -> bool {
        self.url.path().contains(PLAYLIST_EXTENSION)
    }

    /// Resolve a reference found in a playlist body or a redirect.
    ///
    /// Absolute `http(s)` references are taken literally, root-relative ones
    /// resolve against the target host and everything else against
    /// [`Self::directory`]. Returns `None` unless the result is an absolute
    /// `http(s)` URL with a host.
    pub fn resolve(&self, reference: &str) -> Option<Url> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }

        let resolved = if has_http_scheme(reference) {
            Url::parse(reference)
        } else if reference.starts_with('/') {
            self.url.join(reference)
        } else {
            // "./" keeps a colon in the first segment from reading as a scheme
            self.url.join(&format!("./{}", reference))
        };
        let resolved = resolved.ok()?;

        let is_http = matches!(resolved.scheme(), "http" | "https");
        (is_http && resolved.host_str().is_some()).then_some(resolved)
    }
}

/// The relay endpoint as seen by clients, e.g. `https://relay.example/cors`.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayBase {
    endpoint: String,
}

impl RelayBase {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Derive the endpoint for one incoming request.
    ///
    /// A configured public base URL wins; otherwise the scheme comes from
    /// `X-Forwarded-Proto` (default `http`) and the authority from `Host`.
    pub fn for_request(public_base_url: Option<&str>, relay_path: &str, headers: &HeaderMap) -> Self {
        if let Some(base) = public_base_url {
            return Self::new(format!("{}{}", base.trim_end_matches('/'), relay_path));
        }

        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("http");
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or("localhost");

        Self::new(format!("{}://{}{}", scheme, host, relay_path))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Literal prefix shared by every relay-routed URL.
    pub fn prefix(&self) -> String {
        format!("{}?url=", self.endpoint)
    }

    /// Relay-routed URL with the target fully percent-encoded, followed by
    /// extra query pairs.
    pub fn route(&self, target: &Url, extras: &[(String, String)]) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("url", target.as_str())
            .extend_pairs(extras)
            .finish();
        format!("{}?{}", self.endpoint, query)
    }

    /// Relay-routed URL that keeps the target readable.
    ///
    /// Only [`QUERY_VALUE`] characters are escaped, so
    /// `https://cdn.example.com/new/path` is appended unchanged while the
    /// target's own query stays inside the `url` value.
    pub fn route_readable(&self, value: &str) -> String {
        format!("{}{}", self.prefix(), escape_query_value(value))
    }
}
