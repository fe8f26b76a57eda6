//! Line-oriented HLS playlist rewriting.
//!
//! Every URI line of a master or media playlist is resolved against the
//! playlist's own URL and replaced by a relay-routed absolute URL. Tag and
//! blank lines are copied byte for byte, so the output has exactly as many
//! lines as the input and keeps every line terminator.

use crate::error::{RelayError, Result};
use crate::relay::target::{RelayBase, TargetDescriptor};
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use tracing::{debug, warn};
use url::Url;

/// MIME types upstreams use for HLS playlists.
const PLAYLIST_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];

/// Whether an upstream response should go through the playlist rewriter.
///
/// A caller hint, a `.m3u8` target path, or an HLS content type all qualify;
/// a 404 never does.
pub fn should_rewrite(
    hinted: bool,
    target: &TargetDescriptor,
    status: StatusCode,
    upstream_headers: &HeaderMap,
) -> bool {
    if status == StatusCode::NOT_FOUND {
        return false;
    }

    let playlist_content_type = upstream_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            PLAYLIST_CONTENT_TYPES
                .iter()
                .any(|known| mime.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false);

    hinted || target.is_playlist_path() || playlist_content_type
}

/// Rewrites playlist references into relay-routed URLs.
pub struct PlaylistRewriter<'a> {
    target: &'a TargetDescriptor,
    relay: &'a RelayBase,
    force_https: bool,
    leftover: Vec<(String, String)>,
}

impl<'a> PlaylistRewriter<'a> {
    pub fn new(target: &'a TargetDescriptor, relay: &'a RelayBase, force_https: bool) -> Self {
        Self {
            target,
            relay,
            force_https,
            leftover: target.leftover_params(),
        }
    }

    /// Rewrite a raw upstream body.
    ///
    /// Bodies that are not UTF-8 cannot be playlists and are returned as-is.
    pub fn rewrite_bytes(&self, body: Bytes) -> Result<Bytes> {
        match std::str::from_utf8(&body) {
            Ok(text) => Ok(Bytes::from(self.rewrite(text)?)),
            Err(e) => {
                warn!(
                    "Body of {} is not UTF-8 ({}); passing through unmodified",
                    self.target.url(),
                    e
                );
                Ok(body)
            }
        }
    }

    /// Rewrite playlist text line by line.
    ///
    /// # Errors
    /// [`RelayError::PlaylistRewrite`] if a URI line cannot be resolved to an
    /// absolute `http(s)` URL.
    pub fn rewrite(&self, playlist: &str) -> Result<String> {
        let mut output = String::with_capacity(playlist.len() * 2);
        let mut rewritten = 0usize;

        for raw_line in playlist.split_inclusive('\n') {
            let (line, terminator) = split_terminator(raw_line);
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                output.push_str(raw_line);
                continue;
            }

            output.push_str(&self.rewrite_reference(trimmed)?);
            output.push_str(terminator);
            rewritten += 1;
        }

        debug!(
            "Rewrote {} playlist references for {}",
            rewritten,
            self.target.url()
        );
        Ok(output)
    }

    /// Resolve one URI line, applying the secure-transport policy.
    pub fn resolve(&self, reference: &str) -> Result<Url> {
        let mut resolved = self.target.resolve(reference).ok_or_else(|| {
            RelayError::PlaylistRewrite(format!("cannot resolve reference '{}'", reference))
        })?;

        if self.force_https && resolved.scheme() == "http" {
            resolved.set_scheme("https").map_err(|_| {
                RelayError::PlaylistRewrite(format!("cannot upgrade '{}' to https", resolved))
            })?;
        }

        Ok(resolved)
    }

    fn rewrite_reference(&self, reference: &str) -> Result<String> {
        let resolved = self.resolve(reference)?;

        // Caller extras such as auth tokens follow each sub-request, unless
        // the reference already carries them
        let existing: Vec<String> = resolved.query_pairs().map(|(k, _)| k.into_owned()).collect();
        let extras: Vec<(String, String)> = self
            .leftover
            .iter()
            .filter(|(key, _)| !existing.contains(key))
            .cloned()
            .collect();

        Ok(self.relay.route(&resolved, &extras))
    }
}

/// Split a line produced by `split_inclusive('\n')` into content and its
/// terminator (`"\r\n"`, `"\n"` or `""`).
fn split_terminator(raw_line: &str) -> (&str, &str) {
    if let Some(line) = raw_line.strip_suffix("\r\n") {
        (line, &raw_line[line.len()..])
    } else if let Some(line) = raw_line.strip_suffix('\n') {
        (line, &raw_line[line.len()..])
    } else {
        (raw_line, "")
    }
}
