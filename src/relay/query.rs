//! Typed decoding of the relay's own query parameters.
//!
//! The relay accepts JSON documents embedded in query values (`headers`,
//! `json`, `params`). They are decoded here into named fields so a malformed
//! value becomes a [`RelayError::InvalidParam`] instead of a fault further
//! down the pipeline.

use crate::error::{RelayError, Result};
use serde_json::Value;
use url::form_urlencoded;

/// Query parameter names consumed by the relay itself.
pub const RESERVED_PARAMS: &[&str] = &["url", "type", "method", "headers", "json", "params"];

/// Content-type hint that forces playlist rewriting.
pub const PLAYLIST_HINT: &str = "m3u8";

pub fn is_reserved(name: &str) -> bool {
    RESERVED_PARAMS.contains(&name)
}

/// Decoded relay query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelayQuery {
    pub url: String,
    /// `type` content hint
    pub kind: Option<String>,
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
    pub params: Vec<(String, String)>,
    /// Every non-relay pair from the incoming query, in order
    pub passthrough: Vec<(String, String)>,
}

impl RelayQuery {
    /// Decode the raw query string of an incoming relay request.
    ///
    /// # Errors
    /// [`RelayError::MissingUrl`] when `url` is absent or empty,
    /// [`RelayError::InvalidParam`] when an embedded JSON value is malformed.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let mut url = None;
        let mut kind = None;
        let mut method = None;
        let mut headers = None;
        let mut json = None;
        let mut params = None;
        let mut passthrough = Vec::new();

        for (key, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            // First occurrence wins for relay parameters
            let slot = match key.as_ref() {
                "url" => Some(&mut url),
                "type" => Some(&mut kind),
                "method" => Some(&mut method),
                "headers" => Some(&mut headers),
                "json" => Some(&mut json),
                "params" => Some(&mut params),
                _ => None,
            };
            match slot {
                Some(slot) if slot.is_none() => *slot = Some(value.into_owned()),
                Some(_) => {}
                None => passthrough.push((key.into_owned(), value.into_owned())),
            }
        }

        let url = url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(RelayError::MissingUrl)?;

        // Legacy clients send Python-style dicts with single quotes
        let headers = match headers {
            Some(raw) => json_object("headers", &raw.replace('\'', "\""))?,
            None => Vec::new(),
        };
        let params = match params {
            Some(raw) => json_object("params", &raw)?,
            None => Vec::new(),
        };
        let json = match json {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| RelayError::InvalidParam {
                name: "json",
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            url,
            kind: kind.filter(|k| !k.is_empty()),
            method: method.filter(|m| !m.is_empty()),
            headers,
            json,
            params,
            passthrough,
        })
    }

    /// Whether the caller hinted that the target is a playlist.
    pub fn hints_playlist(&self) -> bool {
        self.kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case(PLAYLIST_HINT))
            .unwrap_or(false)
    }
}

/// Decode a JSON object whose values are scalars into ordered string pairs.
fn json_object(name: &'static str, raw: &str) -> Result<Vec<(String, String)>> {
    let invalid = |reason: String| RelayError::InvalidParam { name, reason };

    let value: Value = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(invalid("expected a JSON object".to_string()));
    };

    map.into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            Value::Number(n) => Ok((key, n.to_string())),
            Value::Bool(b) => Ok((key, b.to_string())),
            Value::Null => Ok((key, String::new())),
            Value::Array(_) | Value::Object(_) => {
                Err(invalid(format!("value for `{}` must be a scalar", key)))
            }
        })
        .collect()
}
