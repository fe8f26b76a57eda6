//! Caller origin gate.
//!
//! Compares the browser-reported `Origin` header against the configured
//! allow-list before any upstream work happens.

use crate::error::{RelayError, Result};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Placeholder origin used when a loopback client sends no `Origin` header.
pub const LOOPBACK_PLACEHOLDER_ORIGIN: &str = "http://localhost";

/// Origins permitted to use the relay.
#[derive(Clone, Debug, PartialEq)]
pub enum AllowList {
    /// Wildcard: any caller, with or without an `Origin` header
    Any,
    /// Exact, case-sensitive origin strings
    Only(Vec<String>),
}

impl AllowList {
    /// Parse a comma-separated list. Entries are trimmed and empty entries
    /// dropped; a `*` entry anywhere makes the list a wildcard.
    pub fn parse(raw: &str) -> Self {
        let entries: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();

        if entries.is_empty() || entries.iter().any(|entry| entry == "*") {
            AllowList::Any
        } else {
            AllowList::Only(entries)
        }
    }

    pub fn permits(&self, origin: &str) -> bool {
        match self {
            AllowList::Any => true,
            AllowList::Only(entries) => entries.iter().any(|entry| entry == origin),
        }
    }
}

/// Outcome of a successful origin check.
#[derive(Clone, Debug, PartialEq)]
pub enum AllowedOrigin {
    Any,
    Exact(String),
    /// Local development exception: no `Origin` header from a loopback peer
    LoopbackPlaceholder,
}

impl AllowedOrigin {
    /// Value for `Access-Control-Allow-Origin`.
    pub fn header_value(&self) -> &str {
        match self {
            AllowedOrigin::Any => "*",
            AllowedOrigin::Exact(origin) => origin,
            AllowedOrigin::LoopbackPlaceholder => LOOPBACK_PLACEHOLDER_ORIGIN,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OriginGate {
    allow_list: AllowList,
    allow_loopback_without_origin: bool,
}

impl OriginGate {
    pub fn new(allow_list: AllowList, allow_loopback_without_origin: bool) -> Self {
        Self {
            allow_list,
            allow_loopback_without_origin,
        }
    }

    /// Decide whether a caller may use the relay.
    ///
    /// # Errors
    /// Returns [`RelayError::OriginDenied`] when the list is not a wildcard
    /// and the origin is absent or not listed.
    pub fn check(&self, origin: Option<&str>, peer: Option<SocketAddr>) -> Result<AllowedOrigin> {
        let origin = origin.map(str::trim).filter(|o| !o.is_empty());

        if self.allow_list == AllowList::Any {
            return Ok(AllowedOrigin::Any);
        }

        match origin {
            Some(origin) if self.allow_list.permits(origin) => {
                debug!("Origin {} allowed", origin);
                Ok(AllowedOrigin::Exact(origin.to_string()))
            }
            Some(origin) => Err(RelayError::OriginDenied(Some(origin.to_string()))),
            None => {
                let loopback_peer = peer.map(|addr| addr.ip().is_loopback()).unwrap_or(false);
                if self.allow_loopback_without_origin && loopback_peer {
                    warn!(
                        "No Origin header from loopback peer {:?}; allowing as {}",
                        peer, LOOPBACK_PLACEHOLDER_ORIGIN
                    );
                    Ok(AllowedOrigin::LoopbackPlaceholder)
                } else {
                    Err(RelayError::OriginDenied(None))
                }
            }
        }
    }
}
