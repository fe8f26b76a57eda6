//! Relay core: origin gate, request building and response rewriting.

pub mod cookie;
pub mod headers;
pub mod origin;
pub mod query;
pub mod request;
pub mod target;
