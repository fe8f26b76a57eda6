use crate::relay::origin::AllowList;
use crate::upstream::DEFAULT_TIMEOUT_SECS;
use std::env;

/// Default mount path of the relay endpoint.
pub const DEFAULT_RELAY_PATH: &str = "/cors";

/// Default lifetime of the `_last_requested` cookie (one hour).
pub const DEFAULT_LAST_REQUESTED_MAX_AGE_SECS: u64 = 3600;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Path the relay endpoint is mounted on, e.g. `/cors`
    pub relay_path: String,
    /// Externally visible base URL (scheme + authority) used to build
    /// relay-routed URLs. Derived from request headers when unset.
    pub public_base_url: Option<String>,
    /// Origins allowed to use the relay
    pub allow_list: AllowList,
    /// Admit loopback clients that send no `Origin` header
    pub allow_loopback_without_origin: bool,
    /// Upgrade every rewritten playlist reference to https
    pub force_https_segments: bool,
    /// Redirect mistaken relative requests back into the relay
    pub fallback_enabled: bool,
    /// `_last_requested` cookie Max-Age in seconds
    pub last_requested_max_age_secs: u64,
    /// Reject targets addressing loopback/private networks
    pub block_private_targets: bool,
    /// Upstream request timeout in seconds
    pub upstream_timeout_secs: u64,
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env_flag("DEV_MODE", false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let relay_path = env::var("RELAY_PATH").unwrap_or_else(|_| DEFAULT_RELAY_PATH.to_string());
        if !relay_path.starts_with('/') || relay_path.len() < 2 {
            return Err(format!("RELAY_PATH must start with '/' and name a path, got '{}'", relay_path).into());
        }

        let public_base_url = env::var("PUBLIC_BASE_URL")
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        if let Some(base) = &public_base_url {
            url::Url::parse(base).map_err(|e| format!("PUBLIC_BASE_URL '{}' is invalid: {}", base, e))?;
        }

        // Wildcard unless explicitly narrowed
        let allow_list = AllowList::parse(&env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()));

        let last_requested_max_age_secs = env::var("LAST_REQUESTED_MAX_AGE_SECS")
            .unwrap_or_else(|_| DEFAULT_LAST_REQUESTED_MAX_AGE_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_LAST_REQUESTED_MAX_AGE_SECS);

        let upstream_timeout_secs = env::var("UPSTREAM_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_TIMEOUT_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Config {
            port,
            is_dev,
            relay_path,
            public_base_url,
            allow_list,
            allow_loopback_without_origin: env_flag("ALLOW_LOOPBACK_WITHOUT_ORIGIN", is_dev),
            force_https_segments: env_flag("FORCE_HTTPS_SEGMENTS", false),
            fallback_enabled: env_flag("ENABLE_FALLBACK_REDIRECT", false),
            last_requested_max_age_secs,
            block_private_targets: env_flag("BLOCK_PRIVATE_TARGETS", !is_dev),
            upstream_timeout_secs,
        })
    }
}
