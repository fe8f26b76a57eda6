use crate::error::{RelayError, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Reject relay targets that address internal networks (SSRF protection).
///
/// Only IP literals are checked. Hostnames are not resolved, so a name that
/// resolves to a private address still passes.
///
/// # Errors
/// Returns [`RelayError::TargetNotAllowed`] for loopback, private,
/// link-local, unspecified or unique-local addresses, including IPv4 addresses
/// embedded in IPv6 (`::ffff:10.0.0.1`).
pub fn validate_target_address(url: &Url) -> Result<()> {
    let blocked = match url.host() {
        Some(Host::Ipv4(ip)) => is_internal(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_internal(IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        None => true,
    };

    if blocked {
        return Err(RelayError::TargetNotAllowed(format!(
            "{} addresses an internal network",
            url.host_str().unwrap_or("<no host>")
        )));
    }
    Ok(())
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_internal_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_internal_v4(v4),
            None => is_internal_v6(v6),
        },
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_unspecified()
        || ip.octets()[0] == 0 // 0.0.0.0/8
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local() // includes cloud metadata 169.254.169.254
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_unspecified()
        || ip.is_loopback()
        || (first & 0xffc0) == 0xfe80 // fe80::/10
        || (first & 0xfe00) == 0xfc00 // fc00::/7
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(raw: &str) -> Result<()> {
        validate_target_address(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_rejects_loopback_and_localhost() {
        assert!(check("http://127.0.0.1/playlist.m3u8").is_err());
        assert!(check("http://127.9.9.9/").is_err());
        assert!(check("http://localhost:8080/").is_err());
        assert!(check("http://[::1]/").is_err());
    }

    #[test]
    fn test_rejects_private_ranges() {
        assert!(check("http://10.1.2.3/").is_err());
        assert!(check("http://172.16.0.1/").is_err());
        assert!(check("http://172.31.255.255/").is_err());
        assert!(check("http://192.168.1.1/").is_err());
        assert!(check("http://0.1.2.3/").is_err());
    }

    #[test]
    fn test_rejects_link_local_metadata() {
        assert!(check("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(check("http://[fe80::1]/").is_err());
    }

    #[test]
    fn test_rejects_unique_local_and_mapped() {
        assert!(check("http://[fd00::1]/").is_err());
        assert!(check("http://[::ffff:10.0.0.1]/").is_err());
    }

    #[test]
    fn test_allows_public_addresses() {
        assert!(check("https://cdn.example.com/live/index.m3u8").is_ok());
        assert!(check("http://203.0.113.7/seg.ts").is_ok());
        assert!(check("http://172.32.0.1/").is_ok());
        assert!(check("http://[2001:db8::1]/").is_ok());
    }
}
