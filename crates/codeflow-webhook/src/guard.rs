//! SSRF guard: URL validation, IP classification, DNS resolve-and-pin.
//!
//! Validation runs once per top-level request (and once per redirect hop);
//! the resolved address set is pinned and reused for every connect of the
//! request, defeating DNS rebinding between validation and connect.

use crate::error::{WebhookError, WebhookResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;
use url::Url;

/// Hostnames rejected outright, before any resolution.
const DENIED_HOSTS: &[&str] = &[
    "localhost",
    "0.0.0.0",
    "169.254.169.254",
    "metadata.google.internal",
    "metadata.azure.com",
];

/// Guard configuration. Loopback is only ever allowed for local
/// development; production runs the default strict policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsrfPolicy {
    pub allow_loopback: bool,
}

/// A validated URL with its pinned address set.
#[derive(Debug, Clone)]
pub struct PinnedTarget {
    pub url: Url,
    /// Hostname as written; empty pin set when the host is an IP literal.
    pub host: String,
    pub addrs: Vec<SocketAddr>,
    pub host_is_ip: bool,
}

/// Run the full validation pipeline and pin the resolved addresses.
pub async fn validate_url(
    raw: &str,
    policy: SsrfPolicy,
    deadline: Instant,
) -> WebhookResult<PinnedTarget> {
    let url = Url::parse(raw.trim())
        .map_err(|e| WebhookError::Blocked(format!("unparseable url: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(WebhookError::Blocked(format!(
            "scheme '{}' is not allowed",
            url.scheme()
        )));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(WebhookError::Blocked("embedded credentials are not allowed".into()));
    }

    let host = url
        .host_str()
        .ok_or_else(|| WebhookError::Blocked("url has no host".into()))?
        .trim_end_matches('.')
        .to_ascii_lowercase();

    if DENIED_HOSTS.contains(&host.as_str()) || host.ends_with(".localhost") {
        return Err(WebhookError::Blocked(format!("host '{}' is denied", host)));
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| WebhookError::Blocked("url has no usable port".into()))?;

    // IPv6 literals arrive bracketed from the URL parser.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip_is_forbidden(ip, policy) {
            return Err(WebhookError::Blocked(format!("address {} is not routable", ip)));
        }
        return Ok(PinnedTarget {
            url,
            host,
            addrs: vec![SocketAddr::new(ip, port)],
            host_is_ip: true,
        });
    }

    // Resolve every address, v4 and v6; one bad address rejects the host.
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .ok_or(WebhookError::Timeout)?;
    let resolved = tokio::time::timeout(
        remaining,
        tokio::net::lookup_host((host.as_str(), port)),
    )
    .await
    .map_err(|_| WebhookError::Timeout)?
    .map_err(|e| WebhookError::Transport(format!("dns lookup failed: {}", e)))?;

    let addrs: Vec<SocketAddr> = resolved.collect();
    if addrs.is_empty() {
        return Err(WebhookError::Blocked(format!("host '{}' resolved to no addresses", host)));
    }
    for addr in &addrs {
        if ip_is_forbidden(addr.ip(), policy) {
            return Err(WebhookError::Blocked(format!(
                "host '{}' resolves to non-routable address {}",
                host,
                addr.ip()
            )));
        }
    }

    Ok(PinnedTarget {
        url,
        host,
        addrs,
        host_is_ip: false,
    })
}

/// Classify an address against every private, loopback, link-local, CGNAT,
/// reserved, multicast and broadcast range, IPv4 and IPv6.
pub fn ip_is_forbidden(ip: IpAddr, policy: SsrfPolicy) -> bool {
    match ip {
        IpAddr::V4(v4) => v4_is_forbidden(v4, policy),
        IpAddr::V6(v6) => v6_is_forbidden(v6, policy),
    }
}

fn v4_is_forbidden(ip: Ipv4Addr, policy: SsrfPolicy) -> bool {
    if ip.is_loopback() {
        return !policy.allow_loopback;
    }
    let octets = ip.octets();
    ip.is_unspecified()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || octets[0] == 0
        // CGNAT 100.64.0.0/10
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // IETF protocol assignments 192.0.0.0/24
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // Benchmarking 198.18.0.0/15
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // Reserved 240.0.0.0/4
        || octets[0] >= 240
}

fn v6_is_forbidden(ip: Ipv6Addr, policy: SsrfPolicy) -> bool {
    if ip.is_loopback() {
        return !policy.allow_loopback;
    }
    // Addresses embedding an IPv4 address classify as that address.
    if let Some(v4) = ip.to_ipv4_mapped() {
        return v4_is_forbidden(v4, policy);
    }
    let segments = ip.segments();
    // NAT64 64:ff9b::/96 embeds v4 in the last two segments.
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let v4 = Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        );
        return v4_is_forbidden(v4, policy);
    }
    ip.is_unspecified()
        || ip.is_multicast()
        // Unique local fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // Link local fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
        // Documentation 2001:db8::/32
        || (segments[0] == 0x2001 && segments[1] == 0xdb8)
        // 6to4 relay of an embedded v4: 2002::/16
        || (segments[0] == 0x2002
            && v4_is_forbidden(
                Ipv4Addr::new(
                    (segments[1] >> 8) as u8,
                    segments[1] as u8,
                    (segments[2] >> 8) as u8,
                    segments[2] as u8,
                ),
                policy,
            ))
}
