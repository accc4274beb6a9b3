//! Client identity resolution for rate limiting.
//!
//! # Resolution Order
//!
//! 1. Peer socket address from [`ConnectInfo`], when the server was started
//!    with `into_make_service_with_connect_info`.
//! 2. If that peer is a trusted proxy (see [`TrustedProxyConfig`]), the first
//!    hop of `X-Forwarded-For`, then `X-Real-IP`.
//! 3. Without a peer address (in-process tests, unusual transports), the
//!    forwarding headers are used as-is.
//! 4. [`UNKNOWN_IP`] otherwise.
//!
//! # Security Warning
//!
//! Forwarding headers are client-controlled. They are only honoured from a
//! trusted proxy when a peer address is known. Configure `TRUSTED_PROXIES` to
//! your load balancer's ranges, or every client behind it shares one quota.
//!
//! All requests without an identifiable source share the `"unknown"` key and
//! therefore one quota.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Fallback identity when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Where a forwarded address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardedIp<'a> {
    /// First entry of X-Forwarded-For.
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn forwarded_ip<B>(req: &Request<B>) -> ForwardedIp<'_> {
    // Format: "client, proxy1, proxy2" - the first entry is the client.
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return ForwardedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ForwardedIp::FromRealIp(value.trim());
    }

    ForwardedIp::NotFound
}

/// Resolve the rate-limit identity of a request.
pub fn client_identity<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    match (peer, forwarded_ip(req)) {
        (Some(peer), ForwardedIp::FromXff(ip) | ForwardedIp::FromRealIp(ip))
            if trusted.contains(&peer) =>
        {
            debug!(peer = %peer, client_ip = %ip, "Using forwarded client IP from trusted proxy");
            Cow::Owned(ip.to_string())
        }
        (Some(peer), forwarded) => {
            if forwarded != ForwardedIp::NotFound && trusted.is_enabled() {
                warn!(peer = %peer, "Ignoring forwarding headers from untrusted peer");
            }
            Cow::Owned(peer.to_string())
        }
        (None, ForwardedIp::FromXff(ip) | ForwardedIp::FromRealIp(ip)) => {
            Cow::Owned(ip.to_string())
        }
        (None, ForwardedIp::NotFound) => Cow::Borrowed(UNKNOWN_IP),
    }
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address (implicit /32, /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let mut parts = cidr.trim().splitn(2, '/');
        let ip: IpAddr = parts.next()?.parse().ok()?;
        let max_prefix = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match parts.next() {
            Some(len) => len.parse().ok()?,
            None => max_prefix,
        };
        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Networks whose forwarding headers are believed.
///
/// Empty means no proxy is trusted: with a known peer address, forwarding
/// headers are ignored.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}
