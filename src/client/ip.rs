//! IP address validation, normalization and classification.
//!
//! These helpers operate on strings because they run against raw proxy
//! header values. Nothing here panics on malformed input: predicates return
//! `false`, and `normalize_ip` returns an error only for input that
//! `validate_ip` rejects.

use std::net::Ipv6Addr;

use crate::error::{Result, TurnstileError};

/// Address used when no usable client IP can be derived.
pub const LOOPBACK_IP: &str = "127.0.0.1";

/// Parsed form of an address accepted by [`validate_ip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsedIp {
    V4([u8; 4]),
    V6(Ipv6Addr),
}

impl ParsedIp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "localhost" => Some(ParsedIp::V4([127, 0, 0, 1])),
            _ if s.contains(':') => s.parse::<Ipv6Addr>().ok().map(ParsedIp::V6),
            _ => parse_ipv4(s).map(ParsedIp::V4),
        }
    }
}

/// Parse a dotted quad. Leading zeros are accepted (`192.168.001.001`),
/// which `Ipv4Addr::from_str` rejects.
fn parse_ipv4(s: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u16 = part.parse().ok()?;
        *octet = u8::try_from(value).ok()?;
    }

    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

/// Returns `true` if `ip` is a dotted-quad IPv4 address, an IPv6 address in
/// full eight-group or `::`-compressed form (a trailing dotted quad is
/// allowed), or the literal `localhost`.
///
/// The `::1` and `::` literals are covered by the compressed form.
pub fn validate_ip(ip: &str) -> bool {
    ParsedIp::parse(ip).is_some()
}

/// Normalize an address into a stable key component.
///
/// IPv4 octets lose their leading zeros. IPv6 is lowercased and its longest
/// zero run compressed. Loopback spellings (`localhost`, `::1`) all collapse
/// to `127.0.0.1`.
pub fn normalize_ip(ip: &str) -> Result<String> {
    match ParsedIp::parse(ip) {
        Some(ParsedIp::V4([a, b, c, d])) => Ok(format!("{}.{}.{}.{}", a, b, c, d)),
        Some(ParsedIp::V6(addr)) if addr.is_loopback() => Ok(LOOPBACK_IP.to_string()),
        Some(ParsedIp::V6(addr)) => Ok(addr.to_string()),
        None => Err(TurnstileError::InvalidIp(ip.to_string())),
    }
}

/// Classify private and loopback ranges: RFC1918 (`10/8`, `172.16/12`,
/// `192.168/16`), `127/8`, `::1`, unique-local `fc00::/7` and link-local
/// `fe80::/10`.
pub fn is_private_ip(ip: &str) -> bool {
    match ParsedIp::parse(ip) {
        Some(ParsedIp::V4(octets)) => is_rfc1918(octets) || octets[0] == 127,
        Some(ParsedIp::V6(addr)) => {
            let first = addr.segments()[0];
            addr.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
        None => false,
    }
}

fn is_rfc1918([a, b, _, _]: [u8; 4]) -> bool {
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

/// Whether a peer address belongs to an RFC1918 range and may therefore be
/// trusted to forward a client address in proxy headers.
pub fn is_trusted_proxy(ip: &str) -> bool {
    matches!(ParsedIp::parse(ip), Some(ParsedIp::V4(octets)) if is_rfc1918(octets))
}

/// Drop the host part of an address for logging: the last IPv4 octet is
/// zeroed, IPv6 keeps its first four groups.
///
/// Returns `None` for input that fails validation.
pub fn anonymize_ip(ip: &str) -> Option<String> {
    match ParsedIp::parse(ip)? {
        ParsedIp::V4([a, b, c, _]) => Some(format!("{}.{}.{}.0", a, b, c)),
        ParsedIp::V6(addr) => {
            let prefix: Vec<String> = addr.segments()[..4]
                .iter()
                .map(|g| format!("{:x}", g))
                .collect();
            Some(format!("{}::", prefix.join(":")))
        }
    }
}
