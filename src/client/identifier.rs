//! Client identity derivation from request metadata.

use std::net::IpAddr;

use axum::http::HeaderMap;
use tracing::{trace, warn};

use super::ip::{anonymize_ip, is_trusted_proxy, normalize_ip, validate_ip, LOOPBACK_IP};
use crate::request::IncomingRequest;

/// Proxy headers consulted for the client address, highest priority first.
const CF_CONNECTING_IP: &str = "cf-connecting-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Number of UTF-16 code units of the user agent that feed the key hash.
const USER_AGENT_PREFIX_LEN: usize = 50;

/// Derives a normalized, bounded-cardinality identity for the calling client.
///
/// The identity has the shape `normalizedIP:uaHash`, where `uaHash` is a
/// base-36 rolling hash over the first 50 characters of the user agent.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentifier {
    /// Honour proxy headers only when the immediate peer is a trusted proxy.
    trusted_proxies_only: bool,
}

impl ClientIdentifier {
    /// Create an identifier that always honours proxy headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only honour proxy headers when the peer address is a trusted proxy.
    pub fn with_trusted_proxies_only(mut self, enabled: bool) -> Self {
        self.trusted_proxies_only = enabled;
        self
    }

    /// Derive the normalized client IP.
    ///
    /// Proxy headers are consulted in the order `cf-connecting-ip`, first
    /// entry of `x-forwarded-for`, `x-real-ip`; the first syntactically
    /// valid candidate wins. Without one, the peer address is used, then
    /// `127.0.0.1`. Never fails.
    pub fn client_ip(&self, request: &IncomingRequest) -> String {
        let peer = request.peer_addr.map(peer_ip_string);

        let honour_headers = !self.trusted_proxies_only
            || peer.as_deref().is_some_and(is_trusted_proxy);

        let from_headers = if honour_headers {
            header_candidates(request).find(|candidate| validate_ip(candidate))
        } else {
            None
        };

        from_headers
            .or(peer.as_deref().filter(|p| validate_ip(p)))
            .and_then(|ip| normalize_ip(ip).ok())
            .unwrap_or_else(|| LOOPBACK_IP.to_string())
    }

    /// Build the client key `normalizedIP:uaHash` for a request.
    pub fn client_key(&self, request: &IncomingRequest) -> String {
        let ip = self.client_ip(request);

        if detect_ip_spoofing(&request.headers) {
            warn!(
                client = %anonymize_ip(&ip).unwrap_or_default(),
                "Inconsistent x-forwarded-for / x-real-ip headers"
            );
        }

        let user_agent = request.header("user-agent").unwrap_or_default();
        let key = format!("{}:{}", ip, hash_user_agent(user_agent));
        trace!(key = %key, "Derived client key");
        key
    }
}

fn peer_ip_string(addr: IpAddr) -> String {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

fn header_candidates(request: &IncomingRequest) -> impl Iterator<Item = &str> {
    let cf = request.header(CF_CONNECTING_IP).map(str::trim);
    let forwarded = request
        .header(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let real = request.header(X_REAL_IP).map(str::trim);

    [cf, forwarded, real].into_iter().flatten()
}

/// Flag requests whose `x-real-ip` is missing from their `x-forwarded-for`
/// chain. A consistency heuristic only; both headers must be present.
pub fn detect_ip_spoofing(headers: &HeaderMap) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    match (header(X_FORWARDED_FOR), header(X_REAL_IP)) {
        (Some(forwarded), Some(real)) => {
            let real = real.trim();
            !forwarded.split(',').map(str::trim).any(|hop| hop == real)
        }
        _ => false,
    }
}

/// 32-bit rolling polynomial hash (`h = h * 31 + unit`, wrapping) over the
/// first 50 UTF-16 code units, rendered as the base-36 magnitude.
pub fn hash_user_agent(user_agent: &str) -> String {
    let hash = user_agent
        .encode_utf16()
        .take(USER_AGENT_PREFIX_LEN)
        .fold(0i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(i32::from(unit))
        });

    to_base36(i64::from(hash).unsigned_abs())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
