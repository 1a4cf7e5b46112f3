//! The request shape the rate limiter consumes.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, Uri};

/// An incoming HTTP request, reduced to what rate limiting needs.
///
/// Header lookup is case-insensitive through [`HeaderMap`].
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// HTTP method
    pub method: Method,
    /// Full request URI; only the path takes part in policy matching
    pub uri: Uri,
    /// Request headers
    pub headers: HeaderMap,
    /// Address of the immediate peer, when the transport exposes it
    pub peer_addr: Option<IpAddr>,
}

impl IncomingRequest {
    /// Create a request without peer information.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            peer_addr: None,
        }
    }

    /// Attach the immediate peer address.
    pub fn with_peer_addr(mut self, peer_addr: IpAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    /// Capture the parts of an HTTP request relevant to rate limiting.
    ///
    /// The peer address is read from axum's `ConnectInfo` extension if the
    /// server was started with connect info.
    pub fn from_http<B>(request: &Request<B>) -> Self {
        let peer_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            peer_addr,
        }
    }

    /// Request path, without query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Method name as used in policy tables and store keys (`GET`, `POST`, ...).
    pub fn method_str(&self) -> &str {
        self.method.as_str()
    }

    /// Header value as a string, if present and valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
