//! Store key generation for rate limited requests.

use std::fmt;

/// A key that uniquely identifies the counter for one client on one
/// endpoint and method.
///
/// Rendered as `clientKey:path:method`, where `clientKey` is itself
/// `normalizedIP:uaHash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Client identity from [`ClientIdentifier`](crate::client::ClientIdentifier)
    pub client: String,
    /// Request path
    pub path: String,
    /// HTTP method
    pub method: String,
}

impl RequestKey {
    /// Create a new request key.
    pub fn new(client: impl Into<String>, path: &str, method: &str) -> Self {
        Self {
            client: client.into(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }

    /// The string used as the store key.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}:{}", self.client, self.path, self.method)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_to_string() {
        let key = RequestKey::new("203.0.113.4:2p", "/items/42", "GET");
        assert_eq!(key.to_string_key(), "203.0.113.4:2p:/items/42:GET");
        assert_eq!(key.to_string(), key.to_string_key());
    }

    #[test]
    fn test_request_key_equality() {
        let a = RequestKey::new("c", "/p", "GET");
        let b = RequestKey::new("c", "/p", "GET");
        let c = RequestKey::new("c", "/p", "POST");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
