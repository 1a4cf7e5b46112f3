//! Client identification from proxy headers and request metadata.

mod identifier;
pub mod ip;

pub use identifier::{detect_ip_spoofing, hash_user_agent, ClientIdentifier};
pub use ip::{anonymize_ip, is_private_ip, is_trusted_proxy, normalize_ip, validate_ip};
