//! Turnstile - Request Rate Limiting Service
//!
//! This crate identifies clients, resolves a per-endpoint rate limit policy,
//! and counts requests in fixed windows held by an in-memory store. Denied
//! requests are answered with a 429 carrying retry metadata. The limiter can
//! be embedded as axum middleware or run as a standalone service.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod request;
