//! Vhostgate - a domain-based virtual-hosting gateway
//!
//! This library provides the serving side of an account-hosting panel:
//! - Routes HTTP and HTTPS traffic by Host header to tenant bindings
//!   stored in the control panel's database
//! - Serves static files from each tenant's home-directory subtree, with
//!   an index-file fallback chain and a hard containment boundary
//! - Shares one handler across the plaintext and TLS listeners
//! - Optionally caches bindings with a bounded TTL and single-flight
//!   lookups per domain

pub mod assets;
pub mod config;
pub mod emitter;
pub mod error;
pub mod gateway;
pub mod resolver;
pub mod store;
