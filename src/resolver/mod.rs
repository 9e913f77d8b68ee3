//! DNS resolution capability.
//!
//! The identity validator never talks to DNS directly; it goes through the
//! [`Resolver`] trait so a deterministic [`ZoneResolver`] can stand in for
//! the system resolver in tests.
//!
//! # Modules
//!
//! - [`system`]: `hickory-resolver` backed resolver using the host's
//!   `resolv.conf`, answer cache disabled
//! - [`zone`]: in-memory zones (A / AAAA / CNAME / PTR / injected errors)

pub mod system;
pub mod zone;

use std::fmt::Write as _;
use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

pub use system::SystemResolver;
pub use zone::{Zone, ZoneResolver};

/// Failure of a single forward or reverse lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The name (or reverse name) has no records.
    #[error("no records found for {0}")]
    NotFound(String),

    /// The lookup did not complete within the configured timeout.
    #[error("lookup of {0} timed out")]
    Timeout(String),

    /// Any other resolver failure.
    #[error("lookup failed: {0}")]
    Failed(String),
}

/// Forward and reverse DNS lookups.
///
/// FCrDNS validation only calls [`lookup_ip`](Self::lookup_ip) and
/// [`lookup_addr`](Self::lookup_addr). [`lookup_host`](Self::lookup_host)
/// is the textual form for other callers and has a default built on
/// `lookup_ip`.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host` to all of its addresses (A and AAAA).
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;

    /// Resolve `addr` to the names of its PTR records, as returned by DNS
    /// (fully qualified names keep their trailing dot).
    async fn lookup_addr(&self, addr: IpAddr) -> Result<Vec<String>, ResolveError>;

    /// Resolve `host` to its addresses in textual form.
    async fn lookup_host(&self, host: &str) -> Result<Vec<String>, ResolveError> {
        Ok(self
            .lookup_ip(host)
            .await?
            .iter()
            .map(ToString::to_string)
            .collect())
    }
}

/// Build the reverse-lookup name for `addr`
/// (`1.0.0.10.in-addr.arpa.`, nibble format under `ip6.arpa.` for IPv6).
pub fn reverse_name(addr: IpAddr) -> String {
    match addr.to_canonical() {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa.")
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                let _ = write!(name, "{:x}.{:x}.", byte & 0x0f, byte >> 4);
            }
            name.push_str("ip6.arpa.");
            name
        }
    }
}
