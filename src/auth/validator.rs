//! Forward-confirmed reverse DNS (FCrDNS) gate.
//!
//! A claimed host name is bound to an observed address only when both
//! directions agree:
//!
//! 1. forward: `claimed` resolves to a set of addresses containing
//!    `observed`;
//! 2. reverse: `observed` resolves to at least one PTR name that equals
//!    `claimed` exactly, after stripping a single trailing root dot.
//!
//! No case folding, suffix or alias matching is done. A CNAME whose target
//! carries the observed address still fails unless the PTR names the alias
//! itself. Nothing is cached; every call performs fresh lookups.
//!
//! Both lookups share one deadline, so a validation never takes longer
//! than the configured timeout in total.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::resolver::{ResolveError, Resolver};

/// Why an address/name pair was refused.
///
/// The detail is for server-side logs only and is never sent to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// `addr` is not among the forward addresses of `host`.
    #[error("address {addr} is not valid for host {host:?}")]
    AddressMismatch {
        /// Claimed host name
        host: String,
        /// Observed client address
        addr: IpAddr,
    },

    /// No PTR record of `addr` names `host`.
    #[error("reverse lookup of {addr} does not confirm host {host:?}")]
    ReverseMismatch {
        /// Claimed host name
        host: String,
        /// Observed client address
        addr: IpAddr,
    },

    /// A forward or reverse lookup failed or timed out.
    #[error("lookup failed while validating {addr} for host {host:?}: {source}")]
    LookupFailure {
        /// Claimed host name
        host: String,
        /// Observed client address
        addr: IpAddr,
        /// Underlying resolver failure
        #[source]
        source: ResolveError,
    },
}

/// FCrDNS validator over an injected [`Resolver`].
#[derive(Clone)]
pub struct FcrdnsValidator {
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
}

impl FcrdnsValidator {
    /// Create a validator; the lookups of one `validate` call share `timeout`.
    pub fn new(resolver: Arc<dyn Resolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    /// Check that `observed` is a legitimate address of `claimed`.
    pub async fn validate(&self, claimed: &str, observed: IpAddr) -> Result<(), AuthorizationError> {
        let observed = observed.to_canonical();

        // An empty name never resolves to anything usable.
        if claimed.is_empty() {
            return Err(AuthorizationError::AddressMismatch {
                host: String::new(),
                addr: observed,
            });
        }

        tokio::time::timeout(self.timeout, self.confirm(claimed, observed))
            .await
            .unwrap_or_else(|_| {
                Err(AuthorizationError::LookupFailure {
                    host: claimed.to_owned(),
                    addr: observed,
                    source: ResolveError::Timeout(claimed.to_owned()),
                })
            })
    }

    async fn confirm(&self, claimed: &str, observed: IpAddr) -> Result<(), AuthorizationError> {
        let lookup_failure = |source| AuthorizationError::LookupFailure {
            host: claimed.to_owned(),
            addr: observed,
            source,
        };

        let forward = self
            .resolver
            .lookup_ip(claimed)
            .await
            .map_err(lookup_failure)?;

        if !forward.iter().any(|a| a.to_canonical() == observed) {
            debug!(host = claimed, addr = %observed, forward = ?forward, "Observed address not in forward set");
            return Err(AuthorizationError::AddressMismatch {
                host: claimed.to_owned(),
                addr: observed,
            });
        }

        let names = self
            .resolver
            .lookup_addr(observed)
            .await
            .map_err(lookup_failure)?;

        if names.iter().any(|name| reverse_matches(name, claimed)) {
            debug!(host = claimed, addr = %observed, "FCrDNS confirmed");
            return Ok(());
        }

        debug!(host = claimed, addr = %observed, reverse = ?names, "No PTR name confirms host");
        Err(AuthorizationError::ReverseMismatch {
            host: claimed.to_owned(),
            addr: observed,
        })
    }
}

/// Exact comparison after dropping one trailing root dot.
fn reverse_matches(name: &str, claimed: &str) -> bool {
    name.strip_suffix('.').unwrap_or(name) == claimed
}
