//! In-memory zone resolver.
//!
//! Answers lookups from a fixed set of zones keyed by fully qualified name,
//! so validation can be exercised without touching the network:
//!
//! ```
//! use certsync::resolver::{Zone, ZoneResolver};
//!
//! let resolver = ZoneResolver::new()
//!     .with_zone("valid.example.com.", Zone::new().a("10.0.0.1"))
//!     .with_zone("1.0.0.10.in-addr.arpa.", Zone::new().ptr("valid.example.com."));
//! # let _ = resolver;
//! ```

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;

use super::{ResolveError, Resolver, reverse_name};

/// CNAME chains longer than this are treated as a loop.
const MAX_CNAME_DEPTH: usize = 8;

/// Records held for one name.
#[derive(Debug, Clone, Default)]
pub struct Zone {
    a: Vec<String>,
    aaaa: Vec<String>,
    cname: Option<String>,
    ptr: Vec<String>,
    err: Option<String>,
}

impl Zone {
    /// Empty zone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an A record.
    #[must_use]
    pub fn a(mut self, addr: &str) -> Self {
        self.a.push(addr.to_owned());
        self
    }

    /// Add an AAAA record.
    #[must_use]
    pub fn aaaa(mut self, addr: &str) -> Self {
        self.aaaa.push(addr.to_owned());
        self
    }

    /// Alias this name to `target`.
    #[must_use]
    pub fn cname(mut self, target: &str) -> Self {
        self.cname = Some(target.to_owned());
        self
    }

    /// Add a PTR record.
    #[must_use]
    pub fn ptr(mut self, name: &str) -> Self {
        self.ptr.push(name.to_owned());
        self
    }

    /// Fail every lookup of this name with `message`.
    #[must_use]
    pub fn err(mut self, message: &str) -> Self {
        self.err = Some(message.to_owned());
        self
    }
}

/// Deterministic resolver over in-memory [`Zone`]s.
#[derive(Debug, Clone, Default)]
pub struct ZoneResolver {
    zones: HashMap<String, Zone>,
}

impl ZoneResolver {
    /// Resolver with no zones; every lookup fails with `NotFound`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `zone` under `name`. A missing trailing dot is added.
    #[must_use]
    pub fn with_zone(mut self, name: &str, zone: Zone) -> Self {
        self.zones.insert(fqdn(name), zone);
        self
    }

    fn zone(&self, name: &str) -> Result<&Zone, ResolveError> {
        let zone = self
            .zones
            .get(name)
            .ok_or_else(|| ResolveError::NotFound(name.to_owned()))?;
        match &zone.err {
            Some(message) => Err(ResolveError::Failed(message.clone())),
            None => Ok(zone),
        }
    }
}

#[async_trait]
impl Resolver for ZoneResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let mut name = fqdn(host);
        let mut zone = self.zone(&name)?;
        for _ in 0..MAX_CNAME_DEPTH {
            let Some(target) = &zone.cname else { break };
            name = fqdn(target);
            zone = self.zone(&name)?;
        }
        if zone.cname.is_some() {
            return Err(ResolveError::Failed(format!("CNAME chain too long at {name}")));
        }

        let addrs = zone
            .a
            .iter()
            .chain(&zone.aaaa)
            .map(|raw| {
                raw.parse::<IpAddr>()
                    .map_err(|e| ResolveError::Failed(format!("bad record {raw:?} for {name}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if addrs.is_empty() {
            return Err(ResolveError::NotFound(name));
        }
        Ok(addrs)
    }

    async fn lookup_addr(&self, addr: IpAddr) -> Result<Vec<String>, ResolveError> {
        let name = reverse_name(addr);
        let zone = self.zone(&name)?;
        if zone.ptr.is_empty() {
            return Err(ResolveError::NotFound(name));
        }
        Ok(zone.ptr.clone())
    }
}

fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{name}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ZoneResolver {
        ZoneResolver::new()
            .with_zone(
                "valid.example.com.",
                Zone::new().a("10.0.0.1").aaaa("2001:db8::1"),
            )
            .with_zone("alias.example.com.", Zone::new().cname("valid.example.com."))
            .with_zone("loop-a.example.com", Zone::new().cname("loop-b.example.com"))
            .with_zone("loop-b.example.com", Zone::new().cname("loop-a.example.com"))
            .with_zone("broken.example.com", Zone::new().err("SERVFAIL"))
            .with_zone("1.0.0.10.in-addr.arpa.", Zone::new().ptr("valid.example.com."))
    }

    #[tokio::test]
    async fn lookup_ip_returns_a_then_aaaa() {
        let addrs = resolver().lookup_ip("valid.example.com").await.unwrap();
        assert_eq!(
            addrs,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "2001:db8::1".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn lookup_ip_follows_cname() {
        let addrs = resolver().lookup_ip("alias.example.com").await.unwrap();
        assert_eq!(addrs.len(), 2);
    }

    #[tokio::test]
    async fn lookup_ip_rejects_cname_loop() {
        let err = resolver().lookup_ip("loop-a.example.com").await.unwrap_err();
        assert!(matches!(err, ResolveError::Failed(_)));
    }

    #[tokio::test]
    async fn lookup_ip_unknown_name_is_not_found() {
        let err = resolver().lookup_ip("missing.example.com").await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound("missing.example.com.".into()));
    }

    #[tokio::test]
    async fn injected_error_is_returned() {
        let err = resolver().lookup_ip("broken.example.com").await.unwrap_err();
        assert_eq!(err, ResolveError::Failed("SERVFAIL".into()));
    }

    #[tokio::test]
    async fn lookup_addr_returns_ptr_names_verbatim() {
        let names = resolver()
            .lookup_addr("10.0.0.1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(names, vec!["valid.example.com."]);
    }

    #[tokio::test]
    async fn lookup_addr_without_ptr_is_not_found() {
        let err = resolver()
            .lookup_addr("10.9.9.9".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
