//! FCrDNS gate scenarios
//!
//! Runs the validator against in-memory zones covering:
//! - forward and reverse agreement (IPv4 and IPv6)
//! - forward mismatch
//! - reverse mismatch
//! - CNAME aliases
//! - resolver failures

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use certsync::auth::{AuthorizationError, FcrdnsValidator};
use certsync::resolver::{ResolveError, Resolver, Zone, ZoneResolver, reverse_name};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn scenario() -> FcrdnsValidator {
    let v6 = reverse_name(ip("2001:db8::1"));
    let zones = ZoneResolver::new()
        .with_zone(
            "valid.example.com.",
            Zone::new().a("10.0.0.1").aaaa("2001:db8::1"),
        )
        .with_zone("mismatched.example.com.", Zone::new().a("10.0.0.2"))
        .with_zone(
            "cname-for-valid.example.com.",
            Zone::new().cname("valid.example.com."),
        )
        .with_zone("1.0.0.10.in-addr.arpa.", Zone::new().ptr("valid.example.com."))
        .with_zone(
            "2.0.0.10.in-addr.arpa.",
            Zone::new().ptr("badly-mismatched.example.com."),
        )
        .with_zone(&v6, Zone::new().ptr("valid.example.com."));

    FcrdnsValidator::new(Arc::new(zones), Duration::from_secs(5))
}

#[tokio::test]
async fn test_valid_host_and_address() {
    assert_eq!(
        scenario().validate("valid.example.com", ip("10.0.0.1")).await,
        Ok(())
    );
}

#[tokio::test]
async fn test_valid_host_over_ipv6() {
    // GIVEN: dual-stack host, client connects over IPv6
    // THEN: the AAAA record and the ip6.arpa PTR confirm it
    assert_eq!(
        scenario().validate("valid.example.com", ip("2001:db8::1")).await,
        Ok(())
    );
}

#[tokio::test]
async fn test_address_not_in_forward_set() {
    assert_eq!(
        scenario().validate("valid.example.com", ip("10.0.0.3")).await,
        Err(AuthorizationError::AddressMismatch {
            host: "valid.example.com".into(),
            addr: ip("10.0.0.3"),
        })
    );
}

#[tokio::test]
async fn test_reverse_points_elsewhere() {
    // GIVEN: forward record matches but PTR names another host
    assert_eq!(
        scenario()
            .validate("mismatched.example.com", ip("10.0.0.2"))
            .await,
        Err(AuthorizationError::ReverseMismatch {
            host: "mismatched.example.com".into(),
            addr: ip("10.0.0.2"),
        })
    );
}

#[tokio::test]
async fn test_cname_alias_is_not_confirmed_by_canonical_ptr() {
    // GIVEN: the alias forward-resolves (through CNAME) to the observed address
    // WHEN: the PTR names the canonical host, not the alias
    // THEN: exact match is required, so validation fails
    assert_eq!(
        scenario()
            .validate("cname-for-valid.example.com", ip("10.0.0.1"))
            .await,
        Err(AuthorizationError::ReverseMismatch {
            host: "cname-for-valid.example.com".into(),
            addr: ip("10.0.0.1"),
        })
    );
}

#[tokio::test]
async fn test_claimed_name_with_trailing_dot_does_not_match() {
    // The reverse name is stripped of its root dot, the claimed name is not.
    let result = scenario().validate("valid.example.com.", ip("10.0.0.1")).await;
    assert!(matches!(
        result,
        Err(AuthorizationError::ReverseMismatch { .. })
    ));
}

#[tokio::test]
async fn test_empty_name_always_fails() {
    for addr in ["10.0.0.1", "10.0.0.2", "2001:db8::1"] {
        assert!(scenario().validate("", ip(addr)).await.is_err(), "{addr}");
    }
}

#[tokio::test]
async fn test_unknown_host_is_lookup_failure() {
    let result = scenario().validate("nope.example.com", ip("10.0.0.1")).await;
    assert!(matches!(
        result,
        Err(AuthorizationError::LookupFailure {
            source: ResolveError::NotFound(_),
            ..
        })
    ));
}

struct BrokenResolver;

#[async_trait]
impl Resolver for BrokenResolver {
    async fn lookup_ip(&self, _host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        Err(ResolveError::Failed("SERVFAIL from 192.0.2.53".into()))
    }

    async fn lookup_addr(&self, _addr: IpAddr) -> Result<Vec<String>, ResolveError> {
        Err(ResolveError::Failed("SERVFAIL from 192.0.2.53".into()))
    }
}

#[tokio::test]
async fn test_resolver_errors_are_lookup_failures() {
    let validator = FcrdnsValidator::new(Arc::new(BrokenResolver), Duration::from_secs(5));
    assert_eq!(
        validator.validate("valid.example.com", ip("10.0.0.1")).await,
        Err(AuthorizationError::LookupFailure {
            host: "valid.example.com".into(),
            addr: ip("10.0.0.1"),
            source: ResolveError::Failed("SERVFAIL from 192.0.2.53".into()),
        })
    );
}

#[tokio::test]
async fn test_per_zone_error_is_lookup_failure() {
    let zones = ZoneResolver::new().with_zone("bad.example.com.", Zone::new().err("REFUSED"));
    let validator = FcrdnsValidator::new(Arc::new(zones), Duration::from_secs(5));
    let result = validator.validate("bad.example.com", ip("10.0.0.1")).await;
    assert!(matches!(
        result,
        Err(AuthorizationError::LookupFailure {
            source: ResolveError::Failed(_),
            ..
        })
    ));
}
