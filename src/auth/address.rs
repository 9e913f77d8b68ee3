//! Client address extraction.
//!
//! The address a request is validated against is, in order of preference:
//!
//! 1. the first token of `X-Forwarded-For`, when present and parseable;
//! 2. the host part of the transport-level remote `host:port`.
//!
//! The forwarding header is trusted unconditionally. There is no proxy
//! allow-list and no chain depth check, so anyone who can reach the server
//! directly can claim any address this way.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use thiserror::Error;

/// Header carrying the originating client address when behind a proxy.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Why no client address could be derived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The request carries no transport metadata at all.
    #[error("request has no transport metadata")]
    NoRequest,

    /// Transport metadata is present but holds no address.
    #[error("request has no remote address")]
    NoAddress,

    /// The remote address is not a valid `host:port` with an IP host.
    #[error("invalid remote address {addr:?}: {reason}")]
    AddressParse {
        /// The raw remote address
        addr: String,
        /// Parser message
        reason: String,
    },
}

/// Derive the client's network origin from request headers and the
/// transport-level remote address (`None` when the request has no
/// transport metadata).
pub fn client_addr(headers: &HeaderMap, remote_addr: Option<&str>) -> Result<IpAddr, AddressError> {
    let remote_addr = remote_addr.ok_or(AddressError::NoRequest)?;

    if let Some(addr) = forwarded_addr(headers) {
        return Ok(addr);
    }

    if remote_addr.is_empty() {
        return Err(AddressError::NoAddress);
    }

    remote_addr
        .parse::<SocketAddr>()
        .map(|sa| sa.ip())
        .map_err(|e| AddressError::AddressParse {
            addr: remote_addr.to_owned(),
            reason: e.to_string(),
        })
}

/// First hop of `X-Forwarded-For`, if it parses as an address.
///
/// Later hops were appended by intermediaries and are ignored.
fn forwarded_addr(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split(|c: char| c.is_whitespace() || c == ',')
                .find(|token| !token.is_empty())
        })
        .and_then(|token| token.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn xff(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for v in values {
            headers.append(X_FORWARDED_FOR, HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn absent_request_fails() {
        assert_eq!(
            client_addr(&HeaderMap::new(), None),
            Err(AddressError::NoRequest)
        );
    }

    #[test]
    fn remote_addr_without_port_fails() {
        // GIVEN: bare addresses, no port
        for raw in ["10.0.0.1", "2001:db8::1", "2001:db8::5000", "[2001:db8::1]"] {
            let err = client_addr(&HeaderMap::new(), Some(raw)).unwrap_err();
            // THEN: host:port split fails
            assert!(
                matches!(err, AddressError::AddressParse { .. }),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn remote_addr_host_is_used_without_header() {
        assert_eq!(
            client_addr(&HeaderMap::new(), Some("10.0.0.1:5000")),
            Ok(ip("10.0.0.1"))
        );
        assert_eq!(
            client_addr(&HeaderMap::new(), Some("[2001:db8::1]:5000")),
            Ok(ip("2001:db8::1"))
        );
    }

    #[test]
    fn empty_remote_addr_is_no_address() {
        assert_eq!(
            client_addr(&HeaderMap::new(), Some("")),
            Err(AddressError::NoAddress)
        );
    }

    #[test]
    fn forwarded_header_wins_over_remote_addr() {
        let headers = xff(&["10.0.0.1"]);
        assert_eq!(
            client_addr(&headers, Some("10.0.0.5:5000")),
            Ok(ip("10.0.0.1"))
        );
    }

    #[test]
    fn only_first_forwarded_value_is_trusted() {
        // GIVEN: three header lines, one per proxy hop
        let headers = xff(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(
            client_addr(&headers, Some("10.0.0.5:5000")),
            Ok(ip("10.0.0.1"))
        );
        // GIVEN: a single line with several hops
        let headers = xff(&["10.0.0.1 10.0.0.2"]);
        assert_eq!(
            client_addr(&headers, Some("10.0.0.5:5000")),
            Ok(ip("10.0.0.1"))
        );
        let headers = xff(&["10.0.0.1, 10.0.0.2"]);
        assert_eq!(
            client_addr(&headers, Some("10.0.0.5:5000")),
            Ok(ip("10.0.0.1"))
        );
    }

    #[test]
    fn empty_forwarded_header_falls_back() {
        let headers = xff(&[""]);
        assert_eq!(
            client_addr(&headers, Some("10.0.0.5:5000")),
            Ok(ip("10.0.0.5"))
        );
    }

    #[test]
    fn non_address_forwarded_token_falls_back() {
        let headers = xff(&["a"]);
        assert_eq!(
            client_addr(&headers, Some("10.0.0.5:5000")),
            Ok(ip("10.0.0.5"))
        );
    }
}
