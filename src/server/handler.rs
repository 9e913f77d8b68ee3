//! Distribution handler
//!
//! `GET /` answers with the server certificate file followed by the server
//! key file, byte for byte, once the client's certificate name has been
//! confirmed against its address. Refusals are a bare 403 whose body never
//! says which check failed.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use super::{PeerConnection, ServerContext};
use crate::auth::{X_FORWARDED_FOR, client_addr};
use crate::tls::CertIdentity;

/// Create the router
///
/// The handler deadline is twice the configured timeout: one period is the
/// whole DNS budget of the validator, the rest covers reading the files. A
/// hung resolver therefore always ends in a 403, never a 408.
pub fn create_router(ctx: Arc<ServerContext>) -> Router {
    let timeout = handler_deadline(ctx.config.timeout);

    Router::new()
        .route("/", get(distribute_handler))
        .layer(request_timeout(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

pub(super) fn handler_deadline(timeout: Duration) -> Duration {
    timeout.saturating_mul(2)
}

#[allow(deprecated)]
fn request_timeout(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::new(timeout)
}

/// GET / handler
async fn distribute_handler(State(ctx): State<Arc<ServerContext>>, req: Request) -> Response {
    let peer = req.extensions().get::<PeerConnection>().cloned();
    let headers = req.headers();

    info!(
        method = %req.method(),
        path = %req.uri().path(),
        host = headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or(""),
        remote = %peer.as_ref().map(|p| p.remote_addr.to_string()).unwrap_or_default(),
        forwarded_for = headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()).unwrap_or(""),
        "Request"
    );

    // The TLS layer only hands over verified connections.
    let Some(peer) = peer else {
        error!("Request arrived without a peer connection record");
        return internal_error();
    };
    let identity = match CertIdentity::from_chain(&peer.chain) {
        Ok(identity) => identity,
        Err(e) => {
            error!(remote = %peer.remote_addr, error = %e, "No usable verified client certificate");
            return internal_error();
        }
    };

    debug!(
        client = %identity.display_name,
        san_dns = ?identity.san_dns_names,
        chain_len = peer.chain.len(),
        "Client certificate"
    );

    let Some(claimed) = identity.common_name.as_deref() else {
        warn!(
            remote = %peer.remote_addr,
            san_dns = ?identity.san_dns_names,
            "Client certificate has no Common Name"
        );
        return forbidden();
    };

    let remote = peer.remote_addr.to_string();
    let addr = match client_addr(headers, Some(&remote)) {
        Ok(addr) => addr,
        Err(e) => {
            warn!(host = claimed, remote = %remote, error = %e, "Cannot determine client address");
            return forbidden();
        }
    };

    if let Err(e) = ctx.validator.validate(claimed, addr).await {
        warn!(host = claimed, addr = %addr, error = %e, "Client authorization failed");
        return forbidden();
    }
    info!(host = claimed, addr = %addr, "Client authorized");

    let files = &ctx.config.server;
    let cert = match tokio::fs::read(&files.cert).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(path = %files.cert, error = %e, "Cannot read certificate");
            return internal_error();
        }
    };
    let key = match tokio::fs::read(&files.key).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(path = %files.key, error = %e, "Cannot read certificate key");
            return internal_error();
        }
    };

    let (cert_len, key_len) = (cert.len(), key.len());
    let mut body = cert;
    body.extend_from_slice(&key);
    let response = (StatusCode::OK, Body::from(body)).into_response();

    info!(
        host = claimed,
        cert = %files.cert,
        cert_bytes = cert_len,
        key = %files.key,
        key_bytes = key_len,
        "Sending certificate and key"
    );
    response
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, SocketAddr};

    use async_trait::async_trait;
    use axum::http::Request as HttpRequest;
    use rustls::pki_types::CertificateDer;
    use tower::ServiceExt;

    use crate::config::{Config, ServerFiles};
    use crate::resolver::{ResolveError, Resolver, Zone, ZoneResolver};
    use crate::tls::{CaParams, CertGenerator, LeafCertParams};

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: Arc<ServerContext>,
        client_chain: Vec<CertificateDer<'static>>,
    }

    fn client_der(cn: &str) -> CertificateDer<'static> {
        let ca = CertGenerator::init_ca(&CaParams {
            cn: "test CA",
            validity_days: 1,
        })
        .unwrap();
        let leaf = CertGenerator::issue_leaf(
            &LeafCertParams {
                cn,
                san_dns: vec![],
                san_ips: vec![],
                validity_days: 1,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();
        let block = pem::parse(&leaf.cert_pem).unwrap();
        CertificateDer::from(block.into_contents())
    }

    fn fixture(resolver: ZoneResolver) -> Fixture {
        fixture_with(Arc::new(resolver), Config::default().timeout)
    }

    fn fixture_with(resolver: Arc<dyn Resolver>, timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "CERT-BYTES\n").unwrap();
        std::fs::write(&key, "KEY-BYTES\n").unwrap();

        let config = Config {
            host: "certs.example.com".into(),
            server: ServerFiles {
                cert: cert.to_string_lossy().into_owned(),
                key: key.to_string_lossy().into_owned(),
                ca: String::new(),
            },
            timeout,
            ..Config::default()
        };

        Fixture {
            _dir: dir,
            ctx: Arc::new(ServerContext::new(config, resolver)),
            client_chain: vec![client_der("client.example.com")],
        }
    }

    fn zones() -> ZoneResolver {
        ZoneResolver::new()
            .with_zone("client.example.com.", Zone::new().a("10.0.0.5"))
            .with_zone(
                "5.0.0.10.in-addr.arpa.",
                Zone::new().ptr("client.example.com."),
            )
    }

    fn request(peer: Option<PeerConnection>) -> HttpRequest<Body> {
        let mut req = HttpRequest::builder()
            .uri("/")
            .header(header::HOST, "certs.example.com")
            .body(Body::empty())
            .unwrap();
        if let Some(peer) = peer {
            req.extensions_mut().insert(peer);
        }
        req
    }

    fn peer(chain: Vec<CertificateDer<'static>>, remote: &str) -> PeerConnection {
        PeerConnection {
            remote_addr: remote.parse::<SocketAddr>().unwrap(),
            chain: Arc::new(chain),
        }
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn authorized_client_gets_cert_then_key() {
        // GIVEN: a client whose CN forward/reverse resolves to its address
        let fx = fixture(zones());
        let app = create_router(Arc::clone(&fx.ctx));
        // WHEN: it requests /
        let resp = app
            .oneshot(request(Some(peer(fx.client_chain.clone(), "10.0.0.5:40000"))))
            .await
            .unwrap();
        // THEN: certificate bytes followed by key bytes
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "CERT-BYTES\nKEY-BYTES\n");
    }

    #[tokio::test]
    async fn wrong_address_is_forbidden_without_detail() {
        let fx = fixture(zones());
        let app = create_router(Arc::clone(&fx.ctx));
        let resp = app
            .oneshot(request(Some(peer(fx.client_chain.clone(), "10.0.0.9:40000"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(resp).await, "Forbidden");
    }

    #[tokio::test]
    async fn forwarded_for_header_overrides_remote_address() {
        // GIVEN: the TCP peer is a proxy, the header names the real client
        let fx = fixture(zones());
        let app = create_router(Arc::clone(&fx.ctx));
        let mut req = request(Some(peer(fx.client_chain.clone(), "192.0.2.1:443")));
        req.headers_mut()
            .insert(X_FORWARDED_FOR, "10.0.0.5".parse().unwrap());
        // WHEN / THEN
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_peer_record_is_internal_error() {
        let fx = fixture(zones());
        let app = create_router(Arc::clone(&fx.ctx));
        let resp = app.oneshot(request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn empty_chain_is_internal_error() {
        let fx = fixture(zones());
        let app = create_router(Arc::clone(&fx.ctx));
        let resp = app
            .oneshot(request(Some(peer(vec![], "10.0.0.5:40000"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unreadable_key_is_internal_error() {
        // GIVEN: an authorized client but the key file has disappeared
        let fx = fixture(zones());
        std::fs::remove_file(&fx.ctx.config.server.key).unwrap();
        let app = create_router(Arc::clone(&fx.ctx));
        // WHEN
        let resp = app
            .oneshot(request(Some(peer(fx.client_chain.clone(), "10.0.0.5:40000"))))
            .await
            .unwrap();
        // THEN: server fault, not an authorization failure
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let fx = fixture(zones());
        let app = create_router(Arc::clone(&fx.ctx));
        let mut req = request(Some(peer(fx.client_chain.clone(), "10.0.0.5:40000")));
        *req.uri_mut() = "/other".parse().unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    /// Answers correctly, but only after `delay`.
    struct StalledResolver {
        delay: Duration,
        inner: ZoneResolver,
    }

    #[async_trait]
    impl Resolver for StalledResolver {
        async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
            tokio::time::sleep(self.delay).await;
            self.inner.lookup_ip(host).await
        }

        async fn lookup_addr(&self, addr: IpAddr) -> Result<Vec<String>, ResolveError> {
            tokio::time::sleep(self.delay).await;
            self.inner.lookup_addr(addr).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_resolver_is_forbidden_not_timed_out() {
        // GIVEN: every lookup takes far longer than the configured timeout
        let resolver = StalledResolver {
            delay: Duration::from_secs(600),
            inner: zones(),
        };
        let fx = fixture_with(Arc::new(resolver), Duration::from_secs(1));
        let app = create_router(Arc::clone(&fx.ctx));
        // WHEN
        let resp = app
            .oneshot(request(Some(peer(fx.client_chain.clone(), "10.0.0.5:40000"))))
            .await
            .unwrap();
        // THEN: the DNS budget expires first and the client sees a plain 403
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(resp).await, "Forbidden");
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_slower_than_budget_in_total_are_forbidden() {
        // GIVEN: each lookup alone fits the timeout, both together do not
        let resolver = StalledResolver {
            delay: Duration::from_millis(700),
            inner: zones(),
        };
        let fx = fixture_with(Arc::new(resolver), Duration::from_secs(1));
        let app = create_router(Arc::clone(&fx.ctx));
        // WHEN
        let resp = app
            .oneshot(request(Some(peer(fx.client_chain.clone(), "10.0.0.5:40000"))))
            .await
            .unwrap();
        // THEN
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn handler_deadline_leaves_room_after_dns_budget() {
        let timeout = Duration::from_secs(30);
        assert!(handler_deadline(timeout) > timeout);
    }
}
