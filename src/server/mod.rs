//! Distribution server
//!
//! Accepts TCP connections, runs the mutual TLS 1.3 handshake with a
//! deadline, then serves HTTP on the connection with the verified peer
//! chain attached to every request as a [`PeerConnection`] extension.

mod handler;

pub use handler::create_router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::{Request, body::Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rustls::pki_types::CertificateDer;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::auth::FcrdnsValidator;
use crate::config::Config;
use crate::resolver::Resolver;
use crate::tls::build_server_config;
use crate::{Error, Result};

/// Shared, read-only state of a running server.
pub struct ServerContext {
    /// Effective configuration
    pub config: Arc<Config>,
    /// FCrDNS gate over the configured resolver
    pub validator: FcrdnsValidator,
}

impl ServerContext {
    /// Build the context once at startup.
    pub fn new(config: Config, resolver: Arc<dyn Resolver>) -> Self {
        let validator = FcrdnsValidator::new(resolver, config.timeout);
        Self {
            config: Arc::new(config),
            validator,
        }
    }
}

/// Transport facts about the connection a request arrived on.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// TCP peer address
    pub remote_addr: SocketAddr,
    /// Client certificate chain verified during the handshake, leaf first
    pub chain: Arc<Vec<CertificateDer<'static>>>,
}

/// Bound, not yet running distribution server.
pub struct DistributionServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    timeout: Duration,
}

impl DistributionServer {
    /// Load TLS material and bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if certificate, key or CA files cannot be
    /// loaded, or if the address cannot be bound.
    pub async fn bind(ctx: Arc<ServerContext>) -> Result<Self> {
        let config = Arc::clone(&ctx.config);
        let tls = build_server_config(&config.server)?;

        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("Cannot listen on {addr}: {e}")))?;

        info!(
            host = %config.host,
            listen = %addr,
            cert = %config.server.cert,
            key = %config.server.key,
            ca = %config.server.ca,
            timeout = ?config.timeout,
            "Distribution server bound"
        );

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(tls)),
            app: create_router(ctx),
            timeout: config.timeout,
        })
    }

    /// Actual listening address (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes, then give in-flight connections up
    /// to one timeout period to finish.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    let acceptor = self.acceptor.clone();
                    let app = self.app.clone();
                    let timeout = self.timeout;
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(acceptor, app, stream, remote_addr, timeout).await {
                            warn!(remote = %remote_addr, error = %e, "Connection failed");
                        }
                    });
                }
            }
        }

        info!(in_flight = connections.len(), "Draining connections");
        let drained = tokio::time::timeout(self.timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(aborted = connections.len(), "Drain deadline reached");
            connections.shutdown().await;
        }
        Ok(())
    }
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    app: Router,
    stream: TcpStream,
    remote_addr: SocketAddr,
    timeout: Duration,
) -> Result<()> {
    let tls = tokio::time::timeout(timeout, acceptor.accept(stream))
        .await
        .map_err(|_| Error::Transport("TLS handshake timed out".into()))?
        .map_err(|e| Error::Transport(format!("TLS handshake failed: {e}")))?;

    let chain: Vec<CertificateDer<'static>> = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
        .unwrap_or_default();
    debug!(remote = %remote_addr, chain_len = chain.len(), "TLS handshake complete");

    let peer = PeerConnection {
        remote_addr,
        chain: Arc::new(chain),
    };
    let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(peer.clone());
        app.clone().oneshot(req)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(tls), service);
    tokio::time::timeout(connection_deadline(timeout), conn)
        .await
        .map_err(|_| Error::Transport("connection deadline exceeded".into()))?
        .map_err(|e| Error::Transport(format!("HTTP error: {e}")))
}

/// Lifetime of one connection after the handshake; outlasts the handler so
/// a slow request still gets its response written.
fn connection_deadline(timeout: Duration) -> Duration {
    handler::handler_deadline(timeout).saturating_add(timeout)
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
