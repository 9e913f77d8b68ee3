//! certsync
//!
//! Distributes one certificate and private key over mutual TLS to clients
//! whose certificate Common Name is confirmed by forward-confirmed reverse
//! DNS (FCrDNS) against the address they connect from.
//!
//! # Roles
//!
//! - **Server**: TLS 1.3 listener requiring a client certificate signed by a
//!   configured CA. `GET /` returns the server's own certificate followed by
//!   its key once the client's host name and address agree in DNS.
//! - **Client**: presents its certificate, fetches the bundle, classifies
//!   the PEM blocks and writes certificates and keys to separate files.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod resolver;
pub mod server;
pub mod tls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))
}
