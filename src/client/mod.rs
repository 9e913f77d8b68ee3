//! Certificate fetch client
//!
//! Single shot: build the mutual TLS session, issue one `GET /`, read the
//! whole body, classify it, write the result. No retries.

pub mod persist;

pub use persist::{PemBundle, PersistenceError};

use std::path::Path;

use reqwest::StatusCode;
use tracing::info;

use crate::config::Config;
use crate::tls::build_client_config;
use crate::{Error, Result};

/// What a fetch run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Credentials were loaded; the server was not contacted.
    DryRun,
    /// The bundle was received and written.
    Saved {
        /// Certificate blocks written
        certificates: usize,
        /// Key blocks written
        keys: usize,
        /// Blocks of other types dropped
        ignored: usize,
    },
}

/// Fetch the certificate bundle from the configured server and persist it.
///
/// # Errors
///
/// [`Error::Config`] for unusable configuration or TLS material,
/// [`Error::Transport`] when the server cannot be reached, [`Error::Rejected`]
/// for any non-200 answer and [`Error::Persistence`] when the body cannot be
/// classified or written.
pub async fn fetch(config: &Config) -> Result<FetchOutcome> {
    config.validate_client()?;
    let tls = build_client_config(&config.client)?;

    let url = config.server_url();
    if config.client.dry_run {
        info!(url = %url, cert = %config.client.cert, "Dry run, not contacting server");
        return Ok(FetchOutcome::DryRun);
    }

    #[allow(deprecated)]
    let http = reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .timeout(config.timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

    info!(url = %url, "Requesting certificate");
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Transport(format!("{url}: {e}")))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Transport(format!("Reading response from {url}: {e}")))?;

    if status != StatusCode::OK {
        return Err(Error::Rejected {
            status,
            body: String::from_utf8_lossy(&body).trim().to_owned(),
        });
    }

    let bundle = PemBundle::classify(&body)?;
    bundle.persist(
        Path::new(&config.client.new_cert),
        Path::new(&config.client.new_key),
    )?;

    info!(
        cert = %config.client.new_cert,
        key = %config.client.new_key,
        certificates = bundle.certificates.len(),
        keys = bundle.keys.len(),
        "Certificate saved"
    );

    Ok(FetchOutcome::Saved {
        certificates: bundle.certificates.len(),
        keys: bundle.keys.len(),
        ignored: bundle.ignored,
    })
}
