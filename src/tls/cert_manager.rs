//! Certificate management: loading, rustls config building, and fixture
//! generation.
//!
//! Provides:
//! - [`build_server_config`] / [`build_client_config`]: rustls configs for
//!   both ends of the exchange, TLS 1.3 only, mutual verification mandatory
//! - [`load_certs`] / [`load_private_key`] / [`load_root_store`]: PEM file
//!   loading
//! - [`CertGenerator`]: `rcgen`-backed CA and leaf minting for the
//!   `certsync tls` commands and for test fixtures
//!
//! # File format
//!
//! All certificate and key files are expected in **PEM format**.  Any load
//! or parse failure is a startup-fatal [`Error::Config`] naming the file.

use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer,
    KeyPair, SanType, date_time_ymd,
    string::Ia5String,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::debug;

use crate::config::{ClientFiles, ServerFiles};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS configs
// ─────────────────────────────────────────────────────────────────────────────

/// Build the server side `rustls::ServerConfig`.
///
/// Clients without a certificate chaining to `files.ca` are rejected during
/// the handshake, so the distribution handler only ever sees verified peers.
pub fn build_server_config(files: &ServerFiles) -> Result<ServerConfig> {
    let server_certs = load_certs(&files.cert)?;
    let server_key = load_private_key(&files.key)?;
    let root_store = load_root_store(&files.ca)?;

    let provider = crypto_provider();
    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), Arc::clone(&provider))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Config(format!("Unsupported TLS protocol version: {e}")))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        cert = %files.cert,
        key = %files.key,
        ca = %files.ca,
        "Server TLS config built"
    );

    Ok(tls_cfg)
}

/// Build the client side `rustls::ClientConfig`.
///
/// Presents `files.cert`/`files.key` and only trusts servers chaining to
/// `files.ca`.
pub fn build_client_config(files: &ClientFiles) -> Result<ClientConfig> {
    let client_certs = load_certs(&files.cert)?;
    let client_key = load_private_key(&files.key)?;
    let root_store = load_root_store(&files.ca)?;

    let mut tls_cfg = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Config(format!("Unsupported TLS protocol version: {e}")))?
        .with_root_certificates(root_store)
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    tls_cfg.alpn_protocols = vec![b"http/1.1".to_vec()];

    debug!(
        cert = %files.cert,
        key = %files.key,
        ca = %files.ca,
        "Client TLS config built"
    );

    Ok(tls_cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Config(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    let key = rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Config(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Config(format!("No private key found in '{path}'")))?;

    Ok(key)
}

/// Load a CA bundle into a trust store.
pub fn load_root_store(path: &str) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    for cert in load_certs(path)? {
        root_store.add(cert).map_err(|e| {
            Error::Config(format!("Failed to add CA cert from '{path}' to trust store: {e}"))
        })?;
    }
    Ok(root_store)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: certificate generation
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the root CA (e.g. `"certsync test CA"`).
    pub cn: &'a str,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Parameters for generating a leaf certificate (server or client).
#[derive(Debug)]
pub struct LeafCertParams<'a> {
    /// Common Name. For clients this is the host name checked by FCrDNS.
    pub cn: &'a str,
    /// Subject Alternative Names: DNS entries.
    pub san_dns: Vec<String>,
    /// Subject Alternative Names: IP entries.
    pub san_ips: Vec<IpAddr>,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Generated certificate and key pair in PEM format.
#[derive(Debug)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// Certificate generator backed by `rcgen`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed CA certificate.
    pub fn init_ca(params: &CaParams<'_>) -> Result<GeneratedCert> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Config(format!("Failed to generate CA key: {e}")))?;

        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.not_after = validity_to_date(params.validity_days)?;

        let ca_cert = ca_params
            .self_signed(&key_pair)
            .map_err(|e| Error::Config(format!("CA cert generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Issue a leaf certificate signed by `ca_cert_pem` / `ca_key_pem`.
    pub fn issue_leaf(
        params: &LeafCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let ca_key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| Error::Config(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, &ca_key)
            .map_err(|e| Error::Config(format!("Failed to parse CA cert: {e}")))?;

        let leaf_key = KeyPair::generate()
            .map_err(|e| Error::Config(format!("Failed to generate leaf key: {e}")))?;

        let mut leaf_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        leaf_params.distinguished_name = dn;
        leaf_params.not_after = validity_to_date(params.validity_days)?;

        let mut sans: Vec<SanType> = Vec::new();
        for dns in &params.san_dns {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::Config(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        sans.extend(params.san_ips.iter().copied().map(SanType::IpAddress));
        leaf_params.subject_alt_names = sans;

        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| Error::Config(format!("Leaf cert signing failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }

    /// Write a [`GeneratedCert`] to `<dir>/<stem>.pem` and
    /// `<dir>/<stem>-key.pem`. The key file is readable by the owner only.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", dir.display())))?;

        fs::write(dir.join(format!("{stem}.pem")), &cert.cert_pem)
            .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

        write_private(&dir.join(format!("{stem}-key.pem")), cert.key_pem.as_bytes())
            .map_err(|e| Error::Config(format!("Cannot write key: {e}")))?;

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{path}': {e}")))
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?.write_all(data)
}

/// Convert a validity period (days) into a future date for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("System time error: {e}")))?
        .as_secs();

    let future_secs = now_secs.saturating_add(u64::from(days) * 86_400);

    let dt = time::OffsetDateTime::from_unix_timestamp(i64::try_from(future_secs).unwrap_or(i64::MAX))
        .map_err(|e| Error::Config(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
