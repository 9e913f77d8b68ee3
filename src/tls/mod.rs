//! Mutual TLS session layer.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TLS 1.3 handshake  (rustls verifies the client cert against the CA)
//!   → CertIdentity extracted from the peer chain
//!   → attached to every request on that connection
//!   → [FCrDNS check in the distribution handler]
//! ```
//!
//! # Modules
//!
//! - [`identity`]: X.509 certificate field extraction (`CertIdentity`)
//! - [`cert_manager`]: rustls config building, PEM loading and fixture
//!   certificate generation

pub mod cert_manager;
pub mod identity;

pub use cert_manager::{
    CaParams, CertGenerator, GeneratedCert, LeafCertParams, build_client_config,
    build_server_config, load_certs, load_private_key, load_root_store,
};
pub use identity::CertIdentity;
