//! Certificate identity extraction.
//!
//! Parses the leaf of a verified peer chain and pulls out the fields used
//! for authorization and audit logs: the subject Common Name (the host name
//! a client claims) and its DNS SANs.

use rustls::pki_types::CertificateDer;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Identity fields of a verified peer certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertIdentity {
    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// Subject Alternative Name: DNS entries.
    pub san_dns_names: Vec<String>,

    /// Pre-computed human-readable label for logs.
    pub display_name: String,
}

impl CertIdentity {
    /// Parse a DER-encoded certificate and extract its identity fields.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Internal(format!("Failed to parse peer certificate: {e}")))?;

        let common_name = extract_cn(&cert);
        let san_dns_names = extract_dns_sans(&cert);
        let display_name = common_name.clone().unwrap_or_else(|| "<unknown>".to_owned());

        Ok(Self {
            common_name,
            san_dns_names,
            display_name,
        })
    }

    /// Identity of the leaf of a verified chain.
    ///
    /// The TLS layer only hands over connections whose client presented a
    /// chain it verified, so an empty chain here is a wiring bug and is
    /// reported as [`Error::Internal`].
    pub fn from_chain(chain: &[CertificateDer<'_>]) -> Result<Self> {
        let leaf = chain
            .first()
            .ok_or_else(|| Error::Internal("no verified peer certificate on connection".into()))?;
        Self::from_der(leaf.as_ref())
    }
}

/// Extract the CN attribute from the subject DN.
fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_dns_sans(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut dns_names = Vec::new();
    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                dns_names.push((*dns).to_owned());
            }
        }
    }
    dns_names
}
