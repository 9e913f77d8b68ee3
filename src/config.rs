//! Configuration management
//!
//! One [`Config`] serves both roles. It is loaded once at startup (YAML file,
//! then `CERTSYNC_*` environment variables, then CLI overrides) and is
//! read-only from then on.
//!
//! ```yaml
//! host: certs.example.com
//! port: 15000
//! timeout: 30s
//! server:
//!   cert: /etc/certsync/cert.pem
//!   key:  /etc/certsync/key.pem
//!   ca:   /etc/certsync/ca.pem
//! client:
//!   cert: /etc/certsync/client.pem
//!   key:  /etc/certsync/client-key.pem
//!   ca:   /etc/certsync/ca.pem
//!   new_cert: /etc/ssl/certsync/cert.pem
//!   new_key:  /etc/ssl/certsync/key.pem
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default port for both roles
pub const DEFAULT_PORT: u16 = 15000;

/// Default network timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server role: the name this server answers to (local hostname when
    /// empty). Client role: the server to fetch from.
    pub host: String,
    /// Listening port (server) or target port (client)
    pub port: u16,
    /// Address the server binds to
    pub bind: String,
    /// Handshake, request/response and DNS lookup deadline
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Files used by the server role
    pub server: ServerFiles,
    /// Files used by the client role
    pub client: ClientFiles,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            bind: "0.0.0.0".to_string(),
            timeout: DEFAULT_TIMEOUT,
            server: ServerFiles::default(),
            client: ClientFiles::default(),
        }
    }
}

/// Server certificate, key and client-trust CA bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerFiles {
    /// Server certificate; also the certificate handed out to clients
    pub cert: String,
    /// Server private key; also the key handed out to clients
    pub key: String,
    /// CA bundle client certificates must chain to
    pub ca: String,
}

impl Default for ServerFiles {
    fn default() -> Self {
        Self {
            cert: "cert.pem".to_string(),
            key: "key.pem".to_string(),
            ca: "ca.pem".to_string(),
        }
    }
}

/// Client identity, server trust and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientFiles {
    /// Client certificate presented to the server
    pub cert: String,
    /// Client private key
    pub key: String,
    /// CA bundle the server certificate must chain to
    pub ca: String,
    /// Where the received certificate(s) are written
    pub new_cert: String,
    /// Where the received key(s) are written
    pub new_key: String,
    /// Load material and stop before any network I/O
    pub dry_run: bool,
}

impl Default for ClientFiles {
    fn default() -> Self {
        Self {
            cert: "cert.pem".to_string(),
            key: "key.pem".to_string(),
            ca: "ca.pem".to_string(),
            new_cert: "newcert.pem".to_string(),
            new_key: "newkey.pem".to_string(),
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (CERTSYNC_ prefix, CERTSYNC_CLIENT__NEW_CERT=...)
        figment = figment.merge(Env::prefixed("CERTSYNC_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check and complete the configuration for the server role.
    ///
    /// An empty `host` is replaced by the local hostname.
    pub fn validate_server(&mut self) -> Result<()> {
        self.validate_timeout()?;
        if self.host.is_empty() {
            let local = hostname::get()
                .map_err(|e| Error::Config(format!("Cannot get local hostname: {e}")))?;
            self.host = local.to_string_lossy().into_owned();
            tracing::info!(host = %self.host, "Hostname not specified, using local name");
        }
        Ok(())
    }

    /// Check the configuration for the client role.
    pub fn validate_client(&self) -> Result<()> {
        self.validate_timeout()?;
        if self.host.is_empty() {
            return Err(Error::Config("Server hostname not specified".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("Invalid port number: 0".into()));
        }
        Ok(())
    }

    /// `https://host:port/` of the distribution server
    pub fn server_url(&self) -> String {
        format!("https://{}:{}/", self.host, self.port)
    }

    fn validate_timeout(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("Timeout must be greater than zero".into()));
        }
        Ok(())
    }
}
