//! Command-line interface

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Mutual-TLS certificate distribution with FCrDNS client authorization
#[derive(Parser, Debug)]
#[command(name = "certsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CERTSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server name (serve) or server to fetch from (fetch)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Listening port (serve) or target port (fetch)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Network and DNS timeout (e.g. 30s, 2m)
    #[arg(long, global = true, value_parser = humantime_serde::re::humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CERTSYNC_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CERTSYNC_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Role to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the distribution server
    Serve {
        /// Address to bind to
        #[arg(long)]
        bind: Option<String>,
    },

    /// Fetch the certificate and key from a distribution server
    Fetch {
        /// Load credentials and stop before contacting the server
        #[arg(long)]
        dry_run: bool,

        /// Output path for received certificates
        #[arg(long)]
        new_cert: Option<String>,

        /// Output path for received keys
        #[arg(long)]
        new_key: Option<String>,
    },

    /// Generate a CA and leaf certificates for a deployment
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// Certificate generation subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Create a self-signed CA
    InitCa {
        /// CA Common Name
        #[arg(long, default_value = "certsync CA")]
        cn: String,

        /// Validity in days
        #[arg(long, default_value_t = 3650)]
        days: u32,

        /// Output directory (writes ca.pem and ca-key.pem)
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Issue a leaf certificate signed by the CA
    Issue {
        /// Common Name; for clients this is the host name checked by FCrDNS
        #[arg(long)]
        cn: String,

        /// DNS Subject Alternative Names (repeatable)
        #[arg(long = "dns")]
        dns: Vec<String>,

        /// IP Subject Alternative Names (repeatable)
        #[arg(long = "ip")]
        ip: Vec<IpAddr>,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// CA certificate
        #[arg(long, default_value = "ca.pem")]
        ca_cert: PathBuf,

        /// CA private key
        #[arg(long, default_value = "ca-key.pem")]
        ca_key: PathBuf,

        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Output file stem (writes <name>.pem and <name>-key.pem)
        #[arg(long, default_value = "cert")]
        name: String,
    },
}
