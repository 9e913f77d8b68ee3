//! certsync - mutual-TLS certificate distribution

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use certsync::{
    cli::{Cli, Command, TlsCommand},
    client::{self, FetchOutcome},
    config::Config,
    resolver::SystemResolver,
    server::{DistributionServer, ServerContext},
    setup_tracing,
    tls::{CaParams, CertGenerator, LeafCertParams},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Tls(ref cmd) => run_tls_command(cmd),
        Command::Serve { .. } => run_server(&cli).await,
        Command::Fetch { .. } => run_fetch(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal");
            ExitCode::FAILURE
        }
    }
}

/// Load the config file and apply command-line overrides.
fn load_config(cli: &Cli) -> certsync::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }

    match &cli.command {
        Command::Serve { bind: Some(bind) } => config.bind.clone_from(bind),
        Command::Fetch {
            dry_run,
            new_cert,
            new_key,
        } => {
            config.client.dry_run |= *dry_run;
            if let Some(path) = new_cert {
                config.client.new_cert.clone_from(path);
            }
            if let Some(path) = new_key {
                config.client.new_key.clone_from(path);
            }
        }
        _ => {}
    }

    Ok(config)
}

/// Run the distribution server
async fn run_server(cli: &Cli) -> certsync::Result<()> {
    let mut config = load_config(cli)?;
    config.validate_server()?;

    let resolver = SystemResolver::from_system_conf(config.timeout)?;
    let ctx = Arc::new(ServerContext::new(config, Arc::new(resolver)));

    let server = DistributionServer::bind(ctx).await?;
    info!(addr = %server.local_addr()?, "Listening");
    server.run().await
}

/// Fetch and persist the certificate bundle
async fn run_fetch(cli: &Cli) -> certsync::Result<()> {
    let config = load_config(cli)?;

    match client::fetch(&config).await? {
        FetchOutcome::DryRun => info!("Dry run complete"),
        FetchOutcome::Saved {
            certificates,
            keys,
            ignored,
        } => info!(certificates, keys, ignored, "Fetch complete"),
    }
    Ok(())
}

/// Run certificate generation commands
fn run_tls_command(cmd: &TlsCommand) -> certsync::Result<()> {
    match cmd {
        TlsCommand::InitCa { cn, days, out } => {
            let ca = CertGenerator::init_ca(&CaParams {
                cn,
                validity_days: *days,
            })?;
            CertGenerator::write_to_dir(&ca, out, "ca")?;
            info!(cn = %cn, dir = %out.display(), "CA written to ca.pem / ca-key.pem");
        }
        TlsCommand::Issue {
            cn,
            dns,
            ip,
            days,
            ca_cert,
            ca_key,
            out,
            name,
        } => {
            let ca_cert_pem = std::fs::read_to_string(ca_cert).map_err(|e| {
                certsync::Error::Config(format!("Cannot read '{}': {e}", ca_cert.display()))
            })?;
            let ca_key_pem = std::fs::read_to_string(ca_key).map_err(|e| {
                certsync::Error::Config(format!("Cannot read '{}': {e}", ca_key.display()))
            })?;

            let leaf = CertGenerator::issue_leaf(
                &LeafCertParams {
                    cn,
                    san_dns: dns.clone(),
                    san_ips: ip.clone(),
                    validity_days: *days,
                },
                &ca_cert_pem,
                &ca_key_pem,
            )?;
            CertGenerator::write_to_dir(&leaf, out, name)?;
            info!(cn = %cn, dir = %out.display(), name = %name, "Certificate issued");
        }
    }
    Ok(())
}
