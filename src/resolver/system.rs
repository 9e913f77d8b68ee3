//! System DNS resolver backed by `hickory-resolver`.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::{ResolveError as HickoryError, ResolveErrorKind};
use hickory_resolver::system_conf::read_system_conf;
use tracing::debug;

use super::{ResolveError, Resolver};
use crate::{Error, Result};

/// Resolver using the host's DNS configuration.
///
/// The answer cache is disabled: every call goes to the network, so an
/// address that moved between two requests is never validated against a
/// stale answer.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Build from `/etc/resolv.conf` (or the platform equivalent).
    ///
    /// `timeout` bounds each query the resolver sends.
    pub fn from_system_conf(timeout: Duration) -> Result<Self> {
        let (config, mut opts) = read_system_conf()
            .map_err(|e| Error::Config(format!("Cannot read system DNS configuration: {e}")))?;
        opts.cache_size = 0;
        opts.timeout = timeout;

        debug!(
            nameservers = config.name_servers().len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "System resolver configured"
        );

        Ok(Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> std::result::Result<Vec<IpAddr>, ResolveError> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| convert(host, &e))?;
        Ok(lookup.iter().collect())
    }

    async fn lookup_addr(&self, addr: IpAddr) -> std::result::Result<Vec<String>, ResolveError> {
        let lookup = self
            .inner
            .reverse_lookup(addr)
            .await
            .map_err(|e| convert(&addr.to_string(), &e))?;
        Ok(lookup.iter().map(ToString::to_string).collect())
    }
}

fn convert(name: &str, err: &HickoryError) -> ResolveError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => ResolveError::NotFound(name.to_owned()),
        ResolveErrorKind::Timeout => ResolveError::Timeout(name.to_owned()),
        _ => ResolveError::Failed(err.to_string()),
    }
}
