//! Destination IP whitelisting.

use crate::context::CallContext;
use crate::{Error, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use url::{Host, Url};

/// Allows calls only to hosts that resolve to a listed address.
#[derive(Debug, Clone, Default)]
pub struct IpWhitelist {
    allowed: HashSet<IpAddr>,
}

impl IpWhitelist {
    pub fn new(addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            allowed: addresses.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.allowed.contains(ip)
    }

    /// Resolves the host of `url` and checks it against the list.
    ///
    /// An empty whitelist allows everything.
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] if no resolved address is listed,
    /// [`Error::HostResolution`] if the lookup fails.
    pub async fn check(&self, url: &Url, ctx: &CallContext) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let host = url
            .host()
            .ok_or_else(|| Error::ConfigurationError(format!("URL has no host: {url}")))?;
        let port = url.port_or_known_default().unwrap_or(80);

        let addresses: Vec<IpAddr> = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(domain) => {
                let lookup = async {
                    tokio::net::lookup_host((domain, port))
                        .await
                        .map(|addrs| addrs.map(|a| a.ip()).collect::<Vec<_>>())
                        .map_err(|source| Error::HostResolution {
                            host: domain.to_string(),
                            source,
                        })
                };
                ctx.run(lookup).await?
            }
        };

        if addresses.iter().any(|ip| self.contains(ip)) {
            Ok(())
        } else {
            tracing::warn!(host = %host, ?addresses, "Destination not whitelisted");
            Err(Error::AccessDenied {
                host: host.to_string(),
            })
        }
    }
}
