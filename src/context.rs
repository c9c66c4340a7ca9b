//! Shared network context and the dual-context resolver.
//!
//! A [`NetworkContext`] bundles the virtual stack, the host stack and the DNS
//! policy. It is built once and shared read-only by every routine. Lookups go
//! to the host resolver when `system_dns` is set and to the virtual stack's
//! resolver otherwise. Nothing is cached: every call resolves fresh, so each
//! new connection can land on a different address.

use crate::{
    address::{ResolvedEndpoint, TargetAddress},
    error::{Result, RouteError},
    stack::{HostStack, NetStack},
};
use rand::seq::SliceRandom;
use std::{fmt, net::IpAddr, sync::Arc};
use tracing::debug;

/// AddressSelector decides the order in which lookup results are tried
pub trait AddressSelector: Send + Sync {
    fn arrange(&self, addrs: &mut [String]);
}

/// Shuffle tries lookup results in uniformly random order
#[derive(Debug, Clone, Copy, Default)]
pub struct Shuffle;

impl AddressSelector for Shuffle {
    fn arrange(&self, addrs: &mut [String]) {
        addrs.shuffle(&mut rand::thread_rng());
    }
}

/// InOrder tries lookup results in the order the resolver returned them
#[derive(Debug, Clone, Copy, Default)]
pub struct InOrder;

impl AddressSelector for InOrder {
    fn arrange(&self, _addrs: &mut [String]) {}
}

/// NetworkContext is the capability bundle shared by all routines
#[derive(Clone)]
pub struct NetworkContext {
    stack: Arc<dyn NetStack>,
    host: Arc<dyn NetStack>,
    system_dns: bool,
    selector: Arc<dyn AddressSelector>,
}

/// NetworkContext implementation block
impl NetworkContext {
    /// new builds a context around a virtual stack, resolving through it
    pub fn new(stack: Arc<dyn NetStack>) -> Self {
        Self {
            stack,
            host: Arc::new(HostStack),
            system_dns: false,
            selector: Arc::new(Shuffle),
        }
    }

    /// with_system_dns routes every lookup to the host resolver instead
    pub fn with_system_dns(mut self, system_dns: bool) -> Self {
        self.system_dns = system_dns;
        self
    }

    /// with_host replaces the host stack used for system DNS and outbound
    /// connections of server tunnels
    pub fn with_host(mut self, host: Arc<dyn NetStack>) -> Self {
        self.host = host;
        self
    }

    /// with_selector replaces the address selection strategy
    pub fn with_selector(mut self, selector: Arc<dyn AddressSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// The user-space stack
    pub fn stack(&self) -> &Arc<dyn NetStack> {
        &self.stack
    }

    /// The host operating system's stack
    pub fn host(&self) -> &Arc<dyn NetStack> {
        &self.host
    }

    pub fn system_dns(&self) -> bool {
        self.system_dns
    }

    /// lookup_host returns every address the selected resolver knows for `name`
    pub async fn lookup_host(&self, name: &str) -> Result<Vec<String>> {
        let resolver = if self.system_dns {
            &self.host
        } else {
            &self.stack
        };

        resolver
            .lookup_host(name)
            .await
            .map_err(|source| RouteError::Lookup {
                name: name.to_string(),
                source,
            })
    }

    /// resolve_address picks one IP for `name`.
    ///
    /// Results are arranged by the selector and the first entry that parses
    /// as an IP literal wins. Fails with `NoAddressFound` on an empty lookup,
    /// and with the last parse error when no entry is an IP literal.
    pub async fn resolve_address(&self, name: &str) -> Result<IpAddr> {
        let mut addrs = self.lookup_host(name).await?;

        if addrs.is_empty() {
            return Err(RouteError::NoAddressFound(name.to_string()));
        }

        self.selector.arrange(&mut addrs);

        let mut last_err = None;
        for addr in &addrs {
            match addr.parse::<IpAddr>() {
                Ok(ip) => {
                    debug!("resolved {} -> {} ({} candidates)", name, ip, addrs.len());
                    return Ok(ip);
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(source) => Err(RouteError::AddressParse {
                name: name.to_string(),
                source,
            }),
            None => Err(RouteError::NoAddressFound(name.to_string())),
        }
    }

    /// resolve_to_endpoint resolves a target's host and pairs it with its port
    pub async fn resolve_to_endpoint(&self, target: &TargetAddress) -> Result<ResolvedEndpoint> {
        let ip = self.resolve_address(&target.host).await?;
        Ok(ResolvedEndpoint {
            ip,
            port: target.port,
        })
    }
}

impl fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkContext")
            .field("system_dns", &self.system_dns)
            .finish_non_exhaustive()
    }
}
