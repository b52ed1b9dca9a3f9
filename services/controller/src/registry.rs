//! Service registry lookups.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use shoal_id::HostId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry lookup for {service} failed: {message}")]
    Lookup { service: String, message: String },
}

/// Resolves service names to network addresses.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Addresses of online instances of `service`, preferred first.
    async fn online_addrs(&self, service: &str) -> Result<Vec<String>, RegistryError>;
}

/// A registry backed by a fixed table.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    services: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table of per-host attach services, named `{service}.{host}`.
    pub fn for_attach(service: &str, addrs: &[(HostId, String)]) -> Self {
        let registry = Self::new();
        for (host, addr) in addrs {
            registry.register(format!("{service}.{host}"), addr.clone());
        }
        registry
    }

    pub fn register(&self, service: impl Into<String>, addr: impl Into<String>) {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        services.entry(service.into()).or_default().push(addr.into());
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn online_addrs(&self, service: &str) -> Result<Vec<String>, RegistryError> {
        let services = self
            .services
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(services.get(service).cloned().unwrap_or_default())
    }
}
