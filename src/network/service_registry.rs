use std::collections::HashMap;
use std::net::IpAddr;

/// Resolves a server address to the service that owns it.
pub trait ServiceRegistry: Send + Sync {
    fn resolve(&self, addr: IpAddr) -> Option<String>;
}

/// Address table loaded from `[identifier.addresses]`.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    addresses: HashMap<IpAddr, String>,
}

impl StaticRegistry {
    pub fn new(addresses: HashMap<IpAddr, String>) -> Self {
        Self { addresses }
    }
}

impl ServiceRegistry for StaticRegistry {
    fn resolve(&self, addr: IpAddr) -> Option<String> {
        self.addresses.get(&addr).cloned()
    }
}
