use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;

/// Secret storage behind the `@keychain` capability.
///
/// Access is gated by policy (`keychain.allow`/`keychain.deny` patterns
/// over `service/account` paths) and requires the `danger` opt-in.
#[async_trait]
pub trait KeychainProvider: Send + Sync + std::fmt::Debug {
    async fn get(&self, service: &str, account: &str) -> Option<String>;
    async fn set(&self, service: &str, account: &str, secret: &str);
    async fn delete(&self, service: &str, account: &str);
}

/// In-memory provider for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    entries: ParkingMutex<FxHashMap<(String, String), String>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeychainProvider for MemoryKeychain {
    async fn get(&self, service: &str, account: &str) -> Option<String> {
        self.entries
            .lock()
            .get(&(service.to_string(), account.to_string()))
            .cloned()
    }

    async fn set(&self, service: &str, account: &str, secret: &str) {
        let _ = self
            .entries
            .lock()
            .insert((service.to_string(), account.to_string()), secret.to_string());
    }

    async fn delete(&self, service: &str, account: &str) {
        let _ = self
            .entries
            .lock()
            .remove(&(service.to_string(), account.to_string()));
    }
}
