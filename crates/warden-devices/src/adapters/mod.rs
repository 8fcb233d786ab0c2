//! Vendor adapter implementations and selection.
//!
//! Adapter resolution is a pure, total function: every device — however
//! malformed its record — classifies to exactly one [`AdapterKind`], and
//! the registry always returns an adapter for a kind. Unknown devices
//! resolve to the stub adapter instead of failing.

pub mod dahua;
pub mod hikvision;
pub mod stub;
pub mod zkteco;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::DeviceAdapter;
use crate::model::{Device, Protocol};

pub use dahua::DahuaAdapter;
pub use hikvision::HikvisionAdapter;
pub use stub::StubAdapter;
pub use zkteco::ZktecoAdapter;

/// Enumerated adapter implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Hikvision,
    Zkteco,
    Dahua,
    Stub,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hikvision => "hikvision",
            Self::Zkteco => "zkteco",
            Self::Dahua => "dahua",
            Self::Stub => "stub",
        }
    }

    /// Classify a device into an adapter kind.
    ///
    /// Resolution order: case-insensitive manufacturer token match first,
    /// then transport protocol, then the stub.
    ///
    /// The HTTP/HTTPS branch defaults to Hikvision. This is a preserved
    /// historical default, not a sound heuristic: an unknown HTTP device is
    /// silently classified as Hikvision instead of routed to the stub.
    /// Changing it would retarget reconciliation for fleets that rely on
    /// it, so it stays.
    pub fn classify(manufacturer: &str, protocol: Protocol) -> Self {
        let manufacturer = manufacturer.to_ascii_lowercase();
        if manufacturer.contains("hikvision") || manufacturer.contains("hik") {
            return Self::Hikvision;
        }
        if manufacturer.contains("zkteco") || manufacturer.contains("zk") {
            return Self::Zkteco;
        }
        if manufacturer.contains("dahua") {
            return Self::Dahua;
        }
        if protocol.is_http() {
            return Self::Hikvision;
        }
        Self::Stub
    }

    /// Classify a device record.
    pub fn for_device(device: &Device) -> Self {
        Self::classify(&device.manufacturer, device.protocol)
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registry mapping adapter kinds to capability implementations.
pub struct AdapterRegistry {
    adapters: HashMap<AdapterKind, Arc<dyn DeviceAdapter>>,
    fallback: Arc<dyn DeviceAdapter>,
}

impl AdapterRegistry {
    /// Build a registry with all built-in vendor adapters.
    pub fn with_default_adapters(default_timeout: Duration) -> Self {
        let mut adapters: HashMap<AdapterKind, Arc<dyn DeviceAdapter>> = HashMap::new();
        adapters.insert(
            AdapterKind::Hikvision,
            Arc::new(HikvisionAdapter::new(default_timeout)),
        );
        adapters.insert(
            AdapterKind::Zkteco,
            Arc::new(ZktecoAdapter::new(default_timeout)),
        );
        adapters.insert(
            AdapterKind::Dahua,
            Arc::new(DahuaAdapter::new(default_timeout)),
        );
        let fallback: Arc<dyn DeviceAdapter> = Arc::new(StubAdapter::new());
        adapters.insert(AdapterKind::Stub, fallback.clone());
        Self { adapters, fallback }
    }

    /// Replace or add the adapter for a kind.
    pub fn register(&mut self, kind: AdapterKind, adapter: Arc<dyn DeviceAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    /// Get the adapter for a kind. Total: unknown kinds get the stub.
    pub fn get(&self, kind: AdapterKind) -> Arc<dyn DeviceAdapter> {
        self.adapters
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Resolve the adapter for a device.
    pub fn select_for(&self, device: &Device) -> Arc<dyn DeviceAdapter> {
        self.get(AdapterKind::for_device(device))
    }

    /// All registered kinds.
    pub fn kinds(&self) -> Vec<AdapterKind> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_manufacturer_token() {
        assert_eq!(
            AdapterKind::classify("Hikvision Digital", Protocol::Tcp),
            AdapterKind::Hikvision
        );
        assert_eq!(
            AdapterKind::classify("HIK-2000", Protocol::Udp),
            AdapterKind::Hikvision
        );
        assert_eq!(
            AdapterKind::classify("ZKTeco Inc", Protocol::Tcp),
            AdapterKind::Zkteco
        );
        assert_eq!(
            AdapterKind::classify("zk-f18", Protocol::Udp),
            AdapterKind::Zkteco
        );
        assert_eq!(
            AdapterKind::classify("Dahua Technology", Protocol::Tcp),
            AdapterKind::Dahua
        );
    }

    #[test]
    fn test_classify_http_fallback_is_hikvision() {
        // Historical default: unknown HTTP devices classify as Hikvision
        assert_eq!(
            AdapterKind::classify("Acme Doors", Protocol::Http),
            AdapterKind::Hikvision
        );
        assert_eq!(
            AdapterKind::classify("", Protocol::Https),
            AdapterKind::Hikvision
        );
    }

    #[test]
    fn test_classify_unknown_non_http_is_stub() {
        assert_eq!(
            AdapterKind::classify("Acme Doors", Protocol::Tcp),
            AdapterKind::Stub
        );
        assert_eq!(AdapterKind::classify("", Protocol::Udp), AdapterKind::Stub);
    }

    #[test]
    fn test_classification_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(
                AdapterKind::classify("zkteco", Protocol::Http),
                AdapterKind::Zkteco
            );
        }
    }

    #[test]
    fn test_registry_is_total() {
        let registry = AdapterRegistry::with_default_adapters(Duration::from_secs(5));
        for kind in [
            AdapterKind::Hikvision,
            AdapterKind::Zkteco,
            AdapterKind::Dahua,
            AdapterKind::Stub,
        ] {
            assert_eq!(registry.get(kind).vendor(), kind.as_str());
        }
    }
}
