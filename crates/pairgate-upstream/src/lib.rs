//! # pairgate-upstream
//!
//! Upstream connector implementations for pairgate.
//!
//! - [`stub::StubConnector`]: in-process fake that emits synthetic QR codes.
//! - [`bridge::BridgeConnector`]: drives an external WhatsApp Web bridge
//!   process over JSON lines.

pub mod bridge;
pub mod protocol;
pub mod qr;
pub mod stub;
pub mod version;

pub use qr::generate_qr_terminal;

use pairgate_core::config::{Config, ConnectorKind};
use pairgate_core::traits::Connector;
use std::sync::Arc;

/// Build the connector selected by the config.
pub fn build_connector(config: &Config) -> Arc<dyn Connector> {
    match config.connector_kind() {
        ConnectorKind::Stub => Arc::new(stub::StubConnector::new(config.upstream.stub.clone())),
        ConnectorKind::Bridge => Arc::new(bridge::BridgeConnector::new(
            config.upstream.bridge.clone(),
            config.upstream.version_url.clone(),
            config.upstream.fallback_version,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairgate_core::config::Platform;

    #[test]
    fn test_build_connector_follows_profile() {
        let stub = build_connector(&Config::for_platform(Platform::Stub));
        assert_eq!(stub.name(), "stub");

        let fly = build_connector(&Config::for_platform(Platform::Fly));
        assert_eq!(fly.name(), "bridge");
    }
}
