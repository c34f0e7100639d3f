//! Latest WhatsApp Web protocol version lookup.

use pairgate_core::error::PairgateError;
use pairgate_core::traits::ProtocolVersion;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct VersionDoc {
    version: ProtocolVersion,
}

/// Parse a `{"version": [a, b, c]}` document.
pub fn parse_version_doc(body: &str) -> Result<ProtocolVersion, PairgateError> {
    let doc: VersionDoc = serde_json::from_str(body)
        .map_err(|e| PairgateError::Version(format!("unexpected version document: {e}")))?;
    Ok(doc.version)
}

/// Fetch the version document from `url`.
pub async fn fetch_latest(
    client: &reqwest::Client,
    url: &str,
) -> Result<ProtocolVersion, PairgateError> {
    let resp = client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| PairgateError::Version(format!("request to {url} failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(PairgateError::Version(format!(
            "{url} returned HTTP {}",
            resp.status()
        )));
    }

    let body = resp
        .text()
        .await
        .map_err(|e| PairgateError::Version(format!("reading {url} failed: {e}")))?;
    parse_version_doc(&body)
}

/// Fetch the latest version, or log and return `fallback`.
pub async fn latest_or_fallback(
    client: &reqwest::Client,
    url: &str,
    fallback: ProtocolVersion,
) -> ProtocolVersion {
    match fetch_latest(client, url).await {
        Ok(version) => {
            info!("using WhatsApp Web version {version}");
            version
        }
        Err(e) => {
            warn!("{e}; falling back to {fallback}");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_doc() {
        let v = parse_version_doc(r#"{"version": [2, 3000, 1015901307]}"#).unwrap();
        assert_eq!(v, ProtocolVersion([2, 3000, 1_015_901_307]));
    }

    #[test]
    fn test_parse_version_doc_rejects_short_array() {
        assert!(parse_version_doc(r#"{"version": [2, 3000]}"#).is_err());
        assert!(parse_version_doc("<html>").is_err());
    }

    #[tokio::test]
    async fn test_fallback_on_unreachable_url() {
        let client = reqwest::Client::new();
        let fallback = ProtocolVersion([2, 1, 0]);
        // Port 9 (discard) on localhost refuses connections.
        let v = latest_or_fallback(&client, "http://127.0.0.1:9/version.json", fallback).await;
        assert_eq!(v, fallback);
    }
}
