//! JSON-lines wire format spoken with the bridge process.
//!
//! Commands go to the bridge's stdin tagged by `op`; events come back on
//! stdout tagged by `event`. Credential blobs travel base64-encoded.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pairgate_core::credentials::CredentialSnapshot;
use pairgate_core::error::PairgateError;
use pairgate_core::event::{ConnectionState, ConnectionUpdate, UpstreamEvent};
use pairgate_core::traits::{ConnectOptions, ProtocolVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A command written to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BridgeCommand<'a> {
    Connect {
        version: ProtocolVersion,
        auth: BTreeMap<&'a str, String>,
        browser: [&'a str; 3],
        connect_timeout_ms: u64,
        keep_alive_interval_ms: u64,
    },
    Logout,
}

impl<'a> BridgeCommand<'a> {
    pub fn connect(options: &'a ConnectOptions) -> Self {
        let auth = options
            .auth
            .iter()
            .map(|(name, data)| (name, BASE64.encode(data)))
            .collect();
        Self::Connect {
            version: options.version,
            auth,
            browser: options.client.as_triple(),
            connect_timeout_ms: options.connect_timeout_ms,
            keep_alive_interval_ms: options.keep_alive_interval_ms,
        }
    }

    /// Serialize as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, PairgateError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// An event line read from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum BridgeEvent {
    Qr {
        qr: String,
    },
    Connection {
        connection: Option<ConnectionState>,
        #[serde(default)]
        qr: Option<String>,
    },
    Creds {
        files: BTreeMap<String, String>,
    },
}

/// Parse one stdout line. Blank, malformed, or unknown lines yield `None`.
pub fn parse_line(line: &str) -> Option<UpstreamEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let event: BridgeEvent = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(e) => {
            debug!("bridge: skipping unparseable line ({e})");
            return None;
        }
    };

    match event {
        BridgeEvent::Qr { qr } => Some(UpstreamEvent::ConnectionUpdate(ConnectionUpdate::qr(qr))),
        BridgeEvent::Connection { connection, qr } => {
            Some(UpstreamEvent::ConnectionUpdate(ConnectionUpdate { connection, qr }))
        }
        BridgeEvent::Creds { files } => {
            let mut snapshot = CredentialSnapshot::new();
            for (name, encoded) in files {
                match BASE64.decode(encoded.as_bytes()) {
                    Ok(data) => snapshot.insert(name, data),
                    Err(e) => {
                        debug!("bridge: dropping creds update, '{name}' is not base64: {e}");
                        return None;
                    }
                }
            }
            Some(UpstreamEvent::CredsUpdate(snapshot))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairgate_core::traits::ClientIdentity;

    #[test]
    fn test_parse_qr() {
        let ev = parse_line(r#"{"event":"qr","qr":"2@abc"}"#).unwrap();
        assert_eq!(
            ev,
            UpstreamEvent::ConnectionUpdate(ConnectionUpdate::qr("2@abc"))
        );
    }

    #[test]
    fn test_parse_connection_open() {
        let ev = parse_line(r#"{"event":"connection","connection":"open"}"#).unwrap();
        match ev {
            UpstreamEvent::ConnectionUpdate(u) => assert!(u.is_open()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_connection_with_qr() {
        let ev =
            parse_line(r#"{"event":"connection","connection":"connecting","qr":"2@x"}"#).unwrap();
        match ev {
            UpstreamEvent::ConnectionUpdate(u) => {
                assert_eq!(u.connection, Some(ConnectionState::Connecting));
                assert_eq!(u.qr_code(), Some("2@x"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_creds_decodes_base64() {
        let ev = parse_line(r#"{"event":"creds","files":{"creds.json":"e30="}}"#).unwrap();
        match ev {
            UpstreamEvent::CredsUpdate(snapshot) => {
                assert_eq!(snapshot.get("creds.json"), Some(&b"{}"[..]));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_skips_garbage() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("Baileys starting...").is_none());
        assert!(parse_line(r#"{"event":"presence","jid":"x"}"#).is_none());
        assert!(parse_line(r#"{"event":"creds","files":{"creds.json":"***"}}"#).is_none());
    }

    #[test]
    fn test_connect_command_line() {
        let mut auth = CredentialSnapshot::new();
        auth.insert("creds.json", b"{}".to_vec());
        let options = ConnectOptions {
            version: ProtocolVersion([2, 3000, 1]),
            auth,
            client: ClientIdentity::default(),
            connect_timeout_ms: 60_000,
            keep_alive_interval_ms: 15_000,
        };
        let line = BridgeCommand::connect(&options).to_line().unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["op"], "connect");
        assert_eq!(value["version"], serde_json::json!([2, 3000, 1]));
        assert_eq!(value["auth"]["creds.json"], "e30=");
        assert_eq!(
            value["browser"],
            serde_json::json!(["Ubuntu", "Chrome", "110.0.0"])
        );
        assert_eq!(value["connect_timeout_ms"], 60_000);
    }

    #[test]
    fn test_logout_command_line() {
        let line = BridgeCommand::Logout.to_line().unwrap();
        assert_eq!(line, "{\"op\":\"logout\"}\n");
    }
}
