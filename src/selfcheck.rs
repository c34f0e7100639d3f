//! `pairgate check`: verify the sessions folder, the connector, and the
//! version lookup before deploying.

use pairgate_core::config::{Config, ConnectorKind};
use pairgate_core::credentials::CredentialStore;
use pairgate_upstream::bridge::BridgeConnector;
use pairgate_upstream::version;

/// Result of a single check.
struct CheckResult {
    name: String,
    detail: String,
    ok: bool,
}

impl CheckResult {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            detail: detail.into(),
            ok: true,
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            detail: detail.into(),
            ok: false,
        }
    }
}

/// Run all checks and print a summary. Returns true if all passed.
pub async fn run(config: &Config) -> bool {
    let results = vec![
        check_sessions_dir(config).await,
        check_connector(config).await,
        check_version(config).await,
    ];

    println!("\npairgate self-check ({})", config.platform().label());
    println!("===================");
    let mut all_ok = true;
    for r in &results {
        let icon = if r.ok { "+" } else { "x" };
        println!("  {icon} {}: {}", r.name, r.detail);
        all_ok &= r.ok;
    }
    println!();

    all_ok
}

async fn check_sessions_dir(config: &Config) -> CheckResult {
    let store = CredentialStore::new(config.sessions_dir());
    if let Err(e) = store.ensure_dir() {
        return CheckResult::fail("Sessions", format!("FAILED: {e}"));
    }

    // Check writability with a throwaway file.
    let marker = store.dir().join(".pairgate-check");
    if let Err(e) = tokio::fs::write(&marker, b"ok").await {
        return CheckResult::fail(
            "Sessions",
            format!("{} not writable: {e}", store.dir().display()),
        );
    }
    let _ = tokio::fs::remove_file(&marker).await;

    match store.load().await {
        Ok(snapshot) if snapshot.is_empty() => {
            CheckResult::pass("Sessions", format!("{} (empty)", store.dir().display()))
        }
        Ok(snapshot) => CheckResult::pass(
            "Sessions",
            format!(
                "{} ({} credential file(s))",
                store.dir().display(),
                snapshot.len()
            ),
        ),
        Err(e) => CheckResult::fail("Sessions", format!("FAILED: {e}")),
    }
}

async fn check_connector(config: &Config) -> CheckResult {
    match config.connector_kind() {
        ConnectorKind::Stub => CheckResult::pass("Connector", "stub (in-process)"),
        ConnectorKind::Bridge => {
            let bridge = &config.upstream.bridge;
            let connector = BridgeConnector::new(
                bridge.clone(),
                config.upstream.version_url.clone(),
                config.upstream.fallback_version,
            );
            match connector.check_program().await {
                Ok(()) => CheckResult::pass(
                    "Connector",
                    format!("bridge ({} {})", bridge.program, bridge.args.join(" ")),
                ),
                Err(e) => CheckResult::fail("Connector", format!("bridge ({e})")),
            }
        }
    }
}

async fn check_version(config: &Config) -> CheckResult {
    if config.connector_kind() == ConnectorKind::Stub {
        return CheckResult::pass(
            "Version",
            format!("{} (stub, not fetched)", config.upstream.stub.version),
        );
    }

    let client = reqwest::Client::new();
    match version::fetch_latest(&client, &config.upstream.version_url).await {
        Ok(v) => CheckResult::pass("Version", format!("{v} (latest)")),
        // Pairing still works on the fallback, so this is not a failure.
        Err(e) => CheckResult::pass(
            "Version",
            format!("{} (fallback; {e})", config.upstream.fallback_version),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairgate_core::config::Platform;

    fn stub_config(dir: &std::path::Path) -> Config {
        let mut config = Config::for_platform(Platform::Stub);
        config.session.sessions_dir = Some(dir.to_string_lossy().into_owned());
        config
    }

    #[tokio::test]
    async fn test_sessions_dir_created_and_writable() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sessions");
        let result = check_sessions_dir(&stub_config(&dir)).await;
        assert!(result.ok, "{}", result.detail);
        assert!(result.detail.contains("empty"));
        assert!(dir.is_dir());
        assert!(!dir.join(".pairgate-check").exists());
    }

    #[tokio::test]
    async fn test_sessions_dir_counts_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("creds.json"), b"{}").unwrap();
        let result = check_sessions_dir(&stub_config(tmp.path())).await;
        assert!(result.ok);
        assert!(result.detail.contains("1 credential file(s)"));
    }

    #[tokio::test]
    async fn test_missing_bridge_program_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = stub_config(tmp.path());
        config.upstream.connector = Some(ConnectorKind::Bridge);
        config.upstream.bridge.program = "/nonexistent/pairgate-bridge".into();
        let result = check_connector(&config).await;
        assert!(!result.ok);
        assert_eq!(result.name, "Connector");
    }

    #[tokio::test]
    async fn test_stub_profile_passes_all() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(run(&stub_config(tmp.path())).await);
    }
}
