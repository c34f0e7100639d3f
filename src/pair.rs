//! Interactive terminal pairing via QR code.

use crate::session::{LinkState, PairingOutcome, SessionManager, SessionSettings};
use pairgate_core::config::Config;
use pairgate_core::credentials::CredentialStore;
use pairgate_upstream::{build_connector, generate_qr_terminal};
use std::time::Duration;

/// How long the user gets to scan once the QR is on screen.
const SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Run the interactive pairing flow against the configured connector.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    cliclack::intro(console::style("pairgate pair").bold().to_string())?;

    let store = CredentialStore::new(config.sessions_dir());
    store.ensure_dir()?;

    if !store.load().await?.is_empty() {
        cliclack::log::success("Stored WhatsApp credentials found.")?;
        let repair: bool = cliclack::confirm("Re-pair? This discards the stored session.")
            .initial_value(false)
            .interact()?;
        if !repair {
            cliclack::outro("Nothing changed.")?;
            return Ok(());
        }
        // A fresh folder makes the upstream issue a new QR.
        std::fs::remove_dir_all(store.dir())?;
        store.ensure_dir()?;
        cliclack::log::step("Old session removed.")?;
    }

    cliclack::log::info("Open WhatsApp on your phone → Linked Devices → Link a Device")?;

    let mut settings = SessionSettings::from_config(config);
    settings.print_qr_in_terminal = false;
    let manager = SessionManager::new(build_connector(config), store, settings);
    let mut link = manager.watch_link();

    let spinner = cliclack::spinner();
    spinner.start(format!("Requesting QR code via {}...", manager.connector_name()));

    match manager.start().await {
        Ok(PairingOutcome::Qr(qr)) => {
            spinner.stop("QR code ready");
            let qr_text = generate_qr_terminal(&qr)?;
            cliclack::note("Scan this QR code with WhatsApp", &qr_text)?;
        }
        Ok(PairingOutcome::Connected) => {
            spinner.stop("Already linked");
            manager.shutdown().await;
            cliclack::outro("The stored session is still valid.")?;
            return Ok(());
        }
        Ok(PairingOutcome::TimedOut) | Ok(PairingOutcome::Superseded) => {
            spinner.error(format!(
                "No QR code within {}s",
                manager.qr_timeout().as_secs()
            ));
            manager.shutdown().await;
            cliclack::outro("Try again with: pairgate pair")?;
            return Ok(());
        }
        Err(e) => {
            spinner.error(format!("Setup failed: {e}"));
            cliclack::outro("Run `pairgate check` to diagnose.")?;
            return Ok(());
        }
    }

    let spinner = cliclack::spinner();
    spinner.start("Waiting for scan...");

    let linked = tokio::time::timeout(
        SCAN_TIMEOUT,
        link.wait_for(|state| *state == LinkState::Open),
    )
    .await
    .ok()
    .is_some_and(|state| state.is_ok());

    // Flush pending credential writes before exiting.
    manager.shutdown().await;

    if linked {
        spinner.stop("WhatsApp linked successfully!");
        cliclack::outro("Pairing complete. Credentials saved.")?;
    } else {
        spinner.error("Pairing did not complete.");
        cliclack::outro("Try again with: pairgate pair")?;
    }

    Ok(())
}
