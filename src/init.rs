//! `pairgate init`: write a starter config for a hosting platform.

use pairgate_core::config::{Config, Platform};
use std::path::Path;

/// Write `path` with the defaults for `platform`.
///
/// An existing file is left alone unless `force` is set.
pub fn run(path: &Path, platform: Platform, force: bool) -> anyhow::Result<()> {
    println!();
    println!("  pairgate setup ({})", platform.label());
    println!("  ==============");
    println!();

    if path.exists() && !force {
        println!("  {} already exists, skipping generation.", path.display());
        println!("  Re-run with --force to overwrite it.");
        println!();
        return Ok(());
    }

    let config = Config::for_platform(platform);
    let body = render(&config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)?;
    println!("  Wrote {}", path.display());

    println!(
        "  Sessions folder: {} (created on first start)",
        config.sessions_dir().display()
    );

    println!();
    println!("  Next steps:");
    println!("    pairgate check    verify the setup");
    println!("    pairgate start    serve the pairing API on port {}", config.server.port);
    println!();
    Ok(())
}

fn render(config: &Config) -> anyhow::Result<String> {
    let mut out = format!(
        "# pairgate config for {}.\n# PORT, PAIRGATE_PLATFORM, PAIRGATE_SESSIONS_DIR and PAIRGATE_API_KEY override these values.\n\n",
        config.platform().label()
    );
    out.push_str(&config.to_toml()?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path, platform: Platform) -> Config {
        let mut config = Config::for_platform(platform);
        config.session.sessions_dir = Some(dir.join("sessions").to_string_lossy().into_owned());
        config
    }

    #[test]
    fn test_render_round_trips_platform() {
        let tmp = tempfile::tempdir().unwrap();
        let rendered = render(&config_in(tmp.path(), Platform::Railway)).unwrap();
        assert!(rendered.starts_with("# pairgate config for Railway."));
        let parsed = Config::parse(&rendered).unwrap();
        assert_eq!(parsed.platform(), Platform::Railway);
        assert_eq!(parsed.server.port, 3000);
    }

    #[test]
    fn test_existing_file_kept_without_force() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pairgate.toml");
        std::fs::write(&path, "# mine\n").unwrap();

        run(&path, Platform::Stub, false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");
    }

    #[test]
    fn test_force_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pairgate.toml");
        std::fs::write(&path, "# mine\n").unwrap();

        run(&path, Platform::Fly, true).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(Config::parse(&written).unwrap().platform(), Platform::Fly);
    }
}
