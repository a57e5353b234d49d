//! Binary entry point: wires the settings file, the environment credential
//! store, the Student Records grade source, and the report client into the
//! polling daemon.

use anyhow::{bail, Context, Result};
use automark::config::Settings;
use automark::credentials::{CredentialStore, EnvCredentialStore};
use automark::daemon::Daemon;
use automark::grades::StudentRecordsSource;
use automark::report::{machine_name, ReportClient};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SETTINGS_FILE: &str = "settings.json";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let once = args.iter().any(|a| a == "--once");

    let settings_path = PathBuf::from(SETTINGS_FILE);

    // The subscriber must exist before Settings::load can announce anything,
    // so the filter comes from RUST_LOG, then a quiet peek at the settings
    // file, then the default.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            Settings::peek_log_level(&settings_path).unwrap_or_else(|| "info".to_string()),
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::load(&settings_path)
        .with_context(|| format!("failed to load {SETTINGS_FILE}"))?;

    if args.iter().any(|a| a == "--gui") {
        warn!("this build has no graphical interface, running headless");
    }

    let store = EnvCredentialStore;
    let Some(credentials) = store.get_credentials() else {
        bail!(
            "credentials are not configured; set the AutoMarkCheckVuwUsername, \
             AutoMarkCheckVuwPassword and AutoMarkCheckApiKey environment variables"
        );
    };

    let hostname = settings
        .custom_hostname
        .clone()
        .or_else(machine_name)
        .unwrap_or_else(|| "unknown-host".to_string());
    info!(hostname, "starting up");

    let source = StudentRecordsSource::new(credentials);
    let reporter = ReportClient::new(hostname, settings.courses_public)
        .context("failed to build the report client")?;
    let mut daemon = Daemon::new(source, reporter, store, settings, settings_path);

    if once {
        let succeeded = daemon.run_once().await;
        if !succeeded {
            bail!("grade check failed");
        }
        return Ok(());
    }

    tokio::select! {
        _ = daemon.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }
    Ok(())
}
