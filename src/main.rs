//! `pullwire` - print Pull server events as JSON lines.
//!
//! Usage: `pullwire [SETTINGS_PATH]` (default `~/.pullwire/settings.json`).
//! Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pullwire::adapters::{FileCredentialProvider, TungsteniteConnector};
use pullwire::config::{ClientSettings, PullConfig};
use pullwire::connection::ConnectionManager;

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pullwire=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => ClientSettings::default_path()?,
    };
    let settings = ClientSettings::load(&settings_path)
        .wrap_err_with(|| format!("loading {}", settings_path.display()))?;

    let credentials = match &settings.session_file {
        Some(path) => FileCredentialProvider::at(path),
        None => FileCredentialProvider::new().map_err(|e| eyre!("{}", e))?,
    };
    info!("Reading session from {}", credentials.path().display());

    let manager = Arc::new(ConnectionManager::new(
        Arc::new(TungsteniteConnector::new()),
        Arc::new(credentials),
        PullConfig::from_env(),
    ));
    let mut events = manager
        .events()
        .ok_or_else(|| eyre!("event stream already taken"))?;

    let stopper = Arc::clone(&manager);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupted, stopping");
        stopper.stop();
    }) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }

    manager.start(settings.channels.clone(), settings.connection_params());

    while let Some(event) = events.blocking_recv() {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Could not serialize event: {}", e),
        }
    }

    manager.stop();
    info!("Final state: {}", manager.state());
    Ok(())
}
