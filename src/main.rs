//! Companion device core, desktop host entry point.
//!
//! Stands in for the board: cpal for audio, an in-memory retained display,
//! a still accelerometer, mains power and the host's own network.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use companion_core::audio::{AudioCodec, CpalCodec};
use companion_core::config::{get_data_dir, get_log_dir, CredentialStore, DeviceConfig};
use companion_core::control::{ControlLoop, Devices};
use companion_core::face::MemoryDisplay;
use companion_core::logging;
use companion_core::motion::StillAccelerometer;
use companion_core::net::HostLink;
use companion_core::power::MainsPower;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::try_init(&get_log_dir()) {
        eprintln!("logging unavailable: {e}");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "Companion core starting");

    let data_dir = get_data_dir();
    let config = DeviceConfig::load();
    info!(
        data_dir = %data_dir.display(),
        server = %config.server.url(),
        "Configuration loaded"
    );

    let geometry = &config.face.geometry;
    let display = MemoryDisplay::new(geometry.width, geometry.height).into_shared();
    let (link, link_events) = HostLink::new();
    let devices = Devices {
        display,
        open_codec: Box::new(|| CpalCodec::open().map(|c| Arc::new(c) as Arc<dyn AudioCodec>)),
        accelerometer: Box::new(StillAccelerometer),
        power: Box::new(MainsPower),
        link: Arc::new(link),
        link_events,
    };

    let control = ControlLoop::bring_up(config, devices, CredentialStore::new(&data_dir))
        .await
        .context("bring-up failed")?;

    control
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Ctrl-C handler unavailable");
                std::future::pending::<()>().await;
            }
        })
        .await
}
