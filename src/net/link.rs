//! Network link seam (Wi-Fi on the device, the host network here).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Credentials;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// How long bring-up waits for the link before falling back to the demo.
    pub link_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            link_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Up,
    Down,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no credentials stored")]
    NoCredentials,
    #[error("link failed: {0}")]
    Failed(String),
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCredentials => ErrorKind::State,
            Self::Failed(_) => ErrorKind::TransientIo,
        }
    }
}

/// Common trait for network links (dyn-compatible).
///
/// `connect` starts association; completion is reported as
/// [`LinkEvent::Up`] on the link's event channel.
pub trait NetworkLink: Send + Sync {
    fn connect(
        &self,
        credentials: Option<&Credentials>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LinkError>> + Send + '_>>;

    fn disconnect(&self);

    fn is_up(&self) -> bool;

    fn name(&self) -> &str;
}

/// The host is already networked; connecting just reports the link up.
pub struct HostLink {
    up: AtomicBool,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl HostLink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                up: AtomicBool::new(false),
                events: tx,
            },
            rx,
        )
    }

    fn set_up(&self, up: bool) {
        if self.up.swap(up, Ordering::AcqRel) != up {
            let _ = self.events.send(if up { LinkEvent::Up } else { LinkEvent::Down });
        }
    }
}

impl NetworkLink for HostLink {
    fn connect(
        &self,
        credentials: Option<&Credentials>,
    ) -> Pin<Box<dyn Future<Output = Result<(), LinkError>> + Send + '_>> {
        let ssid = credentials.map(|c| c.ssid.clone());
        Box::pin(async move {
            match ssid {
                Some(ssid) => info!(ssid = %ssid, "Host link ignores stored credentials"),
                None => info!("Host link up"),
            }
            self.set_up(true);
            Ok(())
        })
    }

    fn disconnect(&self) {
        self.set_up(false);
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        "host"
    }
}
