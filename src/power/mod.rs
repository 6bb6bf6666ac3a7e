//! Power management: supply status, charge state and the power button.
//!
//! A [`PowerMonitor`] polls a [`PowerSource`] and turns status changes into
//! [`PowerEvent`]s for the control loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub poll_ms: u64,
    /// Crossing below this percentage raises [`PowerEvent::BatteryLow`].
    pub low_battery_percent: u8,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            poll_ms: 500,
            low_battery_percent: 15,
        }
    }
}

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("power controller read failed: {0}")]
    Read(String),
    #[error("power monitor already running")]
    AlreadyRunning,
    #[error("failed to spawn power thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl PowerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Read(_) => ErrorKind::TransientIo,
            Self::AlreadyRunning => ErrorKind::State,
            Self::Spawn(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    #[default]
    None,
    Trickle,
    Cc,
    Cv,
    Done,
}

impl ChargeState {
    pub fn is_charging(self) -> bool {
        matches!(self, Self::Trickle | Self::Cc | Self::Cv)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerStatus {
    pub vbus: bool,
    pub battery_present: bool,
    pub charge: ChargeState,
    /// 0..=100; meaningless without a battery.
    pub percent: u8,
}

impl PowerStatus {
    pub fn is_charging(&self) -> bool {
        self.charge.is_charging()
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.battery_present {
            write!(f, "{}%", self.percent)?;
            if self.is_charging() {
                write!(f, " charging")?;
            }
            Ok(())
        } else if self.vbus {
            write!(f, "mains")
        } else {
            write!(f, "unknown")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPress {
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    VbusInsert,
    VbusRemove,
    ChargeStart,
    ChargeDone,
    BatteryLow { percent: u8 },
    ButtonPress,
    ButtonLong,
}

/// Power management IC, or whatever stands in for one.
pub trait PowerSource: Send {
    fn status(&mut self) -> Result<PowerStatus, PowerError>;

    /// Pending button press since the last call, if any.
    fn poll_button(&mut self) -> Option<ButtonPress>;
}

/// Host machine on mains: always powered, no battery, no button.
#[derive(Debug, Default)]
pub struct MainsPower;

impl PowerSource for MainsPower {
    fn status(&mut self) -> Result<PowerStatus, PowerError> {
        Ok(PowerStatus {
            vbus: true,
            battery_present: false,
            charge: ChargeState::None,
            percent: 100,
        })
    }

    fn poll_button(&mut self) -> Option<ButtonPress> {
        None
    }
}

/// Events implied by moving from `prev` to `cur`.
pub fn derive_events(prev: &PowerStatus, cur: &PowerStatus, low_percent: u8) -> Vec<PowerEvent> {
    let mut events = Vec::new();
    if cur.vbus && !prev.vbus {
        events.push(PowerEvent::VbusInsert);
    }
    if !cur.vbus && prev.vbus {
        events.push(PowerEvent::VbusRemove);
    }
    if cur.is_charging() && !prev.is_charging() {
        events.push(PowerEvent::ChargeStart);
    }
    if cur.charge == ChargeState::Done && prev.charge != ChargeState::Done {
        events.push(PowerEvent::ChargeDone);
    }
    if cur.battery_present
        && cur.percent < low_percent
        && (!prev.battery_present || prev.percent >= low_percent)
    {
        events.push(PowerEvent::BatteryLow {
            percent: cur.percent,
        });
    }
    events
}

pub struct PowerMonitor {
    config: PowerConfig,
    status: Arc<Mutex<PowerStatus>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PowerMonitor {
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            status: Arc::new(Mutex::new(PowerStatus::default())),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Read the initial status, then poll on a thread.
    pub fn start(
        &mut self,
        mut source: Box<dyn PowerSource>,
        events: mpsc::UnboundedSender<PowerEvent>,
    ) -> Result<PowerStatus, PowerError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(PowerError::AlreadyRunning);
        }
        let initial = match source.status() {
            Ok(s) => s,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };
        *self.status.lock() = initial;
        info!(status = %initial, vbus = initial.vbus, "Power manager ready");

        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.status);
        let period = Duration::from_millis(self.config.poll_ms.max(1));
        let low = self.config.low_battery_percent;

        let spawned = std::thread::Builder::new()
            .name("power".into())
            .spawn(move || {
                let mut prev = initial;
                let mut warned = false;
                while running.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    match source.status() {
                        Ok(cur) => {
                            warned = false;
                            for event in derive_events(&prev, &cur, low) {
                                debug!(?event, "Power event");
                                let _ = events.send(event);
                            }
                            *shared.lock() = cur;
                            prev = cur;
                        }
                        Err(e) if !warned => {
                            warn!(error = %e, "Power status read failed");
                            warned = true;
                        }
                        Err(_) => {}
                    }
                    let button = match source.poll_button() {
                        Some(ButtonPress::Short) => Some(PowerEvent::ButtonPress),
                        Some(ButtonPress::Long) => Some(PowerEvent::ButtonLong),
                        None => None,
                    };
                    if let Some(event) = button {
                        info!(?event, "Power button");
                        let _ = events.send(event);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(initial)
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Power thread panicked");
            }
        }
    }

    /// Last polled status.
    pub fn status(&self) -> PowerStatus {
        *self.status.lock()
    }
}

impl Drop for PowerMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
