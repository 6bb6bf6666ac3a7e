//! Device lifecycle: bring-up, event handling and orderly shutdown.
//!
//! The control loop owns every subsystem. Hardware threads (render, audio,
//! motion, power) post into channels; the loop reacts on the async runtime
//! and only touches the face through its setters.

pub mod demo;
pub mod dispatch;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audio::{
    AudioCodec, AudioError, AudioManager, ByteConsumer, CapturePipeline, PlaybackFeeder,
    PlaybackPipeline,
};
use crate::config::{CredentialStore, DeviceConfig};
use crate::face::{Emotion, FaceEngine, ModeKind, SharedDisplay};
use crate::motion::{Accelerometer, MotionEvent, MotionMonitor};
use crate::net::{
    Command, DeviceEvent, FrameHandler, LinkEvent, NetworkLink, Transport, TransportEvent, Uplink,
};
use crate::power::{PowerEvent, PowerMonitor, PowerSource};

use demo::DemoCycle;
use dispatch::{Applied, FrameRouter};

const STATUS_PERIOD: Duration = Duration::from_secs(30);
const TRANSPORT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub type CodecFactory = Box<dyn FnOnce() -> Result<Arc<dyn AudioCodec>, AudioError> + Send>;

/// Hardware the control loop drives.
pub struct Devices {
    pub display: SharedDisplay,
    /// Called once during bring-up; failure means running without audio.
    pub open_codec: CodecFactory,
    pub accelerometer: Box<dyn Accelerometer>,
    pub power: Box<dyn PowerSource>,
    pub link: Arc<dyn NetworkLink>,
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Touch at panel coordinates.
    Touch { x: i32, y: i32 },
    Shutdown,
}

/// Posts requests into a running control loop.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlRequest>,
}

impl ControlHandle {
    pub fn touch(&self, x: i32, y: i32) -> bool {
        self.tx.send(ControlRequest::Touch { x, y }).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(ControlRequest::Shutdown).is_ok()
    }
}

struct AudioSubsystem {
    manager: AudioManager,
    capture: CapturePipeline,
    /// Per-channel FIFO; absent when it could not be allocated.
    stereo: Option<ByteConsumer>,
    playback: PlaybackPipeline,
    uplink: Uplink,
    live: bool,
}

impl AudioSubsystem {
    fn bring_up(
        codec: Arc<dyn AudioCodec>,
        config: &DeviceConfig,
    ) -> Result<(Self, PlaybackFeeder), AudioError> {
        let manager = AudioManager::init(codec, &config.audio)?;
        let (capture, mono, stereo) = CapturePipeline::new(config.audio.capture.clone())?;
        if stereo.is_none() && config.audio.capture.stereo_buffer_chunks > 0 {
            warn!("Stereo FIFO unavailable, continuing with mono only");
        }
        let (playback, feeder) = PlaybackPipeline::new(config.audio.playback_buffer_bytes)?;
        // Held until a session opens.
        manager.suspend()?;
        Ok((
            Self {
                manager,
                capture,
                stereo,
                playback,
                uplink: Uplink::new(mono),
                live: false,
            },
            feeder,
        ))
    }

    fn start(&mut self, transport: &Transport) {
        if self.live {
            return;
        }
        let codec = self.manager.codec();
        if let Err(e) = self.manager.resume() {
            warn!(error = %e, "Codec resume failed");
        }
        if let Err(e) = self.capture.start(Arc::clone(&codec)) {
            warn!(error = %e, "Capture not started");
        }
        if let Err(e) = self.playback.start(codec) {
            warn!(error = %e, "Playback not started");
        }
        if let Err(e) = self
            .uplink
            .start(transport.clone(), tokio::runtime::Handle::current())
        {
            warn!(error = %e, "Uplink not started");
        }
        self.live = true;
        info!("Audio streaming");
    }

    fn stop(&mut self) {
        if !self.live {
            return;
        }
        self.uplink.stop();
        self.capture.stop();
        self.playback.stop();
        if let Err(e) = self.manager.suspend() {
            debug!(error = %e, "Codec suspend failed");
        }
        if let Some(stereo) = self.stereo.as_mut() {
            stereo.clear();
        }
        self.live = false;
        info!("Audio stopped");
    }
}

pub struct ControlLoop {
    config: DeviceConfig,
    face: FaceEngine,
    power: PowerMonitor,
    power_rx: mpsc::UnboundedReceiver<PowerEvent>,
    motion: MotionMonitor,
    motion_rx: mpsc::UnboundedReceiver<MotionEvent>,
    audio: Option<AudioSubsystem>,
    link: Arc<dyn NetworkLink>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    link_deadline: Option<Instant>,
    transport: Transport,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    frame_handler: Option<FrameHandler>,
    transport_task: Option<JoinHandle<()>>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    requests_tx: mpsc::UnboundedSender<ControlRequest>,
    requests_rx: mpsc::UnboundedReceiver<ControlRequest>,
    credentials: CredentialStore,
    demo: DemoCycle,
    dizzy_until: Option<Instant>,
    next_status: Instant,
}

impl ControlLoop {
    /// Bring subsystems up in order: power, face, codec, audio pipelines,
    /// motion, network link. The transport starts once the link is up.
    ///
    /// Only the face is required; everything else degrades with a log line.
    pub async fn bring_up(
        config: DeviceConfig,
        devices: Devices,
        credentials: CredentialStore,
    ) -> anyhow::Result<Self> {
        let Devices {
            display,
            open_codec,
            accelerometer,
            power: power_source,
            link,
            link_events,
        } = devices;

        info!("Bring-up: power");
        let (power_tx, power_rx) = mpsc::unbounded_channel();
        let mut power = PowerMonitor::new(config.power.clone());
        if let Err(e) = power.start(power_source, power_tx) {
            warn!(error = %e, kind = %e.kind(), "Power monitor unavailable");
        }

        info!("Bring-up: face");
        let face = FaceEngine::new(display, &config.face).context("face engine init")?;
        face.start().context("face render thread")?;

        info!("Bring-up: audio codec");
        let audio = match open_codec() {
            Ok(codec) => match AudioSubsystem::bring_up(codec, &config) {
                Ok((audio, feeder)) => Some((audio, feeder)),
                Err(e) => {
                    error!(error = %e, kind = %e.kind(), "Audio pipelines unavailable");
                    None
                }
            },
            Err(e) => {
                error!(error = %e, kind = %e.kind(), "Audio codec unavailable, continuing without audio");
                None
            }
        };
        let (audio, feeder) = match audio {
            Some((audio, feeder)) => (Some(audio), Some(feeder)),
            None => (None, None),
        };

        info!("Bring-up: motion");
        let (motion_tx, motion_rx) = mpsc::unbounded_channel();
        let mut motion = MotionMonitor::new(config.motion.clone());
        if let Err(e) = motion.start(accelerometer, motion_tx) {
            warn!(error = %e, kind = %e.kind(), "Motion detection unavailable");
        }

        info!("Bring-up: transport");
        let (transport, transport_rx) = Transport::new(config.server.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let mut router = FrameRouter::new(feeder, commands_tx);
        let frame_handler: FrameHandler = Box::new(move |frame| router.route(frame));

        info!(link = link.name(), "Bring-up: network link");
        let stored = credentials.load();
        if stored.is_none() {
            debug!("No stored credentials");
        }
        if let Err(e) = link.connect(stored.as_ref()).await {
            warn!(error = %e, kind = %e.kind(), "Network link connect failed");
        }

        let now = Instant::now();
        let mut demo = DemoCycle::new(config.demo.clone());
        demo.arm(now.into_std());
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        info!(url = %transport.url(), "Bring-up complete");
        Ok(Self {
            link_deadline: Some(now + Duration::from_millis(config.network.link_timeout_ms)),
            config,
            face,
            power,
            power_rx,
            motion,
            motion_rx,
            audio,
            link,
            link_rx: link_events,
            transport,
            transport_rx,
            frame_handler: Some(frame_handler),
            transport_task: None,
            commands_rx,
            requests_tx,
            requests_rx,
            credentials,
            demo,
            dizzy_until: None,
            next_status: now + STATUS_PERIOD,
        })
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            tx: self.requests_tx.clone(),
        }
    }

    pub fn face(&self) -> &FaceEngine {
        &self.face
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Run until `shutdown` resolves or a shutdown request arrives, then
    /// tear everything down.
    pub async fn run<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let wake = self.next_wakeup();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(req) = self.requests_rx.recv() => match req {
                    ControlRequest::Shutdown => {
                        info!("Shutdown requested");
                        break;
                    }
                    ControlRequest::Touch { x, y } => self.on_touch(x, y).await,
                },
                Some(cmd) = self.commands_rx.recv() => self.on_command(cmd),
                Some(event) = self.transport_rx.recv() => self.on_transport(event).await,
                Some(event) = self.link_rx.recv() => self.on_link(event),
                Some(event) = self.motion_rx.recv() => self.on_motion(event).await,
                Some(event) = self.power_rx.recv() => self.on_power(event).await,
                _ = tokio::time::sleep_until(wake) => self.on_timer(Instant::now()),
            }
        }
        self.shutdown().await;
        Ok(())
    }

    fn next_wakeup(&self) -> Instant {
        [
            self.link_deadline,
            self.dizzy_until,
            self.demo.deadline().map(Instant::from_std),
        ]
        .into_iter()
        .flatten()
        .fold(self.next_status, Instant::min)
    }

    fn on_command(&mut self, cmd: Command) {
        if self.demo.stop() {
            info!("Demo stopped by server command");
        }
        let name = cmd.name().to_string();
        match dispatch::apply(&self.face, cmd) {
            Ok(Applied::Streaming(on)) => match self.audio.as_ref() {
                Some(audio) => audio.uplink.set_streaming(on),
                None => debug!(cmd = %name, "No audio, ignoring"),
            },
            Ok(_) => {}
            Err(e) => warn!(cmd = %name, error = %e, kind = %e.kind(), "Command not applied"),
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!(url = %self.transport.url(), "Server connected");
                if self.demo.stop() && !matches!(self.face.mode(), Ok(ModeKind::Face)) {
                    self.face_call("clear_display", self.face.clear_display());
                }
                self.face_call("emotion", self.face.set_emotion(Emotion::Happy));
                if let Some(audio) = self.audio.as_mut() {
                    audio.start(&self.transport);
                }
                let hello = DeviceEvent::Hello {
                    device: self.config.server.device_name.clone(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    session: uuid::Uuid::new_v4().to_string(),
                };
                self.send_event(hello).await;
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Server disconnected");
                // Joining the uplink must not hold a runtime worker: its
                // thread may be waiting on this runtime to finish a send.
                if let Some(mut audio) = self.audio.take() {
                    self.audio = off_runtime("audio stop", move || {
                        audio.stop();
                        audio
                    })
                    .await;
                }
                self.face_call("emotion", self.face.set_emotion(Emotion::Confused));
                self.demo.arm(std::time::Instant::now());
            }
            TransportEvent::Error(reason) => {
                debug!(reason = %reason, "Transport error");
                self.demo.arm(std::time::Instant::now());
            }
        }
    }

    fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up => {
                info!(link = self.link.name(), "Network link up");
                self.link_deadline = None;
                if let Some(handler) = self.frame_handler.take() {
                    match self.transport.start(handler) {
                        Ok(task) => self.transport_task = Some(task),
                        Err(e) => error!(error = %e, "Transport start failed"),
                    }
                }
            }
            LinkEvent::Down => {
                warn!(link = self.link.name(), "Network link down");
                self.face_call("emotion", self.face.set_emotion(Emotion::Sad));
                self.demo.arm(std::time::Instant::now());
            }
        }
    }

    async fn on_motion(&mut self, event: MotionEvent) {
        let MotionEvent::Shake { intensity } = event;
        self.face_call("dizzy", self.face.set_dizzy(true));
        self.dizzy_until = Some(Instant::now() + self.motion.cooldown());
        self.send_event(DeviceEvent::Shake { intensity }).await;
    }

    async fn on_power(&mut self, event: PowerEvent) {
        match event {
            PowerEvent::ButtonPress => {
                if matches!(self.face.mode(), Ok(ModeKind::Timer)) {
                    if let Err(e) = self.face.timer_toggle() {
                        debug!(error = %e, "Timer toggle skipped");
                    }
                } else {
                    self.face_call("blink", self.face.blink());
                }
            }
            PowerEvent::ButtonLong => {
                warn!("Factory reset: clearing stored credentials");
                if let Err(e) = self.credentials.clear() {
                    error!(error = %e, "Factory reset failed");
                }
                self.face_call("emotion", self.face.set_emotion(Emotion::Surprised));
            }
            PowerEvent::BatteryLow { percent } => {
                warn!(percent, "Battery low");
                self.face_call("emotion", self.face.set_emotion(Emotion::Sad));
                let status = self.power.status();
                self.send_event(DeviceEvent::Battery {
                    percent,
                    charging: status.is_charging(),
                })
                .await;
            }
            PowerEvent::VbusInsert => {
                info!("External power connected");
                self.face_call("emotion", self.face.set_emotion(Emotion::Happy));
            }
            PowerEvent::VbusRemove => info!("External power removed"),
            PowerEvent::ChargeStart => info!("Charging"),
            PowerEvent::ChargeDone => {
                info!("Charge complete");
                let status = self.power.status();
                self.send_event(DeviceEvent::Battery {
                    percent: status.percent,
                    charging: false,
                })
                .await;
            }
        }
    }

    async fn on_touch(&mut self, x: i32, y: i32) {
        let Some(eye) = self.face.hit_test_eye(x, y) else {
            return;
        };
        self.face_call("poke", self.face.poke_eye(eye));
        self.send_event(DeviceEvent::Poke {
            eye: eye.as_str().to_string(),
        })
        .await;
    }

    fn on_timer(&mut self, now: Instant) {
        if self.link_deadline.is_some_and(|d| now >= d) {
            self.link_deadline = None;
            if !self.link.is_up() {
                warn!(
                    timeout_ms = self.config.network.link_timeout_ms,
                    "Network link timed out, starting demo"
                );
                self.face_call("emotion", self.face.set_emotion(Emotion::Sad));
                self.demo.start_now(now.into_std());
            }
        }

        if self.dizzy_until.is_some_and(|d| now >= d) {
            self.dizzy_until = None;
            self.face_call("dizzy", self.face.set_dizzy(false));
        }

        if let Some(step) = self.demo.poll(now.into_std()) {
            self.face_call("demo", dispatch::apply_demo_step(&self.face, step));
        }

        if now >= self.next_status {
            self.next_status = now + STATUS_PERIOD;
            self.log_status();
        }
    }

    fn log_status(&self) {
        let battery = self.power.status();
        // Busy engine: log the rest without the face fields.
        let mode = self.face.mode().ok();
        let emotion = self.face.emotion().ok();
        match self.audio.as_ref() {
            Some(audio) => {
                let capture = audio.capture.stats();
                let playback = audio.playback.stats();
                let uplink = audio.uplink.stats();
                info!(
                    transport = %self.transport.state(),
                    mode = ?mode,
                    emotion = ?emotion,
                    fps = self.face.fps(),
                    capture_chunks = capture.chunks.load(std::sync::atomic::Ordering::Relaxed),
                    capture_dropped = capture.mono_dropped.get(),
                    playback = %audio.playback.state(),
                    playback_fill = audio.playback.fill_level(),
                    silence_chunks = playback.silence_chunks.load(std::sync::atomic::Ordering::Relaxed),
                    uplink_sent = uplink.sent.load(std::sync::atomic::Ordering::Relaxed),
                    stereo_backlog = ?audio.stereo.as_ref().map(|s| s.available()),
                    battery = %battery,
                    "Status"
                );
            }
            None => info!(
                transport = %self.transport.state(),
                mode = ?mode,
                emotion = ?emotion,
                fps = self.face.fps(),
                battery = %battery,
                "Status (no audio)"
            ),
        }
    }

    async fn send_event(&self, event: DeviceEvent) {
        if !self.transport.is_open() {
            return;
        }
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Event not encodable");
                return;
            }
        };
        if let Err(e) = self.transport.send_text(&json).await {
            debug!(error = %e, "Event dropped");
        }
    }

    /// Face setters fail only on lock timeouts; the next tick catches up.
    fn face_call(&self, what: &str, result: Result<(), crate::face::FaceError>) {
        if let Err(e) = result {
            debug!(what, error = %e, "Face update skipped");
        }
    }

    /// Teardown order: transport, audio, motion, power, renderer.
    async fn shutdown(mut self) {
        info!("Shutting down");
        self.transport.stop();
        if let Some(task) = self.transport_task.take() {
            if tokio::time::timeout(TRANSPORT_STOP_TIMEOUT, task).await.is_err() {
                warn!("Transport task did not stop in time");
            }
        }
        let audio = self.audio.take();
        let ControlLoop {
            mut motion,
            mut power,
            link,
            face,
            ..
        } = self;
        off_runtime("teardown", move || {
            if let Some(mut audio) = audio {
                audio.stop();
            }
            motion.stop();
            power.stop();
            link.disconnect();
            face.stop();
        })
        .await;
        info!("Shutdown complete");
    }
}

/// Run thread-joining work on the blocking pool.
async fn off_runtime<T, F>(what: &'static str, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(what, error = %e, "Blocking task failed");
            None
        }
    }
}
