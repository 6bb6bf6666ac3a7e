use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use super::dispatch::{apply, Applied, FrameRouter};
use super::*;
use crate::audio::test_codec::FakeCodec;
use crate::audio::{CHUNK_BYTES, CHUNK_DURATION};
use crate::config::Credentials;
use crate::face::{FaceConfig, MemoryDisplay, MouthShape, Rgb, TimerSpec};
use crate::motion::StillAccelerometer;
use crate::net::{HostLink, InboundFrame};
use crate::power::MainsPower;

const TICK: f32 = 0.016;

fn engine() -> (FaceEngine, Arc<Mutex<MemoryDisplay>>) {
    let mem = Arc::new(Mutex::new(MemoryDisplay::new(502, 410)));
    let shared: SharedDisplay = mem.clone();
    let config = FaceConfig {
        seed: Some(5),
        ..FaceConfig::default()
    };
    (FaceEngine::new(shared, &config).unwrap(), mem)
}

fn run(engine: &FaceEngine, seconds: f32) {
    for _ in 0..(seconds / TICK).round() as usize {
        engine.tick(TICK).unwrap();
    }
}

/// Router with no playback plus the queue it feeds.
fn router() -> (FrameRouter, mpsc::UnboundedReceiver<Command>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FrameRouter::new(None, tx), rx)
}

fn deliver(
    router: &mut FrameRouter,
    rx: &mut mpsc::UnboundedReceiver<Command>,
    engine: &FaceEngine,
    json: &str,
) -> Vec<Applied> {
    router.route(InboundFrame::Text(json));
    let mut applied = Vec::new();
    while let Ok(cmd) = rx.try_recv() {
        applied.push(apply(engine, cmd).unwrap());
    }
    applied
}

// ---------------------------------------------------------------------------
// Scenarios over the wire format
// ---------------------------------------------------------------------------

#[test]
fn test_emotion_command_reaches_smile() {
    let (engine, mem) = engine();
    let (mut router, mut rx) = router();
    run(&engine, 0.1);
    assert_eq!(engine.params().unwrap().mouth_curve, 0.0);

    deliver(&mut router, &mut rx, &engine, r#"{"cmd":"emotion","value":"happy"}"#);
    run(&engine, 1.0);

    assert!((engine.params().unwrap().mouth_curve - 0.8).abs() < 1e-3);
    assert_eq!(engine.mouth_shape().unwrap(), Some(MouthShape::Smile));
    let ids = engine.widgets().unwrap();
    let d = mem.lock();
    assert!(!d.widget(ids.mouth_arc).unwrap().hidden);
    assert!(d.widget(ids.mouth_bar).unwrap().hidden);
}

#[test]
fn test_gaze_command_leans_left() {
    let (engine, _mem) = engine();
    let (mut router, mut rx) = router();
    run(&engine, 0.1);

    deliver(&mut router, &mut rx, &engine, r#"{"cmd":"gaze","x":0.0,"y":0.5}"#);
    run(&engine, 0.5);

    assert_eq!(engine.gaze_target().unwrap(), (0.0, 0.5));
    let (ox, _) = engine.face_offset().unwrap();
    let (max_x, _) = engine.geometry().max_shift_px();
    assert!(ox < -0.6 * max_x);
}

#[test]
fn test_surprised_command_opens_mouth() {
    let (engine, mem) = engine();
    let (mut router, mut rx) = router();
    run(&engine, 0.1);

    deliver(&mut router, &mut rx, &engine, r#"{"cmd":"emotion","value":"surprised"}"#);
    run(&engine, 0.4);

    assert_eq!(engine.mouth_shape().unwrap(), Some(MouthShape::O));
    let arc = mem.lock().widget(engine.widgets().unwrap().mouth_arc).unwrap().clone();
    assert!(!arc.hidden);
    assert_eq!((arc.arc.0, arc.arc.1), (0, 360));
}

#[test]
fn test_pixel_art_command_drops_out_of_grid() {
    let (engine, mem) = engine();
    let (mut router, mut rx) = router();
    run(&engine, 0.05);

    deliver(
        &mut router,
        &mut rx,
        &engine,
        r##"{"cmd":"pixel_art","pixels":[{"x":0,"y":0,"c":"#FF0000"},{"x":12,"y":0,"c":"#00FF00"}],"bg":"#000000"}"##,
    );
    engine.tick(TICK).unwrap();
    assert_eq!(engine.mode().unwrap(), ModeKind::PixelArt);
    let ids = engine.widgets().unwrap();
    assert_eq!(ids.cells.len(), 1);
    {
        let d = mem.lock();
        assert_eq!(d.widget(ids.cells[0]).unwrap().color, Rgb(0xFF0000));
        assert!(ids.eyes.iter().all(|&e| d.widget(e).unwrap().hidden));
    }

    deliver(&mut router, &mut rx, &engine, r#"{"cmd":"pixel_art_clear"}"#);
    engine.tick(TICK).unwrap();
    assert_eq!(engine.mode().unwrap(), ModeKind::Face);
    let d = mem.lock();
    assert!(ids.eyes.iter().all(|&e| !d.widget(e).unwrap().hidden));
}

#[test]
fn test_commands_apply_in_receive_order() {
    let (engine, _mem) = engine();
    let (mut router, mut rx) = router();
    router.route(InboundFrame::Text(r#"{"cmd":"emotion","value":"happy"}"#));
    router.route(InboundFrame::Text(r#"{"cmd":"emotion","value":"sad"}"#));
    router.route(InboundFrame::Text(r#"{"cmd":"gaze","x":0.2,"y":0.9}"#));
    while let Ok(cmd) = rx.try_recv() {
        apply(&engine, cmd).unwrap();
    }
    assert_eq!(engine.emotion().unwrap(), Emotion::Sad);
    assert_eq!(engine.gaze_target().unwrap(), (0.2, 0.9));
}

#[test]
fn test_bad_commands_are_rejected_and_unknown_ignored() {
    let (engine, _mem) = engine();
    let (mut router, mut rx) = router();
    let applied = deliver(&mut router, &mut rx, &engine, r#"{"cmd":"text","content":"x","color":"red"}"#);
    assert!(applied.is_empty());
    deliver(&mut router, &mut rx, &engine, "not json");
    assert_eq!(router.rejected(), 2);
    assert_eq!(engine.mode().unwrap(), ModeKind::Face);

    let applied = deliver(&mut router, &mut rx, &engine, r#"{"cmd":"dance"}"#);
    assert_eq!(applied, vec![Applied::Ignored]);
}

#[test]
fn test_audio_commands_map_to_streaming() {
    let (engine, _mem) = engine();
    let (mut router, mut rx) = router();
    assert_eq!(
        deliver(&mut router, &mut rx, &engine, r#"{"cmd":"audio_stop"}"#),
        vec![Applied::Streaming(false)]
    );
    assert_eq!(
        deliver(&mut router, &mut rx, &engine, r#"{"cmd":"audio_start"}"#),
        vec![Applied::Streaming(true)]
    );
}

#[test]
fn test_text_then_clear_redraws_face() {
    let (engine, mem) = engine();
    let (mut router, mut rx) = router();
    run(&engine, 0.05);
    deliver(
        &mut router,
        &mut rx,
        &engine,
        r##"{"cmd":"text","content":"hi","size":"large","color":"#00FF00"}"##,
    );
    engine.tick(TICK).unwrap();
    assert_eq!(engine.mode().unwrap(), ModeKind::Text);
    let ids = engine.widgets().unwrap();
    assert_eq!(mem.lock().widget(ids.title).unwrap().text, "hi");

    deliver(&mut router, &mut rx, &engine, r#"{"cmd":"text_clear"}"#);
    engine.tick(TICK).unwrap();
    let d = mem.lock();
    assert!(ids.eyes.iter().all(|&e| !d.widget(e).unwrap().hidden));
    assert!(d.widget(ids.title).unwrap().hidden);
}

// ---------------------------------------------------------------------------
// Binary frames into playback
// ---------------------------------------------------------------------------

#[test]
fn test_no_binary_frames_plays_silence() {
    let codec = Arc::new(FakeCodec::new(1));
    let (mut playback, feeder) = PlaybackPipeline::new(8 * CHUNK_BYTES).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let _router = FrameRouter::new(Some(feeder), tx);
    playback.start(codec.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    playback.stop();

    let written = codec.written_bytes();
    let expected_chunks = (200 / CHUNK_DURATION.as_millis()) as usize;
    assert!(written.len() >= (expected_chunks - 2) * CHUNK_BYTES);
    assert_eq!(written.len() % CHUNK_BYTES, 0);
    assert!(written.iter().all(|&b| b == 0));
}

#[test]
fn test_binary_frames_are_played_and_odd_frames_dropped() {
    let codec = Arc::new(FakeCodec::new(1));
    let (mut playback, feeder) = PlaybackPipeline::new(8 * CHUNK_BYTES).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut router = FrameRouter::new(Some(feeder), tx);

    router.route(InboundFrame::Binary(&[0x55; 3]));
    router.route(InboundFrame::Binary(&[0x11; CHUNK_BYTES]));
    playback.start(codec.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(60));
    playback.stop();

    let written = codec.written_bytes();
    assert_eq!(&written[..CHUNK_BYTES], &[0x11; CHUNK_BYTES][..]);
    assert!(!written.contains(&0x55));
}

// ---------------------------------------------------------------------------
// Control loop handlers
// ---------------------------------------------------------------------------

struct Rig {
    control: ControlLoop,
    mem: Arc<Mutex<MemoryDisplay>>,
    codec: Arc<FakeCodec>,
    _dir: tempfile::TempDir,
}

async fn rig(config: DeviceConfig) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let mem = Arc::new(Mutex::new(MemoryDisplay::new(502, 410)));
    let codec = Arc::new(FakeCodec::new(2));
    let open: Arc<dyn AudioCodec> = codec.clone();
    let (link, link_events) = HostLink::new();
    let devices = Devices {
        display: mem.clone(),
        open_codec: Box::new(move || Ok(open)),
        accelerometer: Box::new(StillAccelerometer),
        power: Box::new(MainsPower),
        link: Arc::new(link),
        link_events,
    };
    let control = ControlLoop::bring_up(config, devices, CredentialStore::new(dir.path()))
        .await
        .unwrap();
    Rig {
        control,
        mem,
        codec,
        _dir: dir,
    }
}

fn quick_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.face.seed = Some(3);
    config.motion.sample_period_ms = 50;
    config.power.poll_ms = 50;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bring_up_without_codec_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let (link, link_events) = HostLink::new();
    let devices = Devices {
        display: MemoryDisplay::new(502, 410).into_shared(),
        open_codec: Box::new(|| Err(AudioError::Device("test".into()))),
        accelerometer: Box::new(StillAccelerometer),
        power: Box::new(MainsPower),
        link: Arc::new(link),
        link_events,
    };
    let control = ControlLoop::bring_up(quick_config(), devices, CredentialStore::new(dir.path()))
        .await
        .unwrap();
    assert!(control.audio.is_none());
    assert!(control.face().is_running());
    assert!(control.link.is_up());
    control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_codec_is_held_suspended_until_session() {
    let rig = rig(quick_config()).await;
    assert!(rig.control.audio.is_some());
    assert!(rig.codec.is_suspended());
    rig.control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shake_makes_face_dizzy_until_cooldown() {
    let mut rig = rig(quick_config()).await;
    let control = &mut rig.control;
    control.on_motion(MotionEvent::Shake { intensity: 0.7 }).await;
    assert!(control.face().is_dizzy().unwrap());
    let until = control.dizzy_until.unwrap();
    assert!(until >= Instant::now() + Duration::from_millis(1900));

    control.on_timer(until);
    assert!(!control.face().is_dizzy().unwrap());
    assert!(control.dizzy_until.is_none());
    rig.control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_long_press_clears_credentials() {
    let mut rig = rig(quick_config()).await;
    let creds = Credentials {
        ssid: "home".into(),
        password: "pw".into(),
    };
    rig.control.credentials.save(&creds).unwrap();
    assert!(rig.control.credentials.load().is_some());

    rig.control.on_power(PowerEvent::ButtonLong).await;
    assert!(rig.control.credentials.load().is_none());
    rig.control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_short_press_pauses_timer() {
    let mut rig = rig(quick_config()).await;
    rig.control
        .face()
        .show_timer(TimerSpec {
            minutes: 1,
            seconds: 0,
            label: String::new(),
            running: true,
        })
        .unwrap();
    rig.control.on_power(PowerEvent::ButtonPress).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let title = rig.control.face().widgets().unwrap().title;
    assert_eq!(rig.mem.lock().widget(title).unwrap().text, "01:00");
    rig.control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_battery_low_saddens_face() {
    let mut rig = rig(quick_config()).await;
    rig.control.on_power(PowerEvent::BatteryLow { percent: 9 }).await;
    assert_eq!(rig.control.face().emotion().unwrap(), Emotion::Sad);
    rig.control.on_power(PowerEvent::VbusInsert).await;
    assert_eq!(rig.control.face().emotion().unwrap(), Emotion::Happy);
    rig.control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_link_timeout_starts_demo() {
    let mut config = quick_config();
    config.network.link_timeout_ms = 0;
    let mut rig = rig(config).await;
    let control = &mut rig.control;
    // The host link is up, so hold it down for this test.
    control.link.disconnect();

    control.on_timer(Instant::now());
    assert!(control.demo.is_running());
    assert_eq!(control.face().emotion().unwrap(), Emotion::Neutral);

    // Any server command ends the demo.
    control.on_command(Command::Emotion(Emotion::Angry));
    assert!(!control.demo.is_running());
    assert_eq!(control.face().emotion().unwrap(), Emotion::Angry);
    rig.control.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_confuses_face_and_arms_demo() {
    let mut rig = rig(quick_config()).await;
    rig.control.demo.stop();
    rig.control
        .on_transport(TransportEvent::Disconnected {
            reason: "bye".into(),
        })
        .await;
    assert_eq!(rig.control.face().emotion().unwrap(), Emotion::Confused);
    assert!(rig.control.demo.is_armed());
    assert!(!rig.control.demo.is_running());
    rig.control.shutdown().await;
}

// ---------------------------------------------------------------------------
// Live session against a local server
// ---------------------------------------------------------------------------

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = quick_config();
    config.server.port = port;
    config.server.reconnect_ms = 60_000;
    let rig = rig(config).await;
    let face = rig.control.face().clone();
    let handle = rig.control.handle();
    let codec = rig.codec.clone();

    let session = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let hello = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                Message::Binary(_) => continue,
                other => panic!("unexpected {other:?}"),
            }
        };
        let hello: serde_json::Value = serde_json::from_str(&hello).unwrap();
        assert_eq!(hello["event"], "hello");
        assert_eq!(hello["device"], "companion");
        assert_eq!(face.emotion().unwrap(), Emotion::Happy);
        assert!(!codec.is_suspended());

        ws.send(Message::Text(r#"{"cmd":"emotion","value":"surprised"}"#.into()))
            .await
            .unwrap();
        wait_for("surprised", || face.emotion().ok() == Some(Emotion::Surprised)).await;

        ws.send(Message::Binary(vec![0x22; CHUNK_BYTES])).await.unwrap();
        wait_for("playback", || codec.written_bytes().contains(&0x22)).await;

        // Microphone audio flows upstream as binary frames.
        codec.push_capture(&[0x01; CHUNK_BYTES * 2 * 4]);
        let upstream = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Binary(data) => break data,
                _ => continue,
            }
        };
        assert_eq!(upstream.len(), CHUNK_BYTES);

        ws.close(None).await.unwrap();
        drop(ws);
        wait_for("confused", || face.emotion().ok() == Some(Emotion::Confused)).await;
        assert!(handle.shutdown());
    };

    let (result, ()) = tokio::join!(rig.control.run(std::future::pending()), session);
    result.unwrap();
    assert!(!face.is_running());
}

#[tokio::test]
async fn test_disconnect_mid_uplink_on_current_thread_runtime() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = quick_config();
    config.server.port = port;
    config.server.reconnect_ms = 60_000;
    let rig = rig(config).await;
    let face = rig.control.face().clone();
    let handle = rig.control.handle();
    let codec = rig.codec.clone();

    let session = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        wait_for("happy", || face.emotion().ok() == Some(Emotion::Happy)).await;

        // Keep the uplink busy so teardown races an in-flight send.
        codec.push_capture(&[0x01; CHUNK_BYTES * 2 * 64]);
        loop {
            if let Message::Binary(_) = ws.next().await.unwrap().unwrap() {
                break;
            }
        }
        drop(ws);
        wait_for("confused", || face.emotion().ok() == Some(Emotion::Confused)).await;
        assert!(handle.shutdown());
    };

    let run = async { tokio::join!(rig.control.run(std::future::pending()), session) };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("control loop stalled");
    result.unwrap();
    assert!(!face.is_running());
}
