//! JSON command codec for the companion link.
//!
//! Inbound: one command object per text frame, discriminated by a string
//! `cmd` field. Field access is lenient in the same way for every command: a
//! field of the wrong JSON type is treated as absent and its default applies.
//! Colors are the exception; a present but malformed color rejects the whole
//! command.
//!
//! Outbound: small event objects tagged by `event`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::face::{
    AnimationKind, ClockSpec, Emotion, FontSize, Pixel, PixelArt, Rgb, TextContent, TimerSpec,
    Weather, WeatherIcon,
};

/// Longest text accepted for the text screen, in bytes.
pub const MAX_TEXT_BYTES: usize = 512;

/// Default foreground for text.
pub const DEFAULT_FG: Rgb = Rgb::WHITE;

/// Default background for text and pixel art.
pub const DEFAULT_BG: Rgb = Rgb::FACE_BG;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command is not a JSON object")]
    NotAnObject,
    #[error("missing or non-string `cmd` field")]
    MissingCmd,
    #[error("invalid color {0:?}")]
    InvalidColor(String),
    #[error("invalid `{field}`: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

/// A decoded inbound command. Payload vectors are owned and released with
/// the command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Emotion(Emotion),
    Gaze { x: f32, y: f32 },
    Text(TextContent),
    TextClear,
    PixelArt(PixelArt),
    PixelArtClear,
    AudioStart,
    AudioStop,
    Weather(Weather),
    Timer(TimerSpec),
    Clock(ClockSpec),
    Animation(AnimationKind),
    ClearDisplay,
    /// Well-formed but not understood; logged and ignored by the dispatcher.
    Unknown { name: String },
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Self::Emotion(_) => "emotion",
            Self::Gaze { .. } => "gaze",
            Self::Text(_) => "text",
            Self::TextClear => "text_clear",
            Self::PixelArt(_) => "pixel_art",
            Self::PixelArtClear => "pixel_art_clear",
            Self::AudioStart => "audio_start",
            Self::AudioStop => "audio_stop",
            Self::Weather(_) => "weather",
            Self::Timer(_) => "timer",
            Self::Clock(_) => "clock",
            Self::Animation(_) => "animation",
            Self::ClearDisplay => "clear_display",
            Self::Unknown { name } => name,
        }
    }
}

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

/// Parse `#RRGGBB` or `RRGGBB`. Anything else is rejected.
pub fn parse_color(s: &str) -> Result<Rgb, ProtocolError> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidColor(s.to_string()));
    }
    u32::from_str_radix(hex, 16)
        .map(Rgb)
        .map_err(|_| ProtocolError::InvalidColor(s.to_string()))
}

/// `#RRGGBB`, upper case.
pub fn format_color(color: Rgb) -> String {
    color.to_string()
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn num_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    obj.get(key).and_then(Value::as_bool)
}

/// Non-negative whole number, saturating.
fn count_field(obj: &Map<String, Value>, key: &str, default: u32) -> u32 {
    num_field(obj, key)
        .filter(|v| v.is_finite())
        .map(|v| v.trunc().clamp(0.0, u32::MAX as f64) as u32)
        .unwrap_or(default)
}

fn color_field(obj: &Map<String, Value>, key: &str, default: Rgb) -> Result<Rgb, ProtocolError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::String(s)) => parse_color(s),
        Some(other) => Err(ProtocolError::InvalidColor(other.to_string())),
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_command(json: &str) -> Result<Command, ProtocolError> {
    let root: Value = serde_json::from_str(json)?;
    let obj = root.as_object().ok_or(ProtocolError::NotAnObject)?;
    let cmd = str_field(obj, "cmd").ok_or(ProtocolError::MissingCmd)?;

    let command = match cmd {
        "emotion" => Command::Emotion(Emotion::from_name_or_default(
            str_field(obj, "value").unwrap_or_default(),
        )),
        "gaze" => {
            let axis = |key| {
                num_field(obj, key)
                    .map(|v| v as f32)
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.5)
            };
            Command::Gaze {
                x: axis("x"),
                y: axis("y"),
            }
        }
        "text" => Command::Text(TextContent {
            text: truncate_utf8(str_field(obj, "content").unwrap_or_default(), MAX_TEXT_BYTES)
                .to_string(),
            size: str_field(obj, "size")
                .map(FontSize::from_name)
                .unwrap_or(FontSize::Medium),
            color: color_field(obj, "color", DEFAULT_FG)?,
            bg: color_field(obj, "bg", DEFAULT_BG)?,
        }),
        "text_clear" => Command::TextClear,
        "pixel_art" => Command::PixelArt(parse_pixel_art(obj)?),
        "pixel_art_clear" => Command::PixelArtClear,
        "audio_start" => Command::AudioStart,
        "audio_stop" => Command::AudioStop,
        "weather" => Command::Weather(Weather {
            temp: str_field(obj, "temp").unwrap_or_default().to_string(),
            icon: WeatherIcon::from_name(str_field(obj, "icon").unwrap_or_default()),
            description: str_field(obj, "desc").unwrap_or_default().to_string(),
        }),
        "timer" => Command::Timer(TimerSpec {
            minutes: count_field(obj, "minutes", 0),
            seconds: count_field(obj, "seconds", 0),
            label: str_field(obj, "label").unwrap_or_default().to_string(),
            running: bool_field(obj, "running").unwrap_or(true),
        }),
        "clock" => Command::Clock(ClockSpec {
            hours: count_field(obj, "hours", 12),
            minutes: count_field(obj, "minutes", 0),
            is_24h: bool_field(obj, "is_24h").unwrap_or(false),
        }),
        "animation" => {
            let name = str_field(obj, "type").unwrap_or_default();
            let kind = AnimationKind::from_name(name).ok_or_else(|| ProtocolError::InvalidField {
                field: "type",
                value: name.to_string(),
            })?;
            Command::Animation(kind)
        }
        "clear_display" => Command::ClearDisplay,
        other => Command::Unknown {
            name: other.to_string(),
        },
    };
    Ok(command)
}

/// Entries without numeric `x`/`y` or a string `c` are skipped. Grid bounds
/// are enforced by the renderer, not here.
fn parse_pixel_art(obj: &Map<String, Value>) -> Result<PixelArt, ProtocolError> {
    let bg = color_field(obj, "bg", DEFAULT_BG)?;
    let entries = obj
        .get("pixels")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut pixels = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(p) = entry.as_object() else {
            continue;
        };
        let (Some(x), Some(y), Some(c)) = (num_field(p, "x"), num_field(p, "y"), str_field(p, "c"))
        else {
            continue;
        };
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        pixels.push(Pixel {
            x: x.trunc().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
            y: y.trunc().clamp(i32::MIN as f64, i32::MAX as f64) as i32,
            color: parse_color(c)?,
        });
    }
    Ok(PixelArt { pixels, bg })
}

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

/// Device-originated notifications, sent as text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    Hello {
        device: String,
        version: String,
        session: String,
    },
    Shake {
        intensity: f32,
    },
    Poke {
        eye: String,
    },
    Battery {
        percent: u8,
        charging: bool,
    },
}

impl DeviceEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parsing() {
        assert_eq!(parse_color("#FF8000").unwrap(), Rgb(0xFF8000));
        assert_eq!(parse_color("ff8000").unwrap(), Rgb(0xFF8000));
        for bad in ["", "#", "#FFF", "#GG0000", "#FF00000", "+12345", "#+1234F", "12345 "] {
            assert!(parse_color(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_color_round_trip() {
        for v in [0u32, 0x1E1E28, 0xABCDEF, 0xFFFFFF] {
            let s = format_color(Rgb(v));
            assert_eq!(parse_color(&s).unwrap(), Rgb(v));
            assert_eq!(parse_color(&s[1..]).unwrap(), Rgb(v));
        }
    }

    #[test]
    fn test_emotion_command() {
        let cmd = parse_command(r#"{"cmd":"emotion","value":"happy"}"#).unwrap();
        assert_eq!(cmd, Command::Emotion(Emotion::Happy));
        let cmd = parse_command(r#"{"cmd":"emotion","value":"bored"}"#).unwrap();
        assert_eq!(cmd, Command::Emotion(Emotion::EyesOnly));
    }

    #[test]
    fn test_gaze_defaults() {
        let cmd = parse_command(r#"{"cmd":"gaze","x":0.1}"#).unwrap();
        assert_eq!(cmd, Command::Gaze { x: 0.1, y: 0.5 });
        let cmd = parse_command(r#"{"cmd":"gaze","x":"left","y":2}"#).unwrap();
        assert_eq!(cmd, Command::Gaze { x: 0.5, y: 2.0 });
    }

    #[test]
    fn test_text_defaults_and_cap() {
        let cmd = parse_command(r#"{"cmd":"text","content":"hi"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Text(TextContent {
                text: "hi".into(),
                size: FontSize::Medium,
                color: DEFAULT_FG,
                bg: DEFAULT_BG,
            })
        );

        let long = "é".repeat(400);
        let json = serde_json::json!({"cmd": "text", "content": long, "size": "huge"}).to_string();
        let Command::Text(text) = parse_command(&json).unwrap() else {
            panic!("expected text");
        };
        assert!(text.text.len() <= MAX_TEXT_BYTES);
        assert_eq!(text.text.len() % 2, 0);
        assert_eq!(text.size, FontSize::Medium);
    }

    #[test]
    fn test_bad_color_rejects_command() {
        let err = parse_command(r##"{"cmd":"text","content":"x","color":"#12"}"##).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidColor(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = parse_command(r#"{"cmd":"text","bg":7}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidColor(_)));
    }

    #[test]
    fn test_pixel_art_skips_malformed_entries() {
        let json = r##"{"cmd":"pixel_art","pixels":[
            {"x":0,"y":0,"c":"#FF0000"},
            {"x":12,"y":0,"c":"#00FF00"},
            {"x":"a","y":0,"c":"#00FF00"},
            {"x":1,"y":1},
            7
        ],"bg":"#000000"}"##;
        let Command::PixelArt(art) = parse_command(json).unwrap() else {
            panic!("expected pixel art");
        };
        assert_eq!(art.bg, Rgb::BLACK);
        assert_eq!(art.pixels.len(), 2);
        assert_eq!(art.pixels[0], Pixel { x: 0, y: 0, color: Rgb(0xFF0000) });
        assert_eq!(art.pixels[1].x, 12);
    }

    #[test]
    fn test_pixel_art_bad_cell_color_rejects() {
        let json = r#"{"cmd":"pixel_art","pixels":[{"x":0,"y":0,"c":"red"}]}"#;
        assert!(parse_command(json).is_err());
    }

    #[test]
    fn test_extra_commands() {
        let cmd = parse_command(r#"{"cmd":"timer","minutes":2,"seconds":30,"label":"tea"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Timer(TimerSpec {
                minutes: 2,
                seconds: 30,
                label: "tea".into(),
                running: true,
            })
        );
        let cmd = parse_command(r#"{"cmd":"clock","minutes":5}"#).unwrap();
        assert_eq!(cmd, Command::Clock(ClockSpec { hours: 12, minutes: 5, is_24h: false }));
        let cmd = parse_command(r#"{"cmd":"weather","temp":"21°","icon":"rain","desc":"Showers"}"#).unwrap();
        let Command::Weather(w) = cmd else {
            panic!("expected weather");
        };
        assert_eq!(w.icon, WeatherIcon::Rainy);
        assert_eq!(
            parse_command(r#"{"cmd":"animation","type":"snow"}"#).unwrap(),
            Command::Animation(AnimationKind::Snow)
        );
        assert!(parse_command(r#"{"cmd":"animation","type":"lava"}"#).is_err());
        assert_eq!(parse_command(r#"{"cmd":"clear_display"}"#).unwrap(), Command::ClearDisplay);
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(
            parse_command(r#"{"cmd":"dance"}"#).unwrap(),
            Command::Unknown { name: "dance".into() }
        );
        assert!(matches!(parse_command("{"), Err(ProtocolError::Json(_))));
        assert!(matches!(parse_command("[1]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(parse_command(r#"{"cmd":3}"#), Err(ProtocolError::MissingCmd)));
    }

    #[test]
    fn test_device_event_json() {
        let json = DeviceEvent::Shake { intensity: 0.5 }.to_json().unwrap();
        assert_eq!(json, r#"{"event":"shake","intensity":0.5}"#);
        let json = DeviceEvent::Poke { eye: "left".into() }.to_json().unwrap();
        assert_eq!(json, r#"{"event":"poke","eye":"left"}"#);
    }
}
