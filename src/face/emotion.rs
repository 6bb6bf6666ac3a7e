//! Emotion table and blending.
//!
//! Each named emotion is a fixed vector of six scalar knobs and six flags.
//! The renderer never reads the table directly; it holds an interpolated
//! copy that moves toward the target emotion over a short transition.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feature toggles carried by an emotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionFlags {
    pub angry_brows: bool,
    pub look_side: bool,
    pub tilt_eyes: bool,
    pub sparkle: bool,
    pub cat_face: bool,
    pub no_mouth: bool,
}

/// One emotion vector, in unscaled panel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionParams {
    pub eye_height: f32,
    pub eye_width: f32,
    /// 0 = shut, 1 = normal, up to 1.2 = wide.
    pub eye_openness: f32,
    /// -1 = frown, 0 = straight, 1 = smile.
    pub mouth_curve: f32,
    /// 0 = closed, 1 = fully open.
    pub mouth_open: f32,
    pub mouth_width: f32,
    pub flags: EmotionFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    EyesOnly,
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Thinking,
    Confused,
    Excited,
    Cat,
    Dizzy,
}

const fn params(
    eye_height: f32,
    eye_width: f32,
    eye_openness: f32,
    mouth_curve: f32,
    mouth_open: f32,
    mouth_width: f32,
    flags: EmotionFlags,
) -> EmotionParams {
    EmotionParams {
        eye_height,
        eye_width,
        eye_openness,
        mouth_curve,
        mouth_open,
        mouth_width,
        flags,
    }
}

const NONE: EmotionFlags = EmotionFlags {
    angry_brows: false,
    look_side: false,
    tilt_eyes: false,
    sparkle: false,
    cat_face: false,
    no_mouth: false,
};

impl Emotion {
    pub const ALL: [Emotion; 11] = [
        Emotion::EyesOnly,
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Thinking,
        Emotion::Confused,
        Emotion::Excited,
        Emotion::Cat,
        Emotion::Dizzy,
    ];

    /// The immutable vector for this emotion.
    #[rustfmt::skip]
    pub const fn params(self) -> EmotionParams {
        match self {
            Self::EyesOnly => params(60.0, 40.0, 1.0, 0.0, 0.0, 0.0, EmotionFlags { no_mouth: true, ..NONE }),
            Self::Neutral => params(60.0, 40.0, 1.0, 0.0, 0.0, 40.0, NONE),
            Self::Happy => params(55.0, 40.0, 0.85, 0.8, 0.0, 50.0, NONE),
            Self::Sad => params(55.0, 38.0, 0.8, -0.9, 0.0, 55.0, NONE),
            Self::Angry => params(45.0, 45.0, 0.5, -0.5, 0.0, 45.0, EmotionFlags { angry_brows: true, ..NONE }),
            Self::Surprised => params(65.0, 45.0, 1.15, 0.0, 0.6, 35.0, NONE),
            Self::Thinking => params(55.0, 40.0, 0.9, 0.3, 0.0, 35.0, EmotionFlags { look_side: true, ..NONE }),
            Self::Confused => params(60.0, 40.0, 1.0, -0.3, 0.0, 35.0, EmotionFlags { tilt_eyes: true, ..NONE }),
            Self::Excited => params(65.0, 48.0, 1.2, 1.0, 0.2, 55.0, EmotionFlags { sparkle: true, ..NONE }),
            Self::Cat => params(60.0, 40.0, 1.0, 0.5, 0.0, 40.0, EmotionFlags { cat_face: true, ..NONE }),
            Self::Dizzy => params(65.0, 45.0, 1.1, -0.2, 0.3, 40.0, EmotionFlags { tilt_eyes: true, ..NONE }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EyesOnly => "eyes_only",
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Surprised => "surprised",
            Self::Thinking => "thinking",
            Self::Confused => "confused",
            Self::Excited => "excited",
            Self::Cat => "cat",
            Self::Dizzy => "dizzy",
        }
    }

    /// Lenient lookup used by the wire protocol: unknown names fall back to
    /// the plain eyes-only face.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or(Self::EyesOnly)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown emotion: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Written so both endpoints are reproduced exactly.
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Blend two vectors. Scalars move linearly; flags switch to the target
/// half-way through.
pub fn interpolate(from: &EmotionParams, to: &EmotionParams, t: f32) -> EmotionParams {
    let t = t.clamp(0.0, 1.0);
    EmotionParams {
        eye_height: lerp(from.eye_height, to.eye_height, t),
        eye_width: lerp(from.eye_width, to.eye_width, t),
        eye_openness: lerp(from.eye_openness, to.eye_openness, t),
        mouth_curve: lerp(from.mouth_curve, to.mouth_curve, t),
        mouth_open: lerp(from.mouth_open, to.mouth_open, t),
        mouth_width: lerp(from.mouth_width, to.mouth_width, t),
        flags: if t >= 0.5 { to.flags } else { from.flags },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_names_round_trip() {
        for e in Emotion::ALL {
            assert_eq!(e.to_string().parse::<Emotion>().unwrap(), e);
        }
    }

    #[test]
    fn test_name_lookup_is_case_insensitive() {
        assert_eq!("HAPPY".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert_eq!("Eyes_Only".parse::<Emotion>().unwrap(), Emotion::EyesOnly);
    }

    #[test]
    fn test_unknown_name_falls_back_to_eyes_only() {
        let err = "grumpy".parse::<Emotion>().unwrap_err();
        assert_eq!(err.to_string(), "unknown emotion: grumpy");
        assert_eq!(Emotion::from_name_or_default("grumpy"), Emotion::EyesOnly);
    }

    #[test]
    fn test_table_values() {
        let happy = Emotion::Happy.params();
        assert_eq!(happy.mouth_curve, 0.8);
        assert_eq!(happy.mouth_width, 50.0);
        assert!(Emotion::Angry.params().flags.angry_brows);
        assert!(Emotion::EyesOnly.params().flags.no_mouth);
        assert!(Emotion::Excited.params().flags.sparkle);
        assert_eq!(Emotion::Surprised.params().eye_openness, 1.15);
    }

    #[test]
    fn test_interpolate_endpoints_and_clamp() {
        let a = Emotion::Neutral.params();
        let b = Emotion::Happy.params();
        assert_eq!(interpolate(&a, &b, 0.0), a);
        assert_eq!(interpolate(&a, &b, 1.0), b);
        assert_eq!(interpolate(&a, &b, 7.0), b);
        assert_eq!(interpolate(&a, &b, -1.0), a);
        let mid = interpolate(&a, &b, 0.5);
        assert!((mid.mouth_curve - 0.4).abs() < 1e-6);
    }

    fn any_emotion() -> impl Strategy<Value = Emotion> {
        (0..Emotion::ALL.len()).prop_map(|i| Emotion::ALL[i])
    }

    proptest! {
        #[test]
        fn test_interpolation_monotone(from in any_emotion(), to in any_emotion(), t1 in 0.0f32..=1.0, t2 in 0.0f32..=1.0) {
            let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
            let (a, b) = (from.params(), to.params());
            let p = interpolate(&a, &b, lo);
            let q = interpolate(&a, &b, hi);
            let pairs = [
                (a.eye_height, b.eye_height, p.eye_height, q.eye_height),
                (a.eye_width, b.eye_width, p.eye_width, q.eye_width),
                (a.eye_openness, b.eye_openness, p.eye_openness, q.eye_openness),
                (a.mouth_curve, b.mouth_curve, p.mouth_curve, q.mouth_curve),
                (a.mouth_open, b.mouth_open, p.mouth_open, q.mouth_open),
                (a.mouth_width, b.mouth_width, p.mouth_width, q.mouth_width),
            ];
            for (start, end, at_lo, at_hi) in pairs {
                if start <= end {
                    prop_assert!(at_lo <= at_hi + 1e-5);
                } else {
                    prop_assert!(at_lo + 1e-5 >= at_hi);
                }
            }
        }

        #[test]
        fn test_flags_switch_at_half(from in any_emotion(), to in any_emotion(), t in 0.0f32..=1.0) {
            let (a, b) = (from.params(), to.params());
            let p = interpolate(&a, &b, t);
            if t < 0.5 {
                prop_assert_eq!(p.flags, a.flags);
            } else {
                prop_assert_eq!(p.flags, b.flags);
            }
        }
    }
}
