//! Face geometry: where every primitive goes for a given animation state.
//!
//! Pure functions, no display access. All panel-specific constants live in
//! [`FaceGeometry`] so a different panel only needs a different config.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::display::{Point, Rect};
use super::emotion::EmotionParams;

/// Panel dimensions and the unscaled layout constants of the face.
///
/// Layout values are authored for a 240x320 reference and stretched by
/// `scale_x` / `scale_y` onto the physical panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceGeometry {
    pub width: i32,
    pub height: i32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Face center relative to the panel center, vertical.
    pub center_y_offset: f32,
    /// Horizontal distance from face center to each eye center.
    pub eye_spacing: f32,
    pub eye_y_offset: f32,
    pub mouth_y_offset: f32,
    pub cat_mouth_y_offset: f32,
    /// Full gaze swing from center, per axis.
    pub gaze_range_x: f32,
    pub gaze_range_y: f32,
    /// Vertical eye offset for tilted emotions.
    pub tilt: f32,
    /// Sideways glance for the thinking face.
    pub look_side: f32,
    /// Whole-face lean at full edge tracking.
    pub max_shift_x: f32,
    pub max_shift_y: f32,
    /// Fraction of the gaze range at each edge that triggers leaning.
    pub edge_threshold: f32,
    pub max_eye_radius: f32,
    pub brow_y_offset: f32,
    pub brow_length: f32,
    pub brow_slant: f32,
    pub line_width: f32,
    pub sparkle_size: f32,
    /// Smallest eye height ever drawn, in pixels.
    pub min_eye_height: i32,
    /// Geometry writes smaller than this are skipped.
    pub change_gate_px: i32,
    /// Force a full-screen refresh every this many frames.
    pub full_refresh_frames: u64,
    pub pixel_cols: i32,
    pub pixel_rows: i32,
}

impl Default for FaceGeometry {
    fn default() -> Self {
        Self {
            width: 502,
            height: 410,
            scale_x: 2.092,
            scale_y: 1.281,
            center_y_offset: -50.0,
            eye_spacing: 50.0,
            eye_y_offset: -10.0,
            mouth_y_offset: 50.0,
            cat_mouth_y_offset: 40.0,
            gaze_range_x: 28.0,
            gaze_range_y: 18.0,
            tilt: 8.0,
            look_side: 12.0,
            max_shift_x: 25.0,
            max_shift_y: 15.0,
            edge_threshold: 0.25,
            max_eye_radius: 15.0,
            brow_y_offset: 35.0,
            brow_length: 30.0,
            brow_slant: 6.0,
            line_width: 4.0,
            sparkle_size: 12.0,
            min_eye_height: 5,
            change_gate_px: 2,
            full_refresh_frames: 30,
            pixel_cols: 12,
            pixel_rows: 16,
        }
    }
}

/// Smallest pixel-art grid; the built-in glyphs are five cells wide.
pub const MIN_PIXEL_GRID: i32 = 5;

impl FaceGeometry {
    /// Clamp values a hand-edited config could set out of range.
    pub fn validated(mut self) -> Self {
        let (cols, rows) = (self.pixel_cols, self.pixel_rows);
        self.pixel_cols = cols.max(MIN_PIXEL_GRID);
        self.pixel_rows = rows.max(MIN_PIXEL_GRID);
        if (cols, rows) != (self.pixel_cols, self.pixel_rows) {
            warn!(
                cols,
                rows,
                min = MIN_PIXEL_GRID,
                "Pixel grid too small, clamped"
            );
        }
        self.width = self.width.max(1);
        self.height = self.height.max(1);
        self
    }

    fn center(&self) -> (f32, f32) {
        (
            self.width as f32 / 2.0,
            self.height as f32 / 2.0 + self.center_y_offset * self.scale_y,
        )
    }

    /// Maximum lean in pixels, per axis.
    pub fn max_shift_px(&self) -> (f32, f32) {
        (
            self.max_shift_x * self.scale_x,
            self.max_shift_y * self.scale_y,
        )
    }

    /// Where the two eyes sit with no gaze, lean or tilt applied.
    pub fn base_eye_centers(&self) -> [(f32, f32); 2] {
        let (cx, cy) = self.center();
        let y = cy + self.eye_y_offset * self.scale_y;
        let dx = self.eye_spacing * self.scale_x;
        [(cx - dx, y), (cx + dx, y)]
    }

    /// Side of one pixel-art cell and the grid's top-left corner.
    pub fn pixel_grid(&self) -> (i32, i32, i32) {
        let cell = (self.width / self.pixel_cols)
            .min(self.height / self.pixel_rows)
            .max(1);
        let ox = (self.width - cell * self.pixel_cols) / 2;
        let oy = (self.height - cell * self.pixel_rows) / 2;
        (cell, ox, oy)
    }

    pub fn in_pixel_grid(&self, x: i32, y: i32) -> bool {
        (0..self.pixel_cols).contains(&x) && (0..self.pixel_rows).contains(&y)
    }

    pub fn pixel_rect(&self, x: i32, y: i32) -> Rect {
        let (cell, ox, oy) = self.pixel_grid();
        Rect::new(ox + x * cell, oy + y * cell, cell, cell)
    }
}

/// Discrete mouth category. Primitives are swapped only when this changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouthShape {
    /// The eyes-only face has no mouth at all.
    Hidden,
    Cat,
    O,
    Straight,
    Smile,
    Frown,
}

impl MouthShape {
    pub fn classify(params: &EmotionParams) -> Self {
        if params.flags.no_mouth {
            Self::Hidden
        } else if params.flags.cat_face {
            Self::Cat
        } else if params.mouth_open > 0.3 {
            Self::O
        } else if params.mouth_curve.abs() < 0.1 {
            Self::Straight
        } else if params.mouth_curve > 0.0 {
            Self::Smile
        } else {
            Self::Frown
        }
    }

    /// Arc angles for the arc-drawn shapes.
    pub fn arc_angles(self) -> Option<(u16, u16)> {
        match self {
            Self::Cat | Self::Smile => Some((0, 180)),
            Self::Frown => Some((180, 360)),
            Self::O => Some((0, 360)),
            Self::Straight | Self::Hidden => None,
        }
    }

    pub fn uses_arc(self) -> bool {
        self.arc_angles().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouthLayout {
    pub shape: MouthShape,
    pub rect: Rect,
    pub thickness: i32,
}

/// Everything the face needs on screen for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLayout {
    pub eyes: [Rect; 2],
    pub eye_radius: [i32; 2],
    pub mouth: MouthLayout,
    pub brows: Option<[(Point, Point); 2]>,
    pub brow_width: i32,
    pub sparkles: Option<[Rect; 2]>,
}

/// Inputs from the animation state.
#[derive(Debug, Clone, Copy)]
pub struct FacePose {
    pub params: EmotionParams,
    /// Gaze in [0,1]^2, center at 0.5.
    pub gaze: (f32, f32),
    /// Lean, normalized to [-1,1] per axis.
    pub offset: (f32, f32),
    /// Per-eye closure, 0 = open, 1 = shut.
    pub closure: [f32; 2],
}

pub fn compute_layout(geom: &FaceGeometry, pose: &FacePose) -> FaceLayout {
    let (sx, sy) = (geom.scale_x, geom.scale_y);
    let p = &pose.params;
    let (shift_x, shift_y) = geom.max_shift_px();
    let off_x = pose.offset.0 * shift_x;
    let off_y = pose.offset.1 * shift_y;
    let gaze_x = (pose.gaze.0 - 0.5) * 2.0 * geom.gaze_range_x * sx;
    let gaze_y = (pose.gaze.1 - 0.5) * 2.0 * geom.gaze_range_y * sy;
    let think_x = if p.flags.look_side {
        geom.look_side * sx
    } else {
        0.0
    };

    let eye_w = (p.eye_width * sx).round() as i32;
    let bases = geom.base_eye_centers();
    let mut eyes = [Rect::default(); 2];
    let mut eye_radius = [0; 2];
    let mut centers = [(0.0f32, 0.0f32); 2];
    for i in 0..2 {
        let tilt = if p.flags.tilt_eyes {
            // Left eye up, right eye down.
            if i == 0 {
                -geom.tilt * sy
            } else {
                geom.tilt * sy
            }
        } else {
            0.0
        };
        let raw_h = p.eye_height * sy * p.eye_openness * (1.0 - 0.95 * pose.closure[i]);
        let eye_h = (raw_h.round() as i32).max(geom.min_eye_height);
        let cx = bases[i].0 + off_x + gaze_x + think_x;
        let cy = bases[i].1 + off_y + gaze_y + tilt;
        centers[i] = (cx, cy);
        eyes[i] = Rect::new(
            (cx - eye_w as f32 / 2.0).round() as i32,
            (cy - eye_h as f32 / 2.0).round() as i32,
            eye_w,
            eye_h,
        );
        let cap = (geom.max_eye_radius * sy).round() as i32;
        eye_radius[i] = (eye_h.min(eye_w) / 2).min(cap);
    }

    let mouth = mouth_layout(geom, p, off_x, off_y);

    let brows = p.flags.angry_brows.then(|| {
        let len = geom.brow_length * sx;
        let slant = geom.brow_slant * sy;
        let y = bases[0].1 + off_y + gaze_y - geom.brow_y_offset * sy;
        let pt = |x: f32, y: f32| Point {
            x: x.round() as i32,
            y: y.round() as i32,
        };
        // Inner ends dip toward the nose.
        let (lx, rx) = (centers[0].0, centers[1].0);
        [
            (pt(lx - len / 2.0, y - slant), pt(lx + len / 2.0, y + slant)),
            (pt(rx - len / 2.0, y + slant), pt(rx + len / 2.0, y - slant)),
        ]
    });

    let sparkles = p.flags.sparkle.then(|| {
        let size = (geom.sparkle_size * sx).round() as i32;
        let mut out = [Rect::default(); 2];
        for (i, eye) in eyes.iter().enumerate() {
            let cx = eye.x + eye.w / 2 - eye.w / 4;
            let cy = eye.y + eye.h / 2 - eye.h / 4;
            out[i] = Rect::new(cx - size / 2, cy - size / 2, size, size);
        }
        out
    });

    FaceLayout {
        eyes,
        eye_radius,
        mouth,
        brows,
        brow_width: (geom.line_width * sy).round() as i32,
        sparkles,
    }
}

fn mouth_layout(geom: &FaceGeometry, p: &EmotionParams, off_x: f32, off_y: f32) -> MouthLayout {
    let (sx, sy) = (geom.scale_x, geom.scale_y);
    let (cx, cy) = geom.center();
    let mx = cx + off_x;
    let shape = MouthShape::classify(p);
    let thickness = (geom.line_width * sy).round() as i32;

    let (w, h, my) = match shape {
        MouthShape::Hidden => (0.0, 0.0, cy),
        MouthShape::Cat => {
            let unit = 10.0 * sx;
            (3.5 * unit, 0.8 * unit, cy + geom.cat_mouth_y_offset * sy)
        }
        MouthShape::O => (
            (20.0 + p.mouth_open * 15.0) * sx,
            (15.0 + p.mouth_open * 20.0) * sy,
            cy + geom.mouth_y_offset * sy,
        ),
        MouthShape::Straight => (
            p.mouth_width * sx,
            geom.line_width * sy,
            cy + geom.mouth_y_offset * sy,
        ),
        MouthShape::Smile | MouthShape::Frown => {
            let w = p.mouth_width * sx;
            (
                w,
                (p.mouth_curve.abs() * w).max(40.0),
                cy + geom.mouth_y_offset * sy,
            )
        }
    };
    let my = my + off_y;
    MouthLayout {
        shape,
        rect: Rect::new(
            (mx - w / 2.0).round() as i32,
            (my - h / 2.0).round() as i32,
            w.round() as i32,
            h.round() as i32,
        ),
        thickness,
    }
}
