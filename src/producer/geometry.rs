//! Head orientation from facial landmarks
//!
//! Works on three points of a mirrored camera frame: the nose tip and the
//! outer corners of both eyes, in integer pixel coordinates.

use serde::Deserialize;

use crate::link::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Landmarks of one face in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceLandmarks {
    pub nose: Point,
    pub left_eye: Point,
    pub right_eye: Point,
}

/// Landmarks as detectors usually report them, normalised to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NormalizedLandmarks {
    pub nose: [f32; 2],
    pub left_eye: [f32; 2],
    pub right_eye: [f32; 2],
}

/// Detectors report points slightly outside the frame for partly visible
/// faces; anything further out is garbage
const PLAUSIBLE: std::ops::RangeInclusive<f32> = -1.0..=2.0;

impl NormalizedLandmarks {
    /// Scale to pixels of a `width` x `height` frame, truncating toward zero.
    ///
    /// `None` if any coordinate is non-finite or far outside the frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<FaceLandmarks> {
        let points = [self.nose, self.left_eye, self.right_eye];
        if !points.iter().flatten().all(|v| PLAUSIBLE.contains(v)) {
            return None;
        }

        let scale = |[x, y]: [f32; 2]| Point::new((x * width as f32) as i32, (y * height as f32) as i32);
        Some(FaceLandmarks {
            nose: scale(self.nose),
            left_eye: scale(self.left_eye),
            right_eye: scale(self.right_eye),
        })
    }
}

/// Pixel thresholds for the derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryConfig {
    /// Nose this far below the eye line reads as looking down
    pub down_threshold: i32,
    /// Nose-to-eye distance difference below this reads as centred
    pub center_tolerance: i32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            down_threshold: 25,
            center_tolerance: 20,
        }
    }
}

/// Derive a direction from one frame's landmarks
pub fn derive_direction(landmarks: &FaceLandmarks, config: &GeometryConfig) -> Direction {
    let FaceLandmarks { nose, left_eye, right_eye } = *landmarks;
    // widened so extreme pixel values cannot overflow
    let (nose_x, nose_y) = (i64::from(nose.x), i64::from(nose.y));

    let left_span = (nose_x - i64::from(left_eye.x)).abs();
    let right_span = (nose_x - i64::from(right_eye.x)).abs();
    let eye_y = (i64::from(left_eye.y) + i64::from(right_eye.y)).div_euclid(2);

    if nose_y < eye_y {
        Direction::Up
    } else if nose_y - eye_y > i64::from(config.down_threshold) {
        Direction::Down
    } else if (left_span - right_span).abs() < i64::from(config.center_tolerance) {
        Direction::Stop
    } else if left_span > right_span {
        Direction::Left
    } else {
        Direction::Right
    }
}
