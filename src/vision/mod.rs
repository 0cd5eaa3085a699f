//! External vision service contract.
//!
//! The pipeline never runs a model itself. Face detection, recognition and
//! enrollment are requests against a vision HTTP service. `VisionService` is
//! the seam: `HttpVisionClient` talks to the real service, tests substitute
//! scripted fakes.

mod http;

pub use http::{HttpVisionClient, VisionClientConfig};

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};

/// Reserved identity returned by the service for faces it does not know.
pub const UNKNOWN_USER: &str = "unknown";

/// Name written for faces that did not resolve to an identity.
pub const NOT_RECOGNIZED: &str = "Not Recognized";

/// Face bounding box in pixel coordinates of the submitted image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(deserialize_with = "pixel")]
    pub x_min: i32,
    #[serde(deserialize_with = "pixel")]
    pub y_min: i32,
    #[serde(deserialize_with = "pixel")]
    pub x_max: i32,
    #[serde(deserialize_with = "pixel")]
    pub y_max: i32,
}

impl BoundingBox {
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Clip the box to a `width` x `height` image.
    ///
    /// Returns `(x, y, w, h)` of the visible region, or `None` when nothing of
    /// the box is inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clip = |v: i32, max: u32| -> u32 { (v.max(0) as u32).min(max) };
        let x0 = clip(self.x_min, width);
        let y0 = clip(self.y_min, height);
        let x1 = clip(self.x_max, width);
        let y1 = clip(self.y_max, height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

// Some services report coordinates as floats; round them to whole pixels.
fn pixel<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i32, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(value.round() as i32)
}

/// One ranked recognition candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub userid: Option<String>,
    #[serde(default)]
    pub confidence: f32,
}

impl Candidate {
    pub fn new(userid: &str, confidence: f32) -> Self {
        Self {
            userid: Some(userid.to_string()),
            confidence,
        }
    }

    /// The candidate's identity, unless it is missing or a reserved token.
    pub fn identity(&self) -> Option<&str> {
        match self.userid.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(id) if id == UNKNOWN_USER || id == NOT_RECOGNIZED => None,
            Some(id) => Some(id),
        }
    }
}

/// Vision service operations used by the pipeline and the enrollment tool.
///
/// Implementations are shared across the detection thread and every
/// recognition worker, so they must be `Send + Sync` and must bound each
/// call with a timeout.
pub trait VisionService: Send + Sync {
    /// Detect faces in a JPEG image.
    fn detect_faces(&self, jpeg: &[u8]) -> Result<Vec<BoundingBox>>;

    /// Recognize a JPEG face crop. An empty list means "not recognized".
    fn recognize_face(&self, jpeg: &[u8], min_confidence: f32) -> Result<Vec<Candidate>>;

    /// Enroll a face image under `userid`.
    fn register_face(&self, jpeg: &[u8], userid: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_inside_image() {
        let b = BoundingBox::new(10, 10, 50, 50);
        assert_eq!(b.clamp_to(640, 480), Some((10, 10, 40, 40)));
    }

    #[test]
    fn clamp_partially_outside() {
        let b = BoundingBox::new(-5, 470, 20, 500);
        assert_eq!(b.clamp_to(640, 480), Some((0, 470, 20, 10)));
    }

    #[test]
    fn clamp_outside_or_inverted_is_none() {
        assert_eq!(BoundingBox::new(700, 10, 800, 50).clamp_to(640, 480), None);
        assert_eq!(BoundingBox::new(50, 50, 10, 10).clamp_to(640, 480), None);
    }

    #[test]
    fn box_accepts_float_coordinates() {
        let b: BoundingBox =
            serde_json::from_str(r#"{"x_min": 10.4, "y_min": 9.6, "x_max": 50, "y_max": 51}"#)
                .unwrap();
        assert_eq!(b, BoundingBox::new(10, 10, 50, 51));
    }

    #[test]
    fn reserved_identities_are_not_identities() {
        assert_eq!(Candidate::new("alice", 0.9).identity(), Some("alice"));
        assert_eq!(Candidate::new("unknown", 0.9).identity(), None);
        assert_eq!(Candidate::new("Not Recognized", 0.9).identity(), None);
        assert_eq!(Candidate::new("  ", 0.9).identity(), None);
        let missing = Candidate {
            userid: None,
            confidence: 0.5,
        };
        assert_eq!(missing.identity(), None);
    }
}
