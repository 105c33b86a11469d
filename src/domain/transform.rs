//! Layer transform records
//!
//! Transforms are plain value records in template space. Gestures never
//! replace a whole transform; they send a [`TransformPatch`] carrying only the
//! fields they touched, which is merged into the stored transform.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Placement of a layer on the stage
///
/// `x`/`y` are the layer origin (its top-left corner before rotation) in
/// template pixels, `rotation` is clockwise degrees around that origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Layer opacity in [0, 1]
    pub opacity: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            opacity: 1.0,
        }
    }
}

impl Transform {
    /// Merge the provided fields of a patch, leaving the others untouched
    pub fn merge(&mut self, patch: &TransformPatch) {
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(rotation) = patch.rotation {
            self.rotation = rotation;
        }
        if let Some(scale_x) = patch.scale_x {
            self.scale_x = scale_x;
        }
        if let Some(scale_y) = patch.scale_y {
            self.scale_y = scale_y;
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = opacity.clamp(0.0, 1.0);
        }
    }

    /// Map a template-space point into the layer's unscaled local space
    ///
    /// Returns `None` when the transform is degenerate (zero scale).
    pub fn to_local(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        if self.scale_x == 0.0 || self.scale_y == 0.0 {
            return None;
        }

        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let dx = px - self.x;
        let dy = py - self.y;

        // Inverse rotation, then inverse scale
        let rx = dx * cos + dy * sin;
        let ry = -dx * sin + dy * cos;

        Some((rx / self.scale_x, ry / self.scale_y))
    }

    /// Map a local layer point into template space
    pub fn to_template(&self, lx: f64, ly: f64) -> (f64, f64) {
        let (sin, cos) = self.rotation.to_radians().sin_cos();
        let sx = lx * self.scale_x;
        let sy = ly * self.scale_y;

        (self.x + sx * cos - sy * sin, self.y + sx * sin + sy * cos)
    }
}

/// Partial transform update
///
/// A drag sends `{x, y}`; a resize/rotate gesture sends
/// `{rotation, scaleX, scaleY}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformPatch {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default)]
    pub scale_x: Option<f64>,
    #[serde(default)]
    pub scale_y: Option<f64>,
    #[serde(default)]
    pub opacity: Option<f64>,
}

impl TransformPatch {
    /// Patch produced by dragging a layer
    pub fn position(x: f64, y: f64) -> Self {
        TransformPatch {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    /// Patch produced by the resize/rotate handles
    pub fn resize_rotate(rotation: f64, scale_x: f64, scale_y: f64) -> Self {
        TransformPatch {
            rotation: Some(rotation),
            scale_x: Some(scale_x),
            scale_y: Some(scale_y),
            ..Default::default()
        }
    }

    /// Whether the patch touches either scale component
    pub fn touches_scale(&self) -> bool {
        self.scale_x.is_some() || self.scale_y.is_some()
    }
}

impl From<Transform> for TransformPatch {
    fn from(t: Transform) -> Self {
        TransformPatch {
            x: Some(t.x),
            y: Some(t.y),
            rotation: Some(t.rotation),
            scale_x: Some(t.scale_x),
            scale_y: Some(t.scale_y),
            opacity: Some(t.opacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drag_keeps_scale_and_rotation() {
        let mut t = Transform {
            rotation: 30.0,
            scale_x: 2.0,
            scale_y: 0.5,
            ..Default::default()
        };
        t.merge(&TransformPatch::position(10.0, 20.0));

        assert_eq!(t.x, 10.0);
        assert_eq!(t.y, 20.0);
        assert_eq!(t.rotation, 30.0);
        assert_eq!(t.scale_x, 2.0);
        assert_eq!(t.scale_y, 0.5);
    }

    #[test]
    fn test_opacity_is_clamped() {
        let mut t = Transform::default();
        t.merge(&TransformPatch { opacity: Some(1.7), ..Default::default() });
        assert_eq!(t.opacity, 1.0);
    }

    #[test]
    fn test_local_round_trip_with_rotation() {
        let t = Transform {
            x: 40.0,
            y: -12.0,
            rotation: 90.0,
            scale_x: 2.0,
            scale_y: 3.0,
            opacity: 1.0,
        };
        let (px, py) = t.to_template(5.0, 7.0);
        let (lx, ly) = t.to_local(px, py).unwrap();

        assert!((lx - 5.0).abs() < 1e-9);
        assert!((ly - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let patch: TransformPatch = serde_json::from_str(r#"{"scaleX": 1.5}"#).unwrap();
        assert_eq!(patch.scale_x, Some(1.5));
        assert!(patch.x.is_none());
    }
}
