//! Layer store
//!
//! Ordered collection of placed texture layers keyed by string id, plus the
//! freehand stroke list. Every operation is a synchronous mutation with no
//! side effects beyond the store itself.

use std::sync::Arc;

use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::domain::{Transform, TransformPatch};

/// Layer key used for the whole-body texture
pub const FULL_WRAP_LAYER: &str = "Full Wrap";

/// A placed texture
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: String,
    pub source: Arc<RgbaImage>,
    pub transform: Transform,
}

/// A freehand polyline in template space
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub points: Vec<(f64, f64)>,
    pub color: Rgba<u8>,
    pub width: f64,
}

/// Layers in draw order, the current selection and freehand strokes
#[derive(Debug, Clone, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
    selected: Option<String>,
    strokes: Vec<Stroke>,
    uniform_scale: bool,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a layer, or replace the source and transform of an existing one
    ///
    /// A replaced layer keeps its place in the draw order.
    pub fn add_or_replace(&mut self, id: impl Into<String>, source: Arc<RgbaImage>, transform: Option<Transform>) {
        let id = id.into();
        let transform = transform.unwrap_or_default();

        match self.layers.iter_mut().find(|l| l.id == id) {
            Some(layer) => {
                debug!(layer_id = %id, "Replacing layer");
                layer.source = source;
                layer.transform = transform;
            }
            None => {
                debug!(layer_id = %id, "Adding layer");
                self.layers.push(Layer { id, source, transform });
            }
        }
    }

    /// Remove a layer, clearing the selection if it pointed at it
    pub fn remove(&mut self, id: &str) -> Option<Layer> {
        let index = self.layers.iter().position(|l| l.id == id)?;
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        Some(self.layers.remove(index))
    }

    /// Merge the provided fields into a layer's transform
    ///
    /// Returns false when no layer has that id. In uniform-scale mode any
    /// scale update forces `scale_y` to follow `scale_x`.
    pub fn update_transform(&mut self, id: &str, patch: &TransformPatch) -> bool {
        let uniform = self.uniform_scale;
        let Some(layer) = self.layers.iter_mut().find(|l| l.id == id) else {
            return false;
        };

        layer.transform.merge(patch);
        if uniform && patch.touches_scale() {
            layer.transform.scale_y = layer.transform.scale_x;
        }
        true
    }

    /// Select a layer by id, or clear the selection with `None`
    pub fn select(&mut self, id: Option<&str>) {
        self.selected = id.map(str::to_string);
    }

    /// The selected layer, if the selection still names an existing layer
    pub fn selected(&self) -> Option<&Layer> {
        let id = self.selected.as_deref()?;
        self.get(id)
    }

    pub fn set_uniform_scale(&mut self, enabled: bool) {
        self.uniform_scale = enabled;
    }

    pub fn uniform_scale(&self) -> bool {
        self.uniform_scale
    }

    /// Move a layer to the top of the draw order
    pub fn bring_to_front(&mut self, id: &str) -> bool {
        let Some(index) = self.layers.iter().position(|l| l.id == id) else {
            return false;
        };
        let layer = self.layers.remove(index);
        self.layers.push(layer);
        true
    }

    /// Drop every layer, stroke and the selection
    pub fn clear_all(&mut self) {
        self.layers.clear();
        self.strokes.clear();
        self.selected = None;
    }

    pub fn get(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Layers in insertion (draw) order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Start a new freehand stroke
    pub fn begin_stroke(&mut self, color: Rgba<u8>, width: f64) {
        self.strokes.push(Stroke {
            points: Vec::new(),
            color,
            width,
        });
    }

    /// Append a point to the stroke in progress
    ///
    /// Returns false when no stroke has been started.
    pub fn extend_stroke(&mut self, point: (f64, f64)) -> bool {
        match self.strokes.last_mut() {
            Some(stroke) => {
                stroke.points.push(point);
                true
            }
            None => false,
        }
    }

    pub fn push_stroke(&mut self, stroke: Stroke) {
        self.strokes.push(stroke);
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn clear_strokes(&mut self) {
        self.strokes.clear();
    }
}
