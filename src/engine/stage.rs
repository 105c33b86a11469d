//! Stage compositor
//!
//! The stage is the logical scene at template resolution. It is drawn in a
//! fixed order:
//!
//! 1. white background
//! 2. layers, in insertion order
//! 3. plate guides (plate canvases only)
//! 4. line-art guide, multiply blend
//! 5. freehand strokes
//! 6. exterior mask
//!
//! Rendering always targets an explicit output size, so the same scene can be
//! captured at screen resolution for a previewer or at a fixed print
//! resolution for export.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use rayon::prelude::*;
use tracing::debug;

use crate::domain::{CanvasType, CropRect, PlateSize};
use super::layers::{Layer, LayerStore, Stroke};
use super::raster::{
    allocate_surface, apply_opacity, bilinear_sample, blend_multiply, blend_normal,
    composite_with, resample_region, SurfaceError, DEFAULT_MAX_SURFACE_PIXELS,
};
use super::segmentation::Segmentation;

/// Fraction of the container the stage fills
pub const FIT_MARGIN: f64 = 0.9;

/// Plate guide outline color
pub const PLATE_GUIDE_COLOR: Rgba<u8> = Rgba([230, 57, 70, 200]);

/// Plate guide thickness in template pixels
const PLATE_GUIDE_THICKNESS: f64 = 2.0;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Scale that fits a `width` x `height` template inside its container
pub fn fit_scale(container_width: f64, container_height: f64, width: u32, height: u32) -> f64 {
    if width == 0 || height == 0 {
        return 0.0;
    }
    let sx = container_width / width as f64;
    let sy = container_height / height as f64;
    (sx.min(sy) * FIT_MARGIN).max(0.0)
}

/// Which overlays are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayVisibility {
    pub mask: bool,
    pub lines: bool,
    pub guides: bool,
}

impl OverlayVisibility {
    pub const ALL: OverlayVisibility = OverlayVisibility { mask: true, lines: true, guides: true };
    pub const NONE: OverlayVisibility = OverlayVisibility { mask: false, lines: false, guides: false };
}

impl Default for OverlayVisibility {
    fn default() -> Self {
        Self::ALL
    }
}

/// Editable scene for one template
#[derive(Debug, Clone)]
pub struct Stage {
    width: u32,
    height: u32,
    canvas_type: CanvasType,
    plate_size: PlateSize,
    container: (f64, f64),
    scale: f64,
    layers: LayerStore,
    segmentation: Option<Arc<Segmentation>>,
    overlays: OverlayVisibility,
    max_surface_pixels: u64,
}

impl Stage {
    /// Empty stage for a `width` x `height` template
    pub fn new(width: u32, height: u32, canvas_type: CanvasType, plate_size: PlateSize) -> Self {
        Stage {
            width,
            height,
            canvas_type,
            plate_size,
            container: (width as f64, height as f64),
            scale: fit_scale(width as f64, height as f64, width, height),
            layers: LayerStore::new(),
            segmentation: None,
            overlays: OverlayVisibility::ALL,
            max_surface_pixels: DEFAULT_MAX_SURFACE_PIXELS,
        }
    }

    /// Stage sized to a segmented template
    pub fn from_segmentation(segmentation: Arc<Segmentation>, canvas_type: CanvasType, plate_size: PlateSize) -> Self {
        let mut stage = Stage::new(segmentation.width(), segmentation.height(), canvas_type, plate_size);
        stage.segmentation = Some(segmentation);
        stage
    }

    pub fn with_max_surface_pixels(mut self, max_surface_pixels: u64) -> Self {
        self.max_surface_pixels = max_surface_pixels;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas_type(&self) -> CanvasType {
        self.canvas_type
    }

    pub fn plate_size(&self) -> PlateSize {
        self.plate_size
    }

    pub fn set_plate_size(&mut self, plate_size: PlateSize) {
        self.plate_size = plate_size;
    }

    pub fn max_surface_pixels(&self) -> u64 {
        self.max_surface_pixels
    }

    /// Current on-screen scale
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Override the on-screen scale (zoom)
    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    /// Record a new container size and refit the stage
    pub fn resize_container(&mut self, width: f64, height: f64) -> f64 {
        self.container = (width, height);
        self.scale = fit_scale(width, height, self.width, self.height);
        debug!(container_width = width, container_height = height, scale = self.scale, "Stage refit");
        self.scale
    }

    /// Top-left of the stage inside its container, centered at the current scale
    pub fn offset(&self) -> (f64, f64) {
        let (cw, ch) = self.container;
        (
            (cw - self.width as f64 * self.scale) / 2.0,
            (ch - self.height as f64 * self.scale) / 2.0,
        )
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut LayerStore {
        &mut self.layers
    }

    pub fn segmentation(&self) -> Option<&Arc<Segmentation>> {
        self.segmentation.as_ref()
    }

    /// Swap in a new segmentation (mask and lines together) or drop it
    pub fn set_segmentation(&mut self, segmentation: Option<Arc<Segmentation>>) {
        self.segmentation = segmentation;
    }

    pub fn overlays(&self) -> OverlayVisibility {
        self.overlays
    }

    pub fn set_overlays(&mut self, overlays: OverlayVisibility) {
        self.overlays = overlays;
    }

    /// Hide mask, lines and plate guides until the returned guard drops
    ///
    /// The previous visibility is restored on drop, including during unwinding.
    pub fn hide_overlays(&mut self) -> OverlayGuard<'_> {
        let previous = self.overlays;
        self.overlays = OverlayVisibility::NONE;
        debug!("Overlays hidden");
        OverlayGuard { stage: self, previous }
    }

    /// Snapshot of the composited scene at the given pixel ratio
    ///
    /// Output size is the on-screen size (template size times scale) times
    /// `pixel_ratio`. Overlays are drawn according to their current visibility.
    pub fn current_raster(&self, pixel_ratio: f64) -> Result<RgbaImage, SurfaceError> {
        self.capture(CropRect::full(self.width, self.height), pixel_ratio)
    }

    /// Capture a template-space region at the given pixel ratio
    pub fn capture(&self, crop: CropRect, pixel_ratio: f64) -> Result<RgbaImage, SurfaceError> {
        let factor = self.scale * pixel_ratio;
        let width = (crop.width as f64 * factor).round();
        let height = (crop.height as f64 * factor).round();

        if !width.is_finite() || !height.is_finite() || width < 1.0 || height < 1.0 || width > u32::MAX as f64 || height > u32::MAX as f64 {
            return Err(SurfaceError::Context {
                width: width.max(0.0).min(u32::MAX as f64) as u32,
                height: height.max(0.0).min(u32::MAX as f64) as u32,
            });
        }

        self.render_region(crop, width as u32, height as u32)
    }

    /// Render a template-space region into a `width` x `height` raster
    pub fn render_region(&self, crop: CropRect, width: u32, height: u32) -> Result<RgbaImage, SurfaceError> {
        let mut surface = allocate_surface(width, height, self.max_surface_pixels)?;
        let view = View::new(crop, width, height);

        for px in surface.pixels_mut() {
            *px = BACKGROUND;
        }

        for layer in self.layers.layers() {
            draw_layer(&mut surface, &view, layer);
        }

        if self.canvas_type == CanvasType::Plate && self.overlays.guides {
            let guides = self.plate_guide_overlay(&view)?;
            composite_with(&mut surface, &guides, blend_normal);
        }

        if let Some(segmentation) = self.segmentation.as_ref().filter(|_| self.overlays.lines) {
            let lines = resample_region(segmentation.lines(), crop, width, height);
            composite_with(&mut surface, &lines, blend_multiply);
        }

        if !self.layers.strokes().is_empty() {
            let strokes = self.stroke_overlay(&view)?;
            composite_with(&mut surface, &strokes, blend_normal);
        }

        if let Some(segmentation) = self.segmentation.as_ref().filter(|_| self.overlays.mask) {
            let mask = resample_region(segmentation.mask(), crop, width, height);
            composite_with(&mut surface, &mask, blend_normal);
        }

        Ok(surface)
    }

    /// Template-space outlines drawn on plate canvases
    ///
    /// The full plate border, plus the narrow print band when the template is
    /// taller than it.
    pub fn plate_guides(&self) -> Vec<CropRect> {
        let mut guides = vec![CropRect::full(self.width, self.height)];
        let band = PlateSize::Narrow.height();
        if self.height > band {
            guides.push(CropRect {
                x: 0,
                y: (self.height - band) / 2,
                width: self.width,
                height: band,
            });
        }
        guides
    }

    fn plate_guide_overlay(&self, view: &View) -> Result<RgbaImage, SurfaceError> {
        let mut overlay = allocate_surface(view.width, view.height, self.max_surface_pixels)?;
        let thickness = (PLATE_GUIDE_THICKNESS * view.fx.min(view.fy)).round().max(1.0) as i32;

        for guide in self.plate_guides() {
            let (x0, y0) = view.to_output(guide.x as f64, guide.y as f64);
            let (x1, y1) = view.to_output((guide.x + guide.width) as f64, (guide.y + guide.height) as f64);
            let (x0, y0) = (x0.round() as i32, y0.round() as i32);
            let (x1, y1) = (x1.round() as i32, y1.round() as i32);

            for inset in 0..thickness {
                let w = x1 - x0 - 2 * inset;
                let h = y1 - y0 - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let rect = Rect::at(x0 + inset, y0 + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(&mut overlay, rect, PLATE_GUIDE_COLOR);
            }
        }

        Ok(overlay)
    }

    fn stroke_overlay(&self, view: &View) -> Result<RgbaImage, SurfaceError> {
        let mut overlay = allocate_surface(view.width, view.height, self.max_surface_pixels)?;
        for stroke in self.layers.strokes() {
            draw_stroke(&mut overlay, view, stroke);
        }
        Ok(overlay)
    }
}

/// Restores overlay visibility when dropped
pub struct OverlayGuard<'a> {
    stage: &'a mut Stage,
    previous: OverlayVisibility,
}

impl Deref for OverlayGuard<'_> {
    type Target = Stage;

    fn deref(&self) -> &Stage {
        &*self.stage
    }
}

impl DerefMut for OverlayGuard<'_> {
    fn deref_mut(&mut self) -> &mut Stage {
        &mut *self.stage
    }
}

impl Drop for OverlayGuard<'_> {
    fn drop(&mut self) {
        self.stage.overlays = self.previous;
        debug!("Overlays restored");
    }
}

/// Mapping between a template-space crop and an output raster
struct View {
    crop: CropRect,
    width: u32,
    height: u32,
    fx: f64,
    fy: f64,
}

impl View {
    fn new(crop: CropRect, width: u32, height: u32) -> Self {
        View {
            crop,
            width,
            height,
            fx: width as f64 / crop.width.max(1) as f64,
            fy: height as f64 / crop.height.max(1) as f64,
        }
    }

    /// Template point under the center of output pixel `(ox, oy)`
    fn to_template(&self, ox: u32, oy: u32) -> (f64, f64) {
        (
            self.crop.x as f64 + (ox as f64 + 0.5) / self.fx,
            self.crop.y as f64 + (oy as f64 + 0.5) / self.fy,
        )
    }

    fn to_output(&self, tx: f64, ty: f64) -> (f64, f64) {
        ((tx - self.crop.x as f64) * self.fx, (ty - self.crop.y as f64) * self.fy)
    }
}

fn draw_layer(surface: &mut RgbaImage, view: &View, layer: &Layer) {
    let source = layer.source.as_ref();
    let (sw, sh) = source.dimensions();
    let transform = layer.transform;
    if sw == 0 || sh == 0 || transform.opacity <= 0.0 {
        return;
    }

    // Output-space bounding box of the transformed layer
    let corners = [(0.0, 0.0), (sw as f64, 0.0), (0.0, sh as f64), (sw as f64, sh as f64)];
    let (mut min_y, mut max_y) = (f64::MAX, f64::MIN);
    let (mut min_x, mut max_x) = (f64::MAX, f64::MIN);
    for (lx, ly) in corners {
        let (tx, ty) = transform.to_template(lx, ly);
        let (ox, oy) = view.to_output(tx, ty);
        min_x = min_x.min(ox);
        max_x = max_x.max(ox);
        min_y = min_y.min(oy);
        max_y = max_y.max(oy);
    }

    let x_start = min_x.floor().max(0.0) as u32;
    let x_end = (max_x.ceil().max(0.0) as u32).min(view.width);
    let y_start = min_y.floor().max(0.0) as u32;
    let y_end = (max_y.ceil().max(0.0) as u32).min(view.height);
    if x_start >= x_end || y_start >= y_end {
        return;
    }

    let row_len = view.width as usize * 4;
    surface
        .par_chunks_mut(row_len)
        .enumerate()
        .skip(y_start as usize)
        .take((y_end - y_start) as usize)
        .for_each(|(oy, row)| {
            for ox in x_start..x_end {
                let (tx, ty) = view.to_template(ox, oy as u32);
                let Some((lx, ly)) = transform.to_local(tx, ty) else {
                    continue;
                };
                if lx < 0.0 || ly < 0.0 || lx >= sw as f64 || ly >= sh as f64 {
                    continue;
                }

                let texel = apply_opacity(bilinear_sample(source, lx, ly), transform.opacity);
                let offset = ox as usize * 4;
                let px = &mut row[offset..offset + 4];
                let out = blend_normal(Rgba([px[0], px[1], px[2], px[3]]), texel);
                px.copy_from_slice(&out.0);
            }
        });
}

fn draw_stroke(overlay: &mut RgbaImage, view: &View, stroke: &Stroke) {
    let radius = (stroke.width * view.fx.min(view.fy) / 2.0).max(0.5);
    let points: Vec<(f64, f64)> = stroke
        .points
        .iter()
        .map(|&(x, y)| view.to_output(x, y))
        .collect();

    // Round joins and caps
    for &(x, y) in &points {
        draw_filled_circle_mut(overlay, (x.round() as i32, y.round() as i32), radius.round() as i32, stroke.color);
    }

    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        let len = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        if len == 0.0 {
            continue;
        }

        let nx = -(y1 - y0) / len * radius;
        let ny = (x1 - x0) / len * radius;
        let quad = [
            Point::new((x0 + nx).round() as i32, (y0 + ny).round() as i32),
            Point::new((x1 + nx).round() as i32, (y1 + ny).round() as i32),
            Point::new((x1 - nx).round() as i32, (y1 - ny).round() as i32),
            Point::new((x0 - nx).round() as i32, (y0 - ny).round() as i32),
        ];

        if quad[0] == quad[3] || quad[0] == quad[1] {
            draw_line_segment_mut(overlay, (x0 as f32, y0 as f32), (x1 as f32, y1 as f32), stroke.color);
        } else {
            draw_polygon_mut(overlay, &quad, stroke.color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transform;
    use crate::engine::layers::FULL_WRAP_LAYER;
    use crate::engine::segmentation::{segment, SegmentOptions, DEFAULT_FILL_COLOR};
    use image::DynamicImage;

    fn ring_segmentation(size: u32, inset: u32, thickness: u32) -> Arc<Segmentation> {
        let mut img = RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255]));
        let outer = size - inset;
        for y in inset..outer {
            for x in inset..outer {
                if x < inset + thickness || x >= outer - thickness || y < inset + thickness || y >= outer - thickness {
                    img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
        }
        Arc::new(segment(&DynamicImage::ImageRgba8(img), &SegmentOptions::default()).unwrap())
    }

    #[test]
    fn test_fit_scale() {
        assert!((fit_scale(1000.0, 500.0, 1000, 1000) - 0.45).abs() < 1e-12);
        assert!((fit_scale(800.0, 800.0, 400, 200) - 1.8).abs() < 1e-12);
        assert_eq!(fit_scale(800.0, 800.0, 0, 200), 0.0);
    }

    #[test]
    fn test_resize_container_centers_stage() {
        let mut stage = Stage::new(100, 100, CanvasType::Car, PlateSize::Tall);
        stage.resize_container(400.0, 200.0);

        assert!((stage.scale() - 1.8).abs() < 1e-12);
        let (ox, oy) = stage.offset();
        assert!((ox - 110.0).abs() < 1e-9);
        assert!((oy - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stage_is_white() {
        let mut stage = Stage::new(10, 10, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(1.0);
        let raster = stage.current_raster(1.0).unwrap();
        assert!(raster.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn test_current_raster_size_follows_scale_and_ratio() {
        let mut stage = Stage::new(200, 100, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(0.5);
        assert_eq!(stage.current_raster(2.0).unwrap().dimensions(), (200, 100));
        assert_eq!(stage.current_raster(1.0).unwrap().dimensions(), (100, 50));
    }

    #[test]
    fn test_layer_with_translation_and_opacity() {
        let mut stage = Stage::new(20, 20, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(1.0);
        let red = Arc::new(RgbaImage::from_pixel(5, 5, Rgba([255, 0, 0, 255])));
        stage.layers_mut().add_or_replace(
            "hood",
            red,
            Some(Transform { x: 10.0, y: 10.0, opacity: 0.5, ..Default::default() }),
        );

        let raster = stage.current_raster(1.0).unwrap();
        assert_eq!(*raster.get_pixel(5, 5), BACKGROUND);
        let inside = raster.get_pixel(12, 12);
        assert_eq!(inside.0[0], 255);
        assert!((inside.0[1] as i32 - 128).abs() <= 1);
        assert_eq!(inside.0[3], 255);
    }

    #[test]
    fn test_rotated_layer_lands_left_of_origin() {
        let mut stage = Stage::new(40, 40, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(1.0);
        let blue = Arc::new(RgbaImage::from_pixel(10, 4, Rgba([0, 0, 255, 255])));
        // 90 degrees clockwise around (20, 10): the strip hangs down from the origin
        stage.layers_mut().add_or_replace(
            "door",
            blue,
            Some(Transform { x: 20.0, y: 10.0, rotation: 90.0, ..Default::default() }),
        );

        let raster = stage.current_raster(1.0).unwrap();
        assert_eq!(*raster.get_pixel(18, 15), Rgba([0, 0, 255, 255]));
        assert_eq!(*raster.get_pixel(25, 12), BACKGROUND);
    }

    #[test]
    fn test_mask_on_top_and_hidden_by_guard() {
        let seg = ring_segmentation(100, 20, 4);
        let mut stage = Stage::from_segmentation(seg, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(1.0);

        let shown = stage.current_raster(1.0).unwrap();
        assert_eq!(*shown.get_pixel(2, 2), DEFAULT_FILL_COLOR);

        {
            let guard = stage.hide_overlays();
            let hidden = guard.current_raster(1.0).unwrap();
            assert_eq!(*hidden.get_pixel(2, 2), BACKGROUND);
            assert_eq!(*hidden.get_pixel(21, 50), BACKGROUND);
        }
        assert_eq!(stage.overlays(), OverlayVisibility::ALL);
    }

    #[test]
    fn test_lines_multiply_over_layers() {
        let seg = ring_segmentation(100, 20, 4);
        let mut stage = Stage::from_segmentation(seg, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(1.0);
        stage.set_overlays(OverlayVisibility { mask: false, lines: true, guides: true });

        let raster = stage.current_raster(1.0).unwrap();
        assert_eq!(*raster.get_pixel(21, 50), Rgba([211, 211, 211, 255]));
        assert_eq!(*raster.get_pixel(50, 50), BACKGROUND);
    }

    #[test]
    fn test_stroke_is_drawn_above_layers() {
        let mut stage = Stage::new(50, 50, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(1.0);
        stage.layers_mut().add_or_replace(
            FULL_WRAP_LAYER,
            Arc::new(RgbaImage::from_pixel(50, 50, Rgba([0, 255, 0, 255]))),
            None,
        );
        stage.layers_mut().begin_stroke(Rgba([0, 0, 0, 255]), 6.0);
        stage.layers_mut().extend_stroke((5.0, 25.0));
        stage.layers_mut().extend_stroke((45.0, 25.0));

        let raster = stage.current_raster(1.0).unwrap();
        assert_eq!(*raster.get_pixel(25, 25), Rgba([0, 0, 0, 255]));
        assert_eq!(*raster.get_pixel(25, 10), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn test_plate_guides_only_on_plates() {
        let mut plate = Stage::new(420, 200, CanvasType::Plate, PlateSize::Tall);
        plate.set_scale(1.0);
        assert_eq!(plate.plate_guides().len(), 2);
        let raster = plate.current_raster(1.0).unwrap();
        assert_ne!(*raster.get_pixel(0, 100), BACKGROUND);
        assert_ne!(*raster.get_pixel(200, 50), BACKGROUND);

        let mut car = Stage::new(420, 200, CanvasType::Car, PlateSize::Tall);
        car.set_scale(1.0);
        assert_eq!(*car.current_raster(1.0).unwrap().get_pixel(0, 100), BACKGROUND);
    }

    #[test]
    fn test_zero_scale_capture_fails() {
        let mut stage = Stage::new(10, 10, CanvasType::Car, PlateSize::Tall);
        stage.set_scale(0.0);
        assert!(matches!(stage.current_raster(1.0), Err(SurfaceError::Context { .. })));
    }
}
