use crate::bitmap::Bitmap;
use crate::element::{Element, RenderRequest};
use crate::error::RasterError;
use crate::font::{FaceSet, FontMetrics, normalize_name};
use crate::glyph::FaceMeasure;
use crate::image_loader::ImageSet;
use crate::metrics::DrawStats;
use crate::raster::{DrawContext, DrawResult, draw_element};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tiny_skia::{Pixmap, Transform};

/// Everything the draw pass reads: activated faces, per-family metrics and decoded images.
#[derive(Debug, Clone, Default)]
pub struct RenderResources {
    pub(crate) faces: FaceSet,
    pub(crate) metrics: HashMap<String, FontMetrics>,
    pub(crate) images: ImageSet,
}

impl RenderResources {
    pub fn new(faces: FaceSet, metrics: HashMap<String, FontMetrics>, images: ImageSet) -> Self {
        let metrics = metrics
            .into_iter()
            .map(|(family, metrics)| (normalize_name(&family), metrics))
            .collect();
        Self {
            faces,
            metrics,
            images,
        }
    }

    pub(crate) fn measure_for(&self, family: &str) -> FaceMeasure {
        let face = self.faces.face_for(family).cloned();
        let metrics = match self.metrics.get(&normalize_name(family)) {
            Some(metrics) => *metrics,
            None => face
                .as_ref()
                .map(|face| face.metrics())
                .unwrap_or(FontMetrics::Fallback),
        };
        FaceMeasure::new(face, metrics)
    }
}

#[derive(Debug, Clone)]
pub struct DrawOutput {
    pub bitmap: Bitmap,
    pub generation_ms: f64,
    pub stats: DrawStats,
}

/// Paints every element of `request` onto a fresh transparent backing store sized
/// `config × render_scale`, in ascending render order.
pub fn draw(request: &RenderRequest, resources: &RenderResources) -> Result<DrawOutput, RasterError> {
    request.validate()?;
    let start = Instant::now();
    let scale = request.render_scale;
    let width_px = backing_dimension(request.config.width, scale)?;
    let height_px = backing_dimension(request.config.height, scale)?;
    let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
        RasterError::InvalidConfiguration(format!(
            "cannot allocate {width_px}x{height_px} backing store"
        ))
    })?;
    pixmap.fill(tiny_skia::Color::TRANSPARENT);

    let mut stats = DrawStats::default();
    {
        let mut ctx = DrawContext::new(&mut pixmap, Transform::from_scale(scale, scale));
        for element in ordered(&request.elements) {
            match draw_element(&mut ctx, element, resources, request.show_debug_borders) {
                DrawResult::Drawn => stats.drawn += 1,
                DrawResult::Hidden => stats.skipped_hidden += 1,
                DrawResult::MissingImage => stats.missing_images += 1,
            }
        }
    }

    let generation_ms = start.elapsed().as_secs_f64() * 1000.0;
    log::debug!(
        target: "certraster::pipeline",
        "template {} drawn at {}x{} ({} elements, {} hidden) in {:.2}ms",
        request.template_id,
        width_px,
        height_px,
        stats.drawn,
        stats.skipped_hidden,
        generation_ms
    );
    Ok(DrawOutput {
        bitmap: Bitmap::new(
            Arc::new(pixmap),
            request.config.width,
            request.config.height,
            scale,
        ),
        generation_ms,
        stats,
    })
}

/// Elements sorted by render order; ties keep input order.
pub(crate) fn ordered(elements: &[Element]) -> Vec<&Element> {
    let mut out: Vec<&Element> = elements.iter().collect();
    out.sort_by_key(|element| element.render_order());
    out
}

fn backing_dimension(logical: f32, scale: f32) -> Result<u32, RasterError> {
    let px = (logical * scale).round();
    if !px.is_finite() || px < 1.0 || px > u32::MAX as f32 {
        return Err(RasterError::InvalidConfiguration(format!(
            "backing dimension {logical} x {scale} is out of range"
        )));
    }
    Ok(px as u32)
}
