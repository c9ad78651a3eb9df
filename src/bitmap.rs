use crate::error::RasterError;
use base64::Engine;
use std::borrow::Cow;
use std::sync::Arc;
use tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};

/// A finished raster plus the logical size it represents. The backing store is
/// `display × scale` pixels.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pixmap: Arc<Pixmap>,
    display_width: f32,
    display_height: f32,
    scale: f32,
}

impl Bitmap {
    pub fn new(pixmap: Arc<Pixmap>, display_width: f32, display_height: f32, scale: f32) -> Self {
        Self {
            pixmap,
            display_width,
            display_height,
            scale,
        }
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixel_width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn pixel_height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn display_width(&self) -> f32 {
        self.display_width
    }

    pub fn display_height(&self) -> f32 {
        self.display_height
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Straight-alpha RGBA of the backing pixel at `(x, y)`.
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let px = self.pixmap.pixel(x, y)?.demultiply();
        Some([px.red(), px.green(), px.blue(), px.alpha()])
    }

    pub fn same_pixels(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.pixmap, &other.pixmap) || self.pixmap.data() == other.pixmap.data()
    }

    /// The image handed out on export: downsampled to the display size when the
    /// backing store was rendered above 1x, otherwise the backing store itself.
    pub fn export_pixmap(&self) -> Result<Cow<'_, Pixmap>, RasterError> {
        if self.scale <= 1.0 {
            return Ok(Cow::Borrowed(self.pixmap.as_ref()));
        }
        let width = self.display_width.round().max(1.0) as u32;
        let height = self.display_height.round().max(1.0) as u32;
        if width == self.pixmap.width() && height == self.pixmap.height() {
            return Ok(Cow::Borrowed(self.pixmap.as_ref()));
        }
        let mut out = Pixmap::new(width, height).ok_or_else(|| {
            RasterError::Encode(format!("cannot allocate {width}x{height} export"))
        })?;
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        let source: &Pixmap = &self.pixmap;
        let sx = width as f32 / source.width() as f32;
        let sy = height as f32 / source.height() as f32;
        out.draw_pixmap(
            0,
            0,
            source.as_ref(),
            &paint,
            Transform::from_scale(sx, sy),
            None,
        );
        Ok(Cow::Owned(out))
    }

    pub fn export_png(&self) -> Result<Vec<u8>, RasterError> {
        self.export_pixmap()?
            .encode_png()
            .map_err(|e| RasterError::Encode(format!("png encode failed: {e}")))
    }

    pub fn to_data_url(&self) -> Result<String, RasterError> {
        let png = self.export_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}
