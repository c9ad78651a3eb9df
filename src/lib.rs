mod assets;
mod bitmap;
mod cache;
mod controller;
mod element;
mod error;
mod font;
mod glyph;
mod image_loader;
mod layout;
mod metrics;
mod pipeline;
mod raster;
mod types;

pub use assets::{AssetKind, FetchFuture, FileFetcher, MemoryFetcher, ResourceFetcher};
pub use bitmap::Bitmap;
pub use cache::{ContentHashCache, content_hash, request_hash};
pub use controller::{
    CanvasRenderController, ExportCallback, ReadyCallback, RenderOutcome, RenderState,
    RenderedFrame, ResourceFlags, TimeoutCallback,
};
pub use element::{
    Alignment, Element, ElementBase, FitMode, HorizontalAnchor, ImageElement, MAX_RENDER_SCALE,
    MIN_RENDER_SCALE, RenderRequest, TemplateConfig, TextElement, TextLayoutPolicy,
    VerticalPlacement,
};
pub use error::RasterError;
pub use font::{FaceSet, FontCatalog, FontMetrics, FontMetricsService, ParsedFont};
pub use glyph::FaceMeasure;
pub use image_loader::{ImageLoadReport, ImageResourceLoader, ImageSet};
pub use layout::{ELLIPSIS, TextLayout, TextMeasure, layout_text, resize_down, truncate, wrap};
pub use metrics::{DrawStats, RenderTimings};
pub use pipeline::{DrawOutput, RenderResources, draw};
pub use raster::{FitPlacement, fit_image};
pub use types::{Color, Rect};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Process-level renderer. Owns the services shared by every canvas: the
/// resource fetcher, the font cache and the content-hash cache.
pub struct CertRaster {
    fetcher: Arc<dyn ResourceFetcher>,
    fonts: Arc<FontMetricsService>,
    cache: Arc<ContentHashCache>,
    default_timeout: Option<Duration>,
}

impl CertRaster {
    pub fn builder() -> CertRasterBuilder {
        CertRasterBuilder::new()
    }

    pub fn fonts(&self) -> &Arc<FontMetricsService> {
        &self.fonts
    }

    pub fn cache(&self) -> &Arc<ContentHashCache> {
        &self.cache
    }

    pub fn fetcher(&self) -> &Arc<dyn ResourceFetcher> {
        &self.fetcher
    }

    /// A new canvas controller with its own image cache. Attach callbacks with
    /// `on_ready` / `on_timeout` / `on_export` before rendering.
    pub fn controller(&self) -> CanvasRenderController {
        CanvasRenderController::new(
            Arc::clone(&self.fonts),
            Arc::clone(&self.cache),
            ImageResourceLoader::new(Arc::clone(&self.fetcher)),
        )
        .with_default_timeout(self.default_timeout)
    }

    /// One-shot render on a fresh controller.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderOutcome, RasterError> {
        self.controller().render(request).await
    }

    pub async fn render_json(&self, json: &str) -> Result<RenderOutcome, RasterError> {
        self.render(RenderRequest::from_json(json)?).await
    }

    /// Loads and parses `families` ahead of the first render.
    pub async fn preload_fonts(&self, families: &[String]) {
        self.fonts.ensure_all(families).await;
    }
}

pub struct CertRasterBuilder {
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    asset_root: Option<PathBuf>,
    catalog: FontCatalog,
    font_bytes: Vec<(String, Vec<u8>)>,
    system_font_fallback: bool,
    cache_max_entries: Option<usize>,
    default_timeout: Option<Duration>,
}

impl CertRasterBuilder {
    pub fn new() -> Self {
        Self {
            fetcher: None,
            asset_root: None,
            catalog: FontCatalog::new(),
            font_bytes: Vec::new(),
            system_font_fallback: true,
            cache_max_entries: None,
            default_timeout: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    // Relative asset paths resolve against this directory; ignored when a custom
    // fetcher is set.
    pub fn asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    pub fn font(mut self, family: impl Into<String>, url: impl Into<String>) -> Self {
        self.catalog.insert(family, url);
        self
    }

    pub fn default_family(mut self, family: impl Into<String>) -> Self {
        self.catalog.set_default_family(family);
        self
    }

    pub fn register_font_bytes(mut self, family: impl Into<String>, data: Vec<u8>) -> Self {
        self.font_bytes.push((family.into(), data));
        self
    }

    pub fn system_font_fallback(mut self, enabled: bool) -> Self {
        self.system_font_fallback = enabled;
        self
    }

    pub fn cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = Some(max_entries);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<CertRaster, RasterError> {
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(RasterError::InvalidConfiguration(
                "default timeout must be positive".to_string(),
            ));
        }
        if self.cache_max_entries == Some(0) {
            return Err(RasterError::InvalidConfiguration(
                "cache bound must be at least one entry".to_string(),
            ));
        }

        let fetcher: Arc<dyn ResourceFetcher> = match (self.fetcher, self.asset_root) {
            (Some(fetcher), _) => fetcher,
            (None, Some(root)) => Arc::new(FileFetcher::with_root(root)),
            (None, None) => Arc::new(FileFetcher::new()),
        };
        let fonts = FontMetricsService::new(self.catalog, Arc::clone(&fetcher))
            .with_system_fallback(self.system_font_fallback);
        for (family, data) in self.font_bytes {
            fonts.register_bytes(&family, data)?;
        }
        let cache = match self.cache_max_entries {
            Some(max) => ContentHashCache::with_max_entries(max),
            None => ContentHashCache::new(),
        };
        log::debug!(
            target: "certraster",
            "engine ready ({} catalog fonts, {} preloaded)",
            fonts.catalog().len(),
            fonts.cached_families().len()
        );

        Ok(CertRaster {
            fetcher,
            fonts: Arc::new(fonts),
            cache: Arc::new(cache),
            default_timeout: self.default_timeout,
        })
    }
}

impl Default for CertRasterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
