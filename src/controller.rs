use crate::bitmap::Bitmap;
use crate::cache::{ContentHashCache, request_hash};
use crate::element::RenderRequest;
use crate::error::RasterError;
use crate::font::{FaceSet, FontMetrics, FontMetricsService};
use crate::image_loader::{ImageLoadReport, ImageResourceLoader};
use crate::metrics::{DrawStats, RenderTimings};
use crate::pipeline::{self, RenderResources};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type ReadyCallback = Box<dyn Fn(RenderTimings) + Send + Sync>;
pub type TimeoutCallback = Box<dyn Fn() + Send + Sync>;
pub type ExportCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    LoadingResources,
    Drawing,
    Ready,
}

/// Readiness of the three resource loaders for the current request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceFlags {
    pub fonts_activated: bool,
    pub metrics_loaded: bool,
    pub images_loaded: bool,
}

impl ResourceFlags {
    pub fn all_ready(&self) -> bool {
        self.fonts_activated && self.metrics_loaded && self.images_loaded
    }
}

#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub bitmap: Bitmap,
    pub timings: RenderTimings,
    pub hash: String,
    pub from_cache: bool,
    pub stats: DrawStats,
    pub images: ImageLoadReport,
}

#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Ready(RenderedFrame),
    /// A newer request started before this one finished; its result was dropped.
    Superseded,
}

impl RenderOutcome {
    pub fn frame(&self) -> Option<&RenderedFrame> {
        match self {
            RenderOutcome::Ready(frame) => Some(frame),
            RenderOutcome::Superseded => None,
        }
    }

    pub fn into_frame(self) -> Option<RenderedFrame> {
        match self {
            RenderOutcome::Ready(frame) => Some(frame),
            RenderOutcome::Superseded => None,
        }
    }
}

struct ControllerState {
    generation: u64,
    state: RenderState,
    flags: ResourceFlags,
    timed_out: bool,
    last_bitmap: Option<Bitmap>,
    last_timings: Option<RenderTimings>,
}

/// Drives one canvas: resource loading, the draw pass, the advisory timeout and
/// the ready notification. Each `render` call is a new request generation; a
/// request that is overtaken finishes its work but reports `Superseded`.
pub struct CanvasRenderController {
    fonts: Arc<FontMetricsService>,
    cache: Arc<ContentHashCache>,
    images: ImageResourceLoader,
    default_timeout: Option<Duration>,
    state: Mutex<ControllerState>,
    on_ready: Option<ReadyCallback>,
    on_timeout: Option<TimeoutCallback>,
    on_export: Option<ExportCallback>,
}

impl CanvasRenderController {
    pub fn new(
        fonts: Arc<FontMetricsService>,
        cache: Arc<ContentHashCache>,
        images: ImageResourceLoader,
    ) -> Self {
        Self {
            fonts,
            cache,
            images,
            default_timeout: None,
            state: Mutex::new(ControllerState {
                generation: 0,
                state: RenderState::Idle,
                flags: ResourceFlags::default(),
                timed_out: false,
                last_bitmap: None,
                last_timings: None,
            }),
            on_ready: None,
            on_timeout: None,
            on_export: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn on_ready(mut self, callback: impl Fn(RenderTimings) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Box::new(callback));
        self
    }

    pub fn on_timeout(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    pub fn on_export(mut self, callback: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_export = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> RenderState {
        self.read(|s| s.state).unwrap_or(RenderState::Idle)
    }

    pub fn flags(&self) -> ResourceFlags {
        self.read(|s| s.flags).unwrap_or_default()
    }

    pub fn timed_out(&self) -> bool {
        self.read(|s| s.timed_out).unwrap_or(false)
    }

    pub fn generation(&self) -> u64 {
        self.read(|s| s.generation).unwrap_or(0)
    }

    pub fn last_bitmap(&self) -> Option<Bitmap> {
        self.read(|s| s.last_bitmap.clone()).flatten()
    }

    pub fn last_timings(&self) -> Option<RenderTimings> {
        self.read(|s| s.last_timings).flatten()
    }

    /// PNG of the last finished bitmap, downsampled to display size when the
    /// request was rendered above 1x. `None` before the first render completes.
    pub fn download(&self) -> Result<Option<Vec<u8>>, RasterError> {
        self.last_bitmap().map(|bitmap| bitmap.export_png()).transpose()
    }

    pub fn export_png(&self) -> Result<Option<Vec<u8>>, RasterError> {
        self.download()
    }

    pub fn to_data_url(&self) -> Result<Option<String>, RasterError> {
        self.last_bitmap()
            .map(|bitmap| bitmap.to_data_url())
            .transpose()
    }

    pub async fn render(&self, request: RenderRequest) -> Result<RenderOutcome, RasterError> {
        request.validate()?;
        let generation = self.begin();

        let hash_start = Instant::now();
        let hash = request_hash(&request)?;
        let hash_generation_ms = elapsed_ms(hash_start);

        if let Some(bitmap) = self.cache.get(&hash) {
            log::debug!(
                target: "certraster::controller",
                "template {} served from cache ({})",
                request.template_id,
                &hash[..12]
            );
            let timings = RenderTimings {
                canvas_generation_ms: 0.0,
                hash_generation_ms,
                resource_load_ms: 0.0,
            };
            let frame = RenderedFrame {
                bitmap,
                timings,
                hash,
                from_cache: true,
                stats: DrawStats::default(),
                images: ImageLoadReport::default(),
            };
            self.mark(generation, |flags| {
                *flags = ResourceFlags {
                    fonts_activated: true,
                    metrics_loaded: true,
                    images_loaded: true,
                }
            });
            return self.complete(generation, frame);
        }

        self.transition(generation, RenderState::LoadingResources);
        let families = request.font_families();
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.default_timeout);

        let load_start = Instant::now();
        let loading = self.load_resources(generation, &request, &families);
        let (faces, image_report) = match timeout {
            Some(limit) => {
                tokio::pin!(loading);
                let early = tokio::select! {
                    loaded = &mut loading => Some(loaded),
                    _ = tokio::time::sleep(limit) => None,
                };
                match early {
                    Some(loaded) => loaded,
                    None => {
                        self.fire_timeout(generation, limit);
                        loading.await
                    }
                }
            }
            None => loading.await,
        };
        let resource_load_ms = elapsed_ms(load_start);

        if !self.ready_to_draw(generation) {
            log::debug!(
                target: "certraster::controller",
                "template {} superseded during resource load",
                request.template_id
            );
            return Ok(RenderOutcome::Superseded);
        }
        self.transition(generation, RenderState::Drawing);

        let metrics = self.family_metrics(&families);
        let resources = RenderResources::new(faces, metrics, self.images.images());
        let output = pipeline::draw(&request, &resources)?;
        self.cache.put(hash.clone(), output.bitmap.clone());

        let frame = RenderedFrame {
            bitmap: output.bitmap,
            timings: RenderTimings {
                canvas_generation_ms: output.generation_ms,
                hash_generation_ms,
                resource_load_ms,
            },
            hash,
            from_cache: false,
            stats: output.stats,
            images: image_report,
        };
        self.complete(generation, frame)
    }

    async fn load_resources(
        &self,
        generation: u64,
        request: &RenderRequest,
        families: &[String],
    ) -> (FaceSet, ImageLoadReport) {
        let activation = async {
            let faces = self.fonts.activate(families).await;
            self.mark(generation, |flags| flags.fonts_activated = true);
            faces
        };
        let metrics = async {
            self.fonts.ensure_all(families).await;
            self.mark(generation, |flags| flags.metrics_loaded = true);
        };
        let images = async {
            let report = self.images.load(&request.elements).await;
            self.mark(generation, |flags| flags.images_loaded = true);
            report
        };
        let (faces, (), report) = tokio::join!(activation, metrics, images);
        (faces, report)
    }

    // Only families with their own parsed font; the rest measure with whatever
    // face activation picked for them.
    fn family_metrics(&self, families: &[String]) -> HashMap<String, FontMetrics> {
        families
            .iter()
            .filter_map(|family| {
                self.fonts
                    .parsed(family)
                    .map(|font| (family.clone(), font.metrics()))
            })
            .collect()
    }

    fn begin(&self) -> u64 {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        state.generation += 1;
        state.flags = ResourceFlags::default();
        state.timed_out = false;
        state.state = RenderState::LoadingResources;
        state.generation
    }

    fn transition(&self, generation: u64, next: RenderState) {
        if let Ok(mut state) = self.state.lock() {
            if state.generation == generation {
                log::trace!(
                    target: "certraster::controller",
                    "generation {generation}: {:?} -> {:?}",
                    state.state,
                    next
                );
                state.state = next;
            }
        }
    }

    fn mark(&self, generation: u64, update: impl FnOnce(&mut ResourceFlags)) {
        if let Ok(mut state) = self.state.lock() {
            if state.generation == generation {
                update(&mut state.flags);
            }
        }
    }

    fn ready_to_draw(&self, generation: u64) -> bool {
        self.read(|s| s.generation == generation && s.flags.all_ready())
            .unwrap_or(false)
    }

    fn fire_timeout(&self, generation: u64, limit: Duration) {
        let fire = match self.state.lock() {
            Ok(mut state) => {
                let pending = state.generation == generation
                    && state.state != RenderState::Ready
                    && !state.timed_out;
                if pending {
                    state.timed_out = true;
                }
                pending
            }
            Err(_) => false,
        };
        if !fire {
            return;
        }
        log::warn!(
            target: "certraster::controller",
            "resources not ready after {}ms; still waiting",
            limit.as_millis()
        );
        if let Some(callback) = &self.on_timeout {
            callback();
        }
    }

    fn complete(&self, generation: u64, frame: RenderedFrame) -> Result<RenderOutcome, RasterError> {
        let current = match self.state.lock() {
            Ok(mut state) if state.generation == generation => {
                state.state = RenderState::Ready;
                state.last_bitmap = Some(frame.bitmap.clone());
                state.last_timings = Some(frame.timings);
                true
            }
            _ => false,
        };
        if !current {
            return Ok(RenderOutcome::Superseded);
        }

        if let Some(callback) = &self.on_ready {
            callback(frame.timings);
        }
        if let Some(callback) = &self.on_export {
            let png = frame.bitmap.export_png()?;
            callback(&png);
        }
        Ok(RenderOutcome::Ready(frame))
    }

    fn read<R>(&self, f: impl FnOnce(&ControllerState) -> R) -> Option<R> {
        self.state.lock().ok().map(|state| f(&state))
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
