/// Wall-clock timings reported with the ready notification.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderTimings {
    pub canvas_generation_ms: f64,
    pub hash_generation_ms: f64,
    pub resource_load_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub drawn: usize,
    pub skipped_hidden: usize,
    pub missing_images: usize,
}
