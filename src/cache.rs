use crate::bitmap::Bitmap;
use crate::element::{Element, RenderRequest, TemplateConfig};
use crate::error::RasterError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashInput<'a> {
    elements: &'a [Element],
    config: &'a TemplateConfig,
    show_debug_borders: bool,
    render_scale: f32,
}

/// Hex SHA-256 over the canonical JSON of everything that affects the pixels.
pub fn content_hash(
    elements: &[Element],
    config: &TemplateConfig,
    show_debug_borders: bool,
    render_scale: f32,
) -> Result<String, RasterError> {
    let bytes = serde_json::to_vec(&HashInput {
        elements,
        config,
        show_debug_borders,
        render_scale,
    })?;
    Ok(hex_sha256(&bytes))
}

pub fn request_hash(request: &RenderRequest) -> Result<String, RasterError> {
    content_hash(
        &request.elements,
        &request.config,
        request.show_debug_borders,
        request.render_scale,
    )
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Bitmap>,
    order: VecDeque<String>,
}

/// Finished bitmaps keyed by content hash. Unbounded unless a capacity is set, in
/// which case the oldest insertion is evicted first.
#[derive(Default)]
pub struct ContentHashCache {
    state: Mutex<CacheState>,
    max_entries: Option<usize>,
}

impl ContentHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    pub fn get(&self, hash: &str) -> Option<Bitmap> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.entries.get(hash).cloned())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.entries.contains_key(hash))
            .unwrap_or(false)
    }

    pub fn put(&self, hash: String, bitmap: Bitmap) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.entries.insert(hash.clone(), bitmap).is_none() {
            state.order.push_back(hash);
        }
        if let Some(max) = self.max_entries {
            while state.entries.len() > max {
                let Some(oldest) = state.order.pop_front() else {
                    break;
                };
                state.entries.remove(&oldest);
                log::trace!(target: "certraster::cache", "evicted {oldest}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.clear();
            state.order.clear();
        }
    }
}
