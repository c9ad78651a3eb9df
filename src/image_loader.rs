use crate::assets::{AssetKind, ResourceFetcher, parse_data_uri};
use crate::element::Element;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tiny_skia::Pixmap;
use tokio::task::JoinSet;

pub type ImageSet = HashMap<String, Arc<Pixmap>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageLoadReport {
    pub requested: usize,
    pub reused: usize,
    pub loaded: usize,
    pub failed: Vec<String>,
}

/// Fetches and decodes the images referenced by a template. Decoded images stay
/// cached for the lifetime of the loader.
pub struct ImageResourceLoader {
    fetcher: Arc<dyn ResourceFetcher>,
    cache: Mutex<ImageSet>,
}

impl ImageResourceLoader {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, url: &str) -> Option<Arc<Pixmap>> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(url).cloned())
    }

    pub fn images(&self) -> ImageSet {
        self.cache
            .lock()
            .map(|cache| cache.clone())
            .unwrap_or_default()
    }

    /// Loads every distinct image URL. Individual failures are logged and reported;
    /// the call itself always completes.
    pub async fn load(&self, elements: &[Element]) -> ImageLoadReport {
        let urls = image_urls(elements);
        let mut report = ImageLoadReport {
            requested: urls.len(),
            ..ImageLoadReport::default()
        };

        let pending: Vec<String> = {
            let cache = self.cache.lock().map(|c| c.clone()).unwrap_or_default();
            urls.into_iter()
                .filter(|url| !cache.contains_key(url))
                .collect()
        };
        report.reused = report.requested - pending.len();
        if pending.is_empty() {
            return report;
        }

        let mut tasks = JoinSet::new();
        for url in pending {
            let fetcher = Arc::clone(&self.fetcher);
            tasks.spawn(async move {
                let bytes = fetcher.fetch(&url, AssetKind::Image).await;
                (url, bytes)
            });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((url, Ok(bytes))) => fetched.push((url, bytes)),
                Ok((url, Err(err))) => {
                    log::warn!(target: "certraster::image", "image {url} unavailable: {err}");
                    report.failed.push(url);
                }
                Err(err) => {
                    log::warn!(target: "certraster::image", "image fetch task failed: {err}");
                }
            }
        }

        let decoded = tokio::task::spawn_blocking(move || {
            fetched
                .into_par_iter()
                .map(|(url, bytes)| {
                    let mime = parse_data_uri(&url).map(|(mime, _)| mime);
                    let pixmap = decode_image_to_pixmap(&bytes, mime.as_deref());
                    (url, pixmap)
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_else(|err| {
            log::warn!(target: "certraster::image", "image decode pool failed: {err}");
            Vec::new()
        });

        if let Ok(mut cache) = self.cache.lock() {
            for (url, pixmap) in decoded {
                match pixmap {
                    Some(pixmap) => {
                        cache.insert(url, Arc::new(pixmap));
                        report.loaded += 1;
                    }
                    None => {
                        log::warn!(target: "certraster::image", "image {url} could not be decoded");
                        report.failed.push(url);
                    }
                }
            }
        }
        report.failed.sort();
        report
    }
}

pub(crate) fn image_urls(elements: &[Element]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for element in elements {
        if let Element::Image(image) = element {
            let url = image.image_url.trim();
            if !url.is_empty() && !out.iter().any(|seen| seen == url) {
                out.push(url.to_string());
            }
        }
    }
    out
}

pub(crate) fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let guessed_format = match mime {
        Some(mime) if mime.contains("png") => Some(image::ImageFormat::Png),
        Some(mime) if mime.contains("jpeg") || mime.contains("jpg") => {
            Some(image::ImageFormat::Jpeg)
        }
        _ => image::guess_format(data).ok(),
    };

    let decoded = match guessed_format {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}
