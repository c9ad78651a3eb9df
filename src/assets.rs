use crate::error::RasterError;
use base64::Engine;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Font,
    Image,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Font => "font",
            AssetKind::Image => "image",
        }
    }
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, RasterError>> + Send + 'a>>;

/// Retrieves the raw bytes behind a font or image reference.
///
/// Implementations must be cheap to share: the engine holds one fetcher behind an
/// `Arc` and calls it from concurrently running resource tasks.
pub trait ResourceFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str, kind: AssetKind) -> FetchFuture<'a>;
}

/// Reads `data:` URIs inline and everything else from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative references resolve against `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
        }
    }

    fn resolve_path(&self, url: &str) -> Result<PathBuf, RasterError> {
        let raw = url.strip_prefix("file://").unwrap_or(url);
        if let Some((scheme, _)) = raw.split_once("://") {
            return Err(RasterError::Asset(format!(
                "unsupported scheme '{scheme}' for {url}"
            )));
        }
        let path = Path::new(raw);
        match &self.root {
            Some(root) if path.is_relative() => Ok(root.join(path)),
            _ => Ok(path.to_path_buf()),
        }
    }
}

impl ResourceFetcher for FileFetcher {
    fn fetch<'a>(&'a self, url: &'a str, kind: AssetKind) -> FetchFuture<'a> {
        Box::pin(async move {
            if let Some((_, data)) = parse_data_uri(url) {
                return Ok(data);
            }
            let path = self.resolve_path(url)?;
            log::trace!(target: "certraster::assets", "reading {} {}", kind.as_str(), path.display());
            tokio::fs::read(&path).await.map_err(|err| {
                RasterError::Asset(format!("{} {}: {err}", kind.as_str(), path.display()))
            })
        })
    }
}

/// In-memory asset table. Also resolves `data:` URIs.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    assets: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    fetch_counts: Mutex<HashMap<String, usize>>,
    latency: Option<Duration>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `latency` before resolving.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn insert(&self, url: impl Into<String>, data: Vec<u8>) {
        if let Ok(mut assets) = self.assets.lock() {
            assets.insert(url.into(), Arc::new(data));
        }
    }

    /// Number of fetches issued for `url` so far, successful or not.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetch_counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(url).copied())
            .unwrap_or(0)
    }
}

impl ResourceFetcher for MemoryFetcher {
    fn fetch<'a>(&'a self, url: &'a str, kind: AssetKind) -> FetchFuture<'a> {
        Box::pin(async move {
            if let Ok(mut counts) = self.fetch_counts.lock() {
                *counts.entry(url.to_string()).or_insert(0) += 1;
            }
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if let Some((_, data)) = parse_data_uri(url) {
                return Ok(data);
            }
            let found = self
                .assets
                .lock()
                .ok()
                .and_then(|assets| assets.get(url).cloned());
            match found {
                Some(data) => Ok(data.as_ref().clone()),
                None => Err(RasterError::Asset(format!(
                    "{} not found: {url}",
                    kind.as_str()
                ))),
            }
        })
    }
}

pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}
