use crate::assets::{AssetKind, ResourceFetcher};
use crate::error::RasterError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;

const FALLBACK_LINE_HEIGHT: f32 = 1.2;
const FALLBACK_BASELINE: f32 = 0.8;

/// Maps font family names to loadable font assets.
#[derive(Debug, Clone, Default)]
pub struct FontCatalog {
    entries: HashMap<String, CatalogEntry>,
    default_family: Option<String>,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    family: String,
    url: String,
}

impl FontCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, family: impl Into<String>, url: impl Into<String>) {
        let family = family.into();
        let key = normalize_name(&family);
        if key.is_empty() {
            return;
        }
        self.entries.insert(
            key,
            CatalogEntry {
                family,
                url: url.into(),
            },
        );
    }

    pub fn with_font(mut self, family: impl Into<String>, url: impl Into<String>) -> Self {
        self.insert(family, url);
        self
    }

    pub fn set_default_family(&mut self, family: impl Into<String>) {
        self.default_family = Some(family.into());
    }

    pub fn default_family(&self) -> Option<&str> {
        self.default_family.as_deref()
    }

    pub fn resolve(&self, family: &str) -> Option<&str> {
        self.entries
            .get(&normalize_name(family))
            .map(|entry| entry.url.as_str())
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| entry.family.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Font tables needed for layout and glyph drawing. Immutable once parsed.
#[derive(Debug)]
pub struct ParsedFont {
    pub(crate) family: String,
    pub(crate) data: Arc<Vec<u8>>,
    pub(crate) units_per_em: u16,
    pub(crate) ascender: i16,
    pub(crate) descender: i16,
    pub(crate) line_gap: i16,
}

impl ParsedFont {
    pub fn from_bytes(family: impl Into<String>, data: Vec<u8>) -> Result<Self, RasterError> {
        let family = family.into();
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|err| RasterError::Font(format!("{family}: {err}")))?;
        let units_per_em = face.units_per_em().max(1);
        let ascender = face.ascender();
        let descender = face.descender();
        let line_gap = face.line_gap();
        Ok(Self {
            family,
            data: Arc::new(data),
            units_per_em,
            ascender,
            descender,
            line_gap,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn metrics(&self) -> FontMetrics {
        FontMetrics::Parsed {
            units_per_em: self.units_per_em,
            ascender: self.ascender,
            descender: self.descender,
            line_gap: self.line_gap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FontMetrics {
    Parsed {
        units_per_em: u16,
        ascender: i16,
        descender: i16,
        line_gap: i16,
    },
    Fallback,
}

impl FontMetrics {
    pub fn line_height(&self, font_size: f32) -> f32 {
        match *self {
            FontMetrics::Parsed {
                units_per_em,
                ascender,
                descender,
                line_gap,
            } => {
                let scale = font_size / units_per_em.max(1) as f32;
                (ascender as f32 - descender as f32 + line_gap as f32) * scale
            }
            FontMetrics::Fallback => font_size * FALLBACK_LINE_HEIGHT,
        }
    }

    pub fn baseline_offset(&self, font_size: f32) -> f32 {
        match *self {
            FontMetrics::Parsed {
                units_per_em,
                ascender,
                ..
            } => ascender as f32 * (font_size / units_per_em.max(1) as f32),
            FontMetrics::Fallback => font_size * FALLBACK_BASELINE,
        }
    }
}

type InFlight = Arc<OnceCell<Option<Arc<ParsedFont>>>>;

/// Resolves, retrieves and parses font assets, once per family for the life of the
/// service. Concurrent requests for one family share a single retrieval.
pub struct FontMetricsService {
    catalog: FontCatalog,
    fetcher: Arc<dyn ResourceFetcher>,
    parsed: Mutex<HashMap<String, Arc<ParsedFont>>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    system_fallback: bool,
    system_face: OnceLock<Option<Arc<ParsedFont>>>,
}

impl FontMetricsService {
    pub fn new(catalog: FontCatalog, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            catalog,
            fetcher,
            parsed: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            system_fallback: true,
            system_face: OnceLock::new(),
        }
    }

    pub fn with_system_fallback(mut self, enabled: bool) -> Self {
        self.system_fallback = enabled;
        self
    }

    pub fn catalog(&self) -> &FontCatalog {
        &self.catalog
    }

    /// Seeds the cache with an already available font program.
    pub fn register_bytes(&self, family: &str, data: Vec<u8>) -> Result<(), RasterError> {
        let font = ParsedFont::from_bytes(family, data)?;
        if let Ok(mut parsed) = self.parsed.lock() {
            parsed.insert(normalize_name(family), Arc::new(font));
        }
        Ok(())
    }

    pub fn parsed(&self, family: &str) -> Option<Arc<ParsedFont>> {
        self.parsed
            .lock()
            .ok()
            .and_then(|parsed| parsed.get(&normalize_name(family)).cloned())
    }

    pub fn cached_families(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .parsed
            .lock()
            .map(|parsed| parsed.values().map(|font| font.family.clone()).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn metrics(&self, family: &str) -> FontMetrics {
        self.parsed(family)
            .map(|font| font.metrics())
            .unwrap_or(FontMetrics::Fallback)
    }

    /// Loads `family` if it is not cached yet. Failures are logged and leave the
    /// family on fallback metrics.
    pub async fn ensure(&self, family: &str) -> Option<Arc<ParsedFont>> {
        if let Some(font) = self.parsed(family) {
            return Some(font);
        }
        let Some(url) = self.catalog.resolve(family).map(str::to_string) else {
            log::warn!(target: "certraster::font", "no font asset for family '{family}'");
            return None;
        };

        let key = normalize_name(family);
        let cell = {
            let Ok(mut in_flight) = self.in_flight.lock() else {
                return None;
            };
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };

        let result = cell
            .get_or_init(|| self.load(family, &url, &key))
            .await
            .clone();

        if let Ok(mut in_flight) = self.in_flight.lock() {
            if in_flight
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.remove(&key);
            }
        }
        result
    }

    async fn load(&self, family: &str, url: &str, key: &str) -> Option<Arc<ParsedFont>> {
        log::debug!(target: "certraster::font", "fetching '{family}' from {url}");
        let bytes = match self.fetcher.fetch(url, AssetKind::Font).await {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!(target: "certraster::font", "font '{family}' unavailable: {err}");
                return None;
            }
        };
        match ParsedFont::from_bytes(family, bytes) {
            Ok(font) => {
                let font = Arc::new(font);
                if let Ok(mut parsed) = self.parsed.lock() {
                    parsed.insert(key.to_string(), Arc::clone(&font));
                }
                Some(font)
            }
            Err(err) => {
                log::warn!(target: "certraster::font", "font '{family}' failed to parse: {err}");
                None
            }
        }
    }

    /// Ensures every family concurrently; resolves once all of them settled.
    pub async fn ensure_all(self: &Arc<Self>, families: &[String]) {
        let mut tasks = JoinSet::new();
        for family in families {
            let service = Arc::clone(self);
            let family = family.clone();
            tasks.spawn(async move {
                service.ensure(&family).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Resolves a drawable face for each family: its own font, else the catalog
    /// default, else a system sans-serif when enabled.
    pub async fn activate(self: &Arc<Self>, families: &[String]) -> FaceSet {
        let mut tasks = JoinSet::new();
        for family in families {
            let service = Arc::clone(self);
            let family = family.clone();
            tasks.spawn(async move {
                let face = service.ensure(&family).await;
                (family, face)
            });
        }

        let mut set = FaceSet::default();
        let mut missing = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((family, Some(face))) => {
                    set.insert(&family, face);
                }
                Ok((family, None)) => missing.push(family),
                Err(err) => {
                    log::warn!(target: "certraster::font", "font activation task failed: {err}");
                }
            }
        }

        if !missing.is_empty() {
            set.fallback = self.fallback_face().await;
            for family in &missing {
                match &set.fallback {
                    Some(face) => log::debug!(
                        target: "certraster::font",
                        "'{family}' falls back to '{}'",
                        face.family
                    ),
                    None => log::warn!(
                        target: "certraster::font",
                        "no face available for '{family}'; text measured with fallback advances"
                    ),
                }
            }
        }
        set
    }

    async fn fallback_face(&self) -> Option<Arc<ParsedFont>> {
        if let Some(default_family) = self.catalog.default_family() {
            if let Some(face) = self.ensure(default_family).await {
                return Some(face);
            }
        }
        if !self.system_fallback {
            return None;
        }
        if let Some(face) = self.system_face.get() {
            return face.clone();
        }
        let loaded = tokio::task::spawn_blocking(load_system_fallback_font)
            .await
            .ok()
            .flatten();
        self.system_face.get_or_init(|| loaded).clone()
    }
}

/// Faces selected for one render, keyed by normalized family.
#[derive(Debug, Clone, Default)]
pub struct FaceSet {
    faces: HashMap<String, Arc<ParsedFont>>,
    fallback: Option<Arc<ParsedFont>>,
}

impl FaceSet {
    pub fn insert(&mut self, family: &str, face: Arc<ParsedFont>) {
        self.faces.insert(normalize_name(family), face);
    }

    /// Face used for every family without one of its own.
    pub fn with_fallback(mut self, face: Arc<ParsedFont>) -> Self {
        self.fallback = Some(face);
        self
    }

    pub fn face_for(&self, family: &str) -> Option<&Arc<ParsedFont>> {
        self.faces
            .get(&normalize_name(family))
            .or(self.fallback.as_ref())
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.fallback.is_none()
    }
}

const SYSTEM_FALLBACK_FILES: &[&str] = &[
    "DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
    "NotoSans-Regular.ttf",
    "arial.ttf",
    "Arial.ttf",
    "segoeui.ttf",
    "Helvetica.ttc",
];

fn load_system_fallback_font() -> Option<Arc<ParsedFont>> {
    for dir in system_font_dirs() {
        for file_name in SYSTEM_FALLBACK_FILES {
            let Some(path) = find_font_file(&dir, file_name, 4) else {
                continue;
            };
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let family = file_name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(file_name);
            if let Ok(font) = ParsedFont::from_bytes(family, bytes) {
                log::debug!(target: "certraster::font", "system fallback font {}", path.display());
                return Some(Arc::new(font));
            }
        }
    }
    None
}

fn find_font_file(dir: &std::path::Path, file_name: &str, depth: usize) -> Option<PathBuf> {
    let direct = dir.join(file_name);
    if direct.is_file() {
        return Some(direct);
    }
    if depth == 0 {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_font_file(&path, file_name, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(extra) = std::env::var("CERTRASTER_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assets::MemoryFetcher;
    use std::time::Duration;

    pub(crate) const DEJAVU_SANS: &[u8] = include_bytes!("../tests/fixtures/DejaVuSans.ttf");

    pub(crate) fn dejavu() -> Arc<ParsedFont> {
        Arc::new(ParsedFont::from_bytes("DejaVu Sans", DEJAVU_SANS.to_vec()).unwrap())
    }

    fn service_with(fetcher: Arc<MemoryFetcher>, catalog: FontCatalog) -> Arc<FontMetricsService> {
        Arc::new(FontMetricsService::new(catalog, fetcher).with_system_fallback(false))
    }

    #[test]
    fn parsed_metrics_follow_font_units() {
        let metrics = FontMetrics::Parsed {
            units_per_em: 1000,
            ascender: 800,
            descender: -200,
            line_gap: 100,
        };
        assert!((metrics.line_height(20.0) - 22.0).abs() < 1e-4);
        assert!((metrics.baseline_offset(20.0) - 16.0).abs() < 1e-4);
    }

    #[test]
    fn fallback_metrics_use_fixed_ratios() {
        assert!((FontMetrics::Fallback.line_height(10.0) - 12.0).abs() < 1e-4);
        assert!((FontMetrics::Fallback.baseline_offset(10.0) - 8.0).abs() < 1e-4);
    }

    #[test]
    fn catalog_lookup_ignores_case_and_quotes() {
        let catalog = FontCatalog::new().with_font("Open Sans", "fonts/OpenSans.ttf");
        assert_eq!(catalog.resolve("'open sans'"), Some("fonts/OpenSans.ttf"));
        assert_eq!(catalog.resolve("Lato"), None);
        assert_eq!(catalog.families().collect::<Vec<_>>(), vec!["Open Sans"]);
    }

    #[test]
    fn garbage_bytes_do_not_parse() {
        let result = ParsedFont::from_bytes("Broken", vec![0, 1, 2, 3]);
        assert!(matches!(result, Err(RasterError::Font(_))));
    }

    #[tokio::test]
    async fn unresolved_family_gets_fallback_metrics() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let service = service_with(Arc::clone(&fetcher), FontCatalog::new());
        assert!(service.ensure("Nowhere").await.is_none());
        assert_eq!(service.metrics("Nowhere"), FontMetrics::Fallback);
        assert_eq!(fetcher.fetch_count("Nowhere"), 0);
    }

    #[tokio::test]
    async fn parse_failure_is_absorbed() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("fonts/broken.ttf", b"not a font".to_vec());
        let catalog = FontCatalog::new().with_font("Broken", "fonts/broken.ttf");
        let service = service_with(Arc::clone(&fetcher), catalog);
        assert!(service.ensure("Broken").await.is_none());
        assert_eq!(service.metrics("Broken"), FontMetrics::Fallback);
        assert!(service.cached_families().is_empty());
    }

    #[tokio::test]
    async fn concurrent_ensure_fetches_once() {
        let fetcher = Arc::new(MemoryFetcher::with_latency(Duration::from_millis(20)));
        fetcher.insert("fonts/roboto.ttf", b"still not a font".to_vec());
        let catalog = FontCatalog::new().with_font("Roboto", "fonts/roboto.ttf");
        let service = service_with(Arc::clone(&fetcher), catalog);

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let service = Arc::clone(&service);
            tasks.spawn(async move { service.ensure("Roboto").await.is_some() });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(!result.unwrap());
        }
        assert_eq!(fetcher.fetch_count("fonts/roboto.ttf"), 1);
        assert!(service.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn different_families_load_independently() {
        let fetcher = Arc::new(MemoryFetcher::with_latency(Duration::from_millis(5)));
        let catalog = FontCatalog::new()
            .with_font("A", "fonts/a.ttf")
            .with_font("B", "fonts/b.ttf");
        let service = service_with(Arc::clone(&fetcher), catalog);
        service
            .ensure_all(&["A".to_string(), "B".to_string(), "A".to_string()])
            .await;
        assert_eq!(fetcher.fetch_count("fonts/a.ttf"), 1);
        assert_eq!(fetcher.fetch_count("fonts/b.ttf"), 1);
    }

    #[tokio::test]
    async fn failed_family_is_retried_on_next_ensure() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let catalog = FontCatalog::new().with_font("Late", "fonts/late.ttf");
        let service = service_with(Arc::clone(&fetcher), catalog);
        service.ensure("Late").await;
        service.ensure("Late").await;
        assert_eq!(fetcher.fetch_count("fonts/late.ttf"), 2);
    }

    #[tokio::test]
    async fn activation_without_any_face_is_empty() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let mut catalog = FontCatalog::new();
        catalog.set_default_family("Missing");
        let service = service_with(fetcher, catalog);
        let faces = service.activate(&["Anything".to_string()]).await;
        assert!(faces.is_empty());
        assert!(faces.face_for("Anything").is_none());
    }

    #[test]
    fn real_font_reports_true_metrics() {
        let face = dejavu();
        let metrics = face.metrics();
        assert!(matches!(metrics, FontMetrics::Parsed { .. }));
        assert_ne!(metrics.line_height(20.0), FontMetrics::Fallback.line_height(20.0));
        assert!(metrics.baseline_offset(20.0) > 0.0);
    }

    #[tokio::test]
    async fn unresolved_family_activates_default_face() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let mut catalog = FontCatalog::new();
        catalog.set_default_family("DejaVu Sans");
        let service = service_with(fetcher, catalog);
        service
            .register_bytes("DejaVu Sans", DEJAVU_SANS.to_vec())
            .unwrap();
        let faces = service.activate(&["Script MT".to_string()]).await;
        let face = faces.face_for("Script MT").unwrap();
        assert_eq!(face.family(), "DejaVu Sans");
        assert_eq!(service.metrics("Script MT"), FontMetrics::Fallback);
    }
}
