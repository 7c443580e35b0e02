//! Template annotation engine.
//!
//! Rasterizes a PDF or image set page by page, tracks which catalog fields the user places on
//! each page, and exports a template whose pages are the source bitmaps composited with their
//! annotation overlays.

mod adapter;
mod annotation;
mod catalog;
mod config;
mod document;
mod error;
mod exporter;
mod host;
mod image_raster;
mod overlay;
mod page_cache;
mod pdf_raster;
mod perf;
mod rasterizer;
mod surface;
mod svg_raster;
mod template;
mod types;

use std::path::{Path, PathBuf};

pub use adapter::{DrawingSurfaceAdapter, InteractionState, InteractionTracker};
pub use annotation::{AnnotationSession, AnnotationStore, PageFields, RegionIntent, decide_intent};
pub use catalog::{Field, LabelCatalog, LabelCategory, LabelItem};
pub use config::EngineConfig;
pub use document::{DocumentHandle, DocumentKind, PageSource, SourceDocument};
pub use error::TemplateError;
pub use exporter::{DEFAULT_SETTLE_TIMEOUT, ExportOrder, Exporter, SettlePolicy};
pub use host::{DisplayHost, OverlayCapture};
pub use image_raster::ImagePageSource;
pub use overlay::{OverlayCanvas, Region};
pub use page_cache::PageCache;
pub use pdf_raster::PdfPageSource;
pub use perf::PerfLogger;
pub use rasterizer::{PageBitmap, Rasterizer};
pub use surface::{Backdrop, DrawingSurface, SurfaceLease};
pub use svg_raster::{encode_svg_base64, rasterize_base64_svg};
pub use template::{Template, TemplateLibrary, TemplatePage};
pub use types::{Color, MAX_PAGE_PIXELS, PixelSize, RegionRect, Size};

/// The configured engine. Owns the one drawing surface both pipelines lease.
pub struct TemplateEngine {
    rasterizer: Rasterizer,
    exporter: Exporter,
    perf: Option<PerfLogger>,
    surface: DrawingSurface,
}

pub struct TemplateEngineBuilder {
    render_scale: f32,
    settle_policy: SettlePolicy,
    export_order: ExportOrder,
    perf_log: Option<PathBuf>,
}

impl Default for TemplateEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngineBuilder {
    pub fn new() -> Self {
        Self {
            render_scale: 1.0,
            settle_policy: SettlePolicy::default(),
            export_order: ExportOrder::Ascending,
            perf_log: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            render_scale: config.render_scale,
            settle_policy: config.settle_policy(),
            export_order: config.export_order,
            perf_log: config.perf_log.clone(),
        }
    }

    // One pixel per PDF point at 1.0.
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn settle_policy(mut self, policy: SettlePolicy) -> Self {
        self.settle_policy = policy;
        self
    }

    pub fn export_order(mut self, order: ExportOrder) -> Self {
        self.export_order = order;
        self
    }

    pub fn perf_log(mut self, path: Option<PathBuf>) -> Self {
        self.perf_log = path;
        self
    }

    pub fn build(self) -> Result<TemplateEngine, TemplateError> {
        let timeout = match self.settle_policy {
            SettlePolicy::Acknowledged { timeout } => timeout,
            SettlePolicy::FixedDelay(delay) => delay,
        };
        if matches!(self.settle_policy, SettlePolicy::Acknowledged { .. }) && timeout.is_zero() {
            return Err(TemplateError::InvalidConfiguration(
                "settle timeout must be greater than zero".to_string(),
            ));
        }
        let perf = self.perf_log.as_ref().map(PerfLogger::new).transpose()?;
        let rasterizer = Rasterizer::new(self.render_scale)?.with_perf(perf.clone());
        let exporter =
            Exporter::new(self.export_order, self.settle_policy).with_perf(perf.clone());
        log::debug!(
            "engine configured: scale {}, settle {:?}, order {:?}",
            self.render_scale,
            self.settle_policy,
            self.export_order
        );
        Ok(TemplateEngine {
            rasterizer,
            exporter,
            perf,
            surface: DrawingSurface::new(),
        })
    }
}

impl TemplateEngine {
    pub fn builder() -> TemplateEngineBuilder {
        TemplateEngineBuilder::new()
    }

    pub fn render_scale(&self) -> f32 {
        self.rasterizer.scale()
    }

    pub fn export_order(&self) -> ExportOrder {
        self.exporter.order()
    }

    pub fn perf(&self) -> Option<&PerfLogger> {
        self.perf.as_ref()
    }

    pub async fn rasterize(
        &mut self,
        document: &SourceDocument,
    ) -> Result<Vec<PageBitmap>, TemplateError> {
        self.rasterizer
            .rasterize_document(document, &mut self.surface)
            .await
    }

    /// Like [`TemplateEngine::rasterize`], reusing `cache_path` when it was written for the same
    /// source at the same scale. A stale or unreadable cache is rebuilt.
    pub async fn rasterize_cached(
        &mut self,
        document: &SourceDocument,
        cache_path: impl AsRef<Path>,
    ) -> Result<Vec<PageBitmap>, TemplateError> {
        let cache_path = cache_path.as_ref();
        let fingerprint = document.fingerprint();
        let scale = self.render_scale();
        match PageCache::load(cache_path) {
            Ok(Some(cache)) => {
                if let Some(pages) = cache.bitmaps_for(&fingerprint, scale) {
                    log::info!(
                        "page cache hit: {} pages from {}",
                        pages.len(),
                        cache_path.display()
                    );
                    return Ok(pages);
                }
                log::debug!("page cache at {} is stale", cache_path.display());
            }
            Ok(None) => {}
            Err(err) => log::warn!("ignoring unreadable page cache {}: {err}", cache_path.display()),
        }

        let pages = self.rasterize(document).await?;
        if let Err(err) = PageCache::new(fingerprint, scale, &pages).save(cache_path) {
            log::warn!("could not write page cache {}: {err}", cache_path.display());
        }
        Ok(pages)
    }

    pub fn start_session<A: DrawingSurfaceAdapter>(
        &self,
        page_count: usize,
        adapter: A,
    ) -> AnnotationSession<A> {
        AnnotationSession::new(AnnotationStore::new(page_count), adapter)
    }

    pub async fn export<H: DisplayHost>(
        &mut self,
        session: &mut AnnotationSession<H>,
        pages: &[PageBitmap],
        name: &str,
        description: &str,
    ) -> Result<Template, TemplateError> {
        self.exporter
            .export(session, pages, &mut self.surface, name, description)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf_raster::tests::solid_pages_pdf;
    use std::time::Duration;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn builder_rejects_bad_scale_and_zero_timeout() {
        assert!(TemplateEngine::builder().render_scale(0.0).build().is_err());
        assert!(
            TemplateEngine::builder()
                .settle_policy(SettlePolicy::Acknowledged {
                    timeout: Duration::ZERO
                })
                .build()
                .is_err()
        );
        assert!(
            TemplateEngine::builder()
                .settle_policy(SettlePolicy::FixedDelay(Duration::ZERO))
                .build()
                .is_ok()
        );
    }

    #[test]
    fn builder_from_config_carries_every_setting() {
        let config = EngineConfig {
            render_scale: 2.0,
            export_order: ExportOrder::ReverseLegacy,
            ..EngineConfig::default()
        };
        let engine = TemplateEngineBuilder::from_config(&config)
            .build()
            .expect("engine");
        assert_eq!(engine.render_scale(), 2.0);
        assert_eq!(engine.export_order(), ExportOrder::ReverseLegacy);
        assert!(engine.perf().is_none());
    }

    #[tokio::test]
    async fn rasterize_cached_reuses_matching_cache() {
        init_logging();
        let cache_path = std::env::temp_dir().join(format!(
            "fieldplate_engine_cache_{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&cache_path);
        let document = SourceDocument::Pdf(solid_pages_pdf(&[(1.0, 1.0, 0.0)], 20, 10));
        let mut engine = TemplateEngine::builder().build().expect("engine");

        let first = engine
            .rasterize_cached(&document, &cache_path)
            .await
            .expect("rasterize");
        assert_eq!(first.len(), 1);

        // Poison the cached bitmap; a hit must return it verbatim.
        let mut cache = PageCache::load(&cache_path).expect("load").expect("written");
        if let Some(page) = cache.pages.get_mut(&0) {
            page.data_uri = "data:image/png;base64,cached".to_string();
        }
        cache.save(&cache_path).expect("save");
        let second = engine
            .rasterize_cached(&document, &cache_path)
            .await
            .expect("cached");
        assert_eq!(second[0].data_uri, "data:image/png;base64,cached");

        let mut rescaled = TemplateEngine::builder()
            .render_scale(2.0)
            .build()
            .expect("engine");
        let third = rescaled
            .rasterize_cached(&document, &cache_path)
            .await
            .expect("miss");
        assert_eq!((third[0].width, third[0].height), (40, 20));
        let _ = std::fs::remove_file(&cache_path);
    }

    #[tokio::test]
    async fn end_to_end_two_page_session() {
        init_logging();
        let catalog = LabelCatalog::from_json(
            r##"[{ "title": "Patient", "items": [
                { "name": "patient_name", "required": true, "color": "#ff0000ff" },
                { "name": "patient_dob", "required": false, "color": "#0000ff" } ] }]"##,
        )
        .expect("catalog");
        let document =
            SourceDocument::Pdf(solid_pages_pdf(&[(1.0, 1.0, 1.0), (1.0, 1.0, 1.0)], 60, 40));
        let mut engine = TemplateEngine::builder().build().expect("engine");
        let pages = engine.rasterize(&document).await.expect("rasterize");

        let mut session = engine.start_session(pages.len(), OverlayCanvas::new(pages.clone()));
        let name = catalog.field("Patient", "patient_name").expect("field");
        let dob = catalog.field("Patient", "patient_dob").expect("field");

        assert!(matches!(
            session.select_field(&name).expect("select"),
            RegionIntent::NewRegion(_)
        ));
        session
            .adapter_mut()
            .complete_region(RegionRect::new(5.0, 5.0, 20.0, 10.0))
            .expect("complete");
        session.go_to_page(1);
        session.select_field(&name).expect("select");
        session
            .adapter_mut()
            .complete_region(RegionRect::new(5.0, 5.0, 20.0, 10.0))
            .expect("complete");
        session.select_field(&dob).expect("select");
        session
            .adapter_mut()
            .complete_region(RegionRect::new(30.0, 20.0, 20.0, 10.0))
            .expect("complete");
        assert_eq!(
            session.select_field(&name).expect("select"),
            RegionIntent::EditRegion(name.clone(), 1)
        );

        let template = engine
            .export(&mut session, &pages, "intake", "Patient intake")
            .await
            .expect("export");
        assert_eq!(template.pages.len(), 2);
        assert_eq!(template.pages[0].field_names, vec!["patient_name".to_string()]);
        assert_eq!(
            template.field_set(1),
            session.store().fields_for_page(1)
        );
        assert_eq!(session.adapter().display_log(), &[0, 1]);
        assert!(matches!(
            session.select_field(&dob),
            Err(TemplateError::SurfaceStopped)
        ));
    }
}
