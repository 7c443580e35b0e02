//! Sequential page rasterization into PNG data URIs.

use serde::{Deserialize, Serialize};

use crate::document::{DocumentHandle, PageSource, SourceDocument};
use crate::error::TemplateError;
use crate::perf::{PerfLogger, SpanTimer};
use crate::surface::{Backdrop, DrawingSurface, SurfaceGuard, parse_data_uri};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageBitmap {
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    pub data_uri: String,
}

impl PageBitmap {
    pub fn png_bytes(&self) -> Result<Vec<u8>, TemplateError> {
        match parse_data_uri(&self.data_uri) {
            Some((mime, bytes)) if mime == "image/png" => Ok(bytes),
            _ => Err(TemplateError::InvalidConfiguration(format!(
                "page {} bitmap is not a PNG data URI",
                self.page_index
            ))),
        }
    }
}

#[derive(Clone)]
pub struct Rasterizer {
    scale: f32,
    perf: Option<PerfLogger>,
}

impl Rasterizer {
    pub fn new(scale: f32) -> Result<Self, TemplateError> {
        validate_scale(scale)?;
        Ok(Self { scale, perf: None })
    }

    pub fn with_perf(mut self, perf: Option<PerfLogger>) -> Self {
        self.perf = perf;
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub async fn rasterize_document(
        &self,
        document: &SourceDocument,
        surface: &mut DrawingSurface,
    ) -> Result<Vec<PageBitmap>, TemplateError> {
        let handle = document.open()?;
        self.rasterize(handle, surface).await
    }

    /// Renders every page in index order.
    ///
    /// The handle and the surface are released once all pages are done, whether or not
    /// rendering succeeded. On failure nothing rendered so far is returned.
    pub async fn rasterize<S: PageSource>(
        &self,
        mut handle: DocumentHandle<S>,
        surface: &mut DrawingSurface,
    ) -> Result<Vec<PageBitmap>, TemplateError> {
        let mut surface = SurfaceGuard::new(surface);
        let result = self.render_pages(&mut handle, &mut surface).await;
        handle.release();
        drop(surface);
        match &result {
            Ok(pages) => log::info!("rasterized {} pages at scale {}", pages.len(), self.scale),
            Err(err) => log::warn!("rasterization failed: {err}"),
        }
        result
    }

    async fn render_pages<S: PageSource>(
        &self,
        handle: &mut DocumentHandle<S>,
        surface: &mut DrawingSurface,
    ) -> Result<Vec<PageBitmap>, TemplateError> {
        let page_count = handle.source()?.page_count();
        let mut pages = Vec::with_capacity(page_count);
        for page_index in 0..page_count {
            let timer = SpanTimer::start(self.perf.as_ref(), "rasterize.page", Some(page_index));
            let bitmap = self
                .render_page(handle.source_mut()?, surface, page_index)
                .map_err(|err| err.into_page_render(page_index))?;
            let ms = timer.finish();
            log::debug!(
                "page {} rasterized to {}x{} in {:.1}ms",
                page_index,
                bitmap.width,
                bitmap.height,
                ms
            );
            pages.push(bitmap);
            tokio::task::yield_now().await;
        }
        if let Some(perf) = &self.perf {
            perf.flush();
        }
        Ok(pages)
    }

    fn render_page<S: PageSource>(
        &self,
        source: &mut S,
        surface: &mut DrawingSurface,
        page_index: usize,
    ) -> Result<PageBitmap, TemplateError> {
        let size = source.page_size(page_index)?.to_pixels(self.scale)?;
        let mut lease = surface.lease(size, Backdrop::White)?;
        source.render_page(page_index, &mut lease, self.scale)?;
        Ok(PageBitmap {
            page_index,
            width: size.width,
            height: size.height,
            data_uri: lease.to_data_uri()?,
        })
    }
}

pub(crate) fn validate_scale(scale: f32) -> Result<(), TemplateError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(TemplateError::InvalidConfiguration(format!(
            "render scale must be finite and positive, got {scale}"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image_raster::tests::png_page;
    use crate::pdf_raster::tests::solid_pages_pdf;
    use crate::surface::SurfaceLease;
    use crate::types::Size;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Pages of fixed size; rendering `fail_at` errors out.
    pub(crate) struct ScriptedSource {
        pub pages: usize,
        pub fail_at: Option<usize>,
        pub rendered: Rc<Cell<usize>>,
    }

    impl PageSource for ScriptedSource {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn page_size(&self, _page_index: usize) -> Result<Size, TemplateError> {
            Ok(Size::new(8.0, 6.0))
        }

        fn render_page(
            &mut self,
            page_index: usize,
            _lease: &mut SurfaceLease<'_>,
            _scale: f32,
        ) -> Result<(), TemplateError> {
            if self.fail_at == Some(page_index) {
                return Err(TemplateError::InvalidConfiguration("broken page".to_string()));
            }
            self.rendered.set(self.rendered.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn scale_must_be_positive_and_finite() {
        assert!(Rasterizer::new(0.0).is_err());
        assert!(Rasterizer::new(-1.0).is_err());
        assert!(Rasterizer::new(f32::INFINITY).is_err());
        assert!(Rasterizer::new(1.5).is_ok());
    }

    #[tokio::test]
    async fn pdf_pages_come_back_in_index_order() {
        let bytes = solid_pages_pdf(&[(1.0, 0.0, 0.0), (0.0, 1.0, 0.0), (0.0, 0.0, 1.0)], 40, 30);
        let document = SourceDocument::Pdf(bytes);
        let mut surface = DrawingSurface::new();
        let pages = Rasterizer::new(1.0)
            .expect("rasterizer")
            .rasterize_document(&document, &mut surface)
            .await
            .expect("rasterize");
        assert_eq!(pages.len(), 3);
        for (idx, page) in pages.iter().enumerate() {
            assert_eq!(page.page_index, idx);
            assert_eq!((page.width, page.height), (40, 30));
        }
        let png = pages[1].png_bytes().expect("png bytes");
        let img = image::load_from_memory(&png).expect("png").to_rgba8();
        assert_eq!(img.get_pixel(20, 20).0, [0, 255, 0, 255]);
        assert!(!surface.is_allocated());
    }

    #[tokio::test]
    async fn image_set_pages_use_pixel_dimensions_times_scale() {
        let document = SourceDocument::Images(vec![
            png_page(10, 20, [255, 255, 255, 255]),
            png_page(5, 5, [0, 0, 0, 255]),
        ]);
        let mut surface = DrawingSurface::new();
        let pages = Rasterizer::new(2.0)
            .expect("rasterizer")
            .rasterize_document(&document, &mut surface)
            .await
            .expect("rasterize");
        assert_eq!((pages[0].width, pages[0].height), (20, 40));
        assert_eq!((pages[1].width, pages[1].height), (10, 10));
    }

    #[tokio::test]
    async fn zero_page_document_yields_empty_sequence() {
        let document = SourceDocument::Images(Vec::new());
        let mut surface = DrawingSurface::new();
        let pages = Rasterizer::new(1.0)
            .expect("rasterizer")
            .rasterize_document(&document, &mut surface)
            .await
            .expect("rasterize");
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn failing_page_discards_everything_and_releases_once() {
        let released = Rc::new(Cell::new(0));
        let hook = released.clone();
        let rendered = Rc::new(Cell::new(0));
        let handle = DocumentHandle::new(ScriptedSource {
            pages: 3,
            fail_at: Some(1),
            rendered: rendered.clone(),
        })
        .with_release_hook(move || hook.set(hook.get() + 1));

        let mut surface = DrawingSurface::new();
        let err = Rasterizer::new(1.0)
            .expect("rasterizer")
            .rasterize(handle, &mut surface)
            .await
            .expect_err("page 1 fails");
        assert!(matches!(err, TemplateError::PageRender { page_index: 1, .. }));
        assert_eq!(rendered.get(), 1);
        assert_eq!(released.get(), 1);
        assert!(!surface.is_allocated());
    }

    #[tokio::test]
    async fn unopenable_document_is_a_document_open_error() {
        let document = SourceDocument::Pdf(b"%PDF-1.4 truncated".to_vec());
        let mut surface = DrawingSurface::new();
        let err = Rasterizer::new(1.0)
            .expect("rasterizer")
            .rasterize_document(&document, &mut surface)
            .await
            .expect_err("open fails");
        assert!(matches!(err, TemplateError::DocumentOpen(_)));
    }
}
