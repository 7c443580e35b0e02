//! Source documents and the page sources opened from them.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::TemplateError;
use crate::image_raster::ImagePageSource;
use crate::pdf_raster::PdfPageSource;
use crate::surface::SurfaceLease;
use crate::types::Size;

/// A caller-owned source artifact. The engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDocument {
    Pdf(Vec<u8>),
    Images(Vec<Vec<u8>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Images,
}

impl SourceDocument {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TemplateError> {
        if looks_like_pdf(&bytes) {
            return Ok(SourceDocument::Pdf(bytes));
        }
        match image::guess_format(&bytes) {
            Ok(image::ImageFormat::Png) | Ok(image::ImageFormat::Jpeg) => {
                Ok(SourceDocument::Images(vec![bytes]))
            }
            Ok(other) => Err(TemplateError::DocumentOpen(format!(
                "unsupported image format {other:?}"
            ))),
            Err(_) => Err(TemplateError::DocumentOpen(
                "source is neither a PDF nor a PNG/JPEG image".to_string(),
            )),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(bytes)
    }

    // Each path becomes one page, in the order given.
    pub fn from_image_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, TemplateError> {
        let mut pages = Vec::with_capacity(paths.len());
        for path in paths {
            pages.push(std::fs::read(path.as_ref())?);
        }
        Ok(SourceDocument::Images(pages))
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            SourceDocument::Pdf(_) => DocumentKind::Pdf,
            SourceDocument::Images(_) => DocumentKind::Images,
        }
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            SourceDocument::Pdf(bytes) => {
                hasher.update(b"pdf\0");
                hasher.update(bytes);
            }
            SourceDocument::Images(pages) => {
                hasher.update(b"images\0");
                for page in pages {
                    hasher.update((page.len() as u64).to_le_bytes());
                    hasher.update(page);
                }
            }
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            use std::fmt::Write;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }

    pub fn open(&self) -> Result<DocumentHandle<Box<dyn PageSource>>, TemplateError> {
        let source: Box<dyn PageSource> = match self {
            SourceDocument::Pdf(bytes) => Box::new(PdfPageSource::open(bytes)?),
            SourceDocument::Images(pages) => Box::new(ImagePageSource::open(pages)?),
        };
        log::debug!(
            "opened {:?} document with {} pages",
            self.kind(),
            source.page_count()
        );
        Ok(DocumentHandle::new(source))
    }
}

fn looks_like_pdf(bytes: &[u8]) -> bool {
    // Readers tolerate leading junk before the header within the first 1024 bytes.
    let window = &bytes[..bytes.len().min(1024)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// A document opened for page-by-page rendering.
pub trait PageSource {
    fn page_count(&self) -> usize;

    // Unscaled page size in points.
    fn page_size(&self, page_index: usize) -> Result<Size, TemplateError>;

    // Paints the page into a lease already sized for `scale` and cleared to white.
    fn render_page(
        &mut self,
        page_index: usize,
        lease: &mut SurfaceLease<'_>,
        scale: f32,
    ) -> Result<(), TemplateError>;
}

impl<S: PageSource + ?Sized> PageSource for Box<S> {
    fn page_count(&self) -> usize {
        (**self).page_count()
    }

    fn page_size(&self, page_index: usize) -> Result<Size, TemplateError> {
        (**self).page_size(page_index)
    }

    fn render_page(
        &mut self,
        page_index: usize,
        lease: &mut SurfaceLease<'_>,
        scale: f32,
    ) -> Result<(), TemplateError> {
        (**self).render_page(page_index, lease, scale)
    }
}

type ReleaseHook = Box<dyn FnOnce()>;

/// Temporary resource handle for an opened document.
///
/// The handle is released exactly once: either explicitly through [`DocumentHandle::release`]
/// or, when the owning pipeline is abandoned mid-run, on drop.
pub struct DocumentHandle<S: PageSource> {
    source: Option<S>,
    on_release: Option<ReleaseHook>,
}

impl<S: PageSource> DocumentHandle<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            on_release: None,
        }
    }

    pub fn with_release_hook(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    pub fn source(&self) -> Result<&S, TemplateError> {
        self.source.as_ref().ok_or_else(released_handle)
    }

    pub fn source_mut(&mut self) -> Result<&mut S, TemplateError> {
        self.source.as_mut().ok_or_else(released_handle)
    }

    pub fn release(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        log::debug!("released document handle ({} pages)", source.page_count());
        drop(source);
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl<S: PageSource> Drop for DocumentHandle<S> {
    fn drop(&mut self) {
        self.release();
    }
}

fn released_handle() -> TemplateError {
    TemplateError::DocumentOpen("document handle already released".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct EmptySource;

    impl PageSource for EmptySource {
        fn page_count(&self) -> usize {
            0
        }

        fn page_size(&self, page_index: usize) -> Result<Size, TemplateError> {
            Err(TemplateError::page_render(page_index, "no pages"))
        }

        fn render_page(
            &mut self,
            page_index: usize,
            _lease: &mut SurfaceLease<'_>,
            _scale: f32,
        ) -> Result<(), TemplateError> {
            Err(TemplateError::page_render(page_index, "no pages"))
        }
    }

    #[test]
    fn from_bytes_rejects_unknown_payloads() {
        let err = SourceDocument::from_bytes(b"hello world".to_vec()).unwrap_err();
        assert!(matches!(err, TemplateError::DocumentOpen(_)));
    }

    #[test]
    fn from_bytes_sniffs_pdf_header() {
        let doc = SourceDocument::from_bytes(b"%PDF-1.7\n%junk".to_vec()).expect("pdf");
        assert_eq!(doc.kind(), DocumentKind::Pdf);
    }

    #[test]
    fn fingerprint_distinguishes_kind_and_page_split() {
        let a = SourceDocument::Images(vec![vec![1, 2], vec![3]]);
        let b = SourceDocument::Images(vec![vec![1], vec![2, 3]]);
        let c = SourceDocument::Pdf(vec![1, 2, 3]);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn handle_releases_exactly_once() {
        let count = Rc::new(Cell::new(0));
        let hook_count = count.clone();
        let mut handle =
            DocumentHandle::new(EmptySource).with_release_hook(move || hook_count.set(hook_count.get() + 1));
        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert!(handle.source().is_err());
        drop(handle);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn dropped_handle_still_releases() {
        let count = Rc::new(Cell::new(0));
        let hook_count = count.clone();
        {
            let _handle = DocumentHandle::new(EmptySource)
                .with_release_hook(move || hook_count.set(hook_count.get() + 1));
        }
        assert_eq!(count.get(), 1);
    }
}
