use async_trait::async_trait;

use crate::adapter::DrawingSurfaceAdapter;
use crate::error::TemplateError;

/// The current page overlay serialized as SVG text, with its reported pixel size.
///
/// A width or height of 0 means the host does not know the size; the SVG's intrinsic size is
/// used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayCapture {
    pub svg: String,
    pub width: u32,
    pub height: u32,
}

/// The visual shell the exporter drives page by page.
#[async_trait(?Send)]
pub trait DisplayHost: DrawingSurfaceAdapter {
    /// Displays `page_index` with its frozen overlay. Resolves once the display has updated.
    async fn show_page(&mut self, page_index: usize) -> Result<(), TemplateError>;

    fn capture_overlay(&self) -> Result<OverlayCapture, TemplateError>;
}
