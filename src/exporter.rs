//! Composites each page's overlay into a raster image and assembles the template.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::annotation::AnnotationSession;
use crate::error::TemplateError;
use crate::host::DisplayHost;
use crate::perf::{PerfLogger, SpanTimer};
use crate::rasterizer::PageBitmap;
use crate::surface::{DrawingSurface, SurfaceGuard};
use crate::svg_raster::{encode_svg_base64, rasterize_base64_svg};
use crate::template::{Template, TemplatePage};

pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportOrder {
    /// `pages[i]` is page `i`.
    #[default]
    Ascending,
    /// Each page is inserted at the front, so the last page comes first.
    ReverseLegacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Await the host's display acknowledgement, giving up (and carrying on) after `timeout`.
    Acknowledged { timeout: Duration },
    /// Show the page, then sleep a fixed delay after capturing it.
    FixedDelay(Duration),
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::Acknowledged {
            timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }
}

#[derive(Clone, Default)]
pub struct Exporter {
    order: ExportOrder,
    settle: SettlePolicy,
    perf: Option<PerfLogger>,
}

impl Exporter {
    pub fn new(order: ExportOrder, settle: SettlePolicy) -> Self {
        if order == ExportOrder::ReverseLegacy {
            log::warn!("export order reverse_legacy selected: template pages will be last-to-first");
        }
        Self {
            order,
            settle,
            perf: None,
        }
    }

    pub fn with_perf(mut self, perf: Option<PerfLogger>) -> Self {
        self.perf = perf;
        self
    }

    pub fn order(&self) -> ExportOrder {
        self.order
    }

    pub fn settle(&self) -> SettlePolicy {
        self.settle
    }

    /// Stops the surface, then shows, captures and rasterizes every page in index order.
    ///
    /// Field names come from the store as it was when the export began. Any failure aborts
    /// the run with [`TemplateError::Export`]; the surface is released either way.
    pub async fn export<H: DisplayHost>(
        &self,
        session: &mut AnnotationSession<H>,
        pages: &[PageBitmap],
        surface: &mut DrawingSurface,
        name: &str,
        description: &str,
    ) -> Result<Template, TemplateError> {
        let (store, host) = session.parts_mut();
        if pages.len() != store.page_count() {
            return Err(TemplateError::Export(format!(
                "{} page bitmaps supplied for a {}-page annotation store",
                pages.len(),
                store.page_count()
            )));
        }
        let snapshot = store.snapshot();
        host.stop()
            .map_err(|e| TemplateError::Export(format!("stopping the drawing surface failed: {e}")))?;

        let mut surface = SurfaceGuard::new(surface);
        let mut out: Vec<TemplatePage> = Vec::with_capacity(pages.len());
        for page_index in 0..pages.len() {
            let timer = SpanTimer::start(self.perf.as_ref(), "export.page", Some(page_index));
            store.set_current_page_index(page_index);
            let image = self
                .export_page(host, page_index, &mut surface)
                .await
                .map_err(|e| e.into_export(page_index))?;
            let page = TemplatePage {
                image,
                field_names: snapshot.get(&page_index).cloned().unwrap_or_default(),
            };
            match self.order {
                ExportOrder::Ascending => out.push(page),
                ExportOrder::ReverseLegacy => out.insert(0, page),
            }
            if let SettlePolicy::FixedDelay(delay) = self.settle {
                tokio::time::sleep(delay).await;
            }
            let ms = timer.finish();
            log::debug!("page {} exported in {:.1}ms", page_index, ms);
        }

        if !pages.is_empty() {
            store.set_current_page_index(0);
            host.page_changed(0);
        }
        drop(surface);
        if let Some(perf) = &self.perf {
            perf.log_counts("export", None, &[("pages", out.len() as u64)]);
            perf.flush();
        }
        log::info!("exported template {:?} with {} pages", name, out.len());
        Ok(Template {
            name: name.to_string(),
            description: description.to_string(),
            pages: out,
        })
    }

    async fn export_page<H: DisplayHost>(
        &self,
        host: &mut H,
        page_index: usize,
        surface: &mut DrawingSurface,
    ) -> Result<String, TemplateError> {
        match self.settle {
            SettlePolicy::Acknowledged { timeout } => {
                match tokio::time::timeout(timeout, host.show_page(page_index)).await {
                    Ok(shown) => shown?,
                    Err(_) => log::warn!(
                        "page {} display not acknowledged within {:?}; capturing anyway",
                        page_index,
                        timeout
                    ),
                }
            }
            SettlePolicy::FixedDelay(_) => host.show_page(page_index).await?,
        }
        let capture = host.capture_overlay()?;
        let encoded = encode_svg_base64(&capture.svg);
        rasterize_base64_svg(&encoded, capture.width, capture.height, surface)
    }
}
