//! Headless overlay canvas: region geometry per page, serialized to SVG on capture.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapter::{DrawingSurfaceAdapter, InteractionState, InteractionTracker};
use crate::catalog::Field;
use crate::error::TemplateError;
use crate::host::{DisplayHost, OverlayCapture};
use crate::rasterizer::PageBitmap;
use crate::types::RegionRect;

const FILL_OPACITY: f32 = 0.2;
const STROKE_WIDTH: f32 = 2.0;
const LABEL_FONT_SIZE: f32 = 12.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub field: Field,
    pub rect: RegionRect,
}

pub struct OverlayCanvas {
    pages: Vec<PageBitmap>,
    regions: Vec<Vec<Region>>,
    current_page: usize,
    active_field: Option<Field>,
    tracker: InteractionTracker,
    display_log: Vec<usize>,
    stop_calls: usize,
}

impl OverlayCanvas {
    pub fn new(pages: Vec<PageBitmap>) -> Self {
        let regions = vec![Vec::new(); pages.len()];
        Self {
            pages,
            regions,
            current_page: 0,
            active_field: None,
            tracker: InteractionTracker::new(),
            display_log: Vec::new(),
            stop_calls: 0,
        }
    }

    pub fn pages(&self) -> &[PageBitmap] {
        &self.pages
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn regions(&self, page_index: usize) -> &[Region] {
        self.regions.get(page_index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn interaction_state(&self) -> InteractionState {
        self.tracker.state()
    }

    // Pages shown by the exporter, in order.
    pub fn display_log(&self) -> &[usize] {
        &self.display_log
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls
    }

    /// Sets the geometry of the region being drawn or edited and closes the interaction.
    pub fn complete_region(&mut self, rect: RegionRect) -> Result<(), TemplateError> {
        let rect = rect.normalized();
        let page = self.current_page;
        let regions = self
            .regions
            .get_mut(page)
            .ok_or_else(|| missing_page(page))?;
        let target = match self.tracker.finish()? {
            InteractionState::Drawing => regions.last_mut(),
            InteractionState::Editing(position) => regions.get_mut(position - 1),
            InteractionState::Idle | InteractionState::Stopped => {
                return Err(TemplateError::InvalidConfiguration(
                    "no region is being drawn or edited".to_string(),
                ));
            }
        };
        let region = target.ok_or_else(|| {
            TemplateError::InvalidConfiguration(format!("page {page} has no such region"))
        })?;
        region.rect = rect;
        Ok(())
    }

    // `position` is 1-based; later regions shift down.
    pub fn remove_region(&mut self, page_index: usize, position: usize) -> Option<Region> {
        let regions = self.regions.get_mut(page_index)?;
        if position == 0 || position > regions.len() {
            return None;
        }
        Some(regions.remove(position - 1))
    }

    pub fn to_svg(&self, page_index: usize) -> Result<String, TemplateError> {
        let page = self
            .pages
            .get(page_index)
            .ok_or_else(|| missing_page(page_index))?;
        let (w, h) = (page.width, page.height);
        let mut out = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">"
        );
        out.push_str(&format!(
            "<image x=\"0\" y=\"0\" width=\"{w}\" height=\"{h}\" xlink:href=\"{}\"/>",
            xml_escape(&page.data_uri)
        ));
        for region in self.regions(page_index) {
            let r = region.rect;
            let color = xml_escape(&region.field.color);
            out.push_str(&format!(
                "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{color}\" fill-opacity=\"{FILL_OPACITY}\" stroke=\"{color}\" stroke-width=\"{STROKE_WIDTH}\"/>",
                r.x, r.y, r.width, r.height
            ));
            out.push_str(&format!(
                "<text x=\"{}\" y=\"{}\" fill=\"{color}\" font-size=\"{LABEL_FONT_SIZE}\">{}</text>",
                r.x,
                (r.y - 2.0).max(LABEL_FONT_SIZE),
                xml_escape(&region.field.name)
            ));
        }
        out.push_str("</svg>");
        Ok(out)
    }
}

impl DrawingSurfaceAdapter for OverlayCanvas {
    fn draw_rectangle(&mut self) -> Result<(), TemplateError> {
        if self.tracker.is_stopped() {
            return Err(TemplateError::SurfaceStopped);
        }
        let field = self.active_field.clone().ok_or_else(|| {
            TemplateError::InvalidConfiguration("no field selected for the new region".to_string())
        })?;
        let page = self.current_page;
        let regions = self
            .regions
            .get_mut(page)
            .ok_or_else(|| missing_page(page))?;
        self.tracker.begin_draw()?;
        // Geometry arrives with complete_region; the slot keeps region order aligned with
        // the page's field order.
        regions.push(Region {
            field,
            rect: RegionRect::default(),
        });
        Ok(())
    }

    fn edit(&mut self, position: usize) -> Result<(), TemplateError> {
        self.tracker.begin_edit(position)?;
        if position > self.regions(self.current_page).len() {
            self.tracker.finish()?;
            return Err(TemplateError::InvalidConfiguration(format!(
                "page {} has no region at position {position}",
                self.current_page
            )));
        }
        Ok(())
    }

    fn delete_region(&mut self, position: usize) -> Result<(), TemplateError> {
        // Closes any open interaction; fails once stopped.
        self.tracker.finish()?;
        let page = self.current_page;
        self.remove_region(page, position)
            .map(|_| ())
            .ok_or_else(|| {
                TemplateError::InvalidConfiguration(format!(
                    "page {page} has no region at position {position}"
                ))
            })
    }

    fn stop(&mut self) -> Result<(), TemplateError> {
        self.stop_calls += 1;
        if self.tracker.stop() {
            log::debug!("overlay canvas stopped");
        }
        Ok(())
    }

    fn set_active_field(&mut self, field: &Field) {
        self.active_field = Some(field.clone());
    }

    fn page_changed(&mut self, page_index: usize) {
        if page_index < self.pages.len() {
            self.current_page = page_index;
        }
    }
}

#[async_trait(?Send)]
impl DisplayHost for OverlayCanvas {
    async fn show_page(&mut self, page_index: usize) -> Result<(), TemplateError> {
        if page_index >= self.pages.len() {
            return Err(missing_page(page_index));
        }
        self.current_page = page_index;
        self.display_log.push(page_index);
        tokio::task::yield_now().await;
        Ok(())
    }

    fn capture_overlay(&self) -> Result<OverlayCapture, TemplateError> {
        let page = self
            .pages
            .get(self.current_page)
            .ok_or_else(|| missing_page(self.current_page))?;
        Ok(OverlayCapture {
            svg: self.to_svg(self.current_page)?,
            width: page.width,
            height: page.height,
        })
    }
}

fn missing_page(page_index: usize) -> TemplateError {
    TemplateError::InvalidConfiguration(format!("overlay has no page {page_index}"))
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
