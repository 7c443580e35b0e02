//! The single reusable drawing surface shared by the rasterizer and the exporter.
//!
//! A pipeline takes a [`SurfaceLease`] for one page at a time. Leasing borrows the surface
//! mutably, so two pages can never be drawn into it at once.

use base64::Engine;
use tiny_skia::{Color as SkColor, Pixmap};

use crate::error::TemplateError;
use crate::types::PixelSize;

#[derive(Default)]
pub struct DrawingSurface {
    pixmap: Option<Pixmap>,
    leases: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backdrop {
    White,
    Transparent,
}

impl DrawingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    // Resizes the backing pixmap only when the page dimensions change; the contents are always
    // reset so nothing from the previous page survives.
    pub fn lease(
        &mut self,
        size: PixelSize,
        backdrop: Backdrop,
    ) -> Result<SurfaceLease<'_>, TemplateError> {
        let reuse = self
            .pixmap
            .as_ref()
            .is_some_and(|p| p.width() == size.width && p.height() == size.height);
        if !reuse {
            let pixmap = Pixmap::new(size.width, size.height).ok_or_else(|| {
                TemplateError::InvalidConfiguration(format!(
                    "invalid surface size {}x{}",
                    size.width, size.height
                ))
            })?;
            self.pixmap = Some(pixmap);
        }
        let Some(pixmap) = self.pixmap.as_mut() else {
            return Err(TemplateError::InvalidConfiguration(
                "drawing surface has no backing pixmap".to_string(),
            ));
        };
        match backdrop {
            Backdrop::White => pixmap.fill(SkColor::WHITE),
            Backdrop::Transparent => pixmap.fill(SkColor::TRANSPARENT),
        }
        self.leases += 1;
        Ok(SurfaceLease { pixmap })
    }

    pub fn is_allocated(&self) -> bool {
        self.pixmap.is_some()
    }

    pub fn lease_count(&self) -> u64 {
        self.leases
    }

    // Drops the backing allocation. The surface can be leased again afterwards.
    pub fn release(&mut self) {
        if let Some(pixmap) = self.pixmap.take() {
            log::debug!(
                "released drawing surface {}x{} after {} leases",
                pixmap.width(),
                pixmap.height(),
                self.leases
            );
        }
    }
}

/// Releases the borrowed surface when the owning pipeline finishes or is dropped mid-run.
pub(crate) struct SurfaceGuard<'a> {
    surface: &'a mut DrawingSurface,
}

impl<'a> SurfaceGuard<'a> {
    pub(crate) fn new(surface: &'a mut DrawingSurface) -> Self {
        Self { surface }
    }
}

impl std::ops::Deref for SurfaceGuard<'_> {
    type Target = DrawingSurface;

    fn deref(&self) -> &DrawingSurface {
        self.surface
    }
}

impl std::ops::DerefMut for SurfaceGuard<'_> {
    fn deref_mut(&mut self) -> &mut DrawingSurface {
        self.surface
    }
}

impl Drop for SurfaceGuard<'_> {
    fn drop(&mut self) {
        self.surface.release();
    }
}

pub struct SurfaceLease<'a> {
    pixmap: &'a mut Pixmap,
}

impl SurfaceLease<'_> {
    pub fn pixmap(&self) -> &Pixmap {
        self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        self.pixmap
    }

    pub fn size(&self) -> PixelSize {
        PixelSize::new(self.pixmap.width(), self.pixmap.height())
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, TemplateError> {
        self.pixmap
            .encode_png()
            .map_err(|e| TemplateError::InvalidConfiguration(format!("png encode failed: {e}")))
    }

    pub fn to_data_uri(&self) -> Result<String, TemplateError> {
        Ok(data_uri("image/png", &self.encode_png()?))
    }
}

pub(crate) fn data_uri(mime: &str, data: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(data);
    format!("data:{mime};base64,{b64}")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_clears_previous_page_contents() {
        let mut surface = DrawingSurface::new();
        {
            let mut lease = surface
                .lease(PixelSize::new(4, 4), Backdrop::White)
                .expect("lease");
            lease.pixmap_mut().fill(SkColor::BLACK);
        }
        let lease = surface
            .lease(PixelSize::new(4, 4), Backdrop::White)
            .expect("lease");
        assert!(lease.pixmap().data().iter().all(|b| *b == 255));
    }

    #[test]
    fn lease_resizes_and_release_frees_allocation() {
        let mut surface = DrawingSurface::new();
        assert!(!surface.is_allocated());
        let size = surface
            .lease(PixelSize::new(3, 2), Backdrop::Transparent)
            .expect("lease")
            .size();
        assert_eq!(size, PixelSize::new(3, 2));
        let size = surface
            .lease(PixelSize::new(5, 7), Backdrop::White)
            .expect("lease")
            .size();
        assert_eq!(size, PixelSize::new(5, 7));
        assert_eq!(surface.lease_count(), 2);
        surface.release();
        assert!(!surface.is_allocated());
    }

    #[test]
    fn guard_releases_on_drop() {
        let mut surface = DrawingSurface::new();
        {
            let mut guard = SurfaceGuard::new(&mut surface);
            guard
                .lease(PixelSize::new(2, 2), Backdrop::White)
                .expect("lease");
            assert!(guard.is_allocated());
        }
        assert!(!surface.is_allocated());
    }

    #[test]
    fn zero_sized_lease_is_rejected() {
        let mut surface = DrawingSurface::new();
        assert!(surface.lease(PixelSize::new(0, 10), Backdrop::White).is_err());
    }

    #[test]
    fn data_uri_round_trips_png_payload() {
        let mut surface = DrawingSurface::new();
        let lease = surface
            .lease(PixelSize::new(2, 2), Backdrop::White)
            .expect("lease");
        let uri = lease.to_data_uri().expect("uri");
        let (mime, bytes) = parse_data_uri(&uri).expect("parse");
        assert_eq!(mime, "image/png");
        let img = image::load_from_memory(&bytes).expect("png").to_rgba8();
        assert_eq!(img.dimensions(), (2, 2));
    }
}
