//! Image-set documents: one PNG or JPEG per page.

use tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};

use crate::document::PageSource;
use crate::error::TemplateError;
use crate::surface::SurfaceLease;
use crate::types::Size;

pub struct ImagePageSource {
    pages: Vec<Vec<u8>>,
    sizes: Vec<Size>,
}

impl ImagePageSource {
    // Dimensions are read up front so a corrupt page fails the open, not the render.
    pub fn open(pages: &[Vec<u8>]) -> Result<Self, TemplateError> {
        let mut sizes = Vec::with_capacity(pages.len());
        for (idx, bytes) in pages.iter().enumerate() {
            let (width, height) = image::ImageReader::new(std::io::Cursor::new(bytes))
                .with_guessed_format()
                .map_err(|e| TemplateError::DocumentOpen(format!("image page {idx}: {e}")))?
                .into_dimensions()
                .map_err(|e| TemplateError::DocumentOpen(format!("image page {idx}: {e}")))?;
            sizes.push(Size::new(width as f32, height as f32));
        }
        Ok(Self {
            pages: pages.to_vec(),
            sizes,
        })
    }
}

impl PageSource for ImagePageSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, page_index: usize) -> Result<Size, TemplateError> {
        self.sizes
            .get(page_index)
            .copied()
            .ok_or_else(|| TemplateError::page_render(page_index, "page index out of range"))
    }

    fn render_page(
        &mut self,
        page_index: usize,
        lease: &mut SurfaceLease<'_>,
        _scale: f32,
    ) -> Result<(), TemplateError> {
        let bytes = self
            .pages
            .get(page_index)
            .ok_or_else(|| TemplateError::page_render(page_index, "page index out of range"))?;
        let image = decode_image_to_pixmap(bytes, None)
            .ok_or_else(|| TemplateError::page_render(page_index, "image decode failed"))?;

        // Stretch to the lease, which is already sized to the page at the render scale.
        let target = lease.size();
        let sx = target.width as f32 / image.width() as f32;
        let sy = target.height as f32 / image.height() as f32;
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        lease.pixmap_mut().draw_pixmap(
            0,
            0,
            image.as_ref(),
            &paint,
            Transform::from_scale(sx, sy),
            None,
        );
        Ok(())
    }
}

pub(crate) fn decode_image_to_pixmap(
    data: &[u8],
    format: Option<image::ImageFormat>,
) -> Option<Pixmap> {
    let decoded = match format.or_else(|| image::guess_format(data).ok()) {
        Some(fmt) => image::load_from_memory_with_format(data, fmt).ok()?,
        None => image::load_from_memory(data).ok()?,
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

pub(crate) fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}
