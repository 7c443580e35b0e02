//! Rasterizes captured overlays (base64-encoded SVG) into PNG data URIs.

use base64::Engine;
use resvg::usvg;
use tiny_skia::Transform;

use crate::error::TemplateError;
use crate::surface::{Backdrop, DrawingSurface};
use crate::types::PixelSize;

pub fn encode_svg_base64(svg: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(svg.as_bytes())
}

/// Renders `encoded` at `width` x `height`. A zero dimension falls back to the SVG's own size.
pub fn rasterize_base64_svg(
    encoded: &str,
    width: u32,
    height: u32,
    surface: &mut DrawingSurface,
) -> Result<String, TemplateError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| svg_err(format!("overlay is not valid base64: {e}")))?;
    let svg = std::str::from_utf8(&bytes)
        .map_err(|e| svg_err(format!("overlay is not utf-8: {e}")))?;

    let size = if width == 0 || height == 0 {
        intrinsic_size(svg)?
    } else {
        PixelSize::new(width, height)
    };

    let tree = usvg::Tree::from_str(svg, &usvg::Options::default())
        .map_err(|e| svg_err(format!("overlay svg parse failed: {e}")))?;
    let tree_size = tree.size();
    let transform = Transform::from_scale(
        size.width as f32 / tree_size.width(),
        size.height as f32 / tree_size.height(),
    );

    let mut lease = surface.lease(size, Backdrop::Transparent)?;
    resvg::render(&tree, transform, &mut lease.pixmap_mut().as_mut());
    lease.to_data_uri()
}

// Root `width`/`height` attributes, then the `viewBox` extent.
fn intrinsic_size(svg: &str) -> Result<PixelSize, TemplateError> {
    let doc = roxmltree::Document::parse(svg)
        .map_err(|e| svg_err(format!("overlay svg parse failed: {e}")))?;
    let root = doc.root_element();

    let attr_len = |name: &str| root.attribute(name).and_then(parse_length);
    if let (Some(w), Some(h)) = (attr_len("width"), attr_len("height")) {
        return to_pixel_size(w, h);
    }
    let view_box: Vec<f32> = root
        .attribute("viewBox")
        .map(|v| {
            v.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    if let [_, _, w, h] = view_box.as_slice() {
        return to_pixel_size(*w, *h);
    }
    Err(svg_err("overlay has no reported or intrinsic size"))
}

fn parse_length(raw: &str) -> Option<f32> {
    let trimmed = raw.trim().trim_end_matches("px");
    if trimmed.ends_with('%') {
        return None;
    }
    trimmed.parse().ok()
}

fn to_pixel_size(w: f32, h: f32) -> Result<PixelSize, TemplateError> {
    let (w, h) = (w.ceil(), h.ceil());
    if !(w >= 1.0 && h >= 1.0) || !w.is_finite() || !h.is_finite() {
        return Err(svg_err(format!("overlay intrinsic size {w}x{h} is not drawable")));
    }
    Ok(PixelSize::new(w as u32, h as u32))
}

fn svg_err(message: impl Into<String>) -> TemplateError {
    TemplateError::Export(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::parse_data_uri;

    const RED_SQUARE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10" viewBox="0 0 10 10"><rect x="0" y="0" width="10" height="10" fill="#ff0000"/></svg>"##;

    fn decode(uri: &str) -> image::RgbaImage {
        let (mime, png) = parse_data_uri(uri).expect("data uri");
        assert_eq!(mime, "image/png");
        image::load_from_memory(&png).expect("png").to_rgba8()
    }

    #[test]
    fn renders_at_requested_size() {
        let mut surface = DrawingSurface::new();
        let uri = rasterize_base64_svg(&encode_svg_base64(RED_SQUARE), 20, 30, &mut surface)
            .expect("raster");
        let img = decode(&uri);
        assert_eq!(img.dimensions(), (20, 30));
        assert_eq!(img.get_pixel(10, 15).0, [255, 0, 0, 255]);
    }

    #[test]
    fn zero_size_uses_intrinsic_dimensions() {
        let mut surface = DrawingSurface::new();
        let uri = rasterize_base64_svg(&encode_svg_base64(RED_SQUARE), 0, 0, &mut surface)
            .expect("raster");
        assert_eq!(decode(&uri).dimensions(), (10, 10));

        let view_box_only = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 6 4"/>"#;
        assert_eq!(
            intrinsic_size(view_box_only).expect("size"),
            PixelSize::new(6, 4)
        );
    }

    #[test]
    fn sizeless_svg_with_zero_request_fails() {
        let mut surface = DrawingSurface::new();
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100%"/>"#;
        let err = rasterize_base64_svg(&encode_svg_base64(svg), 0, 5, &mut surface)
            .expect_err("no size");
        assert!(matches!(err, TemplateError::Export(_)));
    }

    #[test]
    fn invalid_base64_is_an_export_error() {
        let mut surface = DrawingSurface::new();
        let err = rasterize_base64_svg("***", 5, 5, &mut surface).expect_err("bad input");
        assert!(matches!(err, TemplateError::Export(_)));
    }
}
