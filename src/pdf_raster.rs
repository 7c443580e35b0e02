//! PDF page rendering.
//!
//! Pages are interpreted straight from their lopdf content streams and painted onto the
//! drawing surface with tiny-skia. Coverage is what template sources need in practice:
//! vector paths with fills, strokes and clipping, device colors, image and form XObjects,
//! and text set in embedded TrueType/OpenType fonts. Text in non-embedded fonts is skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId};
use tiny_skia::{
    FillRule, FilterQuality, LineCap, LineJoin, Mask, Paint, Path, PathBuilder, Pixmap,
    PixmapPaint, Stroke, StrokeDash, Transform,
};
use ttf_parser::{Face, GlyphId, OutlineBuilder};

use crate::document::PageSource;
use crate::error::TemplateError;
use crate::image_raster::{decode_image_to_pixmap, premul_u8};
use crate::surface::SurfaceLease;
use crate::types::{Color, Size};

pub struct PdfPageSource {
    doc: LoDocument,
    pages: Vec<ObjectId>,
    fonts: HashMap<ObjectId, Arc<PdfFont>>,
    images: HashMap<ObjectId, Option<Arc<Pixmap>>>,
}

impl PdfPageSource {
    pub fn open(bytes: &[u8]) -> Result<Self, TemplateError> {
        let doc = LoDocument::load_mem(bytes)
            .map_err(|e| TemplateError::DocumentOpen(format!("pdf parse failed: {e}")))?;
        let pages = doc.get_pages().into_values().collect();
        Ok(Self {
            doc,
            pages,
            fonts: HashMap::new(),
            images: HashMap::new(),
        })
    }

    fn page_id(&self, page_index: usize) -> Result<ObjectId, TemplateError> {
        self.pages.get(page_index).copied().ok_or_else(|| {
            TemplateError::page_render(
                page_index,
                format!("page index out of range ({} pages)", self.pages.len()),
            )
        })
    }
}

impl PageSource for PdfPageSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, page_index: usize) -> Result<Size, TemplateError> {
        let page_id = self.page_id(page_index)?;
        let bbox = page_box_for_id(&self.doc, page_id).map_err(lopdf_err(page_index))?;
        Ok(bbox.size())
    }

    fn render_page(
        &mut self,
        page_index: usize,
        lease: &mut SurfaceLease<'_>,
        scale: f32,
    ) -> Result<(), TemplateError> {
        let page_id = self.page_id(page_index)?;
        let PdfPageSource {
            doc, fonts, images, ..
        } = self;
        let doc: &LoDocument = doc;
        let bbox = page_box_for_id(doc, page_id).map_err(lopdf_err(page_index))?;
        let content_bytes = doc
            .get_page_content(page_id)
            .map_err(lopdf_err(page_index))?;
        let content = Content::decode(&content_bytes).map_err(lopdf_err(page_index))?;

        let mut loader = Loader {
            doc,
            fonts,
            images,
            page_index,
        };
        let resources = loader.page_resources(page_id)?;

        // PDF user space is y-up with the origin at the media box corner.
        let base = Transform::from_row(
            scale,
            0.0,
            0.0,
            -scale,
            -bbox.x0 * scale,
            bbox.y1 * scale,
        );
        let mut painter = Painter::new(lease.pixmap_mut(), base);
        let mut visited_forms = HashSet::new();
        run_operations(
            &mut loader,
            &mut painter,
            &content.operations,
            &resources,
            &mut visited_forms,
        )?;
        log::debug!(
            "pdf page {} painted: {} glyphs drawn, {} glyphs skipped, {} images",
            page_index,
            painter.stats.glyphs_drawn,
            painter.stats.glyphs_skipped,
            painter.stats.images
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct PageBox {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl PageBox {
    fn letter() -> Self {
        let size = Size::letter();
        Self {
            x0: 0.0,
            y0: 0.0,
            x1: size.width,
            y1: size.height,
        }
    }

    fn size(&self) -> Size {
        Size::new(
            (self.x1 - self.x0).abs().max(1.0),
            (self.y1 - self.y0).abs().max(1.0),
        )
    }
}

fn page_box_for_id(doc: &LoDocument, mut id: ObjectId) -> Result<PageBox, lopdf::Error> {
    loop {
        let dict = doc.get_object(id)?.as_dict()?;
        if let Ok(arr) = dict.get(b"MediaBox").and_then(|o| resolve_object(doc, o)?.as_array()) {
            if let Some(bbox) = parse_media_box_array(arr) {
                return Ok(bbox);
            }
        }
        id = match dict.get(b"Parent").and_then(LoObject::as_reference) {
            Ok(parent_id) => parent_id,
            Err(_) => break,
        };
    }
    Ok(PageBox::letter())
}

fn parse_media_box_array(arr: &[LoObject]) -> Option<PageBox> {
    if arr.len() < 4 {
        return None;
    }
    let x0 = obj_to_f32(&arr[0])?;
    let y0 = obj_to_f32(&arr[1])?;
    let x1 = obj_to_f32(&arr[2])?;
    let y1 = obj_to_f32(&arr[3])?;
    Some(PageBox {
        x0: x0.min(x1),
        y0: y0.min(y1),
        x1: x0.max(x1),
        y1: y0.max(y1),
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ExtGState {
    fill_alpha: Option<f32>,
    stroke_alpha: Option<f32>,
    line_width: Option<f32>,
}

#[derive(Clone, Default)]
struct PdfResources {
    fonts: HashMap<String, Arc<PdfFont>>,
    xobjects: HashMap<String, ObjectId>,
    ext_gstates: HashMap<String, ExtGState>,
}

impl PdfResources {
    fn merged(&self, child: &PdfResources) -> PdfResources {
        let mut out = self.clone();
        for (k, v) in &child.fonts {
            out.fonts.insert(k.clone(), v.clone());
        }
        for (k, v) in &child.xobjects {
            out.xobjects.insert(k.clone(), *v);
        }
        for (k, v) in &child.ext_gstates {
            out.ext_gstates.insert(k.clone(), *v);
        }
        out
    }
}

struct PdfFont {
    base_font: String,
    composite: bool,
    data: Option<Arc<Vec<u8>>>,
    first_char: u16,
    widths: Vec<f32>,
    cid_widths: HashMap<u16, f32>,
    default_width: f32,
    cid_to_gid: Option<Vec<u16>>,
}

impl PdfFont {
    fn fallback(base_font: String) -> Self {
        Self {
            base_font,
            composite: false,
            data: None,
            first_char: 0,
            widths: Vec::new(),
            cid_widths: HashMap::new(),
            default_width: 500.0,
            cid_to_gid: None,
        }
    }

    fn codes(&self, bytes: &[u8]) -> Vec<u16> {
        if self.composite {
            bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                    [hi] => (*hi as u16) << 8,
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|b| *b as u16).collect()
        }
    }

    // Glyph-space width (thousandths of text space) when the font dictionary declares one.
    fn declared_width(&self, code: u16) -> Option<f32> {
        if self.composite {
            return self.cid_widths.get(&code).copied();
        }
        let offset = code.checked_sub(self.first_char)? as usize;
        self.widths.get(offset).copied()
    }

    fn glyph_id(&self, face: &Face<'_>, code: u16) -> Option<GlyphId> {
        if self.composite {
            let gid = match &self.cid_to_gid {
                Some(map) => *map.get(code as usize)?,
                None => code,
            };
            return Some(GlyphId(gid));
        }
        let byte = code as u8;
        face.glyph_index(char::from(byte)).or_else(|| {
            // Symbolic TrueType subsets map their codes into the private use area.
            char::from_u32(0xF000 + byte as u32).and_then(|c| face.glyph_index(c))
        })
    }

    fn is_word_space(&self, code: u16) -> bool {
        !self.composite && code == 32
    }
}

#[derive(Clone)]
struct TextState {
    font: Option<Arc<PdfFont>>,
    size: f32,
    char_spacing: f32,
    word_spacing: f32,
    h_scale: f32,
    leading: f32,
    rise: f32,
    render_mode: i64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

#[derive(Clone)]
struct GraphicsState {
    ctm: Transform,
    fill_color: Color,
    stroke_color: Color,
    fill_alpha: f32,
    stroke_alpha: f32,
    line_width: f32,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: f32,
    dash: Option<(Vec<f32>, f32)>,
    clip: Option<Mask>,
    text: TextState,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Transform::identity(),
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            dash: None,
            clip: None,
            text: TextState::default(),
        }
    }
}

#[derive(Default)]
struct PaintStats {
    glyphs_drawn: usize,
    glyphs_skipped: usize,
    images: usize,
}

struct Painter<'p> {
    pixmap: &'p mut Pixmap,
    base: Transform,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    path: PathBuilder,
    has_path: bool,
    current_point: (f32, f32),
    pending_clip: Option<FillRule>,
    text_matrix: Transform,
    line_matrix: Transform,
    stats: PaintStats,
}

impl<'p> Painter<'p> {
    fn new(pixmap: &'p mut Pixmap, base: Transform) -> Self {
        Self {
            pixmap,
            base,
            state: GraphicsState::default(),
            stack: Vec::new(),
            path: PathBuilder::new(),
            has_path: false,
            current_point: (0.0, 0.0),
            pending_clip: None,
            text_matrix: Transform::identity(),
            line_matrix: Transform::identity(),
            stats: PaintStats::default(),
        }
    }

    fn device_transform(&self) -> Transform {
        self.base.pre_concat(self.state.ctm)
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.path.move_to(x, y);
        self.current_point = (x, y);
        self.has_path = true;
    }

    fn line_to(&mut self, x: f32, y: f32) {
        if !self.has_path {
            self.move_to(x, y);
            return;
        }
        self.path.line_to(x, y);
        self.current_point = (x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        if !self.has_path {
            self.move_to(x1, y1);
        }
        self.path.cubic_to(x1, y1, x2, y2, x, y);
        self.current_point = (x, y);
    }

    fn rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.move_to(x, y);
        self.line_to(x + w, y);
        self.line_to(x + w, y + h);
        self.line_to(x, y + h);
        self.close_path();
    }

    fn close_path(&mut self) {
        if self.has_path {
            self.path.close();
        }
    }

    fn take_path(&mut self) -> Option<Path> {
        if !self.has_path {
            return None;
        }
        self.has_path = false;
        let builder = std::mem::replace(&mut self.path, PathBuilder::new());
        builder.finish()
    }

    fn paint(&mut self, fill: Option<FillRule>, stroke: bool) {
        let Some(path) = self.take_path() else {
            self.pending_clip = None;
            return;
        };
        let ts = self.device_transform();
        if let Some(rule) = fill {
            let paint = solid_paint(self.state.fill_color, self.state.fill_alpha);
            self.pixmap
                .fill_path(&path, &paint, rule, ts, self.state.clip.as_ref());
        }
        if stroke {
            let paint = solid_paint(self.state.stroke_color, self.state.stroke_alpha);
            let stroke = build_stroke(&self.state);
            self.pixmap
                .stroke_path(&path, &paint, &stroke, ts, self.state.clip.as_ref());
        }
        if let Some(rule) = self.pending_clip.take() {
            self.intersect_clip(&path, rule, ts);
        }
    }

    fn intersect_clip(&mut self, path: &Path, rule: FillRule, ts: Transform) {
        if let Some(mask) = self.state.clip.as_mut() {
            mask.intersect_path(path, rule, true, ts);
            return;
        }
        let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        mask.fill_path(path, rule, true, ts);
        self.state.clip = Some(mask);
    }

    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(prev) = self.stack.pop() {
            self.state = prev;
        }
    }

    fn begin_text(&mut self) {
        self.text_matrix = Transform::identity();
        self.line_matrix = Transform::identity();
    }

    fn move_text_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = self.line_matrix.pre_concat(Transform::from_translate(tx, ty));
        self.text_matrix = self.line_matrix;
    }

    fn set_text_matrix(&mut self, m: Transform) {
        self.text_matrix = m;
        self.line_matrix = m;
    }

    fn next_line(&mut self) {
        let leading = self.state.text.leading;
        self.move_text_line(0.0, -leading);
    }

    fn advance_text(&mut self, tx: f32) {
        if tx.is_finite() {
            self.text_matrix = self.text_matrix.pre_concat(Transform::from_translate(tx, 0.0));
        }
    }

    fn show_text(&mut self, bytes: &[u8]) {
        let Some(font) = self.state.text.font.clone() else {
            return;
        };
        let text = self.state.text.clone();
        let face = font
            .data
            .as_ref()
            .and_then(|data| Face::parse(data.as_slice(), 0).ok());
        let visible = !matches!(text.render_mode, 3 | 7);

        for code in font.codes(bytes) {
            let gid = face.as_ref().and_then(|f| font.glyph_id(f, code));
            let width = font
                .declared_width(code)
                .or_else(|| {
                    let face = face.as_ref()?;
                    let advance = face.glyph_hor_advance(gid?)? as f32;
                    Some(advance * 1000.0 / face.units_per_em().max(1) as f32)
                })
                .unwrap_or(font.default_width);

            if visible {
                match (face.as_ref(), gid) {
                    (Some(face), Some(gid)) => self.draw_glyph(face, gid, &text),
                    _ => self.stats.glyphs_skipped += 1,
                }
            }

            let mut tx = (width / 1000.0) * text.size + text.char_spacing;
            if font.is_word_space(code) {
                tx += text.word_spacing;
            }
            self.advance_text(tx * text.h_scale);
        }
    }

    fn draw_glyph(&mut self, face: &Face<'_>, gid: GlyphId, text: &TextState) {
        let upem = face.units_per_em().max(1) as f32;
        let mut outline = GlyphOutline::new(1.0 / upem);
        if face.outline_glyph(gid, &mut outline).is_none() {
            // Spaces and other blank glyphs have an advance but no outline.
            return;
        }
        let Some(path) = outline.finish() else {
            return;
        };
        let glyph_space = Transform::from_row(
            text.size * text.h_scale,
            0.0,
            0.0,
            text.size,
            0.0,
            text.rise,
        );
        let ts = self
            .device_transform()
            .pre_concat(self.text_matrix)
            .pre_concat(glyph_space);
        if matches!(text.render_mode, 1 | 5) {
            let paint = solid_paint(self.state.stroke_color, self.state.stroke_alpha);
            let mut stroke = build_stroke(&self.state);
            // Stroke width is in user space; undo the glyph-space scale.
            stroke.width /= text.size.abs().max(f32::EPSILON);
            self.pixmap
                .stroke_path(&path, &paint, &stroke, ts, self.state.clip.as_ref());
        } else {
            let paint = solid_paint(self.state.fill_color, self.state.fill_alpha);
            self.pixmap
                .fill_path(&path, &paint, FillRule::Winding, ts, self.state.clip.as_ref());
        }
        self.stats.glyphs_drawn += 1;
    }

    fn draw_image(&mut self, image: &Pixmap) {
        let w = image.width() as f32;
        let h = image.height() as f32;
        // Images fill the unit square of user space with their first row at the top.
        let unit = Transform::from_row(1.0 / w, 0.0, 0.0, -1.0 / h, 0.0, 1.0);
        let ts = self.device_transform().pre_concat(unit);
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(0, 0, image.as_ref(), &paint, ts, self.state.clip.as_ref());
        self.stats.images += 1;
    }
}

struct GlyphOutline {
    builder: PathBuilder,
    scale: f32,
}

impl GlyphOutline {
    fn new(scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphOutline {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(x * self.scale, y * self.scale);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(x * self.scale, y * self.scale);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            x1 * self.scale,
            y1 * self.scale,
            x * self.scale,
            y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            x1 * self.scale,
            y1 * self.scale,
            x2 * self.scale,
            y2 * self.scale,
            x * self.scale,
            y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

struct Loader<'d> {
    doc: &'d LoDocument,
    fonts: &'d mut HashMap<ObjectId, Arc<PdfFont>>,
    images: &'d mut HashMap<ObjectId, Option<Arc<Pixmap>>>,
    page_index: usize,
}

impl Loader<'_> {
    fn err(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::page_render(self.page_index, message)
    }

    // Resources are inheritable through the page tree.
    fn page_resources(&mut self, page_id: ObjectId) -> Result<PdfResources, TemplateError> {
        let doc = self.doc;
        let mut id = page_id;
        loop {
            let dict = doc
                .get_object(id)
                .and_then(LoObject::as_dict)
                .map_err(lopdf_err(self.page_index))?;
            if let Ok(obj) = dict.get(b"Resources") {
                return self.resources_from_object(obj);
            }
            id = match dict.get(b"Parent").and_then(LoObject::as_reference) {
                Ok(parent) => parent,
                Err(_) => return Ok(PdfResources::default()),
            };
        }
    }

    fn resources_from_object(&mut self, obj: &LoObject) -> Result<PdfResources, TemplateError> {
        let doc = self.doc;
        let dict = match resolve_object(doc, obj).map_err(lopdf_err(self.page_index))? {
            LoObject::Dictionary(d) => d,
            _ => return Ok(PdfResources::default()),
        };

        let mut out = PdfResources::default();

        if let Some(font_dict) = dict.get(b"Font").ok().and_then(|o| resolve_dict(doc, o)) {
            for (name, font_obj) in font_dict.iter() {
                let font = self.font(font_obj);
                out.fonts.insert(name_bytes_to_string(name), font);
            }
        }

        if let Some(xobj_dict) = dict.get(b"XObject").ok().and_then(|o| resolve_dict(doc, o)) {
            for (name, ref_obj) in xobj_dict.iter() {
                if let Ok(id) = ref_obj.as_reference() {
                    out.xobjects.insert(name_bytes_to_string(name), id);
                }
            }
        }

        if let Some(gs_dict) = dict
            .get(b"ExtGState")
            .ok()
            .and_then(|o| resolve_dict(doc, o))
        {
            for (name, gs_obj) in gs_dict.iter() {
                let Some(gs) = resolve_dict(doc, gs_obj) else {
                    continue;
                };
                let read = |key: &[u8]| gs.get(key).ok().and_then(obj_to_f32);
                out.ext_gstates.insert(
                    name_bytes_to_string(name),
                    ExtGState {
                        fill_alpha: read(b"ca").map(|v| v.clamp(0.0, 1.0)),
                        stroke_alpha: read(b"CA").map(|v| v.clamp(0.0, 1.0)),
                        line_width: read(b"LW").map(|v| v.max(0.0)),
                    },
                );
            }
        }

        Ok(out)
    }

    fn font(&mut self, obj: &LoObject) -> Arc<PdfFont> {
        let id = obj.as_reference().ok();
        if let Some(font) = id.and_then(|id| self.fonts.get(&id)) {
            return font.clone();
        }
        let font = Arc::new(load_font(self.doc, obj));
        if font.data.is_none() {
            log::debug!("font {} is not embedded; its text is skipped", font.base_font);
        }
        if let Some(id) = id {
            self.fonts.insert(id, font.clone());
        }
        font
    }

    fn image(&mut self, id: ObjectId, stream: &lopdf::Stream) -> Option<Arc<Pixmap>> {
        if let Some(cached) = self.images.get(&id) {
            return cached.clone();
        }
        let decoded = decode_image_xobject(self.doc, stream).map(Arc::new);
        if decoded.is_none() {
            log::debug!("image xobject {:?} uses an unsupported encoding", id);
        }
        self.images.insert(id, decoded.clone());
        decoded
    }
}

fn run_operations(
    loader: &mut Loader<'_>,
    painter: &mut Painter<'_>,
    operations: &[Operation],
    resources: &PdfResources,
    visited_forms: &mut HashSet<ObjectId>,
) -> Result<(), TemplateError> {
    for op in operations {
        match op.operator.as_str() {
            "q" => painter.save(),
            "Q" => painter.restore(),
            "cm" => {
                if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                    painter.state.ctm = painter
                        .state
                        .ctm
                        .pre_concat(Transform::from_row(a, b, c, d, e, f));
                }
            }
            "w" => {
                if let Some(width) = op_f32(op, 0) {
                    painter.state.line_width = width.max(0.0);
                }
            }
            "J" => {
                if let Some(cap) = op_i64(op, 0) {
                    painter.state.line_cap = match cap {
                        1 => LineCap::Round,
                        2 => LineCap::Square,
                        _ => LineCap::Butt,
                    };
                }
            }
            "j" => {
                if let Some(join) = op_i64(op, 0) {
                    painter.state.line_join = match join {
                        1 => LineJoin::Round,
                        2 => LineJoin::Bevel,
                        _ => LineJoin::Miter,
                    };
                }
            }
            "M" => {
                if let Some(limit) = op_f32(op, 0) {
                    painter.state.miter_limit = limit.max(1.0);
                }
            }
            "d" => {
                let pattern: Vec<f32> = op
                    .operands
                    .first()
                    .and_then(|o| o.as_array().ok())
                    .map(|arr| arr.iter().filter_map(obj_to_f32).map(f32::abs).collect())
                    .unwrap_or_else(Vec::new);
                let phase = op_f32(op, 1).unwrap_or(0.0);
                painter.state.dash = if pattern.is_empty() {
                    None
                } else {
                    Some((pattern, phase))
                };
            }
            "gs" => {
                if let Some(gs) = op_name(op, 0).and_then(|name| resources.ext_gstates.get(&name))
                {
                    if let Some(alpha) = gs.fill_alpha {
                        painter.state.fill_alpha = alpha;
                    }
                    if let Some(alpha) = gs.stroke_alpha {
                        painter.state.stroke_alpha = alpha;
                    }
                    if let Some(width) = gs.line_width {
                        painter.state.line_width = width;
                    }
                }
            }
            "g" | "rg" | "k" | "sc" | "scn" => {
                if let Some(color) = op_device_color(op) {
                    painter.state.fill_color = color;
                }
            }
            "G" | "RG" | "K" | "SC" | "SCN" => {
                if let Some(color) = op_device_color(op) {
                    painter.state.stroke_color = color;
                }
            }
            "cs" => painter.state.fill_color = Color::BLACK,
            "CS" => painter.state.stroke_color = Color::BLACK,
            "m" => {
                if let Some([x, y]) = op_f32_2(op) {
                    painter.move_to(x, y);
                }
            }
            "l" => {
                if let Some([x, y]) = op_f32_2(op) {
                    painter.line_to(x, y);
                }
            }
            "c" => {
                if let Some([x1, y1, x2, y2, x, y]) = op_f32_6(op) {
                    painter.curve_to(x1, y1, x2, y2, x, y);
                }
            }
            "v" => {
                if let Some([x2, y2, x, y]) = op_f32_4(op) {
                    let (x1, y1) = painter.current_point;
                    painter.curve_to(x1, y1, x2, y2, x, y);
                }
            }
            "y" => {
                if let Some([x1, y1, x, y]) = op_f32_4(op) {
                    painter.curve_to(x1, y1, x, y, x, y);
                }
            }
            "re" => {
                if let Some([x, y, w, h]) = op_f32_4(op) {
                    painter.rect(x, y, w, h);
                }
            }
            "h" => painter.close_path(),
            "W" => painter.pending_clip = Some(FillRule::Winding),
            "W*" => painter.pending_clip = Some(FillRule::EvenOdd),
            "n" => painter.paint(None, false),
            "f" | "F" => painter.paint(Some(FillRule::Winding), false),
            "f*" => painter.paint(Some(FillRule::EvenOdd), false),
            "S" => painter.paint(None, true),
            "s" => {
                painter.close_path();
                painter.paint(None, true);
            }
            "B" => painter.paint(Some(FillRule::Winding), true),
            "B*" => painter.paint(Some(FillRule::EvenOdd), true),
            "b" => {
                painter.close_path();
                painter.paint(Some(FillRule::Winding), true);
            }
            "b*" => {
                painter.close_path();
                painter.paint(Some(FillRule::EvenOdd), true);
            }
            "BT" => painter.begin_text(),
            "ET" => {}
            "Tf" => {
                if let Some(name) = op_name(op, 0) {
                    painter.state.text.font = Some(
                        resources
                            .fonts
                            .get(&name)
                            .cloned()
                            .unwrap_or_else(|| Arc::new(PdfFont::fallback(name))),
                    );
                }
                if let Some(size) = op_f32(op, 1) {
                    painter.state.text.size = size;
                }
            }
            "Tc" => {
                if let Some(v) = op_f32(op, 0) {
                    painter.state.text.char_spacing = v;
                }
            }
            "Tw" => {
                if let Some(v) = op_f32(op, 0) {
                    painter.state.text.word_spacing = v;
                }
            }
            "Tz" => {
                if let Some(v) = op_f32(op, 0) {
                    painter.state.text.h_scale = v / 100.0;
                }
            }
            "TL" => {
                if let Some(v) = op_f32(op, 0) {
                    painter.state.text.leading = v;
                }
            }
            "Ts" => {
                if let Some(v) = op_f32(op, 0) {
                    painter.state.text.rise = v;
                }
            }
            "Tr" => {
                if let Some(v) = op_i64(op, 0) {
                    painter.state.text.render_mode = v.clamp(0, 7);
                }
            }
            "Td" => {
                if let Some([tx, ty]) = op_f32_2(op) {
                    painter.move_text_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = op_f32_2(op) {
                    painter.state.text.leading = -ty;
                    painter.move_text_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                    painter.set_text_matrix(Transform::from_row(a, b, c, d, e, f));
                }
            }
            "T*" => painter.next_line(),
            "Tj" => {
                if let Some(bytes) = op.operands.first().and_then(string_bytes) {
                    painter.show_text(bytes);
                }
            }
            "'" => {
                painter.next_line();
                if let Some(bytes) = op.operands.first().and_then(string_bytes) {
                    painter.show_text(bytes);
                }
            }
            "\"" => {
                if let Some([aw, ac]) = op_f32_2(op) {
                    painter.state.text.word_spacing = aw;
                    painter.state.text.char_spacing = ac;
                }
                painter.next_line();
                if let Some(bytes) = op.operands.get(2).and_then(string_bytes) {
                    painter.show_text(bytes);
                }
            }
            "TJ" => {
                let Some(items) = op.operands.first().and_then(|o| o.as_array().ok()) else {
                    continue;
                };
                for item in items {
                    if let Some(bytes) = string_bytes(item) {
                        painter.show_text(bytes);
                    } else if let Some(adj) = obj_to_f32(item) {
                        // Adjustments are thousandths of text space, subtracted from the advance.
                        let text = &painter.state.text;
                        let tx = -(adj / 1000.0) * text.size * text.h_scale;
                        painter.advance_text(tx);
                    }
                }
            }
            "Do" => {
                let Some(id) = op_name(op, 0).and_then(|name| resources.xobjects.get(&name).copied())
                else {
                    continue;
                };
                draw_xobject(loader, painter, id, resources, visited_forms)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn draw_xobject(
    loader: &mut Loader<'_>,
    painter: &mut Painter<'_>,
    id: ObjectId,
    parent_resources: &PdfResources,
    visited_forms: &mut HashSet<ObjectId>,
) -> Result<(), TemplateError> {
    let doc = loader.doc;
    let stream = doc
        .get_object(id)
        .and_then(LoObject::as_stream)
        .map_err(lopdf_err(loader.page_index))?;
    let subtype = stream
        .dict
        .get(b"Subtype")
        .ok()
        .and_then(|o| o.as_name().ok())
        .map(name_bytes_to_string)
        .unwrap_or_default();

    match subtype.as_str() {
        "Form" => {
            if !visited_forms.insert(id) {
                return Ok(());
            }
            let form_bytes = stream
                .get_plain_content()
                .map_err(|e| loader.err(format!("form xobject decode failed: {e}")))?;
            let form_content =
                Content::decode(&form_bytes).map_err(lopdf_err(loader.page_index))?;
            let form_resources = match stream.dict.get(b"Resources") {
                Ok(obj) => loader.resources_from_object(obj)?,
                Err(_) => PdfResources::default(),
            };
            let merged = parent_resources.merged(&form_resources);
            let matrix = stream
                .dict
                .get(b"Matrix")
                .ok()
                .and_then(parse_matrix_object)
                .unwrap_or_else(Transform::identity);

            let depth = painter.stack.len();
            painter.save();
            painter.state.ctm = painter.state.ctm.pre_concat(matrix);
            let result = run_operations(
                loader,
                painter,
                &form_content.operations,
                &merged,
                visited_forms,
            );
            // Unbalanced q/Q inside the form must not leak into the page.
            painter.stack.truncate(depth + 1);
            painter.restore();
            visited_forms.remove(&id);
            result
        }
        "Image" => {
            if let Some(image) = loader.image(id, stream) {
                painter.draw_image(&image);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn load_font(doc: &LoDocument, obj: &LoObject) -> PdfFont {
    let Some(dict) = resolve_dict(doc, obj) else {
        return PdfFont::fallback("Helvetica".to_string());
    };
    let base_font = dict
        .get(b"BaseFont")
        .ok()
        .and_then(|o| o.as_name().ok())
        .map(name_bytes_to_string)
        .unwrap_or_else(|| "Helvetica".to_string());
    let subtype = dict
        .get(b"Subtype")
        .ok()
        .and_then(|o| o.as_name().ok())
        .map(name_bytes_to_string)
        .unwrap_or_default();

    let mut font = PdfFont::fallback(base_font);

    if subtype == "Type0" {
        font.composite = true;
        font.default_width = 1000.0;
        let descendant = dict
            .get(b"DescendantFonts")
            .ok()
            .and_then(|o| resolve_object(doc, o).ok())
            .and_then(|o| o.as_array().ok())
            .and_then(|arr| arr.first())
            .and_then(|o| resolve_dict(doc, o));
        if let Some(descendant) = descendant {
            if let Some(dw) = descendant.get(b"DW").ok().and_then(|o| resolved_f32(doc, o)) {
                font.default_width = dw.max(0.0);
            }
            if let Ok(w) = descendant.get(b"W") {
                font.cid_widths = parse_cid_widths(doc, w);
            }
            font.cid_to_gid = descendant
                .get(b"CIDToGIDMap")
                .ok()
                .and_then(|o| resolve_object(doc, o).ok())
                .and_then(|o| o.as_stream().ok())
                .and_then(|s| s.get_plain_content().ok())
                .map(|bytes| {
                    bytes
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect()
                });
            font.data = descendant
                .get(b"FontDescriptor")
                .ok()
                .and_then(|o| font_file_bytes(doc, o))
                .map(Arc::new);
        }
        return font;
    }

    font.first_char = dict
        .get(b"FirstChar")
        .ok()
        .and_then(|o| resolved_f32(doc, o))
        .map(|v| v.clamp(0.0, u16::MAX as f32) as u16)
        .unwrap_or(0);
    if let Some(widths) = dict
        .get(b"Widths")
        .ok()
        .and_then(|o| resolve_object(doc, o).ok())
        .and_then(|o| o.as_array().ok())
    {
        font.widths = widths
            .iter()
            .map(|w| resolved_f32(doc, w).unwrap_or(0.0).max(0.0))
            .collect();
    }
    if let Ok(descriptor) = dict.get(b"FontDescriptor") {
        if let Some(missing) = resolve_dict(doc, descriptor)
            .and_then(|d| d.get(b"MissingWidth").ok().and_then(|o| resolved_f32(doc, o)))
        {
            font.default_width = missing.max(0.0);
        }
        font.data = font_file_bytes(doc, descriptor).map(Arc::new);
    }
    font
}

fn font_file_bytes(doc: &LoDocument, descriptor_obj: &LoObject) -> Option<Vec<u8>> {
    let descriptor = resolve_dict(doc, descriptor_obj)?;
    for key in [b"FontFile2".as_slice(), b"FontFile3".as_slice()] {
        if let Some(data) = descriptor
            .get(key)
            .ok()
            .and_then(|o| resolve_object(doc, o).ok())
            .and_then(|o| o.as_stream().ok())
            .and_then(|s| s.get_plain_content().ok())
        {
            // Bare CFF (FontFile3/Type1C) has no sfnt wrapper and cannot be outlined here.
            if Face::parse(&data, 0).is_ok() {
                return Some(data);
            }
        }
    }
    None
}

// `W` arrays mix `c [w1 w2 ...]` and `c_first c_last w` entries.
fn parse_cid_widths(doc: &LoDocument, obj: &LoObject) -> HashMap<u16, f32> {
    let mut out = HashMap::new();
    let Some(items) = resolve_object(doc, obj).ok().and_then(|o| o.as_array().ok()) else {
        return out;
    };
    let mut idx = 0usize;
    while idx + 1 < items.len() {
        let Some(start) = resolved_f32(doc, &items[idx]).map(|v| v as u32) else {
            idx += 1;
            continue;
        };
        if let Some(list) = resolve_object(doc, &items[idx + 1])
            .ok()
            .and_then(|o| o.as_array().ok())
        {
            for (offset, w) in list.iter().enumerate() {
                let Some(code) = u32::try_from(offset).ok().and_then(|o| start.checked_add(o))
                else {
                    break;
                };
                if let (Ok(code), Some(w)) = (u16::try_from(code), resolved_f32(doc, w)) {
                    out.insert(code, w.max(0.0));
                }
            }
            idx += 2;
            continue;
        }
        let (Some(end), Some(w)) = (
            resolved_f32(doc, &items[idx + 1]).map(|v| v as u32),
            items.get(idx + 2).and_then(|o| resolved_f32(doc, o)),
        ) else {
            idx += 3;
            continue;
        };
        for code in start..=end.min(u16::MAX as u32) {
            out.insert(code as u16, w.max(0.0));
        }
        idx += 3;
    }
    out
}

#[derive(Clone, Copy)]
enum DirectColor {
    Gray,
    Rgb,
    Cmyk,
}

impl DirectColor {
    fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    fn rgb_from_samples(self, samples: &[u8]) -> Option<(u8, u8, u8)> {
        match self {
            Self::Gray => {
                let v = *samples.first()?;
                Some((v, v, v))
            }
            Self::Rgb => Some((*samples.first()?, *samples.get(1)?, *samples.get(2)?)),
            Self::Cmyk => {
                let unit = |v: u8| v as f32 / 255.0;
                let [r, g, b, _] = cmyk_to_rgb(
                    unit(*samples.first()?),
                    unit(*samples.get(1)?),
                    unit(*samples.get(2)?),
                    unit(*samples.get(3)?),
                )
                .to_rgba8(255);
                Some((r, g, b))
            }
        }
    }
}

enum ImageColorSpace {
    Direct(DirectColor),
    Indexed { base: DirectColor, lookup: Vec<u8> },
}

impl ImageColorSpace {
    fn components(&self) -> usize {
        match self {
            Self::Direct(mode) => mode.channels(),
            Self::Indexed { .. } => 1,
        }
    }
}

fn direct_color_from_name(name: &[u8]) -> Option<DirectColor> {
    match name {
        b"DeviceGray" | b"CalGray" | b"G" => Some(DirectColor::Gray),
        b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(DirectColor::Rgb),
        b"DeviceCMYK" | b"CMYK" => Some(DirectColor::Cmyk),
        _ => None,
    }
}

fn parse_image_color_space(doc: &LoDocument, obj: &LoObject) -> Option<ImageColorSpace> {
    match resolve_object(doc, obj).ok()? {
        LoObject::Name(name) => direct_color_from_name(name).map(ImageColorSpace::Direct),
        LoObject::Array(arr) => {
            let head = resolve_object(doc, arr.first()?).ok()?.as_name().ok()?;
            if let Some(direct) = direct_color_from_name(head) {
                return Some(ImageColorSpace::Direct(direct));
            }
            match head {
                b"ICCBased" => {
                    let n = resolve_object(doc, arr.get(1)?)
                        .ok()?
                        .as_stream()
                        .ok()?
                        .dict
                        .get(b"N")
                        .ok()
                        .and_then(|o| o.as_i64().ok())
                        .unwrap_or(3);
                    Some(ImageColorSpace::Direct(match n {
                        1 => DirectColor::Gray,
                        4 => DirectColor::Cmyk,
                        _ => DirectColor::Rgb,
                    }))
                }
                b"Indexed" | b"I" => {
                    let base = match parse_image_color_space(doc, arr.get(1)?)? {
                        ImageColorSpace::Direct(mode) => mode,
                        ImageColorSpace::Indexed { .. } => return None,
                    };
                    let lookup = match resolve_object(doc, arr.get(3)?).ok()? {
                        LoObject::String(bytes, _) => bytes.clone(),
                        LoObject::Stream(stream) => stream.get_plain_content().ok()?,
                        _ => return None,
                    };
                    Some(ImageColorSpace::Indexed { base, lookup })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn decode_image_xobject(doc: &LoDocument, stream: &lopdf::Stream) -> Option<Pixmap> {
    let filters = stream.filters().unwrap_or_default();
    let mut pixmap = if filters.iter().any(|f| *f == b"DCTDecode") {
        decode_image_to_pixmap(stream.content.as_slice(), Some(image::ImageFormat::Jpeg))?
    } else {
        let plain = stream.get_plain_content().ok()?;
        samples_to_pixmap(doc, &stream.dict, &plain)?
    };

    if let Some(mask) = stream
        .dict
        .get(b"SMask")
        .ok()
        .and_then(|o| resolve_object(doc, o).ok())
        .and_then(|o| o.as_stream().ok())
    {
        apply_soft_mask(&mut pixmap, mask);
    }
    Some(pixmap)
}

fn samples_to_pixmap(doc: &LoDocument, dict: &LoDictionary, plain: &[u8]) -> Option<Pixmap> {
    let width = dict_u32(dict, b"Width")?;
    let height = dict_u32(dict, b"Height")?;
    let is_mask = dict
        .get(b"ImageMask")
        .ok()
        .and_then(|o| o.as_bool().ok())
        .unwrap_or(false);
    let bpc = if is_mask {
        1
    } else {
        dict.get(b"BitsPerComponent")
            .ok()
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(8)
    };
    if !matches!(bpc, 1 | 2 | 4 | 8) {
        return None;
    }
    let bpc = bpc as u32;
    let color_space = if is_mask {
        ImageColorSpace::Direct(DirectColor::Gray)
    } else {
        match dict.get(b"ColorSpace") {
            Ok(obj) => parse_image_color_space(doc, obj)?,
            Err(_) => ImageColorSpace::Direct(DirectColor::Gray),
        }
    };
    let invert = dict
        .get(b"Decode")
        .ok()
        .and_then(|o| o.as_array().ok())
        .and_then(|arr| Some(obj_to_f32(arr.first()?)? > obj_to_f32(arr.get(1)?)?))
        .unwrap_or(false);

    let components = color_space.components();
    let row_bits = (width as usize) * components * bpc as usize;
    let row_bytes = row_bits.div_ceil(8);
    if plain.len() < row_bytes * height as usize {
        return None;
    }

    let max = ((1u32 << bpc) - 1) as f32;
    let mut pixmap = Pixmap::new(width, height)?;
    let data = pixmap.data_mut();
    let mut samples = vec![0u8; components];
    for y in 0..height as usize {
        let row = &plain[y * row_bytes..(y + 1) * row_bytes];
        for x in 0..width as usize {
            for (c, slot) in samples.iter_mut().enumerate() {
                let raw = read_sample(row, x * components + c, bpc);
                *slot = match &color_space {
                    ImageColorSpace::Indexed { .. } => raw as u8,
                    ImageColorSpace::Direct(_) => {
                        let v = (raw as f32 / max * 255.0).round() as u8;
                        if invert { 255 - v } else { v }
                    }
                };
            }
            let (r, g, b, a) = if is_mask {
                // Stencil masks paint where the sample is 0 (after decode inversion).
                if samples[0] == 0 {
                    (0, 0, 0, 255)
                } else {
                    (0, 0, 0, 0)
                }
            } else {
                let (r, g, b) = match &color_space {
                    ImageColorSpace::Direct(mode) => mode.rgb_from_samples(&samples)?,
                    ImageColorSpace::Indexed { base, lookup } => {
                        let channels = base.channels();
                        let offset = samples[0] as usize * channels;
                        base.rgb_from_samples(lookup.get(offset..offset + channels)?)?
                    }
                };
                (r, g, b, 255)
            };
            let dst = (y * width as usize + x) * 4;
            data[dst] = premul_u8(r, a);
            data[dst + 1] = premul_u8(g, a);
            data[dst + 2] = premul_u8(b, a);
            data[dst + 3] = a;
        }
    }
    Some(pixmap)
}

fn read_sample(row: &[u8], index: usize, bpc: u32) -> u32 {
    match bpc {
        8 => row.get(index).copied().unwrap_or(0) as u32,
        _ => {
            let bit = index * bpc as usize;
            let byte = row.get(bit / 8).copied().unwrap_or(0) as u32;
            let shift = 8 - bpc - (bit % 8) as u32;
            (byte >> shift) & ((1 << bpc) - 1)
        }
    }
}

fn apply_soft_mask(pixmap: &mut Pixmap, mask: &lopdf::Stream) {
    let (Some(w), Some(h)) = (dict_u32(&mask.dict, b"Width"), dict_u32(&mask.dict, b"Height"))
    else {
        return;
    };
    if w != pixmap.width() || h != pixmap.height() {
        return;
    }
    let Ok(alpha) = mask.get_plain_content() else {
        return;
    };
    if alpha.len() < (w * h) as usize {
        return;
    }
    for (px, a) in pixmap.data_mut().chunks_exact_mut(4).zip(alpha.iter()) {
        // Pixels are opaque at this point, so the stored channels are straight color.
        px[0] = premul_u8(px[0], *a);
        px[1] = premul_u8(px[1], *a);
        px[2] = premul_u8(px[2], *a);
        px[3] = *a;
    }
}

fn solid_paint(color: Color, alpha: f32) -> Paint<'static> {
    let [r, g, b, a] = color.to_rgba8((alpha.clamp(0.0, 1.0) * 255.0).round() as u8);
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, a);
    paint.anti_alias = true;
    paint
}

fn build_stroke(state: &GraphicsState) -> Stroke {
    let mut stroke = Stroke {
        width: state.line_width,
        miter_limit: state.miter_limit,
        line_cap: state.line_cap,
        line_join: state.line_join,
        ..Stroke::default()
    };
    if let Some((pattern, phase)) = &state.dash {
        let mut pattern = pattern.clone();
        if pattern.len() % 2 == 1 {
            let copy = pattern.clone();
            pattern.extend(copy);
        }
        stroke.dash = StrokeDash::new(pattern, *phase);
    }
    stroke
}

fn op_device_color(op: &Operation) -> Option<Color> {
    let values: Vec<f32> = op.operands.iter().filter_map(obj_to_f32).collect();
    match values.as_slice() {
        [gray] => Some(Color::rgb(*gray, *gray, *gray)),
        [r, g, b] => Some(Color::rgb(*r, *g, *b)),
        [c, m, y, k] => Some(cmyk_to_rgb(*c, *m, *y, *k)),
        _ => None,
    }
}

fn cmyk_to_rgb(c: f32, m: f32, y: f32, k: f32) -> Color {
    let c = c.clamp(0.0, 1.0);
    let m = m.clamp(0.0, 1.0);
    let y = y.clamp(0.0, 1.0);
    let k = k.clamp(0.0, 1.0);
    Color::rgb((1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k))
}

fn parse_matrix_object(obj: &LoObject) -> Option<Transform> {
    let arr = obj.as_array().ok()?;
    if arr.len() < 6 {
        return None;
    }
    Some(Transform::from_row(
        obj_to_f32(&arr[0])?,
        obj_to_f32(&arr[1])?,
        obj_to_f32(&arr[2])?,
        obj_to_f32(&arr[3])?,
        obj_to_f32(&arr[4])?,
        obj_to_f32(&arr[5])?,
    ))
}

fn resolve_object<'a>(
    doc: &'a LoDocument,
    mut obj: &'a LoObject,
) -> Result<&'a LoObject, lopdf::Error> {
    loop {
        match obj {
            LoObject::Reference(id) => obj = doc.get_object(*id)?,
            _ => return Ok(obj),
        }
    }
}

fn resolve_dict<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoDictionary> {
    match resolve_object(doc, obj).ok()? {
        LoObject::Dictionary(d) => Some(d),
        LoObject::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

fn resolved_f32(doc: &LoDocument, obj: &LoObject) -> Option<f32> {
    obj_to_f32(resolve_object(doc, obj).ok()?)
}

fn dict_u32(dict: &LoDictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .ok()
        .and_then(|o| o.as_i64().ok())
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

fn string_bytes(obj: &LoObject) -> Option<&[u8]> {
    match obj {
        LoObject::String(bytes, _) => Some(bytes.as_slice()),
        _ => None,
    }
}

fn op_name(op: &Operation, idx: usize) -> Option<String> {
    let name = op.operands.get(idx)?.as_name().ok()?;
    Some(name_bytes_to_string(name))
}

fn op_f32(op: &Operation, idx: usize) -> Option<f32> {
    obj_to_f32(op.operands.get(idx)?)
}

fn op_i64(op: &Operation, idx: usize) -> Option<i64> {
    op.operands.get(idx)?.as_i64().ok()
}

fn op_f32_2(op: &Operation) -> Option<[f32; 2]> {
    Some([op_f32(op, 0)?, op_f32(op, 1)?])
}

fn op_f32_4(op: &Operation) -> Option<[f32; 4]> {
    Some([
        op_f32(op, 0)?,
        op_f32(op, 1)?,
        op_f32(op, 2)?,
        op_f32(op, 3)?,
    ])
}

fn op_f32_6(op: &Operation) -> Option<[f32; 6]> {
    Some([
        op_f32(op, 0)?,
        op_f32(op, 1)?,
        op_f32(op, 2)?,
        op_f32(op, 3)?,
        op_f32(op, 4)?,
        op_f32(op, 5)?,
    ])
}

fn obj_to_f32(obj: &LoObject) -> Option<f32> {
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}

fn name_bytes_to_string(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_string()
}

fn lopdf_err(page_index: usize) -> impl Fn(lopdf::Error) -> TemplateError {
    move |err| TemplateError::page_render(page_index, format!("pdf raster error: {err}"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::surface::{Backdrop, DrawingSurface};
    use lopdf::{Stream as LoStream, dictionary};

    // Builds a PDF whose pages are solid rectangles of the given colors, plus a red square
    // in the top-left corner so orientation can be checked.
    pub(crate) fn solid_pages_pdf(fills: &[(f32, f32, f32)], width: i64, height: i64) -> Vec<u8> {
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for (r, g, b) in fills {
            let content = format!(
                "{r} {g} {b} rg\n0 0 {width} {height} re\nf\n1 0 0 rg\n0 {} 10 10 re\nf\n",
                height - 10
            )
            .into_bytes();
            let content_id = doc.add_object(LoStream::new(LoDictionary::new(), content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! {},
                "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            });
            kids.push(page_id.into());
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.compress();
        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save pdf");
        out
    }

    fn render(source: &mut PdfPageSource, page_index: usize, scale: f32) -> image::RgbaImage {
        let size = source
            .page_size(page_index)
            .expect("size")
            .to_pixels(scale)
            .expect("pixels");
        let mut surface = DrawingSurface::new();
        let mut lease = surface.lease(size, Backdrop::White).expect("lease");
        source
            .render_page(page_index, &mut lease, scale)
            .expect("render");
        let png = lease.encode_png().expect("png");
        image::load_from_memory(&png).expect("decode").to_rgba8()
    }

    #[test]
    fn open_rejects_garbage() {
        let err = PdfPageSource::open(b"%PDF-1.7 not really").err().expect("error");
        assert!(matches!(err, TemplateError::DocumentOpen(_)));
    }

    #[test]
    fn fills_and_orientation_survive_rendering() {
        let bytes = solid_pages_pdf(&[(0.0, 0.0, 1.0)], 100, 50);
        let mut source = PdfPageSource::open(&bytes).expect("open");
        assert_eq!(source.page_count(), 1);
        assert_eq!(source.page_size(0).expect("size"), Size::new(100.0, 50.0));

        let img = render(&mut source, 0, 1.0);
        assert_eq!(img.dimensions(), (100, 50));
        assert_eq!(img.get_pixel(50, 30).0, [0, 0, 255, 255]);
        // The red marker sits at the top-left of the rendered bitmap.
        assert_eq!(img.get_pixel(3, 3).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(3, 46).0, [0, 0, 255, 255]);
    }

    #[test]
    fn render_scale_multiplies_pixel_dimensions() {
        let bytes = solid_pages_pdf(&[(0.0, 1.0, 0.0)], 100, 50);
        let mut source = PdfPageSource::open(&bytes).expect("open");
        let img = render(&mut source, 0, 2.0);
        assert_eq!(img.dimensions(), (200, 100));
        assert_eq!(img.get_pixel(100, 80).0, [0, 255, 0, 255]);
    }

    #[test]
    fn out_of_range_page_is_a_render_error() {
        let bytes = solid_pages_pdf(&[(1.0, 1.0, 1.0)], 10, 10);
        let source = PdfPageSource::open(&bytes).expect("open");
        match source.page_size(3) {
            Err(TemplateError::PageRender { page_index, .. }) => assert_eq!(page_index, 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn clip_restricts_fill_area() {
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.new_object_id();
        let content = b"q 0 0 20 20 re W n 0 0 1 rg 0 0 100 100 re f Q".to_vec();
        let content_id = doc.add_object(LoStream::new(LoDictionary::new(), content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        });
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");

        let mut source = PdfPageSource::open(&bytes).expect("open");
        let img = render(&mut source, 0, 1.0);
        // Bottom-left 20x20 in PDF space is the bottom-left of the bitmap.
        assert_eq!(img.get_pixel(5, 95).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(50, 50).0, [255, 255, 255, 255]);
    }

    #[test]
    fn image_xobject_is_drawn_into_its_placement() {
        let mut rgb = Vec::new();
        for _ in 0..4 {
            rgb.extend_from_slice(&[255, 0, 0]);
        }
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb,
        ));
        let content = b"q 40 0 0 40 10 10 cm /Im1 Do Q".to_vec();
        let content_id = doc.add_object(LoStream::new(LoDictionary::new(), content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        });
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");

        let mut source = PdfPageSource::open(&bytes).expect("open");
        let img = render(&mut source, 0, 1.0);
        // Placement covers x 10..50, PDF y 10..50 => bitmap y 50..90.
        assert_eq!(img.get_pixel(30, 70).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(80, 20).0, [255, 255, 255, 255]);
    }

    #[test]
    fn jpeg_image_xobject_decodes_through_dct() {
        let rgba = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgba8(rgba)
            .to_rgb8()
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .expect("jpeg");
        let doc = LoDocument::with_version("1.7");
        let stream = LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 4,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        );
        let pixmap = decode_image_xobject(&doc, &stream).expect("decoded");
        assert_eq!((pixmap.width(), pixmap.height()), (4, 4));
        assert!(pixmap.data()[0] < 16);
    }

    #[test]
    fn one_bit_gray_samples_expand_to_black_and_white() {
        let doc = LoDocument::with_version("1.7");
        let dict = dictionary! {
            "Width" => 8,
            "Height" => 1,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 1,
        };
        let pixmap = samples_to_pixmap(&doc, &dict, &[0b1010_0000]).expect("pixmap");
        let data = pixmap.data();
        assert_eq!(&data[0..4], &[255, 255, 255, 255]);
        assert_eq!(&data[4..8], &[0, 0, 0, 255]);
        assert_eq!(&data[8..12], &[255, 255, 255, 255]);
        assert_eq!(&data[12..16], &[0, 0, 0, 255]);
    }

    #[test]
    fn cid_widths_accept_both_array_forms() {
        let doc = LoDocument::with_version("1.7");
        let w: LoObject = vec![
            1.into(),
            LoObject::Array(vec![500.into(), 600.into()]),
            10.into(),
            12.into(),
            250.into(),
        ]
        .into();
        let widths = parse_cid_widths(&doc, &w);
        assert_eq!(widths.get(&1), Some(&500.0));
        assert_eq!(widths.get(&2), Some(&600.0));
        assert_eq!(widths.get(&11), Some(&250.0));
        assert_eq!(widths.get(&13), None);
    }

    #[test]
    fn cid_widths_ignore_codes_past_the_cid_range() {
        let doc = LoDocument::with_version("1.7");
        let w: LoObject = vec![
            LoObject::Real(5.0e9),
            LoObject::Array(vec![500.into(), 600.into()]),
            65535.into(),
            LoObject::Array(vec![700.into(), 800.into()]),
        ]
        .into();
        let widths = parse_cid_widths(&doc, &w);
        assert_eq!(widths.len(), 1);
        assert_eq!(widths.get(&65535), Some(&700.0));
    }

    #[test]
    fn dash_pattern_with_odd_length_is_doubled() {
        let state = GraphicsState {
            dash: Some((vec![3.0], 0.0)),
            ..GraphicsState::default()
        };
        assert!(build_stroke(&state).dash.is_some());
    }
}
