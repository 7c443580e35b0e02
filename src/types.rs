use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

/// Largest page bitmap the engine will allocate, in pixels (1 GiB of RGBA).
pub const MAX_PAGE_PIXELS: u64 = 1 << 28;

// Page size in PDF points (1/72 in) before the render scale is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn letter() -> Self {
        // 8.5in x 11in at 72pt/in.
        Self {
            width: 612.0,
            height: 792.0,
        }
    }

    pub fn to_pixels(self, scale: f32) -> Result<PixelSize, TemplateError> {
        let width = (self.width * scale).round();
        let height = (self.height * scale).round();
        if !width.is_finite() || !height.is_finite() || width < 1.0 || height < 1.0 {
            return Err(TemplateError::InvalidConfiguration(format!(
                "invalid raster size {}x{} at scale {}",
                self.width, self.height, scale
            )));
        }
        if f64::from(width) * f64::from(height) > MAX_PAGE_PIXELS as f64 {
            return Err(TemplateError::InvalidConfiguration(format!(
                "raster size {width}x{height} exceeds the {MAX_PAGE_PIXELS}-pixel page limit"
            )));
        }
        Ok(PixelSize {
            width: width as u32,
            height: height as u32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    // Accepts `#rrggbb`; an alpha suffix (`#rrggbbaa`) is dropped.
    pub fn from_hex(raw: &str) -> Result<Self, TemplateError> {
        let hex = normalize_hex(raw)?;
        let channel = |idx: usize| -> Result<f32, TemplateError> {
            u8::from_str_radix(&hex[idx..idx + 2], 16)
                .map(|v| v as f32 / 255.0)
                .map_err(|_| invalid_color(raw))
        };
        Ok(Self {
            r: channel(1)?,
            g: channel(3)?,
            b: channel(5)?,
        })
    }

    pub fn to_rgba8(self, alpha: u8) -> [u8; 4] {
        [
            (self.r.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.g.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.b.clamp(0.0, 1.0) * 255.0).round() as u8,
            alpha,
        ]
    }
}

pub(crate) fn normalize_hex(raw: &str) -> Result<String, TemplateError> {
    let trimmed = raw.trim();
    let truncated: String = trimmed.chars().take(7).collect();
    let valid = truncated.len() == 7
        && truncated.starts_with('#')
        && truncated[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid || !(trimmed.len() == 7 || trimmed.len() == 9) {
        return Err(invalid_color(raw));
    }
    if trimmed.len() == 9 && !trimmed[7..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid_color(raw));
    }
    Ok(truncated.to_ascii_lowercase())
}

fn invalid_color(raw: &str) -> TemplateError {
    TemplateError::InvalidConfiguration(format!(
        "color {raw:?} is not a 6-hex-digit color"
    ))
}

// Region geometry in page pixel coordinates, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RegionRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    // Rectangles dragged right-to-left or bottom-to-top come in with negative extents.
    pub fn normalized(self) -> Self {
        let (x, width) = if self.width < 0.0 {
            (self.x + self.width, -self.width)
        } else {
            (self.x, self.width)
        };
        let (y, height) = if self.height < 0.0 {
            (self.y + self.height, -self.height)
        } else {
            (self.y, self.height)
        };
        Self {
            x,
            y,
            width,
            height,
        }
    }
}
