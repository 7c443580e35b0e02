//! Persisted rasterization results, keyed by source fingerprint and render scale.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::rasterizer::PageBitmap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCache {
    pub fingerprint: String,
    pub scale: f32,
    pub page_count: usize,
    pub pages: BTreeMap<usize, PageBitmap>,
}

impl PageCache {
    pub fn new(fingerprint: impl Into<String>, scale: f32, bitmaps: &[PageBitmap]) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            scale,
            page_count: bitmaps.len(),
            pages: bitmaps
                .iter()
                .map(|page| (page.page_index, page.clone()))
                .collect(),
        }
    }

    // A missing file is a cache miss, not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, TemplateError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TemplateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    /// The cached bitmaps in page order, if this cache was built from the same source at the
    /// same scale and holds every page.
    pub fn bitmaps_for(&self, fingerprint: &str, scale: f32) -> Option<Vec<PageBitmap>> {
        if self.fingerprint != fingerprint || self.scale != scale {
            return None;
        }
        if self.pages.len() != self.page_count
            || self.pages.keys().copied().ne(0..self.page_count)
        {
            return None;
        }
        Some(self.pages.values().cloned().collect())
    }
}
