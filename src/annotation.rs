//! Per-page annotation state and the field-selection decision.

use std::collections::{BTreeMap, BTreeSet};

use crate::adapter::DrawingSurfaceAdapter;
use crate::catalog::Field;
use crate::error::TemplateError;

/// The field names placed on one page.
///
/// Insertion order is kept so an existing name maps back to its 1-based region position;
/// equality ignores order.
#[derive(Debug, Clone, Default)]
pub struct PageFields {
    names: Vec<String>,
}

impl PageFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    // 1-based.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name).map(|idx| idx + 1)
    }

    // Returns false if the name was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.names.push(name);
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<usize> {
        let idx = self.names.iter().position(|n| n == name)?;
        self.names.remove(idx);
        Some(idx + 1)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn to_set(&self) -> BTreeSet<String> {
        self.names.iter().cloned().collect()
    }
}

impl PartialEq for PageFields {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|n| other.contains(n))
    }
}

impl Eq for PageFields {}

impl<S: Into<String>> FromIterator<S> for PageFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut out = PageFields::new();
        for name in iter {
            out.insert(name);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionIntent {
    NewRegion(Field),
    EditRegion(Field, usize),
}

impl RegionIntent {
    pub fn field(&self) -> &Field {
        match self {
            RegionIntent::NewRegion(field) | RegionIntent::EditRegion(field, _) => field,
        }
    }
}

pub fn decide_intent(fields: &PageFields, field: &Field) -> RegionIntent {
    match fields.position(&field.name) {
        Some(position) => RegionIntent::EditRegion(field.clone(), position),
        None => RegionIntent::NewRegion(field.clone()),
    }
}

/// Which fields sit on which page, plus the current selection.
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    page_count: usize,
    pages: Vec<PageFields>,
    current_page: usize,
    current_field: Option<Field>,
}

impl AnnotationStore {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            pages: Vec::new(),
            current_page: 0,
            current_field: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn current_page_index(&self) -> usize {
        self.current_page
    }

    pub fn set_current_page_index(&mut self, page_index: usize) {
        self.assert_page(page_index);
        self.current_page = page_index;
    }

    pub fn current_field(&self) -> Option<&Field> {
        self.current_field.as_ref()
    }

    pub fn clear_selection(&mut self) {
        self.current_field = None;
    }

    /// Selects `field` on the current page and records it there.
    ///
    /// A name not yet on the page becomes a new region; a name already present means the
    /// existing region at its original position is edited.
    pub fn select_field(&mut self, field: &Field) -> RegionIntent {
        let intent = self.intent_for(field);
        self.commit(&intent);
        intent
    }

    /// What selecting `field` on the current page would do, without recording anything.
    pub fn intent_for(&self, field: &Field) -> RegionIntent {
        self.assert_page(self.current_page);
        match self.pages.get(self.current_page) {
            Some(fields) => decide_intent(fields, field),
            None => RegionIntent::NewRegion(field.clone()),
        }
    }

    /// Records `intent` on the current page and makes its field the selection.
    pub fn commit(&mut self, intent: &RegionIntent) {
        let page = self.current_page;
        self.assert_page(page);
        if let RegionIntent::NewRegion(field) = intent {
            self.page_entry(page).insert(field.name.clone());
        }
        self.current_field = Some(intent.field().clone());
        log::debug!("page {}: {:?}", page, intent);
    }

    pub fn fields_for_page(&self, page_index: usize) -> BTreeSet<String> {
        self.pages
            .get(page_index)
            .map(PageFields::to_set)
            .unwrap_or_default()
    }

    pub fn page_fields(&self, page_index: usize) -> Option<&PageFields> {
        self.pages.get(page_index)
    }

    pub fn set_fields_for_page(&mut self, page_index: usize, fields: PageFields) {
        self.assert_page(page_index);
        *self.page_entry(page_index) = fields;
    }

    // Returns the 1-based position the name occupied.
    pub fn remove_field(&mut self, page_index: usize, name: &str) -> Option<usize> {
        self.assert_page(page_index);
        self.pages.get_mut(page_index)?.remove(name)
    }

    /// Page index to ordered field names for every tracked page.
    pub fn snapshot(&self) -> BTreeMap<usize, Vec<String>> {
        self.pages
            .iter()
            .enumerate()
            .map(|(idx, fields)| (idx, fields.names().to_vec()))
            .collect()
    }

    // Pages past the highest tracked index are appended, never overwriting earlier ones.
    fn page_entry(&mut self, page_index: usize) -> &mut PageFields {
        if self.pages.len() <= page_index {
            self.pages.resize_with(page_index + 1, PageFields::new);
        }
        &mut self.pages[page_index]
    }

    fn assert_page(&self, page_index: usize) {
        assert!(
            page_index < self.page_count,
            "page index {page_index} out of range for {} pages",
            self.page_count
        );
    }
}

/// Routes field selections from the catalog to the store and the drawing surface.
pub struct AnnotationSession<A: DrawingSurfaceAdapter> {
    store: AnnotationStore,
    adapter: A,
}

impl<A: DrawingSurfaceAdapter> AnnotationSession<A> {
    pub fn new(store: AnnotationStore, adapter: A) -> Self {
        Self { store, adapter }
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut AnnotationStore, &mut A) {
        (&mut self.store, &mut self.adapter)
    }

    pub fn into_parts(self) -> (AnnotationStore, A) {
        (self.store, self.adapter)
    }

    /// Selects `field` on the current page. The store only records the selection once the
    /// surface has accepted the draw or edit.
    pub fn select_field(&mut self, field: &Field) -> Result<RegionIntent, TemplateError> {
        let intent = self.store.intent_for(field);
        self.adapter.set_active_field(field);
        match &intent {
            RegionIntent::NewRegion(_) => self.adapter.draw_rectangle()?,
            RegionIntent::EditRegion(_, position) => self.adapter.edit(*position)?,
        }
        self.store.commit(&intent);
        Ok(intent)
    }

    /// Takes `name` off the current page, along with its region on the surface.
    ///
    /// Returns the 1-based position it held, or `None` when the page does not carry it.
    pub fn remove_field(&mut self, name: &str) -> Result<Option<usize>, TemplateError> {
        let page = self.store.current_page_index();
        let Some(position) = self.store.page_fields(page).and_then(|f| f.position(name)) else {
            return Ok(None);
        };
        self.adapter.delete_region(position)?;
        self.store.remove_field(page, name);
        if self.store.current_field().is_some_and(|f| f.name == name) {
            self.store.clear_selection();
        }
        Ok(Some(position))
    }

    pub fn go_to_page(&mut self, page_index: usize) {
        self.store.set_current_page_index(page_index);
        self.adapter.page_changed(page_index);
    }

    pub fn stop(&mut self) -> Result<(), TemplateError> {
        self.adapter.stop()
    }
}
