//! Label catalog: the externally defined fields a user can place on pages.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::types::normalize_hex;

const DEFAULT_FIELD_COLOR: &str = "#007BFF";

/// A placeable field. Names are unique within their category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub id: String,
    pub color: String,
    #[serde(default)]
    pub required: bool,
}

impl Field {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        color: &str,
        required: bool,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            name: name.into(),
            id: id.into(),
            color: normalize_hex(color)?,
            required,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelItem {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_items: Vec<LabelItem>,
}

impl LabelItem {
    // `position` is zero-based within the owning list; ids are one-based.
    pub fn to_field(&self, position: usize) -> Result<Field, TemplateError> {
        let color = if self.color.trim().is_empty() {
            DEFAULT_FIELD_COLOR
        } else {
            self.color.as_str()
        };
        Field::new(self.name.clone(), (position + 1).to_string(), color, self.required)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCategory {
    pub title: String,
    #[serde(default)]
    pub items: Vec<LabelItem>,
}

impl LabelCategory {
    pub fn fields(&self) -> Result<Vec<Field>, TemplateError> {
        self.items
            .iter()
            .enumerate()
            .map(|(idx, item)| item.to_field(idx))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelCatalog {
    categories: Vec<LabelCategory>,
}

impl LabelCatalog {
    pub fn new(categories: Vec<LabelCategory>) -> Self {
        Self { categories }
    }

    pub fn from_json(text: &str) -> Result<Self, TemplateError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn categories(&self) -> &[LabelCategory] {
        &self.categories
    }

    pub fn category(&self, title: &str) -> Option<&LabelCategory> {
        self.categories.iter().find(|c| c.title == title)
    }

    /// Resolves a field by category title and item name, searching sub-items depth first.
    pub fn field(&self, category: &str, name: &str) -> Result<Field, TemplateError> {
        let cat = self.category(category).ok_or_else(|| {
            TemplateError::InvalidConfiguration(format!("unknown label category {category:?}"))
        })?;
        find_in(&cat.items, name)?.ok_or_else(|| {
            TemplateError::InvalidConfiguration(format!(
                "category {category:?} has no field named {name:?}"
            ))
        })
    }
}

fn find_in(items: &[LabelItem], name: &str) -> Result<Option<Field>, TemplateError> {
    for (idx, item) in items.iter().enumerate() {
        if item.name == name {
            return item.to_field(idx).map(Some);
        }
        if let Some(found) = find_in(&item.sub_items, name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const CATALOG_JSON: &str = r##"[
        {
            "title": "Patient Information",
            "items": [
                { "name": "patient_name", "required": true, "color": "#FF000080" },
                { "name": "patient_dob", "required": false, "color": "#00aa00" },
                { "name": "address", "required": false, "color": "",
                  "subItems": [ { "name": "city", "required": false, "color": "#123456" } ] }
            ]
        },
        { "title": "Provider", "items": [ { "name": "provider_name", "color": "#0000ff" } ] }
    ]"##;

    #[test]
    fn fields_get_one_based_ids_and_truncated_colors() {
        let catalog = LabelCatalog::from_json(CATALOG_JSON).expect("catalog");
        assert_eq!(catalog.categories().len(), 2);
        let fields = catalog.categories()[0].fields().expect("fields");
        assert_eq!(fields[0].id, "1");
        assert_eq!(fields[0].color, "#ff0000");
        assert!(fields[0].required);
        assert_eq!(fields[1].id, "2");
        assert_eq!(fields[2].color, "#007bff");
    }

    #[test]
    fn field_lookup_searches_sub_items() {
        let catalog = LabelCatalog::from_json(CATALOG_JSON).expect("catalog");
        let city = catalog.field("Patient Information", "city").expect("city");
        assert_eq!(city.id, "1");
        assert_eq!(city.color, "#123456");
        assert!(catalog.field("Patient Information", "missing").is_err());
        assert!(catalog.field("Nope", "city").is_err());
    }

    #[test]
    fn malformed_color_is_rejected() {
        let item = LabelItem {
            name: "x".to_string(),
            required: false,
            color: "blue".to_string(),
            sub_items: Vec::new(),
        };
        assert!(matches!(
            item.to_field(0),
            Err(TemplateError::InvalidConfiguration(_))
        ));
    }
}
