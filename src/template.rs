//! The exported template record and a JSON file library of saved templates.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePage {
    /// Composited page image as a PNG data URI.
    pub image: String,
    #[serde(rename = "fieldNames")]
    pub field_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub pages: Vec<TemplatePage>,
}

impl Template {
    pub fn field_set(&self, page_index: usize) -> BTreeSet<String> {
        self.pages
            .get(page_index)
            .map(|p| p.field_names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Saved templates, persisted as one JSON array.
#[derive(Debug)]
pub struct TemplateLibrary {
    path: PathBuf,
    templates: Vec<Template>,
}

impl TemplateLibrary {
    // A missing file is an empty library.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref().to_path_buf();
        let templates = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, templates })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Adds `template`, replacing (in place) any template with the same name.
    pub fn insert(&mut self, template: Template) -> Option<Template> {
        match self.templates.iter_mut().find(|t| t.name == template.name) {
            Some(slot) => Some(std::mem::replace(slot, template)),
            None => {
                self.templates.push(template);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Template> {
        let idx = self.templates.iter().position(|t| t.name == name)?;
        Some(self.templates.remove(idx))
    }

    pub fn save(&self) -> Result<(), TemplateError> {
        let json = serde_json::to_string_pretty(&self.templates)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        log::info!(
            "saved {} templates to {}",
            self.templates.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str, fields: &[&str]) -> Template {
        Template {
            name: name.to_string(),
            description: format!("{name} form"),
            pages: vec![TemplatePage {
                image: "data:image/png;base64,AAAA".to_string(),
                field_names: fields.iter().map(|f| f.to_string()).collect(),
            }],
        }
    }

    #[test]
    fn serializes_field_names_in_camel_case() {
        let json = serde_json::to_value(template("intake", &["patient_name"])).expect("json");
        assert_eq!(json["pages"][0]["fieldNames"][0], "patient_name");
        assert!(json["pages"][0].get("field_names").is_none());
    }

    #[test]
    fn library_round_trips_and_replaces_by_name() {
        let path = std::env::temp_dir().join(format!(
            "fieldplate_library_{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut library = TemplateLibrary::load(&path).expect("missing file is empty");
        assert!(library.templates().is_empty());
        assert!(library.insert(template("intake", &["a"])).is_none());
        assert!(library.insert(template("discharge", &["b"])).is_none());
        let replaced = library.insert(template("intake", &["c"])).expect("replaced");
        assert_eq!(replaced.pages[0].field_names, vec!["a".to_string()]);
        library.save().expect("save");

        let reloaded = TemplateLibrary::load(&path).expect("load");
        assert_eq!(reloaded.templates().len(), 2);
        assert_eq!(reloaded.templates()[0].name, "intake");
        assert_eq!(
            reloaded.get("intake").expect("intake").field_set(0),
            BTreeSet::from(["c".to_string()])
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_library_is_a_serialization_error() {
        let path = std::env::temp_dir().join(format!(
            "fieldplate_library_bad_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{not json").expect("write");
        let err = TemplateLibrary::load(&path).expect_err("corrupt");
        assert!(matches!(err, TemplateError::Serialization(_)));
        let _ = std::fs::remove_file(&path);
    }
}
