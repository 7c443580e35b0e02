use std::fmt;

#[derive(Debug)]
pub enum TemplateError {
    DocumentOpen(String),
    PageRender { page_index: usize, message: String },
    Export(String),
    SurfaceStopped,
    InvalidConfiguration(String),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl TemplateError {
    pub fn page_render(page_index: usize, message: impl Into<String>) -> Self {
        TemplateError::PageRender {
            page_index,
            message: message.into(),
        }
    }

    pub(crate) fn into_page_render(self, page_index: usize) -> Self {
        match self {
            TemplateError::PageRender { .. } => self,
            other => TemplateError::page_render(page_index, other.to_string()),
        }
    }

    // Any failure inside the export loop surfaces as a single export error.
    pub(crate) fn into_export(self, page_index: usize) -> Self {
        match self {
            TemplateError::Export(_) => self,
            other => TemplateError::Export(format!("page {page_index}: {other}")),
        }
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::DocumentOpen(message) => {
                write!(f, "document cannot be opened: {}", message)
            }
            TemplateError::PageRender {
                page_index,
                message,
            } => write!(f, "page {} failed to render: {}", page_index, message),
            TemplateError::Export(message) => write!(f, "export failed: {}", message),
            TemplateError::SurfaceStopped => {
                write!(f, "drawing surface is stopped and accepts no further edits")
            }
            TemplateError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            TemplateError::Serialization(err) => write!(f, "serialization error: {}", err),
            TemplateError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::Serialization(err) => Some(err),
            TemplateError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TemplateError {
    fn from(value: std::io::Error) -> Self {
        TemplateError::Io(value)
    }
}

impl From<serde_json::Error> for TemplateError {
    fn from(value: serde_json::Error) -> Self {
        TemplateError::Serialization(value)
    }
}
