use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::exporter::{ExportOrder, SettlePolicy};

/// Engine settings as stored on disk. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub render_scale: f32,
    pub settle_timeout_ms: u64,
    /// Sleep `settle_timeout_ms` after each page instead of awaiting an acknowledgement.
    pub fixed_settle: bool,
    pub export_order: ExportOrder,
    pub perf_log: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_scale: 1.0,
            settle_timeout_ms: 1500,
            fixed_settle: false,
            export_order: ExportOrder::Ascending,
            perf_log: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, TemplateError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        let duration = Duration::from_millis(self.settle_timeout_ms);
        if self.fixed_settle {
            SettlePolicy::FixedDelay(duration)
        } else {
            SettlePolicy::Acknowledged { timeout: duration }
        }
    }
}
