//! Diagram inventory for the report.
//!
//! Only scheduled when the `vision` capability is enabled. Records the
//! images a report embeds and whether each one resolves to a file next to
//! the report; image content itself is not interpreted.

use std::path::Path;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use tribunal_core::{AuditInputs, Evidence, TargetArtifact};

use super::sandbox::validate_file_path;
use super::{FactError, FactFinder};
use crate::evidence::producers::VISION_INSPECTOR;

pub const VISION_CAPABILITY: &str = "vision";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];

lazy_static! {
    /// `![alt](path "title")`
    static ref MARKDOWN_IMAGE: Regex = Regex::new(r#"!\[([^\]]*)\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).unwrap();
}

#[derive(Debug, Default)]
pub struct VisionInspector;

impl VisionInspector {
    pub fn new() -> Self {
        Self
    }

    fn inspect(&self, text: &str, report_dir: &Path) -> Vec<Evidence> {
        let mut evidences = Vec::new();

        for caps in MARKDOWN_IMAGE.captures_iter(text) {
            let alt = caps[1].trim();
            let target = &caps[2];
            let label = if alt.is_empty() { "untitled diagram" } else { alt };

            if target.starts_with("http://") || target.starts_with("https://") {
                evidences.push(Evidence::missing(
                    VISION_INSPECTOR,
                    target,
                    format!("Remote diagram '{}' not fetched", label),
                    0.4,
                ));
                continue;
            }

            let resolved = validate_file_path(Path::new(target), report_dir).ok();
            let exists = resolved.as_deref().map_or(false, Path::is_file);
            evidences.push(if exists {
                Evidence::found(VISION_INSPECTOR, target, format!("Diagram '{}' embedded in report", label), 0.7)
            } else {
                Evidence::missing(VISION_INSPECTOR, target, format!("Diagram '{}' referenced but missing", label), 0.6)
            });
        }

        if evidences.is_empty() {
            evidences.push(Evidence::missing(
                VISION_INSPECTOR,
                "report:diagrams",
                "Report embeds no diagrams",
                0.6,
            ));
        }
        evidences
    }
}

#[async_trait]
impl FactFinder for VisionInspector {
    fn name(&self) -> &str {
        VISION_INSPECTOR
    }

    fn target_artifact(&self) -> TargetArtifact {
        TargetArtifact::Document
    }

    fn required_capability(&self) -> Option<&str> {
        Some(VISION_CAPABILITY)
    }

    async fn investigate(&self, inputs: &AuditInputs) -> Result<Vec<Evidence>, FactError> {
        let path = inputs.report_path.as_path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));

        if !tokio::fs::try_exists(path).await.unwrap_or(false) || is_image {
            return Ok(vec![Evidence::missing(
                VISION_INSPECTOR,
                "report:diagrams",
                "No readable report to inspect for diagrams",
                0.5,
            )]);
        }

        let text = String::from_utf8_lossy(&tokio::fs::read(path).await?).into_owned();
        let report_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let evidences = self.inspect(&text, report_dir);
        debug!(diagrams = evidences.iter().filter(|e| e.found).count(), "Diagrams inspected");
        Ok(evidences)
    }
}
