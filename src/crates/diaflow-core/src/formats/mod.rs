//! Storage-facing diagram formats
//!
//! Three bit-level-stable representations of a
//! [`DomainDiagram`](crate::domain::DomainDiagram):
//!
//! | format | file | shape |
//! |--------|------|-------|
//! | [`native`] | `.json` | id-keyed maps of nodes/arrows/handles/persons |
//! | [`light`] | `.yaml` | node list with label-based `connections` |
//! | [`readable`] | `.yaml` | human-first `workflow` + `flow` + `persons` |
//!
//! All three round-trip through the compiler/decompiler; the only loss
//! is synthesized ids (handles, connection ids) and UI metadata.

pub mod light;
pub mod native;
pub mod readable;

use crate::domain::DomainDiagram;
use crate::error::{DiagramError, Result};
use serde::{Deserialize, Serialize};

/// A serialization format for diagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramFormat {
    /// Id-keyed JSON
    Native,
    /// Label-referenced YAML
    Light,
    /// Human-first workflow YAML
    Readable,
}

impl DiagramFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Light => "light",
            Self::Readable => "readable",
        }
    }

    /// Preferred file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Native => "json",
            Self::Light | Self::Readable => "yaml",
        }
    }
}

impl std::fmt::Display for DiagramFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialize a diagram in the given format.
pub fn serialize(diagram: &DomainDiagram, format: DiagramFormat) -> Result<String> {
    match format {
        DiagramFormat::Native => native::serialize(diagram),
        DiagramFormat::Light => light::serialize(diagram),
        DiagramFormat::Readable => readable::serialize(diagram),
    }
}

/// Deserialize a diagram from the given format.
pub fn deserialize(content: &str, format: DiagramFormat) -> Result<DomainDiagram> {
    match format {
        DiagramFormat::Native => native::deserialize(content),
        DiagramFormat::Light => light::deserialize(content),
        DiagramFormat::Readable => readable::deserialize(content),
    }
}

/// Guess the format from a file name and its content.
///
/// `.json` is always Native. YAML files carrying a top-level `workflow`
/// key are Readable, everything else is Light.
pub fn detect_format(file_name: &str, content: &str) -> Result<DiagramFormat> {
    let extension = file_name.rsplit('.').next().unwrap_or_default();
    match extension {
        "json" => Ok(DiagramFormat::Native),
        "yaml" | "yml" => {
            let is_readable = content
                .lines()
                .any(|line| line.trim_end() == "workflow:" || line.starts_with("workflow:"));
            Ok(if is_readable {
                DiagramFormat::Readable
            } else {
                DiagramFormat::Light
            })
        }
        other => Err(DiagramError::Validation(format!(
            "unknown diagram file extension '.{other}'"
        ))),
    }
}
