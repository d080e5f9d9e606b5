//! Handle algebra: parse/build connection-point identifiers
//!
//! A handle is a named connection point on a node. Its canonical string
//! form is `<node_id>:<label>`; direction (input vs output) is inferred
//! from which side of an arrow the handle appears on. This module is the
//! single source of truth for edge endpoints:
//!
//! - [`parse_handle_id`] - split and validate a handle id
//! - [`build_handle_id`] - canonical concatenation; round-trips with parse
//! - [`default_handles`] - deterministic handle synthesis when a diagram
//!   omits explicit handles
//!
//! # Round-trip law
//!
//! For all valid `(node_id, label)`:
//! `parse_handle_id(&build_handle_id(n, l)) == Ok((n, l))`.
//! A property test at the bottom of this module pins that law down.
//!
//! # Examples
//!
//! ```rust
//! use diaflow_core::handles::{build_handle_id, parse_handle_id, HandleLabel};
//!
//! let id = build_handle_id("ask_llm", &HandleLabel::First);
//! assert_eq!(id, "ask_llm:first");
//!
//! let parsed = parse_handle_id(&id).unwrap();
//! assert_eq!(parsed.node_id, "ask_llm");
//! assert_eq!(parsed.label, HandleLabel::First);
//! ```

use crate::domain::NodeType;
use crate::error::{DiagramError, Result};
use serde::{Deserialize, Serialize};

/// Separator between node id and label in a handle id.
pub const HANDLE_DELIMITER: char = ':';

/// Direction of a handle relative to its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleDirection {
    /// Data flows into the node through this handle
    Input,
    /// Data flows out of the node through this handle
    Output,
}

/// Label identifying a handle on a node.
///
/// Labels are drawn from a closed set plus per-node-type custom labels.
/// The closed labels serialize to their snake_case names; anything else
/// round-trips through [`HandleLabel::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandleLabel {
    /// The default connection point
    Default,
    /// Generic input
    Input,
    /// Generic output
    Output,
    /// Condition true branch (condition nodes only)
    Condtrue,
    /// Condition false branch (condition nodes only)
    Condfalse,
    /// First-iteration input (person_job nodes only)
    First,
    /// A per-node-type custom label
    Custom(String),
}

impl HandleLabel {
    /// Canonical string form of the label.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Input => "input",
            Self::Output => "output",
            Self::Condtrue => "condtrue",
            Self::Condfalse => "condfalse",
            Self::First => "first",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Parse a label string. Unknown names become [`HandleLabel::Custom`];
    /// empty names are rejected by [`parse_handle_id`].
    pub fn from_str(s: &str) -> Self {
        match s {
            "default" => Self::Default,
            "input" => Self::Input,
            "output" => Self::Output,
            "condtrue" => Self::Condtrue,
            "condfalse" => Self::Condfalse,
            "first" => Self::First,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Whether this label belongs to the closed built-in set.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl std::fmt::Display for HandleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HandleLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HandleLabel {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(HandleLabel::from_str(&s))
    }
}

/// Result of parsing a handle id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHandle {
    /// Node the handle belongs to
    pub node_id: String,
    /// Handle label
    pub label: HandleLabel,
}

/// A synthesized or declared handle: label plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSpec {
    /// Handle label
    pub label: HandleLabel,
    /// Handle direction
    pub direction: HandleDirection,
}

impl HandleSpec {
    /// Shorthand constructor.
    pub fn new(label: HandleLabel, direction: HandleDirection) -> Self {
        Self { label, direction }
    }
}

/// Split a handle id into `(node_id, label)`.
///
/// The label is the segment after the *last* delimiter, so node ids may
/// themselves contain the delimiter. Both segments must be non-empty.
///
/// # Errors
///
/// Returns [`DiagramError::Handle`] carrying the offending id when the
/// delimiter is missing or either segment is empty.
pub fn parse_handle_id(handle_id: &str) -> Result<ParsedHandle> {
    let (node_id, label) = handle_id
        .rsplit_once(HANDLE_DELIMITER)
        .ok_or_else(|| DiagramError::handle(handle_id, "missing ':' delimiter"))?;

    if node_id.is_empty() {
        return Err(DiagramError::handle(handle_id, "empty node id"));
    }
    if label.is_empty() {
        return Err(DiagramError::handle(handle_id, "empty label"));
    }

    Ok(ParsedHandle {
        node_id: node_id.to_string(),
        label: HandleLabel::from_str(label),
    })
}

/// Build the canonical handle id for `(node_id, label)`.
///
/// Guaranteed to round-trip through [`parse_handle_id`] for any non-empty
/// node id and label.
pub fn build_handle_id(node_id: &str, label: &HandleLabel) -> String {
    format!("{node_id}{HANDLE_DELIMITER}{label}")
}

/// Deterministic default handles for a node type.
///
/// Used by the compiler when a diagram declares no explicit handles:
///
/// - every node gets `input` + `output`, except
/// - `start` is output-only and `endpoint` is input-only
/// - `condition` additionally gets `condtrue`/`condfalse` outputs
/// - `person_job` (and its batch variant) additionally gets a `first`
///   input, consumed on iteration 0 only
pub fn default_handles(node_type: NodeType) -> Vec<HandleSpec> {
    use HandleDirection::{Input, Output};

    let mut handles = Vec::new();
    match node_type {
        NodeType::Start => {
            handles.push(HandleSpec::new(HandleLabel::Output, Output));
            handles.push(HandleSpec::new(HandleLabel::Default, Output));
        }
        NodeType::Endpoint => {
            handles.push(HandleSpec::new(HandleLabel::Input, Input));
            handles.push(HandleSpec::new(HandleLabel::Default, Input));
        }
        NodeType::Condition => {
            handles.push(HandleSpec::new(HandleLabel::Input, Input));
            handles.push(HandleSpec::new(HandleLabel::Default, Input));
            handles.push(HandleSpec::new(HandleLabel::Output, Output));
            handles.push(HandleSpec::new(HandleLabel::Condtrue, Output));
            handles.push(HandleSpec::new(HandleLabel::Condfalse, Output));
        }
        NodeType::PersonJob | NodeType::PersonBatchJob => {
            handles.push(HandleSpec::new(HandleLabel::Input, Input));
            handles.push(HandleSpec::new(HandleLabel::Default, Input));
            handles.push(HandleSpec::new(HandleLabel::First, Input));
            handles.push(HandleSpec::new(HandleLabel::Output, Output));
            handles.push(HandleSpec::new(HandleLabel::Default, Output));
        }
        _ => {
            handles.push(HandleSpec::new(HandleLabel::Input, Input));
            handles.push(HandleSpec::new(HandleLabel::Default, Input));
            handles.push(HandleSpec::new(HandleLabel::Output, Output));
            handles.push(HandleSpec::new(HandleLabel::Default, Output));
        }
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_basic() {
        let parsed = parse_handle_id("node_1:output").unwrap();
        assert_eq!(parsed.node_id, "node_1");
        assert_eq!(parsed.label, HandleLabel::Output);
    }

    #[test]
    fn test_parse_custom_label() {
        let parsed = parse_handle_id("api:response_body").unwrap();
        assert_eq!(parsed.label, HandleLabel::Custom("response_body".into()));
        assert!(!parsed.label.is_builtin());
    }

    #[test]
    fn test_parse_node_id_with_delimiter() {
        // Label is taken after the last delimiter.
        let parsed = parse_handle_id("ns:node:condtrue").unwrap();
        assert_eq!(parsed.node_id, "ns:node");
        assert_eq!(parsed.label, HandleLabel::Condtrue);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_handle_id("no_delimiter").is_err());
        assert!(parse_handle_id(":label").is_err());
        assert!(parse_handle_id("node:").is_err());

        let err = parse_handle_id("bare").unwrap_err();
        match err {
            crate::error::DiagramError::Handle { handle, .. } => assert_eq!(handle, "bare"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_handles_start_output_only() {
        let handles = default_handles(NodeType::Start);
        assert!(handles.iter().all(|h| h.direction == HandleDirection::Output));
    }

    #[test]
    fn test_default_handles_endpoint_input_only() {
        let handles = default_handles(NodeType::Endpoint);
        assert!(handles.iter().all(|h| h.direction == HandleDirection::Input));
    }

    #[test]
    fn test_default_handles_condition_branches() {
        let handles = default_handles(NodeType::Condition);
        let outputs: Vec<_> = handles
            .iter()
            .filter(|h| h.direction == HandleDirection::Output)
            .map(|h| h.label.clone())
            .collect();
        assert!(outputs.contains(&HandleLabel::Condtrue));
        assert!(outputs.contains(&HandleLabel::Condfalse));
    }

    #[test]
    fn test_default_handles_person_job_first() {
        let handles = default_handles(NodeType::PersonJob);
        assert!(handles
            .iter()
            .any(|h| h.label == HandleLabel::First && h.direction == HandleDirection::Input));
    }

    proptest! {
        #[test]
        fn prop_round_trip(node_id in "[a-zA-Z0-9_.-]{1,32}", label in "[a-z_]{1,16}") {
            let label = HandleLabel::from_str(&label);
            let id = build_handle_id(&node_id, &label);
            let parsed = parse_handle_id(&id).unwrap();
            prop_assert_eq!(parsed.node_id, node_id);
            prop_assert_eq!(parsed.label, label);
        }
    }
}
