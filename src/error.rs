use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::keys::Parameter;

// ---------------------------------------------------------------------------
// ParseError – fatal for one file, never for the batch
// ---------------------------------------------------------------------------

/// A file whose header or data section is structurally unreadable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("file is empty")]
    Empty,

    #[error("not a text file (control byte 0x{byte:02x} at offset {offset})")]
    NotText { byte: u8, offset: usize },

    #[error("no MCC header found (no KEY=VALUE line before the data section)")]
    MissingHeader,

    #[error("line {line}: {marker} without a matching opening marker")]
    UnexpectedMarker { line: usize, marker: &'static str },

    #[error("line {line}: {marker} is never closed")]
    Unterminated { line: usize, marker: &'static str },

    #[error("profile measurement without any depth-tagged sample")]
    NoProfileDepths,
}

// ---------------------------------------------------------------------------
// Warnings – collected, never fatal
// ---------------------------------------------------------------------------

/// A single field (or data row) that could not be normalised or derived.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{field}: {reason}")]
pub struct FieldWarning {
    pub field: String,
    pub reason: String,
}

impl FieldWarning {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A grouping key that could not be computed for one sub-series.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{file}: no {parameter} value{}, series placed in the unavailable group", depth_suffix(.depth_cm))]
pub struct UnresolvedKeyWarning {
    pub file: String,
    pub parameter: Parameter,
    pub depth_cm: Option<f64>,
}

fn depth_suffix(depth_cm: &Option<f64>) -> String {
    match depth_cm {
        Some(d) => format!(" at {d} cm"),
        None => String::new(),
    }
}

/// Everything the core reports alongside successful results.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("{file}: {warning}")]
    Field { file: String, warning: FieldWarning },

    #[error("{0}")]
    UnresolvedKey(UnresolvedKeyWarning),

    /// A structural problem that did not prevent the file from loading.
    #[error("{file}: {error}")]
    Structure {
        file: String,
        #[serde(serialize_with = "serialize_display")]
        error: ParseError,
    },
}

fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: serde::Serializer,
{
    serializer.collect_str(value)
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration has an empty {0} palette")]
    EmptyPalette(&'static str),

    #[error("'{0}' is not a hex colour")]
    BadColor(String),

    #[error("reference distance must be a positive number of cm, got {0}")]
    BadReferenceDistance(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_key_message_mentions_depth() {
        let w = UnresolvedKeyWarning {
            file: "open_6x.mcc".into(),
            parameter: Parameter::Fov,
            depth_cm: Some(5.0),
        };
        let text = w.to_string();
        assert!(text.contains("open_6x.mcc"));
        assert!(text.contains("at 5 cm"));
    }

    #[test]
    fn field_warning_display() {
        let w = FieldWarning::new("GANTRY", "'abc' is not a number");
        assert_eq!(w.to_string(), "GANTRY: 'abc' is not a number");
    }
}
