use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::derive::DerivedParams;
use crate::data::model::{FieldValue, FileRecord, Orientation};
use crate::data::segment::SubSeries;
use crate::error::{UnresolvedKeyWarning, Warning};

// ---------------------------------------------------------------------------
// Parameter – the closed set of grouping parameters
// ---------------------------------------------------------------------------

/// A derivable field a user can group curves by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Detector,
    Energy,
    Ssd,
    FieldSize,
    /// Half-maximum width of each profile slice, not a per-file value.
    Fov,
    /// Depth of each profile slice.
    Depth,
    Orientation,
    Gantry,
    DoseRate,
    ScanMode,
    Step,
    Integration,
    FileLabel,
}

impl Parameter {
    pub const ALL: [Parameter; 13] = [
        Parameter::Detector,
        Parameter::Energy,
        Parameter::Ssd,
        Parameter::FieldSize,
        Parameter::Fov,
        Parameter::Depth,
        Parameter::Orientation,
        Parameter::Gantry,
        Parameter::DoseRate,
        Parameter::ScanMode,
        Parameter::Step,
        Parameter::Integration,
        Parameter::FileLabel,
    ];

    /// Identifier used on the command line and in JSON.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Detector => "detector",
            Parameter::Energy => "energy",
            Parameter::Ssd => "ssd",
            Parameter::FieldSize => "field_size",
            Parameter::Fov => "fov",
            Parameter::Depth => "depth",
            Parameter::Orientation => "orientation",
            Parameter::Gantry => "gantry",
            Parameter::DoseRate => "dose_rate",
            Parameter::ScanMode => "scan_mode",
            Parameter::Step => "step",
            Parameter::Integration => "integration",
            Parameter::FileLabel => "file_label",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Parameter::Detector => "Detector",
            Parameter::Energy => "Energy",
            Parameter::Ssd => "SSD",
            Parameter::FieldSize => "Field size",
            Parameter::Fov => "FOV",
            Parameter::Depth => "Depth",
            Parameter::Orientation => "Orientation",
            Parameter::Gantry => "Gantry",
            Parameter::DoseRate => "Dose rate",
            Parameter::ScanMode => "Scan mode",
            Parameter::Step => "Step",
            Parameter::Integration => "Integration",
            Parameter::FileLabel => "File",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown parameter '{0}'")]
pub struct UnknownParameter(pub String);

impl FromStr for Parameter {
    type Err = UnknownParameter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(&['-', ' '][..], "_");
        let parameter = match key.as_str() {
            "detector" => Parameter::Detector,
            "energy" => Parameter::Energy,
            "ssd" | "dsp" => Parameter::Ssd,
            "field_size" | "field" | "jaw" | "jaws" => Parameter::FieldSize,
            "fov" => Parameter::Fov,
            "depth" => Parameter::Depth,
            "orientation" => Parameter::Orientation,
            "gantry" => Parameter::Gantry,
            "dose_rate" | "doserate" => Parameter::DoseRate,
            "scan_mode" | "mode" => Parameter::ScanMode,
            "step" => Parameter::Step,
            "integration" => Parameter::Integration,
            "file_label" | "file" | "label" => Parameter::FileLabel,
            _ => return Err(UnknownParameter(s.to_string())),
        };
        Ok(parameter)
    }
}

// ---------------------------------------------------------------------------
// Key values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyValue {
    Text { text: String },
    Number {
        value: f64,
        /// Display precision; also the precision at which keys compare.
        decimals: usize,
        unit: &'static str,
    },
    Unavailable,
}

impl KeyValue {
    fn text(text: impl Into<String>) -> Self {
        KeyValue::Text { text: text.into() }
    }

    fn number(value: f64, decimals: usize, unit: &'static str) -> Self {
        KeyValue::Number {
            value,
            decimals,
            unit,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, KeyValue::Unavailable)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Text { text } => f.write_str(text),
            KeyValue::Number {
                value,
                decimals,
                unit,
            } => {
                write!(f, "{}", fixed(*value, *decimals))?;
                if !unit.is_empty() {
                    write!(f, " {unit}")?;
                }
                Ok(())
            }
            KeyValue::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Identity of a key: two values with the same slot share a colour/marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySlot {
    Value(String),
    Unavailable,
}

fn fixed(value: f64, decimals: usize) -> String {
    let text = format!("{value:.decimals$}");
    // "-0.00" and "0.00" are the same key.
    match text.strip_prefix('-') {
        Some(rest) if rest.chars().all(|c| c == '0' || c == '.') => rest.to_string(),
        _ => text,
    }
}

/// A grouping key with its legend label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupKey {
    pub parameter: Parameter,
    pub value: KeyValue,
    pub label: String,
}

impl GroupKey {
    pub fn new(parameter: Parameter, value: KeyValue) -> Self {
        let label = match &value {
            KeyValue::Unavailable => format!("{parameter} unavailable"),
            other => other.to_string(),
        };
        Self {
            parameter,
            value,
            label,
        }
    }

    pub fn slot(&self) -> KeySlot {
        match &self.value {
            KeyValue::Text { text } => KeySlot::Value(text.trim().to_lowercase()),
            KeyValue::Number {
                value, decimals, ..
            } => KeySlot::Value(fixed(*value, *decimals)),
            KeyValue::Unavailable => KeySlot::Unavailable,
        }
    }
}

/// Value of `parameter` for one sub-series.
pub fn key_value(parameter: Parameter, file_label: &str, record: &FileRecord, series: &SubSeries) -> KeyValue {
    let derived: &DerivedParams = &record.derived;
    match parameter {
        Parameter::Detector => text_of(&derived.detector),
        Parameter::Energy => text_of(&derived.energy),
        Parameter::Ssd => number_of(&derived.ssd_cm, 2, "cm"),
        Parameter::FieldSize => text_of(&derived.jaw_at_100),
        // Per-slice values: never the file-level geometry.
        Parameter::Fov => series
            .fov_cm
            .map_or(KeyValue::Unavailable, |fov| KeyValue::number(fov, 2, "cm")),
        Parameter::Depth => series
            .depth_cm
            .map_or(KeyValue::Unavailable, |depth| KeyValue::number(depth, 2, "cm")),
        Parameter::Orientation => match derived.orientation {
            Orientation::Unknown => KeyValue::Unavailable,
            known => KeyValue::text(known.to_string()),
        },
        Parameter::Gantry => number_of(&derived.gantry_deg, 1, "deg"),
        Parameter::DoseRate => text_of(&derived.dose_rate),
        Parameter::ScanMode => KeyValue::text(series.mode.to_string()),
        Parameter::Step => text_of(&derived.step),
        Parameter::Integration => number_of(&derived.integration_s, 2, "s"),
        Parameter::FileLabel => KeyValue::text(file_label),
    }
}

fn text_of<T: fmt::Display>(value: &FieldValue<T>) -> KeyValue {
    match value {
        FieldValue::Present(v) => {
            let text = v.to_string();
            if text.trim().is_empty() {
                KeyValue::Unavailable
            } else {
                KeyValue::text(text)
            }
        }
        _ => KeyValue::Unavailable,
    }
}

fn number_of(value: &FieldValue<f64>, decimals: usize, unit: &'static str) -> KeyValue {
    value
        .get()
        .map_or(KeyValue::Unavailable, |v| KeyValue::number(v, decimals, unit))
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// One loaded file as seen by the key assigner.
#[derive(Debug, Clone, Copy)]
pub struct KeySource<'a> {
    pub record: &'a FileRecord,
    /// Display label after overrides.
    pub label: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesKeys {
    pub group: GroupKey,
    pub secondary: Option<GroupKey>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyAssignment {
    /// One entry per input sub-series, same order.
    pub keys: Vec<SeriesKeys>,
    pub warnings: Vec<Warning>,
}

/// Compute the colour key and optional marker key of every sub-series.
///
/// `series[i].source` indexes into `files`. A secondary parameter equal to
/// the variable one is ignored.
pub fn assign_keys(
    files: &[KeySource<'_>],
    series: &[SubSeries],
    variable: Parameter,
    secondary: Option<Parameter>,
) -> KeyAssignment {
    let secondary = secondary.filter(|s| *s != variable);
    let mut out = KeyAssignment::default();

    for s in series {
        let Some(file) = files.get(s.source) else {
            log::warn!("sub-series refers to unknown file #{}", s.source);
            out.keys.push(SeriesKeys {
                group: GroupKey::new(variable, KeyValue::Unavailable),
                secondary: secondary.map(|p| GroupKey::new(p, KeyValue::Unavailable)),
            });
            continue;
        };

        let mut resolve = |parameter: Parameter| {
            let value = key_value(parameter, file.label, file.record, s);
            if value.is_unavailable() {
                out.warnings.push(Warning::UnresolvedKey(UnresolvedKeyWarning {
                    file: file.label.to_string(),
                    parameter,
                    depth_cm: s.depth_cm,
                }));
            }
            GroupKey::new(parameter, value)
        };

        let group = resolve(variable);
        let secondary = secondary.map(&mut resolve);
        out.keys.push(SeriesKeys { group, secondary });
    }
    out
}
