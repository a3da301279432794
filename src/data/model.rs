use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::derive::{derive, DerivedParams};
use super::extract::parse_document;
use super::normalize::{normalize, NormalizedFields};
use crate::config::EngineConfig;
use crate::error::{FieldWarning, ParseError};

// ---------------------------------------------------------------------------
// RawMetadata – header KEY=VALUE pairs
// ---------------------------------------------------------------------------

/// Header fields exactly as found in the file.
///
/// Keys are stored upper-cased so lookups are case-insensitive; a key seen
/// twice keeps its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RawMetadata {
    entries: BTreeMap<String, String>,
}

impl RawMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.trim().to_ascii_uppercase(), value.trim().to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// First non-empty value among `keys`, together with the key that held it.
    pub fn pick(&self, keys: &[&'static str]) -> Option<(&'static str, &str)> {
        keys.iter().find_map(|&key| {
            self.get(key)
                .filter(|value| !value.trim().is_empty())
                .map(|value| (key, value))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// FieldValue – a typed field that may be missing or unreadable
// ---------------------------------------------------------------------------

/// A normalised or derived value. `Absent` is never the same as a parsed zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum FieldValue<T> {
    Present(T),
    /// The field does not appear in the file.
    Absent,
    /// The field appears but its raw text could not be interpreted.
    Invalid(String),
}

impl<T> FieldValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            FieldValue::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldValue<U> {
        match self {
            FieldValue::Present(v) => FieldValue::Present(f(v)),
            FieldValue::Absent => FieldValue::Absent,
            FieldValue::Invalid(raw) => FieldValue::Invalid(raw),
        }
    }

    pub fn as_ref(&self) -> FieldValue<&T> {
        match self {
            FieldValue::Present(v) => FieldValue::Present(v),
            FieldValue::Absent => FieldValue::Absent,
            FieldValue::Invalid(raw) => FieldValue::Invalid(raw.clone()),
        }
    }
}

impl<T: Copy> FieldValue<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

impl<T> Default for FieldValue<T> {
    fn default() -> Self {
        FieldValue::Absent
    }
}

impl<T> From<Option<T>> for FieldValue<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Absent, FieldValue::Present)
    }
}

// ---------------------------------------------------------------------------
// Small enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Radial,
    Axial,
    #[default]
    Unknown,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Radial => write!(f, "Radial"),
            Orientation::Axial => write!(f, "Axial"),
            Orientation::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Curve type of one scan (`SCAN_CURVETYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Pdd,
    ProfileInplane,
    ProfileCrossplane,
}

impl ScanMode {
    pub fn is_profile(self) -> bool {
        !matches!(self, ScanMode::Pdd)
    }

    pub fn from_curve_type(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        if upper.contains("INPLANE_PROFILE") {
            Some(ScanMode::ProfileInplane)
        } else if upper.contains("CROSSPLANE_PROFILE") {
            Some(ScanMode::ProfileCrossplane)
        } else if upper == "PDD" || upper.starts_with("PDD") {
            Some(ScanMode::Pdd)
        } else {
            None
        }
    }

    /// Short plane name used in legends.
    pub fn plane_name(self) -> &'static str {
        match self {
            ScanMode::Pdd => "PDD",
            ScanMode::ProfileInplane => "Inplane",
            ScanMode::ProfileCrossplane => "Crossplane",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Pdd => write!(f, "PDD"),
            ScanMode::ProfileInplane => write!(f, "Inplane profile"),
            ScanMode::ProfileCrossplane => write!(f, "Crossplane profile"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
    DashDot,
}

// ---------------------------------------------------------------------------
// Sample – one tabulated data row
// ---------------------------------------------------------------------------

/// One (position, dose) row of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Axis position in cm (depth for PDD, lateral offset for profiles).
    pub position_cm: f64,
    pub dose: f64,
    /// Measurement depth of the enclosing profile scan, in cm.
    pub depth_cm: Option<f64>,
    pub mode: ScanMode,
}

// ---------------------------------------------------------------------------
// Overrides – user-owned, never derived
// ---------------------------------------------------------------------------

/// Per-file manual adjustments supplied by the collaborator layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    /// Display label; the file name when `None`.
    pub label: Option<String>,
    pub x_shift: f64,
    pub y_scale: f64,
    pub y_offset: f64,
    pub normalize: bool,
    pub include: bool,
    pub line_style: LineStyle,
    /// Profile depths to draw, in cm; every measured depth when `None`.
    pub depths: Option<Vec<f64>>,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            label: None,
            x_shift: 0.0,
            y_scale: 1.0,
            y_offset: 0.0,
            normalize: true,
            include: true,
            line_style: LineStyle::Solid,
            depths: None,
        }
    }
}

// ---------------------------------------------------------------------------
// FileRecord – one loaded measurement file
// ---------------------------------------------------------------------------

/// Everything derived from one MCC file. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub metadata: RawMetadata,
    pub fields: NormalizedFields,
    pub derived: DerivedParams,
    pub samples: Vec<Sample>,
    pub warnings: Vec<FieldWarning>,
}

impl FileRecord {
    /// Parse, normalise and derive one file already read into memory.
    pub fn from_bytes(
        path: impl Into<PathBuf>,
        bytes: &[u8],
        config: &EngineConfig,
    ) -> Result<Self, ParseError> {
        let path = path.into();
        let document = parse_document(bytes)?;
        let normalized = normalize(&document, config);
        let mut warnings = normalized.warnings;
        let derived = derive(
            &normalized.fields,
            &normalized.samples,
            config,
            &mut warnings,
        );

        for w in &warnings {
            log::debug!("{}: {w}", path.display());
        }

        Ok(FileRecord {
            path,
            metadata: document.metadata,
            fields: normalized.fields,
            derived,
            samples: normalized.samples,
            warnings,
        })
    }

    /// File name used as the default display label.
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }

    /// Display label after applying the user's override, if any.
    pub fn label<'a>(&self, overrides: &'a Overrides) -> std::borrow::Cow<'a, str> {
        match overrides.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => std::borrow::Cow::Borrowed(label),
            _ => std::borrow::Cow::Owned(self.file_name()),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_keys_are_case_insensitive_and_last_wins() {
        let mut meta = RawMetadata::new();
        meta.insert("ssd", "900");
        meta.insert("SSD", " 1000.00 ");
        assert_eq!(meta.get("Ssd"), Some("1000.00"));
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn pick_skips_empty_values() {
        let mut meta = RawMetadata::new();
        meta.insert("ENERGY", "  ");
        meta.insert("BEAM_ENERGY", "6");
        assert_eq!(
            meta.pick(&["ENERGY", "BEAM_ENERGY"]),
            Some(("BEAM_ENERGY", "6"))
        );
    }

    #[test]
    fn curve_type_parsing() {
        assert_eq!(
            ScanMode::from_curve_type("INPLANE_PROFILE"),
            Some(ScanMode::ProfileInplane)
        );
        assert_eq!(
            ScanMode::from_curve_type("crossplane_profile"),
            Some(ScanMode::ProfileCrossplane)
        );
        assert_eq!(ScanMode::from_curve_type("PDD"), Some(ScanMode::Pdd));
        assert_eq!(ScanMode::from_curve_type("DIAGONAL_PROFILE"), None);
    }

    #[test]
    fn label_falls_back_to_file_name() {
        let record = FileRecord {
            path: PathBuf::from("/data/qa/open_10x10.mcc"),
            metadata: RawMetadata::new(),
            fields: NormalizedFields::default(),
            derived: DerivedParams::default(),
            samples: Vec::new(),
            warnings: Vec::new(),
        };
        let mut overrides = Overrides::default();
        assert_eq!(record.label(&overrides), "open_10x10.mcc");
        overrides.label = Some("  ".into());
        assert_eq!(record.label(&overrides), "open_10x10.mcc");
        overrides.label = Some("Reference".into());
        assert_eq!(record.label(&overrides), "Reference");
    }
}
