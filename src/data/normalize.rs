use std::fmt;

use serde::Serialize;

use super::detector::Detector;
use super::extract::{MccDocument, SkipReason};
use super::model::{FieldValue, Orientation, RawMetadata, Sample, ScanMode};
use super::number::{embedded_number, format_number, parse_number, parse_number_list};
use crate::config::EngineConfig;
use crate::error::FieldWarning;

pub const MM_PER_CM: f64 = 10.0;

// ---------------------------------------------------------------------------
// Field table: header keys tried in order, first non-empty wins
// ---------------------------------------------------------------------------

const ENERGY_KEYS: &[&str] = &["ENERGY", "SCAN_ENERGY", "BEAM_ENERGY", "XRAY_ENERGY"];
const FILTER_KEYS: &[&str] = &["FILTER", "BEAM_TYPE"];
const FLATTENING_KEYS: &[&str] = &["FLATTENING_FILTER", "FLATTENING"];
const MODALITY_KEYS: &[&str] = &["MODALITY"];
const DETECTOR_KEYS: &[&str] = &["DETECTOR_TYPE", "DETECTOR", "SENSOR_TYPE"];
const ORIENTATION_KEYS: &[&str] = &["DETECTOR_ORIENTATION"];
const REFERENCE_KEYS: &[&str] = &["FIELD_DEFINED", "FIELD_REFERENCE", "FIELD_AT"];
const DOSE_RATE_KEYS: &[&str] = &["DOSE_RATE", "MU_PER_MIN", "DOSE_RATE_MU_MIN"];
const PRESET_KEYS: &[&str] = &["MEAS_PRESET"];
const POSITIONS_KEYS: &[&str] = &["REF_SCAN_POSITIONS"];
const CURVE_TYPE_KEYS: &[&str] = &["SCAN_CURVETYPE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Millimeter,
    Centimeter,
    Degree,
    Second,
    MillimeterPerSecond,
}

/// A numeric header field: keys to try and the unit the file records it in.
struct NumericField {
    keys: &'static [&'static str],
    unit: Unit,
}

const SSD: NumericField = NumericField {
    keys: &["SSD", "SCAN_SSD", "SOURCE_SURFACE_DISTANCE", "DSP"],
    unit: Unit::Millimeter,
};
const JAW_X: NumericField = NumericField {
    keys: &["JAW_X", "FIELD_X", "COLL_X"],
    unit: Unit::Centimeter,
};
const JAW_Y: NumericField = NumericField {
    keys: &["JAW_Y", "FIELD_Y", "COLL_Y"],
    unit: Unit::Centimeter,
};
const FIELD_INPLANE: NumericField = NumericField {
    keys: &["FIELD_INPLANE"],
    unit: Unit::Millimeter,
};
const FIELD_CROSSPLANE: NumericField = NumericField {
    keys: &["FIELD_CROSSPLANE"],
    unit: Unit::Millimeter,
};
const FIELD_DEPTH: NumericField = NumericField {
    keys: &["FIELD_DEPTH"],
    unit: Unit::Millimeter,
};
const ISOCENTER: NumericField = NumericField {
    keys: &["ISOCENTER"],
    unit: Unit::Millimeter,
};
const GANTRY: NumericField = NumericField {
    keys: &["GANTRY", "GANTRY_ANGLE", "SCAN_GANTRY", "BEAM_ANGLE"],
    unit: Unit::Degree,
};
const INTEGRATION: NumericField = NumericField {
    keys: &[
        "INTEGRATION",
        "DWELL",
        "DWELL_TIME",
        "MEAS_TIME",
        "SAMPLE_TIME",
    ],
    unit: Unit::Second,
};
const SCAN_DEPTH: NumericField = NumericField {
    keys: &["SCAN_DEPTH"],
    unit: Unit::Millimeter,
};
const SPEED_PDD: NumericField = NumericField {
    keys: &["SCAN_SPEED_PDD"],
    unit: Unit::MillimeterPerSecond,
};
const SPEED_PROFILE: NumericField = NumericField {
    keys: &["SCAN_SPEED_PROFILE"],
    unit: Unit::MillimeterPerSecond,
};

// ---------------------------------------------------------------------------
// Typed values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Photon,
    Electron,
}

impl Modality {
    pub fn unit(self) -> &'static str {
        match self {
            Modality::Photon => "MV",
            Modality::Electron => "MeV",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Energy {
    pub value: f64,
    pub modality: Modality,
}

/// Where the recorded jaw setting is defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldReference {
    Isocenter,
    Surface,
    Depth,
}

/// Detector motion during acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanStep {
    Continuous { speed_mm_s: Option<f64> },
    Fixed { step_mm: f64 },
    Variable { min_mm: f64, max_mm: f64 },
    /// Step-by-step acquisition whose positions could not be read.
    Unknown,
}

impl fmt::Display for ScanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStep::Continuous {
                speed_mm_s: Some(speed),
            } => write!(f, "Continuous ({} mm/s)", format_number(*speed)),
            ScanStep::Continuous { speed_mm_s: None } => write!(f, "Continuous (unknown speed)"),
            ScanStep::Fixed { step_mm } => write!(f, "Fixed ({step_mm:.2} mm)"),
            ScanStep::Variable { min_mm, max_mm } => {
                write!(f, "Variable ({min_mm:.2}-{max_mm:.2} mm)")
            }
            ScanStep::Unknown => write!(f, "Unknown step"),
        }
    }
}

/// Typed header fields of one file. Distances in cm, angles in degrees.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedFields {
    pub detector: FieldValue<Detector>,
    /// `DETECTOR_ORIENTATION` as recorded.
    pub recorded_orientation: FieldValue<Orientation>,
    pub energy: FieldValue<Energy>,
    /// `None` only when the energy field is absent.
    pub fff: Option<bool>,
    pub ssd_cm: FieldValue<f64>,
    pub jaw_x_cm: FieldValue<f64>,
    pub jaw_y_cm: FieldValue<f64>,
    pub field_reference: FieldValue<FieldReference>,
    /// Distance at which the jaw setting is defined.
    pub reference_distance_cm: FieldValue<f64>,
    pub gantry_deg: FieldValue<f64>,
    pub dose_rate: FieldValue<String>,
    pub integration_s: FieldValue<f64>,
    pub scan_mode: FieldValue<ScanMode>,
    pub step: FieldValue<ScanStep>,
}

/// Output of [`normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub fields: NormalizedFields,
    pub samples: Vec<Sample>,
    pub warnings: Vec<FieldWarning>,
}

// ---------------------------------------------------------------------------
// Entry-point
// ---------------------------------------------------------------------------

/// Convert raw header strings and data rows into typed values.
pub fn normalize(doc: &MccDocument, config: &EngineConfig) -> Normalized {
    let meta = &doc.metadata;
    let mut warnings = Vec::new();

    let energy = read_energy(meta, &mut warnings);
    let fff = read_fff(meta);
    let ssd_cm = read_numeric(meta, &SSD, &mut warnings);
    let jaw_x_cm = first_present(
        read_numeric(meta, &JAW_X, &mut warnings),
        || read_numeric(meta, &FIELD_INPLANE, &mut warnings),
    );
    let jaw_y_cm = first_present(
        read_numeric(meta, &JAW_Y, &mut warnings),
        || read_numeric(meta, &FIELD_CROSSPLANE, &mut warnings),
    );
    let field_reference = read_field_reference(meta, &mut warnings);
    let reference_distance_cm =
        reference_distance(meta, &field_reference, &ssd_cm, config, &mut warnings);
    let scan_mode = read_scan_mode(doc, &mut warnings);
    let step = read_step(meta, scan_mode.get(), &mut warnings);

    let fields = NormalizedFields {
        detector: read_detector(meta, config),
        recorded_orientation: read_orientation(meta, &mut warnings),
        energy,
        fff,
        ssd_cm,
        jaw_x_cm,
        jaw_y_cm,
        field_reference,
        reference_distance_cm,
        gantry_deg: read_numeric(meta, &GANTRY, &mut warnings),
        dose_rate: meta
            .pick(DOSE_RATE_KEYS)
            .map(|(_, v)| v.to_string())
            .into(),
        integration_s: read_numeric(meta, &INTEGRATION, &mut warnings),
        scan_mode,
        step,
    };

    let samples = collect_samples(doc, &mut warnings);

    Normalized {
        fields,
        samples,
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Field reading
// ---------------------------------------------------------------------------

fn to_canonical(value: f64, unit: Unit) -> f64 {
    match unit {
        Unit::Millimeter => value / MM_PER_CM,
        Unit::Degree => {
            let wrapped = value.rem_euclid(360.0);
            // rem_euclid can round up to exactly 360 for tiny negatives
            if wrapped >= 360.0 || wrapped == 0.0 {
                0.0
            } else {
                wrapped
            }
        }
        Unit::Centimeter | Unit::Second | Unit::MillimeterPerSecond => value,
    }
}

fn read_numeric(
    meta: &RawMetadata,
    field: &NumericField,
    warnings: &mut Vec<FieldWarning>,
) -> FieldValue<f64> {
    let Some((key, raw)) = meta.pick(field.keys) else {
        return FieldValue::Absent;
    };
    match parse_number(raw) {
        Some(value) => FieldValue::Present(to_canonical(value, field.unit)),
        None => {
            warnings.push(FieldWarning::new(
                key,
                format!("'{raw}' is not a number"),
            ));
            FieldValue::Invalid(raw.to_string())
        }
    }
}

fn first_present<T>(primary: FieldValue<T>, fallback: impl FnOnce() -> FieldValue<T>) -> FieldValue<T> {
    match primary {
        FieldValue::Present(_) => primary,
        FieldValue::Absent => fallback(),
        FieldValue::Invalid(raw) => match fallback() {
            found @ FieldValue::Present(_) => found,
            _ => FieldValue::Invalid(raw),
        },
    }
}

// ---------------------------------------------------------------------------
// Text fields
// ---------------------------------------------------------------------------

fn read_energy(meta: &RawMetadata, warnings: &mut Vec<FieldWarning>) -> FieldValue<Energy> {
    let Some((key, raw)) = meta.pick(ENERGY_KEYS) else {
        return FieldValue::Absent;
    };
    let modality = match meta.pick(MODALITY_KEYS) {
        Some((_, m)) if m.trim().eq_ignore_ascii_case("E") => Modality::Electron,
        _ => Modality::Photon,
    };
    match embedded_number(raw) {
        Some(value) => FieldValue::Present(Energy { value, modality }),
        None => {
            warnings.push(FieldWarning::new(key, format!("no energy value in '{raw}'")));
            FieldValue::Invalid(raw.to_string())
        }
    }
}

/// FFF flag: `None` when the energy field is absent, otherwise whether any
/// beam field carries an FFF marker.
fn read_fff(meta: &RawMetadata) -> Option<bool> {
    let (_, energy) = meta.pick(ENERGY_KEYS)?;
    let marked = |text: &str| text.to_ascii_uppercase().contains("FFF");
    let filter_marked = meta.pick(FILTER_KEYS).is_some_and(|(_, v)| marked(v));
    let flattening_off = meta.pick(FLATTENING_KEYS).is_some_and(|(_, v)| {
        matches!(
            v.trim().to_ascii_uppercase().as_str(),
            "OFF" | "FREE" | "NONE" | "NO"
        )
    });
    Some(marked(energy) || filter_marked || flattening_off)
}

fn read_detector(meta: &RawMetadata, config: &EngineConfig) -> FieldValue<Detector> {
    // A later key may carry the catalogue code the first one lacks.
    for &key in DETECTOR_KEYS {
        if let Some(detector) = meta.get(key).and_then(|raw| config.detectors.resolve(raw)) {
            return FieldValue::Present(detector);
        }
    }
    match meta.pick(DETECTOR_KEYS) {
        Some((_, raw)) => {
            log::debug!("detector '{raw}' not in the reference table");
            FieldValue::Present(Detector {
                raw: raw.trim().to_string(),
                model: None,
            })
        }
        None => FieldValue::Absent,
    }
}

fn read_orientation(
    meta: &RawMetadata,
    warnings: &mut Vec<FieldWarning>,
) -> FieldValue<Orientation> {
    let Some((key, raw)) = meta.pick(ORIENTATION_KEYS) else {
        return FieldValue::Absent;
    };
    let upper = raw.trim().to_ascii_uppercase();
    if upper.starts_with("HOR") {
        FieldValue::Present(Orientation::Radial)
    } else if upper.starts_with("VER") {
        FieldValue::Present(Orientation::Axial)
    } else {
        warnings.push(FieldWarning::new(key, format!("unknown orientation '{raw}'")));
        FieldValue::Invalid(raw.to_string())
    }
}

fn read_field_reference(
    meta: &RawMetadata,
    warnings: &mut Vec<FieldWarning>,
) -> FieldValue<FieldReference> {
    let Some((key, raw)) = meta.pick(REFERENCE_KEYS) else {
        return FieldValue::Absent;
    };
    let upper = raw.to_ascii_uppercase();
    if upper.contains("ISO") || upper.contains("SAD") {
        FieldValue::Present(FieldReference::Isocenter)
    } else if upper.contains("SSD") {
        FieldValue::Present(FieldReference::Surface)
    } else if upper.contains("DEPTH") {
        FieldValue::Present(FieldReference::Depth)
    } else {
        warnings.push(FieldWarning::new(
            key,
            format!("unknown field reference '{raw}'"),
        ));
        FieldValue::Invalid(raw.to_string())
    }
}

fn reference_distance(
    meta: &RawMetadata,
    reference: &FieldValue<FieldReference>,
    ssd_cm: &FieldValue<f64>,
    config: &EngineConfig,
    warnings: &mut Vec<FieldWarning>,
) -> FieldValue<f64> {
    match reference.get() {
        Some(FieldReference::Isocenter) => match read_numeric(meta, &ISOCENTER, warnings) {
            FieldValue::Present(iso) => FieldValue::Present(iso),
            _ => FieldValue::Present(config.reference_distance_cm),
        },
        Some(FieldReference::Surface) => ssd_cm.clone(),
        Some(FieldReference::Depth) => match (ssd_cm.get(), read_numeric(meta, &FIELD_DEPTH, warnings)) {
            (Some(ssd), FieldValue::Present(depth)) => FieldValue::Present(ssd + depth),
            _ => FieldValue::Absent,
        },
        None => FieldValue::Absent,
    }
}

// ---------------------------------------------------------------------------
// Scan mode and step
// ---------------------------------------------------------------------------

/// Mode of the first scan with a supported curve type.
fn read_scan_mode(doc: &MccDocument, warnings: &mut Vec<FieldWarning>) -> FieldValue<ScanMode> {
    let mut invalid = None;
    for scan in &doc.scans {
        let Some((_, raw)) = scan.metadata.pick(CURVE_TYPE_KEYS) else {
            continue;
        };
        match ScanMode::from_curve_type(raw) {
            Some(mode) => return FieldValue::Present(mode),
            None => {
                invalid.get_or_insert_with(|| raw.to_string());
            }
        }
    }
    match invalid {
        Some(raw) => {
            warnings.push(FieldWarning::new(
                "SCAN_CURVETYPE",
                format!("unsupported curve type '{raw}'"),
            ));
            FieldValue::Invalid(raw)
        }
        None => FieldValue::Absent,
    }
}

fn read_step(
    meta: &RawMetadata,
    mode: Option<ScanMode>,
    warnings: &mut Vec<FieldWarning>,
) -> FieldValue<ScanStep> {
    let Some((_, preset)) = meta.pick(PRESET_KEYS) else {
        return FieldValue::Absent;
    };
    let preset = preset.to_ascii_uppercase();
    if preset.contains("MEAS_CONTINUOUS") {
        let (preferred, other) = match mode {
            Some(ScanMode::Pdd) => (&SPEED_PDD, &SPEED_PROFILE),
            _ => (&SPEED_PROFILE, &SPEED_PDD),
        };
        let speed = first_present(read_numeric(meta, preferred, warnings), || {
            read_numeric(meta, other, warnings)
        });
        return FieldValue::Present(ScanStep::Continuous {
            speed_mm_s: speed.get(),
        });
    }
    if preset.contains("REFERENCE_DOSEMETER") {
        let positions = meta
            .pick(POSITIONS_KEYS)
            .map(|(_, raw)| parse_number_list(raw))
            .unwrap_or_default();
        return FieldValue::Present(step_from_positions(&positions));
    }
    FieldValue::Absent
}

/// Fixed when all position steps agree within 1e-3 mm.
pub fn step_from_positions(positions_mm: &[f64]) -> ScanStep {
    let steps: Vec<f64> = positions_mm
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .filter(|d| *d > 1e-6)
        .collect();
    let min = steps.iter().copied().fold(f64::INFINITY, f64::min);
    let max = steps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if steps.is_empty() {
        ScanStep::Unknown
    } else if (max - min).abs() <= 1e-3 {
        ScanStep::Fixed { step_mm: max }
    } else {
        ScanStep::Variable {
            min_mm: min,
            max_mm: max,
        }
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

fn collect_samples(doc: &MccDocument, warnings: &mut Vec<FieldWarning>) -> Vec<Sample> {
    for row in &doc.skipped {
        let reason = match row.reason {
            SkipReason::Unreadable => "is not a position/dose row",
            SkipReason::OutsideData => "lies outside any data section",
        };
        warnings.push(FieldWarning::new(
            "DATA",
            format!("line {}: '{}' {reason}", row.line, row.text),
        ));
    }

    let mut samples = Vec::new();
    for scan in &doc.scans {
        if scan.rows.is_empty() {
            continue;
        }
        let mode = match scan.metadata.pick(CURVE_TYPE_KEYS) {
            Some((_, raw)) => ScanMode::from_curve_type(raw),
            None => None,
        };
        let Some(mode) = mode else {
            warnings.push(FieldWarning::new(
                "SCAN_CURVETYPE",
                format!(
                    "scan {}: missing or unsupported curve type, {} rows not used",
                    scan.number,
                    scan.rows.len()
                ),
            ));
            continue;
        };

        let depth_cm = if mode.is_profile() {
            match read_numeric(&scan.metadata, &SCAN_DEPTH, warnings) {
                FieldValue::Present(depth) => Some(depth),
                _ => None,
            }
        } else {
            None
        };

        samples.extend(scan.rows.iter().map(|&(position_mm, dose)| Sample {
            position_cm: position_mm / MM_PER_CM,
            dose,
            depth_cm,
            mode,
        }));
    }
    samples
}
