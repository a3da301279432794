use std::fmt;

use serde::Serialize;

use super::model::{FieldValue, Orientation, Sample, ScanMode};
use super::normalize::{NormalizedFields, ScanStep};
use super::number::format_number;
use crate::config::EngineConfig;
use crate::error::FieldWarning;

// ---------------------------------------------------------------------------
// Derived columns
// ---------------------------------------------------------------------------

/// Jaw setting rescaled to the isocentre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JawSize {
    pub x_cm: f64,
    pub y_cm: f64,
    /// `false` when no reference distance was available and the recorded
    /// setting is passed through as-is.
    pub scaled: bool,
}

impl fmt::Display for JawSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}*{:.1}", self.x_cm, self.y_cm)?;
        if !self.scaled {
            write!(f, " (unscaled)")?;
        }
        Ok(())
    }
}

/// Geometric field size projected to one measured depth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NominalFov {
    pub depth_cm: f64,
    pub x_cm: f64,
    pub y_cm: f64,
}

/// The per-file display columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedParams {
    pub detector: FieldValue<String>,
    pub energy: FieldValue<String>,
    pub ssd_cm: FieldValue<f64>,
    pub jaw_at_100: FieldValue<JawSize>,
    pub orientation: Orientation,
    pub gantry_deg: FieldValue<f64>,
    pub dose_rate: FieldValue<String>,
    pub integration_s: FieldValue<f64>,
    pub scan_mode: FieldValue<ScanMode>,
    pub step: FieldValue<ScanStep>,
    /// Distinct profile depths in the order they appear in the file.
    pub depths_cm: Vec<f64>,
    pub nominal_fov: Vec<NominalFov>,
}

impl DerivedParams {
    pub const COLUMNS: [&'static str; 12] = [
        "Detector",
        "Energy",
        "SSD (cm)",
        "Jaw X*Y @100 (cm)",
        "Orientation",
        "Gantry (deg)",
        "Dose rate",
        "Integration (s)",
        "Scan mode",
        "Step",
        "Depths (cm)",
        "Nominal FOV (cm)",
    ];

    /// Cells in [`Self::COLUMNS`] order; absent values are blank.
    pub fn row(&self) -> [String; 12] {
        let depths = self
            .depths_cm
            .iter()
            .map(|d| format_number(*d))
            .collect::<Vec<_>>()
            .join(" ; ");
        [
            cell(&self.detector),
            cell(&self.energy),
            cell_with(&self.ssd_cm, 1),
            cell(&self.jaw_at_100),
            self.orientation.to_string(),
            cell_with(&self.gantry_deg, 1),
            cell(&self.dose_rate),
            cell_with(&self.integration_s, 2),
            cell(&self.scan_mode),
            cell(&self.step),
            depths,
            nominal_fov_text(&self.nominal_fov),
        ]
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Build the display columns from normalised fields. Never fails: each
/// column degrades to `Absent`/`Invalid` on its own.
pub fn derive(
    fields: &NormalizedFields,
    samples: &[Sample],
    config: &EngineConfig,
    warnings: &mut Vec<FieldWarning>,
) -> DerivedParams {
    let reference = match fields.reference_distance_cm.get() {
        Some(distance) if distance > 0.0 => Some(distance),
        Some(distance) => {
            warnings.push(FieldWarning::new(
                "FIELD_DEFINED",
                format!("reference distance {distance} cm is not positive, jaws left unscaled"),
            ));
            None
        }
        None => None,
    };
    let isocenter_cm = config.reference_distance_cm;
    let jaw_at_100 = jaw_at_isocenter(&fields.jaw_x_cm, &fields.jaw_y_cm, reference, isocenter_cm);
    if matches!(jaw_at_100, FieldValue::Present(JawSize { scaled: false, .. })) {
        log::debug!("no reference distance, jaw setting passed through unscaled");
    }

    let depths_cm = measured_depths(samples);
    let nominal_fov = match (jaw_at_100.get(), fields.ssd_cm.get()) {
        (Some(jaw), Some(ssd)) => depths_cm
            .iter()
            .map(|&depth_cm| nominal_fov(jaw, ssd, depth_cm, isocenter_cm))
            .collect(),
        _ => Vec::new(),
    };

    DerivedParams {
        detector: fields.detector.as_ref().map(|d| d.label()),
        energy: energy_label(fields),
        ssd_cm: fields.ssd_cm.clone(),
        jaw_at_100,
        orientation: orientation(fields),
        gantry_deg: fields.gantry_deg.clone(),
        dose_rate: fields.dose_rate.clone(),
        integration_s: fields.integration_s.clone(),
        scan_mode: fields.scan_mode.clone(),
        step: fields.step.clone(),
        depths_cm,
        nominal_fov,
    }
}

/// `jaw * (isocenter / reference)`, with a flag telling whether scaling
/// happened. An unknown reference passes the setting through.
pub fn scale_to_reference(jaw_cm: f64, reference_cm: Option<f64>, isocenter_cm: f64) -> (f64, bool) {
    match reference_cm {
        Some(reference) if reference > 0.0 && reference.is_finite() => {
            (jaw_cm * (isocenter_cm / reference), true)
        }
        _ => (jaw_cm, false),
    }
}

fn jaw_at_isocenter(
    x: &FieldValue<f64>,
    y: &FieldValue<f64>,
    reference_cm: Option<f64>,
    isocenter_cm: f64,
) -> FieldValue<JawSize> {
    match (x, y) {
        (FieldValue::Present(x), FieldValue::Present(y)) => {
            let (x_cm, scaled) = scale_to_reference(*x, reference_cm, isocenter_cm);
            let (y_cm, _) = scale_to_reference(*y, reference_cm, isocenter_cm);
            FieldValue::Present(JawSize { x_cm, y_cm, scaled })
        }
        (FieldValue::Invalid(raw), _) | (_, FieldValue::Invalid(raw)) => {
            FieldValue::Invalid(raw.clone())
        }
        _ => FieldValue::Absent,
    }
}

/// Orientation from the detector's known geometry; the file's own
/// orientation field only settles detectors built for both mountings.
fn orientation(fields: &NormalizedFields) -> Orientation {
    fields
        .detector
        .value()
        .and_then(|detector| detector.model.as_ref())
        .map(|model| model.orientation(fields.recorded_orientation.get()))
        .unwrap_or(Orientation::Unknown)
}

fn energy_label(fields: &NormalizedFields) -> FieldValue<String> {
    let fff = fields.fff.unwrap_or(false);
    fields.energy.as_ref().map(|energy| {
        let mut label = format!(
            "{} {}",
            format_number(energy.value),
            energy.modality.unit()
        );
        if fff {
            label.push_str(" FFF");
        }
        label
    })
}

fn measured_depths(samples: &[Sample]) -> Vec<f64> {
    let mut depths: Vec<f64> = Vec::new();
    for depth in samples
        .iter()
        .filter(|s| s.mode.is_profile())
        .filter_map(|s| s.depth_cm)
    {
        if !depths.contains(&depth) {
            depths.push(depth);
        }
    }
    depths
}

fn nominal_fov(jaw: JawSize, ssd_cm: f64, depth_cm: f64, isocenter_cm: f64) -> NominalFov {
    let factor = (ssd_cm + depth_cm) / isocenter_cm;
    NominalFov {
        depth_cm,
        x_cm: jaw.x_cm * factor,
        y_cm: jaw.y_cm * factor,
    }
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Table cell text: the value, the raw text when unreadable, blank when absent.
pub fn cell<T: fmt::Display>(value: &FieldValue<T>) -> String {
    match value {
        FieldValue::Present(v) => v.to_string(),
        FieldValue::Absent => String::new(),
        FieldValue::Invalid(raw) => format!("?{raw}"),
    }
}

pub fn cell_with(value: &FieldValue<f64>, decimals: usize) -> String {
    match value {
        FieldValue::Present(v) => format!("{v:.decimals$}"),
        other => cell(other),
    }
}

/// `@2 cm : 11.0*11.0 ; @5 cm : 11.3*11.3`
pub fn nominal_fov_text(fovs: &[NominalFov]) -> String {
    fovs.iter()
        .map(|fov| {
            format!(
                "@{} cm : {:.1}*{:.1}",
                format_number(fov.depth_cm),
                fov.x_cm,
                fov.y_cm
            )
        })
        .collect::<Vec<_>>()
        .join(" ; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::detector::DetectorTable;
    use crate::data::normalize::{Energy, Modality};

    fn derived(fields: &NormalizedFields) -> DerivedParams {
        let mut warnings = Vec::new();
        derive(fields, &[], &EngineConfig::default(), &mut warnings)
    }

    #[test]
    fn jaw_scaled_from_90_cm_reference() {
        let (value, scaled) = scale_to_reference(10.0, Some(90.0), 100.0);
        assert!((value - 11.111_111).abs() < 1e-4);
        assert!(scaled);
    }

    #[test]
    fn jaw_without_reference_is_unscaled() {
        let fields = NormalizedFields {
            jaw_x_cm: FieldValue::Present(10.0),
            jaw_y_cm: FieldValue::Present(20.0),
            ..NormalizedFields::default()
        };
        assert_eq!(
            derived(&fields).jaw_at_100,
            FieldValue::Present(JawSize {
                x_cm: 10.0,
                y_cm: 20.0,
                scaled: false
            })
        );
    }

    #[test]
    fn non_positive_reference_warns() {
        let fields = NormalizedFields {
            jaw_x_cm: FieldValue::Present(10.0),
            jaw_y_cm: FieldValue::Present(10.0),
            reference_distance_cm: FieldValue::Present(0.0),
            ..NormalizedFields::default()
        };
        let mut warnings = Vec::new();
        let d = derive(&fields, &[], &EngineConfig::default(), &mut warnings);
        assert_eq!(warnings.len(), 1);
        assert_eq!(d.jaw_at_100.get().map(|j| j.scaled), Some(false));
    }

    #[test]
    fn missing_ssd_stays_absent() {
        let d = derived(&NormalizedFields::default());
        assert_eq!(d.ssd_cm, FieldValue::Absent);
        assert_eq!(cell(&d.ssd_cm), "");
    }

    #[test]
    fn energy_label_suffix() {
        let mut fields = NormalizedFields {
            energy: FieldValue::Present(Energy {
                value: 10.0,
                modality: Modality::Photon,
            }),
            fff: Some(true),
            ..NormalizedFields::default()
        };
        assert_eq!(derived(&fields).energy, FieldValue::Present("10 MV FFF".into()));
        fields.fff = Some(false);
        assert_eq!(derived(&fields).energy, FieldValue::Present("10 MV".into()));
    }

    #[test]
    fn orientation_from_table_geometry() {
        let table = DetectorTable::ptw();
        let mut fields = NormalizedFields {
            detector: FieldValue::Present(table.resolve("T31010").unwrap()),
            recorded_orientation: FieldValue::Present(Orientation::Axial),
            ..NormalizedFields::default()
        };
        // Radial chamber: the recorded field does not override the table.
        assert_eq!(derived(&fields).orientation, Orientation::Radial);

        fields.detector = FieldValue::Present(table.resolve("T31021").unwrap());
        assert_eq!(derived(&fields).orientation, Orientation::Axial);

        fields.detector = FieldValue::Present(crate::data::detector::Detector {
            raw: "home-made".into(),
            model: None,
        });
        assert_eq!(derived(&fields).orientation, Orientation::Unknown);
    }

    #[test]
    fn nominal_fov_per_depth() {
        let fields = NormalizedFields {
            jaw_x_cm: FieldValue::Present(10.0),
            jaw_y_cm: FieldValue::Present(10.0),
            reference_distance_cm: FieldValue::Present(100.0),
            ssd_cm: FieldValue::Present(90.0),
            ..NormalizedFields::default()
        };
        let samples = [5.0, 5.0, 10.0].map(|depth| Sample {
            position_cm: 0.0,
            dose: 1.0,
            depth_cm: Some(depth),
            mode: ScanMode::ProfileInplane,
        });
        let mut warnings = Vec::new();
        let d = derive(&fields, &samples, &EngineConfig::default(), &mut warnings);
        assert_eq!(d.depths_cm, vec![5.0, 10.0]);
        assert_eq!(nominal_fov_text(&d.nominal_fov), "@5 cm : 9.5*9.5 ; @10 cm : 10.0*10.0");
    }
}
