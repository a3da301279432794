use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{FileRecord, Sample, ScanMode};
use crate::error::{FieldWarning, ParseError, Warning};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a half-maximum edge is located between two samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Straight line between the samples either side of the half maximum.
    #[default]
    Linear,
    /// The sample whose dose is closest to the half maximum.
    Nearest,
}

/// The kind of measurement drawn for every file of a plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    #[default]
    Pdd,
    Profile,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown measurement kind '{0}' (expected pdd or profile)")]
pub struct UnknownMeasureKind(pub String);

impl FromStr for MeasureKind {
    type Err = UnknownMeasureKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdd" => Ok(MeasureKind::Pdd),
            "profile" | "profiles" | "profil" => Ok(MeasureKind::Profile),
            _ => Err(UnknownMeasureKind(s.to_string())),
        }
    }
}

/// Profile planes to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneSet {
    pub inplane: bool,
    pub crossplane: bool,
}

impl PlaneSet {
    pub const BOTH: PlaneSet = PlaneSet {
        inplane: true,
        crossplane: true,
    };

    pub fn contains(self, mode: ScanMode) -> bool {
        match mode {
            ScanMode::ProfileInplane => self.inplane,
            ScanMode::ProfileCrossplane => self.crossplane,
            ScanMode::Pdd => false,
        }
    }
}

impl Default for PlaneSet {
    fn default() -> Self {
        Self::BOTH
    }
}

/// One drawable slice of a file: the whole PDD, or one profile depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubSeries {
    /// Index of the owning file in the caller's file list.
    pub source: usize,
    pub mode: ScanMode,
    /// Measurement depth for profiles; `None` for PDD.
    pub depth_cm: Option<f64>,
    /// Half-maximum width of this slice, profiles only.
    pub fov_cm: Option<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl SubSeries {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    pub series: Vec<SubSeries>,
    pub warnings: Vec<Warning>,
}

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

/// Cut the requested kind of data out of a file.
///
/// `Pdd` gives exactly one series sorted by depth for any file holding a PDD
/// scan (or recorded as one), and nothing otherwise. `Profile` gives one
/// series per (plane, depth) in first-seen order, each with its own FOV,
/// restricted to the planes in `planes`. A file may carry both kinds; each
/// is read from its own scans.
pub fn segment(
    source: usize,
    record: &FileRecord,
    measure: MeasureKind,
    planes: PlaneSet,
    policy: Interpolation,
) -> Segmentation {
    let file = record.file_name();
    let recorded = record.fields.scan_mode.get();
    let mut out = Segmentation::default();

    match measure {
        MeasureKind::Pdd => {
            let has_pdd = record.samples.iter().any(|s| s.mode == ScanMode::Pdd);
            if has_pdd || recorded == Some(ScanMode::Pdd) {
                let series = segment_pdd(source, &file, &record.samples, &mut out.warnings);
                out.series.push(series);
            } else {
                log::debug!("{file}: no PDD scan");
            }
        }
        MeasureKind::Profile => {
            let has_profiles = record.samples.iter().any(|s| s.mode.is_profile())
                || recorded.is_some_and(ScanMode::is_profile);
            if has_profiles {
                segment_profiles(source, &file, &record.samples, planes, policy, &mut out);
            } else {
                log::debug!("{file}: no profile scan");
            }
        }
    }
    out
}

fn segment_pdd(
    source: usize,
    file: &str,
    samples: &[Sample],
    warnings: &mut Vec<Warning>,
) -> SubSeries {
    let mut rows: Vec<(f64, f64)> = samples
        .iter()
        .filter(|s| s.mode == ScanMode::Pdd)
        .map(|s| (s.position_cm, s.dose))
        .collect();
    // Stable: among equal depths the first occurrence stays first.
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    let before = rows.len();
    rows.dedup_by(|later, kept| later.0 == kept.0);
    let dropped = before - rows.len();
    if dropped > 0 {
        warnings.push(field_warning(
            file,
            "DATA",
            format!("{dropped} duplicate depth rows dropped, first occurrence kept"),
        ));
    }

    let (x, y) = rows.into_iter().unzip();
    SubSeries {
        source,
        mode: ScanMode::Pdd,
        depth_cm: None,
        fov_cm: None,
        x,
        y,
    }
}

fn segment_profiles(
    source: usize,
    file: &str,
    samples: &[Sample],
    planes: PlaneSet,
    policy: Interpolation,
    out: &mut Segmentation,
) {
    let mut groups: Vec<SubSeries> = Vec::new();
    let mut untagged = 0usize;
    for sample in samples.iter().filter(|s| s.mode.is_profile()) {
        let Some(depth) = sample.depth_cm else {
            untagged += 1;
            continue;
        };
        let existing = groups
            .iter_mut()
            .find(|s| s.mode == sample.mode && s.depth_cm == Some(depth));
        match existing {
            Some(series) => {
                series.x.push(sample.position_cm);
                series.y.push(sample.dose);
            }
            None => groups.push(SubSeries {
                source,
                mode: sample.mode,
                depth_cm: Some(depth),
                fov_cm: None,
                x: vec![sample.position_cm],
                y: vec![sample.dose],
            }),
        }
    }

    if untagged > 0 {
        out.warnings.push(field_warning(
            file,
            "SCAN_DEPTH",
            format!("{untagged} profile samples without a scan depth not used"),
        ));
    }
    if groups.is_empty() {
        out.warnings.push(Warning::Structure {
            file: file.to_string(),
            error: ParseError::NoProfileDepths,
        });
        return;
    }

    // Depth problems above are reported whatever planes are selected.
    for mut series in groups {
        if !planes.contains(series.mode) {
            log::debug!(
                "{file}: {} at {:?} cm not selected",
                series.mode,
                series.depth_cm
            );
            continue;
        }
        series.fov_cm = half_maximum_width(&series.x, &series.y, policy);
        if series.fov_cm.is_none() {
            log::debug!(
                "{file}: no half-maximum edges at {:?} cm",
                series.depth_cm
            );
        }
        out.series.push(series);
    }
}

fn field_warning(file: &str, field: &str, reason: String) -> Warning {
    Warning::Field {
        file: file.to_string(),
        warning: FieldWarning::new(field, reason),
    }
}

// ---------------------------------------------------------------------------
// Half-maximum width
// ---------------------------------------------------------------------------

/// Distance between the outermost half-maximum crossings either side of
/// the peak. `None` if the curve has no positive maximum or does not fall
/// below half of it on both sides.
pub fn half_maximum_width(x: &[f64], y: &[f64], policy: Interpolation) -> Option<f64> {
    let mut points: Vec<(f64, f64)> = x
        .iter()
        .copied()
        .zip(y.iter().copied())
        .filter(|(px, py)| px.is_finite() && py.is_finite())
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (peak, &(_, max)) = points
        .iter()
        .enumerate()
        .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1))?;
    if max <= 0.0 {
        return None;
    }
    let half = max / 2.0;

    // Walk outwards from the peak to the first sample at or below half.
    let left = (0..peak)
        .rev()
        .find(|&i| points[i].1 <= half)
        .map(|i| edge(points[i], points[i + 1], half, policy))?;
    let right = (peak + 1..points.len())
        .find(|&i| points[i].1 <= half)
        .map(|i| edge(points[i], points[i - 1], half, policy))?;

    Some(right - left)
}

/// Edge position between `outer` (at or below half) and `inner` (above it).
fn edge(outer: (f64, f64), inner: (f64, f64), half: f64, policy: Interpolation) -> f64 {
    match policy {
        Interpolation::Linear => {
            let dy = inner.1 - outer.1;
            if dy == 0.0 {
                outer.0
            } else {
                outer.0 + (half - outer.1) * (inner.0 - outer.0) / dy
            }
        }
        Interpolation::Nearest => {
            if (inner.1 - half).abs() < (half - outer.1).abs() {
                inner.0
            } else {
                outer.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::derive::DerivedParams;
    use crate::data::model::{FieldValue, RawMetadata};
    use crate::data::normalize::NormalizedFields;

    fn record(mode: ScanMode, samples: Vec<Sample>) -> FileRecord {
        FileRecord {
            path: "scan.mcc".into(),
            metadata: RawMetadata::new(),
            fields: NormalizedFields {
                scan_mode: FieldValue::Present(mode),
                ..NormalizedFields::default()
            },
            derived: DerivedParams::default(),
            samples,
            warnings: Vec::new(),
        }
    }

    fn profiles(source: usize, record: &FileRecord, planes: PlaneSet) -> Segmentation {
        segment(source, record, MeasureKind::Profile, planes, Interpolation::Linear)
    }

    fn sample(mode: ScanMode, depth: Option<f64>, position: f64, dose: f64) -> Sample {
        Sample {
            position_cm: position,
            dose,
            depth_cm: depth,
            mode,
        }
    }

    /// Flat top of 1.0 on |x| <= 5, zero from |x| >= 6.
    fn trapezoid(mode: ScanMode, depth: f64) -> Vec<Sample> {
        (-8..=8)
            .map(|i| {
                let x = i as f64;
                let dose = if x.abs() <= 5.0 { 1.0 } else { 0.0 };
                sample(mode, Some(depth), x, dose)
            })
            .collect()
    }

    #[test]
    fn pdd_is_sorted_and_deduplicated() {
        let samples = vec![
            sample(ScanMode::Pdd, None, 3.0, 0.8),
            sample(ScanMode::Pdd, None, 1.0, 0.9),
            sample(ScanMode::Pdd, None, 3.0, 0.7),
            sample(ScanMode::Pdd, None, 2.0, 1.0),
        ];
        let rec = record(ScanMode::Pdd, samples);
        let seg = segment(0, &rec, MeasureKind::Pdd, PlaneSet::BOTH, Interpolation::Linear);
        assert_eq!(seg.series.len(), 1);
        assert_eq!(seg.series[0].x, vec![1.0, 2.0, 3.0]);
        assert_eq!(seg.series[0].y, vec![0.9, 1.0, 0.8]);
        assert_eq!(seg.warnings.len(), 1);
    }

    #[test]
    fn profiles_grouped_by_depth_in_file_order() {
        let mut samples = Vec::new();
        for depth in [2.0, 5.0, 10.0] {
            samples.extend(trapezoid(ScanMode::ProfileInplane, depth));
        }
        let seg = profiles(3, &record(ScanMode::ProfileInplane, samples), PlaneSet::BOTH);
        let depths: Vec<_> = seg.series.iter().map(|s| s.depth_cm).collect();
        assert_eq!(depths, vec![Some(2.0), Some(5.0), Some(10.0)]);
        assert!(seg.series.iter().all(|s| s.len() == 17 && s.source == 3));
        assert!(seg.warnings.is_empty());
    }

    #[test]
    fn interleaved_depths_keep_first_seen_order() {
        let samples = vec![
            sample(ScanMode::ProfileCrossplane, Some(10.0), 0.0, 1.0),
            sample(ScanMode::ProfileCrossplane, Some(2.0), 0.0, 1.0),
            sample(ScanMode::ProfileCrossplane, Some(10.0), 1.0, 0.5),
        ];
        let seg = profiles(0, &record(ScanMode::ProfileCrossplane, samples), PlaneSet::BOTH);
        assert_eq!(seg.series.len(), 2);
        assert_eq!(seg.series[0].depth_cm, Some(10.0));
        assert_eq!(seg.series[0].x, vec![0.0, 1.0]);
    }

    #[test]
    fn each_depth_gets_its_own_fov() {
        let mut samples = trapezoid(ScanMode::ProfileInplane, 5.0);
        // Wider field at 10 cm: flat top to |x| <= 6.
        samples.extend((-8..=8).map(|i| {
            let x = i as f64;
            sample(ScanMode::ProfileInplane, Some(10.0), x, if x.abs() <= 6.0 { 1.0 } else { 0.0 })
        }));
        let seg = profiles(0, &record(ScanMode::ProfileInplane, samples), PlaneSet::BOTH);
        assert_eq!(seg.series[0].fov_cm, Some(11.0));
        assert_eq!(seg.series[1].fov_cm, Some(13.0));
    }

    #[test]
    fn profile_without_depths() {
        let samples = vec![sample(ScanMode::ProfileInplane, None, 0.0, 1.0)];
        let seg = profiles(0, &record(ScanMode::ProfileInplane, samples), PlaneSet::BOTH);
        assert!(seg.series.is_empty());
        assert!(seg.warnings.iter().any(|w| matches!(
            w,
            Warning::Structure {
                error: ParseError::NoProfileDepths,
                ..
            }
        )));
    }

    #[test]
    fn mixed_file_gives_either_kind() {
        let mut samples = vec![
            sample(ScanMode::Pdd, None, 2.0, 0.9),
            sample(ScanMode::Pdd, None, 1.0, 1.0),
        ];
        samples.extend(trapezoid(ScanMode::ProfileInplane, 5.0));
        samples.extend(trapezoid(ScanMode::ProfileCrossplane, 5.0));
        let rec = record(ScanMode::Pdd, samples);

        let pdd = segment(0, &rec, MeasureKind::Pdd, PlaneSet::BOTH, Interpolation::Linear);
        assert_eq!(pdd.series.len(), 1);
        assert_eq!(pdd.series[0].x, vec![1.0, 2.0]);
        assert!(pdd.warnings.is_empty());

        let both = profiles(0, &rec, PlaneSet::BOTH);
        let modes: Vec<_> = both.series.iter().map(|s| s.mode).collect();
        assert_eq!(modes, vec![ScanMode::ProfileInplane, ScanMode::ProfileCrossplane]);
        assert!(both.warnings.is_empty());
    }

    #[test]
    fn plane_selection_filters_series() {
        let mut samples = trapezoid(ScanMode::ProfileInplane, 5.0);
        samples.extend(trapezoid(ScanMode::ProfileCrossplane, 5.0));
        let rec = record(ScanMode::ProfileInplane, samples);

        let cross_only = PlaneSet {
            inplane: false,
            crossplane: true,
        };
        let seg = profiles(0, &rec, cross_only);
        assert_eq!(seg.series.len(), 1);
        assert_eq!(seg.series[0].mode, ScanMode::ProfileCrossplane);
        assert_eq!(seg.series[0].fov_cm, Some(11.0));

        let none = PlaneSet {
            inplane: false,
            crossplane: false,
        };
        let seg = profiles(0, &rec, none);
        assert!(seg.series.is_empty());
        assert!(seg.warnings.is_empty());
    }

    #[test]
    fn missing_kind_gives_no_series() {
        let pdd_only = record(ScanMode::Pdd, vec![sample(ScanMode::Pdd, None, 1.0, 1.0)]);
        let seg = profiles(0, &pdd_only, PlaneSet::BOTH);
        assert!(seg.series.is_empty());
        assert!(seg.warnings.is_empty());

        let profile_only = record(ScanMode::ProfileInplane, trapezoid(ScanMode::ProfileInplane, 5.0));
        let seg = segment(0, &profile_only, MeasureKind::Pdd, PlaneSet::BOTH, Interpolation::Linear);
        assert!(seg.series.is_empty());
    }

    #[test]
    fn empty_pdd_file_still_gives_one_series() {
        let rec = record(ScanMode::Pdd, Vec::new());
        let seg = segment(0, &rec, MeasureKind::Pdd, PlaneSet::BOTH, Interpolation::Linear);
        assert_eq!(seg.series.len(), 1);
        assert!(seg.series[0].is_empty());
    }

    #[test]
    fn measure_kind_names() {
        assert_eq!("PDD".parse::<MeasureKind>(), Ok(MeasureKind::Pdd));
        assert_eq!("profil".parse::<MeasureKind>(), Ok(MeasureKind::Profile));
        assert!("diagonal".parse::<MeasureKind>().is_err());
    }

    #[test]
    fn half_maximum_policies() {
        let x: Vec<f64> = (-8..=8).map(f64::from).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|v| match v.abs() {
                a if a <= 4.0 => 1.0,
                a if a == 5.0 => 0.9,
                a if a == 6.0 => 0.2,
                _ => 0.0,
            })
            .collect();
        let linear = half_maximum_width(&x, &y, Interpolation::Linear).unwrap();
        assert!((linear - 2.0 * (5.0 + 0.4 / 0.7)).abs() < 1e-9);
        assert_eq!(half_maximum_width(&x, &y, Interpolation::Nearest), Some(12.0));
    }

    #[test]
    fn half_maximum_needs_two_crossings() {
        // Monotone rise: never drops below half on the right.
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.1, 0.4, 0.8, 1.0];
        assert_eq!(half_maximum_width(&x, &y, Interpolation::Linear), None);
        assert_eq!(half_maximum_width(&x, &[0.0; 4], Interpolation::Linear), None);
        assert_eq!(half_maximum_width(&[], &[], Interpolation::Linear), None);
    }
}
