use rayon::prelude::*;
use serde::Serialize;

use crate::color::{serialize_hex, ColorMap, LegendEntry, Marker, MarkerEntry, MarkerMap, Rgb};
use crate::config::EngineConfig;
use crate::data::model::{FileRecord, LineStyle, Overrides, ScanMode};
use crate::data::number::format_number;
use crate::data::segment::{segment, MeasureKind, PlaneSet, Segmentation, SubSeries};
use crate::error::Warning;
use crate::keys::{assign_keys, GroupKey, KeySource, Parameter};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One loaded file together with its current user overrides.
#[derive(Debug, Clone, Copy)]
pub struct PlotInput<'a> {
    pub record: &'a FileRecord,
    pub overrides: &'a Overrides,
}

/// What the plot shows and how its curves are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlotSelection {
    pub variable: Parameter,
    pub secondary: Option<Parameter>,
    pub measure: MeasureKind,
    /// Profile planes drawn when `measure` is `Profile`.
    pub planes: PlaneSet,
}

impl Default for PlotSelection {
    fn default() -> Self {
        Self {
            variable: Parameter::FileLabel,
            secondary: None,
            measure: MeasureKind::Pdd,
            planes: PlaneSet::BOTH,
        }
    }
}

/// Largest gap between a requested and a measured depth that still matches.
pub const DEPTH_TOLERANCE_CM: f64 = 0.05;

/// A drawable curve, one per sub-series of an included file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveDescriptor {
    /// Index of the owning file in the input list.
    pub file: usize,
    pub file_label: String,
    /// Legend text of this curve.
    pub label: String,
    pub mode: ScanMode,
    pub depth_cm: Option<f64>,
    pub fov_cm: Option<f64>,
    pub key: GroupKey,
    pub secondary: Option<GroupKey>,
    #[serde(serialize_with = "serialize_hex")]
    pub color: Rgb,
    pub marker: Option<Marker>,
    pub line_style: LineStyle,
    /// Whether the y values were divided by the series maximum.
    pub normalized: bool,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotOutput {
    pub curves: Vec<CurveDescriptor>,
    /// Colour legend in first-seen key order.
    pub legend: Vec<LegendEntry>,
    pub markers: Vec<MarkerEntry>,
    pub warnings: Vec<Warning>,
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Apply shift, scale, offset, then normalisation, in that order.
///
/// Returns whether normalisation was applied: a series whose maximum is not
/// a positive finite number is left as is.
pub fn apply_overrides(x: &mut [f64], y: &mut [f64], overrides: &Overrides) -> bool {
    for v in x.iter_mut() {
        *v += overrides.x_shift;
    }
    for v in y.iter_mut() {
        *v = *v * overrides.y_scale + overrides.y_offset;
    }
    if !overrides.normalize {
        return false;
    }

    let max = y
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if max > 0.0 && max.is_finite() {
        for v in y.iter_mut() {
            *v /= max;
        }
        true
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// Segment every included file, assign keys across all of them and build the
/// curve list. Recomputed from scratch on every call.
pub fn build_curves(
    inputs: &[PlotInput<'_>],
    selection: PlotSelection,
    config: &EngineConfig,
) -> PlotOutput {
    // Per-file work is independent; collecting is the barrier before keys.
    let segmentations: Vec<Segmentation> = inputs
        .par_iter()
        .enumerate()
        .map(|(i, input)| {
            if input.overrides.include {
                segment(
                    i,
                    input.record,
                    selection.measure,
                    selection.planes,
                    config.fov_interpolation,
                )
            } else {
                Segmentation::default()
            }
        })
        .collect();

    let labels: Vec<String> = inputs
        .iter()
        .map(|input| input.record.label(input.overrides).into_owned())
        .collect();
    for (input, label) in inputs.iter().zip(&labels) {
        if !input.overrides.include {
            log::debug!("{label}: excluded from plot");
        }
    }

    let mut warnings = Vec::new();
    let mut series: Vec<SubSeries> = Vec::new();
    for ((seg, input), label) in segmentations.into_iter().zip(inputs).zip(&labels) {
        warnings.extend(seg.warnings);
        match input.overrides.depths.as_deref() {
            Some(wanted) if !wanted.is_empty() => {
                series.extend(select_depths(seg.series, wanted, label));
            }
            _ => series.extend(seg.series),
        }
    }

    let sources: Vec<KeySource<'_>> = inputs
        .iter()
        .zip(&labels)
        .map(|(input, label)| KeySource {
            record: input.record,
            label,
        })
        .collect();
    let assignment = assign_keys(&sources, &series, selection.variable, selection.secondary);
    warnings.extend(assignment.warnings);

    let colors = ColorMap::new(assignment.keys.iter().map(|k| &k.group), &config.palette());
    let markers = MarkerMap::new(
        assignment.keys.iter().filter_map(|k| k.secondary.as_ref()),
        &config.markers,
    );
    let both_planes = files_with_both_planes(inputs.len(), &series);

    let curves = series
        .into_iter()
        .zip(assignment.keys)
        .map(|(s, keys)| {
            let overrides = inputs[s.source].overrides;
            let mixed = both_planes[s.source];
            let (mut x, mut y) = (s.x, s.y);
            let normalized = apply_overrides(&mut x, &mut y, overrides);
            if overrides.normalize && !normalized {
                log::debug!(
                    "{}: series maximum not positive, left unnormalised",
                    labels[s.source]
                );
            }

            CurveDescriptor {
                file: s.source,
                file_label: labels[s.source].clone(),
                label: curve_label(&keys.group, selection.variable, s.mode, s.depth_cm, mixed),
                mode: s.mode,
                depth_cm: s.depth_cm,
                fov_cm: s.fov_cm,
                color: colors.color_for(&keys.group),
                marker: keys.secondary.as_ref().and_then(|k| markers.marker_for(k)),
                line_style: line_style(s.mode, mixed, overrides),
                normalized,
                key: keys.group,
                secondary: keys.secondary,
                x,
                y,
            }
        })
        .collect();

    PlotOutput {
        curves,
        legend: colors.legend_entries().to_vec(),
        markers: markers.entries().to_vec(),
        warnings,
    }
}

/// Profile series whose depth matches one of `wanted`; PDD series pass.
fn select_depths(found: Vec<SubSeries>, wanted: &[f64], label: &str) -> Vec<SubSeries> {
    found
        .into_iter()
        .filter(|s| match s.depth_cm {
            Some(depth) => {
                let keep = wanted.iter().any(|w| depth_matches(*w, depth));
                if !keep {
                    log::debug!(
                        "{label}: {} at {} cm not in the depth selection",
                        s.mode,
                        format_number(depth)
                    );
                }
                keep
            }
            None => true,
        })
        .collect()
}

fn depth_matches(wanted_cm: f64, depth_cm: f64) -> bool {
    // Slack for decimal inputs such as 10.05 against 10.0.
    (wanted_cm - depth_cm).abs() <= DEPTH_TOLERANCE_CM + 1e-9
}

fn files_with_both_planes(files: usize, series: &[SubSeries]) -> Vec<bool> {
    let mut inplane = vec![false; files];
    let mut crossplane = vec![false; files];
    for s in series {
        match s.mode {
            ScanMode::ProfileInplane => inplane[s.source] = true,
            ScanMode::ProfileCrossplane => crossplane[s.source] = true,
            ScanMode::Pdd => {}
        }
    }
    inplane.iter().zip(&crossplane).map(|(a, b)| *a && *b).collect()
}

/// Key label, then the depth unless the key already is one, then the plane
/// when the file carries both. FOV keys read `<fov> @ <depth> cm`.
fn curve_label(
    key: &GroupKey,
    variable: Parameter,
    mode: ScanMode,
    depth_cm: Option<f64>,
    both_planes: bool,
) -> String {
    let mut label = key.label.clone();
    if let Some(depth) = depth_cm {
        match variable {
            Parameter::Depth => {}
            Parameter::Fov => label.push_str(&format!(" @ {} cm", format_number(depth))),
            _ => label.push_str(&format!(" - {} cm", format_number(depth))),
        }
    }
    if both_planes {
        label.push_str(" - ");
        label.push_str(mode.plane_name());
    }
    label
}

fn line_style(mode: ScanMode, both_planes: bool, overrides: &Overrides) -> LineStyle {
    match (both_planes, mode) {
        (true, ScanMode::ProfileCrossplane) => LineStyle::Dashed,
        (true, _) => LineStyle::Solid,
        (false, _) => overrides.line_style,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_in_order() {
        let mut x = vec![0.0, 1.0];
        let mut y = vec![1.0, 3.0];
        let overrides = Overrides {
            x_shift: 0.5,
            y_scale: 2.0,
            y_offset: 2.0,
            normalize: true,
            ..Overrides::default()
        };
        assert!(apply_overrides(&mut x, &mut y, &overrides));
        assert_eq!(x, vec![0.5, 1.5]);
        // (1*2+2, 3*2+2) = (4, 8), then / 8
        assert_eq!(y, vec![0.5, 1.0]);
    }

    #[test]
    fn zero_series_is_not_normalised() {
        let mut x = vec![0.0, 1.0];
        let mut y = vec![0.0, 0.0];
        assert!(!apply_overrides(&mut x, &mut y, &Overrides::default()));
        assert_eq!(y, vec![0.0, 0.0]);
    }

    #[test]
    fn normalisation_can_be_switched_off() {
        let mut x = vec![0.0];
        let mut y = vec![4.0];
        let overrides = Overrides {
            normalize: false,
            ..Overrides::default()
        };
        assert!(!apply_overrides(&mut x, &mut y, &overrides));
        assert_eq!(y, vec![4.0]);
    }

    #[test]
    fn labels_and_line_styles() {
        let key = GroupKey::new(
            Parameter::Energy,
            crate::keys::KeyValue::Text {
                text: "6 MV".into(),
            },
        );
        assert_eq!(
            curve_label(&key, Parameter::Energy, ScanMode::ProfileCrossplane, Some(10.0), true),
            "6 MV - 10 cm - Crossplane"
        );
        assert_eq!(
            curve_label(&key, Parameter::Depth, ScanMode::ProfileInplane, Some(10.0), false),
            "6 MV"
        );
        let fov = GroupKey::new(
            Parameter::Fov,
            crate::keys::KeyValue::Number {
                value: 10.2,
                decimals: 2,
                unit: "cm",
            },
        );
        assert_eq!(
            curve_label(&fov, Parameter::Fov, ScanMode::ProfileInplane, Some(5.0), false),
            "10.20 cm @ 5 cm"
        );
        let overrides = Overrides {
            line_style: LineStyle::Dotted,
            ..Overrides::default()
        };
        assert_eq!(line_style(ScanMode::ProfileCrossplane, true, &overrides), LineStyle::Dashed);
        assert_eq!(line_style(ScanMode::ProfileInplane, true, &overrides), LineStyle::Solid);
        assert_eq!(line_style(ScanMode::ProfileInplane, false, &overrides), LineStyle::Dotted);
    }

    fn profile(source: usize, depth: f64) -> SubSeries {
        SubSeries {
            source,
            mode: ScanMode::ProfileInplane,
            depth_cm: Some(depth),
            fov_cm: None,
            x: vec![0.0],
            y: vec![1.0],
        }
    }

    #[test]
    fn depth_selection_matches_within_tolerance() {
        let found = vec![profile(0, 1.5), profile(0, 5.0), profile(0, 10.0), profile(0, 20.0)];
        let kept = select_depths(found, &[10.05, 5.0, 19.9], "a.mcc");
        let depths: Vec<_> = kept.iter().map(|s| s.depth_cm).collect();
        assert_eq!(depths, vec![Some(5.0), Some(10.0)]);
    }

    #[test]
    fn depth_selection_keeps_pdd() {
        let pdd = SubSeries {
            source: 0,
            mode: ScanMode::Pdd,
            depth_cm: None,
            fov_cm: None,
            x: vec![0.0],
            y: vec![1.0],
        };
        assert_eq!(select_depths(vec![pdd], &[5.0], "a.mcc").len(), 1);
    }
}
