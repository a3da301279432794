use std::path::PathBuf;

use rayon::prelude::*;

use crate::assemble::{build_curves, PlotInput, PlotOutput, PlotSelection};
use crate::config::EngineConfig;
use crate::data::model::{FileRecord, Overrides};
use crate::data::segment::{MeasureKind, PlaneSet};
use crate::error::{ParseError, Warning};
use crate::keys::Parameter;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// A parsed file and the overrides the user has set on it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFile {
    pub record: FileRecord,
    pub overrides: Overrides,
}

/// Outcome of [`Session::load_batch`]. A failing file never stops the batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Indices of the newly loaded files.
    pub loaded: Vec<usize>,
    pub failed: Vec<(PathBuf, ParseError)>,
}

/// Loaded files, their overrides and the grouping choice, independent of
/// any display surface. Derived curves are never cached.
#[derive(Debug, Default)]
pub struct Session {
    config: EngineConfig,
    files: Vec<LoadedFile>,
    selection: PlotSelection,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            selection: PlotSelection::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn files(&self) -> &[LoadedFile] {
        &self.files
    }

    pub fn selection(&self) -> PlotSelection {
        self.selection
    }

    /// Parse one file already read into memory and append it.
    pub fn load(&mut self, path: impl Into<PathBuf>, bytes: &[u8]) -> Result<usize, ParseError> {
        let record = FileRecord::from_bytes(path, bytes, &self.config)?;
        log::info!(
            "Loaded {} ({} samples, {} warnings)",
            record.file_name(),
            record.samples.len(),
            record.warnings.len()
        );
        self.files.push(LoadedFile {
            record,
            overrides: Overrides::default(),
        });
        Ok(self.files.len() - 1)
    }

    /// Parse several files in parallel; they are appended in input order.
    pub fn load_batch(&mut self, inputs: Vec<(PathBuf, Vec<u8>)>) -> BatchReport {
        let config = &self.config;
        let parsed: Vec<(PathBuf, Result<FileRecord, ParseError>)> = inputs
            .into_par_iter()
            .map(|(path, bytes)| {
                let result = FileRecord::from_bytes(path.clone(), &bytes, config);
                (path, result)
            })
            .collect();

        let mut report = BatchReport::default();
        for (path, result) in parsed {
            match result {
                Ok(record) => {
                    self.files.push(LoadedFile {
                        record,
                        overrides: Overrides::default(),
                    });
                    report.loaded.push(self.files.len() - 1);
                }
                Err(e) => {
                    log::error!("Skipping {}: {e}", path.display());
                    report.failed.push((path, e));
                }
            }
        }
        log::info!(
            "Loaded {} files, {} skipped",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    pub fn remove(&mut self, index: usize) -> Option<LoadedFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn overrides_mut(&mut self, index: usize) -> Option<&mut Overrides> {
        self.files.get_mut(index).map(|f| &mut f.overrides)
    }

    /// Include or exclude every file.
    pub fn set_include_all(&mut self, include: bool) {
        for file in &mut self.files {
            file.overrides.include = include;
        }
    }

    pub fn invert_include(&mut self) {
        for file in &mut self.files {
            file.overrides.include = !file.overrides.include;
        }
    }

    pub fn set_variable(&mut self, variable: Parameter) {
        self.selection.variable = variable;
    }

    pub fn set_secondary(&mut self, secondary: Option<Parameter>) {
        self.selection.secondary = secondary;
    }

    pub fn set_measure(&mut self, measure: MeasureKind) {
        self.selection.measure = measure;
    }

    pub fn set_planes(&mut self, planes: PlaneSet) {
        self.selection.planes = planes;
    }

    /// Warnings raised while reading each loaded file, in load order.
    pub fn file_warnings(&self) -> Vec<Warning> {
        self.files
            .iter()
            .flat_map(|f| {
                let file = f.record.file_name();
                f.record.warnings.iter().map(move |w| Warning::Field {
                    file: file.clone(),
                    warning: w.clone(),
                })
            })
            .collect()
    }

    /// Recompute every curve from the stored records and current overrides.
    pub fn curves(&self) -> PlotOutput {
        let inputs: Vec<PlotInput<'_>> = self
            .files
            .iter()
            .map(|f| PlotInput {
                record: &f.record,
                overrides: &f.overrides,
            })
            .collect();
        build_curves(&inputs, self.selection, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDD: &str = "BEGIN_SCAN 1\nSCAN_CURVETYPE=PDD\nENERGY=6\n\
                       BEGIN_DATA\n0 50\n10 100\n20 80\nEND_DATA\nEND_SCAN 1\n";

    #[test]
    fn batch_skips_bad_files_and_keeps_order() {
        let mut session = Session::default();
        let report = session.load_batch(vec![
            ("a.mcc".into(), PDD.as_bytes().to_vec()),
            ("broken.mcc".into(), b"ENERGY=6\nBEGIN_DATA\n".to_vec()),
            ("c.mcc".into(), PDD.as_bytes().to_vec()),
        ]);
        assert_eq!(report.loaded, vec![0, 1]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, PathBuf::from("broken.mcc"));
        let names: Vec<_> = session.files().iter().map(|f| f.record.file_name()).collect();
        assert_eq!(names, vec!["a.mcc", "c.mcc"]);
    }

    #[test]
    fn overrides_change_curves_without_reparsing() {
        let mut session = Session::default();
        session.load("a.mcc", PDD.as_bytes()).unwrap();
        let before = session.curves();
        assert_eq!(before.curves[0].y, vec![0.5, 1.0, 0.8]);

        let overrides = session.overrides_mut(0).unwrap();
        overrides.normalize = false;
        overrides.x_shift = 1.0;
        let after = session.curves();
        assert_eq!(after.curves[0].x, vec![1.0, 2.0, 3.0]);
        assert_eq!(after.curves[0].y, vec![50.0, 100.0, 80.0]);
    }

    #[test]
    fn excluded_files_leave_the_plot() {
        let mut session = Session::default();
        session.load("a.mcc", PDD.as_bytes()).unwrap();
        session.load("b.mcc", PDD.as_bytes()).unwrap();
        session.invert_include();
        assert!(session.curves().curves.is_empty());
        session.set_include_all(true);
        session.overrides_mut(0).unwrap().include = false;
        let out = session.curves();
        assert_eq!(out.curves.len(), 1);
        assert_eq!(out.curves[0].file_label, "b.mcc");
        assert_eq!(out.legend.len(), 1);
    }

    const MIXED: &str = "BEGIN_SCAN 1\nSCAN_CURVETYPE=PDD\nENERGY=6\n\
                         BEGIN_DATA\n0 50\n10 100\nEND_DATA\nEND_SCAN 1\n\
                         BEGIN_SCAN 2\nSCAN_CURVETYPE=INPLANE_PROFILE\nSCAN_DEPTH=50\n\
                         BEGIN_DATA\n-20 0\n-10 1\n10 1\n20 0\nEND_DATA\nEND_SCAN 2\n\
                         BEGIN_SCAN 3\nSCAN_CURVETYPE=INPLANE_PROFILE\nSCAN_DEPTH=100\n\
                         BEGIN_DATA\n-20 0\n-10 1\n10 1\n20 0\nEND_DATA\nEND_SCAN 3\n";

    #[test]
    fn measure_kind_switches_between_scans_of_one_file() {
        let mut session = Session::default();
        session.load("mixed.mcc", MIXED.as_bytes()).unwrap();

        let pdd = session.curves();
        assert_eq!(pdd.curves.len(), 1);
        assert_eq!(pdd.curves[0].x, vec![0.0, 1.0]);
        assert!(pdd.warnings.is_empty());

        session.set_measure(MeasureKind::Profile);
        let profiles = session.curves();
        let depths: Vec<_> = profiles.curves.iter().map(|c| c.depth_cm).collect();
        assert_eq!(depths, vec![Some(5.0), Some(10.0)]);
        assert_eq!(profiles.curves[0].fov_cm, Some(3.0));

        session.set_planes(PlaneSet {
            inplane: false,
            crossplane: true,
        });
        assert!(session.curves().curves.is_empty());
    }

    #[test]
    fn depth_override_limits_profile_curves() {
        let mut session = Session::default();
        session.load("mixed.mcc", MIXED.as_bytes()).unwrap();
        session.set_measure(MeasureKind::Profile);
        session.overrides_mut(0).unwrap().depths = Some(vec![10.04]);
        let out = session.curves();
        assert_eq!(out.curves.len(), 1);
        assert_eq!(out.curves[0].depth_cm, Some(10.0));

        session.overrides_mut(0).unwrap().depths = Some(Vec::new());
        assert_eq!(session.curves().curves.len(), 2);
    }

    #[test]
    fn file_warnings_name_their_file() {
        let mut session = Session::default();
        session.load("a.mcc", PDD.as_bytes()).unwrap();
        let noisy = "BEGIN_SCAN 1\nSCAN_CURVETYPE=PDD\nGANTRY=up\n\
                     BEGIN_DATA\n0 50\nx y\nEND_DATA\nEND_SCAN 1\n";
        session.load("b.mcc", noisy.as_bytes()).unwrap();

        let warnings = session.file_warnings();
        assert_eq!(warnings.len(), 2);
        for w in &warnings {
            assert!(matches!(w, Warning::Field { file, .. } if file == "b.mcc"));
        }
    }

    #[test]
    fn remove_and_clear() {
        let mut session = Session::default();
        session.load("a.mcc", PDD.as_bytes()).unwrap();
        assert!(session.remove(3).is_none());
        assert!(session.remove(0).is_some());
        session.load("a.mcc", PDD.as_bytes()).unwrap();
        session.clear();
        assert!(session.files().is_empty());
    }
}
