use serde::{Deserialize, Serialize};

use super::model::Orientation;

/// How a detector is mounted relative to the beam axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorGeometry {
    /// Chamber axis perpendicular to the beam.
    Radial,
    /// Detector axis parallel to the beam.
    Axial,
    /// Built for both mountings; the file's orientation field decides.
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorModel {
    pub vendor: String,
    /// Catalogue number without the `T` prefix, e.g. `31010`.
    pub code: String,
    pub name: String,
    pub geometry: DetectorGeometry,
}

impl DetectorModel {
    pub fn label(&self) -> String {
        format!("{} {} {}", self.vendor, self.code, self.name)
    }

    /// Orientation implied by the model, given the file's orientation field.
    pub fn orientation(&self, recorded: Option<Orientation>) -> Orientation {
        match self.geometry {
            DetectorGeometry::Radial => Orientation::Radial,
            DetectorGeometry::Axial => Orientation::Axial,
            DetectorGeometry::Either => recorded.unwrap_or(Orientation::Unknown),
        }
    }
}

/// A detector as named in a file, resolved against the reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detector {
    /// Raw header text.
    pub raw: String,
    pub model: Option<DetectorModel>,
}

impl Detector {
    /// Table label for recognised models, the raw text otherwise.
    pub fn label(&self) -> String {
        match &self.model {
            Some(model) => model.label(),
            None => self.raw.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reference table
// ---------------------------------------------------------------------------

const PTW_CATALOG: [(&str, &str, DetectorGeometry); 16] = [
    ("30013", "Farmer", DetectorGeometry::Radial),
    ("31010", "Semiflex 0.125", DetectorGeometry::Radial),
    ("31013", "Semiflex 0.3", DetectorGeometry::Radial),
    ("31021", "Semiflex 3D", DetectorGeometry::Either),
    ("31014", "PinPoint", DetectorGeometry::Radial),
    ("31016", "PinPoint 3D", DetectorGeometry::Either),
    ("31022", "PinPoint 3D 0.016", DetectorGeometry::Either),
    ("31023", "PinPoint 0.015", DetectorGeometry::Radial),
    ("60012", "Diode E", DetectorGeometry::Axial),
    ("60016", "Diode P", DetectorGeometry::Axial),
    ("60017", "Diode E", DetectorGeometry::Axial),
    ("60018", "Diode SRS", DetectorGeometry::Axial),
    ("60019", "microDiamond", DetectorGeometry::Axial),
    ("34001", "Roos", DetectorGeometry::Axial),
    ("34045", "Advanced Markus", DetectorGeometry::Axial),
    ("23343", "Markus", DetectorGeometry::Axial),
];

/// Known detector models, looked up by catalogue code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectorTable {
    models: Vec<DetectorModel>,
}

impl Default for DetectorTable {
    fn default() -> Self {
        Self::ptw()
    }
}

impl DetectorTable {
    pub fn new(models: Vec<DetectorModel>) -> Self {
        Self { models }
    }

    /// The built-in PTW catalogue.
    pub fn ptw() -> Self {
        let models = PTW_CATALOG
            .iter()
            .map(|&(code, name, geometry)| DetectorModel {
                vendor: "PTW".to_string(),
                code: code.to_string(),
                name: name.to_string(),
                geometry,
            })
            .collect();
        Self { models }
    }

    pub fn lookup(&self, code: &str) -> Option<&DetectorModel> {
        self.models
            .iter()
            .find(|m| m.code.eq_ignore_ascii_case(code))
    }

    /// Resolve raw header text; `None` when no code in it is in the table.
    pub fn resolve(&self, raw: &str) -> Option<Detector> {
        candidate_codes(raw)
            .find_map(|code| self.lookup(code))
            .map(|model| Detector {
                raw: raw.trim().to_string(),
                model: Some(model.clone()),
            })
    }
}

/// Catalogue-number candidates in a raw token such as `T31010;Semiflex`.
fn candidate_codes(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .filter(|token| !token.is_empty())
        .map(|token| match token.strip_prefix(&['T', 't'][..]) {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
            _ => token,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_prefixed_code() {
        let table = DetectorTable::ptw();
        let det = table.resolve("T60019;microDiamond").unwrap();
        assert_eq!(det.label(), "PTW 60019 microDiamond");
        assert_eq!(
            det.model.unwrap().orientation(None),
            Orientation::Axial
        );
    }

    #[test]
    fn either_geometry_follows_recorded_orientation() {
        let table = DetectorTable::ptw();
        let model = table.lookup("31021").unwrap();
        assert_eq!(model.orientation(Some(Orientation::Axial)), Orientation::Axial);
        assert_eq!(model.orientation(None), Orientation::Unknown);
    }

    #[test]
    fn unknown_code_does_not_resolve() {
        let table = DetectorTable::ptw();
        assert!(table.resolve("T99999").is_none());
        assert!(table.resolve("SEMIFLEX").is_none());
    }

    #[test]
    fn custom_table() {
        let table = DetectorTable::new(vec![DetectorModel {
            vendor: "IBA".into(),
            code: "CC13".into(),
            name: "Compact chamber".into(),
            geometry: DetectorGeometry::Radial,
        }]);
        assert_eq!(
            table.resolve("cc13").unwrap().label(),
            "IBA CC13 Compact chamber"
        );
    }
}
