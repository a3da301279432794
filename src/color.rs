use std::collections::HashMap;
use std::fmt;

use palette::{Hsl, IntoColor, Srgb};
use serde::{Deserialize, Serialize};

use crate::keys::{GroupKey, KeySlot};

/// 8-bit sRGB colour as handed to the renderer.
pub type Rgb = Srgb<u8>;

/// Colour for series whose key could not be computed.
pub const UNAVAILABLE_COLOR: Rgb = Rgb::new(128, 128, 128);

/// Okabe-Ito colour-blind safe palette, black last.
pub const OKABE_ITO: [&str; 8] = [
    "#E69F00", "#56B4E9", "#009E73", "#F0E442", "#0072B2", "#D55E00", "#CC79A7", "#000000",
];

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Rgb> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            rgb.into_format::<u8>()
        })
        .collect()
}

/// `base` followed by generated colours until there are `n`.
pub fn extend_palette(base: &[Rgb], n: usize) -> Vec<Rgb> {
    if n <= base.len() {
        return base[..n].to_vec();
    }
    let mut colors = base.to_vec();
    colors.extend(generate_palette(n - base.len()));
    colors
}

pub fn parse_hex(text: &str) -> Option<Rgb> {
    text.trim().parse::<Rgb>().ok()
}

pub fn to_hex(color: &Rgb) -> String {
    format!("#{:02X}{:02X}{:02X}", color.red, color.green, color.blue)
}

pub fn serialize_hex<S: serde::Serializer>(color: &Rgb, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex(color))
}

// ---------------------------------------------------------------------------
// Color mapping: grouping key → colour, first-seen order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub label: String,
    #[serde(serialize_with = "serialize_hex")]
    pub color: Rgb,
}

/// Maps distinct grouping keys to colours in the order they are first met.
#[derive(Debug, Clone, Default)]
pub struct ColorMap {
    slots: HashMap<KeySlot, usize>,
    legend: Vec<LegendEntry>,
}

impl ColorMap {
    /// Build a colour map over keys in load order; sorting is never applied.
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a GroupKey>, base: &[Rgb]) -> Self {
        let mut slots = HashMap::new();
        let mut distinct: Vec<(KeySlot, String)> = Vec::new();
        for key in keys {
            let slot = key.slot();
            if !slots.contains_key(&slot) {
                slots.insert(slot.clone(), distinct.len());
                distinct.push((slot, key.label.clone()));
            }
        }

        let available = distinct
            .iter()
            .filter(|(slot, _)| *slot != KeySlot::Unavailable)
            .count();
        let mut palette = extend_palette(base, available).into_iter();
        let legend = distinct
            .into_iter()
            .map(|(slot, label)| {
                let color = match slot {
                    KeySlot::Unavailable => UNAVAILABLE_COLOR,
                    KeySlot::Value(_) => palette.next().unwrap_or(UNAVAILABLE_COLOR),
                };
                LegendEntry { label, color }
            })
            .collect();

        ColorMap { slots, legend }
    }

    /// Look up the colour for a given key.
    pub fn color_for(&self, key: &GroupKey) -> Rgb {
        self.slots
            .get(&key.slot())
            .map(|&i| self.legend[i].color)
            .unwrap_or(UNAVAILABLE_COLOR)
    }

    /// Legend entries (key label → colour) in first-seen order.
    pub fn legend_entries(&self) -> &[LegendEntry] {
        &self.legend
    }
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marker {
    #[serde(rename = "o")]
    Circle,
    #[serde(rename = "s")]
    Square,
    #[serde(rename = "^")]
    TriangleUp,
    #[serde(rename = "v")]
    TriangleDown,
    #[serde(rename = "d")]
    Diamond,
    #[serde(rename = "p")]
    Pentagon,
    #[serde(rename = "h")]
    Hexagon,
    #[serde(rename = "x")]
    Cross,
    #[serde(rename = "*")]
    Star,
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "<")]
    TriangleLeft,
    #[serde(rename = ">")]
    TriangleRight,
    #[serde(rename = ".")]
    Point,
}

impl Marker {
    pub const ALL: [Marker; 13] = [
        Marker::Circle,
        Marker::Square,
        Marker::TriangleUp,
        Marker::TriangleDown,
        Marker::Diamond,
        Marker::Pentagon,
        Marker::Hexagon,
        Marker::Cross,
        Marker::Star,
        Marker::Plus,
        Marker::TriangleLeft,
        Marker::TriangleRight,
        Marker::Point,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Marker::Circle => "o",
            Marker::Square => "s",
            Marker::TriangleUp => "^",
            Marker::TriangleDown => "v",
            Marker::Diamond => "d",
            Marker::Pentagon => "p",
            Marker::Hexagon => "h",
            Marker::Cross => "x",
            Marker::Star => "*",
            Marker::Plus => "+",
            Marker::TriangleLeft => "<",
            Marker::TriangleRight => ">",
            Marker::Point => ".",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerEntry {
    pub label: String,
    pub marker: Marker,
}

/// Maps secondary keys to markers, cycling when keys outnumber markers.
/// Two keys may share a marker.
#[derive(Debug, Clone, Default)]
pub struct MarkerMap {
    slots: HashMap<KeySlot, usize>,
    entries: Vec<MarkerEntry>,
}

impl MarkerMap {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a GroupKey>, markers: &[Marker]) -> Self {
        let mut map = MarkerMap::default();
        for key in keys {
            let slot = key.slot();
            if map.slots.contains_key(&slot) {
                continue;
            }
            let marker = match markers {
                [] => Marker::Circle,
                _ => markers[map.entries.len() % markers.len()],
            };
            map.slots.insert(slot, map.entries.len());
            map.entries.push(MarkerEntry {
                label: key.label.clone(),
                marker,
            });
        }
        map
    }

    pub fn marker_for(&self, key: &GroupKey) -> Option<Marker> {
        self.slots.get(&key.slot()).map(|&i| self.entries[i].marker)
    }

    pub fn entries(&self) -> &[MarkerEntry] {
        &self.entries
    }
}
