//! Data layer: per-file parsing, normalisation, derivation and segmentation.
//!
//! Architecture:
//! ```text
//!   .mcc bytes
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ extract  │  header KEY=VALUE + scan tables → MccDocument
//!   └──────────┘
//!        │
//!        ▼
//!   ┌───────────┐
//!   │ normalize │  typed values in cm / degrees, tagged samples
//!   └───────────┘      (detector lookup via `detector`)
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  derive  │  display columns → FileRecord
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ segment  │  PDD or per-depth profile SubSeries + FOV
//!   └──────────┘
//! ```
//!
//! `number` holds the text-to-number helpers every stage shares.

pub mod derive;
pub mod detector;
pub mod extract;
pub mod model;
pub mod normalize;
pub mod number;
pub mod segment;
