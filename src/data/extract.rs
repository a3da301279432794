use std::borrow::Cow;

use super::model::RawMetadata;
use super::number::parse_number;
use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Section markers
// ---------------------------------------------------------------------------

const BEGIN_CONTAINER: &str = "BEGIN_SCAN_DATA";
const END_CONTAINER: &str = "END_SCAN_DATA";
const BEGIN_SCAN: &str = "BEGIN_SCAN";
const END_SCAN: &str = "END_SCAN";
const BEGIN_DATA: &str = "BEGIN_DATA";
const END_DATA: &str = "END_DATA";

// ---------------------------------------------------------------------------
// Parsed document
// ---------------------------------------------------------------------------

/// One `BEGIN_SCAN … END_SCAN` block (or the whole file when it has none).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawScan {
    /// Scan number as written after `BEGIN_SCAN`, or the 1-based position.
    pub number: usize,
    /// Header fields local to this scan.
    pub metadata: RawMetadata,
    /// `(position_mm, dose)` rows in file order.
    pub rows: Vec<(f64, f64)>,
}

/// Why a line that looked like data was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Inside a data section but not a position and a dose.
    Unreadable,
    /// Numeric row outside any `BEGIN_DATA … END_DATA` section.
    OutsideData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub line: usize,
    pub text: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MccDocument {
    /// Every header field of the file merged together, last occurrence wins.
    pub metadata: RawMetadata,
    pub scans: Vec<RawScan>,
    pub skipped: Vec<SkippedRow>,
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Extract the header fields of an MCC file.
pub fn extract(bytes: &[u8]) -> Result<RawMetadata, ParseError> {
    parse_document(bytes).map(|doc| doc.metadata)
}

/// Parse an MCC file into its header fields and per-scan data tables.
///
/// Layout:
///
/// ```text
/// BEGIN_SCAN_DATA
///     FORMAT=MEASURED
///     BEGIN_SCAN  1
///         SCAN_CURVETYPE=INPLANE_PROFILE
///         SCAN_DEPTH=100.00
///         BEGIN_DATA
///             -60.00    1.23E-002
///             ...
///         END_DATA
///     END_SCAN  1
/// END_SCAN_DATA
/// ```
///
/// Scan and container markers are optional; a file with only header lines
/// and one data table is read as a single scan.
pub fn parse_document(bytes: &[u8]) -> Result<MccDocument, ParseError> {
    let text = decode_text(bytes)?;
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut doc = MccDocument::default();
    let mut container: Option<usize> = None;
    let mut open_scan: Option<(usize, RawScan)> = None;
    let mut data_open: Option<usize> = None;
    // Header lines and data outside any explicit scan block.
    let mut loose = RawScan::default();
    let mut loose_used = false;

    for (index, raw_line) in text.split('\n').enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let marker = line.split_whitespace().next().unwrap_or("");
        match marker {
            BEGIN_CONTAINER => {
                if let Some(opened) = container {
                    return Err(ParseError::Unterminated {
                        line: opened,
                        marker: BEGIN_CONTAINER,
                    });
                }
                container = Some(line_no);
            }
            END_CONTAINER => {
                check_data_closed(data_open)?;
                if let Some((opened, _)) = &open_scan {
                    return Err(ParseError::Unterminated {
                        line: *opened,
                        marker: BEGIN_SCAN,
                    });
                }
                if container.take().is_none() {
                    return Err(ParseError::UnexpectedMarker {
                        line: line_no,
                        marker: END_CONTAINER,
                    });
                }
            }
            BEGIN_SCAN => {
                check_data_closed(data_open)?;
                if let Some((opened, _)) = &open_scan {
                    return Err(ParseError::Unterminated {
                        line: *opened,
                        marker: BEGIN_SCAN,
                    });
                }
                let number = line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(doc.scans.len() + 1);
                open_scan = Some((
                    line_no,
                    RawScan {
                        number,
                        ..RawScan::default()
                    },
                ));
            }
            END_SCAN => {
                check_data_closed(data_open)?;
                match open_scan.take() {
                    Some((_, scan)) => doc.scans.push(scan),
                    None => {
                        return Err(ParseError::UnexpectedMarker {
                            line: line_no,
                            marker: END_SCAN,
                        })
                    }
                }
            }
            BEGIN_DATA => {
                check_data_closed(data_open)?;
                data_open = Some(line_no);
                if open_scan.is_none() {
                    loose_used = true;
                }
            }
            END_DATA => {
                if data_open.take().is_none() {
                    return Err(ParseError::UnexpectedMarker {
                        line: line_no,
                        marker: END_DATA,
                    });
                }
            }
            _ if data_open.is_some() => {
                let scan = match open_scan.as_mut() {
                    Some((_, scan)) => scan,
                    None => &mut loose,
                };
                match parse_row(line) {
                    Some(row) => scan.rows.push(row),
                    None => doc.skipped.push(SkippedRow {
                        line: line_no,
                        text: line.to_string(),
                        reason: SkipReason::Unreadable,
                    }),
                }
            }
            _ => {
                let Some((key, value)) = parse_key_value(line) else {
                    if parse_row(line).is_some() {
                        doc.skipped.push(SkippedRow {
                            line: line_no,
                            text: line.to_string(),
                            reason: SkipReason::OutsideData,
                        });
                    } else {
                        log::trace!("line {line_no}: ignoring '{line}'");
                    }
                    continue;
                };
                doc.metadata.insert(key, value);
                match open_scan.as_mut() {
                    Some((_, scan)) => scan.metadata.insert(key, value),
                    None => loose.metadata.insert(key, value),
                }
            }
        }
    }

    if let Some(opened) = data_open {
        return Err(ParseError::Unterminated {
            line: opened,
            marker: BEGIN_DATA,
        });
    }
    if let Some((opened, _)) = open_scan {
        return Err(ParseError::Unterminated {
            line: opened,
            marker: BEGIN_SCAN,
        });
    }
    if let Some(opened) = container {
        return Err(ParseError::Unterminated {
            line: opened,
            marker: BEGIN_CONTAINER,
        });
    }
    if doc.metadata.is_empty() {
        return Err(ParseError::MissingHeader);
    }

    // Files without scan markers are a single implicit scan.
    if doc.scans.is_empty() || loose_used {
        loose.number = doc.scans.len() + 1;
        doc.scans.push(loose);
    }

    log::debug!(
        "parsed {} header fields, {} scans, {} skipped rows",
        doc.metadata.len(),
        doc.scans.len(),
        doc.skipped.len()
    );
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_data_closed(data_open: Option<usize>) -> Result<(), ParseError> {
    match data_open {
        Some(line) => Err(ParseError::Unterminated {
            line,
            marker: BEGIN_DATA,
        }),
        None => Ok(()),
    }
}

/// Decode file bytes as text: UTF-8 when valid, Latin-1 otherwise.
fn decode_text(bytes: &[u8]) -> Result<Cow<'_, str>, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ParseError::Empty);
    }
    if let Some((offset, &byte)) = bytes
        .iter()
        .enumerate()
        .find(|(_, &b)| is_forbidden_control(b))
    {
        return Err(ParseError::NotText { byte, offset });
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(Cow::Borrowed(text)),
        Err(_) => Ok(Cow::Owned(bytes.iter().map(|&b| b as char).collect())),
    }
}

fn is_forbidden_control(b: u8) -> bool {
    // Tab, LF, VT, FF, CR and the DOS end-of-file byte are tolerated.
    (b < 0x20 && !matches!(b, b'\t' | b'\n' | 0x0b | 0x0c | b'\r' | 0x1a)) || b == 0x7f
}

/// `KEY=VALUE` with an identifier key and a non-empty value.
fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty()
        || value.is_empty()
        || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some((key, value))
}

/// First two whitespace-separated columns as `(position, dose)`.
fn parse_row(line: &str) -> Option<(f64, f64)> {
    let mut columns = line.split_whitespace();
    let position = parse_number(columns.next()?)?;
    let dose = parse_number(columns.next()?)?;
    Some((position, dose))
}
