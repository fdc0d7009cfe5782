//! Cell addressing and the spreadsheet label codec.
//!
//! Provides bidirectional conversion between spreadsheet-style labels
//! (e.g. "A1", "AA27") and zero-indexed row/column coordinates. Columns use
//! bijective base-26 letters (A..Z, AA..AZ, BA..), rows are 1-based in
//! labels. Internal coordinates are zero-based on both axes.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed cell label or range label.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid cell reference: {0}")]
pub struct RefParseError(pub String);

/// Position of a cell within one sheet (zero-based).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Coord {
    pub row: u32,
    pub col: u32,
}

impl Coord {
    pub fn new(row: u32, col: u32) -> Coord {
        Coord { row, col }
    }

    pub fn label(&self) -> String {
        label_of(self.row, self.col)
    }
}

/// Absolute cell address: `(row, col, sheet)`, all zero-based.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellKey {
    pub row: u32,
    pub col: u32,
    pub sheet: u32,
}

impl CellKey {
    pub fn new(row: u32, col: u32, sheet: u32) -> CellKey {
        CellKey { row, col, sheet }
    }

    pub fn from_coord(coord: Coord, sheet: u32) -> CellKey {
        CellKey {
            row: coord.row,
            col: coord.col,
            sheet,
        }
    }

    pub fn coord(&self) -> Coord {
        Coord {
            row: self.row,
            col: self.col,
        }
    }

    /// Spreadsheet label of this address within its sheet (e.g. "B3").
    pub fn label(&self) -> String {
        label_of(self.row, self.col)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Convert a zero-based (row, col) pair to a spreadsheet label.
pub fn label_of(row: u32, col: u32) -> String {
    let mut letters = String::new();
    let mut n = col as u64 + 1;
    while n > 0 {
        n -= 1;
        letters.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    format!("{}{}", letters, row as u64 + 1)
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?<letters>[A-Za-z]+)(?<numbers>[0-9]+)$")
            .expect("cell label regex must compile")
    })
}

/// Parse a spreadsheet label into a zero-based (row, col) coordinate.
/// Letters are case-insensitive. Fails on malformed or overflowing input.
pub fn coord_of(label: &str) -> Result<Coord, RefParseError> {
    let caps = label_re()
        .captures(label)
        .ok_or_else(|| RefParseError(label.to_string()))?;
    let letters = &caps["letters"];
    let numbers = &caps["numbers"];

    let mut col_acc = 0u64;
    for c in letters.to_ascii_uppercase().bytes() {
        let digit = (c - b'A') as u64 + 1;
        col_acc = col_acc
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| RefParseError(label.to_string()))?;
    }
    let col = col_acc
        .checked_sub(1)
        .filter(|&v| v <= u32::MAX as u64)
        .ok_or_else(|| RefParseError(label.to_string()))?;

    let row = numbers
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_sub(1))
        .filter(|&v| v <= u32::MAX as u64)
        .ok_or_else(|| RefParseError(label.to_string()))?;

    Ok(Coord {
        row: row as u32,
        col: col as u32,
    })
}

/// Parse a range label like "A1:B5" into its corner coordinates.
pub fn parse_range_label(range: &str) -> Result<(Coord, Coord), RefParseError> {
    let (start, end) = range
        .split_once(':')
        .ok_or_else(|| RefParseError(range.to_string()))?;
    Ok((coord_of(start.trim())?, coord_of(end.trim())?))
}

impl FromStr for Coord {
    type Err = RefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        coord_of(s)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_of_first_columns() {
        assert_eq!(label_of(0, 0), "A1");
        assert_eq!(label_of(2, 1), "B3");
        assert_eq!(label_of(0, 25), "Z1");
        assert_eq!(label_of(0, 26), "AA1");
        assert_eq!(label_of(26, 27), "AB27");
        assert_eq!(label_of(0, 701), "ZZ1");
        assert_eq!(label_of(0, 702), "AAA1");
    }

    #[test]
    fn test_coord_of_case_insensitive() {
        assert_eq!(coord_of("b3").unwrap(), Coord::new(2, 1));
        assert_eq!(coord_of("aa27").unwrap(), Coord::new(26, 26));
    }

    #[test]
    fn test_round_trip_over_grid_corner() {
        for row in 0..64u32 {
            for col in 0..760u32 {
                let label = label_of(row, col);
                assert_eq!(coord_of(&label).unwrap(), Coord::new(row, col));
            }
        }
    }

    #[test]
    fn test_malformed_labels_rejected() {
        for bad in ["", "A", "1", "A0", "1A", "A-1", "A1B", "A 1"] {
            assert!(coord_of(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_overflowing_label_rejected() {
        let huge = format!("{}1", "Z".repeat(40));
        assert!(coord_of(&huge).is_err());
    }

    #[test]
    fn test_parse_range_label() {
        let (start, end) = parse_range_label("A1:B5").unwrap();
        assert_eq!(start, Coord::new(0, 0));
        assert_eq!(end, Coord::new(4, 1));
        assert!(parse_range_label("A1").is_err());
        assert!(parse_range_label("A1:").is_err());
    }
}
