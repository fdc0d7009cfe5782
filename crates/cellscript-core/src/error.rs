//! Error types for the cellscript workbook layer.
//!
//! These are API-level failures (I/O, malformed files, bad arguments).
//! Failures *inside* a cell evaluation never surface here; they are
//! materialized as `ErrorValue` cell results instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unknown sheet: {0}")]
    UnknownSheet(String),

    #[error("Invalid sheet name: {0}")]
    InvalidSheetName(String),

    #[error("Cell {0} is outside the grid shape")]
    OutOfBounds(String),

    #[error("Invalid grid shape")]
    InvalidShape,

    #[error("No file path set")]
    NoFilePath,
}

pub type Result<T> = std::result::Result<T, CoreError>;
