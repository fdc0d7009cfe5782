//! Reader and writer for the sectioned workbook file format.
//!
//! A workbook file is UTF-8 text made of sections:
//!
//! ```text
//! [shape]
//! 100 26 3
//! [sheet_names]
//! 0 Sheet 0
//! [grid]
//! 0 0 0 '>1+1'
//! [attributes]
//! 0 0 0 bgcolor '#ffffff'
//! [sheet_scripts]
//! (sheet_script:'Sheet 0') 1
//! let L = [3, 1, 2];
//! [parser_settings]
//! mode = ReverseMixed
//! ```
//!
//! Cell text is single-quoted with doubled-quote escaping; backslashes and
//! newlines are escaped as `\\` and `\n`.

mod reader;
mod writer;

pub(crate) use reader::parse_workbook;
pub(crate) use writer::{render_workbook, SavePayload};
