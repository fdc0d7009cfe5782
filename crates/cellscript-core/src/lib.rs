//! Workbook layer for the cellscript spreadsheet engine.
//!
//! Wires the computation layer (`cellscript-engine`) to a sparse cell store,
//! per-sheet rhai script environments, the demand-driven evaluator with its
//! dependency tracker, the spill-range protocol and the persisted file
//! format.

pub mod error;
pub mod storage;
pub mod workbook;

pub use error::{CoreError, Result};
pub use workbook::{CellAttrs, CellMetaInfo, InterruptHandle, ScriptOutcome, Shape, Workbook};

pub use cellscript_engine::engine::{
    CellKey, Coord, ErrorKind, ErrorValue, ExpressionMode, Value,
};
