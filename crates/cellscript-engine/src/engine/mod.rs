//! Spreadsheet engine API.
//!
//! This module provides the computation core for the spreadsheet:
//!
//! - [`CellKey`], [`Coord`] - Cell addressing (A1 notation ↔ row/col indices)
//! - [`Value`] - The universe of cell values, including spill outputs and
//!   error values
//! - [`ExpressionMode`], [`parse_expression`] - Classify raw cell text into
//!   literal-or-code
//! - [`rewrite_references`] - Transform bare cell references into accessor
//!   calls
//! - [`DepGraph`] - Forward/reverse dependency edges, dirty flags, cycle
//!   detection
//! - [`SmartCache`] - Dependency-aware result cache
//! - [`display_value`], [`tooltip_value`] - Format values for the grid

mod cache;
mod coord;
mod expr;
mod format;
mod graph;
mod refs;
mod value;

pub use cache::SmartCache;
pub use coord::{coord_of, label_of, parse_range_label, CellKey, Coord, RefParseError};
pub use expr::{parse_expression, ExpressionMode, Parsed};
pub use format::{display_dynamic, display_value, format_number, tooltip_value};
pub use graph::{CyclePath, DepGraph};
pub use refs::{is_cell_label, rewrite_references};
pub use value::{
    deep_clone_dynamic, dynamic_to_value, value_to_dynamic, EmptyValue, ErrorKind, ErrorValue,
    HelpValue, RangeValue, SpillValue, Value,
};

pub use rhai::Dynamic;
