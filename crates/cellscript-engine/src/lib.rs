//! Computation layer for the cellscript spreadsheet engine.
//!
//! This crate is the pure half of the system: cell addressing, the value
//! model, the expression and reference parsers, the dependency graph, the
//! dependency-aware cache and the display formatters. It holds no workbook
//! state and performs no I/O; the `cellscript-core` crate wires these pieces
//! to a cell store and a rhai evaluation environment.

pub mod engine;
