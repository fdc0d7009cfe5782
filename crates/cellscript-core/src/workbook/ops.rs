//! Cell-level workbook operations: text reads/writes, demand-driven value
//! reads, recalculation, graph introspection, metadata and cancellation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cellscript_engine::engine::{
    display_value, tooltip_value, CellKey, ErrorValue, ExpressionMode, Value,
};

use crate::error::{CoreError, Result};

use super::eval::eval_cell;
use super::state::Workbook;

/// Best-effort interruption token for long-running evaluations. Tripping it
/// makes the in-progress read return `ErrorValue(Cancelled)`; completed
/// inner cells keep their cached values.
#[derive(Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn trip(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    pub fn is_tripped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Snapshot returned by [`Workbook::cell_meta`].
#[derive(Clone, Debug, Default)]
pub struct CellMetaInfo {
    pub code: String,
    pub attributes: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl Workbook {
    /// The raw user-authored text of a cell, if any.
    pub fn get_text(&self, key: CellKey) -> Option<String> {
        self.shared.store.get(&key).map(|entry| entry.value().clone())
    }

    /// Write raw text into a cell. Forward edges of the cell are dropped
    /// (to be re-learned on the next evaluation), the cell and all
    /// transitive dependents become dirty, and only then the store changes.
    /// Empty text unsets the cell.
    pub fn set_text(&mut self, key: CellKey, text: &str) -> Result<()> {
        if !self.shared.shape.contains(key) {
            return Err(CoreError::OutOfBounds(key.label()));
        }

        let old = self.get_text(key);
        let unset = text.is_empty();
        if old.as_deref() == Some(text) || (old.is_none() && unset) {
            return Ok(());
        }

        {
            let mut rc = self.shared.recalc.lock().expect("recalc lock poisoned");
            rc.graph.remove_cell(key, false);
            rc.graph.mark_dirty(key);
            // Overwriting a spill stub forces its producer to re-expand.
            if let Some(anchor) = rc.spill_anchors.remove(&key) {
                if anchor != key {
                    rc.graph.mark_dirty(anchor);
                }
            }
        }

        if unset {
            self.shared.store.remove(&key);
        } else {
            self.shared.store.insert(key, text.to_string());
        }
        self.shared.set_warnings(key, Vec::new());
        self.modified = true;
        Ok(())
    }

    /// Evaluate (or fetch from cache) the value of a cell. The returned
    /// value is an independent copy.
    pub fn get_value(&self, key: CellKey) -> Value {
        if !self.shared.shape.contains(key) {
            return Value::Error(ErrorValue::ref_syntax(format!(
                "{} is outside the grid shape",
                key.label()
            )));
        }
        eval_cell(&self.shared, &self.engine, key)
    }

    /// Short display string for the grid cell.
    pub fn display(&self, key: CellKey) -> String {
        display_value(&self.get_value(key))
    }

    /// Hover text for the grid cell.
    pub fn tooltip(&self, key: CellKey) -> String {
        tooltip_value(&self.get_value(key))
    }

    /// Mark every cell with text dirty and evaluate all of them. Returns
    /// the number of cells evaluated.
    pub fn recalc_all(&mut self) -> usize {
        let mut keys: Vec<CellKey> = self
            .shared
            .store
            .iter()
            .map(|entry| *entry.key())
            .collect();
        keys.sort_by_key(|k| (k.sheet, k.row, k.col));

        {
            let mut rc = self.shared.recalc.lock().expect("recalc lock poisoned");
            for key in &keys {
                rc.graph.mark_dirty(*key);
            }
        }
        for key in &keys {
            let _ = eval_cell(&self.shared, &self.engine, *key);
        }
        keys.len()
    }

    /// Evaluate every currently-dirty cell. Returns the number evaluated.
    pub fn recalculate_dirty(&mut self) -> usize {
        let mut keys: Vec<CellKey> = {
            let rc = self.shared.recalc.lock().expect("recalc lock poisoned");
            rc.graph.all_dirty()
        };
        keys.sort_by_key(|k| (k.sheet, k.row, k.col));
        for key in &keys {
            let _ = eval_cell(&self.shared, &self.engine, *key);
        }
        keys.len()
    }

    /// Addresses whose cached value, if any, is stale.
    pub fn dirty_cells(&self) -> Vec<CellKey> {
        let mut keys = {
            let rc = self.shared.recalc.lock().expect("recalc lock poisoned");
            rc.graph.all_dirty()
        };
        keys.sort_by_key(|k| (k.sheet, k.row, k.col));
        keys
    }

    /// Direct forward dependencies of a cell (what it reads).
    pub fn dependencies_of(&self, key: CellKey) -> Vec<CellKey> {
        let mut keys = {
            let rc = self.shared.recalc.lock().expect("recalc lock poisoned");
            rc.graph.direct_deps(key)
        };
        keys.sort_by_key(|k| (k.sheet, k.row, k.col));
        keys
    }

    /// Direct dependents of a cell (what reads it).
    pub fn dependents_of(&self, key: CellKey) -> Vec<CellKey> {
        let mut keys = {
            let rc = self.shared.recalc.lock().expect("recalc lock poisoned");
            rc.graph.direct_dependents(key)
        };
        keys.sort_by_key(|k| (k.sheet, k.row, k.col));
        keys
    }

    /// Raw code, attribute bag and warnings of a cell, without forcing
    /// evaluation.
    pub fn cell_meta(&self, key: CellKey) -> CellMetaInfo {
        let code = self.get_text(key).unwrap_or_default();
        let (attributes, warnings) = self
            .shared
            .attrs
            .get(&key)
            .map(|entry| (entry.props.clone(), entry.warnings.clone()))
            .unwrap_or_default();
        CellMetaInfo {
            code,
            attributes,
            warnings,
        }
    }

    /// Set one property in a cell's attribute bag. Attribute changes do not
    /// invalidate dependents.
    pub fn set_attribute(&mut self, key: CellKey, name: &str, value: &str) -> Result<()> {
        if !self.shared.shape.contains(key) {
            return Err(CoreError::OutOfBounds(key.label()));
        }
        self.shared
            .attrs
            .entry(key)
            .or_default()
            .props
            .insert(name.to_string(), value.to_string());
        self.modified = true;
        Ok(())
    }

    pub fn mode(&self) -> ExpressionMode {
        self.shared.mode()
    }

    /// Switch the expression mode. Every cell with text becomes dirty since
    /// its classification may change.
    pub fn set_mode(&mut self, mode: ExpressionMode) {
        *self.shared.mode.lock().expect("mode lock poisoned") = mode;
        let keys: Vec<CellKey> = self
            .shared
            .store
            .iter()
            .map(|entry| *entry.key())
            .collect();
        let mut rc = self.shared.recalc.lock().expect("recalc lock poisoned");
        for key in keys {
            rc.graph.mark_dirty(key);
        }
        drop(rc);
        self.modified = true;
    }

    pub fn sheet_count(&self) -> u32 {
        self.shared.shape.sheets
    }

    pub fn sheet_name(&self, sheet: u32) -> Option<String> {
        self.shared.sheet_name(sheet)
    }

    pub fn sheet_index(&self, name: &str) -> Option<u32> {
        self.shared.sheet_index(name)
    }

    /// Rename a sheet. Names must be non-empty after trimming, contain no
    /// control characters, carry no leading/trailing whitespace and be
    /// unique within the workbook.
    pub fn rename_sheet(&mut self, sheet: u32, name: &str) -> Result<()> {
        self.check_sheet(sheet)?;
        validate_sheet_name(name)?;
        {
            let mut sheets = self.shared.sheets.lock().expect("sheets lock poisoned");
            if sheets
                .iter()
                .enumerate()
                .any(|(i, s)| i as u32 != sheet && s.name == name)
            {
                return Err(CoreError::InvalidSheetName(format!(
                    "sheet '{}' already exists",
                    name
                )));
            }
            sheets[sheet as usize].name = name.to_string();
        }
        self.modified = true;
        Ok(())
    }

    /// Cancellation token shared with the evaluator.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flag: self.shared.interrupt.clone(),
        }
    }

    /// Number of cell evaluations performed so far (recalculation
    /// statistic; cache hits do not count).
    pub fn eval_count(&self) -> u64 {
        self.shared.evals.load(Ordering::Relaxed)
    }

    /// In safe mode no evaluation happens; cells read as their raw text.
    pub fn safe_mode(&self) -> bool {
        self.shared.is_safe_mode()
    }
}

pub(crate) fn validate_sheet_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CoreError::InvalidSheetName(
            "sheet name cannot be empty or whitespace-only".to_string(),
        ));
    }
    if name.trim() != name {
        return Err(CoreError::InvalidSheetName(
            "sheet name cannot have leading or trailing whitespace".to_string(),
        ));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(CoreError::InvalidSheetName(
            "sheet name cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}
