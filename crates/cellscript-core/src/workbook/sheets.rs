//! Per-sheet script environments.
//!
//! A sheet script runs once, at apply time, in a bare engine without cell
//! accessors (init scripts cannot reference cells). The resulting top-level
//! bindings are partitioned by a deep-clone probe into copyable globals
//! (cells see a fresh deep clone each evaluation) and uncopyable globals
//! (cells share them by reference). Functions defined by the script become
//! callable from every cell on the sheet.

use std::sync::{Arc, Mutex};

use rhai::{Engine, Scope};

use cellscript_engine::engine::{deep_clone_dynamic, is_cell_label, CellKey};

use crate::error::{CoreError, Result};

use super::accessors;
use super::state::{Recalc, Workbook};

/// What the UI shows after applying a sheet script: captured print output,
/// the error text if the apply failed, and any diagnostics.
#[derive(Debug, Default)]
pub struct ScriptOutcome {
    pub output: String,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

fn build_script_engine(print_buffer: Arc<Mutex<String>>) -> Engine {
    let mut engine = Engine::new();
    accessors::register_value_types(&mut engine);
    engine.on_print(move |text| {
        let mut buffer = print_buffer.lock().expect("print buffer lock poisoned");
        buffer.push_str(text);
        buffer.push('\n');
    });
    engine
}

impl Workbook {
    /// Apply `source` as the sheet's script. On failure the previously
    /// applied globals remain in force; the source is stored either way so
    /// the user can keep editing what they applied.
    pub fn apply_script(&mut self, sheet: u32, source: &str) -> Result<ScriptOutcome> {
        self.check_sheet(sheet)?;

        {
            let mut sheets = self.shared.sheets.lock().expect("sheets lock poisoned");
            let state = &mut sheets[sheet as usize];
            state.script = source.to_string();
            state.draft = None;
        }
        self.modified = true;

        let print_buffer = Arc::new(Mutex::new(String::new()));
        let engine = build_script_engine(print_buffer.clone());

        let ast = match engine.compile(source) {
            Ok(ast) => ast,
            Err(err) => {
                return Ok(ScriptOutcome {
                    output: String::new(),
                    error: Some(err.to_string()),
                    warnings: Vec::new(),
                })
            }
        };

        let mut scope = Scope::new();
        if let Err(err) = engine.run_ast_with_scope(&mut scope, &ast) {
            let output = print_buffer.lock().expect("print buffer lock poisoned").clone();
            return Ok(ScriptOutcome {
                output,
                error: Some(err.to_string()),
                warnings: Vec::new(),
            });
        }

        let mut warnings: Vec<String> = Vec::new();
        let mut copyable: Vec<(String, rhai::Dynamic)> = Vec::new();
        let mut uncopyable: Vec<(String, rhai::Dynamic)> = Vec::new();

        for (name, _constant, value) in scope.iter() {
            let already = copyable.iter().position(|(n, _)| n.as_str() == name);
            let already_shared = uncopyable.iter().position(|(n, _)| n.as_str() == name);
            if already.is_some() || already_shared.is_some() {
                warnings.push(format!(
                    "duplicate global binding '{}' in sheet script; the later one wins",
                    name
                ));
                if let Some(i) = already {
                    copyable.remove(i);
                }
                if let Some(i) = already_shared {
                    uncopyable.remove(i);
                }
            }
            if is_cell_label(name) {
                warnings.push(format!(
                    "global '{}' looks like a cell reference and may be confusing",
                    name
                ));
            }
            match deep_clone_dynamic(&value) {
                Ok(_) => copyable.push((name.to_string(), value)),
                Err(_) => {
                    warnings.push(format!(
                        "global '{}' ({}) is not deep-copyable; cells share it by reference",
                        name,
                        value.type_name()
                    ));
                    uncopyable.push((name.to_string(), value));
                }
            }
        }

        {
            let mut sheets = self.shared.sheets.lock().expect("sheets lock poisoned");
            let state = &mut sheets[sheet as usize];
            state.copyable = copyable;
            state.uncopyable = uncopyable;
            state.fn_lib = Some(ast.clone_functions_only());
        }

        // New globals: every cell on this sheet recomputes on next read.
        let sheet_cells: Vec<CellKey> = self
            .shared
            .store
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| key.sheet == sheet)
            .collect();
        {
            let mut rc = self.shared.recalc.lock().expect("recalc lock poisoned");
            let Recalc { graph, cache, .. } = &mut *rc;
            for key in sheet_cells {
                cache.invalidate(key, graph);
            }
        }

        let output = print_buffer.lock().expect("print buffer lock poisoned").clone();
        Ok(ScriptOutcome {
            output,
            error: None,
            warnings,
        })
    }

    /// The applied script source for a sheet.
    pub fn script(&self, sheet: u32) -> Result<String> {
        self.check_sheet(sheet)?;
        let sheets = self.shared.sheets.lock().expect("sheets lock poisoned");
        Ok(sheets[sheet as usize].script.clone())
    }

    /// The unsaved draft buffer, if any. Never persisted.
    pub fn draft(&self, sheet: u32) -> Result<Option<String>> {
        self.check_sheet(sheet)?;
        let sheets = self.shared.sheets.lock().expect("sheets lock poisoned");
        Ok(sheets[sheet as usize].draft.clone())
    }

    pub fn set_draft(&mut self, sheet: u32, source: Option<String>) -> Result<()> {
        self.check_sheet(sheet)?;
        let mut sheets = self.shared.sheets.lock().expect("sheets lock poisoned");
        sheets[sheet as usize].draft = source;
        Ok(())
    }

    pub(crate) fn check_sheet(&self, sheet: u32) -> Result<()> {
        if sheet < self.shared.shape.sheets {
            Ok(())
        } else {
            Err(CoreError::UnknownSheet(format!("#{}", sheet)))
        }
    }
}
