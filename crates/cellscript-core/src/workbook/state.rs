//! Workbook state: the cell store, sheet environments and recalculation
//! machinery shared with the evaluation engine's accessor closures.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rhai::{Dynamic, Engine, AST};

use cellscript_engine::engine::{CellKey, DepGraph, ExpressionMode, SmartCache};

use crate::error::{CoreError, Result};

use super::accessors;

/// Grid dimensions fixed at workbook creation: rows, columns, sheets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub rows: u32,
    pub cols: u32,
    pub sheets: u32,
}

impl Shape {
    pub fn new(rows: u32, cols: u32, sheets: u32) -> Shape {
        Shape { rows, cols, sheets }
    }

    pub fn contains(&self, key: CellKey) -> bool {
        key.row < self.rows && key.col < self.cols && key.sheet < self.sheets
    }
}

/// Per-cell property bag. The core does not interpret the properties except
/// for exposing them through `CM()`; warnings carry the red-corner
/// indicators accumulated during evaluation.
#[derive(Clone, Debug, Default)]
pub struct CellAttrs {
    pub props: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// One sheet: its name, applied script, draft buffer and the two globals
/// partitions derived from the last successful script apply.
pub(crate) struct SheetState {
    pub name: String,
    pub script: String,
    pub draft: Option<String>,
    pub fn_lib: Option<AST>,
    pub copyable: Vec<(String, Dynamic)>,
    pub uncopyable: Vec<(String, Dynamic)>,
}

impl SheetState {
    pub fn new(name: String) -> SheetState {
        SheetState {
            name,
            script: String::new(),
            draft: None,
            fn_lib: None,
            copyable: Vec::new(),
            uncopyable: Vec::new(),
        }
    }
}

/// Recalculation state guarded by one mutex: the dependency graph, the
/// cache, the evaluation tracker stack and the spill-stub ownership map.
pub(crate) struct Recalc {
    pub graph: DepGraph,
    pub cache: SmartCache,
    pub tracker: Vec<CellKey>,
    pub spill_anchors: HashMap<CellKey, CellKey>,
}

impl Recalc {
    fn new() -> Recalc {
        Recalc {
            graph: DepGraph::new(),
            cache: SmartCache::new(),
            tracker: Vec::new(),
            spill_anchors: HashMap::new(),
        }
    }
}

/// Handles shared between the workbook API and the accessor closures
/// registered in the rhai engine. Clones are cheap (all Arc-based).
#[derive(Clone)]
pub(crate) struct Shared {
    pub shape: Shape,
    pub store: Arc<DashMap<CellKey, String>>,
    pub attrs: Arc<DashMap<CellKey, CellAttrs>>,
    pub sheets: Arc<Mutex<Vec<SheetState>>>,
    pub recalc: Arc<Mutex<Recalc>>,
    pub mode: Arc<Mutex<ExpressionMode>>,
    pub interrupt: Arc<AtomicBool>,
    pub safe_mode: Arc<AtomicBool>,
    pub evals: Arc<AtomicU64>,
}

impl Shared {
    pub fn new(shape: Shape) -> Shared {
        let sheets = (0..shape.sheets)
            .map(|i| SheetState::new(format!("Sheet {}", i)))
            .collect();
        Shared {
            shape,
            store: Arc::new(DashMap::new()),
            attrs: Arc::new(DashMap::new()),
            sheets: Arc::new(Mutex::new(sheets)),
            recalc: Arc::new(Mutex::new(Recalc::new())),
            mode: Arc::new(Mutex::new(ExpressionMode::default())),
            interrupt: Arc::new(AtomicBool::new(false)),
            safe_mode: Arc::new(AtomicBool::new(false)),
            evals: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mode(&self) -> ExpressionMode {
        *self.mode.lock().expect("mode lock poisoned")
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Relaxed)
    }

    pub fn sheet_index(&self, name: &str) -> Option<u32> {
        self.sheets
            .lock()
            .expect("sheets lock poisoned")
            .iter()
            .position(|s| s.name == name)
            .map(|i| i as u32)
    }

    pub fn sheet_name(&self, index: u32) -> Option<String> {
        self.sheets
            .lock()
            .expect("sheets lock poisoned")
            .get(index as usize)
            .map(|s| s.name.clone())
    }

    /// Label for diagnostics, sheet-qualified when the key is not on
    /// `relative_to`'s sheet.
    pub fn describe_key(&self, key: CellKey, relative_to: Option<CellKey>) -> String {
        if relative_to.map(|r| r.sheet) == Some(key.sheet) {
            return key.label();
        }
        match self.sheet_name(key.sheet) {
            Some(name) => format!("\"{}\"!{}", name, key.label()),
            None => key.label(),
        }
    }

    /// Replace the warning list attached to a cell's attribute bag.
    pub fn set_warnings(&self, key: CellKey, warnings: Vec<String>) {
        if warnings.is_empty() {
            if let Some(mut entry) = self.attrs.get_mut(&key) {
                entry.warnings.clear();
            }
            return;
        }
        self.attrs.entry(key).or_default().warnings = warnings;
    }
}

/// A workbook: the engine-facing core behind one open spreadsheet document.
pub struct Workbook {
    pub(crate) shared: Shared,
    pub(crate) engine: Engine,
    pub(crate) file_path: Option<PathBuf>,
    pub(crate) modified: bool,
}

impl Workbook {
    /// Create an empty workbook with the given grid shape.
    pub fn new(shape: Shape) -> Result<Workbook> {
        if shape.rows == 0 || shape.cols == 0 || shape.sheets == 0 {
            return Err(CoreError::InvalidShape);
        }
        let shared = Shared::new(shape);
        let engine = accessors::build_cell_engine(&shared);
        Ok(Workbook {
            shared,
            engine,
            file_path: None,
            modified: false,
        })
    }

    pub fn shape(&self) -> Shape {
        self.shared.shape
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.file_path.as_ref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }
}
