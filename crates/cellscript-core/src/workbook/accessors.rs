//! Accessor functions bound into cell evaluations.
//!
//! The reference rewriter turns bare references into calls to these:
//! `C`, `R`, `Sh`, `G`, `CR`, `CM`/`cell_meta`, `help` and `OFFSET`. Each
//! accessor resolves the *current cell* through the evaluator's tracker
//! stack, records a dependency edge, recursively evaluates its target and
//! returns an independent copy of the result.
//!
//! Value constructors (`Empty`, `Range`, `SpillOutput`) and the operator
//! behaviour of the empty-cell sentinel are registered for both the cell
//! engine and the sheet-script engine; the accessors only exist in the cell
//! engine, so init scripts cannot reference cells.

use std::sync::atomic::Ordering;

use rhai::{
    Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, NativeCallContext, Position,
};

use cellscript_engine::engine::{
    coord_of, display_value, value_to_dynamic, CellKey, Coord, EmptyValue, ErrorValue,
    HelpValue, RangeValue, SpillValue, Value,
};

use super::eval::eval_cell;
use super::spill;
use super::state::Shared;

const MAX_RANGE_CELLS: u64 = 1_000_000;

/// Cross-sheet accessor handle produced by `Sh("Name")`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SheetHandle {
    pub index: u32,
}

/// Snapshot handed out by `CM()`: raw code plus the attribute bag, without
/// forcing evaluation.
#[derive(Clone, Debug)]
pub(crate) struct CellMeta {
    pub code: ImmutableString,
    pub attributes: Map,
}

fn runtime_err(message: impl Into<String>) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(message.into()), Position::NONE).into()
}

fn payload_err(error: ErrorValue) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(error), Position::NONE).into()
}

fn ref_err(detail: impl Into<String>) -> Box<EvalAltResult> {
    payload_err(ErrorValue::ref_syntax(detail))
}

/// The cell currently being evaluated (top of the tracker stack).
fn current_frame(shared: &Shared) -> Result<CellKey, Box<EvalAltResult>> {
    shared
        .recalc
        .lock()
        .expect("recalc lock poisoned")
        .tracker
        .last()
        .copied()
        .ok_or_else(|| runtime_err("cell accessors may only be used during cell evaluation"))
}

fn resolve_label(
    shared: &Shared,
    sheet: u32,
    label: &str,
) -> Result<CellKey, Box<EvalAltResult>> {
    let coord = coord_of(label).map_err(|e| ref_err(e.to_string()))?;
    let key = CellKey::from_coord(coord, sheet);
    if !shared.shape.contains(key) {
        return Err(ref_err(format!("{} is outside the grid shape", label)));
    }
    Ok(key)
}

/// Record the edge (current frame → target) and evaluate the target. The
/// cycle check runs at edge-insertion time; the discovered path is carried
/// in the error payload.
fn edge_and_eval(
    shared: &Shared,
    engine: &Engine,
    target: CellKey,
) -> Result<Value, Box<EvalAltResult>> {
    if shared.interrupt.load(Ordering::Relaxed) {
        return Err(payload_err(ErrorValue::cancelled()));
    }
    let dependent = current_frame(shared)?;
    let cycle = {
        let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
        rc.graph.add_edge(dependent, target).err()
    };
    if let Some(cycle) = cycle {
        let labels: Vec<String> = cycle
            .0
            .iter()
            .map(|k| shared.describe_key(*k, Some(dependent)))
            .collect();
        return Err(payload_err(ErrorValue::circular(&labels)));
    }
    Ok(eval_cell(shared, engine, target))
}

fn fetch_cell(
    shared: &Shared,
    engine: &Engine,
    sheet: u32,
    label: &str,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let target = resolve_label(shared, sheet, label)?;
    let value = edge_and_eval(shared, engine, target)?;
    Ok(value_to_dynamic(&value))
}

fn fetch_range(
    shared: &Shared,
    engine: &Engine,
    sheet: u32,
    start: &str,
    end: &str,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let a = resolve_label(shared, sheet, start)?;
    let b = resolve_label(shared, sheet, end)?;

    let min_row = a.row.min(b.row);
    let max_row = a.row.max(b.row);
    let min_col = a.col.min(b.col);
    let max_col = a.col.max(b.col);

    let width = (max_col - min_col + 1) as u64;
    let height = (max_row - min_row + 1) as u64;
    if width * height > MAX_RANGE_CELLS {
        return Err(runtime_err(format!(
            "range exceeds maximum size of {} cells",
            MAX_RANGE_CELLS
        )));
    }

    let mut cells = Array::with_capacity((width * height) as usize);
    for row in min_row..=max_row {
        for col in min_col..=max_col {
            let value = edge_and_eval(shared, engine, CellKey::new(row, col, sheet))?;
            cells.push(value_to_dynamic(&value));
        }
    }
    Ok(Dynamic::from(RangeValue::new(
        cells,
        width as u32,
        Coord::new(min_row, min_col),
    )))
}

fn fetch_global(shared: &Shared, sheet: u32, name: &str) -> Result<Dynamic, Box<EvalAltResult>> {
    use cellscript_engine::engine::deep_clone_dynamic;

    let sheets = shared.sheets.lock().expect("sheets lock poisoned");
    let state = sheets
        .get(sheet as usize)
        .ok_or_else(|| runtime_err(format!("sheet {} does not exist", sheet)))?;
    for (bound, value) in &state.copyable {
        if bound.as_str() == name {
            return Ok(deep_clone_dynamic(value).unwrap_or_else(|_| value.clone()));
        }
    }
    for (bound, value) in &state.uncopyable {
        if bound.as_str() == name {
            return Ok(value.clone());
        }
    }
    Err(runtime_err(format!(
        "global '{}' not found on sheet '{}'",
        name, state.name
    )))
}

enum RuntimeRef {
    Single(CellKey),
    Rect(CellKey, CellKey),
}

/// Parse a runtime reference string: `A1`, `A1:B2`, `Name!A1`, `'Name'!A1`
/// or `"Name"!A1` (range forms included).
fn parse_runtime_ref(
    shared: &Shared,
    current_sheet: u32,
    expr: &str,
) -> Result<RuntimeRef, Box<EvalAltResult>> {
    let expr = expr.trim();
    let (sheet, rest) = match split_sheet_qualifier(expr) {
        Some((name, rest)) => {
            let index = shared
                .sheet_index(&name)
                .ok_or_else(|| ref_err(format!("unknown sheet name: {}", name)))?;
            (index, rest)
        }
        None => (current_sheet, expr),
    };

    if let Some((start, end)) = rest.split_once(':') {
        let a = resolve_label(shared, sheet, start.trim())?;
        let b = resolve_label(shared, sheet, end.trim())?;
        Ok(RuntimeRef::Rect(a, b))
    } else {
        Ok(RuntimeRef::Single(resolve_label(shared, sheet, rest)?))
    }
}

fn split_sheet_qualifier(expr: &str) -> Option<(String, &str)> {
    let first = expr.chars().next()?;
    if first == '"' || first == '\'' {
        let close = expr[1..].find(first)? + 1;
        let name = expr[1..close].to_string();
        let rest = expr[close + 1..].strip_prefix('!')?;
        Some((name, rest))
    } else {
        let (name, rest) = expr.split_once('!')?;
        Some((name.trim().to_string(), rest))
    }
}

fn cell_meta_of(shared: &Shared, key: CellKey) -> CellMeta {
    let code = shared
        .store
        .get(&key)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();
    let mut attributes = Map::new();
    if let Some(attrs) = shared.attrs.get(&key) {
        for (name, value) in &attrs.props {
            attributes.insert(name.as_str().into(), Dynamic::from(value.clone()));
        }
    }
    CellMeta {
        code: code.into(),
        attributes,
    }
}

/// Register the value universe: the empty sentinel with its neutral
/// arithmetic, ranges, spill outputs, help text and error values. Shared by
/// the cell engine and the sheet-script engine.
pub(crate) fn register_value_types(engine: &mut Engine) {
    engine.register_type_with_name::<EmptyValue>("Empty");
    engine.register_type_with_name::<RangeValue>("Range");
    engine.register_type_with_name::<SpillValue>("SpillOutput");
    engine.register_type_with_name::<HelpValue>("HelpText");
    engine.register_type_with_name::<ErrorValue>("ErrorValue");

    // Empty behaves as 0 in numeric context and "" in string context.
    engine.register_fn("+", |_: EmptyValue, b: i64| b);
    engine.register_fn("+", |a: i64, _: EmptyValue| a);
    engine.register_fn("+", |_: EmptyValue, b: f64| b);
    engine.register_fn("+", |a: f64, _: EmptyValue| a);
    engine.register_fn("+", |_: EmptyValue, b: ImmutableString| b);
    engine.register_fn("+", |a: ImmutableString, _: EmptyValue| a);
    engine.register_fn("+", |_: EmptyValue, _: EmptyValue| EmptyValue);
    engine.register_fn("-", |_: EmptyValue, b: i64| -b);
    engine.register_fn("-", |a: i64, _: EmptyValue| a);
    engine.register_fn("-", |_: EmptyValue, b: f64| -b);
    engine.register_fn("-", |a: f64, _: EmptyValue| a);
    engine.register_fn("-", |_: EmptyValue, _: EmptyValue| EmptyValue);
    engine.register_fn("-", |_: EmptyValue| EmptyValue);
    engine.register_fn("*", |_: EmptyValue, _: i64| 0i64);
    engine.register_fn("*", |_: i64, _: EmptyValue| 0i64);
    engine.register_fn("*", |_: EmptyValue, _: f64| 0.0f64);
    engine.register_fn("*", |_: f64, _: EmptyValue| 0.0f64);
    engine.register_fn("/", |_: EmptyValue, _: i64| 0i64);
    engine.register_fn("/", |_: EmptyValue, _: f64| 0.0f64);
    engine.register_fn("==", |_: EmptyValue, _: EmptyValue| true);
    engine.register_fn("!=", |_: EmptyValue, _: EmptyValue| false);
    engine.register_fn("==", |_: EmptyValue, _: i64| false);
    engine.register_fn("==", |_: i64, _: EmptyValue| false);
    engine.register_fn("!=", |_: EmptyValue, _: i64| true);
    engine.register_fn("!=", |_: i64, _: EmptyValue| true);
    engine.register_fn("==", |_: EmptyValue, s: ImmutableString| s.is_empty());
    engine.register_fn("==", |s: ImmutableString, _: EmptyValue| s.is_empty());
    engine.register_fn("!=", |_: EmptyValue, s: ImmutableString| !s.is_empty());
    engine.register_fn("!=", |s: ImmutableString, _: EmptyValue| !s.is_empty());
    engine.register_fn("to_string", |_: &mut EmptyValue| String::new());
    engine.register_fn("to_debug", |_: &mut EmptyValue| "Empty".to_string());
    engine.register_fn("Empty", || EmptyValue);

    engine.register_get("width", |r: &mut RangeValue| r.width as i64);
    engine.register_get("height", |r: &mut RangeValue| r.height() as i64);
    engine.register_fn("flatten", |r: &mut RangeValue| r.flatten());
    engine.register_indexer_get(
        |r: &mut RangeValue, index: i64| -> Result<Array, Box<EvalAltResult>> {
            usize::try_from(index)
                .ok()
                .and_then(|i| r.row(i))
                .ok_or_else(|| runtime_err(format!("range row {} out of bounds", index)))
        },
    );
    engine.register_fn("to_string", |r: &mut RangeValue| {
        display_value(&Value::Range(r.clone()))
    });
    engine.register_fn(
        "Range",
        |cells: Array, width: i64| -> Result<RangeValue, Box<EvalAltResult>> {
            let width = u32::try_from(width)
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| runtime_err("Range width must be a positive integer"))?;
            Ok(RangeValue::new(cells, width, Coord::new(0, 0)))
        },
    );

    engine.register_get("width", |s: &mut SpillValue| s.width as i64);
    engine.register_get("height", |s: &mut SpillValue| s.height as i64);
    engine.register_indexer_get(
        |s: &mut SpillValue, index: i64| -> Result<Array, Box<EvalAltResult>> {
            let row = usize::try_from(index)
                .ok()
                .filter(|i| (*i as u64) < s.height as u64)
                .ok_or_else(|| runtime_err(format!("spill row {} out of bounds", index)))?;
            let width = s.width as usize;
            let start = row * width;
            let end = (start + width).min(s.cells.len());
            Ok(s.cells[start..end]
                .iter()
                .map(|d| {
                    cellscript_engine::engine::deep_clone_dynamic(d)
                        .unwrap_or_else(|_| d.clone())
                })
                .collect())
        },
    );
    engine.register_fn("to_string", |s: &mut SpillValue| {
        display_value(&Value::Spill(s.clone()))
    });
    engine.register_fn(
        "SpillOutput",
        |cells: Array, width: i64| -> Result<SpillValue, Box<EvalAltResult>> {
            let width = u32::try_from(width)
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| runtime_err("SpillOutput width must be a positive integer"))?;
            Ok(SpillValue::with_derived_height(cells, width))
        },
    );
    engine.register_fn(
        "SpillOutput",
        |cells: Array, width: i64, height: i64| -> Result<SpillValue, Box<EvalAltResult>> {
            let width = u32::try_from(width)
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| runtime_err("SpillOutput width must be a positive integer"))?;
            let height = u32::try_from(height)
                .ok()
                .filter(|h| *h > 0)
                .ok_or_else(|| runtime_err("SpillOutput height must be a positive integer"))?;
            Ok(SpillValue::new(cells, width, height))
        },
    );

    engine.register_get("query", |h: &mut HelpValue| h.query.clone());
    engine.register_get("body", |h: &mut HelpValue| h.body.clone());
    engine.register_fn("to_string", |h: &mut HelpValue| h.query.clone());

    engine.register_get("kind", |e: &mut ErrorValue| e.kind.to_string());
    engine.register_get("detail", |e: &mut ErrorValue| e.detail.clone());
    engine.register_fn("to_string", |e: &mut ErrorValue| e.to_string());
    engine.register_fn("is_error", |value: Dynamic| value.is::<ErrorValue>());

    engine.register_fn("help", || HelpValue {
        query: "help()".to_string(),
        body: "Cells hold script expressions; references like A1, A1:B2 and \
               \"Sheet\"!A1 resolve to cell values. Accessors: C, R, Sh, G, \
               CR, CM, OFFSET."
            .to_string(),
    });
    engine.register_fn("help", |value: Dynamic| {
        let shown = value.to_string();
        HelpValue {
            query: format!("help({})", shown),
            body: format!("type: {}\n{}", value.type_name(), shown),
        }
    });
}

/// Build the engine used for cell evaluation: value types plus the tracked
/// accessors, with best-effort cancellation wired into progress checks.
pub(crate) fn build_cell_engine(shared: &Shared) -> Engine {
    let mut engine = Engine::new();
    register_value_types(&mut engine);

    let interrupt = shared.interrupt.clone();
    engine.on_progress(move |_| {
        if interrupt.load(Ordering::Relaxed) {
            Some(Dynamic::from(ErrorValue::cancelled()))
        } else {
            None
        }
    });

    engine.register_type_with_name::<SheetHandle>("Sheet");
    engine.register_type_with_name::<CellMeta>("CellMeta");
    engine.register_get("code", |m: &mut CellMeta| m.code.clone());
    engine.register_get("attributes", |m: &mut CellMeta| m.attributes.clone());

    // C("A1"): single-cell accessor on the current sheet.
    let sh = shared.clone();
    engine.register_fn(
        "C",
        move |ctx: NativeCallContext, label: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let sheet = current_frame(&sh)?.sheet;
            fetch_cell(&sh, ctx.engine(), sheet, label)
        },
    );

    // R("A1", "B5"): range accessor on the current sheet.
    let sh = shared.clone();
    engine.register_fn(
        "R",
        move |ctx: NativeCallContext,
              start: &str,
              end: &str|
              -> Result<Dynamic, Box<EvalAltResult>> {
            let sheet = current_frame(&sh)?.sheet;
            fetch_range(&sh, ctx.engine(), sheet, start, end)
        },
    );

    // G("name"): global-variable lookup in the current sheet's environment.
    let sh = shared.clone();
    engine.register_fn(
        "G",
        move |_ctx: NativeCallContext, name: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let sheet = current_frame(&sh)?.sheet;
            fetch_global(&sh, sheet, name)
        },
    );

    // Sh("Name"): cross-sheet handle.
    let sh = shared.clone();
    engine.register_fn(
        "Sh",
        move |name: &str| -> Result<SheetHandle, Box<EvalAltResult>> {
            let index = sh
                .sheet_index(name)
                .ok_or_else(|| ref_err(format!("unknown sheet name: {}", name)))?;
            Ok(SheetHandle { index })
        },
    );

    let sh = shared.clone();
    engine.register_fn(
        "C",
        move |ctx: NativeCallContext,
              handle: &mut SheetHandle,
              label: &str|
              -> Result<Dynamic, Box<EvalAltResult>> {
            fetch_cell(&sh, ctx.engine(), handle.index, label)
        },
    );

    let sh = shared.clone();
    engine.register_fn(
        "R",
        move |ctx: NativeCallContext,
              handle: &mut SheetHandle,
              start: &str,
              end: &str|
              -> Result<Dynamic, Box<EvalAltResult>> {
            fetch_range(&sh, ctx.engine(), handle.index, start, end)
        },
    );

    let sh = shared.clone();
    engine.register_fn(
        "G",
        move |handle: &mut SheetHandle, name: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            fetch_global(&sh, handle.index, name)
        },
    );

    // CR(expr): runtime-parsed reference, the catch-all for dynamic strings.
    let sh = shared.clone();
    engine.register_fn(
        "CR",
        move |ctx: NativeCallContext, expr: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let sheet = current_frame(&sh)?.sheet;
            match parse_runtime_ref(&sh, sheet, expr)? {
                RuntimeRef::Single(key) => {
                    let value = edge_and_eval(&sh, ctx.engine(), key)?;
                    Ok(value_to_dynamic(&value))
                }
                RuntimeRef::Rect(a, b) => {
                    fetch_range(&sh, ctx.engine(), a.sheet, &a.label(), &b.label())
                }
            }
        },
    );

    // CM() / CM(ref): cell metadata without forcing evaluation.
    for name in ["CM", "cell_meta"] {
        let sh = shared.clone();
        engine.register_fn(name, move || -> Result<CellMeta, Box<EvalAltResult>> {
            let me = current_frame(&sh)?;
            Ok(cell_meta_of(&sh, me))
        });
        let sh = shared.clone();
        engine.register_fn(
            name,
            move |reference: &str| -> Result<CellMeta, Box<EvalAltResult>> {
                let sheet = current_frame(&sh)?.sheet;
                match parse_runtime_ref(&sh, sheet, reference)? {
                    RuntimeRef::Single(key) => Ok(cell_meta_of(&sh, key)),
                    RuntimeRef::Rect(..) => {
                        Err(ref_err("cell_meta expects a single-cell reference"))
                    }
                }
            },
        );
    }

    // OFFSET("B2", dr, dc): spill-slot accessor used by synthetic stub
    // cells. When the producer no longer spills far enough, the stub erases
    // itself and reads as Empty.
    let sh = shared.clone();
    engine.register_fn(
        "OFFSET",
        move |ctx: NativeCallContext,
              anchor: &str,
              dr: i64,
              dc: i64|
              -> Result<Dynamic, Box<EvalAltResult>> {
            let me = current_frame(&sh)?;
            let (dr, dc) = match (u32::try_from(dr), u32::try_from(dc)) {
                (Ok(dr), Ok(dc)) => (dr, dc),
                _ => return Err(ref_err("OFFSET offsets must be non-negative")),
            };
            let anchor_key = resolve_label(&sh, me.sheet, anchor)?;
            let value = edge_and_eval(&sh, ctx.engine(), anchor_key)?;
            if let Value::Spill(produced) = &value {
                if let Some(slot) = produced.slot(dr, dc) {
                    return Ok(slot);
                }
            }
            let expected = spill::stub_text(sh.mode(), &anchor_key.label(), dr, dc);
            let is_own_stub = sh
                .store
                .get(&me)
                .map(|entry| *entry.value() == expected)
                .unwrap_or(false);
            if is_own_stub {
                sh.store.remove(&me);
            }
            sh.recalc
                .lock()
                .expect("recalc lock poisoned")
                .spill_anchors
                .remove(&me);
            Ok(Dynamic::from(EmptyValue))
        },
    );

    engine
}
