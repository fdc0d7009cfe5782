//! Demand-driven cell evaluation.
//!
//! One cell read runs: cache probe → raw text fetch → expression parse →
//! reference rewrite → execution inside the sheet's globals with a tracking
//! frame pushed, so accessor calls can learn this cell's dependency edges.
//! Any failure inside execution is materialized as an `ErrorValue` result;
//! cancellation leaves the cell dirty with no cache entry.

use std::sync::atomic::Ordering;

use log::debug;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};

use cellscript_engine::engine::{
    deep_clone_dynamic, dynamic_to_value, parse_expression, rewrite_references, CellKey,
    ErrorKind, ErrorValue, Parsed, Value,
};

use super::spill;
use super::state::{Recalc, Shared};

/// Evaluate the cell at `key`, consulting and maintaining the cache,
/// dependency graph and tracker stack. The returned value is always an
/// independent copy.
pub(crate) fn eval_cell(shared: &Shared, engine: &Engine, key: CellKey) -> Value {
    {
        let rc = shared.recalc.lock().expect("recalc lock poisoned");
        // Re-entry on an address currently being evaluated is the cycle
        // backstop; the edge-insertion check normally fires first.
        if rc.tracker.contains(&key) {
            return Value::Error(ErrorValue::circular(&[key.label(), key.label()]));
        }
        if let Some(hit) = rc.cache.get(key, &rc.graph) {
            return hit;
        }
    }

    let text = shared.store.get(&key).map(|entry| entry.value().clone());

    if shared.is_safe_mode() {
        return match text {
            Some(t) => Value::Scalar(Dynamic::from(t)),
            None => Value::Empty,
        };
    }

    let text = match text.filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => {
            let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
            let Recalc { graph, cache, .. } = &mut *rc;
            graph.remove_cell(key, false);
            cache.put(key, Value::Empty, graph);
            drop(rc);
            shared.set_warnings(key, Vec::new());
            return Value::Empty;
        }
    };

    let mut warnings: Vec<String> = Vec::new();

    let code = match parse_expression(shared.mode(), &text) {
        Parsed::Literal(value) => {
            if value.is_empty() && !text.trim().is_empty() {
                warnings.push(
                    "expression parser produced an empty result for non-empty cell text"
                        .to_string(),
                );
            }
            {
                let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
                rc.graph.remove_cell(key, false);
            }
            return finish(shared, key, value, warnings);
        }
        Parsed::Code(code) => code,
    };

    let rewritten = rewrite_references(&code);
    debug!("evaluating {key:?}: {rewritten}");

    let ast = match engine.compile(&rewritten) {
        Ok(ast) => ast,
        Err(err) => {
            let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
            rc.graph.remove_cell(key, false);
            drop(rc);
            let value = Value::Error(ErrorValue::eval("Syntax", err.to_string()));
            return finish(shared, key, value, warnings);
        }
    };

    // Functions defined by the sheet script are visible to every cell.
    let ast = {
        let sheets = shared.sheets.lock().expect("sheets lock poisoned");
        match sheets.get(key.sheet as usize).and_then(|s| s.fn_lib.as_ref()) {
            Some(lib) => lib.merge(&ast),
            None => ast,
        }
    };

    // Cells see a deep clone of the copyable globals and a shared view of
    // the uncopyable ones.
    let mut scope = Scope::new();
    {
        let sheets = shared.sheets.lock().expect("sheets lock poisoned");
        if let Some(sheet) = sheets.get(key.sheet as usize) {
            for (name, value) in &sheet.copyable {
                let cloned = deep_clone_dynamic(value).unwrap_or_else(|_| value.clone());
                scope.push_dynamic(name.as_str(), cloned);
            }
            for (name, value) in &sheet.uncopyable {
                scope.push_dynamic(name.as_str(), value.clone());
            }
        }
    }

    {
        let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
        // Forward edges are re-learned during execution; reverse edges stay
        // so dependents keep knowing about this cell.
        rc.graph.remove_cell(key, false);
        rc.tracker.push(key);
    }
    shared.evals.fetch_add(1, Ordering::Relaxed);

    let outcome = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast);

    {
        let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
        rc.tracker.pop();
    }

    match outcome {
        Ok(result) => {
            let mut value = dynamic_to_value(result);
            if let Value::Spill(ref mut produced) = value {
                produced.top_left = key.coord();
                if let Err(detail) = spill::expand(shared, key, produced) {
                    value = Value::Error(ErrorValue::spill_conflict(detail));
                }
            }
            finish(shared, key, value, warnings)
        }
        Err(err) => {
            if let Some(payload) = extract_error_payload(&err) {
                if payload.kind == ErrorKind::Cancelled {
                    // No partial value exposure: the cell stays dirty and
                    // keeps no cache entry; edges learned so far remain.
                    let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
                    rc.cache.drop_entry(key);
                    rc.graph.mark_dirty(key);
                    return Value::Error(payload);
                }
                return finish(shared, key, Value::Error(payload), warnings);
            }
            let (class, detail) = classify_error(&err);
            finish(
                shared,
                key,
                Value::Error(ErrorValue::eval(class, detail)),
                warnings,
            )
        }
    }
}

/// Install `value` in the cache (clearing dirty), attach warnings to the
/// cell's attribute bag, and hand back an independent copy.
fn finish(shared: &Shared, key: CellKey, value: Value, mut warnings: Vec<String>) -> Value {
    if !value.is_copyable() {
        warnings.push(format!(
            "value of type {} is not deep-copyable; it is shared by reference",
            value.type_name()
        ));
    }
    let result = value.deep_clone();
    {
        let mut rc = shared.recalc.lock().expect("recalc lock poisoned");
        let Recalc { graph, cache, .. } = &mut *rc;
        cache.put(key, value, graph);
    }
    shared.set_warnings(key, warnings);
    result
}

/// Pull a typed error value (cycle, cancellation, ref syntax) out of a rhai
/// error, unwrapping function-call frames.
pub(crate) fn extract_error_payload(err: &EvalAltResult) -> Option<ErrorValue> {
    match err {
        EvalAltResult::ErrorRuntime(token, _) | EvalAltResult::ErrorTerminated(token, _) => {
            token.clone().try_cast::<ErrorValue>()
        }
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => extract_error_payload(inner),
        _ => None,
    }
}

/// Map a rhai error onto an `EvalError` class plus detail text.
pub(crate) fn classify_error(err: &EvalAltResult) -> (String, String) {
    let class = match err {
        EvalAltResult::ErrorParsing(..) => "Syntax",
        EvalAltResult::ErrorVariableNotFound(..) => "VariableNotFound",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorArithmetic(..) => "Arithmetic",
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => {
            "IndexOutOfBounds"
        }
        EvalAltResult::ErrorIndexingType(..)
        | EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..) => "Type",
        EvalAltResult::ErrorStackOverflow(..) => "StackOverflow",
        EvalAltResult::ErrorTooManyOperations(..) => "OperationLimit",
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => return classify_error(inner),
        _ => "Runtime",
    };
    (class.to_string(), err.to_string())
}
