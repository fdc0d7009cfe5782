//! Workbook API behaviour: caching, script application, modes, metadata,
//! cancellation.

use cellscript_core::{CellKey, ErrorKind, ExpressionMode, Shape, Value, Workbook};

fn workbook() -> Workbook {
    Workbook::new(Shape::new(20, 20, 2)).unwrap()
}

fn a1() -> CellKey {
    CellKey::new(0, 0, 0)
}

fn a2() -> CellKey {
    CellKey::new(1, 0, 0)
}

#[test]
fn test_repeated_reads_evaluate_once() {
    let mut wb = workbook();
    wb.set_text(a1(), ">2*3").unwrap();

    let before = wb.eval_count();
    assert_eq!(wb.get_value(a1()).as_int(), Some(6));
    assert_eq!(wb.eval_count(), before + 1);

    assert_eq!(wb.get_value(a1()).as_int(), Some(6));
    assert_eq!(wb.get_value(a1()).as_int(), Some(6));
    assert_eq!(wb.eval_count(), before + 1);
}

#[test]
fn test_returned_values_are_isolated_from_the_cache() {
    let mut wb = workbook();
    wb.set_text(a1(), ">[1, 2, 3]").unwrap();

    if let Value::Scalar(d) = wb.get_value(a1()) {
        let mut arr = d.into_array().unwrap();
        arr[0] = rhai::Dynamic::from(99i64);
    } else {
        panic!("expected scalar array");
    }

    match wb.get_value(a1()) {
        Value::Scalar(d) => {
            assert_eq!(d.into_array().unwrap()[0].as_int().unwrap(), 1);
        }
        other => panic!("expected scalar array, got {:?}", other),
    }
}

#[test]
fn test_unset_cell_reads_empty_and_unsetting_dirties_dependents() {
    let mut wb = workbook();
    assert!(wb.get_value(a1()).is_empty());

    wb.set_text(a1(), ">4").unwrap();
    wb.set_text(a2(), r#">C("A1") * 2"#).unwrap();
    assert_eq!(wb.get_value(a2()).as_int(), Some(8));

    wb.set_text(a1(), "").unwrap();
    assert!(wb.get_text(a1()).is_none());
    assert_eq!(wb.get_value(a2()).as_int(), Some(0));
}

#[test]
fn test_recalc_all_reevaluates_every_cell_with_text() {
    let mut wb = workbook();
    wb.set_text(a1(), ">1").unwrap();
    wb.set_text(a2(), r#">C("A1") + 1"#).unwrap();
    wb.set_text(CellKey::new(0, 0, 1), ">10").unwrap();

    assert_eq!(wb.get_value(a2()).as_int(), Some(2));
    let evaluated = wb.recalc_all();
    assert_eq!(evaluated, 3);
    assert!(wb.dirty_cells().is_empty());
}

#[test]
fn test_recalculate_dirty_only_touches_dirty_cells() {
    let mut wb = workbook();
    wb.set_text(a1(), ">1").unwrap();
    wb.set_text(a2(), ">2").unwrap();
    wb.recalc_all();

    wb.set_text(a1(), ">5").unwrap();
    let before = wb.eval_count();
    let recalculated = wb.recalculate_dirty();
    assert_eq!(recalculated, 1);
    assert_eq!(wb.eval_count(), before + 1);
}

#[test]
fn test_apply_script_captures_print_output() {
    let mut wb = workbook();
    let outcome = wb.apply_script(0, "print(\"hello from the sheet\");").unwrap();
    assert!(outcome.error.is_none());
    assert!(outcome.output.contains("hello from the sheet"));
}

#[test]
fn test_apply_script_failure_keeps_previous_globals() {
    let mut wb = workbook();
    wb.apply_script(0, "let answer = 41;").unwrap();

    let outcome = wb.apply_script(0, "let answer = nonexistent_fn();").unwrap();
    assert!(outcome.error.is_some());

    wb.set_text(a1(), r#">G("answer")"#).unwrap();
    assert_eq!(wb.get_value(a1()).as_int(), Some(41));
}

#[test]
fn test_apply_script_invalidates_sheet_cells() {
    let mut wb = workbook();
    wb.apply_script(0, "let factor = 2;").unwrap();
    wb.set_text(a1(), r#">G("factor") * 10"#).unwrap();
    assert_eq!(wb.get_value(a1()).as_int(), Some(20));

    wb.apply_script(0, "let factor = 3;").unwrap();
    assert_eq!(wb.get_value(a1()).as_int(), Some(30));
}

#[test]
fn test_sheet_script_functions_are_callable_from_cells() {
    let mut wb = workbook();
    wb.apply_script(0, "fn double(x) { x * 2 }").unwrap();
    wb.set_text(a1(), ">double(21)").unwrap();
    assert_eq!(wb.get_value(a1()).as_int(), Some(42));
}

#[test]
fn test_apply_script_warns_on_label_like_and_uncopyable_globals() {
    let mut wb = workbook();
    let outcome = wb
        .apply_script(0, "let A1 = 5;\nlet f = |x| x + 1;")
        .unwrap();
    assert!(outcome.error.is_none());
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("A1") && w.contains("cell reference")));
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("f") && w.contains("not deep-copyable")));
}

#[test]
fn test_bare_sheet_globals_resolve_in_cell_scope() {
    let mut wb = workbook();
    wb.apply_script(0, "let base = 7;").unwrap();
    wb.set_text(a1(), ">base + 1").unwrap();
    assert_eq!(wb.get_value(a1()).as_int(), Some(8));
}

#[test]
fn test_drafts_are_separate_and_cleared_on_apply() {
    let mut wb = workbook();
    wb.set_draft(0, Some("let a = 1;".to_string())).unwrap();
    assert_eq!(wb.draft(0).unwrap().as_deref(), Some("let a = 1;"));
    assert_eq!(wb.script(0).unwrap(), "");

    wb.apply_script(0, "let a = 2;").unwrap();
    assert_eq!(wb.draft(0).unwrap(), None);
    assert_eq!(wb.script(0).unwrap(), "let a = 2;");
}

#[test]
fn test_set_mode_reclassifies_existing_text() {
    let mut wb = workbook();
    wb.set_text(a1(), "1+1").unwrap();
    assert_eq!(wb.get_value(a1()).as_str().as_deref(), Some("1+1"));

    wb.set_mode(ExpressionMode::PureScript);
    assert_eq!(wb.get_value(a1()).as_int(), Some(2));

    wb.set_mode(ExpressionMode::PureSpreadsheet);
    wb.set_text(a2(), "=1+2").unwrap();
    assert_eq!(wb.get_value(a2()).as_int(), Some(3));
}

#[test]
fn test_cell_meta_exposes_code_and_attributes_without_eval() {
    let mut wb = workbook();
    wb.set_text(a1(), ">1+1").unwrap();
    wb.set_attribute(a1(), "bgcolor", "#ff0000").unwrap();

    let before = wb.eval_count();
    let meta = wb.cell_meta(a1());
    assert_eq!(meta.code, ">1+1");
    assert_eq!(meta.attributes.get("bgcolor").map(String::as_str), Some("#ff0000"));
    assert_eq!(wb.eval_count(), before);

    // The CM accessor sees the same data from inside a cell.
    wb.set_text(a2(), r#">CM("A1").code"#).unwrap();
    assert_eq!(wb.get_value(a2()).as_str().as_deref(), Some(">1+1"));

    let a3 = CellKey::new(2, 0, 0);
    wb.set_text(a3, r#">CM("A1").attributes["bgcolor"]"#).unwrap();
    assert_eq!(wb.get_value(a3).as_str().as_deref(), Some("#ff0000"));
}

#[test]
fn test_cancellation_leaves_cell_dirty_then_recovers() {
    let mut wb = workbook();
    wb.set_text(a1(), r#">C("B1") + 2"#).unwrap();

    let handle = wb.interrupt_handle();
    handle.trip();
    let value = wb.get_value(a1());
    assert_eq!(value.error().unwrap().kind, ErrorKind::Cancelled);
    assert!(wb.dirty_cells().contains(&a1()));

    handle.clear();
    assert_eq!(wb.get_value(a1()).as_int(), Some(2));
}

#[test]
fn test_rename_sheet_validation() {
    let mut wb = workbook();
    assert!(wb.rename_sheet(0, "Data").is_ok());
    assert_eq!(wb.sheet_name(0).as_deref(), Some("Data"));
    assert_eq!(wb.sheet_index("Data"), Some(0));

    assert!(wb.rename_sheet(1, "Data").is_err());
    assert!(wb.rename_sheet(1, "").is_err());
    assert!(wb.rename_sheet(1, "  padded  ").is_err());
    assert!(wb.rename_sheet(1, "bad\x07name").is_err());
}

#[test]
fn test_warnings_attach_to_the_producing_cell() {
    let mut wb = workbook();
    // Capturing a variable in a closure turns it into a shared value, which
    // fails the deep-clone probe both at apply time and when a cell stores
    // it as its result.
    let outcome = wb
        .apply_script(0, "let shared_box = [1];\nlet grab = || shared_box;")
        .unwrap();
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("shared_box") && w.contains("not deep-copyable")));

    wb.set_text(a1(), r#">G("shared_box")"#).unwrap();
    let _ = wb.get_value(a1());
    let meta = wb.cell_meta(a1());
    assert!(
        meta.warnings.iter().any(|w| w.contains("not deep-copyable")),
        "opaque result should record a warning"
    );
}

#[test]
fn test_out_of_bounds_writes_are_rejected() {
    let mut wb = workbook();
    let outside = CellKey::new(100, 0, 0);
    assert!(wb.set_text(outside, ">1").is_err());
    assert!(wb.get_value(outside).error().is_some());
}
