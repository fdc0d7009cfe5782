//! Save/load round trips through the sectioned file format.

use std::path::PathBuf;

use cellscript_core::{CellKey, ExpressionMode, Shape, Workbook};

fn temp_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "cellscript_{}_{}_{}_{:?}.cgrid",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos(),
        std::thread::current().id(),
    ))
}

struct Cleanup(PathBuf);

impl Drop for Cleanup {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[test]
fn test_save_load_round_trip_recomputes_values() {
    let path = temp_path("roundtrip");
    let _cleanup = Cleanup(path.clone());

    let mut wb = Workbook::new(Shape::new(10, 10, 2)).unwrap();
    wb.rename_sheet(1, "Data").unwrap();
    wb.apply_script(0, "let factor = 3;").unwrap();
    wb.set_text(CellKey::new(0, 0, 0), ">1+1").unwrap();
    wb.set_text(CellKey::new(1, 0, 0), r#">C("A1") * G("factor")"#)
        .unwrap();
    wb.set_text(CellKey::new(0, 0, 1), "'literal with 'quote").unwrap();
    wb.set_attribute(CellKey::new(0, 0, 0), "bgcolor", "#00ff00")
        .unwrap();

    let warnings = wb.save_to(&path).unwrap();
    assert!(warnings.is_empty());
    assert!(!wb.is_modified());

    let reopened = Workbook::open(&path).unwrap();
    assert_eq!(reopened.shape(), Shape::new(10, 10, 2));
    assert_eq!(reopened.sheet_name(1).as_deref(), Some("Data"));
    assert_eq!(reopened.mode(), ExpressionMode::ReverseMixed);

    assert_eq!(reopened.get_value(CellKey::new(0, 0, 0)).as_int(), Some(2));
    assert_eq!(reopened.get_value(CellKey::new(1, 0, 0)).as_int(), Some(6));
    assert_eq!(
        reopened.get_value(CellKey::new(0, 0, 1)).as_str().as_deref(),
        Some("literal with 'quote")
    );
    assert_eq!(
        reopened
            .cell_meta(CellKey::new(0, 0, 0))
            .attributes
            .get("bgcolor")
            .map(String::as_str),
        Some("#00ff00")
    );
}

#[test]
fn test_saved_mode_round_trips() {
    let path = temp_path("mode");
    let _cleanup = Cleanup(path.clone());

    let mut wb = Workbook::new(Shape::new(5, 5, 1)).unwrap();
    wb.set_mode(ExpressionMode::PureSpreadsheet);
    wb.set_text(CellKey::new(0, 0, 0), "=2+3").unwrap();
    wb.save_to(&path).unwrap();

    let reopened = Workbook::open(&path).unwrap();
    assert_eq!(reopened.mode(), ExpressionMode::PureSpreadsheet);
    assert_eq!(reopened.get_value(CellKey::new(0, 0, 0)).as_int(), Some(5));
}

#[test]
fn test_safe_mode_suppresses_evaluation() {
    let path = temp_path("safe");
    let _cleanup = Cleanup(path.clone());

    let mut wb = Workbook::new(Shape::new(5, 5, 1)).unwrap();
    wb.apply_script(0, "let x = 1;").unwrap();
    wb.set_text(CellKey::new(0, 0, 0), ">1+1").unwrap();
    wb.save_to(&path).unwrap();

    let safe = Workbook::open_safe(&path).unwrap();
    assert!(safe.safe_mode());
    assert_eq!(
        safe.get_value(CellKey::new(0, 0, 0)).as_str().as_deref(),
        Some(">1+1")
    );
    assert_eq!(safe.eval_count(), 0);
}

#[test]
fn test_save_warns_about_unsaved_drafts() {
    let path = temp_path("draft");
    let _cleanup = Cleanup(path.clone());

    let mut wb = Workbook::new(Shape::new(5, 5, 1)).unwrap();
    wb.apply_script(0, "let x = 1;").unwrap();
    wb.set_draft(0, Some("let x = 999;".to_string())).unwrap();

    let warnings = wb.save_to(&path).unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("draft"));

    // Drafts are never persisted.
    let reopened = Workbook::open(&path).unwrap();
    assert_eq!(reopened.draft(0).unwrap(), None);
    assert_eq!(reopened.script(0).unwrap(), "let x = 1;");
}

#[test]
fn test_open_missing_file_is_an_io_error() {
    let result = Workbook::open("/nonexistent/cellscript/workbook.cgrid");
    assert!(result.is_err());
}

#[test]
fn test_sheet_scripts_reapply_on_open() {
    let path = temp_path("scripts");
    let _cleanup = Cleanup(path.clone());

    let mut wb = Workbook::new(Shape::new(5, 5, 1)).unwrap();
    wb.apply_script(0, "let greeting = \"hi\";\nfn triple(x) { x * 3 }")
        .unwrap();
    wb.set_text(CellKey::new(0, 0, 0), ">triple(4)").unwrap();
    wb.set_text(CellKey::new(1, 0, 0), r#">G("greeting")"#).unwrap();
    wb.save_to(&path).unwrap();

    let reopened = Workbook::open(&path).unwrap();
    assert_eq!(reopened.get_value(CellKey::new(0, 0, 0)).as_int(), Some(12));
    assert_eq!(
        reopened.get_value(CellKey::new(1, 0, 0)).as_str().as_deref(),
        Some("hi")
    );
}
