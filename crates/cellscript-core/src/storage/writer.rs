//! Writer for the sectioned workbook file format.

use cellscript_engine::engine::{CellKey, ExpressionMode};

use crate::workbook::Shape;

/// Data gathered from a workbook for serialization. Cells and attributes
/// are expected pre-sorted for stable output.
pub(crate) struct SavePayload {
    pub shape: Shape,
    pub sheet_names: Vec<String>,
    pub cells: Vec<(CellKey, String)>,
    pub attributes: Vec<(CellKey, String, String)>,
    pub sheet_scripts: Vec<(String, String)>,
    pub mode: ExpressionMode,
}

pub(crate) fn render_workbook(payload: &SavePayload) -> String {
    let mut out = String::new();

    out.push_str("[shape]\n");
    out.push_str(&format!(
        "{} {} {}\n",
        payload.shape.rows, payload.shape.cols, payload.shape.sheets
    ));

    out.push_str("[sheet_names]\n");
    for (index, name) in payload.sheet_names.iter().enumerate() {
        out.push_str(&format!("{} {}\n", index, name));
    }

    out.push_str("[grid]\n");
    for (key, text) in &payload.cells {
        out.push_str(&format!(
            "{} {} {} {}\n",
            key.row,
            key.col,
            key.sheet,
            quote(text)
        ));
    }

    out.push_str("[attributes]\n");
    for (key, name, value) in &payload.attributes {
        out.push_str(&format!(
            "{} {} {} {} {}\n",
            key.row,
            key.col,
            key.sheet,
            name,
            quote(value)
        ));
    }

    out.push_str("[sheet_scripts]\n");
    for (name, source) in &payload.sheet_scripts {
        let normalized = source.replace("\r\n", "\n");
        let lines: Vec<&str> = normalized.split('\n').collect();
        out.push_str(&format!("(sheet_script:{}) {}\n", quote(name), lines.len()));
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
    }

    out.push_str("[parser_settings]\n");
    out.push_str(&format!("mode = {}\n", payload.mode));

    out
}

/// Single-quote a text field, doubling quotes and escaping backslashes and
/// newlines.
fn quote(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\'', "''");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::reader::parse_workbook_content;

    fn payload() -> SavePayload {
        SavePayload {
            shape: Shape::new(10, 10, 2),
            sheet_names: vec!["Main".to_string(), "It's".to_string()],
            cells: vec![
                (CellKey::new(0, 0, 0), ">1+1".to_string()),
                (CellKey::new(1, 2, 1), "quote ' and \\ and\nnewline".to_string()),
            ],
            attributes: vec![(
                CellKey::new(0, 0, 0),
                "bgcolor".to_string(),
                "#ffffff".to_string(),
            )],
            sheet_scripts: vec![("Main".to_string(), "let a = 1;\nlet b = 2;".to_string())],
            mode: ExpressionMode::ReverseMixed,
        }
    }

    #[test]
    fn test_round_trip_through_reader() {
        let rendered = render_workbook(&payload());
        let loaded = parse_workbook_content(&rendered).unwrap();

        assert_eq!(loaded.shape, Shape::new(10, 10, 2));
        assert_eq!(loaded.sheet_names, vec!["Main", "It's"]);
        assert_eq!(loaded.cells.len(), 2);
        assert_eq!(loaded.cells[1].1, "quote ' and \\ and\nnewline");
        assert_eq!(loaded.sheet_scripts.len(), 1);
        assert_eq!(loaded.sheet_scripts[0].1, "let a = 1;\nlet b = 2;");
        assert_eq!(loaded.mode, ExpressionMode::ReverseMixed);
    }

    #[test]
    fn test_quote_escaping() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(quote("a\\b"), "'a\\\\b'");
        assert_eq!(quote("a\nb"), "'a\\nb'");
    }
}
