//! Display and tooltip formatting for cell values.

use rhai::Dynamic;

use super::value::{EmptyValue, Value};

/// Short, single-cell display string for the grid.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Empty => String::new(),
        Value::Scalar(d) | Value::Opaque(d) => display_dynamic(d),
        Value::Range(r) => {
            let parts: Vec<String> = r.cells.iter().map(display_dynamic).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Spill(s) => s
            .cells
            .iter()
            .find(|d| !d.is::<EmptyValue>() && !d.is_unit())
            .map(display_dynamic)
            .unwrap_or_default(),
        Value::Help(h) => h.query.clone(),
        Value::Error(e) => e.kind.to_string(),
    }
}

/// Longer hover text: error details, help bodies, otherwise the type name.
pub fn tooltip_value(value: &Value) -> String {
    match value {
        Value::Error(e) => e.detail.clone(),
        Value::Help(h) => h.body.clone(),
        other => other.type_name(),
    }
}

/// Format a host value for display.
pub fn display_dynamic(value: &Dynamic) -> String {
    if value.is_unit() || value.is::<EmptyValue>() {
        String::new()
    } else if let Ok(n) = value.as_float() {
        format_number(n)
    } else if let Ok(n) = value.as_int() {
        n.to_string()
    } else if let Ok(b) = value.as_bool() {
        if b { "TRUE" } else { "FALSE" }.to_string()
    } else if let Ok(s) = value.clone().into_string() {
        s
    } else {
        value.to_string()
    }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e10 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}
