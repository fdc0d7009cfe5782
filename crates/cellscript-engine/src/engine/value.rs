//! The universe of cell values.
//!
//! A cell evaluation produces exactly one [`Value`]:
//!
//! - [`Value::Empty`] - the unset-cell sentinel; behaves as `0` in numeric
//!   context and `""` in string context
//! - [`Value::Scalar`] - any host scripting value that survives a deep clone
//! - [`Value::Range`] - a rectangular 2D region, row-major flat list + width
//! - [`Value::Spill`] - a range whose producer wants to fan out over
//!   neighbouring cells
//! - [`Value::Help`] - result of `help(...)` introspection
//! - [`Value::Error`] - a materialized computation failure
//! - [`Value::Opaque`] - a value that failed the deep-clone probe; passed by
//!   shared reference with a warning recorded at store time

use std::fmt;

use rhai::{Array, Dynamic, FnPtr, Map};

use super::coord::Coord;

/// Marker type for the empty-cell sentinel inside the scripting engine.
///
/// Arithmetic with `Empty` is identity/zero and comparison with itself is
/// true; the operator registrations live in the workbook layer where the
/// engine is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmptyValue;

/// A rectangular region of cell values, row-major.
#[derive(Clone, Debug)]
pub struct RangeValue {
    pub cells: Vec<Dynamic>,
    pub width: u32,
    pub top_left: Coord,
}

impl RangeValue {
    pub fn new(cells: Vec<Dynamic>, width: u32, top_left: Coord) -> RangeValue {
        RangeValue {
            cells,
            width,
            top_left,
        }
    }

    pub fn height(&self) -> u32 {
        if self.width == 0 {
            return 0;
        }
        ((self.cells.len() as u64 + self.width as u64 - 1) / self.width as u64) as u32
    }

    /// One row as a list of length `width`, each element deep-cloned.
    pub fn row(&self, index: usize) -> Option<Array> {
        let width = self.width as usize;
        if width == 0 {
            return None;
        }
        let start = index.checked_mul(width)?;
        if start >= self.cells.len() {
            return None;
        }
        let end = (start + width).min(self.cells.len());
        Some(
            self.cells[start..end]
                .iter()
                .map(|d| deep_clone_dynamic(d).unwrap_or_else(|_| d.clone()))
                .collect(),
        )
    }

    /// The non-empty elements in row-major order.
    pub fn flatten(&self) -> Array {
        self.cells
            .iter()
            .filter(|d| !d.is::<EmptyValue>() && !d.is_unit())
            .map(|d| deep_clone_dynamic(d).unwrap_or_else(|_| d.clone()))
            .collect()
    }

    fn deep_clone(&self) -> RangeValue {
        RangeValue {
            cells: self
                .cells
                .iter()
                .map(|d| deep_clone_dynamic(d).unwrap_or_else(|_| d.clone()))
                .collect(),
            width: self.width,
            top_left: self.top_left,
        }
    }
}

/// A range-producing value that expands over its neighbourhood.
#[derive(Clone, Debug)]
pub struct SpillValue {
    pub cells: Vec<Dynamic>,
    pub width: u32,
    pub height: u32,
    pub top_left: Coord,
}

impl SpillValue {
    pub fn new(cells: Vec<Dynamic>, width: u32, height: u32) -> SpillValue {
        SpillValue {
            cells,
            width,
            height,
            top_left: Coord::new(0, 0),
        }
    }

    /// Derive the height from the element count and width.
    pub fn with_derived_height(cells: Vec<Dynamic>, width: u32) -> SpillValue {
        let height = if width == 0 {
            0
        } else {
            ((cells.len() as u64 + width as u64 - 1) / width as u64) as u32
        };
        SpillValue::new(cells, width, height)
    }

    /// The element at offset `(dr, dc)` from the producer, deep-cloned.
    pub fn slot(&self, dr: u32, dc: u32) -> Option<Dynamic> {
        if dr >= self.height || dc >= self.width {
            return None;
        }
        let index = dr as usize * self.width as usize + dc as usize;
        self.cells
            .get(index)
            .map(|d| deep_clone_dynamic(d).unwrap_or_else(|_| d.clone()))
    }

    fn deep_clone(&self) -> SpillValue {
        SpillValue {
            cells: self
                .cells
                .iter()
                .map(|d| deep_clone_dynamic(d).unwrap_or_else(|_| d.clone()))
                .collect(),
            width: self.width,
            height: self.height,
            top_left: self.top_left,
        }
    }
}

/// Result of `help(...)` introspection.
#[derive(Clone, Debug)]
pub struct HelpValue {
    pub query: String,
    pub body: String,
}

/// Canonical error categories surfaced as cell values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    RefSyntax,
    CircularRef,
    SpillConflict,
    Eval(String),
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RefSyntax => write!(f, "RefSyntaxError"),
            ErrorKind::CircularRef => write!(f, "CircularRefError"),
            ErrorKind::SpillConflict => write!(f, "SpillConflictError"),
            ErrorKind::Eval(class) => write!(f, "EvalError({})", class),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A computation failure materialized as a value. Downstream cells observe
/// it like any other value; it never propagates as a host exception across
/// the evaluator boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorValue {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ErrorValue {
    pub fn ref_syntax(detail: impl Into<String>) -> ErrorValue {
        ErrorValue {
            kind: ErrorKind::RefSyntax,
            detail: detail.into(),
        }
    }

    /// Cycle error carrying the discovered path, first re-encounter back to
    /// itself, as cell labels.
    pub fn circular(path: &[String]) -> ErrorValue {
        let detail = if path.is_empty() {
            "Circular reference detected".to_string()
        } else {
            format!("Circular reference: {}", path.join(" -> "))
        };
        ErrorValue {
            kind: ErrorKind::CircularRef,
            detail,
        }
    }

    pub fn spill_conflict(detail: impl Into<String>) -> ErrorValue {
        ErrorValue {
            kind: ErrorKind::SpillConflict,
            detail: detail.into(),
        }
    }

    pub fn eval(class: impl Into<String>, detail: impl Into<String>) -> ErrorValue {
        ErrorValue {
            kind: ErrorKind::Eval(class.into()),
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> ErrorValue {
        ErrorValue {
            kind: ErrorKind::Cancelled,
            detail: "evaluation interrupted".to_string(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// One evaluated cell result.
#[derive(Clone, Debug)]
pub enum Value {
    Empty,
    Scalar(Dynamic),
    Range(RangeValue),
    Spill(SpillValue),
    Help(HelpValue),
    Error(ErrorValue),
    Opaque(Dynamic),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Scalar(d) => d.as_int().ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Scalar(d) => d.as_float().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Scalar(d) => d.as_bool().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            Value::Scalar(d) if d.is_string() => d.clone().into_string().ok(),
            _ => None,
        }
    }

    /// Name of the value's type, for tooltips.
    pub fn type_name(&self) -> String {
        match self {
            Value::Empty => "Empty".to_string(),
            Value::Scalar(d) => d.type_name().to_string(),
            Value::Range(_) => "Range".to_string(),
            Value::Spill(_) => "SpillOutput".to_string(),
            Value::Help(_) => "HelpText".to_string(),
            Value::Error(_) => "ErrorValue".to_string(),
            Value::Opaque(d) => d.type_name().to_string(),
        }
    }

    /// An independent copy of this value. `Empty` is a singleton and clones
    /// to itself; `Opaque` values stay shared. Mutating the returned value
    /// never affects the original.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Empty => Value::Empty,
            Value::Scalar(d) => {
                Value::Scalar(deep_clone_dynamic(d).unwrap_or_else(|_| d.clone()))
            }
            Value::Range(r) => Value::Range(r.deep_clone()),
            Value::Spill(s) => Value::Spill(s.deep_clone()),
            Value::Help(h) => Value::Help(h.clone()),
            Value::Error(e) => Value::Error(e.clone()),
            Value::Opaque(d) => Value::Opaque(d.clone()),
        }
    }

    /// True if every part of this value survives the deep-clone probe.
    pub fn is_copyable(&self) -> bool {
        match self {
            Value::Empty | Value::Help(_) | Value::Error(_) => true,
            Value::Scalar(d) => deep_clone_dynamic(d).is_ok(),
            Value::Range(r) => r.cells.iter().all(|d| deep_clone_dynamic(d).is_ok()),
            Value::Spill(s) => s.cells.iter().all(|d| deep_clone_dynamic(d).is_ok()),
            Value::Opaque(_) => false,
        }
    }
}

/// Recursively clone a host value so the copy shares no mutable state with
/// the original. This is the canonical clone path used by the deep-clone
/// probe: shared (reference-counted) values and function pointers fail.
pub fn deep_clone_dynamic(value: &Dynamic) -> Result<Dynamic, ()> {
    if value.is_shared() || value.is::<FnPtr>() {
        return Err(());
    }
    if value.is_array() {
        let source = value.clone().into_array().map_err(|_| ())?;
        let mut cloned = Array::with_capacity(source.len());
        for item in &source {
            cloned.push(deep_clone_dynamic(item)?);
        }
        return Ok(Dynamic::from_array(cloned));
    }
    if value.is_map() {
        let source: Map = value.clone().try_cast::<Map>().ok_or(())?;
        let mut cloned = Map::new();
        for (name, item) in &source {
            cloned.insert(name.clone(), deep_clone_dynamic(item)?);
        }
        return Ok(Dynamic::from_map(cloned));
    }
    if value.is_unit()
        || value.is_int()
        || value.is_float()
        || value.is_bool()
        || value.is_char()
        || value.is_string()
        || value.is::<EmptyValue>()
        || value.is::<HelpValue>()
        || value.is::<ErrorValue>()
    {
        return Ok(value.clone());
    }
    if let Some(range) = value.clone().try_cast::<RangeValue>() {
        return Ok(Dynamic::from(range.deep_clone()));
    }
    if let Some(spill) = value.clone().try_cast::<SpillValue>() {
        return Ok(Dynamic::from(spill.deep_clone()));
    }
    // Unknown custom type: no structural clone available.
    Err(())
}

/// Classify a host value produced by evaluation into the value universe.
pub fn dynamic_to_value(value: Dynamic) -> Value {
    if value.is::<EmptyValue>() {
        return Value::Empty;
    }
    if let Some(range) = value.clone().try_cast::<RangeValue>() {
        return Value::Range(range);
    }
    if let Some(spill) = value.clone().try_cast::<SpillValue>() {
        return Value::Spill(spill);
    }
    if let Some(help) = value.clone().try_cast::<HelpValue>() {
        return Value::Help(help);
    }
    if let Some(error) = value.clone().try_cast::<ErrorValue>() {
        return Value::Error(error);
    }
    if deep_clone_dynamic(&value).is_ok() {
        Value::Scalar(value)
    } else {
        Value::Opaque(value)
    }
}

/// Wrap a value for handing into the scripting engine.
pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Empty => Dynamic::from(EmptyValue),
        Value::Scalar(d) => d.clone(),
        Value::Range(r) => Dynamic::from(r.clone()),
        Value::Spill(s) => Dynamic::from(s.clone()),
        Value::Help(h) => Dynamic::from(h.clone()),
        Value::Error(e) => Dynamic::from(e.clone()),
        Value::Opaque(d) => d.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_deep_clone_is_empty() {
        assert!(Value::Empty.deep_clone().is_empty());
    }

    #[test]
    fn test_deep_clone_isolates_arrays() {
        let inner: Array = vec![Dynamic::from(1i64), Dynamic::from(2i64)];
        let original = Dynamic::from_array(vec![Dynamic::from_array(inner)]);
        let cloned = deep_clone_dynamic(&original).unwrap();

        let mut rows = cloned.into_array().unwrap();
        let mut first = rows.remove(0).into_array().unwrap();
        first[0] = Dynamic::from(99i64);

        let untouched = original.into_array().unwrap()[0]
            .clone()
            .into_array()
            .unwrap();
        assert_eq!(untouched[0].as_int().unwrap(), 1);
    }

    #[test]
    fn test_shared_values_fail_the_probe() {
        let shared = Dynamic::from(7i64).into_shared();
        assert!(deep_clone_dynamic(&shared).is_err());
        assert!(matches!(dynamic_to_value(shared), Value::Opaque(_)));
    }

    #[test]
    fn test_range_flatten_skips_empties() {
        let cells = vec![
            Dynamic::from(1i64),
            Dynamic::from(EmptyValue),
            Dynamic::from(3i64),
        ];
        let range = RangeValue::new(cells, 3, Coord::new(0, 0));
        let flat = range.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].as_int().unwrap(), 1);
        assert_eq!(flat[1].as_int().unwrap(), 3);
    }

    #[test]
    fn test_spill_slot_addressing() {
        let cells = (1i64..=4).map(Dynamic::from).collect();
        let spill = SpillValue::new(cells, 2, 2);
        assert_eq!(spill.slot(0, 1).unwrap().as_int().unwrap(), 2);
        assert_eq!(spill.slot(1, 0).unwrap().as_int().unwrap(), 3);
        assert!(spill.slot(2, 0).is_none());
    }

    #[test]
    fn test_spill_derived_height_rounds_up() {
        let cells = (1i64..=5).map(Dynamic::from).collect();
        let spill = SpillValue::with_derived_height(cells, 2);
        assert_eq!(spill.height, 3);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorValue::cancelled().to_string(), "Cancelled");
        assert_eq!(
            ErrorValue::eval("Arithmetic", "div by zero").to_string(),
            "EvalError(Arithmetic)"
        );
        assert_eq!(
            ErrorValue::circular(&["A1".into(), "A2".into(), "A1".into()]).detail,
            "Circular reference: A1 -> A2 -> A1"
        );
    }
}
