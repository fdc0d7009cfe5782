//! Parser for the sectioned workbook file format.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use cellscript_engine::engine::{CellKey, ExpressionMode};

use crate::error::{CoreError, Result};
use crate::workbook::Shape;

/// Everything the core reads out of a workbook file.
#[derive(Debug)]
pub(crate) struct LoadedWorkbook {
    pub shape: Shape,
    pub sheet_names: Vec<String>,
    pub cells: Vec<(CellKey, String)>,
    pub attributes: Vec<(CellKey, String, String)>,
    pub sheet_scripts: Vec<(usize, String)>,
    pub mode: ExpressionMode,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Shape,
    SheetNames,
    Grid,
    Attributes,
    SheetScripts,
    ParserSettings,
}

fn parse_err(line: usize, message: impl Into<String>) -> CoreError {
    CoreError::Parse {
        line,
        message: message.into(),
    }
}

fn script_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\(sheet_script:(.+)\)\s+([0-9]+)$")
            .expect("sheet script header regex must compile")
    })
}

pub(crate) fn parse_workbook(path: &Path) -> Result<LoadedWorkbook> {
    let content = fs::read_to_string(path)?;
    parse_workbook_content(&content)
}

pub(crate) fn parse_workbook_content(content: &str) -> Result<LoadedWorkbook> {
    let mut section = Section::None;
    let mut shape: Option<Shape> = None;
    let mut sheet_names: Vec<String> = Vec::new();
    let mut cells: Vec<(CellKey, String)> = Vec::new();
    let mut attributes: Vec<(CellKey, String, String)> = Vec::new();
    let mut sheet_scripts: Vec<(usize, String)> = Vec::new();
    let mut mode = ExpressionMode::default();

    // While a sheet-script block is open, lines are consumed verbatim:
    // (sheet index, remaining line count, collected lines).
    let mut pending_script: Option<(usize, usize, Vec<String>)> = None;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;

        if let Some((sheet, remaining, mut lines)) = pending_script.take() {
            lines.push(line.to_string());
            if remaining > 1 {
                pending_script = Some((sheet, remaining - 1, lines));
            } else {
                sheet_scripts.push((sheet, lines.join("\n")));
            }
            continue;
        }

        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with('[') {
            section = match trimmed {
                "[shape]" => Section::Shape,
                "[sheet_names]" => Section::SheetNames,
                "[grid]" => Section::Grid,
                "[attributes]" => Section::Attributes,
                "[sheet_scripts]" => Section::SheetScripts,
                "[parser_settings]" => Section::ParserSettings,
                other => {
                    return Err(parse_err(line_no, format!("unknown section {}", other)))
                }
            };
            continue;
        }

        match section {
            Section::None => {
                return Err(parse_err(line_no, "content before the first section header"))
            }
            Section::Shape => {
                let dims: Vec<u32> = trimmed
                    .split_whitespace()
                    .map(|t| t.parse::<u32>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| parse_err(line_no, "expected three integers: rows cols sheets"))?;
                if dims.len() != 3 || dims.iter().any(|d| *d == 0) {
                    return Err(parse_err(
                        line_no,
                        "expected three positive integers: rows cols sheets",
                    ));
                }
                shape = Some(Shape::new(dims[0], dims[1], dims[2]));
            }
            Section::SheetNames => {
                let (index_str, raw_name) = trimmed
                    .split_once(' ')
                    .ok_or_else(|| parse_err(line_no, "expected 'index name'"))?;
                let parsed_index: usize = index_str
                    .parse()
                    .map_err(|_| parse_err(line_no, "sheet index must be an integer"))?;
                if parsed_index != sheet_names.len() {
                    return Err(parse_err(line_no, "sheet names out of order"));
                }
                let name = sanitize_sheet_name(raw_name, &sheet_names, parsed_index);
                sheet_names.push(name);
            }
            Section::Grid => {
                let shape = shape
                    .ok_or_else(|| parse_err(line_no, "[grid] before [shape]"))?;
                let (key, rest) = parse_key_prefix(trimmed, 3, line_no)?;
                let text = unquote(rest.trim_start(), line_no)?;
                if shape.contains(key) && !text.is_empty() {
                    cells.push((key, text));
                }
            }
            Section::Attributes => {
                let shape = shape
                    .ok_or_else(|| parse_err(line_no, "[attributes] before [shape]"))?;
                let (key, rest) = parse_key_prefix(trimmed, 3, line_no)?;
                let rest = rest.trim_start();
                let (attr_name, quoted) = rest
                    .split_once(' ')
                    .ok_or_else(|| parse_err(line_no, "expected 'row col sheet key value'"))?;
                let value = unquote(quoted.trim_start(), line_no)?;
                if shape.contains(key) {
                    attributes.push((key, attr_name.to_string(), value));
                }
            }
            Section::SheetScripts => {
                let caps = script_header_re().captures(trimmed).ok_or_else(|| {
                    parse_err(line_no, "malformed sheet_script header")
                })?;
                let identifier = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let count: usize = caps[2]
                    .parse()
                    .map_err(|_| parse_err(line_no, "bad sheet_script line count"))?;

                if identifier.chars().all(|c| c.is_ascii_digit()) {
                    return Err(parse_err(
                        line_no,
                        "numeric sheet_script identifiers are not supported; \
                         use named headers like (sheet_script:'Sheet 0') N",
                    ));
                }
                let name = unquote(identifier, line_no).map_err(|_| {
                    parse_err(line_no, "sheet_script identifier must be single-quoted")
                })?;
                let sheet = sheet_names
                    .iter()
                    .position(|n| *n == name)
                    .ok_or_else(|| {
                        parse_err(
                            line_no,
                            format!(
                                "unknown sheet name in sheet_script header: '{}'; \
                                 [sheet_names] must list it first",
                                name
                            ),
                        )
                    })?;
                if count > 0 {
                    pending_script = Some((sheet, count, Vec::new()));
                } else {
                    sheet_scripts.push((sheet, String::new()));
                }
            }
            Section::ParserSettings => {
                let (name, value) = trimmed
                    .split_once('=')
                    .ok_or_else(|| parse_err(line_no, "expected 'key = value'"))?;
                match name.trim() {
                    "mode" => {
                        mode = value
                            .trim()
                            .parse::<ExpressionMode>()
                            .map_err(|e| parse_err(line_no, e))?;
                    }
                    other => {
                        return Err(parse_err(
                            line_no,
                            format!("unknown parser_settings key: {}", other),
                        ))
                    }
                }
            }
        }
    }

    if pending_script.is_some() {
        return Err(parse_err(
            content.lines().count(),
            "unexpected end of file inside a sheet_script block",
        ));
    }

    let shape = shape.ok_or_else(|| parse_err(0, "missing [shape] section"))?;

    // Pad or trim sheet names to the declared sheet count.
    sheet_names.truncate(shape.sheets as usize);
    for index in sheet_names.len()..shape.sheets as usize {
        let name = sanitize_sheet_name("", &sheet_names, index);
        sheet_names.push(name);
    }

    Ok(LoadedWorkbook {
        shape,
        sheet_names,
        cells,
        attributes,
        sheet_scripts,
        mode,
    })
}

/// Parse `count` leading integers of a record line into a cell key.
fn parse_key_prefix(line: &str, count: usize, line_no: usize) -> Result<(CellKey, &str)> {
    let mut rest = line;
    let mut numbers = [0u32; 3];
    for slot in numbers.iter_mut().take(count) {
        rest = rest.trim_start();
        let end = rest
            .find(char::is_whitespace)
            .ok_or_else(|| parse_err(line_no, "truncated record"))?;
        *slot = rest[..end]
            .parse()
            .map_err(|_| parse_err(line_no, "expected an integer coordinate"))?;
        rest = &rest[end..];
    }
    Ok((CellKey::new(numbers[0], numbers[1], numbers[2]), rest))
}

/// Unescape a single-quoted text field: `''` is a literal quote, `\\` a
/// backslash, `\n` a newline.
fn unquote(quoted: &str, line_no: usize) -> Result<String> {
    let mut chars = quoted.chars().peekable();
    if chars.next() != Some('\'') {
        return Err(parse_err(line_no, "expected a single-quoted field"));
    }
    let mut out = String::new();
    let mut closed = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    closed = true;
                    break;
                }
            }
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    if !closed {
        return Err(parse_err(line_no, "unterminated quoted field"));
    }
    if chars.next().is_some() {
        return Err(parse_err(line_no, "trailing content after quoted field"));
    }
    Ok(out)
}

/// Make a loaded sheet name valid and unique, deriving fallbacks from the
/// sheet index.
pub(crate) fn sanitize_sheet_name(raw: &str, existing: &[String], index: usize) -> String {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim().to_string();
    let base = if cleaned.is_empty() {
        format!("Sheet {}", index)
    } else {
        cleaned
    };
    if !existing.iter().any(|n| *n == base) {
        return base;
    }
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{}_{}", base, suffix);
        if !existing.iter().any(|n| *n == candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
