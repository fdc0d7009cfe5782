//! Reference rewriter: turn bare spreadsheet references into accessor calls.
//!
//! Before cell code reaches the scripting engine, references are rewritten:
//!
//! - `A1`            → `C("A1")`
//! - `A1:B5`         → `R("A1", "B5")`
//! - `"Other"!A1`    → `Sh("Other").C("A1")`
//! - `"Other"!A1:B2` → `Sh("Other").R("A1", "B2")`
//! - `"Other"!name`  → `Sh("Other").G("name")`
//!
//! The rewrite is lexically aware: tokens inside string, char and backtick
//! literals and inside comments are left alone, as are attribute accesses
//! (`foo.A1`) and call positions (`MAX1(x)`). A range is recognized only
//! when two labels are joined by an adjacent `:`; a label-like map key
//! (`#{A1: 5}`) is left alone.

use std::sync::OnceLock;

use regex::Regex;

/// True if `token` has the shape of a cell label (up to four letters, then a
/// 1-based row number).
pub fn is_cell_label(token: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{1,4}[1-9][0-9]*$").expect("cell label regex must compile")
    })
    .is_match(token)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite every spreadsheet reference in `code` into an accessor call.
pub fn rewrite_references(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(code.len() + 16);
    let mut i = 0usize;
    // Last significant character emitted; whitespace and comments are
    // transparent so `foo. /* c */ A1` still reads as attribute access.
    let mut prev: Option<char> = None;

    let push_span = |out: &mut String, chars: &[char], from: usize, to: usize| {
        out.extend(chars[from..to].iter());
    };

    while i < len {
        let c = chars[i];

        if c == '"' {
            let lit_end = scan_string(&chars, i);
            if let Some((rewritten, next)) = try_sheet_qualified(&chars, i, lit_end) {
                out.push_str(&rewritten);
                prev = Some(')');
                i = next;
                continue;
            }
            push_span(&mut out, &chars, i, lit_end);
            prev = Some('"');
            i = lit_end;
            continue;
        }

        if c == '\'' {
            let end = scan_char_literal(&chars, i);
            push_span(&mut out, &chars, i, end);
            prev = Some('\'');
            i = end;
            continue;
        }

        if c == '`' {
            let mut j = i + 1;
            while j < len && chars[j] != '`' {
                j += 1;
            }
            let end = (j + 1).min(len);
            push_span(&mut out, &chars, i, end);
            prev = Some('`');
            i = end;
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '/' {
            let mut j = i;
            while j < len && chars[j] != '\n' {
                j += 1;
            }
            push_span(&mut out, &chars, i, j);
            i = j;
            continue;
        }

        if c == '/' && i + 1 < len && chars[i + 1] == '*' {
            let mut depth = 1usize;
            let mut j = i + 2;
            while j < len && depth > 0 {
                if chars[j] == '/' && j + 1 < len && chars[j + 1] == '*' {
                    depth += 1;
                    j += 2;
                } else if chars[j] == '*' && j + 1 < len && chars[j + 1] == '/' {
                    depth -= 1;
                    j += 2;
                } else {
                    j += 1;
                }
            }
            push_span(&mut out, &chars, i, j);
            i = j;
            continue;
        }

        if c.is_ascii_digit() {
            let mut j = i;
            while j < len && (chars[j].is_ascii_alphanumeric() || chars[j] == '.' || chars[j] == '_')
            {
                j += 1;
            }
            push_span(&mut out, &chars, i, j);
            prev = chars.get(j - 1).copied();
            i = j;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            let mut j = i;
            while j < len && is_ident_continue(chars[j]) {
                j += 1;
            }
            let token: String = chars[start..j].iter().collect();

            if prev == Some('.') || !is_cell_label(&token) {
                out.push_str(&token);
                prev = chars.get(j - 1).copied();
                i = j;
                continue;
            }

            // Adjacent `label:label` forms a range.
            if j < len && chars[j] == ':' {
                if let Some((second, after)) = scan_label(&chars, j + 1) {
                    out.push_str(&format!("R(\"{}\", \"{}\")", token, second));
                    prev = Some(')');
                    i = after;
                    continue;
                }
                // A label-like key in a map literal keeps its spelling.
                if matches!(prev, Some('{') | Some(',')) {
                    out.push_str(&token);
                    prev = chars.get(j - 1).copied();
                    i = j;
                    continue;
                }
            }

            // A call position is not a reference.
            let mut k = j;
            while k < len && chars[k].is_whitespace() {
                k += 1;
            }
            if k < len && chars[k] == '(' {
                out.push_str(&token);
                prev = chars.get(j - 1).copied();
                i = j;
                continue;
            }

            out.push_str(&format!("C(\"{}\")", token));
            prev = Some(')');
            i = j;
            continue;
        }

        out.push(c);
        if !c.is_whitespace() {
            prev = Some(c);
        }
        i += 1;
    }

    out
}

/// Scan a label starting at `from`; returns the label text and the index
/// one past it. Used for the second half of an adjacent range.
fn scan_label(chars: &[char], from: usize) -> Option<(String, usize)> {
    if from >= chars.len() || !is_ident_start(chars[from]) {
        return None;
    }
    let mut j = from;
    while j < chars.len() && is_ident_continue(chars[j]) {
        j += 1;
    }
    let token: String = chars[from..j].iter().collect();
    if is_cell_label(&token) {
        Some((token, j))
    } else {
        None
    }
}

/// Index one past the closing quote of the string literal opening at `at`.
fn scan_string(chars: &[char], at: usize) -> usize {
    let mut j = at + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            '"' => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

fn scan_char_literal(chars: &[char], at: usize) -> usize {
    let mut j = at + 1;
    if j < chars.len() && chars[j] == '\\' {
        j += 2;
    } else {
        j += 1;
    }
    if j < chars.len() && chars[j] == '\'' {
        j + 1
    } else {
        j.min(chars.len())
    }
}

/// Rewrite `"Sheet"!ref` where the string literal spans `[lit_start,
/// lit_end)`. Returns the rewritten text and the index to resume at, or
/// None when the `!` is not a sheet qualifier (e.g. `!=`).
fn try_sheet_qualified(
    chars: &[char],
    lit_start: usize,
    lit_end: usize,
) -> Option<(String, usize)> {
    if lit_end >= chars.len() || chars[lit_end] != '!' {
        return None;
    }
    let after_bang = lit_end + 1;
    if after_bang < chars.len() && chars[after_bang] == '=' {
        return None;
    }
    if after_bang >= chars.len() || !is_ident_start(chars[after_bang]) {
        return None;
    }

    let literal: String = chars[lit_start..lit_end].iter().collect();
    let mut j = after_bang;
    while j < chars.len() && is_ident_continue(chars[j]) {
        j += 1;
    }
    let token: String = chars[after_bang..j].iter().collect();

    if is_cell_label(&token) {
        if j < chars.len() && chars[j] == ':' {
            if let Some((second, after)) = scan_label(chars, j + 1) {
                return Some((
                    format!("Sh({}).R(\"{}\", \"{}\")", literal, token, second),
                    after,
                ));
            }
        }
        return Some((format!("Sh({}).C(\"{}\")", literal, token), j));
    }
    Some((format!("Sh({}).G(\"{}\")", literal, token), j))
}
