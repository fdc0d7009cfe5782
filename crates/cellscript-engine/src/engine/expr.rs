//! Expression parser: classify raw cell text into literal-or-code.
//!
//! The workbook is configured with one of four surface-syntax modes. The
//! parser never evaluates anything; it only decides whether the text is a
//! literal value or code to hand to the reference rewriter.

use std::fmt;
use std::str::FromStr;

use rhai::Dynamic;
use serde::{Deserialize, Serialize};

use super::value::Value;

/// Surface-syntax mode, selected per workbook.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpressionMode {
    /// Every cell is code.
    PureScript,
    /// A leading `'` marks a string literal; everything else is code.
    Mixed,
    /// A leading `>` marks code; a leading `'` marks an escaped string;
    /// everything else is a string literal.
    #[default]
    ReverseMixed,
    /// A leading `=` marks code; otherwise integer, then float, then string
    /// (with optional leading `'` strip).
    PureSpreadsheet,
}

impl fmt::Display for ExpressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpressionMode::PureScript => "PureScript",
            ExpressionMode::Mixed => "Mixed",
            ExpressionMode::ReverseMixed => "ReverseMixed",
            ExpressionMode::PureSpreadsheet => "PureSpreadsheet",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ExpressionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PureScript" => Ok(ExpressionMode::PureScript),
            "Mixed" => Ok(ExpressionMode::Mixed),
            "ReverseMixed" => Ok(ExpressionMode::ReverseMixed),
            "PureSpreadsheet" => Ok(ExpressionMode::PureSpreadsheet),
            other => Err(format!("unknown expression mode: {}", other)),
        }
    }
}

/// Outcome of classifying one cell's raw text.
#[derive(Clone, Debug)]
pub enum Parsed {
    Literal(Value),
    Code(String),
}

/// Classify raw cell text. Empty text is handled by the evaluator before
/// this is called; passing it here yields an empty string literal.
pub fn parse_expression(mode: ExpressionMode, text: &str) -> Parsed {
    match mode {
        ExpressionMode::PureScript => Parsed::Code(text.to_string()),
        ExpressionMode::Mixed => {
            if let Some(rest) = text.strip_prefix('\'') {
                Parsed::Literal(Value::Scalar(Dynamic::from(rest.to_string())))
            } else {
                Parsed::Code(text.to_string())
            }
        }
        ExpressionMode::ReverseMixed => {
            if let Some(rest) = text.strip_prefix('>') {
                Parsed::Code(rest.to_string())
            } else if let Some(rest) = text.strip_prefix('\'') {
                Parsed::Literal(Value::Scalar(Dynamic::from(rest.to_string())))
            } else {
                Parsed::Literal(Value::Scalar(Dynamic::from(text.to_string())))
            }
        }
        ExpressionMode::PureSpreadsheet => {
            if let Some(rest) = text.strip_prefix('=') {
                return Parsed::Code(rest.to_string());
            }
            let trimmed = text.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Parsed::Literal(Value::Scalar(Dynamic::from(n)));
            }
            if let Ok(n) = trimmed.parse::<f64>() {
                return Parsed::Literal(Value::Scalar(Dynamic::from(n)));
            }
            let literal = text.strip_prefix('\'').unwrap_or(text);
            Parsed::Literal(Value::Scalar(Dynamic::from(literal.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal_str(parsed: &Parsed) -> Option<String> {
        match parsed {
            Parsed::Literal(v) => v.as_str(),
            _ => None,
        }
    }

    fn code(parsed: &Parsed) -> Option<&str> {
        match parsed {
            Parsed::Code(c) => Some(c.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_pure_script_mode() {
        for text in ["1 + 2", "'hello'", ">A1"] {
            let parsed = parse_expression(ExpressionMode::PureScript, text);
            assert_eq!(code(&parsed), Some(text));
        }
    }

    #[test]
    fn test_mixed_mode() {
        let parsed = parse_expression(ExpressionMode::Mixed, "'hello");
        assert_eq!(literal_str(&parsed).as_deref(), Some("hello"));

        let parsed = parse_expression(ExpressionMode::Mixed, "1 + 2");
        assert_eq!(code(&parsed), Some("1 + 2"));

        let parsed = parse_expression(ExpressionMode::Mixed, "=A1");
        assert_eq!(code(&parsed), Some("=A1"));
    }

    #[test]
    fn test_reverse_mixed_mode() {
        let parsed = parse_expression(ExpressionMode::ReverseMixed, ">1 + 2");
        assert_eq!(code(&parsed), Some("1 + 2"));

        let parsed = parse_expression(ExpressionMode::ReverseMixed, "plain text");
        assert_eq!(literal_str(&parsed).as_deref(), Some("plain text"));

        let parsed = parse_expression(ExpressionMode::ReverseMixed, "'>A1");
        assert_eq!(literal_str(&parsed).as_deref(), Some(">A1"));
    }

    #[test]
    fn test_pure_spreadsheet_mode() {
        let parsed = parse_expression(ExpressionMode::PureSpreadsheet, "=1 + 2");
        assert_eq!(code(&parsed), Some("1 + 2"));

        let parsed = parse_expression(ExpressionMode::PureSpreadsheet, "42");
        assert!(matches!(&parsed, Parsed::Literal(v) if v.as_int() == Some(42)));

        let parsed = parse_expression(ExpressionMode::PureSpreadsheet, "3.5");
        assert!(matches!(&parsed, Parsed::Literal(v) if v.as_float() == Some(3.5)));

        let parsed = parse_expression(ExpressionMode::PureSpreadsheet, "'42");
        assert_eq!(literal_str(&parsed).as_deref(), Some("42"));

        let parsed = parse_expression(ExpressionMode::PureSpreadsheet, "plain text");
        assert_eq!(literal_str(&parsed).as_deref(), Some("plain text"));
    }

    #[test]
    fn test_mode_name_round_trip() {
        for mode in [
            ExpressionMode::PureScript,
            ExpressionMode::Mixed,
            ExpressionMode::ReverseMixed,
            ExpressionMode::PureSpreadsheet,
        ] {
            assert_eq!(mode.to_string().parse::<ExpressionMode>().unwrap(), mode);
        }
        assert!("PurePythonic".parse::<ExpressionMode>().is_err());
    }
}
