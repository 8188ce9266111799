//! The fixed-point rewriter: placeholder substitution, innermost-first
//! function reduction, then a final arithmetic pass.

use crate::arith::{self, ArithError};
use crate::functions;
use crate::{DIV_BY_ZERO, MAX_FORMULA_LEN, MAX_INPUT_LEN, MAX_ITERATIONS};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

// Private-use-area markers bracketing a stash index. Values never appear in
// the working text, so they cannot collide with function reduction.
const STASH_OPEN: char = '\u{E000}';
const STASH_CLOSE: char = '\u{E001}';

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaOutput {
    pub result: String,
    /// Numeric parse of `result`, when it is a number.
    pub result_number: Option<f64>,
}

#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("formula exceeds {MAX_FORMULA_LEN} characters (got {len})")]
    FormulaTooLong { len: usize },
    #[error("input value exceeds {MAX_INPUT_LEN} characters (got {len})")]
    InputTooLong { len: usize },
    #[error("{function}() called with {got} arguments")]
    BadArity { function: String, got: usize },
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

/// Evaluate a formula against the workflow object's properties and the
/// action's numbered input fields.
pub fn evaluate(
    formula: &str,
    properties: &JsonValue,
    inputs: &Map<String, JsonValue>,
) -> Result<FormulaOutput, FormulaError> {
    if formula.len() > MAX_FORMULA_LEN {
        return Err(FormulaError::FormulaTooLong { len: formula.len() });
    }

    let mut stash: Vec<String> = Vec::new();
    let mut text = substitute(formula, properties, inputs, &mut stash)?;

    for _ in 0..MAX_ITERATIONS {
        match find_reducible(&text) {
            Some(site) => {
                let replacement = reduce(&site, &text, &mut stash)?;
                text.replace_range(site.replace_start..site.close + ')'.len_utf8(), &replacement);
            }
            None => break,
        }
    }

    let expanded = resolve_sentinels(&text, &stash);
    let result = match arith::eval_if_expression(&expanded) {
        Some(Ok(v)) => arith::format_number(v),
        Some(Err(ArithError::DivZero)) => DIV_BY_ZERO.to_string(),
        Some(Err(ArithError::NotArithmetic)) | None => expanded,
    };
    let result_number = result.trim().parse::<f64>().ok();

    Ok(FormulaOutput {
        result,
        result_number,
    })
}

/// Substitute `{{property}}` and `[[inputN]]` placeholders with sentinel
/// tokens, stashing the resolved values.
fn substitute(
    formula: &str,
    properties: &JsonValue,
    inputs: &Map<String, JsonValue>,
    stash: &mut Vec<String>,
) -> Result<String, FormulaError> {
    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;

    loop {
        let prop = rest.find("{{");
        let input = rest.find("[[");
        let (start, open, close) = match (prop, input) {
            (Some(p), Some(i)) if p <= i => (p, "{{", "}}"),
            (Some(p), None) => (p, "{{", "}}"),
            (_, Some(i)) => (i, "[[", "]]"),
            (None, None) => break,
        };

        let after = &rest[start + open.len()..];
        let Some(end) = after.find(close) else {
            break;
        };
        let name = after[..end].trim();

        let value = if open == "{{" {
            lookup_property(properties, name)
        } else {
            inputs.get(name).map(json_to_string).unwrap_or_default()
        };
        if value.len() > MAX_INPUT_LEN {
            return Err(FormulaError::InputTooLong { len: value.len() });
        }

        out.push_str(&rest[..start]);
        out.push_str(&stash_value(stash, value));
        rest = &after[end + close.len()..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup_property(properties: &JsonValue, path: &str) -> String {
    let mut current = properties;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    json_to_string(current)
}

fn json_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn stash_value(stash: &mut Vec<String>, value: String) -> String {
    stash.push(value);
    format!("{}{}{}", STASH_OPEN, stash.len() - 1, STASH_CLOSE)
}

fn resolve_sentinels(text: &str, stash: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != STASH_OPEN {
            out.push(c);
            continue;
        }
        let mut index = String::new();
        for digit in chars.by_ref() {
            if digit == STASH_CLOSE {
                break;
            }
            index.push(digit);
        }
        if let Some(value) = index.parse::<usize>().ok().and_then(|i| stash.get(i)) {
            out.push_str(value);
        }
    }
    out
}

/// An innermost reducible site: either a known function call or a bare
/// parenthesized group.
struct Site {
    /// Start of the text to replace (function name or the `(`).
    replace_start: usize,
    open: usize,
    close: usize,
    function: Option<String>,
}

fn find_reducible(text: &str) -> Option<Site> {
    let close = text.find(')')?;
    let open = text[..close].rfind('(')?;

    // Identifier directly before the '(' selects a function.
    let head = &text[..open];
    let name_start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(open);
    let name = &head[name_start..];

    if !name.is_empty() && functions::is_function(name) {
        Some(Site {
            replace_start: name_start,
            open,
            close,
            function: Some(name.to_string()),
        })
    } else {
        Some(Site {
            replace_start: open,
            open,
            close,
            function: None,
        })
    }
}

fn reduce(site: &Site, text: &str, stash: &mut Vec<String>) -> Result<String, FormulaError> {
    let interior = &text[site.open + 1..site.close];
    match &site.function {
        Some(name) => {
            let args: Vec<String> = split_args(interior)
                .into_iter()
                .map(|raw| resolve_arg(raw, stash))
                .collect();
            let value = functions::apply(name, &args)?;
            Ok(stash_value(stash, value))
        }
        // Bare parentheses reduce to their resolved interior.
        None => {
            let value = resolve_arg(interior, stash);
            Ok(stash_value(stash, value))
        }
    }
}

/// Split a call's interior on commas. The interior of an innermost call has
/// no nested parentheses left, so every comma is an argument separator.
fn split_args(interior: &str) -> Vec<&str> {
    if interior.is_empty() {
        return vec![""];
    }
    interior.split(',').collect()
}

/// Resolve an argument: expand stashed values, strip one layer of quotes,
/// and reduce arithmetic expressions.
fn resolve_arg(raw: &str, stash: &[String]) -> String {
    let expanded = resolve_sentinels(raw, stash);
    let trimmed = expanded.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        if (bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\'')
        {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    match arith::eval_if_expression(&expanded) {
        Some(Ok(v)) => arith::format_number(v),
        Some(Err(ArithError::DivZero)) => DIV_BY_ZERO.to_string(),
        _ => expanded,
    }
}
