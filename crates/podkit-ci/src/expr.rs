//! `${{ ... }}` expressions.
//!
//! Only the subset the local runner needs: `matrix.*` and `env.*` lookups,
//! string and boolean literals, `==`/`!=`, `&&`/`||`, `!`, and the status
//! functions. Anything else is reported as unsupported rather than guessed.

use crate::matrix::Combination;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn expression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{\s*(.*?)\s*\}\}").expect("static expression pattern"))
}

/// Values visible to an expression.
#[derive(Debug, Clone, Copy)]
pub struct ExprContext<'a> {
    pub matrix: &'a Combination,
    pub env: &'a IndexMap<String, String>,
}

impl<'a> ExprContext<'a> {
    pub fn new(matrix: &'a Combination, env: &'a IndexMap<String, String>) -> Self {
        Self { matrix, env }
    }

    /// Resolve a `matrix.x` or `env.X` reference.
    pub fn lookup(&self, reference: &str) -> Option<String> {
        if let Some(key) = reference.strip_prefix("matrix.") {
            return self.matrix.get(key).map(|v| v.to_string());
        }
        if let Some(key) = reference.strip_prefix("env.") {
            return self.env.get(key).cloned();
        }
        None
    }
}

/// Replace every resolvable `${{ ref }}`; unresolvable ones are left intact.
pub fn substitute(text: &str, ctx: &ExprContext<'_>) -> String {
    expression_re()
        .replace_all(text, |caps: &Captures<'_>| {
            ctx.lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// `${{ ref }}` references in `text` that `ctx` cannot resolve.
pub fn unresolved(text: &str, ctx: &ExprContext<'_>) -> Vec<String> {
    expression_re()
        .captures_iter(text)
        .filter(|caps| ctx.lookup(&caps[1]).is_none())
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Evaluate a step or job `if` condition.
///
/// The `${{ }}` wrapper is optional, as in workflow files. Returns `None`
/// when the expression uses something outside the supported subset.
pub fn evaluate_condition(condition: &str, ctx: &ExprContext<'_>) -> Option<bool> {
    let trimmed = condition.trim();
    let inner = trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .unwrap_or(trimmed)
        .trim();
    let mut any = false;
    for disjunct in split_unquoted(inner, "||") {
        let mut all = true;
        for conjunct in split_unquoted(disjunct, "&&") {
            all &= evaluate_term(conjunct.trim(), ctx)?;
        }
        any |= all;
    }
    Some(any)
}

fn evaluate_term(term: &str, ctx: &ExprContext<'_>) -> Option<bool> {
    if let Some(negated) = term.strip_prefix('!') {
        if !negated.starts_with('=') {
            return evaluate_term(negated.trim(), ctx).map(|b| !b);
        }
    }
    match term {
        "always()" | "success()" => return Some(true),
        "failure()" | "cancelled()" => return Some(false),
        _ => {}
    }
    if let Some((lhs, rhs)) = split_once_unquoted(term, "!=") {
        return Some(operand(lhs, ctx)? != operand(rhs, ctx)?);
    }
    if let Some((lhs, rhs)) = split_once_unquoted(term, "==") {
        return Some(operand(lhs, ctx)? == operand(rhs, ctx)?);
    }
    let value = operand(term, ctx)?;
    Some(truthy(&value))
}

// Comparisons are case-insensitive on strings, as on hosted runners.
fn operand(raw: &str, ctx: &ExprContext<'_>) -> Option<String> {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Some(raw[1..raw.len() - 1].replace("''", "'").to_lowercase());
    }
    if matches!(raw, "true" | "false" | "null") || raw.parse::<f64>().is_ok() {
        return Some(raw.to_string());
    }
    if raw.starts_with("matrix.") || raw.starts_with("env.") {
        return Some(ctx.lookup(raw).unwrap_or_default().to_lowercase());
    }
    None
}

/// Byte offsets of `sep` outside `'...'` literals.
fn find_unquoted(text: &str, sep: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut quoted = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            quoted = !quoted;
        } else if !quoted && bytes[i..].starts_with(sep.as_bytes()) {
            found.push(i);
            i += sep.len();
            continue;
        }
        i += 1;
    }
    found
}

fn split_unquoted<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for at in find_unquoted(text, sep) {
        parts.push(&text[start..at]);
        start = at + sep.len();
    }
    parts.push(&text[start..]);
    parts
}

fn split_once_unquoted<'a>(text: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    find_unquoted(text, sep)
        .first()
        .map(|&at| (&text[..at], &text[at + sep.len()..]))
}

fn truthy(value: &str) -> bool {
    !matches!(value, "" | "false" | "null" | "0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixValue;

    fn matrix() -> Combination {
        let mut m = Combination::new();
        m.insert("os".to_string(), MatrixValue::from("macos-13"));
        m.insert("json-file".to_string(), MatrixValue::from("tests/set1.jsonc"));
        m
    }

    fn env() -> IndexMap<String, String> {
        let mut e = IndexMap::new();
        e.insert("CONDA_ROOT".to_string(), "/Users/runner/miniconda3".to_string());
        e
    }

    #[test]
    fn test_substitute_matrix_and_env() {
        let (m, e) = (matrix(), env());
        let ctx = ExprContext::new(&m, &e);
        assert_eq!(
            substitute("./mdtf -f ${{matrix.json-file}} --root ${{ env.CONDA_ROOT }}", &ctx),
            "./mdtf -f tests/set1.jsonc --root /Users/runner/miniconda3"
        );
    }

    #[test]
    fn test_unknown_reference_left_intact() {
        let (m, e) = (matrix(), env());
        let ctx = ExprContext::new(&m, &e);
        let text = "echo ${{ secrets.TOKEN }}";
        assert_eq!(substitute(text, &ctx), text);
        assert_eq!(unresolved(text, &ctx), vec!["secrets.TOKEN"]);
    }

    #[test]
    fn test_conditions() {
        let (m, e) = (matrix(), env());
        let ctx = ExprContext::new(&m, &e);
        assert_eq!(evaluate_condition("${{ matrix.os == 'macos-13' }}", &ctx), Some(true));
        assert_eq!(evaluate_condition("matrix.os != 'macos-13'", &ctx), Some(false));
        assert_eq!(evaluate_condition("matrix.os == 'MacOS-13'", &ctx), Some(true));
        assert_eq!(
            evaluate_condition("matrix.os == 'ubuntu-latest' || matrix.os == 'macos-13'", &ctx),
            Some(true)
        );
        assert_eq!(
            evaluate_condition("matrix.os == 'macos-13' && env.CONDA_ROOT == ''", &ctx),
            Some(false)
        );
        assert_eq!(evaluate_condition("!matrix.missing", &ctx), Some(true));
        assert_eq!(evaluate_condition("always()", &ctx), Some(true));
        assert_eq!(evaluate_condition("failure()", &ctx), Some(false));
    }

    #[test]
    fn test_operators_inside_literals() {
        let mut m = matrix();
        m.insert("shell".to_string(), MatrixValue::from("a||b"));
        let e = env();
        let ctx = ExprContext::new(&m, &e);
        assert_eq!(evaluate_condition("matrix.shell == 'a||b'", &ctx), Some(true));
        assert_eq!(evaluate_condition("matrix.shell == 'a&&b'", &ctx), Some(false));
        assert_eq!(evaluate_condition("matrix.os != 'x==y' && matrix.shell == 'A||B'", &ctx), Some(true));
        assert_eq!(evaluate_condition("matrix.os == 'it''s'", &ctx), Some(false));
    }

    #[test]
    fn test_unsupported_conditions() {
        let (m, e) = (matrix(), env());
        let ctx = ExprContext::new(&m, &e);
        assert_eq!(evaluate_condition("contains(matrix.os, 'mac')", &ctx), None);
        assert_eq!(evaluate_condition("github.event_name == 'push'", &ctx), None);
    }
}
