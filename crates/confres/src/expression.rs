//! `${...}` substitution and the expression language
//!
//! Inside `${...}` the following forms are understood:
//! - a plain name, looked up through [PropertyLookup]
//! - `count(name)`: number of values bound to `name`, `0` when unbound
//! - `list(name)`: the values of `name`, comma separated
//! - `servicePidOrFilter(name)`: an LDAP style `service.pid` filter over the values of `name`
//! - `a+b`, `a-b`, `a*b`, `a/b`: 64 bit integer arithmetic over names, integer literals or `count(...)`
//!
//! Matching is exact: no whitespace is tolerated. Anything that does not evaluate (malformed syntax, unknown function,
//! unbound name, non-numeric operand, overflow, division by zero) is left in the text as written.
use crate::value::Value;
use regex::Regex;
use std::sync::LazyLock;

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^{}]*)\}").expect("regex"));

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(count|list|servicePidOrFilter)\(([A-Za-z_][\w.\-]*)\)$").expect("regex")
});

static ARITHMETIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    let operand = r"(count\([A-Za-z_][\w.\-]*\)|[A-Za-z_][\w.]*|\d+)";
    Regex::new(&format!(r"^{operand}([-+*/]){operand}$")).expect("regex")
});

static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{list\(([A-Za-z_][\w.\-]*)\)\}").expect("regex"));

/// Source of values for names used in expressions
pub trait PropertyLookup {
    type Error;

    /// `Ok(None)` when `name` is not bound
    fn lookup(&mut self, name: &str) -> Result<Option<Value>, Self::Error>;
}

/// Replaces every `${...}` in `text`
///
/// Substituted text is not scanned again. Errors of plain name lookups (e.g. evaluation loops) are returned, errors
/// inside expressions leave the expression literal.
pub fn substitute<L: PropertyLookup>(text: &str, lookup: &mut L) -> Result<String, L::Error> {
    let mut substituted = String::with_capacity(text.len());
    let mut last = 0;

    for captures in REFERENCE_RE.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        substituted.push_str(&text[last..whole.start()]);
        match resolve(&captures[1], lookup)? {
            Some(replacement) => substituted.push_str(&replacement),
            None => substituted.push_str(whole.as_str()),
        }
        last = whole.end();
    }

    substituted.push_str(&text[last..]);
    Ok(substituted)
}

/// Does `text` contain any `${...}`
pub fn has_references(text: &str) -> bool {
    REFERENCE_RE.is_match(text)
}

/// Name used in `${list(name)}` if `text` contains one
pub fn list_reference(text: &str) -> Option<&str> {
    LIST_RE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

fn resolve<L: PropertyLookup>(inner: &str, lookup: &mut L) -> Result<Option<String>, L::Error> {
    if let Some(value) = lookup.lookup(inner)? {
        return Ok(Some(value.to_string()));
    }
    Ok(evaluate(inner, lookup))
}

/// Evaluates an expression (the text between `${` and `}`), `None` if it does not evaluate
pub fn evaluate<L: PropertyLookup>(expression: &str, lookup: &mut L) -> Option<String> {
    if let Some(captures) = FUNCTION_RE.captures(expression) {
        return call(&captures[1], &captures[2], lookup);
    }

    let captures = ARITHMETIC_RE.captures(expression)?;
    let left = operand(&captures[1], lookup)?;
    let right = operand(&captures[3], lookup)?;
    let result = match &captures[2] {
        "+" => left.checked_add(right),
        "-" => left.checked_sub(right),
        "*" => left.checked_mul(right),
        "/" => left.checked_div(right),
        _ => None,
    };

    if result.is_none() {
        tracing::debug!(expression, "arithmetic overflow or division by zero");
    }
    result.map(|result| result.to_string())
}

fn call<L: PropertyLookup>(function: &str, name: &str, lookup: &mut L) -> Option<String> {
    let value = lookup.lookup(name).ok()?;

    match function {
        "count" => Some(value.map_or(0, |value| value.count()).to_string()),
        "list" => value.map(|value| value.to_string()),
        "servicePidOrFilter" => service_pid_filter(value.as_ref()),
        _ => None,
    }
}

fn service_pid_filter(value: Option<&Value>) -> Option<String> {
    let Some(value) = value else {
        return Some("(service.pid=unbound)".to_string());
    };

    match value.strings()?.as_slice() {
        [] => Some("(service.pid=unbound)".to_string()),
        [pid] => Some(format!("(service.pid={pid})")),
        pids => {
            let filters: String = pids
                .iter()
                .map(|pid| format!("(service.pid={pid})"))
                .collect();
            Some(format!("(|{filters})"))
        }
    }
}

fn operand<L: PropertyLookup>(operand: &str, lookup: &mut L) -> Option<i64> {
    if operand.starts_with(|c: char| c.is_ascii_digit()) {
        return operand.parse().ok();
    }
    if let Some(name) = operand
        .strip_prefix("count(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let count = lookup.lookup(name).ok()?.map_or(0, |value| value.count());
        return i64::try_from(count).ok();
    }

    match lookup.lookup(operand).ok()?? {
        Value::Scalar(scalar) => scalar.to_string().trim().parse().ok(),
        _ => None,
    }
}
