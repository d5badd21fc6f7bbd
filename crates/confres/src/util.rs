//! String helpers shared by the evaluator and the comparator

/// Attribute names used for a reference attribute: `(xRef, x)`
///
/// The first is the id-list form, the second the nested element form.
pub(crate) fn reference_attribute_names(name: &str) -> (String, String) {
    match name.strip_suffix("Ref") {
        Some(nested) => (name.to_string(), nested.to_string()),
        None => (format!("{name}Ref"), name.to_string()),
    }
}

/// Splits a reference list such as `"a, b,c"`
pub(crate) fn split_references(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits a comma separated list, honoring `\` escapes, trimming each item and dropping empty ones
pub fn parse_list(value: &str) -> Vec<String> {
    let mut items = vec![];
    let mut current = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Inverse of [parse_list] for a single item
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ',' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Trims and collapses inner whitespace runs into a single space
pub(crate) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a duration into `unit_millis` sized units
///
/// Accepts a plain number (already in the target unit) or a sequence of `<number><unit>` parts with units `d`, `h`,
/// `m`, `s` and `ms`, e.g. `1h30m` or `500ms`. Fractions of the target unit are truncated.
pub(crate) fn parse_duration(value: &str, unit_millis: i64) -> Result<i64, String> {
    let value = value.trim();
    if let Ok(plain) = value.parse::<i64>() {
        return Ok(plain);
    }

    let mut total: i64 = 0;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("`{value}` is not a duration"));
        }
        let amount: i64 = rest[..digits]
            .parse()
            .map_err(|_| format!("`{value}` is out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let millis = match &rest[..unit_len] {
            "d" => 86_400_000,
            "h" => 3_600_000,
            "m" => 60_000,
            "s" => 1_000,
            "ms" => 1,
            unit => return Err(format!("unknown duration unit `{unit}` in `{value}`")),
        };
        rest = &rest[unit_len..];

        total = amount
            .checked_mul(millis)
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("`{value}` is out of range"))?;
    }

    Ok(total / unit_millis)
}
