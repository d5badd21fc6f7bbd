//! Conversion of substituted text into typed scalars
use crate::schema::{AttributeDefinition, AttributeOption, AttributeType};
use crate::util::{collapse_whitespace, parse_duration};
use crate::value::{ProtectedString, Scalar};
use std::str::FromStr;

/// Converts `text` as declared by `definition`, `Err` carries the reason it is invalid
pub(crate) fn coerce(text: &str, definition: &AttributeDefinition) -> Result<Scalar, String> {
    let text = if definition.options.is_empty() {
        text
    } else {
        normalize_option(text, &definition.options)?
    };

    if let Some(pattern) = &definition.pattern {
        if !pattern.is_match(text) {
            return Err(format!("does not match `{}`", pattern.as_str()));
        }
    }

    Ok(match definition.kind {
        AttributeType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Scalar::Boolean(true),
            "false" => Scalar::Boolean(false),
            _ => return Err("must be true or false".to_string()),
        },
        AttributeType::Byte => Scalar::Byte(number(text)?),
        AttributeType::Short => Scalar::Short(number(text)?),
        AttributeType::Integer => Scalar::Integer(number(text)?),
        AttributeType::Long => Scalar::Long(number(text)?),
        AttributeType::Float => Scalar::Float(number(text)?),
        AttributeType::Double => Scalar::Double(number(text)?),
        AttributeType::Char => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Scalar::Char(c),
                _ => return Err("must be a single character".to_string()),
            }
        }
        AttributeType::Duration(unit) => Scalar::Long(parse_duration(text, unit.millis())?),
        AttributeType::Token => Scalar::String(collapse_whitespace(text)),
        AttributeType::Password => Scalar::Password(ProtectedString::new(text)),
        AttributeType::String | AttributeType::Pid => Scalar::String(text.to_string()),
    })
}

fn number<T: FromStr>(text: &str) -> Result<T, String> {
    text.trim()
        .parse()
        .map_err(|_| "not a number in range".to_string())
}

/// Option value matching `text` by value or label, ignoring case
fn normalize_option<'a>(text: &str, options: &'a [AttributeOption]) -> Result<&'a str, String> {
    options
        .iter()
        .find(|option| {
            option.value.eq_ignore_ascii_case(text) || option.label.eq_ignore_ascii_case(text)
        })
        .map(|option| option.value.as_str())
        .ok_or_else(|| {
            let values: Vec<&str> = options.iter().map(|option| option.value.as_str()).collect();
            format!("must be one of {}", values.join(", "))
        })
}
