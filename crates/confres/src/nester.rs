//! Conversion between flattened `key.N.name` properties and lists of property dictionaries
//!
//! Flat reference attributes project the referenced elements into the referring element's properties as
//! `attribute.0.name`, `attribute.1.name`, ... [nest] recovers the individual dictionaries.
use crate::evaluator::Properties;
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Dictionaries stored under `key.N.`, ordered by N
///
/// Keys that do not continue with a number and a dot are ignored.
pub fn nest(key: &str, map: &Properties) -> Vec<Properties> {
    let prefix = format!("{key}.");
    let mut nested: BTreeMap<usize, Properties> = BTreeMap::new();

    for (name, value) in map {
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some((index, property)) = rest.split_once('.') else {
            continue;
        };
        let Ok(index) = index.parse::<usize>() else {
            continue;
        };
        if property.is_empty() {
            continue;
        }
        nested
            .entry(index)
            .or_default()
            .insert(property.to_string(), value.clone());
    }

    nested.into_values().collect()
}

/// [nest] for several keys, every key gets an entry
pub fn nest_all<S: AsRef<str>>(map: &Properties, keys: &[S]) -> IndexMap<String, Vec<Properties>> {
    keys.iter()
        .map(|key| (key.as_ref().to_string(), nest(key.as_ref(), map)))
        .collect()
}

/// Inverse of [nest]: `items[N]` is stored under `key.N.`
pub fn flatten(key: &str, items: &[Properties]) -> Properties {
    items
        .iter()
        .enumerate()
        .flat_map(|(index, item)| {
            item.iter()
                .map(move |(name, value)| (format!("{key}.{index}.{name}"), value.clone()))
        })
        .collect()
}
