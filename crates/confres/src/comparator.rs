//! Structural diff of two configuration stores
//!
//! Top-level configurations are paired by canonical pid and id. An element that is disabled with
//! `configurationEnabled = false` counts as absent, so enabling and disabling show up as [DeltaType::Added] and
//! [DeltaType::Removed].
//!
//! Children are only compared below elements that have a schema entry. Reference attributes with cardinality 0 merge
//! their children into one, everything else pairs children by id. Children without an id get `default-N` from their
//! position, so reordering them is a change.
//!
//! Attribute values are compared after substituting each side's variables. Vector attributes (negative cardinality)
//! are compared ignoring order.
use crate::config_id::ConfigId;
use crate::element::{Child, ConfigElement, CONFIGURATION_ENABLED};
use crate::schema::{AttributeDefinition, AttributeType, RegistryEntry, SchemaRegistry};
use crate::store::ConfigurationStore;
use crate::util::reference_attribute_names;
use crate::variables::VariableRegistry;
use indexmap::IndexMap;
use serde::{ser::SerializeMap, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaType {
    Added,
    Removed,
    Modified,
}

impl DeltaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaType::Added => "ADDED",
            DeltaType::Removed => "REMOVED",
            DeltaType::Modified => "MODIFIED",
        }
    }
}

impl Display for DeltaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeltaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Change of one element
///
/// `element` is the new element, or the old one for [DeltaType::Removed].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDelta {
    pub id: ConfigId,
    pub element: ConfigElement,
    pub delta: DeltaType,
    pub nested: Vec<ConfigDelta>,
}

impl Serialize for ConfigDelta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("delta", &self.delta)?;
        if !self.nested.is_empty() {
            map.serialize_entry("nested", &self.nested)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparatorResult {
    pub config_deltas: Vec<ConfigDelta>,
    pub variable_deltas: IndexMap<String, DeltaType>,
}

impl ComparatorResult {
    pub fn has_delta(&self) -> bool {
        !self.config_deltas.is_empty() || !self.variable_deltas.is_empty()
    }

    /// Top-level delta for `id`
    pub fn delta(&self, id: &ConfigId) -> Option<&ConfigDelta> {
        self.config_deltas.iter().find(|delta| &delta.id == id)
    }
}

impl Serialize for ComparatorResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("configurations", &self.config_deltas)?;
        map.serialize_entry("variables", &self.variable_deltas)?;
        map.end()
    }
}

/// How children written with the same tag are paired
#[derive(Debug, Clone, Copy, PartialEq)]
enum Grouping {
    /// merged into one child
    Single,
    /// by id, `default-N` for children without one
    ById,
}

struct Side<'a> {
    store: &'a ConfigurationStore,
    variables: VariableRegistry,
}

impl<'a> Side<'a> {
    fn new(store: &'a ConfigurationStore) -> Self {
        Self {
            store,
            variables: store.variable_registry(&[] as &[&str]),
        }
    }

    fn singleton(&self, pid: &str, alias: Option<&str>) -> Option<ConfigElement> {
        self.store
            .singleton(pid, alias)
            .filter(ConfigElement::is_enabled)
    }

    fn factory_instance(&self, pid: &str, alias: Option<&str>, id: &str) -> Option<ConfigElement> {
        self.store
            .factory_instance(pid, alias, id)
            .filter(ConfigElement::is_enabled)
    }

    /// Substituted values of attributes and text-only children, keyed by lowercase name
    fn values(&self, element: &ConfigElement) -> IndexMap<String, Vec<String>> {
        let substitute = |value: &str| {
            self.variables
                .resolve_str(value)
                .unwrap_or_else(|_| value.to_string())
        };

        let mut values: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, value) in element.attributes().iter() {
            if name.eq_ignore_ascii_case(CONFIGURATION_ENABLED) {
                continue;
            }
            values
                .entry(name.to_lowercase())
                .or_default()
                .extend(value.values().into_iter().map(substitute));
        }
        for (tag, children) in element.all_children().iter() {
            let texts: Vec<String> = children
                .iter()
                .filter_map(|child| match child {
                    Child::Text(text) => Some(substitute(text.as_str())),
                    Child::Element(_) => None,
                })
                .collect();
            if !texts.is_empty() {
                values.entry(tag.to_lowercase()).or_default().extend(texts);
            }
        }
        values
    }
}

pub struct ConfigComparator<'a> {
    old: Side<'a>,
    new: Side<'a>,
    registry: Option<&'a SchemaRegistry>,
}

impl<'a> ConfigComparator<'a> {
    pub fn new(
        old: &'a ConfigurationStore,
        new: &'a ConfigurationStore,
        registry: Option<&'a SchemaRegistry>,
    ) -> Self {
        Self {
            old: Side::new(old),
            new: Side::new(new),
            registry,
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    pub fn compute_delta(&self) -> ComparatorResult {
        let mut config_deltas = vec![];

        let singletons = self.types(
            self.old
                .store
                .singleton_names()
                .into_iter()
                .chain(self.new.store.singleton_names()),
        );
        for (pid, entry) in &singletons {
            let alias = entry.as_ref().and_then(|entry| entry.alias());
            let old = self.old.singleton(pid, alias);
            let new = self.new.singleton(pid, alias);
            let id = ConfigId::new(pid.clone(), None);
            config_deltas.extend(self.compare(id, old.as_ref(), new.as_ref(), entry.as_ref()));
        }

        let factories = self.types(
            self.old
                .store
                .factory_names()
                .into_iter()
                .chain(self.new.store.factory_names()),
        );
        for (pid, entry) in &factories {
            let alias = entry.as_ref().and_then(|entry| entry.alias());
            let mut ids = factory_ids(self.old.store, pid, alias);
            for id in factory_ids(self.new.store, pid, alias) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }

            for instance in ids {
                let old = self.old.factory_instance(pid, alias, &instance);
                let new = self.new.factory_instance(pid, alias, &instance);
                let id = ConfigId::new(pid.clone(), Some(instance));
                config_deltas.extend(self.compare(id, old.as_ref(), new.as_ref(), entry.as_ref()));
            }
        }

        let result = ComparatorResult {
            config_deltas,
            variable_deltas: self.variable_deltas(),
        };
        tracing::debug!(
            configurations = result.config_deltas.len(),
            variables = result.variable_deltas.len(),
            "computed delta"
        );
        result
    }

    /// Canonical pid and schema entry for each written name
    fn types(
        &self,
        names: impl Iterator<Item = String>,
    ) -> IndexMap<String, Option<Arc<RegistryEntry>>> {
        let mut types = IndexMap::new();
        for name in names {
            let entry = self.registry.and_then(|registry| registry.entry_for(&name)).cloned();
            let pid = entry
                .as_ref()
                .map_or_else(|| name.clone(), |entry| entry.pid().to_string());
            types.entry(pid).or_insert(entry);
        }
        types
    }

    fn compare(
        &self,
        id: ConfigId,
        old: Option<&ConfigElement>,
        new: Option<&ConfigElement>,
        entry: Option<&Arc<RegistryEntry>>,
    ) -> Option<ConfigDelta> {
        let (delta, element) = match (old, new) {
            (None, None) => return None,
            (None, Some(new)) => (DeltaType::Added, new),
            (Some(old), None) => (DeltaType::Removed, old),
            (Some(_), Some(new)) => (DeltaType::Modified, new),
        };

        let nested = self.compare_children(&id, old, new, entry);
        if let (Some(old), Some(new)) = (old, new) {
            if nested.is_empty() && !self.attributes_differ(old, new, entry) {
                return None;
            }
        }

        tracing::trace!(%id, %delta, "configuration changed");
        Some(ConfigDelta {
            id,
            element: element.clone(),
            delta,
            nested,
        })
    }

    fn attributes_differ(
        &self,
        old: &ConfigElement,
        new: &ConfigElement,
        entry: Option<&Arc<RegistryEntry>>,
    ) -> bool {
        let old_values = self.old.values(old);
        let new_values = self.new.values(new);
        if old_values.len() != new_values.len() {
            return true;
        }

        old_values.iter().any(|(name, old_value)| {
            let Some(new_value) = new_values.get(name) else {
                return true;
            };
            let unordered = entry
                .and_then(|entry| definition(entry, name))
                .is_some_and(|definition| definition.cardinality < 0);
            if unordered {
                let mut old_value = old_value.clone();
                let mut new_value = new_value.clone();
                old_value.sort();
                new_value.sort();
                return old_value != new_value;
            }
            old_value != new_value
        })
    }

    fn compare_children(
        &self,
        parent: &ConfigId,
        old: Option<&ConfigElement>,
        new: Option<&ConfigElement>,
        entry: Option<&Arc<RegistryEntry>>,
    ) -> Vec<ConfigDelta> {
        let Some(entry) = entry else {
            return vec![];
        };

        let mut tags: Vec<String> = vec![];
        for element in old.into_iter().chain(new) {
            for (tag, children) in element.all_children().iter() {
                let has_elements = children.iter().any(|child| child.as_element().is_some());
                if has_elements && !tags.iter().any(|known| known.eq_ignore_ascii_case(tag)) {
                    tags.push(tag.to_string());
                }
            }
        }

        let mut deltas = vec![];
        for tag in tags {
            let (child_entry, grouping) = self.child_rule(entry, &tag);
            let pid = child_entry
                .as_ref()
                .map_or_else(|| tag.clone(), |entry| entry.pid().to_string());
            let old_group = group(old, &tag, grouping);
            let new_group = group(new, &tag, grouping);

            let mut keys: Vec<&String> = old_group.keys().collect();
            for key in new_group.keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }

            for key in keys {
                let old_child = old_group.get(key);
                let new_child = new_group.get(key);
                let child_id = new_child
                    .or(old_child)
                    .and_then(ConfigElement::id)
                    .map(str::to_string)
                    .or_else(|| (grouping == Grouping::ById).then(|| key.clone()));
                let id = ConfigId::nested(parent, pid.clone(), child_id, tag.clone());
                deltas.extend(self.compare(id, old_child, new_child, child_entry.as_ref()));
            }
        }
        deltas
    }

    /// Schema entry and pairing rule for children written as `tag` below `entry`
    fn child_rule(&self, entry: &RegistryEntry, tag: &str) -> (Option<Arc<RegistryEntry>>, Grouping) {
        let Some(registry) = self.registry else {
            return (None, Grouping::ById);
        };

        for definition in entry.attributes().values() {
            if definition.kind != AttributeType::Pid {
                continue;
            }
            let Some(pid) = &definition.reference else {
                continue;
            };
            // the evaluator merges every child of a single-valued reference, so they are compared as one
            let grouping = match definition.cardinality {
                0 => Grouping::Single,
                _ => Grouping::ById,
            };

            let (_, nested_name) = reference_attribute_names(&definition.id);
            if nested_name.eq_ignore_ascii_case(tag) {
                return (registry.entry(pid).cloned(), grouping);
            }
            let subtype = registry.descendants(pid).into_iter().find(|subtype| {
                subtype
                    .effective_element_name(&nested_name)
                    .is_some_and(|name| name.eq_ignore_ascii_case(tag))
            });
            if let Some(subtype) = subtype {
                return (Some(subtype), grouping);
            }
        }

        let child = registry.entry_for_child_alias(entry.pid(), tag).cloned();
        (child, Grouping::ById)
    }

    fn variable_deltas(&self) -> IndexMap<String, DeltaType> {
        let resolved = |side: &Side, name: &str| {
            side.variables
                .lookup(name)
                .unwrap_or_else(|_| side.variables.raw(name).map(str::to_string))
        };

        let mut deltas = IndexMap::new();
        for name in self.old.variables.names() {
            let delta = match (resolved(&self.old, name), resolved(&self.new, name)) {
                (_, None) => DeltaType::Removed,
                (old, new) if old != new => DeltaType::Modified,
                _ => continue,
            };
            deltas.insert(name.to_string(), delta);
        }
        for name in self.new.variables.names() {
            if !self.old.variables.contains(name) {
                deltas.insert(name.to_string(), DeltaType::Added);
            }
        }
        deltas
    }
}

/// Ids of the enabled instances written as `pid` or `alias`
fn factory_ids(store: &ConfigurationStore, pid: &str, alias: Option<&str>) -> Vec<String> {
    let mut ids = store.factory_ids(pid);
    for id in alias.map(|alias| store.factory_ids(alias)).unwrap_or_default() {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Definition for an attribute or for the id-list form of a reference
fn definition<'e>(entry: &'e RegistryEntry, name: &str) -> Option<&'e AttributeDefinition> {
    entry.attribute(name).or_else(|| {
        let nested = name.strip_suffix("ref")?;
        entry
            .attribute(nested)
            .filter(|definition| definition.kind == AttributeType::Pid)
    })
}

/// Child elements written as `tag`, paired by key
fn group(element: Option<&ConfigElement>, tag: &str, grouping: Grouping) -> IndexMap<String, ConfigElement> {
    let mut grouped: IndexMap<String, ConfigElement> = IndexMap::new();
    let Some(element) = element else {
        return grouped;
    };

    for (index, child) in element.child_elements(tag).enumerate() {
        let key = match grouping {
            Grouping::Single => String::new(),
            Grouping::ById => child
                .id()
                .map_or_else(|| format!("default-{index}"), str::to_string),
        };
        match grouped.get_mut(&key) {
            Some(existing) => existing.merge_from(child),
            None => {
                grouped.insert(key, child.clone());
            }
        }
    }
    grouped
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::document::Document;
    use crate::schema::{SchemaSource, TypeSchema};
    use crate::variables::Variable;
    use pretty_assertions::assert_eq;

    fn store(elements: Vec<ConfigElement>) -> ConfigurationStore {
        let mut document = Document::new("server.hcl".into());
        for element in elements {
            document.add_element(element);
        }
        ConfigurationStore::default().add(&document)
    }

    fn summary(result: &ComparatorResult) -> Vec<(String, DeltaType)> {
        result
            .config_deltas
            .iter()
            .map(|delta| (delta.id.to_string(), delta.delta))
            .collect()
    }

    fn compare(old: &ConfigurationStore, new: &ConfigurationStore) -> Vec<(String, DeltaType)> {
        summary(&ConfigComparator::new(old, new, None).compute_delta())
    }

    fn connector(client_auth: &str) -> ConfigElement {
        ConfigElement::new("httpConnector").with_attribute("clientAuth", client_auth)
    }

    fn pool(id: &str, max: &str) -> ConfigElement {
        ConfigElement::new("threadPool")
            .with_id(id)
            .with_attribute("maxThreads", max)
    }

    #[test]
    fn singletons() {
        let old = store(vec![connector("false")]);

        assert!(compare(&old, &store(vec![connector("false")])).is_empty());
        assert_eq!(
            compare(&old, &store(vec![])),
            [("httpConnector".to_string(), DeltaType::Removed)]
        );
        assert_eq!(
            compare(
                &old,
                &store(vec![connector("false"), ConfigElement::new("foo").with_attribute("bar", "test")])
            ),
            [("foo".to_string(), DeltaType::Added)]
        );
        assert_eq!(
            compare(&old, &store(vec![connector("true")])),
            [("httpConnector".to_string(), DeltaType::Modified)]
        );
    }

    #[test]
    fn factories() {
        let old = store(vec![pool("one", "10"), pool("two", "20")]);

        assert!(compare(&old, &store(vec![pool("one", "10"), pool("two", "20")])).is_empty());
        assert_eq!(
            compare(&old, &store(vec![pool("two", "20")])),
            [("threadPool[one]".to_string(), DeltaType::Removed)]
        );
        assert_eq!(
            compare(
                &old,
                &store(vec![pool("one", "10"), pool("two", "20"), pool("three", "40")])
            ),
            [("threadPool[three]".to_string(), DeltaType::Added)]
        );
        assert_eq!(
            compare(&old, &store(vec![pool("one", "100"), pool("two", "20")])),
            [("threadPool[one]".to_string(), DeltaType::Modified)]
        );
    }

    #[test]
    fn disabling_is_removal() {
        let old = store(vec![connector("false")]);
        let disabled = store(vec![connector("true").with_attribute("configurationEnabled", "false")]);
        assert_eq!(
            compare(&old, &disabled),
            [("httpConnector".to_string(), DeltaType::Removed)]
        );

        let enabled = store(vec![connector("true").with_attribute("configurationEnabled", "true")]);
        assert_eq!(
            compare(&disabled, &enabled),
            [("httpConnector".to_string(), DeltaType::Added)]
        );
    }

    fn application_registry() -> SchemaRegistry {
        SchemaRegistry::default()
            .add_source(&SchemaSource::new(
                "test".into(),
                vec![
                    TypeSchema::factory("application")
                        .attribute(AttributeDefinition::reference_to("host", "host"))
                        .attribute(AttributeDefinition::reference_to("fileset", "fileset").cardinality(5))
                        .attribute(AttributeDefinition::string("names").cardinality(-5)),
                    TypeSchema::new("host"),
                    TypeSchema::factory("fileset"),
                ],
            ))
            .0
    }

    fn application(id: &str) -> ConfigElement {
        ConfigElement::new("application").with_id(id)
    }

    fn host(ip: &str) -> ConfigElement {
        ConfigElement::new("host").with_attribute("ip", ip)
    }

    fn fileset(dir: &str) -> ConfigElement {
        ConfigElement::new("fileset").with_attribute("dir", dir)
    }

    fn nested(result: &ComparatorResult, id: &str) -> Vec<(String, DeltaType)> {
        let delta = result
            .config_deltas
            .iter()
            .find(|delta| delta.id.to_string() == id)
            .unwrap();
        delta
            .nested
            .iter()
            .map(|delta| (delta.id.to_string(), delta.delta))
            .collect()
    }

    #[test]
    fn nested_elements() {
        let registry = application_registry();
        let old = store(vec![
            application("app1").with_child("host", host("bart")),
            application("app2"),
        ]);

        let new = store(vec![
            application("app1").with_child("host", host("lisa")),
            application("app2"),
        ]);
        let result = ConfigComparator::new(&old, &new, Some(&registry)).compute_delta();
        assert_eq!(
            summary(&result),
            [("application[app1]".to_string(), DeltaType::Modified)]
        );
        assert_eq!(
            nested(&result, "application[app1]"),
            [("application[app1]/host(host)".to_string(), DeltaType::Modified)]
        );

        let (old, new) = (
            new,
            store(vec![
                application("app1"),
                application("app2").with_child("fileset", fileset("lib")),
            ]),
        );
        let result = ConfigComparator::new(&old, &new, Some(&registry)).compute_delta();
        assert_eq!(
            nested(&result, "application[app1]"),
            [("application[app1]/host(host)".to_string(), DeltaType::Removed)]
        );
        assert_eq!(
            nested(&result, "application[app2]"),
            [(
                "application[app2]/fileset(fileset)[default-0]".to_string(),
                DeltaType::Added
            )]
        );

        let (old, new) = (new, store(vec![application("app1")]));
        let result = ConfigComparator::new(&old, &new, Some(&registry)).compute_delta();
        assert_eq!(
            summary(&result),
            [("application[app2]".to_string(), DeltaType::Removed)]
        );
        assert_eq!(
            nested(&result, "application[app2]"),
            [(
                "application[app2]/fileset(fileset)[default-0]".to_string(),
                DeltaType::Removed
            )]
        );
    }

    #[test]
    fn children_without_schema_are_not_compared() {
        let old = store(vec![application("app1").with_child("host", host("bart"))]);
        let new = store(vec![application("app1").with_child("host", host("lisa"))]);

        assert!(compare(&old, &new).is_empty());
    }

    #[test]
    fn id_less_children_compare_by_position() {
        let registry = application_registry();
        let old = store(vec![application("app1")
            .with_child("fileset", fileset("lib"))
            .with_child("fileset", fileset("bin"))]);
        let new = store(vec![application("app1")
            .with_child("fileset", fileset("bin"))
            .with_child("fileset", fileset("lib"))]);

        let result = ConfigComparator::new(&old, &new, Some(&registry)).compute_delta();
        assert_eq!(
            nested(&result, "application[app1]"),
            [
                (
                    "application[app1]/fileset(fileset)[default-0]".to_string(),
                    DeltaType::Modified
                ),
                (
                    "application[app1]/fileset(fileset)[default-1]".to_string(),
                    DeltaType::Modified
                ),
            ]
        );
    }

    #[test]
    fn single_valued_children_compare_merged() {
        let registry = application_registry();
        let old = store(vec![application("app1")
            .with_child("host", host("bart"))
            .with_child("host", host("lisa"))]);
        let new = store(vec![application("app1")
            .with_child("host", host("lisa"))
            .with_child("host", host("maggie"))]);

        let result = ConfigComparator::new(&old, &new, Some(&registry)).compute_delta();
        assert_eq!(
            nested(&result, "application[app1]"),
            [("application[app1]/host(host)".to_string(), DeltaType::Modified)]
        );

        let same_outcome = store(vec![application("app1")
            .with_child("host", host("homer"))
            .with_child("host", host("maggie"))]);
        let result = ConfigComparator::new(&new, &same_outcome, Some(&registry)).compute_delta();
        assert!(result.config_deltas.is_empty());
    }

    #[test]
    fn vectors_ignore_order() {
        let registry = application_registry();
        let old = store(vec![application("app1")
            .with_list("names", ["a", "b"])
            .with_list("tags", ["a", "b"])]);

        let reordered_vector = store(vec![application("app1")
            .with_list("names", ["b", "a"])
            .with_list("tags", ["a", "b"])]);
        let result = ConfigComparator::new(&old, &reordered_vector, Some(&registry)).compute_delta();
        assert!(!result.has_delta());

        let reordered_list = store(vec![application("app1")
            .with_list("names", ["a", "b"])
            .with_list("tags", ["b", "a"])]);
        let result = ConfigComparator::new(&old, &reordered_list, Some(&registry)).compute_delta();
        assert_eq!(
            summary(&result),
            [("application[app1]".to_string(), DeltaType::Modified)]
        );
    }

    fn with_variables(variables: &[(&str, &str)], elements: Vec<ConfigElement>) -> ConfigurationStore {
        let mut document = Document::new("server.hcl".into());
        for (name, value) in variables {
            document.add_variable(Variable::new(*name, *value));
        }
        for element in elements {
            document.add_element(element);
        }
        ConfigurationStore::default().add(&document)
    }

    #[test]
    fn variables() {
        let variables = [
            ("a", "A"),
            ("az", "${a}-${z}"),
            ("za", "${z}-${a}"),
            ("combined", "${za}"),
            ("z", "Z${foo}"),
        ];
        let old = with_variables(&variables, vec![]);

        let unchanged = with_variables(&variables, vec![]);
        assert!(!ConfigComparator::new(&old, &unchanged, None)
            .compute_delta()
            .has_delta());

        let mut changed = variables;
        changed[0] = ("a", "myA");
        let result = ConfigComparator::new(&old, &with_variables(&changed, vec![]), None).compute_delta();
        assert!(result.config_deltas.is_empty());
        assert_eq!(
            result.variable_deltas,
            IndexMap::from([
                ("a".to_string(), DeltaType::Modified),
                ("az".to_string(), DeltaType::Modified),
                ("za".to_string(), DeltaType::Modified),
                ("combined".to_string(), DeltaType::Modified),
            ])
        );

        let mut added = variables.to_vec();
        added.push(("foo", "F"));
        let result = ConfigComparator::new(&old, &with_variables(&added, vec![]), None).compute_delta();
        assert_eq!(
            result.variable_deltas,
            IndexMap::from([
                ("az".to_string(), DeltaType::Modified),
                ("za".to_string(), DeltaType::Modified),
                ("combined".to_string(), DeltaType::Modified),
                ("z".to_string(), DeltaType::Modified),
                ("foo".to_string(), DeltaType::Added),
            ])
        );

        let removed = &variables[1..];
        let result = ConfigComparator::new(&old, &with_variables(removed, vec![]), None).compute_delta();
        assert_eq!(
            result.variable_deltas,
            IndexMap::from([
                ("a".to_string(), DeltaType::Removed),
                ("az".to_string(), DeltaType::Modified),
                ("za".to_string(), DeltaType::Modified),
                ("combined".to_string(), DeltaType::Modified),
            ])
        );
    }

    #[test]
    fn variable_changes_modify_referencing_elements() {
        let element = || pool("one", "${maxSize}");
        let old = with_variables(&[("maxSize", "10")], vec![element()]);
        let new = with_variables(&[("maxSize", "20")], vec![element()]);

        let result = ConfigComparator::new(&old, &new, None).compute_delta();
        assert_eq!(
            summary(&result),
            [("threadPool[one]".to_string(), DeltaType::Modified)]
        );
        assert_eq!(
            result.variable_deltas,
            IndexMap::from([("maxSize".to_string(), DeltaType::Modified)])
        );
    }
}
