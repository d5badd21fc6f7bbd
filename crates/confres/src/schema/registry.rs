//! Registry of type schemas
//!
//! Registration is copy-on-write: [SchemaRegistry::add_source] and [SchemaRegistry::remove_source] return a successor
//! and leave the original untouched, so evaluations holding a snapshot never observe a half-applied registration.
//!
//! `extends` chains are flattened at registration time. A type whose parent is not registered (yet) waits on a
//! worklist keyed by the missing parent pid and is reported as registered once its chain is complete.
use super::definition::{AttributeDefinition, SchemaSource, TypeSchema};
use arc_swap::ArcSwap;
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Registered type with its hierarchy-complete attribute definitions
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    schema: TypeSchema,
    source: String,
    attributes: IndexMap<String, AttributeDefinition>,
    resolved: bool,
}

impl RegistryEntry {
    fn unresolved(schema: TypeSchema, source: &str) -> Self {
        Self {
            attributes: schema.attributes.clone(),
            schema,
            source: source.to_string(),
            resolved: false,
        }
    }

    pub fn pid(&self) -> &str {
        &self.schema.pid
    }

    pub fn alias(&self) -> Option<&str> {
        self.schema.alias.as_deref()
    }

    pub fn child_alias(&self) -> Option<&str> {
        self.schema.child_alias.as_deref()
    }

    pub fn parent_pid(&self) -> Option<&str> {
        self.schema.parent_pid.as_deref()
    }

    pub fn extends(&self) -> Option<&str> {
        self.schema.extends.as_deref()
    }

    pub fn extends_alias(&self) -> Option<&str> {
        self.schema.extends_alias.as_deref()
    }

    pub fn is_factory(&self) -> bool {
        self.schema.factory
    }

    pub fn is_singleton(&self) -> bool {
        !self.schema.factory
    }

    pub fn object_class(&self) -> &[String] {
        &self.schema.object_class
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// False while part of the `extends` chain is missing
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Attribute definitions including inherited ones
    pub fn attributes(&self) -> &IndexMap<String, AttributeDefinition> {
        &self.attributes
    }

    pub fn attribute(&self, id: &str) -> Option<&AttributeDefinition> {
        self.attributes.get(id).or_else(|| {
            self.attributes
                .values()
                .find(|definition| definition.id.eq_ignore_ascii_case(id))
        })
    }

    /// Element name this subtype uses when nested under `attribute`, e.g. `b1.bsub1`
    pub fn effective_element_name(&self, attribute: &str) -> Option<String> {
        self.extends_alias()
            .map(|extends_alias| format!("{attribute}.{extends_alias}"))
    }

    /// The name elements of this type are written as
    pub fn element_name(&self) -> &str {
        self.alias().unwrap_or(self.pid())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    sources: IndexMap<String, Vec<TypeSchema>>,
    entries: IndexMap<String, Arc<RegistryEntry>>,
    aliases: IndexMap<String, Vec<String>>,
    subtypes: IndexMap<String, IndexSet<String>>,
    /// missing parent pid -> types waiting for it
    pending: IndexMap<String, IndexSet<String>>,
}

impl SchemaRegistry {
    /// Registers all schemas of `source`
    ///
    /// Returns the successor registry and the pids that were (re-)registered with a complete `extends` chain. An empty
    /// set means nothing changed.
    pub fn add_source(&self, source: &SchemaSource) -> (SchemaRegistry, BTreeSet<String>) {
        if self.sources.get(&source.id) == Some(&source.schemas) {
            tracing::debug!(source = %source.id, "schema source already registered");
            return (self.clone(), BTreeSet::new());
        }

        let mut next = if self.sources.contains_key(&source.id) {
            self.remove_source(&source.id).0
        } else {
            self.clone()
        };

        let mut changed = BTreeSet::new();
        next.sources
            .insert(source.id.clone(), source.schemas.clone());
        for schema in &source.schemas {
            next.register(schema, &source.id, &mut changed);
        }

        tracing::debug!(source = %source.id, ?changed, "registered schema source");
        (next, changed)
    }

    /// Deregisters everything `source_id` registered
    ///
    /// Returns the successor registry and the pids that are gone. Subtypes registered by other sources fall back onto
    /// the worklist.
    pub fn remove_source(&self, source_id: &str) -> (SchemaRegistry, BTreeSet<String>) {
        let Some(removed) = self.sources.get(source_id) else {
            return (self.clone(), BTreeSet::new());
        };

        let mut next = SchemaRegistry::default();
        let mut ignored = BTreeSet::new();
        for (id, schemas) in self.sources.iter().filter(|(id, _)| *id != source_id) {
            next.sources.insert(id.clone(), schemas.clone());
            for schema in schemas {
                next.register(schema, id, &mut ignored);
            }
        }

        let removed = removed.iter().map(|schema| schema.pid.clone()).collect();
        tracing::debug!(source = %source_id, ?removed, "removed schema source");
        (next, removed)
    }

    fn register(&mut self, schema: &TypeSchema, source: &str, changed: &mut BTreeSet<String>) {
        let pid = schema.pid.clone();

        if let Some(alias) = &schema.alias {
            let pids = self.aliases.entry(alias.to_lowercase()).or_default();
            if !pids.contains(&pid) {
                pids.push(pid.clone());
            }
        }
        if let Some(parent) = &schema.extends {
            self.subtypes
                .entry(parent.clone())
                .or_default()
                .insert(pid.clone());
        }

        self.entries.insert(
            pid.clone(),
            Arc::new(RegistryEntry::unresolved(schema.clone(), source)),
        );
        self.resolve(&pid, changed);
    }

    /// Flattens `pid` if its parent chain is complete, then everything waiting on it
    fn resolve(&mut self, pid: &str, changed: &mut BTreeSet<String>) {
        let Some(entry) = self.entries.get(pid).cloned() else {
            return;
        };

        let attributes = match entry.extends() {
            None => entry.schema.attributes.clone(),
            Some(parent_pid) => match self.entries.get(parent_pid) {
                Some(parent) if parent.resolved => {
                    let mut attributes = parent.attributes.clone();
                    for (id, definition) in &entry.schema.attributes {
                        attributes.insert(id.clone(), definition.clone());
                    }
                    attributes
                }
                _ => {
                    tracing::debug!(pid, parent = parent_pid, "deferring until parent is registered");
                    self.pending
                        .entry(parent_pid.to_string())
                        .or_default()
                        .insert(pid.to_string());
                    return;
                }
            },
        };

        let mut resolved = (*entry).clone();
        resolved.attributes = attributes;
        resolved.resolved = true;
        self.entries.insert(pid.to_string(), Arc::new(resolved));
        changed.insert(pid.to_string());

        if let Some(waiting) = self.pending.shift_remove(pid) {
            tracing::trace!(pid, ?waiting, "resuming deferred subtypes");
        }
        let subtypes: Vec<String> = self
            .subtypes
            .get(pid)
            .map(|subtypes| subtypes.iter().cloned().collect())
            .unwrap_or_default();
        for subtype in subtypes {
            self.resolve(&subtype, changed);
        }
    }

    pub fn entry(&self, pid: &str) -> Option<&Arc<RegistryEntry>> {
        self.entries.get(pid)
    }

    /// First-registered entry using `alias`
    pub fn entry_by_alias(&self, alias: &str) -> Option<&Arc<RegistryEntry>> {
        self.aliases
            .get(&alias.to_lowercase())
            .and_then(|pids| pids.first())
            .and_then(|pid| self.entries.get(pid))
    }

    /// Lookup by pid, then by alias
    pub fn entry_for(&self, name: &str) -> Option<&Arc<RegistryEntry>> {
        self.entry(name).or_else(|| self.entry_by_alias(name))
    }

    /// Type declaring itself a child of `parent_pid` under `child_alias`
    pub fn entry_for_child_alias(
        &self,
        parent_pid: &str,
        child_alias: &str,
    ) -> Option<&Arc<RegistryEntry>> {
        self.entries.values().find(|entry| {
            entry.parent_pid() == Some(parent_pid)
                && entry
                    .child_alias()
                    .is_some_and(|alias| alias.eq_ignore_ascii_case(child_alias))
        })
    }

    /// Types listing `service` in their object classes
    pub fn entries_exposing(&self, service: &str) -> Vec<&Arc<RegistryEntry>> {
        self.entries
            .values()
            .filter(|entry| entry.object_class().iter().any(|name| name == service))
            .collect()
    }

    /// All transitive subtypes of `pid`, children before their parents
    pub fn descendants(&self, pid: &str) -> Vec<Arc<RegistryEntry>> {
        let mut found = vec![];
        let mut visiting = vec![pid.to_string()];
        self.collect_descendants(pid, &mut visiting, &mut found);
        found
    }

    fn collect_descendants(
        &self,
        pid: &str,
        visiting: &mut Vec<String>,
        found: &mut Vec<Arc<RegistryEntry>>,
    ) {
        let Some(subtypes) = self.subtypes.get(pid) else {
            return;
        };
        for subtype in subtypes {
            if visiting.contains(subtype) {
                continue;
            }
            visiting.push(subtype.clone());
            self.collect_descendants(subtype, visiting, found);
            visiting.pop();
            if let Some(entry) = self.entries.get(subtype) {
                found.push(entry.clone());
            }
        }
    }

    /// Is `pid` equal to `ancestor` or does it extend it
    pub fn is_subtype_of(&self, pid: &str, ancestor: &str) -> bool {
        let mut current = Some(pid.to_string());
        let mut seen = vec![];
        while let Some(pid) = current {
            if pid == ancestor {
                return true;
            }
            if seen.contains(&pid) {
                return false;
            }
            current = self
                .entries
                .get(&pid)
                .and_then(|entry| entry.extends().map(str::to_string));
            seen.push(pid);
        }
        false
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<RegistryEntry>> {
        self.entries.values()
    }

    /// Deferred types grouped by the parent they wait for
    pub fn pending(&self) -> &IndexMap<String, IndexSet<String>> {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry shared between writers and concurrent evaluations
///
/// Readers take one [SharedSchemaRegistry::snapshot] per evaluation, writers publish successors atomically.
pub struct SharedSchemaRegistry {
    current: ArcSwap<SchemaRegistry>,
}

impl Default for SharedSchemaRegistry {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(SchemaRegistry::default()),
        }
    }
}

impl SharedSchemaRegistry {
    pub fn snapshot(&self) -> Arc<SchemaRegistry> {
        self.current.load_full()
    }

    pub fn add_source(&self, source: &SchemaSource) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        self.current.rcu(|current| {
            let (next, registered) = current.add_source(source);
            changed = registered;
            next
        });
        changed
    }

    pub fn remove_source(&self, source_id: &str) -> BTreeSet<String> {
        let mut removed = BTreeSet::new();
        self.current.rcu(|current| {
            let (next, gone) = current.remove_source(source_id);
            removed = gone;
            next
        });
        removed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::definition::{AttributeDefinition, AttributeType};
    use pretty_assertions::assert_eq;

    fn source(id: &str, schemas: Vec<TypeSchema>) -> SchemaSource {
        SchemaSource::new(id.to_string(), schemas)
    }

    fn set(pids: &[&str]) -> BTreeSet<String> {
        pids.iter().map(|pid| pid.to_string()).collect()
    }

    #[test]
    fn lookup_by_pid_and_alias() {
        let (registry, changed) = SchemaRegistry::default().add_source(&source(
            "a",
            vec![
                TypeSchema::factory("com.example.host").alias("host"),
                TypeSchema::factory("com.example.other.host").alias("host"),
            ],
        ));

        assert_eq!(changed, set(&["com.example.host", "com.example.other.host"]));
        assert_eq!(registry.entry_by_alias("HOST").unwrap().pid(), "com.example.host");
        assert_eq!(
            registry.entry_for("com.example.other.host").unwrap().pid(),
            "com.example.other.host"
        );
    }

    #[test]
    fn reregistration_is_a_noop() {
        let schemas = source("a", vec![TypeSchema::new("com.example.a")]);
        let (registry, _) = SchemaRegistry::default().add_source(&schemas);
        let (again, changed) = registry.add_source(&schemas);

        assert!(changed.is_empty());
        assert_eq!(again, registry);
    }

    #[test]
    fn extends_before_parent() {
        let child = TypeSchema::new("com.example.child")
            .extends("com.example.parent")
            .attribute(AttributeDefinition::string("own").default_value("child"))
            .attribute(AttributeDefinition::string("shared").default_value("child"));
        let grandchild = TypeSchema::new("com.example.grandchild").extends("com.example.child");
        let parent = TypeSchema::new("com.example.parent")
            .attribute(AttributeDefinition::string("shared").default_value("parent"))
            .attribute(AttributeDefinition::new("inherited", AttributeType::Integer));

        let (registry, changed) = SchemaRegistry::default()
            .add_source(&source("children", vec![grandchild, child]));
        assert!(changed.is_empty());
        assert!(!registry.entry("com.example.child").unwrap().is_resolved());
        assert_eq!(
            registry.pending().get("com.example.parent").map(|p| p.len()),
            Some(1)
        );

        let (registry, changed) = registry.add_source(&source("parent", vec![parent]));
        assert_eq!(
            changed,
            set(&["com.example.child", "com.example.grandchild", "com.example.parent"])
        );
        assert!(registry.pending().is_empty());

        let grandchild = registry.entry("com.example.grandchild").unwrap();
        let names: Vec<&str> = grandchild.attributes().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["shared", "inherited", "own"]);
        assert_eq!(
            grandchild.attribute("shared").unwrap().default_values,
            Some(vec!["child".to_string()])
        );
    }

    #[test]
    fn missing_parent_keeps_own_definitions() {
        let (registry, _) = SchemaRegistry::default().add_source(&source(
            "a",
            vec![TypeSchema::new("b")
                .extends("missing")
                .attribute(AttributeDefinition::string("x"))],
        ));

        let entry = registry.entry("b").unwrap();
        assert!(!entry.is_resolved());
        assert!(entry.attribute("x").is_some());
    }

    #[test]
    fn remove_source_defers_subtypes_again() {
        let (registry, _) = SchemaRegistry::default()
            .add_source(&source("parent", vec![TypeSchema::new("p")]));
        let (registry, _) =
            registry.add_source(&source("child", vec![TypeSchema::new("c").extends("p")]));
        assert!(registry.entry("c").unwrap().is_resolved());

        let (registry, removed) = registry.remove_source("parent");
        assert_eq!(removed, set(&["p"]));
        assert!(registry.entry("p").is_none());
        assert!(!registry.entry("c").unwrap().is_resolved());
    }

    #[test]
    fn descendants_children_first() {
        let (registry, _) = SchemaRegistry::default().add_source(&source(
            "a",
            vec![
                TypeSchema::new("b1"),
                TypeSchema::new("bsub1").extends("b1").extends_alias("bsub1"),
                TypeSchema::new("bsub2").extends("b1").extends_alias("bsub2"),
                TypeSchema::new("bsub2sub1")
                    .extends("bsub2")
                    .extends_alias("bsub2sub1"),
                TypeSchema::new("bsub3").extends("b1").extends_alias("bsub3"),
            ],
        ));

        let order: Vec<String> = registry
            .descendants("b1")
            .iter()
            .map(|entry| entry.pid().to_string())
            .collect();
        assert_eq!(order, vec!["bsub1", "bsub2sub1", "bsub2", "bsub3"]);
        assert!(registry.is_subtype_of("bsub2sub1", "b1"));
        assert_eq!(
            registry.entry("bsub1").unwrap().effective_element_name("b1"),
            Some("b1.bsub1".to_string())
        );
    }

    #[test]
    fn shared_registry_snapshots() {
        let shared = SharedSchemaRegistry::default();
        let before = shared.snapshot();

        let changed = shared.add_source(&source("a", vec![TypeSchema::new("x").exposes("svc")]));

        assert_eq!(changed, set(&["x"]));
        assert!(before.is_empty());
        assert_eq!(shared.snapshot().entries_exposing("svc").len(), 1);
    }
}
