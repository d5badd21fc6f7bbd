//! Merged view over all added documents
//!
//! Every element and variable remembers which document contributed it and when. Adding a document appends
//! contributions and refolds the entries it touched, removing one drops its contributions and refolds the same
//! entries. Folding walks contributions in application order and combines them according to each contribution's
//! [MergeBehavior].
//!
//! Elements without an id are singletons keyed by node name. Elements with an id are factory instances keyed by node
//! name and id.
use crate::document::Document;
use crate::element::{ConfigElement, MergeBehavior};
use crate::variables::{Variable, VariableRegistry};
use indexmap::IndexMap;
use std::sync::Arc;

/// One document's part of an entry
#[derive(Debug, Clone, PartialEq)]
struct Contribution<T> {
    /// (application order of the document, position inside the document)
    position: (u64, usize),
    document: String,
    item: Arc<T>,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    contributions: Vec<Contribution<ConfigElement>>,
    merged: Arc<ConfigElement>,
    enabled: bool,
}

impl Entry {
    fn fold(contributions: Vec<Contribution<ConfigElement>>) -> Option<Self> {
        let merged = fold_elements(contributions.iter().map(|contribution| &*contribution.item))?;
        Some(Self {
            enabled: merged.is_enabled(),
            merged: Arc::new(merged),
            contributions,
        })
    }
}

fn fold_elements<'a>(elements: impl IntoIterator<Item = &'a ConfigElement>) -> Option<ConfigElement> {
    let mut merged: Option<ConfigElement> = None;
    for element in elements {
        merged = Some(match (merged, element.merge_behavior()) {
            (None, _) | (Some(_), MergeBehavior::Replace) => element.clone(),
            (Some(mut earlier), MergeBehavior::Merge) => {
                earlier.merge_from(element);
                earlier
            }
            (Some(mut earlier), MergeBehavior::Ignore) => {
                earlier.fill_from(element);
                earlier
            }
        });
    }
    merged
}

#[derive(Debug, Clone, PartialEq)]
struct VariableEntry {
    contributions: Vec<Contribution<Variable>>,
    resolved: Variable,
}

impl VariableEntry {
    /// Last `REPLACE`, else last `MERGE`, else the first `IGNORE`
    fn fold(contributions: Vec<Contribution<Variable>>) -> Option<Self> {
        let last_with = |behavior: MergeBehavior| {
            contributions
                .iter()
                .rev()
                .find(|contribution| contribution.item.merge_behavior == behavior)
        };
        let winner = last_with(MergeBehavior::Replace)
            .or_else(|| last_with(MergeBehavior::Merge))
            .or_else(|| contributions.first())?;

        Some(Self {
            resolved: (*winner.item).clone(),
            contributions,
        })
    }
}

/// Immutable store of merged configuration
///
/// [ConfigurationStore::add] and [ConfigurationStore::remove] return a successor. Removing a document restores exactly
/// the store it was added to.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationStore {
    /// document location -> application order
    documents: IndexMap<String, u64>,
    next_order: u64,
    singletons: IndexMap<String, Entry>,
    factories: IndexMap<String, IndexMap<String, Entry>>,
    variables: IndexMap<String, VariableEntry>,
    defaults: Option<Arc<ConfigurationStore>>,
}

impl PartialEq for ConfigurationStore {
    fn eq(&self, other: &Self) -> bool {
        self.documents.keys().eq(other.documents.keys())
            && self.singletons == other.singletons
            && self.factories == other.factories
            && self.variables == other.variables
            && self.defaults == other.defaults
    }
}

impl ConfigurationStore {
    /// Store consulted for anything no explicit document defines
    pub fn with_defaults(mut self, defaults: ConfigurationStore) -> Self {
        self.defaults = Some(Arc::new(defaults));
        self
    }

    pub fn defaults(&self) -> Option<&ConfigurationStore> {
        self.defaults.as_deref()
    }

    /// Applies `document` after everything added so far
    ///
    /// A document with a location that is already present replaces the earlier one.
    #[tracing::instrument(level = "trace", skip_all, fields(document = document.location()))]
    pub fn add(&self, document: &Document) -> Self {
        let mut next = if self.documents.contains_key(document.location()) {
            self.remove(document.location())
        } else {
            self.clone()
        };

        let order = next.next_order;
        next.next_order += 1;
        next.documents.insert(document.location().to_string(), order);

        for (index, element) in document.elements().iter().enumerate() {
            let contribution = Contribution {
                position: (order, index),
                document: document.location().to_string(),
                item: Arc::new(element.clone()),
            };
            let slot = match element.id() {
                Some(id) => next
                    .factories
                    .get(element.node_name())
                    .and_then(|instances| instances.get(id)),
                None => next.singletons.get(element.node_name()),
            };
            let mut contributions = slot
                .map(|entry| entry.contributions.clone())
                .unwrap_or_default();
            contributions.push(contribution);
            let Some(entry) = Entry::fold(contributions) else {
                continue;
            };

            tracing::trace!(element = %element.display_id(), enabled = entry.enabled, "folded element");
            match element.id() {
                Some(id) => {
                    next.factories
                        .entry(element.node_name().to_string())
                        .or_default()
                        .insert(id.to_string(), entry);
                }
                None => {
                    next.singletons
                        .insert(element.node_name().to_string(), entry);
                }
            }
        }

        for (index, variable) in document.variables().iter().enumerate() {
            let mut contributions = next
                .variables
                .get(&variable.name)
                .map(|entry| entry.contributions.clone())
                .unwrap_or_default();
            contributions.push(Contribution {
                position: (order, document.elements().len() + index),
                document: document.location().to_string(),
                item: Arc::new(variable.clone()),
            });
            if let Some(entry) = VariableEntry::fold(contributions) {
                next.variables.insert(variable.name.clone(), entry);
            }
        }

        tracing::debug!(
            elements = document.elements().len(),
            variables = document.variables().len(),
            "added document"
        );
        next
    }

    /// Drops everything `location` contributed
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn remove(&self, location: &str) -> Self {
        let mut next = self.clone();
        if next.documents.shift_remove(location).is_none() {
            return next;
        }

        let refold = |entries: &mut IndexMap<String, Entry>| {
            let touched: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.contributions.iter().any(|c| c.document == location))
                .map(|(key, _)| key.clone())
                .collect();
            for key in touched {
                let Some(entry) = entries.get(&key) else {
                    continue;
                };
                let remaining: Vec<_> = entry
                    .contributions
                    .iter()
                    .filter(|contribution| contribution.document != location)
                    .cloned()
                    .collect();
                match Entry::fold(remaining) {
                    Some(entry) => {
                        entries.insert(key, entry);
                    }
                    None => {
                        entries.shift_remove(&key);
                    }
                }
            }
        };

        refold(&mut next.singletons);
        for instances in next.factories.values_mut() {
            refold(instances);
        }
        next.factories.retain(|_, instances| !instances.is_empty());

        let touched: Vec<String> = next
            .variables
            .iter()
            .filter(|(_, entry)| entry.contributions.iter().any(|c| c.document == location))
            .map(|(name, _)| name.clone())
            .collect();
        for name in touched {
            let Some(entry) = next.variables.get(&name) else {
                continue;
            };
            let remaining: Vec<_> = entry
                .contributions
                .iter()
                .filter(|contribution| contribution.document != location)
                .cloned()
                .collect();
            match VariableEntry::fold(remaining) {
                Some(entry) => {
                    next.variables.insert(name, entry);
                }
                None => {
                    next.variables.shift_remove(&name);
                }
            }
        }

        tracing::debug!("removed document");
        next
    }

    /// Locations of all added documents in application order
    pub fn documents(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    /// Merged singleton written as `pid` or `alias`, falling back to the default configuration
    ///
    /// Disabled elements are returned as well, see [ConfigElement::is_enabled].
    pub fn singleton(&self, pid: &str, alias: Option<&str>) -> Option<ConfigElement> {
        let entries = names(pid, alias).filter_map(|name| self.singletons.get(name));
        match merge_entries(entries) {
            Some(mut element) => {
                element.set_pid(pid);
                Some(element)
            }
            None => self.defaults.as_ref()?.singleton(pid, alias),
        }
    }

    /// Merged factory instance written as `pid` or `alias`, falling back to the default configuration
    pub fn factory_instance(&self, pid: &str, alias: Option<&str>, id: &str) -> Option<ConfigElement> {
        let entries = names(pid, alias)
            .filter_map(|name| self.factories.get(name))
            .filter_map(|instances| instances.get(id));
        match merge_entries(entries) {
            Some(mut element) => {
                element.set_pid(pid);
                Some(element)
            }
            None => self.defaults.as_ref()?.factory_instance(pid, alias, id),
        }
    }

    /// Names of enabled singletons
    pub fn singleton_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .singletons
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(defaults) = &self.defaults {
            for name in defaults.singleton_names() {
                if !self.singletons.contains_key(&name) && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Names with at least one enabled factory instance
    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .keys()
            .filter(|name| !self.factory_ids(name).is_empty())
            .cloned()
            .collect();
        if let Some(defaults) = &self.defaults {
            for name in defaults.factory_names() {
                if !names.contains(&name) && !self.factory_ids(&name).is_empty() {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Ids of the enabled instances written as `name`
    pub fn factory_ids(&self, name: &str) -> Vec<String> {
        let explicit = self.factories.get(name);
        let mut ids: Vec<String> = explicit
            .into_iter()
            .flatten()
            .filter(|(_, entry)| entry.enabled)
            .map(|(id, _)| id.clone())
            .collect();
        if let Some(defaults) = &self.defaults {
            for id in defaults.factory_ids(name) {
                let overridden = explicit.is_some_and(|instances| instances.contains_key(&id));
                if !overridden {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Names of all enabled configurations, singletons first
    pub fn configuration_names(&self) -> Vec<String> {
        let mut names = self.singleton_names();
        for name in self.factory_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Every enabled top-level element, singletons first
    pub fn enabled_elements(&self) -> Vec<ConfigElement> {
        let singletons = self
            .singleton_names()
            .into_iter()
            .filter_map(|name| self.singleton(&name, None));
        let instances = self.factory_names().into_iter().flat_map(|name| {
            self.factory_ids(&name)
                .into_iter()
                .filter_map(move |id| self.factory_instance(&name, None, &id))
                .collect::<Vec<_>>()
        });
        singletons.chain(instances).collect()
    }

    /// Resolved variables, including default ones that are not overridden
    pub fn variables(&self) -> IndexMap<String, Variable> {
        let mut variables: IndexMap<String, Variable> = self
            .variables
            .iter()
            .map(|(name, entry)| (name.clone(), entry.resolved.clone()))
            .collect();
        if let Some(defaults) = &self.defaults {
            for (name, variable) in defaults.variables() {
                variables.entry(name).or_insert(variable);
            }
        }
        variables
    }

    pub fn variable_registry<S: AsRef<str>>(&self, command_line: &[S]) -> VariableRegistry {
        VariableRegistry::new(self.variables().into_values(), command_line)
    }
}

fn names<'a>(pid: &'a str, alias: Option<&'a str>) -> impl Iterator<Item = &'a str> {
    std::iter::once(pid).chain(alias.filter(|alias| *alias != pid))
}

/// Merges entries written under different names in application order
fn merge_entries<'a>(entries: impl Iterator<Item = &'a Entry>) -> Option<ConfigElement> {
    let entries: Vec<&Entry> = entries.collect();
    match entries.as_slice() {
        [] => None,
        [entry] => Some((*entry.merged).clone()),
        _ => {
            let mut contributions: Vec<&Contribution<ConfigElement>> = entries
                .iter()
                .flat_map(|entry| &entry.contributions)
                .collect();
            contributions.sort_by_key(|contribution| contribution.position);
            fold_elements(contributions.into_iter().map(|contribution| &*contribution.item))
        }
    }
}
