//! Raw configuration elements
//!
//! A [ConfigElement] is what a document contributes before any evaluation happens: a node name, attributes and
//! nested children, all looked up case-insensitively.
use crate::config_id::ConfigId;
use indexmap::IndexMap;
use std::str::FromStr;

/// Attribute holding the element id
pub const ID: &str = "id";

/// Attribute disabling an element without removing it
pub const CONFIGURATION_ENABLED: &str = "configurationEnabled";

/// How a later contribution combines with an earlier one for the same element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeBehavior {
    /// union of attributes, later values win, lists and children are concatenated
    #[default]
    Merge,
    /// the later contribution supersedes everything before it
    Replace,
    /// the earlier contribution wins, only missing attributes are taken over
    Ignore,
}

impl FromStr for MergeBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "replace" => Ok(Self::Replace),
            "ignore" => Ok(Self::Ignore),
            _ => Err(format!("unknown merge behavior `{s}`")),
        }
    }
}

/// Ordered map with case-insensitive keys
///
/// The first spelling of a key is kept for display, later inserts under any spelling replace the value.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseInsensitiveMap<V> {
    entries: IndexMap<String, (String, V)>,
}

impl<V> Default for CaseInsensitiveMap<V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<V> CaseInsensitiveMap<V> {
    fn key(name: &str) -> String {
        name.to_lowercase()
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.get(&Self::key(name)).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        self.entries
            .get_mut(&Self::key(name))
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&Self::key(name))
    }

    /// Inserts or replaces, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        match self.entries.get_mut(&Self::key(&name)) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.insert(Self::key(&name), (name, value));
                None
            }
        }
    }

    pub fn get_or_insert_with(&mut self, name: &str, f: impl FnOnce() -> V) -> &mut V {
        &mut self
            .entries
            .entry(Self::key(name))
            .or_insert_with(|| (name.to_string(), f()))
            .1
    }

    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.entries
            .shift_remove(&Self::key(name))
            .map(|(_, value)| value)
    }

    /// Entries in insertion order, keyed by their first spelling
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Value of a plain attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Single(String),
    List(Vec<String>),
}

impl AttributeValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            AttributeValue::Single(value) => Some(value),
            AttributeValue::List(_) => None,
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            AttributeValue::Single(value) => vec![value],
            AttributeValue::List(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Single(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Single(value)
    }
}

/// A nested child: either a full element or a text-only node
#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Text(String),
    Element(ConfigElement),
}

impl Child {
    pub fn as_element(&self) -> Option<&ConfigElement> {
        match self {
            Child::Element(element) => Some(element),
            Child::Text(_) => None,
        }
    }
}

/// Unevaluated value of a property: a single string or a list of strings and elements
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    List(Vec<Child>),
}

/// Identity of the element this one is nested in
#[derive(Debug, Clone, PartialEq)]
struct Parent {
    id: ConfigId,
    display_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigElement {
    node_name: String,
    pid: Option<String>,
    attributes: CaseInsensitiveMap<AttributeValue>,
    children: CaseInsensitiveMap<Vec<Child>>,
    location: Option<String>,
    merge_behavior: MergeBehavior,
    parent: Option<Parent>,
    default_id: bool,
}

impl ConfigElement {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            pid: None,
            attributes: Default::default(),
            children: Default::default(),
            location: None,
            merge_behavior: MergeBehavior::default(),
            parent: None,
            default_id: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(id);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_list<S: Into<String>>(mut self, name: &str, values: impl IntoIterator<Item = S>) -> Self {
        self.set_attribute(
            name,
            AttributeValue::List(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn with_child(mut self, tag: &str, element: ConfigElement) -> Self {
        self.add_child(tag, Child::Element(element));
        self
    }

    pub fn with_text(mut self, tag: &str, text: impl Into<String>) -> Self {
        self.add_child(tag, Child::Text(text.into()));
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_merge_behavior(mut self, merge_behavior: MergeBehavior) -> Self {
        self.merge_behavior = merge_behavior;
        self
    }

    /// The tag this element was written as (pid or alias)
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// The canonical pid, falling back to the node name
    pub fn pid(&self) -> &str {
        self.pid.as_deref().unwrap_or(&self.node_name)
    }

    pub fn set_pid(&mut self, pid: impl Into<String>) {
        self.pid = Some(pid.into());
    }

    pub fn id(&self) -> Option<&str> {
        self.attributes.get(ID).and_then(AttributeValue::as_single)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.attributes.insert(ID, AttributeValue::Single(id.into()));
        self.default_id = false;
    }

    /// Assigns a synthesized id such as `default-0`
    pub fn set_default_id(&mut self, id: impl Into<String>) {
        self.attributes.insert(ID, AttributeValue::Single(id.into()));
        self.default_id = true;
    }

    pub fn uses_default_id(&self) -> bool {
        self.default_id
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn merge_behavior(&self) -> MergeBehavior {
        self.merge_behavior
    }

    pub fn set_merge_behavior(&mut self, merge_behavior: MergeBehavior) {
        self.merge_behavior = merge_behavior;
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(name, value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    pub fn attributes(&self) -> &CaseInsensitiveMap<AttributeValue> {
        &self.attributes
    }

    pub fn add_child(&mut self, tag: &str, child: Child) {
        self.children.get_or_insert_with(tag, Vec::new).push(child);
    }

    pub fn children(&self, tag: &str) -> &[Child] {
        self.children.get(tag).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn child_elements<'a>(&'a self, tag: &str) -> impl Iterator<Item = &'a ConfigElement> {
        self.children(tag).iter().filter_map(Child::as_element)
    }

    pub fn all_children(&self) -> &CaseInsensitiveMap<Vec<Child>> {
        &self.children
    }

    /// Raw value for `name`: the attribute form wins over nested children
    pub fn raw(&self, name: &str) -> Option<RawValue> {
        if let Some(attribute) = self.attributes.get(name) {
            return Some(match attribute {
                AttributeValue::Single(value) => RawValue::Text(value.clone()),
                AttributeValue::List(values) => {
                    RawValue::List(values.iter().cloned().map(Child::Text).collect())
                }
            });
        }

        self.children
            .get(name)
            .filter(|children| !children.is_empty())
            .map(|children| RawValue::List(children.clone()))
    }

    /// Names of attributes and child tags, attributes first
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.names().map(str::to_string).collect();
        for tag in self.children.names() {
            if !self.attributes.contains(tag) {
                names.push(tag.to_string());
            }
        }
        names
    }

    pub fn set_parent(&mut self, parent: &ConfigElement) {
        self.parent = Some(Parent {
            id: parent.config_id(),
            display_id: parent.display_id(),
        });
    }

    pub fn parent_id(&self) -> Option<&ConfigId> {
        self.parent.as_ref().map(|parent| &parent.id)
    }

    pub fn config_id(&self) -> ConfigId {
        let id = self.id().map(str::to_string);
        match &self.parent {
            Some(parent) => ConfigId::nested(&parent.id, self.pid(), id, &self.node_name),
            None => ConfigId::new(self.pid(), id),
        }
    }

    /// Identity using node names, e.g. `host[one]/port[default-0]`
    pub fn display_id(&self) -> String {
        let own = match self.id() {
            Some(id) => format!("{}[{id}]", self.node_name),
            None => self.node_name.clone(),
        };
        match &self.parent {
            Some(parent) => format!("{}/{own}", parent.display_id),
            None => own,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.attributes
            .get(CONFIGURATION_ENABLED)
            .and_then(AttributeValue::as_single)
            .map_or(true, |enabled| !enabled.trim().eq_ignore_ascii_case("false"))
    }

    /// Applies a later contribution: its attributes override, lists and children are appended
    pub fn merge_from(&mut self, later: &ConfigElement) {
        for (name, value) in later.attributes.iter() {
            let merged = match (self.attributes.get(name), value) {
                (Some(AttributeValue::List(earlier)), AttributeValue::List(values)) => {
                    AttributeValue::List(earlier.iter().chain(values).cloned().collect())
                }
                _ => value.clone(),
            };
            self.attributes.insert(name, merged);
        }

        for (tag, children) in later.children.iter() {
            self.children
                .get_or_insert_with(tag, Vec::new)
                .extend(children.iter().cloned());
        }

        if later.location.is_some() {
            self.location.clone_from(&later.location);
        }
        if !later.default_id && later.attributes.contains(ID) {
            self.default_id = false;
        }
    }

    /// Takes over only what this element does not define yet
    pub fn fill_from(&mut self, later: &ConfigElement) {
        for (name, value) in later.attributes.iter() {
            if !self.attributes.contains(name) {
                self.attributes.insert(name, value.clone());
            }
        }
        for (tag, children) in later.children.iter() {
            if !self.children.contains(tag) {
                self.children.insert(tag, children.clone());
            }
        }
    }
}
