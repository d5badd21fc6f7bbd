//! Variables defined by documents or on the command line
use crate::element::MergeBehavior;
use crate::expression::{self, PropertyLookup};
use crate::value::Value;
use indexmap::IndexMap;

/// Where a variable value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableOrigin {
    /// document location
    Document(String),
    CommandLine,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub origin: VariableOrigin,
    pub merge_behavior: MergeBehavior,
    pub obscured: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            origin: VariableOrigin::Document(String::new()),
            merge_behavior: MergeBehavior::default(),
            obscured: false,
        }
    }

    pub fn with_origin(mut self, location: impl Into<String>) -> Self {
        self.origin = VariableOrigin::Document(location.into());
        self
    }

    pub fn with_merge_behavior(mut self, merge_behavior: MergeBehavior) -> Self {
        self.merge_behavior = merge_behavior;
        self
    }

    pub fn obscured(mut self) -> Self {
        self.obscured = true;
        self
    }
}

/// Collects `--name=value` overrides
///
/// Entries without the `--` prefix, without `=` or with an empty name are ignored. Later entries win.
pub fn parse_command_line<S: AsRef<str>>(args: &[S]) -> IndexMap<String, String> {
    let mut overrides = IndexMap::new();
    for arg in args {
        let arg = arg.as_ref();
        let parsed = arg
            .strip_prefix("--")
            .and_then(|rest| rest.split_once('='))
            .filter(|(name, _)| !name.is_empty());

        match parsed {
            Some((name, value)) => {
                overrides.insert(name.to_string(), value.to_string());
            }
            None => tracing::debug!(arg, "ignoring malformed command line variable"),
        }
    }
    overrides
}

/// Resolved variables: command line overrides beat document values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableRegistry {
    document: IndexMap<String, Variable>,
    command_line: IndexMap<String, String>,
}

impl VariableRegistry {
    pub fn new<S: AsRef<str>>(variables: impl IntoIterator<Item = Variable>, command_line: &[S]) -> Self {
        Self {
            document: variables
                .into_iter()
                .map(|variable| (variable.name.clone(), variable))
                .collect(),
            command_line: parse_command_line(command_line),
        }
    }

    /// Value as written, before substitution
    pub fn raw(&self, name: &str) -> Option<&str> {
        self.command_line
            .get(name)
            .or_else(|| self.document.get(name).map(|variable| &variable.value))
            .map(String::as_str)
    }

    /// Value with all references to other variables substituted
    pub fn lookup(&self, name: &str) -> Result<Option<String>, VariableError> {
        Ok(Resolver::new(self)
            .lookup(name)?
            .map(|value| value.to_string()))
    }

    /// Substitutes variables in `text`, unknown ones stay literal
    pub fn resolve_str(&self, text: &str) -> Result<String, VariableError> {
        expression::substitute(text, &mut Resolver::new(self))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.raw(name).is_some()
    }

    pub fn is_obscured(&self, name: &str) -> bool {
        self.document
            .get(name)
            .is_some_and(|variable| variable.obscured)
    }

    /// Names of all variables, document variables first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.document.keys().map(String::as_str).chain(
            self.command_line
                .keys()
                .filter(|name| !self.document.contains_key(*name))
                .map(String::as_str),
        )
    }
}

/// Lookup through the registry, tracking the chain of variables being resolved
struct Resolver<'a> {
    registry: &'a VariableRegistry,
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(registry: &'a VariableRegistry) -> Self {
        Self {
            registry,
            stack: vec![],
        }
    }
}

impl PropertyLookup for Resolver<'_> {
    type Error = VariableError;

    fn lookup(&mut self, name: &str) -> Result<Option<Value>, VariableError> {
        let registry = self.registry;
        let Some(raw) = registry.raw(name) else {
            return Ok(None);
        };

        if self.stack.iter().any(|entry| entry == name) {
            let mut chain = self.stack.clone();
            chain.push(name.to_string());
            return Err(VariableError::Cycle(chain));
        }

        self.stack.push(name.to_string());
        let resolved = expression::substitute(raw, self);
        self.stack.pop();

        Ok(Some(Value::from(resolved?)))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("Variable evaluation loop detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}
