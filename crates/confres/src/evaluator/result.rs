use crate::config_id::ConfigId;
use crate::schema::{RegistryEntry, SchemaRegistry};
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::{ser::SerializeMap, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// Evaluated property dictionary
pub type Properties = IndexMap<String, Value>;

/// Outcome of evaluating one element
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub(crate) config_id: ConfigId,
    pub(crate) entry: Option<Arc<RegistryEntry>>,
    pub(crate) pid: Option<String>,
    pub(crate) properties: Properties,
    pub(crate) nested: IndexMap<ConfigId, EvaluationResult>,
    pub(crate) unresolved: Vec<UnresolvedReference>,
    pub(crate) references: IndexSet<ConfigId>,
    pub(crate) variables: IndexMap<String, Option<String>>,
    pub(crate) issues: Vec<ValidationIssue>,
}

impl EvaluationResult {
    pub(crate) fn new(config_id: ConfigId, entry: Option<Arc<RegistryEntry>>) -> Self {
        Self {
            config_id,
            entry,
            pid: None,
            properties: Default::default(),
            nested: Default::default(),
            unresolved: vec![],
            references: Default::default(),
            variables: Default::default(),
            issues: vec![],
        }
    }

    /// Identity of the evaluated element
    pub fn config_id(&self) -> &ConfigId {
        &self.config_id
    }

    /// Schema entry the element was evaluated against
    pub fn entry(&self) -> Option<&Arc<RegistryEntry>> {
        self.entry.as_ref()
    }

    /// Configuration pid assigned by the [super::PidResolver]
    pub fn pid(&self) -> Option<&str> {
        self.pid.as_deref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Property lookup ignoring case
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).or_else(|| {
            self.properties
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    /// Results of nested elements, keyed by their identity
    pub fn nested(&self) -> &IndexMap<ConfigId, EvaluationResult> {
        &self.nested
    }

    pub fn unresolved(&self) -> &[UnresolvedReference] {
        &self.unresolved
    }

    /// Warns about the unresolved references of this result and its nested results, returns how many were reported
    pub fn report_unresolved(&self, registry: &SchemaRegistry) -> usize {
        let own = self
            .unresolved
            .iter()
            .filter(|reference| reference.report_error(registry))
            .count();
        own + self
            .nested
            .values()
            .map(|nested| nested.report_unresolved(registry))
            .sum::<usize>()
    }

    /// Identities this element referred to, resolved or not
    pub fn references(&self) -> &IndexSet<ConfigId> {
        &self.references
    }

    /// Variables consulted, `None` for names that were not bound
    pub fn variables(&self) -> &IndexMap<String, Option<String>> {
        &self.variables
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

impl Serialize for EvaluationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("valid", &self.is_valid())?;
        map.serialize_entry("properties", &self.properties)?;
        if !self.nested.is_empty() {
            map.serialize_entry("nested", &self.nested)?;
        }
        if !self.unresolved.is_empty() {
            let unresolved: Vec<String> = self.unresolved.iter().map(|u| u.to_string()).collect();
            map.serialize_entry("unresolved", &unresolved)?;
        }
        if !self.issues.is_empty() {
            let issues: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
            map.serialize_entry("issues", &issues)?;
        }
        map.end()
    }
}

/// Reference that did not resolve to exactly one configuration
#[derive(Debug, Clone, PartialEq)]
pub enum UnresolvedReference {
    Pid {
        pid: String,
        attribute: String,
        value: String,
        referrer: ConfigId,
    },
    Service {
        service: String,
        attribute: String,
        value: String,
        referrer: ConfigId,
        /// number of matching configurations
        count: usize,
    },
}

impl UnresolvedReference {
    /// Warns about this reference if it can be diagnosed against `registry`, returns whether it warned
    pub fn report_error(&self, registry: &SchemaRegistry) -> bool {
        match self {
            UnresolvedReference::Pid { pid, .. } => {
                if registry.entry(pid).is_none() {
                    return false;
                }
                tracing::warn!(%self, "unresolved reference");
                true
            }
            UnresolvedReference::Service { service, count, .. } => {
                if *count == 0 && registry.entries_exposing(service).is_empty() {
                    return false;
                }
                tracing::warn!(%self, "unresolved service reference");
                true
            }
        }
    }

    /// Same reference, attributed to `config_id`
    pub(crate) fn with_referrer(mut self, config_id: &ConfigId) -> Self {
        match &mut self {
            UnresolvedReference::Pid { referrer, .. } => *referrer = config_id.clone(),
            UnresolvedReference::Service { referrer, .. } => *referrer = config_id.clone(),
        }
        self
    }

    pub fn attribute(&self) -> &str {
        match self {
            UnresolvedReference::Pid { attribute, .. } => attribute,
            UnresolvedReference::Service { attribute, .. } => attribute,
        }
    }
}

impl Display for UnresolvedReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReference::Pid {
                pid,
                attribute,
                value,
                referrer,
            } => write!(
                f,
                "{referrer}: attribute {attribute} references {pid}[{value}] which does not exist"
            ),
            UnresolvedReference::Service {
                service,
                attribute,
                value,
                referrer,
                count: 0,
            } => write!(
                f,
                "{referrer}: attribute {attribute} references {value} but nothing exposing {service} has that id"
            ),
            UnresolvedReference::Service {
                service,
                attribute,
                value,
                referrer,
                count,
            } => write!(
                f,
                "{referrer}: attribute {attribute} references {value} which matches {count} configurations exposing {service}"
            ),
        }
    }
}

/// Reason an evaluation is invalid
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    MissingRequired {
        attribute: String,
    },
    InvalidValue {
        attribute: String,
        value: String,
        reason: String,
    },
    /// a final attribute was given a value other than its default
    FinalOverridden {
        attribute: String,
        value: String,
        expected: String,
    },
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingRequired { attribute } => {
                write!(f, "missing required attribute {attribute}")
            }
            ValidationIssue::InvalidValue {
                attribute,
                value,
                reason,
            } => write!(f, "invalid value `{value}` for {attribute}: {reason}"),
            ValidationIssue::FinalOverridden {
                attribute,
                value,
                expected,
            } => write!(
                f,
                "{attribute} is final, `{value}` differs from `{expected}`, invalid config is being ignored"
            ),
        }
    }
}
