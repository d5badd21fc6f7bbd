//! Evaluation of raw elements into typed property dictionaries
//!
//! Schema attributes are evaluated first (final ones last), then whatever the element carries without a definition.
//! Each value goes through
//! 1. raw value selection: attribute, nested children, variable extension, default
//! 2. `${list(...)}` expansion and `${...}` substitution
//! 3. coercion to the declared type and cardinality
//!
//! Invalid values fall back to the default with a warning. Only cardinality overflow and evaluation loops abort an
//! evaluation, everything else is recorded on the [EvaluationResult].
mod coerce;
mod context;
mod resolver;
mod result;

pub use resolver::{PidResolver, StoreResolver};
pub use result::{EvaluationResult, Properties, UnresolvedReference, ValidationIssue};

use crate::config_id::ConfigId;
use crate::element::{AttributeValue, Child, ConfigElement, RawValue, ID};
use crate::expression::{self, PropertyLookup};
use crate::schema::{AttributeDefinition, AttributeType, RegistryEntry, SchemaRegistry, Substitution};
use crate::store::ConfigurationStore;
use crate::util::{parse_list, reference_attribute_names, split_references};
use crate::value::{Scalar, Value};
use crate::variables::{VariableError, VariableRegistry};
use context::EvaluationContext;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Property resolving to the element's own configuration pid
const SERVICE_PID: &str = "service.pid";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EvaluateError {
    #[error("Attribute {attribute} exceeded maximum allowed size {max}")]
    CardinalityExceeded { attribute: String, max: usize },
    #[error(transparent)]
    VariableCycle(#[from] VariableError),
    #[error("Attribute {0} is a reference without a target type or service")]
    MissingReferenceTarget(String),
}

/// Why a value could not be converted
enum Conversion {
    Invalid { value: String, reason: String },
    Fatal(EvaluateError),
}

impl From<EvaluateError> for Conversion {
    fn from(error: EvaluateError) -> Self {
        Conversion::Fatal(error)
    }
}

pub struct ConfigEvaluator<'a> {
    variables: &'a VariableRegistry,
    resolver: &'a dyn PidResolver,
    registry: Option<&'a SchemaRegistry>,
    store: Option<&'a ConfigurationStore>,
}

impl<'a> ConfigEvaluator<'a> {
    pub fn new(variables: &'a VariableRegistry, resolver: &'a dyn PidResolver) -> Self {
        Self {
            variables,
            resolver,
            registry: None,
            store: None,
        }
    }

    pub fn with_registry(mut self, registry: &'a SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Store used to look up the targets of flat references
    pub fn with_store(mut self, store: &'a ConfigurationStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Schema entry for a top-level element written as `name` (pid or alias)
    pub fn entry_for(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.registry?.entry_for(name).cloned()
    }

    /// Evaluates a top-level element
    #[tracing::instrument(level = "trace", skip_all, fields(element = %element.display_id()))]
    pub fn evaluate(
        &self,
        element: &ConfigElement,
        entry: Option<&Arc<RegistryEntry>>,
    ) -> Result<EvaluationResult, EvaluateError> {
        let mut element = element.clone();
        if let Some(entry) = entry {
            element.set_pid(entry.pid());
        }

        let mut result = self.evaluate_element(&element, entry.cloned(), "", false)?;
        result.pid = self.resolver.lookup_pid(&result.config_id);
        Ok(result)
    }

    /// Evaluates every enabled element of the store
    ///
    /// A failing element does not stop the others.
    pub fn evaluate_all(&self) -> IndexMap<ConfigId, Result<EvaluationResult, EvaluateError>> {
        let Some(store) = self.store else {
            return IndexMap::new();
        };

        store
            .enabled_elements()
            .into_iter()
            .map(|mut element| {
                let entry = self.entry_for(element.node_name());
                if let Some(entry) = &entry {
                    element.set_pid(entry.pid());
                }
                let result = self.evaluate(&element, entry.as_ref());
                let id = match &result {
                    Ok(result) => result.config_id.clone(),
                    Err(error) => {
                        tracing::warn!(element = %element.display_id(), %error, "evaluation failed");
                        element.config_id()
                    }
                };
                (id, result)
            })
            .collect()
    }

    fn evaluate_element(
        &self,
        element: &ConfigElement,
        entry: Option<Arc<RegistryEntry>>,
        prefix: &str,
        ignore_warnings: bool,
    ) -> Result<EvaluationResult, EvaluateError> {
        let config_id = identity(element, entry.as_deref());
        let mut ctx = EvaluationContext::new(element, entry.clone(), config_id, prefix, ignore_warnings);

        if let Some(entry) = &entry {
            let (finals, others): (Vec<_>, Vec<_>) = entry
                .attributes()
                .values()
                .cloned()
                .partition(|definition| definition.is_final);
            for definition in &others {
                self.evaluate_defined(&mut ctx, definition)?;
            }
            for definition in &finals {
                self.check_final(&mut ctx, definition);
                self.evaluate_defined(&mut ctx, definition)?;
            }
        }

        for name in element.property_names() {
            if name.starts_with("config.") || ctx.is_processed(&name) {
                continue;
            }
            if !prefix.is_empty() && name.eq_ignore_ascii_case(ID) && element.uses_default_id() {
                continue;
            }
            self.evaluate_undefined(&mut ctx, &name)?;
        }

        ctx.apply_copies();
        self.evaluate_pending(&mut ctx)?;

        if prefix.is_empty() {
            let config_id = ctx.result.config_id.clone();
            if config_id.id().is_some() {
                ctx.set("config.id", Value::from(config_id.to_string()));
            }
            ctx.set("config.displayId", Value::from(element.display_id()));
            if let Some(parent) = element.parent_id() {
                let parent_pid = self
                    .resolver
                    .lookup_pid(parent)
                    .unwrap_or_else(|| parent.to_string());
                ctx.set("config.parentPID", Value::from(parent_pid));
            }
        }

        Ok(ctx.result)
    }

    fn evaluate_defined(
        &self,
        ctx: &mut EvaluationContext,
        definition: &AttributeDefinition,
    ) -> Result<(), EvaluateError> {
        if ctx.is_evaluated(&definition.id) {
            return Ok(());
        }

        let value = self.evaluate_attribute(ctx, definition)?;
        if value.is_none() && definition.required && !ctx.has_unresolved(&definition.id) {
            ctx.invalid(ValidationIssue::MissingRequired {
                attribute: definition.id.clone(),
            });
        }
        Ok(())
    }

    /// Evaluates a schema attribute once, later calls return the stored value
    fn evaluate_attribute(
        &self,
        ctx: &mut EvaluationContext,
        definition: &AttributeDefinition,
    ) -> Result<Option<Value>, EvaluateError> {
        if !ctx.start_evaluation(&definition.id) {
            return Ok(ctx.get(&definition.id).cloned());
        }

        let previous = std::mem::replace(&mut ctx.attribute, definition.id.clone());
        let value = self.attribute_value(ctx, definition);
        ctx.attribute = previous;

        let value = value?;
        if let Some(value) = &value {
            if !definition.flat {
                ctx.set(&definition.id, value.clone());
            }
        }
        Ok(value)
    }

    fn attribute_value(
        &self,
        ctx: &mut EvaluationContext,
        definition: &AttributeDefinition,
    ) -> Result<Option<Value>, EvaluateError> {
        if let Some(source) = &definition.copy_of {
            ctx.copies.push((definition.id.clone(), source.clone()));
        }
        if definition.flat && definition.kind == AttributeType::Pid {
            return self.evaluate_flat(ctx, definition);
        }

        let raw = if definition.is_final {
            None
        } else if definition.kind == AttributeType::Pid {
            self.reference_raw(ctx, definition)
        } else {
            ctx.element.raw(&definition.id)
        };

        if raw.is_none() && definition.is_wildcard() {
            let target = definition.reference.as_deref().unwrap_or_default();
            let pids = self
                .resolver
                .instances(target)
                .into_iter()
                .map(Scalar::String)
                .collect();
            return Ok(Some(Value::Vector(pids)));
        }

        let raw = match raw {
            Some(raw) => Some(raw),
            None => self.unconfigured(ctx, definition)?,
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        let raw = self.expand_lists(ctx, raw, definition)?;
        match self.convert(ctx, raw, definition) {
            Ok(value) => Ok(value),
            Err(Conversion::Fatal(error)) => Err(error),
            Err(Conversion::Invalid { value, reason }) => {
                self.fall_back(ctx, definition, value, reason)
            }
        }
    }

    /// Retries with the variable extension or default after `value` turned out invalid
    fn fall_back(
        &self,
        ctx: &mut EvaluationContext,
        definition: &AttributeDefinition,
        value: String,
        reason: String,
    ) -> Result<Option<Value>, EvaluateError> {
        let issue = |value: String, reason: String| ValidationIssue::InvalidValue {
            attribute: definition.id.clone(),
            value: mask(definition, value),
            reason,
        };

        let Some(raw) = self.unconfigured(ctx, definition)? else {
            ctx.invalid(issue(value, reason));
            return Ok(None);
        };

        if !ctx.ignore_warnings {
            tracing::warn!(
                element = %ctx.element.display_id(),
                attribute = %definition.id,
                value = %mask(definition, value),
                reason,
                "invalid value, using the default"
            );
        }

        let raw = self.expand_lists(ctx, raw, definition)?;
        match self.convert(ctx, raw, definition) {
            Ok(value) => Ok(value),
            Err(Conversion::Fatal(error)) => Err(error),
            Err(Conversion::Invalid { value, reason }) => {
                ctx.invalid(issue(value, reason));
                Ok(None)
            }
        }
    }

    /// Value of an attribute the element does not set: the variable extension, else the default
    fn unconfigured(
        &self,
        ctx: &mut EvaluationContext,
        definition: &AttributeDefinition,
    ) -> Result<Option<RawValue>, EvaluateError> {
        if let Some(variable) = &definition.variable {
            if definition.substitution == Substitution::Deferred {
                return Ok(Some(RawValue::Text(format!("${{{variable}}}"))));
            }

            let (name, is_list) = match variable
                .strip_prefix("list(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                Some(name) => (name, true),
                None => (variable.as_str(), false),
            };

            let mut value = self.variables.lookup(name)?;
            if value.is_none() && !is_list && !name.eq_ignore_ascii_case(&definition.id) {
                if let Some(other) = ctx.definition(name) {
                    value = self
                        .evaluate_attribute(ctx, &other)?
                        .map(|value| value.to_string());
                }
            }
            ctx.result
                .variables
                .insert(name.to_string(), value.clone());

            if let Some(value) = value {
                if is_list {
                    let values = parse_list(&value).into_iter().map(Child::Text).collect();
                    return Ok(Some(RawValue::List(values)));
                }
                return Ok(Some(RawValue::Text(value)));
            }
        }

        Ok(definition
            .default_values
            .as_ref()
            .map(|defaults| match defaults.as_slice() {
                [single] => RawValue::Text(single.clone()),
                many => RawValue::List(many.iter().cloned().map(Child::Text).collect()),
            }))
    }

    /// Replaces values that are exactly `${list(name)}` with the values of `name`
    fn expand_lists(
        &self,
        ctx: &mut EvaluationContext,
        raw: RawValue,
        definition: &AttributeDefinition,
    ) -> Result<RawValue, EvaluateError> {
        if definition.substitution == Substitution::Deferred {
            return Ok(raw);
        }

        Ok(match raw {
            RawValue::Text(text) => match self.list_values(ctx, &text)? {
                Some(values) => RawValue::List(values.into_iter().map(Child::Text).collect()),
                None => RawValue::Text(text),
            },
            RawValue::List(children) => {
                let mut expanded = vec![];
                for child in children {
                    match child {
                        Child::Text(text) => match self.list_values(ctx, &text)? {
                            Some(values) => expanded.extend(values.into_iter().map(Child::Text)),
                            None => expanded.push(Child::Text(text)),
                        },
                        element => expanded.push(element),
                    }
                }
                RawValue::List(expanded)
            }
        })
    }

    fn list_values(
        &self,
        ctx: &mut EvaluationContext,
        text: &str,
    ) -> Result<Option<Vec<String>>, EvaluateError> {
        let Some(name) = expression::list_reference(text) else {
            return Ok(None);
        };
        if text != format!("${{list({name})}}") {
            return Ok(None);
        }
        Ok(self
            .property(ctx, name)?
            .map(|value| parse_list(&value.to_string())))
    }

    /// Applies cardinality and converts every item
    fn convert(
        &self,
        ctx: &mut EvaluationContext,
        raw: RawValue,
        definition: &AttributeDefinition,
    ) -> Result<Option<Value>, Conversion> {
        if definition.cardinality == 0 {
            let item = match raw {
                RawValue::Text(text) => Some(Child::Text(text)),
                RawValue::List(children) => merge_single(children),
            };
            let Some(item) = item else {
                return Ok(None);
            };
            return Ok(self
                .convert_item(ctx, item, definition, 0)?
                .map(Value::Scalar));
        }

        let mut items: Vec<Child> = match raw {
            RawValue::Text(text) if definition.kind == AttributeType::Pid => split_references(&text)
                .into_iter()
                .map(Child::Text)
                .collect(),
            RawValue::Text(text) => parse_list(&text).into_iter().map(Child::Text).collect(),
            RawValue::List(children) => children,
        };
        if definition.cardinality.unsigned_abs() == 1 {
            items = merge_elements(items);
        }
        self.check_cardinality(definition, &items)?;

        let mut values = vec![];
        for (index, item) in items.into_iter().enumerate() {
            if let Some(value) = self.convert_item(ctx, item, definition, index)? {
                values.push(value);
            }
        }

        Ok(Some(match definition.cardinality > 0 {
            true => Value::Array(values),
            false => Value::Vector(values),
        }))
    }

    fn check_cardinality(
        &self,
        definition: &AttributeDefinition,
        items: &[Child],
    ) -> Result<(), EvaluateError> {
        let Some(max) = definition.max_values() else {
            return Ok(());
        };
        if max <= 1 || items.len() <= max {
            return Ok(());
        }

        if definition.kind == AttributeType::Pid {
            let singleton_target = definition
                .reference
                .as_deref()
                .and_then(|pid| self.registry?.entry(pid))
                .is_some_and(|entry| entry.is_singleton());
            if singleton_target {
                return Ok(());
            }

            let mut ids = HashSet::new();
            let mut anonymous = 0;
            for item in items {
                match item {
                    Child::Text(id) => {
                        ids.insert(id.as_str());
                    }
                    Child::Element(element) => match element.id() {
                        Some(id) => {
                            ids.insert(id);
                        }
                        None => anonymous += 1,
                    },
                }
            }
            if ids.len() + anonymous <= max {
                return Ok(());
            }
        }

        Err(EvaluateError::CardinalityExceeded {
            attribute: definition.id.clone(),
            max,
        })
    }

    fn convert_item(
        &self,
        ctx: &mut EvaluationContext,
        item: Child,
        definition: &AttributeDefinition,
        index: usize,
    ) -> Result<Option<Scalar>, Conversion> {
        match item {
            Child::Element(element) => {
                if definition.kind != AttributeType::Pid {
                    return Err(Conversion::Invalid {
                        value: element.display_id(),
                        reason: "nested element where a value is expected".to_string(),
                    });
                }
                Ok(self
                    .evaluate_nested(ctx, element, definition, index)?
                    .map(Scalar::String))
            }
            Child::Text(text) => {
                let text = self.resolve_text(ctx, &text, Some(definition))?;
                if definition.kind == AttributeType::Pid {
                    return Ok(self
                        .evaluate_reference(ctx, &text, definition)?
                        .map(Scalar::String));
                }
                coerce::coerce(&text, definition)
                    .map(Some)
                    .map_err(|reason| Conversion::Invalid {
                        value: text,
                        reason,
                    })
            }
        }
    }

    /// Substitutes `${...}` unless substitution is deferred
    fn resolve_text(
        &self,
        ctx: &mut EvaluationContext,
        text: &str,
        definition: Option<&AttributeDefinition>,
    ) -> Result<String, EvaluateError> {
        let deferred = definition.is_some_and(|d| d.substitution == Substitution::Deferred);
        if deferred || !expression::has_references(text) {
            return Ok(text.to_string());
        }
        expression::substitute(text, &mut ContextLookup { evaluator: self, ctx })
    }

    /// Ids from `nameRef` followed by nested `name` children (including subtype element names)
    fn reference_raw(
        &self,
        ctx: &mut EvaluationContext,
        definition: &AttributeDefinition,
    ) -> Option<RawValue> {
        let element = ctx.element;
        let (ref_name, nested_name) = reference_attribute_names(&definition.id);
        ctx.mark_processed(&ref_name);
        ctx.mark_processed(&nested_name);

        let mut nested: Vec<Child> = vec![];
        if let (Some(registry), Some(pid)) = (self.registry, &definition.reference) {
            for subtype in registry.descendants(pid) {
                if let Some(name) = subtype.effective_element_name(&nested_name) {
                    ctx.mark_processed(&name);
                    nested.extend(element.children(&name).iter().cloned());
                }
            }
        }
        nested.extend(element.children(&nested_name).iter().cloned());

        let ids: Vec<String> = [&ref_name, &nested_name]
            .into_iter()
            .filter_map(|name| element.attribute(name))
            .flat_map(AttributeValue::values)
            .flat_map(split_references)
            .collect();

        if nested.is_empty() && ids.is_empty() {
            return None;
        }
        if definition.cardinality == 0 && !nested.is_empty() {
            return Some(RawValue::List(nested));
        }

        let explicit: HashSet<&str> = nested
            .iter()
            .filter_map(Child::as_element)
            .filter_map(ConfigElement::id)
            .collect();
        let mut merged: Vec<Child> = ids
            .iter()
            .filter(|id| !explicit.contains(id.as_str()))
            .cloned()
            .map(Child::Text)
            .collect();
        merged.extend(nested.iter().cloned());
        Some(RawValue::List(merged))
    }

    /// Resolves the id of a top-level element of the referenced type or service
    fn evaluate_reference(
        &self,
        ctx: &mut EvaluationContext,
        id: &str,
        definition: &AttributeDefinition,
    ) -> Result<Option<String>, EvaluateError> {
        if let Some(pid) = &definition.reference {
            if self.registry.is_some_and(|registry| registry.entry(pid).is_none()) {
                tracing::trace!(pid, "reference target is not registered yet");
                return Ok(None);
            }

            let target = ConfigId::new(pid.clone(), Some(id.to_string()));
            ctx.result.references.insert(target.clone());
            if let Some(resolved) = self.resolver.lookup_pid(&target) {
                return Ok(Some(resolved));
            }

            let reference = UnresolvedReference::Pid {
                pid: pid.clone(),
                attribute: ctx.attribute.clone(),
                value: id.to_string(),
                referrer: ctx.result.config_id.clone(),
            };
            ctx.unresolved(reference);
            return Ok(None);
        }

        let Some(service) = &definition.service else {
            return Err(EvaluateError::MissingReferenceTarget(definition.id.clone()));
        };

        let candidates = self
            .registry
            .map(|registry| registry.entries_exposing(service))
            .unwrap_or_default();
        let mut matches = vec![];
        for entry in candidates {
            let target = ConfigId::new(entry.pid(), Some(id.to_string()));
            if let Some(pid) = self.resolver.lookup_pid(&target) {
                matches.push(pid);
            }
            ctx.result.references.insert(target);
        }

        if matches.len() == 1 {
            return Ok(matches.pop());
        }

        let reference = UnresolvedReference::Service {
            service: service.clone(),
            attribute: ctx.attribute.clone(),
            value: id.to_string(),
            referrer: ctx.result.config_id.clone(),
            count: matches.len(),
        };
        ctx.unresolved(reference);
        Ok(None)
    }

    /// Nested child of a reference attribute, typed by the reference target or the subtype it is written as
    fn evaluate_nested(
        &self,
        ctx: &mut EvaluationContext,
        element: ConfigElement,
        definition: &AttributeDefinition,
        index: usize,
    ) -> Result<Option<String>, EvaluateError> {
        let Some(registry) = self.registry else {
            return Ok(self.add_nested(ctx, element, None, index));
        };
        let Some(pid) = &definition.reference else {
            return Ok(None);
        };
        let Some(declared) = registry.entry(pid) else {
            return Ok(None);
        };

        let (_, nested_name) = reference_attribute_names(&definition.id);
        let entry = registry
            .descendants(pid)
            .into_iter()
            .find(|subtype| {
                subtype
                    .effective_element_name(&nested_name)
                    .is_some_and(|name| name.eq_ignore_ascii_case(element.node_name()))
            })
            .unwrap_or_else(|| declared.clone());

        Ok(self.add_nested(ctx, element, Some(entry), index))
    }

    /// Queues a nested element for evaluation and returns its pid
    ///
    /// Elements of factory (or unknown) types without an id get `default-{index}`. `None` when the element merged into
    /// an earlier one with the same identity.
    fn add_nested(
        &self,
        ctx: &mut EvaluationContext,
        mut element: ConfigElement,
        entry: Option<Arc<RegistryEntry>>,
        index: usize,
    ) -> Option<String> {
        element.set_parent(ctx.element);
        if let Some(entry) = &entry {
            element.set_pid(entry.pid());
        }
        if element.id().is_none() && entry.as_ref().map_or(true, |entry| entry.is_factory()) {
            element.set_default_id(format!("default-{index}"));
        }

        let id = element.config_id();
        if !ctx.add_pending(id.clone(), element, entry) {
            tracing::trace!(nested = %id, "merged into earlier nested element");
            return None;
        }
        self.resolver.lookup_pid(&id)
    }

    /// Schema entry for a child element without attribute definition
    ///
    /// Child aliases are looked up along the parent's `extends` chain, then types declaring the parent as their
    /// parent pid.
    fn child_entry(&self, ctx: &EvaluationContext, name: &str) -> Option<Arc<RegistryEntry>> {
        let registry = self.registry?;
        let parent = ctx.entry.clone()?;

        let mut visited = vec![];
        let mut current = Some(parent.clone());
        while let Some(candidate) = current {
            if let Some(child) = registry.entry_for_child_alias(candidate.pid(), name) {
                return Some(child.clone());
            }
            visited.push(candidate.pid().to_string());
            current = candidate
                .extends()
                .filter(|pid| !visited.iter().any(|seen| seen.as_str() == *pid))
                .and_then(|pid| registry.entry(pid))
                .cloned();
        }

        registry
            .entry_for(name)
            .filter(|entry| {
                entry
                    .parent_pid()
                    .is_some_and(|pid| registry.is_subtype_of(parent.pid(), pid))
            })
            .cloned()
    }

    fn evaluate_undefined(
        &self,
        ctx: &mut EvaluationContext,
        name: &str,
    ) -> Result<Option<Value>, EvaluateError> {
        ctx.mark_processed(name);
        let Some(raw) = ctx.element.raw(name) else {
            return Ok(None);
        };

        let previous = std::mem::replace(&mut ctx.attribute, name.to_string());
        let value = self.undefined_value(ctx, raw);
        ctx.attribute = previous;

        let value = value?;
        ctx.set(name, value.clone());
        Ok(Some(value))
    }

    /// Strings or string arrays, nested elements evaluate to their pids
    fn undefined_value(&self, ctx: &mut EvaluationContext, raw: RawValue) -> Result<Value, EvaluateError> {
        Ok(match raw {
            RawValue::Text(text) => Value::from(self.resolve_text(ctx, &text, None)?),
            RawValue::List(children) => {
                let mut values = vec![];
                for (index, child) in children.into_iter().enumerate() {
                    match child {
                        Child::Text(text) => {
                            values.push(Scalar::String(self.resolve_text(ctx, &text, None)?))
                        }
                        Child::Element(element) => {
                            let entry = self.child_entry(ctx, element.node_name());
                            if let Some(pid) = self.add_nested(ctx, element, entry, index) {
                                values.push(Scalar::String(pid));
                            }
                        }
                    }
                }
                Value::Array(values)
            }
        })
    }

    /// Projects referenced elements into this one under `attribute.N.`
    fn evaluate_flat(
        &self,
        ctx: &mut EvaluationContext,
        definition: &AttributeDefinition,
    ) -> Result<Option<Value>, EvaluateError> {
        let (Some(registry), Some(pid)) = (self.registry, &definition.reference) else {
            return Ok(None);
        };
        let Some(declared) = registry.entry(pid).cloned() else {
            return Ok(None);
        };

        let element = ctx.element;
        let (ref_name, nested_name) = reference_attribute_names(&definition.id);
        ctx.mark_processed(&ref_name);
        ctx.mark_processed(&nested_name);
        let mut count = 0;

        let ids: Vec<String> = element
            .attribute(&ref_name)
            .map(|value| value.values().into_iter().flat_map(split_references).collect())
            .unwrap_or_default();
        for id in ids {
            let id = self.resolve_text(ctx, &id, None)?;
            let referenced = self
                .store
                .and_then(|store| store.factory_instance(declared.pid(), declared.alias(), &id));
            match referenced {
                Some(referenced) => {
                    self.flatten_child(ctx, &referenced, definition, &declared, &mut count)?
                }
                None => {
                    let reference = UnresolvedReference::Pid {
                        pid: pid.clone(),
                        attribute: definition.id.clone(),
                        value: id,
                        referrer: ctx.result.config_id.clone(),
                    };
                    ctx.unresolved(reference);
                }
            }
        }

        let mut groups: Vec<(String, Arc<RegistryEntry>)> = registry
            .descendants(pid)
            .into_iter()
            .filter_map(|subtype| Some((subtype.effective_element_name(&nested_name)?, subtype)))
            .collect();
        groups.push((nested_name, declared));

        for (name, entry) in groups {
            ctx.mark_processed(&name);
            let mut children: Vec<ConfigElement> = element.child_elements(&name).cloned().collect();
            if children.len() > 1 && definition.cardinality.unsigned_abs() <= 1 {
                let mut merged = children.remove(0);
                for later in &children {
                    merged.merge_from(later);
                }
                children = vec![merged];
            }

            for mut child in children {
                child.set_pid(entry.pid());
                child.set_parent(element);
                self.flatten_child(ctx, &child, definition, &entry, &mut count)?;
            }
        }

        if let Some(max) = definition.max_values() {
            if count > max {
                return Err(EvaluateError::CardinalityExceeded {
                    attribute: definition.id.clone(),
                    max,
                });
            }
        }
        Ok((count > 0).then(|| Value::Scalar(Scalar::Long(count as i64))))
    }

    fn flatten_child(
        &self,
        ctx: &mut EvaluationContext,
        child: &ConfigElement,
        definition: &AttributeDefinition,
        entry: &Arc<RegistryEntry>,
        count: &mut usize,
    ) -> Result<(), EvaluateError> {
        let prefix = format!("{}{}.{}.", ctx.prefix, definition.id, count);
        let result = self.evaluate_element(child, Some(entry.clone()), &prefix, ctx.ignore_warnings)?;
        if !result.is_valid() {
            tracing::debug!(child = %child.display_id(), "skipping invalid flat element");
            return Ok(());
        }

        *count += 1;
        ctx.result
            .properties
            .insert(format!("{prefix}config.referenceType"), Value::from(entry.pid()));
        ctx.result.properties.extend(result.properties);
        ctx.result.nested.extend(result.nested);
        let config_id = ctx.result.config_id.clone();
        ctx.result.unresolved.extend(
            result
                .unresolved
                .into_iter()
                .map(|reference| reference.with_referrer(&config_id)),
        );
        ctx.result.references.extend(result.references);
        ctx.result.variables.extend(result.variables);
        Ok(())
    }

    /// A final attribute ignores what the element says
    fn check_final(&self, ctx: &mut EvaluationContext, definition: &AttributeDefinition) {
        let Some(actual) = ctx
            .element
            .attribute(&definition.id)
            .and_then(AttributeValue::as_single)
        else {
            return;
        };
        if definition.id.eq_ignore_ascii_case(ID) && ctx.element.uses_default_id() {
            return;
        }

        let expected = definition
            .default_values
            .as_ref()
            .and_then(|defaults| defaults.first())
            .cloned()
            .unwrap_or_default();
        if actual != expected {
            ctx.invalid(ValidationIssue::FinalOverridden {
                attribute: definition.id.clone(),
                value: actual.to_string(),
                expected,
            });
        }
    }

    fn evaluate_pending(&self, ctx: &mut EvaluationContext) -> Result<(), EvaluateError> {
        for pending in std::mem::take(&mut ctx.pending) {
            let mut result =
                self.evaluate_element(&pending.element, pending.entry, "", ctx.ignore_warnings)?;
            result.pid = self.resolver.lookup_pid(&pending.id);
            if !result.is_valid() {
                tracing::debug!(nested = %pending.id, "nested element is invalid");
            }
            ctx.result.nested.insert(pending.id, result);
        }
        Ok(())
    }

    /// Value of `name` inside `${...}`
    fn property(
        &self,
        ctx: &mut EvaluationContext,
        name: &str,
    ) -> Result<Option<Value>, EvaluateError> {
        if name == SERVICE_PID {
            return Ok(self.resolver.lookup_pid(&ctx.result.config_id).map(Value::from));
        }

        if ctx.lookup_stack.iter().any(|entry| entry == name) {
            let mut chain = ctx.lookup_stack.clone();
            chain.push(name.to_string());
            return Err(VariableError::Cycle(chain).into());
        }

        ctx.lookup_stack.push(name.to_string());
        let value = self.lookup_property(ctx, name);
        ctx.lookup_stack.pop();
        value
    }

    fn lookup_property(
        &self,
        ctx: &mut EvaluationContext,
        name: &str,
    ) -> Result<Option<Value>, EvaluateError> {
        if let Some(value) = self.variables.lookup(name)? {
            ctx.result
                .variables
                .insert(name.to_string(), Some(value.clone()));
            return Ok(Some(Value::from(value)));
        }

        if let Some(value) = ctx.get(name) {
            return Ok(Some(value.clone()));
        }

        if let Some(definition) = ctx.definition(name).filter(|definition| !definition.flat) {
            return self.evaluate_attribute(ctx, &definition);
        }

        if !name.starts_with("config.") && !ctx.is_processed(name) {
            if let Some(value) = self.evaluate_undefined(ctx, name)? {
                return Ok(Some(value));
            }
        }

        if let Some(entry) = ctx.entry.clone() {
            let pending: Vec<&AttributeDefinition> = entry
                .attributes()
                .values()
                .filter(|definition| definition.flat && !ctx.is_evaluated(&definition.id))
                .collect();
            if !pending.is_empty() {
                let ignore_warnings = std::mem::replace(&mut ctx.ignore_warnings, true);
                let evaluated = pending
                    .into_iter()
                    .try_for_each(|definition| self.evaluate_attribute(ctx, definition).map(|_| ()));
                ctx.ignore_warnings = ignore_warnings;
                evaluated?;

                if let Some(value) = ctx.get(name) {
                    return Ok(Some(value.clone()));
                }
            }
        }

        Ok(None)
    }
}

/// Identity of an evaluated element, a final `id` replaces whatever the element carries
fn identity(element: &ConfigElement, entry: Option<&RegistryEntry>) -> ConfigId {
    let final_id = entry
        .and_then(|entry| entry.attribute(ID))
        .filter(|definition| definition.is_final)
        .and_then(|definition| definition.default_values.as_ref()?.first().cloned());

    match final_id {
        Some(id) if element.id() != Some(id.as_str()) => {
            let mut element = element.clone();
            element.set_id(id);
            element.config_id()
        }
        _ => element.config_id(),
    }
}

/// Merges nested elements into the position of the first one, text items stay
fn merge_elements(items: Vec<Child>) -> Vec<Child> {
    let mut merged: Vec<Child> = vec![];
    let mut element_at = None;
    for item in items {
        match (item, element_at) {
            (Child::Element(element), Some(index)) => {
                if let Some(Child::Element(existing)) = merged.get_mut(index) {
                    existing.merge_from(&element);
                }
            }
            (Child::Element(element), None) => {
                element_at = Some(merged.len());
                merged.push(Child::Element(element));
            }
            (text, _) => merged.push(text),
        }
    }
    merged
}

/// Single value out of several: the merged nested element, else the last text
fn merge_single(items: Vec<Child>) -> Option<Child> {
    let mut merged = merge_elements(items);
    match merged.iter().position(|item| matches!(item, Child::Element(_))) {
        Some(index) => Some(merged.swap_remove(index)),
        None => merged.pop(),
    }
}

fn mask(definition: &AttributeDefinition, value: String) -> String {
    if definition.obscured || definition.kind == AttributeType::Password {
        return "*****".to_string();
    }
    value
}

/// Property lookup through the evaluator for `${...}` inside an element
struct ContextLookup<'s, 'a, 'e> {
    evaluator: &'s ConfigEvaluator<'a>,
    ctx: &'s mut EvaluationContext<'e>,
}

impl PropertyLookup for ContextLookup<'_, '_, '_> {
    type Error = EvaluateError;

    fn lookup(&mut self, name: &str) -> Result<Option<Value>, EvaluateError> {
        self.evaluator.property(self.ctx, name)
    }
}

#[cfg(test)]
mod test;
