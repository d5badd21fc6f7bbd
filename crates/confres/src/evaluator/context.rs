use super::result::{EvaluationResult, UnresolvedReference, ValidationIssue};
use crate::config_id::ConfigId;
use crate::element::ConfigElement;
use crate::schema::{AttributeDefinition, RegistryEntry};
use crate::value::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Nested element waiting to be evaluated once its parent is done
pub(super) struct PendingNested {
    pub id: ConfigId,
    pub element: ConfigElement,
    pub entry: Option<Arc<RegistryEntry>>,
}

/// State of a single element evaluation
pub(super) struct EvaluationContext<'e> {
    pub element: &'e ConfigElement,
    pub entry: Option<Arc<RegistryEntry>>,
    /// prepended to every property key, `attr.N.` for flattened elements
    pub prefix: String,
    pub ignore_warnings: bool,
    pub result: EvaluationResult,
    /// attribute currently being evaluated, for unresolved reference records
    pub attribute: String,
    pub lookup_stack: Vec<String>,
    /// (target attribute, source attribute)
    pub copies: Vec<(String, String)>,
    pub pending: Vec<PendingNested>,
    processed: HashSet<String>,
    evaluated: HashSet<String>,
}

impl<'e> EvaluationContext<'e> {
    pub fn new(
        element: &'e ConfigElement,
        entry: Option<Arc<RegistryEntry>>,
        config_id: ConfigId,
        prefix: &str,
        ignore_warnings: bool,
    ) -> Self {
        Self {
            element,
            result: EvaluationResult::new(config_id, entry.clone()),
            entry,
            prefix: prefix.to_string(),
            ignore_warnings,
            attribute: String::new(),
            lookup_stack: vec![],
            copies: vec![],
            pending: vec![],
            processed: HashSet::new(),
            evaluated: HashSet::new(),
        }
    }

    /// Property key for `name` in this context
    pub fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        let key = self.key(name);
        self.result.properties.insert(key, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.result.properties.get(&self.key(name))
    }

    /// Marks an element attribute or child tag as consumed
    pub fn mark_processed(&mut self, name: &str) {
        self.processed.insert(name.to_lowercase());
    }

    pub fn is_processed(&self, name: &str) -> bool {
        self.processed.contains(&name.to_lowercase())
    }

    /// Marks a schema attribute as evaluated (or being evaluated), returns false if it already was
    pub fn start_evaluation(&mut self, id: &str) -> bool {
        self.mark_processed(id);
        self.evaluated.insert(id.to_lowercase())
    }

    pub fn is_evaluated(&self, id: &str) -> bool {
        self.evaluated.contains(&id.to_lowercase())
    }

    pub fn definition(&self, name: &str) -> Option<AttributeDefinition> {
        self.entry
            .as_ref()
            .and_then(|entry| entry.attribute(name))
            .cloned()
    }

    pub fn invalid(&mut self, issue: ValidationIssue) {
        if !self.ignore_warnings {
            tracing::warn!(element = %self.element.display_id(), "{issue}");
        }
        self.result.issues.push(issue);
    }

    /// Records a reference that did not resolve, reporting it is up to whoever consumes the result
    pub fn unresolved(&mut self, reference: UnresolvedReference) {
        self.result.unresolved.push(reference);
    }

    pub fn has_unresolved(&self, attribute: &str) -> bool {
        self.result
            .unresolved
            .iter()
            .any(|reference| reference.attribute().eq_ignore_ascii_case(attribute))
    }

    /// Queues a nested element, merging it into an earlier one with the same identity
    ///
    /// Returns false when it was merged.
    pub fn add_pending(
        &mut self,
        id: ConfigId,
        element: ConfigElement,
        entry: Option<Arc<RegistryEntry>>,
    ) -> bool {
        if let Some(existing) = self.pending.iter_mut().find(|pending| pending.id == id) {
            existing.element.merge_from(&element);
            return false;
        }
        self.pending.push(PendingNested { id, element, entry });
        true
    }

    /// Copies values into attributes declared as copies that did not get one of their own
    pub fn apply_copies(&mut self) {
        for (target, source) in std::mem::take(&mut self.copies) {
            let target = self.key(&target);
            if self.result.properties.contains_key(&target) {
                continue;
            }
            if let Some(value) = self.get(&source).cloned() {
                self.result.properties.insert(target, value);
            }
        }
    }
}
