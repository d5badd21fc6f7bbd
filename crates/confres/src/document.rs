//! Documents: the unit that is added to and removed from a configuration store
//!
//! [Documents::new] interprets loaded [HclDocuments]. Root blocks are read as
//! - `variable "name" { value = ..., obscured = bool, on_conflict = "merge|replace|ignore" }`
//! - `schema "pid" { ..., attribute "id" { ... } }`
//! - anything else: a configuration element named after the block identifier, the first label is its id
//!
//! Inside elements, attributes become element attributes (arrays become lists) and blocks become nested child
//! elements. `on_conflict` is reserved for the merge behavior.
use crate::element::{ConfigElement, MergeBehavior};
use crate::hcl_documents::HclDocuments;
use crate::schema::{
    AttributeDefinition, AttributeType, SchemaSource, Substitution, TypeSchema, ValidationPattern,
};
use crate::variables::Variable;
use hcl::expr::{Operation, UnaryOperator};
use hcl::{Expression, TemplateExpr};
use hcl_edit::structure::Block;

/// Attribute holding the merge behavior of an element or variable
pub const ON_CONFLICT: &str = "on_conflict";

/// Elements and variables contributed together
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct Document {
    location: String,
    #[new(default)]
    elements: Vec<ConfigElement>,
    #[new(default)]
    variables: Vec<Variable>,
}

impl Document {
    pub fn with_element(mut self, element: ConfigElement) -> Self {
        self.add_element(element);
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.add_variable(variable);
        self
    }

    pub fn add_element(&mut self, element: ConfigElement) {
        self.elements.push(element.with_location(self.location.clone()));
    }

    pub fn add_variable(&mut self, variable: Variable) {
        self.variables
            .push(variable.with_origin(self.location.clone()));
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn elements(&self) -> &[ConfigElement] {
        &self.elements
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
}

/// Everything read from a set of hcl files: one [Document] per file plus the schemas they declare
#[derive(Debug, Default)]
pub struct Documents {
    pub documents: Vec<Document>,
    pub schemas: Vec<SchemaSource>,
}

impl Documents {
    pub fn new(hcl_documents: &HclDocuments) -> Result<Self, DocumentErrors> {
        let mut e = DocumentErrors::new();

        let mut documents: Vec<Document> = (0..hcl_documents.source_count())
            .map(|index| Document::new(hcl_documents.location(index)))
            .collect();
        let mut schemas: Vec<Vec<TypeSchema>> = vec![vec![]; hcl_documents.source_count()];

        for (index, _source, _attribute) in hcl_documents.attributes() {
            e.log(Issue::RootAttribute(index));
        }

        for (index, source_index, block) in hcl_documents.blocks() {
            match block.ident.value().as_str() {
                "variable" => match read_variable(index, block) {
                    Ok(variable) => documents[source_index].add_variable(variable),
                    Err(issue) => e.log(issue),
                },
                "schema" => match read_schema(index, block) {
                    Ok(schema) => schemas[source_index].push(schema),
                    Err(issue) => e.log(issue),
                },
                _ => match read_element(index, block) {
                    Ok(element) => documents[source_index].add_element(element),
                    Err(issue) => e.log(issue),
                },
            }
        }

        if !e.issues.is_empty() {
            return Err(e);
        }

        let schemas = documents
            .iter()
            .zip(schemas)
            .filter(|(_, schemas)| !schemas.is_empty())
            .map(|(document, schemas)| SchemaSource::new(document.location().to_string(), schemas))
            .collect();

        Ok(Self { documents, schemas })
    }
}

fn read_variable(index: usize, block: &Block) -> Result<Variable, Issue> {
    let [name] = block.labels.as_slice() else {
        return Err(Issue::LabelCount {
            block: index,
            expected: 1,
        });
    };

    let mut value = None;
    let mut variable = Variable::new(name.as_str(), "");
    for attribute in block.body.attributes() {
        let key = attribute.key.value().as_str();
        let text = text(index, key, &attribute.value.clone().into())?;
        match key {
            "value" => value = Some(text),
            "obscured" => variable.obscured = flag(index, key, &text)?,
            ON_CONFLICT => variable.merge_behavior = merge_behavior(index, &text)?,
            _ => return Err(Issue::UnknownAttribute(index, key.to_string())),
        }
    }

    variable.value = value.ok_or(Issue::MissingAttribute(index, "value"))?;
    Ok(variable)
}

fn read_schema(index: usize, block: &Block) -> Result<TypeSchema, Issue> {
    let [pid] = block.labels.as_slice() else {
        return Err(Issue::LabelCount {
            block: index,
            expected: 1,
        });
    };

    let mut schema = TypeSchema::new(pid.as_str());
    for attribute in block.body.attributes() {
        let key = attribute.key.value().as_str();
        let expression: Expression = attribute.value.clone().into();
        match key {
            "object_class" => schema.object_class = texts(index, key, &expression)?,
            _ => {
                let text = text(index, key, &expression)?;
                match key {
                    "alias" => schema.alias = Some(text),
                    "factory" => schema.factory = flag(index, key, &text)?,
                    "extends" => schema.extends = Some(text),
                    "extends_alias" => schema.extends_alias = Some(text),
                    "child_alias" => schema.child_alias = Some(text),
                    "parent_pid" => schema.parent_pid = Some(text),
                    _ => return Err(Issue::UnknownAttribute(index, key.to_string())),
                }
            }
        }
    }

    for nested in block.body.blocks() {
        if nested.ident.value().as_str() != "attribute" {
            return Err(Issue::UnknownBlock(index, nested.ident.value().to_string()));
        }
        schema = schema.attribute(read_attribute_definition(index, nested)?);
    }

    Ok(schema)
}

fn read_attribute_definition(index: usize, block: &Block) -> Result<AttributeDefinition, Issue> {
    let [id] = block.labels.as_slice() else {
        return Err(Issue::LabelCount {
            block: index,
            expected: 1,
        });
    };

    let mut definition = AttributeDefinition::string(id.as_str());
    let mut labels = vec![];
    for attribute in block.body.attributes() {
        let key = attribute.key.value().as_str();
        let expression: Expression = attribute.value.clone().into();
        match key {
            "default" => definition.default_values = Some(texts(index, key, &expression)?),
            "options" => {
                definition.options = texts(index, key, &expression)?
                    .into_iter()
                    .map(|value| crate::schema::AttributeOption::new(value.clone(), value))
                    .collect()
            }
            "option_labels" => labels = texts(index, key, &expression)?,
            _ => {
                let text = text(index, key, &expression)?;
                let invalid = |reason: String| Issue::InvalidAttribute(index, key.to_string(), reason);
                match key {
                    "type" => definition.kind = text.parse::<AttributeType>().map_err(invalid)?,
                    "cardinality" => {
                        definition.cardinality = text.parse().map_err(|_| invalid(text.clone()))?
                    }
                    "required" => definition.required = flag(index, key, &text)?,
                    "reference" => {
                        definition.kind = AttributeType::Pid;
                        definition.reference = Some(text)
                    }
                    "service" => {
                        definition.kind = AttributeType::Pid;
                        definition.service = Some(text)
                    }
                    "variable" => definition.variable = Some(text),
                    "substitution" => {
                        definition.substitution = match text.as_str() {
                            "immediate" => Substitution::Immediate,
                            "deferred" => Substitution::Deferred,
                            _ => return Err(invalid(text.clone())),
                        }
                    }
                    "flat" => definition.flat = flag(index, key, &text)?,
                    "final" => definition.is_final = flag(index, key, &text)?,
                    "obscured" => definition.obscured = flag(index, key, &text)?,
                    "pattern" => {
                        definition.pattern = Some(
                            ValidationPattern::new(&text).map_err(|error| invalid(error.to_string()))?,
                        )
                    }
                    "copy_of" => definition.copy_of = Some(text),
                    _ => return Err(Issue::UnknownAttribute(index, key.to_string())),
                }
            }
        }
    }

    for (option, label) in definition.options.iter_mut().zip(labels) {
        option.label = label;
    }

    Ok(definition)
}

fn read_element(index: usize, block: &Block) -> Result<ConfigElement, Issue> {
    let mut element = ConfigElement::new(block.ident.value().as_str());
    match block.labels.as_slice() {
        [] => {}
        [id] => element.set_id(id.as_str()),
        _ => {
            return Err(Issue::LabelCount {
                block: index,
                expected: 1,
            })
        }
    }

    for attribute in block.body.attributes() {
        let key = attribute.key.value().as_str();
        let expression: Expression = attribute.value.clone().into();
        if key == ON_CONFLICT {
            let text = text(index, key, &expression)?;
            element.set_merge_behavior(merge_behavior(index, &text)?);
            continue;
        }

        match &expression {
            Expression::Array(_) => {
                element = element.with_list(key, texts(index, key, &expression)?);
            }
            _ => element.set_attribute(key, text(index, key, &expression)?),
        }
    }

    for nested in block.body.blocks() {
        let child = read_element(index, nested)?;
        element.add_child(nested.ident.value().as_str(), crate::element::Child::Element(child));
    }

    Ok(element)
}

/// Plain text of a literal expression
///
/// Templates are kept as written so `${...}` reaches the evaluator untouched.
fn scalar_text(expression: &Expression) -> Option<String> {
    match expression {
        Expression::String(value) => Some(value.clone()),
        Expression::Number(value) => Some(value.to_string()),
        Expression::Bool(value) => Some(value.to_string()),
        Expression::TemplateExpr(template) => match template.as_ref() {
            TemplateExpr::QuotedString(template) => Some(template.clone()),
            TemplateExpr::Heredoc(heredoc) => Some(heredoc.template.clone()),
        },
        Expression::Operation(operation) => match operation.as_ref() {
            Operation::Unary(unary) if unary.operator == UnaryOperator::Neg => match &unary.expr {
                Expression::Number(value) => Some(format!("-{value}")),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn text(index: usize, key: &str, expression: &Expression) -> Result<String, Issue> {
    scalar_text(expression).ok_or_else(|| Issue::UnsupportedExpression(index, key.to_string()))
}

fn texts(index: usize, key: &str, expression: &Expression) -> Result<Vec<String>, Issue> {
    match expression {
        Expression::Array(items) => items.iter().map(|item| text(index, key, item)).collect(),
        single => Ok(vec![text(index, key, single)?]),
    }
}

fn flag(index: usize, key: &str, text: &str) -> Result<bool, Issue> {
    text.parse()
        .map_err(|_| Issue::InvalidAttribute(index, key.to_string(), text.to_string()))
}

fn merge_behavior(index: usize, text: &str) -> Result<MergeBehavior, Issue> {
    text.parse()
        .map_err(|reason| Issue::InvalidAttribute(index, ON_CONFLICT.to_string(), reason))
}

#[derive(derive_new::new, Debug)]
pub struct DocumentErrors {
    #[new(default)]
    issues: Vec<Issue>,
}

impl DocumentErrors {
    pub fn log(&mut self, issue: Issue) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }
}

impl std::error::Error for DocumentErrors {}

impl std::fmt::Display for DocumentErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (position, issue) in self.issues.iter().enumerate() {
            if position > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Problem found while interpreting a root block (identified by its index)
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Issue {
    #[error("block #{0}: attributes are not allowed at the root of a document")]
    RootAttribute(usize),
    #[error("block #{block}: expected {expected} label")]
    LabelCount { block: usize, expected: usize },
    #[error("block #{0}: unknown attribute `{1}`")]
    UnknownAttribute(usize, String),
    #[error("block #{0}: unknown block `{1}`")]
    UnknownBlock(usize, String),
    #[error("block #{0}: missing attribute `{1}`")]
    MissingAttribute(usize, &'static str),
    #[error("block #{0}: invalid value for `{1}`: {2}")]
    InvalidAttribute(usize, String, String),
    #[error("block #{0}: `{1}` must be a literal string, number, bool or a list of those")]
    UnsupportedExpression(usize, String),
}
