//! Schema records as registered by a schema source
use indexmap::IndexMap;
use regex::Regex;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl DurationUnit {
    pub(crate) fn millis(self) -> i64 {
        match self {
            DurationUnit::Milliseconds => 1,
            DurationUnit::Seconds => 1_000,
            DurationUnit::Minutes => 60_000,
            DurationUnit::Hours => 3_600_000,
        }
    }
}

/// Semantic type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Boolean,
    Byte,
    Short,
    Char,
    Integer,
    Long,
    Float,
    Double,
    String,
    Duration(DurationUnit),
    /// string with collapsed whitespace
    Token,
    Password,
    /// reference to another configuration element
    Pid,
}

impl FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "boolean" => Self::Boolean,
            "byte" => Self::Byte,
            "short" => Self::Short,
            "char" | "character" => Self::Char,
            "int" | "integer" => Self::Integer,
            "long" => Self::Long,
            "float" => Self::Float,
            "double" => Self::Double,
            "string" => Self::String,
            "duration" | "duration(ms)" => Self::Duration(DurationUnit::Milliseconds),
            "duration(s)" => Self::Duration(DurationUnit::Seconds),
            "duration(m)" => Self::Duration(DurationUnit::Minutes),
            "duration(h)" => Self::Duration(DurationUnit::Hours),
            "token" => Self::Token,
            "password" => Self::Password,
            "pid" => Self::Pid,
            _ => return Err(format!("unknown attribute type `{s}`")),
        })
    }
}

/// When `${...}` in a value gets substituted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Substitution {
    #[default]
    Immediate,
    /// keep the literal text for a later consumer
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, derive_new::new)]
pub struct AttributeOption {
    pub value: String,
    pub label: String,
}

/// Validation pattern that has to match the whole value
#[derive(Debug, Clone)]
pub struct ValidationPattern {
    regex: Regex,
    source: String,
}

impl ValidationPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(&format!("^(?:{pattern})$"))?,
            source: pattern.to_string(),
        })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for ValidationPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDefinition {
    pub id: String,
    pub kind: AttributeType,
    /// 0: scalar, N > 0: array of at most N, N < 0: vector of at most |N|, [i32::MIN]: unbounded vector
    pub cardinality: i32,
    pub default_values: Option<Vec<String>>,
    pub options: Vec<AttributeOption>,
    pub pattern: Option<ValidationPattern>,
    pub required: bool,
    /// pid referenced by a [AttributeType::Pid] attribute
    pub reference: Option<String>,
    /// service name referenced by a [AttributeType::Pid] attribute
    pub service: Option<String>,
    /// variable consulted when the element has no value
    pub variable: Option<String>,
    pub substitution: Substitution,
    pub flat: bool,
    pub is_final: bool,
    pub obscured: bool,
    pub copy_of: Option<String>,
}

impl AttributeDefinition {
    pub fn new(id: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            id: id.into(),
            kind,
            cardinality: 0,
            default_values: None,
            options: vec![],
            pattern: None,
            required: false,
            reference: None,
            service: None,
            variable: None,
            substitution: Substitution::Immediate,
            flat: false,
            is_final: false,
            obscured: false,
            copy_of: None,
        }
    }

    pub fn string(id: impl Into<String>) -> Self {
        Self::new(id, AttributeType::String)
    }

    /// A [AttributeType::Pid] attribute referencing `pid`
    pub fn reference_to(id: impl Into<String>, pid: impl Into<String>) -> Self {
        let mut definition = Self::new(id, AttributeType::Pid);
        definition.reference = Some(pid.into());
        definition
    }

    pub fn cardinality(mut self, cardinality: i32) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_values = Some(vec![value.into()]);
        self
    }

    pub fn default_values<S: Into<String>>(mut self, values: impl IntoIterator<Item = S>) -> Self {
        self.default_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn option(mut self, value: impl Into<String>, label: impl Into<String>) -> Self {
        self.options.push(AttributeOption::new(value.into(), label.into()));
        self
    }

    pub fn pattern(mut self, pattern: ValidationPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn deferred(mut self) -> Self {
        self.substitution = Substitution::Deferred;
        self
    }

    pub fn flat(mut self) -> Self {
        self.flat = true;
        self
    }

    pub fn finalized(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn obscured(mut self) -> Self {
        self.obscured = true;
        self
    }

    pub fn copy_of(mut self, attribute: impl Into<String>) -> Self {
        self.copy_of = Some(attribute.into());
        self
    }

    /// Maximum number of values, `None` when there is no limit
    pub fn max_values(&self) -> Option<usize> {
        match self.cardinality {
            i32::MIN => None,
            0 => Some(1),
            n => Some(n.unsigned_abs() as usize),
        }
    }

    /// Default of `*` on a reference: every instance of the referenced type
    pub fn is_wildcard(&self) -> bool {
        self.kind == AttributeType::Pid
            && self
                .default_values
                .as_ref()
                .and_then(|values| values.first())
                .is_some_and(|value| value == "*")
    }
}

/// Schema of one configuration type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSchema {
    pub pid: String,
    pub alias: Option<String>,
    pub child_alias: Option<String>,
    pub parent_pid: Option<String>,
    pub extends: Option<String>,
    pub extends_alias: Option<String>,
    pub factory: bool,
    /// services exposed by instances of this type
    pub object_class: Vec<String>,
    pub attributes: IndexMap<String, AttributeDefinition>,
}

impl TypeSchema {
    pub fn new(pid: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            alias: None,
            child_alias: None,
            parent_pid: None,
            extends: None,
            extends_alias: None,
            factory: false,
            object_class: vec![],
            attributes: IndexMap::new(),
        }
    }

    pub fn factory(pid: impl Into<String>) -> Self {
        let mut schema = Self::new(pid);
        schema.factory = true;
        schema
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn child_of(mut self, parent_pid: impl Into<String>, child_alias: impl Into<String>) -> Self {
        self.parent_pid = Some(parent_pid.into());
        self.child_alias = Some(child_alias.into());
        self
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn extends_alias(mut self, alias: impl Into<String>) -> Self {
        self.extends_alias = Some(alias.into());
        self
    }

    pub fn exposes(mut self, service: impl Into<String>) -> Self {
        self.object_class.push(service.into());
        self
    }

    pub fn attribute(mut self, definition: AttributeDefinition) -> Self {
        self.attributes.insert(definition.id.clone(), definition);
        self
    }
}

/// Named set of schemas registered and removed together
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct SchemaSource {
    pub id: String,
    pub schemas: Vec<TypeSchema>,
}
