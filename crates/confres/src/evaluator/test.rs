use super::*;
use crate::document::Document;
use crate::schema::{SchemaSource, TypeSchema, ValidationPattern};
use crate::variables::Variable;
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

/// Every identity resolves to its canonical form
struct Everything;

impl PidResolver for Everything {
    fn lookup_pid(&self, id: &ConfigId) -> Option<String> {
        Some(id.to_string())
    }
}

fn registry(schemas: Vec<TypeSchema>) -> SchemaRegistry {
    SchemaRegistry::default()
        .add_source(&SchemaSource::new("test".into(), schemas))
        .0
}

fn variables(pairs: &[(&str, &str)]) -> VariableRegistry {
    VariableRegistry::new(
        pairs.iter().map(|(name, value)| Variable::new(*name, *value)),
        &[] as &[&str],
    )
}

fn string(value: &str) -> Value {
    Value::from(value)
}

fn strings(values: &[&str]) -> Vec<Scalar> {
    values.iter().map(|value| Scalar::from(*value)).collect()
}

fn host() -> ConfigElement {
    ConfigElement::new("host").with_id("one")
}

/// Evaluates `element` against the entry registered for its node name
fn evaluate(
    registry: &SchemaRegistry,
    variables: &VariableRegistry,
    element: &ConfigElement,
) -> Result<EvaluationResult, EvaluateError> {
    let evaluator = ConfigEvaluator::new(variables, &Everything).with_registry(registry);
    let entry = evaluator.entry_for(element.node_name());
    evaluator.evaluate(element, entry.as_ref())
}

fn host_schema() -> TypeSchema {
    TypeSchema::factory("com.example.host").alias("host")
}

#[test]
fn without_schema() {
    let element = host()
        .with_attribute("ip", "10.0.0.1")
        .with_list("names", ["a", "b"]);
    let variables = variables(&[]);
    let result = ConfigEvaluator::new(&variables, &Everything)
        .evaluate(&element, None)
        .unwrap();

    assert_eq!(result.config_id(), &ConfigId::new("host", Some("one".into())));
    assert_eq!(result.pid(), Some("host[one]"));
    assert_eq!(result.property("id"), Some(&string("one")));
    assert_eq!(result.property("ip"), Some(&string("10.0.0.1")));
    assert_eq!(result.property("names"), Some(&Value::Array(strings(&["a", "b"]))));
    assert_eq!(result.property("config.id"), Some(&string("host[one]")));
    assert_eq!(result.property("config.displayId"), Some(&string("host[one]")));
    assert!(result.is_valid());
}

#[test]
fn typed_values_and_defaults() {
    let registry = registry(vec![host_schema()
        .attribute(AttributeDefinition::new("port", AttributeType::Integer).default_value("80"))
        .attribute(AttributeDefinition::new("enabled", AttributeType::Boolean).default_value("true"))
        .attribute(AttributeDefinition::string("name"))]);
    let element = host()
        .with_attribute("port", "8080")
        .with_attribute("name", "web");

    let result = evaluate(&registry, &variables(&[]), &element).unwrap();

    assert_eq!(result.config_id().to_string(), "com.example.host[one]");
    assert_eq!(result.property("port"), Some(&Value::from(8080)));
    assert_eq!(result.property("enabled"), Some(&Value::from(true)));
    assert_eq!(result.property("name"), Some(&string("web")));
    assert!(result.is_valid());
}

#[test]
fn invalid_values_fall_back_to_the_default() {
    let registry = registry(vec![host_schema()
        .attribute(AttributeDefinition::new("port", AttributeType::Integer).default_value("80"))
        .attribute(AttributeDefinition::new("weight", AttributeType::Integer))]);

    let fallback = host().with_attribute("port", "abc");
    let result = evaluate(&registry, &variables(&[]), &fallback).unwrap();
    assert_eq!(result.property("port"), Some(&Value::from(80)));
    assert!(result.is_valid());

    let invalid = host().with_attribute("weight", "heavy");
    let result = evaluate(&registry, &variables(&[]), &invalid).unwrap();
    assert_eq!(result.property("weight"), None);
    assert_eq!(
        result.issues(),
        [ValidationIssue::InvalidValue {
            attribute: "weight".into(),
            value: "heavy".into(),
            reason: "not a number in range".into(),
        }]
    );
}

#[test]
fn required_options_and_masking() {
    let registry = registry(vec![host_schema()
        .attribute(AttributeDefinition::string("name").required())
        .attribute(
            AttributeDefinition::string("mode")
                .option("fast", "Fast")
                .option("slow", "Slow"),
        )
        .attribute(
            AttributeDefinition::new("secret", AttributeType::Password)
                .pattern(ValidationPattern::new("[a-z]+").unwrap()),
        )]);

    let element = host()
        .with_attribute("mode", "FAST")
        .with_attribute("secret", "ABC");
    let result = evaluate(&registry, &variables(&[]), &element).unwrap();

    assert_eq!(result.property("mode"), Some(&string("fast")));
    assert_eq!(
        result.issues(),
        [
            ValidationIssue::MissingRequired {
                attribute: "name".into()
            },
            ValidationIssue::InvalidValue {
                attribute: "secret".into(),
                value: "*****".into(),
                reason: "does not match `[a-z]+`".into(),
            },
        ]
    );
}

#[test]
fn variables_and_extensions() {
    let registry = registry(vec![host_schema()
        .attribute(AttributeDefinition::new("port", AttributeType::Integer))
        .attribute(AttributeDefinition::string("root").variable("base"))
        .attribute(AttributeDefinition::string("template").deferred())]);
    let variables = variables(&[("port", "9090"), ("base", "/srv")]);
    let element = host()
        .with_attribute("port", "${port}")
        .with_attribute("template", "${base}/x");

    let result = evaluate(&registry, &variables, &element).unwrap();

    assert_eq!(result.property("port"), Some(&Value::from(9090)));
    assert_eq!(result.property("root"), Some(&string("/srv")));
    assert_eq!(result.property("template"), Some(&string("${base}/x")));
    assert_eq!(result.variables().get("port"), Some(&Some("9090".to_string())));
    assert_eq!(result.variables().get("base"), Some(&Some("/srv".to_string())));
}

#[test]
fn list_variables() {
    let registry = registry(vec![host_schema()
        .attribute(AttributeDefinition::string("hosts").cardinality(10))
        .attribute(
            AttributeDefinition::string("targets")
                .cardinality(-5)
                .variable("list(hosts)"),
        )]);
    let variables = variables(&[("hosts", "a, b,c")]);
    let element = host().with_attribute("hosts", "${list(hosts)}");

    let result = evaluate(&registry, &variables, &element).unwrap();

    assert_eq!(result.property("hosts"), Some(&Value::Array(strings(&["a", "b", "c"]))));
    assert_eq!(result.property("targets"), Some(&Value::Vector(strings(&["a", "b", "c"]))));
}

#[test]
fn expressions_over_other_attributes() {
    let element = host()
        .with_list("names", ["one", "two"])
        .with_attribute("size", "${count(names)}")
        .with_attribute("self", "${service.pid}")
        .with_attribute("loop", "${loop}");
    let variables = variables(&[]);
    let result = ConfigEvaluator::new(&variables, &Everything)
        .evaluate(&element, None)
        .unwrap();

    assert_eq!(result.property("size"), Some(&string("2")));
    assert_eq!(result.property("self"), Some(&string("host[one]")));
    assert_eq!(result.property("loop"), Some(&string("${loop}")));
}

#[test]
fn variable_cycles_abort() {
    let variables = variables(&[("a", "${b}"), ("b", "${a}")]);
    let element = host().with_attribute("value", "${a}");

    let result = ConfigEvaluator::new(&variables, &Everything).evaluate(&element, None);

    assert!(matches!(
        result,
        Err(EvaluateError::VariableCycle(VariableError::Cycle(_)))
    ));
}

#[test]
fn nested_elements_get_default_ids() {
    let element = host()
        .with_child("port", ConfigElement::new("port").with_attribute("number", "80"))
        .with_child("port", ConfigElement::new("port").with_attribute("number", "81"));
    let variables = variables(&[]);
    let result = ConfigEvaluator::new(&variables, &Everything)
        .evaluate(&element, None)
        .unwrap();

    assert_eq!(
        result.property("port"),
        Some(&Value::Array(strings(&[
            "host[one]/port(port)[default-0]",
            "host[one]/port(port)[default-1]"
        ])))
    );
    assert_eq!(result.nested().len(), 2);

    let first: ConfigId = "host[one]/port(port)[default-0]".parse().unwrap();
    let nested = &result.nested()[&first];
    assert_eq!(nested.property("number"), Some(&string("80")));
    assert_eq!(
        nested.property("config.displayId"),
        Some(&string("host[one]/port[default-0]"))
    );
    assert_eq!(nested.property("config.parentPID"), Some(&string("host[one]")));
}

#[test]
fn host_fragments_across_documents() {
    let registry = port_registry(5, true);
    let port = |number: &str| ConfigElement::new("port").with_attribute("number", number);
    let store = ConfigurationStore::default()
        .add(&Document::new("one.hcl".into()).with_element(host().with_child("port", port("1"))))
        .add(
            &Document::new("two.hcl".into()).with_element(
                host()
                    .with_child("port", port("2"))
                    .with_child("port", port("1000").with_id("a").with_attribute("protocol", "tcp")),
            ),
        )
        .add(
            &Document::new("three.hcl".into())
                .with_element(host().with_child("port", port("2000").with_id("a"))),
        );
    let variables = variables(&[]);
    let resolver = StoreResolver::new(&store, Some(&registry));
    let evaluator = ConfigEvaluator::new(&variables, &resolver)
        .with_registry(&registry)
        .with_store(&store);

    let element = store
        .factory_instance("com.example.host", Some("host"), "one")
        .unwrap();
    let result = evaluator
        .evaluate(&element, evaluator.entry_for("host").as_ref())
        .unwrap();

    let port_id = |id: &str| -> ConfigId {
        format!("com.example.host[one]/com.example.port(port)[{id}]")
            .parse()
            .unwrap()
    };
    assert_eq!(result.nested().len(), 3);
    let first = &result.nested()[&port_id("default-0")];
    assert_eq!(first.property("number"), Some(&Value::from(1)));
    let second = &result.nested()[&port_id("default-1")];
    assert_eq!(second.property("number"), Some(&Value::from(2)));
    let merged = &result.nested()[&port_id("a")];
    assert_eq!(merged.property("number"), Some(&Value::from(2000)));
    assert_eq!(merged.property("protocol"), Some(&string("tcp")));
}

#[test]
fn nested_elements_with_the_same_id_merge() {
    let element = host()
        .with_child("port", ConfigElement::new("port").with_id("a").with_attribute("x", "1"))
        .with_child("port", ConfigElement::new("port").with_id("a").with_attribute("y", "2"));
    let variables = variables(&[]);
    let result = ConfigEvaluator::new(&variables, &Everything)
        .evaluate(&element, None)
        .unwrap();

    assert_eq!(
        result.property("port"),
        Some(&Value::Array(strings(&["host[one]/port(port)[a]"])))
    );
    let nested = result.nested().values().next().unwrap();
    assert_eq!(nested.property("x"), Some(&string("1")));
    assert_eq!(nested.property("y"), Some(&string("2")));
}

#[test]
fn child_aliases_type_nested_elements() {
    let registry = registry(vec![
        host_schema(),
        TypeSchema::factory("com.example.tls")
            .child_of("com.example.host", "tls")
            .attribute(AttributeDefinition::new("port", AttributeType::Integer)),
    ]);
    let element = host().with_child("tls", ConfigElement::new("tls").with_attribute("port", "443"));

    let result = evaluate(&registry, &variables(&[]), &element).unwrap();

    let tls: ConfigId = "com.example.host[one]/com.example.tls(tls)[default-0]"
        .parse()
        .unwrap();
    assert_eq!(result.nested()[&tls].property("port"), Some(&Value::from(443)));
}

fn port_registry(cardinality: i32, factory: bool) -> SchemaRegistry {
    let port = match factory {
        true => TypeSchema::factory("com.example.port"),
        false => TypeSchema::new("com.example.port"),
    };
    registry(vec![
        host_schema().attribute(
            AttributeDefinition::reference_to("port", "com.example.port").cardinality(cardinality),
        ),
        port.alias("port")
            .attribute(AttributeDefinition::new("number", AttributeType::Integer)),
    ])
}

#[test]
fn references_resolve_through_the_store() {
    let registry = port_registry(5, true);
    let store = ConfigurationStore::default().add(
        &Document::new("a.hcl".into())
            .with_element(ConfigElement::new("port").with_id("http").with_attribute("number", "80"))
            .with_element(host().with_attribute("portRef", "http, missing")),
    );
    let variables = variables(&[]);
    let resolver = StoreResolver::new(&store, Some(&registry));
    let results = ConfigEvaluator::new(&variables, &resolver)
        .with_registry(&registry)
        .with_store(&store)
        .evaluate_all();

    assert_eq!(results.len(), 2);
    let host = results[&ConfigId::new("com.example.host", Some("one".into()))]
        .as_ref()
        .unwrap();
    assert_eq!(
        host.property("port"),
        Some(&Value::Array(strings(&["com.example.port[http]"])))
    );
    assert_eq!(host.references().len(), 2);
    assert_eq!(
        host.unresolved()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        ["com.example.host[one]: attribute port references com.example.port[missing] which does not exist"]
    );
    assert!(host.is_valid());
}

#[test]
#[traced_test]
fn unresolved_references_are_reported_by_the_caller() {
    let unregistered = registry(vec![host_schema()]);
    let registry = port_registry(5, true);
    let store = ConfigurationStore::default();
    let variables = variables(&[]);
    let resolver = StoreResolver::new(&store, Some(&registry));
    let evaluator = ConfigEvaluator::new(&variables, &resolver).with_registry(&registry);

    let result = evaluator
        .evaluate(&host().with_attribute("portRef", "missing"), evaluator.entry_for("host").as_ref())
        .unwrap();
    assert_eq!(result.unresolved().len(), 1);
    assert!(!logs_contain("unresolved reference"));

    assert_eq!(result.report_unresolved(&unregistered), 0);
    assert!(!logs_contain("unresolved reference"));

    assert_eq!(result.report_unresolved(&registry), 1);
    assert!(logs_contain("unresolved reference"));
}

#[test]
fn too_many_nested_references() {
    let element = host()
        .with_child("port", ConfigElement::new("port").with_id("a"))
        .with_child("port", ConfigElement::new("port").with_id("b"))
        .with_child("port", ConfigElement::new("port").with_id("c"));

    let result = evaluate(&port_registry(2, true), &variables(&[]), &element);

    let error = result.unwrap_err();
    assert_eq!(
        error,
        EvaluateError::CardinalityExceeded {
            attribute: "port".into(),
            max: 2
        }
    );
    assert_eq!(error.to_string(), "Attribute port exceeded maximum allowed size 2");
}

#[test]
fn nested_singletons_merge() {
    let element = host()
        .with_child("port", ConfigElement::new("port").with_attribute("number", "1"))
        .with_child("port", ConfigElement::new("port").with_attribute("x", "2"))
        .with_child("port", ConfigElement::new("port").with_attribute("y", "3"));

    let result = evaluate(&port_registry(2, false), &variables(&[]), &element).unwrap();

    assert_eq!(
        result.property("port"),
        Some(&Value::Array(strings(&["com.example.host[one]/com.example.port(port)"])))
    );
    assert_eq!(result.nested().len(), 1);
    let nested = result.nested().values().next().unwrap();
    assert_eq!(nested.property("number"), Some(&Value::from(1)));
    assert_eq!(nested.property("y"), Some(&string("3")));
}

#[test]
fn flat_references_expand_valid_children() {
    let registry = registry(vec![
        TypeSchema::factory("com.example.top").alias("top").attribute(
            AttributeDefinition::reference_to("c1", "com.example.c1")
                .cardinality(5)
                .flat(),
        ),
        TypeSchema::factory("com.example.c1")
            .attribute(AttributeDefinition::string("name").required()),
    ]);
    let element = ConfigElement::new("top")
        .with_id("one")
        .with_child("c1", ConfigElement::new("c1").with_attribute("name", "first"))
        .with_child("c1", ConfigElement::new("c1"));

    let result = evaluate(&registry, &variables(&[]), &element).unwrap();

    assert_eq!(result.property("c1.0.name"), Some(&string("first")));
    assert_eq!(
        result.property("c1.0.config.referenceType"),
        Some(&string("com.example.c1"))
    );
    assert_eq!(result.property("c1.1.name"), None);
    assert_eq!(result.property("c1"), None);
    assert!(result.is_valid());
}

#[test]
fn flattened_unresolved_references_belong_to_the_parent() {
    let registry = registry(vec![
        TypeSchema::factory("com.example.top").alias("top").attribute(
            AttributeDefinition::reference_to("c1", "com.example.c1")
                .cardinality(5)
                .flat(),
        ),
        TypeSchema::factory("com.example.c1")
            .attribute(AttributeDefinition::reference_to("port", "com.example.port")),
        TypeSchema::factory("com.example.port"),
    ]);
    let element = ConfigElement::new("top")
        .with_id("one")
        .with_child("c1", ConfigElement::new("c1").with_attribute("portRef", "missing"));
    let store = ConfigurationStore::default();
    let variables = variables(&[]);
    let resolver = StoreResolver::new(&store, Some(&registry));
    let evaluator = ConfigEvaluator::new(&variables, &resolver).with_registry(&registry);

    let result = evaluator
        .evaluate(&element, evaluator.entry_for("top").as_ref())
        .unwrap();

    assert_eq!(
        result.property("c1.0.config.referenceType"),
        Some(&string("com.example.c1"))
    );
    assert_eq!(
        result
            .unresolved()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        ["com.example.top[one]: attribute port references com.example.port[missing] which does not exist"]
    );
}

#[test]
fn service_references_need_exactly_one_match() {
    let registry = registry(vec![
        TypeSchema::factory("com.example.http").exposes("com.example.Listener"),
        TypeSchema::factory("com.example.https").exposes("com.example.Listener"),
        TypeSchema::factory("com.example.server").alias("server").attribute(
            AttributeDefinition::new("listener", AttributeType::Pid).service("com.example.Listener"),
        ),
    ]);
    let store = ConfigurationStore::default().add(
        &Document::new("a.hcl".into())
            .with_element(ConfigElement::new("com.example.http").with_id("a"))
            .with_element(ConfigElement::new("com.example.https").with_id("a"))
            .with_element(ConfigElement::new("com.example.https").with_id("b")),
    );
    let variables = variables(&[]);
    let resolver = StoreResolver::new(&store, Some(&registry));
    let evaluator = ConfigEvaluator::new(&variables, &resolver).with_registry(&registry);
    let entry = evaluator.entry_for("server");

    let single = ConfigElement::new("server")
        .with_id("one")
        .with_attribute("listener", "b");
    let result = evaluator.evaluate(&single, entry.as_ref()).unwrap();
    assert_eq!(result.property("listener"), Some(&string("com.example.https[b]")));

    let ambiguous = ConfigElement::new("server")
        .with_id("two")
        .with_attribute("listener", "a");
    let result = evaluator.evaluate(&ambiguous, entry.as_ref()).unwrap();
    assert_eq!(result.property("listener"), None);
    assert!(matches!(
        result.unresolved(),
        [UnresolvedReference::Service { count: 2, .. }]
    ));
}

#[test]
fn wildcard_references_every_instance() {
    let registry = registry(vec![
        host_schema()
            .attribute(AttributeDefinition::reference_to("ports", "com.example.port").default_value("*")),
        TypeSchema::factory("com.example.port").alias("port"),
    ]);
    let store = ConfigurationStore::default().add(
        &Document::new("a.hcl".into())
            .with_element(ConfigElement::new("port").with_id("a"))
            .with_element(ConfigElement::new("port").with_id("b")),
    );
    let variables = variables(&[]);
    let resolver = StoreResolver::new(&store, Some(&registry));
    let evaluator = ConfigEvaluator::new(&variables, &resolver).with_registry(&registry);

    let result = evaluator
        .evaluate(&host(), evaluator.entry_for("host").as_ref())
        .unwrap();

    assert_eq!(
        result.property("ports"),
        Some(&Value::Vector(strings(&["com.example.port[a]", "com.example.port[b]"])))
    );
}

#[test]
fn final_attributes() {
    let registry = registry(vec![TypeSchema::factory("com.example.main")
        .alias("main")
        .attribute(AttributeDefinition::string("id").default_value("primary").finalized())]);

    let overridden = ConfigElement::new("main").with_id("other");
    let result = evaluate(&registry, &variables(&[]), &overridden).unwrap();
    assert_eq!(result.config_id().to_string(), "com.example.main[primary]");
    assert_eq!(result.property("id"), Some(&string("primary")));
    assert_eq!(
        result.issues(),
        [ValidationIssue::FinalOverridden {
            attribute: "id".into(),
            value: "other".into(),
            expected: "primary".into(),
        }]
    );

    let implicit = ConfigElement::new("main");
    let result = evaluate(&registry, &variables(&[]), &implicit).unwrap();
    assert_eq!(result.config_id().to_string(), "com.example.main[primary]");
    assert!(result.is_valid());
}

#[test]
fn copies_fill_missing_values() {
    let registry = registry(vec![host_schema()
        .attribute(AttributeDefinition::string("label").copy_of("name"))
        .attribute(AttributeDefinition::string("name"))]);

    let result = evaluate(&registry, &variables(&[]), &host().with_attribute("name", "x")).unwrap();
    assert_eq!(result.property("label"), Some(&string("x")));

    let explicit = host().with_attribute("name", "x").with_attribute("label", "y");
    let result = evaluate(&registry, &variables(&[]), &explicit).unwrap();
    assert_eq!(result.property("label"), Some(&string("y")));
}

#[test]
fn evaluation_is_repeatable() {
    let registry = port_registry(5, true);
    let element = host()
        .with_child("port", ConfigElement::new("port").with_attribute("number", "80"))
        .with_attribute("note", "${count(port)}");
    let variables = variables(&[]);

    let first = evaluate(&registry, &variables, &element).unwrap();
    let second = evaluate(&registry, &variables, &element).unwrap();
    assert_eq!(first, second);
}
