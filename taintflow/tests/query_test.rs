//! Query Protocol Tests

use std::path::PathBuf;

use taintflow::query::handle_text;
use taintflow::resolver::{AstResolver, ParsedModule};
use taintflow::utils::LineIndex;

fn resolver() -> AstResolver {
    let source = "\
class Base:
    def method(self):
        pass

class Derived(Base):
    def method(self):
        pass

def entry():
    pass
";
    let modules = vec![ParsedModule {
        name: "app".to_owned(),
        path: PathBuf::from("app.py"),
        module: ruff_python_parser::parse_module(source)
            .expect("test module must parse")
            .into_syntax(),
        line_index: LineIndex::new(source),
    }];
    AstResolver::build(&modules)
}

#[test]
fn less_or_equal_uses_subclassing() {
    let resolver = resolver();
    let response = handle_text(
        &resolver,
        r#"{"query": "less_or_equal", "left": "app.Derived", "right": "app.Base"}"#,
    );
    assert_eq!(response["response"], serde_json::json!(true));

    let response = handle_text(
        &resolver,
        r#"{"query": "less_or_equal", "left": "app.Base", "right": "app.Derived"}"#,
    );
    assert_eq!(response["response"], serde_json::json!(false));
}

#[test]
fn superclasses_walk_the_hierarchy() {
    let resolver = resolver();
    let response = handle_text(
        &resolver,
        r#"{"query": "superclasses", "types": ["app.Derived"]}"#,
    );
    let supers = &response["response"][0]["superclasses"];
    assert_eq!(supers[0], "app.Base");
}

#[test]
fn defines_list_module_callables() {
    let resolver = resolver();
    let response = handle_text(&resolver, r#"{"query": "defines", "module": "app"}"#);
    let defines = response["response"].as_array().expect("array");
    let names: Vec<&str> = defines.iter().filter_map(|v| v.as_str()).collect();
    assert!(names.contains(&"app.entry"));
    assert!(names.contains(&"app.Base.method"));
}

#[test]
fn path_of_module_resolves() {
    let resolver = resolver();
    let response = handle_text(&resolver, r#"{"query": "path_of_module", "module": "app"}"#);
    assert_eq!(response["response"], serde_json::json!("app.py"));
}

#[test]
fn unknown_class_is_a_protocol_error() {
    let resolver = resolver();
    let response = handle_text(&resolver, r#"{"query": "attributes", "class": "app.Ghost"}"#);
    assert!(response.get("error").is_some());
    assert!(response.get("response").is_none());
}

#[test]
fn malformed_query_is_a_protocol_error() {
    let resolver = resolver();
    let response = handle_text(&resolver, "{not json");
    assert!(response["error"]
        .as_str()
        .expect("error string")
        .contains("malformed query"));
}

#[test]
fn batch_answers_in_order() {
    let resolver = resolver();
    let response = handle_text(
        &resolver,
        r#"{"query": "batch", "requests": [
            {"query": "less_or_equal", "left": "app.Derived", "right": "app.Base"},
            {"query": "path_of_module", "module": "missing"}
        ]}"#,
    );
    let batch = response["response"].as_array().expect("array");
    assert_eq!(batch[0]["response"], serde_json::json!(true));
    assert!(batch[1].get("error").is_some());
}
