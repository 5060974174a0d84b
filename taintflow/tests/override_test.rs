//! Override Graph Tests
//!
//! Dynamic dispatch joins over overriders; oversized override sets
//! collapse to an obscure placeholder with a recorded diagnostic.

use std::fs;
use std::path::PathBuf;

use taintflow::driver::{run_analysis, AnalysisRequest};
use taintflow::graph::OverrideGraph;
use taintflow::resolver::{AstResolver, ParsedModule};
use taintflow::target::Target;
use taintflow::utils::LineIndex;

const CONFIG: &str = r#"{
    "sources": [{"name": "Test"}],
    "sinks": [{"name": "Test"}],
    "rules": [{
        "code": 5001,
        "name": "test flow",
        "sources": ["Test"],
        "sinks": ["Test"],
        "message_format": "{$sources} to {$sinks}"
    }]
}"#;

const HIERARCHY: &str = "\
def source():
    ...

def sink(arg):
    ...

class Base:
    def method(self, arg):
        pass

class LeakyChild(Base):
    def method(self, arg):
        sink(arg)

class QuietChild(Base):
    def method(self, arg):
        pass

def main():
    b = Base()
    b.method(source())
";

const MODELS: &str = "\
def m.source() -> TaintSource[Test]: ...
def m.sink(arg: TaintSink[Test]): ...
";

fn run(config: &str) -> taintflow::AnalysisOutcome {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("m.py"), HIERARCHY).expect("write");
    fs::write(dir.path().join("models.tfmodel"), MODELS).expect("write");
    fs::write(dir.path().join("config.json"), config).expect("write");
    let request = AnalysisRequest {
        source_root: dir.path().to_path_buf(),
        model_paths: vec![dir.path().join("models.tfmodel")],
        taint_config: Some(dir.path().join("config.json")),
        jobs: Some(2),
        verify_models: true,
        quiet: true,
        ..AnalysisRequest::default()
    };
    run_analysis(&request).expect("analysis")
}

fn hierarchy_resolver() -> AstResolver {
    let modules = vec![ParsedModule {
        name: "m".to_owned(),
        path: PathBuf::from("m.py"),
        module: ruff_python_parser::parse_module(HIERARCHY)
            .expect("test module must parse")
            .into_syntax(),
        line_index: LineIndex::new(HIERARCHY),
    }];
    AstResolver::build(&modules)
}

#[test]
fn dynamic_dispatch_joins_over_overriders() {
    let outcome = run(CONFIG);
    // The leaky override sinks its argument; the join point carries it.
    assert_eq!(outcome.issues.len(), 1);
    let issue = &outcome.issues[0];
    assert_eq!(issue.code, 5001);
    assert_eq!(issue.callable.canonical(), "m.main");
    assert!(issue.sink_handle.callee.contains("m.Base.method"));
}

#[test]
fn oversized_override_set_collapses_to_obscure() {
    // The cap of 1 is below the two overriders.
    let config = r#"{
        "sources": [{"name": "Test"}],
        "sinks": [{"name": "Test"}],
        "rules": [{
            "code": 5001,
            "name": "test flow",
            "sources": ["Test"],
            "sinks": ["Test"],
            "message_format": ""
        }],
        "analysis_model_constraints": {"maximum_overrides_to_analyze": 1}
    }"#;
    let outcome = run(config);
    // The obscure placeholder has no matching sink configured.
    assert!(outcome.issues.is_empty());
}

#[test]
fn override_graph_records_members_and_elisions() {
    let resolver = hierarchy_resolver();

    let graph = OverrideGraph::build(&resolver, 100, &[]);
    let target = Target::override_("m.Base", "method");
    let members = graph.members(&target);
    assert_eq!(members.len(), 3, "base plus both overriders");
    assert!(!graph.is_collapsed(&target));
    assert!(graph.elided.is_empty());

    let collapsed = OverrideGraph::build(&resolver, 1, &[]);
    assert!(collapsed.is_collapsed(&target));
    assert_eq!(collapsed.elided.len(), 1);
    assert_eq!(collapsed.elided[0].count, 2);
    assert!(collapsed.members(&target).is_empty());
}

#[test]
fn skip_overrides_excludes_the_method() {
    let resolver = hierarchy_resolver();
    let graph = OverrideGraph::build(&resolver, 100, &["m.Base.method".to_owned()]);
    let target = Target::override_("m.Base", "method");
    assert!(graph.members(&target).is_empty());
    assert!(!graph.is_collapsed(&target));
}
