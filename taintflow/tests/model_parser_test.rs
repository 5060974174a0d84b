//! Model Parser Tests
//!
//! Syntactic and semantic validation of `.tfmodel` declarations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use compact_str::CompactString;

use taintflow::access_path::Root;
use taintflow::config::TaintConfig;
use taintflow::domains::AbstractDomain;
use taintflow::errors::AnalysisError;
use taintflow::model::{inference, Mode, Model, ModelParser};
use taintflow::resolver::{AstResolver, ParsedModule};
use taintflow::taint::{SinkKind, SourceKind};
use taintflow::target::Target;
use taintflow::utils::LineIndex;

const CONFIG: &str = r#"{
    "sources": [{"name": "Test"}, {"name": "UserControlled"}],
    "sinks": [{"name": "SQL"}, {"name": "Test"}],
    "features": [{"name": "shell"}],
    "combined_source_rules": [{
        "code": 6001,
        "message_format": "",
        "rule": [
            {"sources": ["UserControlled"], "partial_sink": "P_A"},
            {"sources": ["Test"], "partial_sink": "P_B"}
        ]
    }]
}"#;

fn parse_modules(sources: &[(&str, &str)]) -> Vec<ParsedModule> {
    sources
        .iter()
        .map(|(name, source)| ParsedModule {
            name: (*name).to_owned(),
            path: PathBuf::from(format!("{name}.py")),
            module: ruff_python_parser::parse_module(source)
                .expect("test module must parse")
                .into_syntax(),
            line_index: LineIndex::new(source),
        })
        .collect()
}

fn parse_models(
    module_source: &str,
    model_source: &str,
    verify: bool,
) -> Result<(BTreeMap<Target, Model>, Vec<String>), AnalysisError> {
    let config = TaintConfig::from_json(CONFIG).expect("config");
    let modules = parse_modules(&[("m", module_source)]);
    let resolver = AstResolver::build(&modules);
    let mut parser = ModelParser::new(&config, &resolver, verify);
    let mut models = BTreeMap::new();
    parser.parse_source(Path::new("models.tfmodel"), model_source, &mut models)?;
    let errors = parser.errors.iter().map(ToString::to_string).collect();
    Ok((models, errors))
}

fn param(position: u32, name: &str) -> Root {
    Root::PositionalParameter {
        position,
        name: CompactString::from(name),
    }
}

#[test]
fn return_source_lands_on_local_result() {
    let (models, errors) = parse_models(
        "def source():\n    return 1\n",
        "def m.source() -> TaintSource[Test]: ...\n",
        true,
    )
    .expect("model parses");
    assert!(errors.is_empty());

    let model = &models[&Target::function("m.source")];
    let taint = model
        .forward
        .source_taint
        .read(&Root::LocalResult, &[])
        .collapse();
    assert!(taint.contains(&SourceKind::new("Test")));
}

#[test]
fn parameter_sink_lands_on_parameter_port() {
    let (models, _) = parse_models(
        "def sink(arg):\n    pass\n",
        "def m.sink(arg: TaintSink[SQL]): ...\n",
        true,
    )
    .expect("model parses");

    let model = &models[&Target::function("m.sink")];
    let taint = model
        .backward
        .sink_taint
        .read(&param(0, "arg"), &[])
        .collapse();
    assert!(taint.contains(&SinkKind::named("SQL")));
}

#[test]
fn tito_annotation_encodes_local_return() {
    let (models, _) = parse_models(
        "def passthrough(x):\n    return x\n",
        "def m.passthrough(x: TaintInTaintOut): ...\n",
        true,
    )
    .expect("model parses");

    let model = &models[&Target::function("m.passthrough")];
    let taint = model
        .backward
        .taint_in_taint_out
        .read(&param(0, "x"), &[])
        .collapse();
    assert!(taint.contains(&SinkKind::LocalReturn));
}

#[test]
fn applies_to_prepends_the_field() {
    let (models, _) = parse_models(
        "def sink(arg):\n    pass\n",
        "def m.sink(arg: AppliesTo[\"payload\", TaintSink[SQL]]): ...\n",
        true,
    )
    .expect("model parses");

    let model = &models[&Target::function("m.sink")];
    let tree = model.backward.sink_taint.read_root(&param(0, "arg"));
    let at_field = tree.read(&[taintflow::access_path::PathLabel::Field(
        CompactString::from("payload"),
    )]);
    assert!(at_field.contains(&SinkKind::named("SQL")));
    // The whole-argument read must not see it at a tip above the field.
    assert!(tree.read_raw(&[]).tip().is_bottom());
}

#[test]
fn union_applies_every_member() {
    let (models, _) = parse_models(
        "def both(arg):\n    pass\n",
        "def m.both(arg: Union[TaintSink[SQL], TaintInTaintOut]): ...\n",
        true,
    )
    .expect("model parses");

    let model = &models[&Target::function("m.both")];
    assert!(model
        .backward
        .sink_taint
        .read(&param(0, "arg"), &[])
        .collapse()
        .contains(&SinkKind::named("SQL")));
    assert!(model
        .backward
        .taint_in_taint_out
        .read(&param(0, "arg"), &[])
        .collapse()
        .contains(&SinkKind::LocalReturn));
}

#[test]
fn partial_sink_resolves_against_combined_rules() {
    let (models, _) = parse_models(
        "def multi(a, b):\n    pass\n",
        "def m.multi(a: PartialSink[P_A], b: PartialSink[P_B]): ...\n",
        true,
    )
    .expect("model parses");

    let model = &models[&Target::function("m.multi")];
    assert!(model
        .backward
        .sink_taint
        .read(&param(0, "a"), &[])
        .collapse()
        .contains(&SinkKind::partial("P_A", "a")));
    assert!(model
        .backward
        .sink_taint
        .read(&param(1, "b"), &[])
        .collapse()
        .contains(&SinkKind::partial("P_B", "b")));
}

#[test]
fn skip_analysis_sets_the_mode() {
    let (models, _) = parse_models(
        "def opaque():\n    return 1\n",
        "def m.opaque() -> SkipAnalysis: ...\n",
        true,
    )
    .expect("model parses");
    assert_eq!(models[&Target::function("m.opaque")].mode, Mode::SkipAnalysis);
}

#[test]
fn sanitize_sets_axes() {
    let (models, _) = parse_models(
        "def clean(x):\n    return x\n",
        "def m.clean(x) -> Sanitize[TaintSource]: ...\n",
        true,
    )
    .expect("model parses");
    match models[&Target::function("m.clean")].mode {
        Mode::Sanitize(axes) => {
            assert!(axes.sources);
            assert!(!axes.sinks);
        }
        other => panic!("expected sanitize mode, got {other:?}"),
    }
}

#[test]
fn undefined_kind_fails_verification() {
    let result = parse_models(
        "def sink(arg):\n    pass\n",
        "def m.sink(arg: TaintSink[Ghost]): ...\n",
        true,
    );
    assert!(matches!(result, Err(AnalysisError::ModelVerification(_))));
}

#[test]
fn undefined_kind_is_dropped_without_verify() {
    let (models, errors) = parse_models(
        "def sink(arg):\n    pass\n",
        "def m.sink(arg: TaintSink[Ghost]): ...\n",
        false,
    )
    .expect("non-verify mode tolerates errors");
    assert!(models.is_empty());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Ghost"));
}

#[test]
fn unknown_callable_is_reported() {
    let result = parse_models(
        "def real():\n    pass\n",
        "def m.imaginary() -> TaintSource[Test]: ...\n",
        true,
    );
    assert!(matches!(result, Err(AnalysisError::ModelVerification(_))));
}

#[test]
fn parameter_name_mismatch_is_reported() {
    let result = parse_models(
        "def sink(arg):\n    pass\n",
        "def m.sink(wrong: TaintSink[SQL]): ...\n",
        true,
    );
    assert!(matches!(result, Err(AnalysisError::ModelVerification(_))));
}

#[test]
fn double_underscore_parameters_match_anonymously() {
    let (models, _) = parse_models(
        "def sink(arg):\n    pass\n",
        "def m.sink(__anon: TaintSink[SQL]): ...\n",
        true,
    )
    .expect("anonymous parameters are positional");
    assert!(!models[&Target::function("m.sink")].is_empty());
}

#[test]
fn elided_self_is_accepted_with_offset() {
    let (models, _) = parse_models(
        "class C:\n    def run(self, arg):\n        pass\n",
        "def m.C.run(arg: TaintSink[SQL]): ...\n",
        true,
    )
    .expect("self elision heuristic");

    let model = &models[&Target::method("m.C", "run")];
    // The binding lands on the real position, after the receiver.
    assert!(model
        .backward
        .sink_taint
        .read(&param(1, "arg"), &[])
        .collapse()
        .contains(&SinkKind::named("SQL")));
}

#[test]
fn class_model_sprays_methods() {
    let (models, _) = parse_models(
        "class C:\n    def run(self, arg):\n        pass\n    def other(self, data):\n        pass\n",
        "class m.C(TaintSink[SQL]): ...\n",
        true,
    )
    .expect("class model");

    for method in ["run", "other"] {
        let model = &models[&Target::method("m.C", method)];
        assert!(
            !model.backward.sink_taint.is_empty(),
            "method {method} should carry the class sink"
        );
    }
}

#[test]
fn global_model_attaches_to_object() {
    let (models, _) = parse_models(
        "TOKEN = \"x\"\n",
        "m.TOKEN: TaintSource[Test]\n",
        true,
    )
    .expect("global model");
    let model = &models[&Target::Object(CompactString::from("m.TOKEN"))];
    assert!(!model.forward.source_taint.is_empty());
}

#[test]
fn model_with_body_is_rejected() {
    let result = parse_models(
        "def f():\n    pass\n",
        "def m.f() -> TaintSource[Test]:\n    return 1\n",
        true,
    );
    assert!(matches!(result, Err(AnalysisError::ModelVerification(_))));
}

// ============================================================================
// Constructor inference
// ============================================================================

#[test]
fn dataclass_fields_get_tito_models() {
    let modules = parse_modules(&[(
        "m",
        "from dataclasses import dataclass\n\n@dataclass\nclass P:\n    x: int\n    y: int\n",
    )]);
    let resolver = AstResolver::build(&modules);
    let inferred = inference::infer_constructor_models(&resolver);

    let model = &inferred[&Target::method("m.P", "__init__")];
    let tito_x = model
        .backward
        .taint_in_taint_out
        .read(&param(1, "x"), &[])
        .collapse();
    assert!(tito_x.contains(&SinkKind::LocalReturn));
    let flow = tito_x.get(&SinkKind::LocalReturn).expect("flow");
    let paths: Vec<String> = flow
        .return_paths()
        .map(|path| taintflow::access_path::path_to_string(path))
        .collect();
    assert_eq!(paths, vec!["[x]".to_owned()]);

    let tito_y = model
        .backward
        .taint_in_taint_out
        .read(&param(2, "y"), &[])
        .collapse();
    assert!(tito_y.contains(&SinkKind::LocalReturn));
}

#[test]
fn named_tuple_bases_are_record_like() {
    let modules = parse_modules(&[(
        "m",
        "from typing import NamedTuple\n\nclass Point(NamedTuple):\n    x: int\n    y: int\n",
    )]);
    let resolver = AstResolver::build(&modules);
    let inferred = inference::infer_constructor_models(&resolver);
    assert!(inferred.contains_key(&Target::method("m.Point", "__init__")));
}

#[test]
fn plain_classes_are_not_inferred() {
    let modules = parse_modules(&[("m", "class C:\n    x: int\n")]);
    let resolver = AstResolver::build(&modules);
    let inferred = inference::infer_constructor_models(&resolver);
    assert!(inferred.is_empty());
}
