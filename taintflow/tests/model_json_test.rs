//! Model JSON Round-Trip Tests

use compact_str::CompactString;
use smallvec::smallvec;

use taintflow::access_path::{PathLabel, Root};
use taintflow::model::{Mode, Model, SanitizeAxes};
use taintflow::report::{model_from_json, model_to_json};
use taintflow::taint::{FlowDetails, SimpleFeature, SinkKind, SourceKind};
use taintflow::target::Target;

fn param(position: u32, name: &str) -> Root {
    Root::PositionalParameter {
        position,
        name: CompactString::from(name),
    }
}

#[test]
fn roundtrip_source_model() {
    let mut model = Model::empty();
    let mut flow = FlowDetails::declaration();
    flow.add_feature(SimpleFeature::Via(CompactString::from("shell")));
    model.add_source(Root::LocalResult, &[], SourceKind::new("Test"), flow);

    let target = Target::function("m.source");
    let json = model_to_json(&target, &model);
    let (parsed_target, parsed_model) = model_from_json(&json).expect("round trip");
    assert_eq!(parsed_target, target);
    assert_eq!(parsed_model, model);
}

#[test]
fn roundtrip_sink_model_with_path() {
    let mut model = Model::empty();
    model.add_sink(
        param(0, "arg"),
        &[PathLabel::Field(CompactString::from("payload"))],
        SinkKind::named("SQL"),
        FlowDetails::declaration(),
    );

    let target = Target::method("m.C", "run");
    let json = model_to_json(&target, &model);
    let (parsed_target, parsed_model) = model_from_json(&json).expect("round trip");
    assert_eq!(parsed_target, target);
    assert_eq!(parsed_model, model);
}

#[test]
fn roundtrip_tito_with_return_path() {
    let mut model = Model::empty();
    model.add_tito(
        param(1, "x"),
        &[],
        SinkKind::LocalReturn,
        smallvec![PathLabel::Field(CompactString::from("x"))],
        FlowDetails::declaration(),
    );

    let target = Target::method("m.P", "__init__");
    let json = model_to_json(&target, &model);
    let (_, parsed_model) = model_from_json(&json).expect("round trip");
    assert_eq!(parsed_model, model);
}

#[test]
fn roundtrip_parameter_update_kind() {
    let mut model = Model::empty();
    model.add_tito(
        param(0, "a"),
        &[],
        SinkKind::ParameterUpdate(1),
        smallvec![],
        FlowDetails::declaration(),
    );
    let json = model_to_json(&Target::function("m.update"), &model);
    let (_, parsed_model) = model_from_json(&json).expect("round trip");
    assert_eq!(parsed_model, model);
}

#[test]
fn roundtrip_partial_sink_kind() {
    let mut model = Model::empty();
    model.add_sink(
        param(0, "a"),
        &[],
        SinkKind::partial("P_A", "a"),
        FlowDetails::declaration(),
    );
    let json = model_to_json(&Target::function("m.multi"), &model);
    let (_, parsed_model) = model_from_json(&json).expect("round trip");
    assert_eq!(parsed_model, model);
}

#[test]
fn roundtrip_modes() {
    let mut model = Model::empty();
    model.mode = Mode::Sanitize(SanitizeAxes {
        sources: true,
        sinks: false,
        tito: true,
    });
    model.is_obscure = true;
    // A mode-only model still needs some taint to be non-empty.
    model.add_sink(param(0, "a"), &[], SinkKind::named("SQL"), FlowDetails::declaration());

    let json = model_to_json(&Target::function("m.f"), &model);
    let (_, parsed_model) = model_from_json(&json).expect("round trip");
    assert_eq!(parsed_model.mode, model.mode);
    assert!(parsed_model.is_obscure);
}

#[test]
fn empty_model_renders_without_taint_keys() {
    let json = model_to_json(&Target::function("m.f"), &Model::empty());
    assert!(json.get("sources").is_none());
    assert!(json.get("sinks").is_none());
    assert!(json.get("tito").is_none());
}
