//! Taint Configuration Tests

use taintflow::config::TaintConfig;
use taintflow::errors::ConfigError;
use taintflow::taint::SinkKind;

const BASIC: &str = r#"{
    "sources": [{"name": "UserControlled"}, {"name": "Cookies"}],
    "sinks": [{"name": "SQL"}, {"name": "RemoteCodeExecution"}],
    "features": [{"name": "string_concat"}],
    "rules": [
        {
            "code": 5001,
            "name": "User input reaches SQL",
            "sources": ["UserControlled"],
            "sinks": ["SQL"],
            "message_format": "Data from {$sources} may reach {$sinks}"
        }
    ]
}"#;

#[test]
fn parses_kinds_and_rules() {
    let config = TaintConfig::from_json(BASIC).expect("valid config");
    assert!(config.is_declared_source("UserControlled"));
    assert!(config.is_declared_source("Cookies"));
    assert!(config.is_declared_sink("SQL"));
    assert!(!config.is_declared_sink("UserControlled"));
    assert_eq!(config.rules.len(), 1);
    assert_eq!(config.rules[0].code, 5001);
}

#[test]
fn unknown_keys_are_tolerated() {
    let config = TaintConfig::from_json(
        r#"{
            "sources": [{"name": "A"}],
            "sinks": [{"name": "B"}],
            "rules": [],
            "options": {"future": true},
            "comment": "ignored"
        }"#,
    );
    assert!(config.is_ok(), "forward-compatible keys must parse");
}

#[test]
fn undefined_rule_kind_is_rejected() {
    let result = TaintConfig::from_json(
        r#"{
            "sources": [{"name": "A"}],
            "sinks": [{"name": "B"}],
            "rules": [{
                "code": 1,
                "sources": ["A"],
                "sinks": ["Missing"],
                "message_format": ""
            }]
        }"#,
    );
    match result {
        Err(ConfigError::UndefinedKind { flavor, kind, .. }) => {
            assert_eq!(flavor, "sink");
            assert_eq!(kind, "Missing");
        }
        other => panic!("expected undefined-kind error, got {other:?}"),
    }
}

#[test]
fn duplicate_rule_codes_are_rejected() {
    let result = TaintConfig::from_json(
        r#"{
            "sources": [{"name": "A"}],
            "sinks": [{"name": "B"}],
            "rules": [
                {"code": 1, "sources": ["A"], "sinks": ["B"], "message_format": ""},
                {"code": 1, "sources": ["A"], "sinks": ["B"], "message_format": ""}
            ]
        }"#,
    );
    assert!(matches!(result, Err(ConfigError::DuplicateRuleCode { code: 1 })));
}

#[test]
fn constraint_defaults_are_documented_values() {
    let config = TaintConfig::from_json(r#"{}"#).expect("empty config");
    assert_eq!(config.constraints.maximum_tree_depth, 4);
    assert_eq!(config.constraints.maximum_trace_length, 100);
    assert_eq!(config.constraints.widening_threshold, 2);
    assert_eq!(config.constraints.maximum_overrides_to_analyze, 100);
}

#[test]
fn constraints_come_from_configuration() {
    let config = TaintConfig::from_json(
        r#"{
            "analysis_model_constraints": {
                "maximum_overrides_to_analyze": 7,
                "maximum_tree_depth": 2,
                "maximum_trace_length": 10,
                "widening_threshold": 1
            }
        }"#,
    )
    .expect("valid config");
    assert_eq!(config.constraints.maximum_overrides_to_analyze, 7);
    assert_eq!(config.constraints.maximum_tree_depth, 2);
    assert_eq!(config.constraints.maximum_trace_length, 10);
    assert_eq!(config.constraints.widening_threshold, 1);
}

#[test]
fn combined_source_rules_resolve_partial_sinks() {
    let config = TaintConfig::from_json(
        r#"{
            "sources": [{"name": "UserControlled"}, {"name": "PermissiveContext"}],
            "sinks": [],
            "combined_source_rules": [{
                "code": 6001,
                "name": "paired",
                "message_format": "both halves",
                "rule": [
                    {"sources": ["UserControlled"], "partial_sink": "P_A"},
                    {"sources": ["PermissiveContext"], "partial_sink": "P_B"}
                ]
            }]
        }"#,
    )
    .expect("valid config");

    let rule = &config.rules[0];
    assert_eq!(rule.code, 6001);
    let halves = rule.combined.as_ref().expect("combined halves");
    assert_eq!(halves.len(), 2);
    assert_eq!(halves[0].sink, SinkKind::partial("P_A", "a"));
    assert_eq!(halves[1].sink, SinkKind::partial("P_B", "b"));

    assert_eq!(
        config.resolve_partial_sink("P_A"),
        Some(SinkKind::partial("P_A", "a"))
    );
    assert_eq!(config.resolve_partial_sink("nope"), None);
}

#[test]
fn combined_rule_with_undefined_source_is_rejected() {
    let result = TaintConfig::from_json(
        r#"{
            "sources": [{"name": "A"}],
            "combined_source_rules": [{
                "code": 2,
                "message_format": "",
                "rule": [{"sources": ["Ghost"], "partial_sink": "P"}]
            }]
        }"#,
    );
    assert!(matches!(result, Err(ConfigError::UndefinedKind { .. })));
}

#[test]
fn implicit_literal_sources_parse() {
    let config = TaintConfig::from_json(
        r#"{
            "sources": [{"name": "StringLiteral"}],
            "implicit_sources": {"literal_strings": [{"name": "StringLiteral"}]}
        }"#,
    )
    .expect("valid config");
    assert_eq!(config.literal_string_sources.len(), 1);
}
