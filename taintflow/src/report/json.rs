//! JSON rendering of issues and models.
//!
//! Issue JSON is the downstream-tool interface and is rendered once,
//! deterministically. Model JSON round-trips: serializing a model and
//! re-parsing it yields an equal model.

use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;

use compact_str::CompactString;
use rustc_hash::FxHasher;
use serde_json::{json, Map, Value};

use crate::access_path::{path_to_string, AccessPath, PathLabel, Root};
use crate::analysis::Issue;
use crate::domains::{AbstractDomain, PathTree};
use crate::errors::AnalysisError;
use crate::model::{Mode, Model};
use crate::taint::{
    ComplexFeature, FlowDetails, SinkKind, SourceKind, Taint, TaintEnvironment, TaintKind,
    TraceInfo,
};
use crate::target::Target;
use crate::utils::Location;

// ---------------------------------------------------------------------------
// Issues.
// ---------------------------------------------------------------------------

/// Renders one issue as its output object.
#[must_use]
pub fn issue_to_json(issue: &Issue) -> Value {
    json!({
        "callable": issue.callable.canonical(),
        "callable_line": issue.callable_line,
        "code": issue.code,
        "line": issue.location.line,
        "start": issue.location.start,
        "end": issue.location.end,
        "filename": issue.filename,
        "message": issue.message,
        "traces": [
            {"name": "forward", "roots": taint_roots(&issue.source_taint)},
            {"name": "backward", "roots": taint_roots(&issue.sink_taint)},
        ],
        "features": issue
            .features
            .iter()
            .map(|(feature, always)| json!({"name": feature.to_string(), "always": always}))
            .collect::<Vec<_>>(),
        "sink_handle": {
            "kind": issue.sink_handle.kind,
            "callee": issue.sink_handle.callee,
            "index": issue.sink_handle.index,
            "parameter": issue.sink_handle.parameter,
        },
        "master_handle": master_handle(issue),
    })
}

/// Renders all issues, already ordered by the fixpoint.
#[must_use]
pub fn issues_to_json(issues: &[Issue]) -> Vec<Value> {
    issues.iter().map(issue_to_json).collect()
}

/// Writes the issue array to a file.
pub fn write_issues(path: &Path, issues: &[Issue]) -> Result<(), AnalysisError> {
    let file = std::fs::File::create(path).map_err(|source| AnalysisError::OutputIo {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = std::io::BufWriter::new(file);
    let rendered = Value::Array(issues_to_json(issues));
    serde_json::to_writer_pretty(&mut writer, &rendered).map_err(|error| {
        AnalysisError::OutputIo {
            path: path.to_path_buf(),
            source: std::io::Error::other(error),
        }
    })?;
    writer.flush().map_err(|source| AnalysisError::OutputIo {
        path: path.to_path_buf(),
        source,
    })
}

/// A stable handle binding callable, code, sink handle and a content
/// digest; used to track issues across runs.
#[must_use]
pub fn master_handle(issue: &Issue) -> String {
    let mut hasher = FxHasher::default();
    issue.callable.canonical().hash(&mut hasher);
    issue.code.hash(&mut hasher);
    issue.sink_handle.kind.hash(&mut hasher);
    issue.sink_handle.callee.hash(&mut hasher);
    issue.sink_handle.index.hash(&mut hasher);
    issue.sink_handle.parameter.hash(&mut hasher);
    issue.message.hash(&mut hasher);
    let digest = hasher.finish();
    format!(
        "{}:{}:{}:{:016x}",
        issue.callable.canonical(),
        issue.code,
        issue.sink_handle.kind,
        digest
    )
}

fn taint_roots<K: TaintKind>(taint: &Taint<K>) -> Vec<Value> {
    taint
        .iter()
        .map(|(kind, flow)| {
            json!({
                "kind": kind.to_string(),
                "length": flow.min_trace_length(),
                "traces": flow.trace.iter().map(trace_to_json).collect::<Vec<_>>(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Models.
// ---------------------------------------------------------------------------

/// Renders a non-empty model as its output object.
#[must_use]
pub fn model_to_json(target: &Target, model: &Model) -> Value {
    let mut object = Map::new();
    object.insert("callable".to_owned(), json!(target.canonical()));
    object.insert("target".to_owned(), target_to_json(target));

    let sources = environment_to_json(&model.forward.source_taint);
    if !sources.is_empty() {
        object.insert("sources".to_owned(), Value::Array(sources));
    }
    let sinks = environment_to_json(&model.backward.sink_taint);
    if !sinks.is_empty() {
        object.insert("sinks".to_owned(), Value::Array(sinks));
    }
    let tito = environment_to_json(&model.backward.taint_in_taint_out);
    if !tito.is_empty() {
        object.insert("tito".to_owned(), Value::Array(tito));
    }

    let mut modes = Vec::new();
    match model.mode {
        Mode::Normal => {}
        Mode::SkipAnalysis => modes.push(json!("SkipAnalysis")),
        Mode::Sanitize(axes) => {
            if axes.sources {
                modes.push(json!("SanitizeSources"));
            }
            if axes.sinks {
                modes.push(json!("SanitizeSinks"));
            }
            if axes.tito {
                modes.push(json!("SanitizeTito"));
            }
        }
    }
    if model.is_obscure {
        modes.push(json!("Obscure"));
    }
    if !modes.is_empty() {
        object.insert("modes".to_owned(), Value::Array(modes));
    }
    Value::Object(object)
}

/// Writes every non-empty model to a file, in canonical target order.
pub fn write_models(
    path: &Path,
    models: &[(Target, std::sync::Arc<Model>)],
) -> Result<(), AnalysisError> {
    let rendered: Vec<Value> = models
        .iter()
        .filter(|(_, model)| !model.is_empty())
        .map(|(target, model)| model_to_json(target, model))
        .collect();
    let file = std::fs::File::create(path).map_err(|source| AnalysisError::OutputIo {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &Value::Array(rendered)).map_err(|error| {
        AnalysisError::OutputIo {
            path: path.to_path_buf(),
            source: std::io::Error::other(error),
        }
    })?;
    writer.flush().map_err(|source| AnalysisError::OutputIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a model object back into `(target, model)`.
pub fn model_from_json(value: &Value) -> Result<(Target, Model), String> {
    let target = target_from_json(value.get("target").ok_or("missing target")?)?;
    let mut model = Model::empty();

    if let Some(entries) = value.get("sources").and_then(Value::as_array) {
        model.forward.source_taint = environment_from_json::<SourceKind>(entries, &source_kind_from_name)?;
    }
    if let Some(entries) = value.get("sinks").and_then(Value::as_array) {
        model.backward.sink_taint = environment_from_json::<SinkKind>(entries, &sink_kind_from_name)?;
    }
    if let Some(entries) = value.get("tito").and_then(Value::as_array) {
        model.backward.taint_in_taint_out =
            environment_from_json::<SinkKind>(entries, &sink_kind_from_name)?;
    }
    if let Some(modes) = value.get("modes").and_then(Value::as_array) {
        let mut axes = crate::model::SanitizeAxes::default();
        for mode in modes {
            match mode.as_str() {
                Some("SkipAnalysis") => model.mode.merge(Mode::SkipAnalysis),
                Some("SanitizeSources") => axes.sources = true,
                Some("SanitizeSinks") => axes.sinks = true,
                Some("SanitizeTito") => axes.tito = true,
                Some("Obscure") => model.is_obscure = true,
                _ => return Err("unknown mode".to_owned()),
            }
        }
        if axes.is_any() {
            model.mode.merge(Mode::Sanitize(axes));
        }
    }
    Ok((target, model))
}

fn source_kind_from_name(name: &str) -> Result<SourceKind, String> {
    Ok(SourceKind::new(name))
}

fn sink_kind_from_name(name: &str) -> Result<SinkKind, String> {
    if name == "LocalReturn" {
        return Ok(SinkKind::LocalReturn);
    }
    if let Some(rest) = name.strip_prefix("ParameterUpdate(") {
        let index: u32 = rest
            .strip_suffix(')')
            .and_then(|n| n.parse().ok())
            .ok_or("bad ParameterUpdate kind")?;
        return Ok(SinkKind::ParameterUpdate(index));
    }
    if let Some(rest) = name.strip_prefix("Partial[") {
        let inner = rest.strip_suffix("]]").ok_or("bad Partial kind")?;
        let (kind, label) = inner.split_once('[').ok_or("bad Partial kind")?;
        return Ok(SinkKind::partial(kind, label));
    }
    Ok(SinkKind::named(name))
}

// -- environments -----------------------------------------------------------

fn environment_to_json<K: TaintKind>(environment: &TaintEnvironment<K>) -> Vec<Value> {
    let mut entries = Vec::new();
    for (root, tree) in environment.iter() {
        tree.fold_tips(&mut |path, tip| {
            entries.push(json!({
                "port": root_to_json(root),
                "port_string": format!("{root}{}", path_to_string(path)),
                "path": path.iter().map(label_to_json).collect::<Vec<_>>(),
                "taint": taint_to_json(tip),
            }));
        });
    }
    entries
}

fn environment_from_json<K: TaintKind>(
    entries: &[Value],
    kind_parser: &dyn Fn(&str) -> Result<K, String>,
) -> Result<TaintEnvironment<K>, String> {
    let mut environment = TaintEnvironment::new();
    for entry in entries {
        let root = root_from_json(entry.get("port").ok_or("missing port")?)?;
        let path: AccessPath = entry
            .get("path")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .map(label_from_json)
                    .collect::<Result<AccessPath, String>>()
            })
            .transpose()?
            .unwrap_or_default();
        let taint = taint_from_json(entry.get("taint").ok_or("missing taint")?, kind_parser)?;
        environment.join_at(&root, &path, &PathTree::leaf(taint));
    }
    Ok(environment)
}

// -- taints -----------------------------------------------------------------

fn taint_to_json<K: TaintKind>(taint: &Taint<K>) -> Vec<Value> {
    taint
        .iter()
        .map(|(kind, flow)| {
            json!({
                "kind": kind.to_string(),
                "traces": flow.trace.iter().map(trace_to_json).collect::<Vec<_>>(),
                "features": flow
                    .features
                    .iter()
                    .map(|(feature, always)| json!({"name": feature.to_string(), "always": always}))
                    .collect::<Vec<_>>(),
                "return_paths": flow
                    .complex
                    .iter()
                    .map(|feature| match feature {
                        ComplexFeature::ReturnAccessPath(path) =>
                            Value::Array(path.iter().map(label_to_json).collect()),
                    })
                    .collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn taint_from_json<K: TaintKind>(
    value: &Value,
    kind_parser: &dyn Fn(&str) -> Result<K, String>,
) -> Result<Taint<K>, String> {
    let mut taint = Taint::bottom();
    for entry in value.as_array().ok_or("taint must be an array")? {
        let kind_name = entry
            .get("kind")
            .and_then(Value::as_str)
            .ok_or("missing kind")?;
        let kind = kind_parser(kind_name)?;
        let mut flow = FlowDetails::default();
        for trace in entry
            .get("traces")
            .and_then(Value::as_array)
            .ok_or("missing traces")?
        {
            flow.trace.insert(trace_from_json(trace)?);
        }
        if let Some(features) = entry.get("features").and_then(Value::as_array) {
            for feature in features {
                let name = feature
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("missing feature name")?;
                let always = feature
                    .get("always")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let parsed = feature_from_name(name)?;
                if always {
                    flow.features.add_always(parsed);
                } else {
                    flow.features.add_may(parsed);
                }
            }
        }
        if let Some(paths) = entry.get("return_paths").and_then(Value::as_array) {
            for path in paths {
                let labels = path
                    .as_array()
                    .ok_or("return path must be an array")?
                    .iter()
                    .map(label_from_json)
                    .collect::<Result<AccessPath, String>>()?;
                flow.add_complex(ComplexFeature::ReturnAccessPath(labels));
            }
        }
        taint.add(kind, flow);
    }
    Ok(taint)
}

fn feature_from_name(name: &str) -> Result<crate::taint::SimpleFeature, String> {
    use crate::taint::SimpleFeature;
    if let Some(rest) = name.strip_prefix("via:") {
        return Ok(SimpleFeature::Via(CompactString::from(rest)));
    }
    if let Some(rest) = name.strip_prefix("via-value:") {
        let (feature, argument) = rest.split_once(':').ok_or("bad via-value feature")?;
        return Ok(SimpleFeature::ViaValue {
            feature: CompactString::from(feature),
            argument: CompactString::from(argument),
        });
    }
    if let Some(rest) = name.strip_prefix("leaf:") {
        return Ok(SimpleFeature::LeafName(CompactString::from(rest)));
    }
    if let Some(rest) = name.strip_prefix("transform:") {
        return Ok(SimpleFeature::Transform(CompactString::from(rest)));
    }
    if let Some(rest) = name.strip_prefix("tito:") {
        return Ok(SimpleFeature::TitoPosition(location_from_string(rest)?));
    }
    match name {
        "broadening" => Ok(SimpleFeature::Broadening),
        "obscure" => Ok(SimpleFeature::Obscure),
        "triggered" => Ok(SimpleFeature::Triggered),
        other => Err(format!("unknown feature `{other}`")),
    }
}

// -- traces -----------------------------------------------------------------

fn trace_to_json(trace: &TraceInfo) -> Value {
    match trace {
        TraceInfo::Declaration => json!({"kind": "declaration"}),
        TraceInfo::Origin(location) => json!({
            "kind": "origin",
            "location": location_to_json(*location),
        }),
        TraceInfo::CallSite {
            port,
            path,
            location,
            callees,
            length,
        } => json!({
            "kind": "call_site",
            "port": root_to_json(port),
            "path": path.iter().map(label_to_json).collect::<Vec<_>>(),
            "location": location_to_json(*location),
            "callees": callees.iter().map(target_to_json).collect::<Vec<_>>(),
            "length": length,
        }),
    }
}

fn trace_from_json(value: &Value) -> Result<TraceInfo, String> {
    match value.get("kind").and_then(Value::as_str) {
        Some("declaration") => Ok(TraceInfo::Declaration),
        Some("origin") => Ok(TraceInfo::Origin(location_from_json(
            value.get("location").ok_or("missing location")?,
        )?)),
        Some("call_site") => Ok(TraceInfo::CallSite {
            port: root_from_json(value.get("port").ok_or("missing port")?)?,
            path: value
                .get("path")
                .and_then(Value::as_array)
                .ok_or("missing path")?
                .iter()
                .map(label_from_json)
                .collect::<Result<AccessPath, String>>()?,
            location: location_from_json(value.get("location").ok_or("missing location")?)?,
            callees: value
                .get("callees")
                .and_then(Value::as_array)
                .ok_or("missing callees")?
                .iter()
                .map(target_from_json)
                .collect::<Result<Vec<Target>, String>>()?,
            length: value
                .get("length")
                .and_then(Value::as_u64)
                .ok_or("missing length")? as u32,
        }),
        _ => Err("unknown trace kind".to_owned()),
    }
}

// -- leaves -----------------------------------------------------------------

fn location_to_json(location: Location) -> Value {
    json!({"line": location.line, "start": location.start, "end": location.end})
}

fn location_from_json(value: &Value) -> Result<Location, String> {
    Ok(Location {
        line: value.get("line").and_then(Value::as_u64).ok_or("bad line")? as u32,
        start: value.get("start").and_then(Value::as_u64).ok_or("bad start")? as u32,
        end: value.get("end").and_then(Value::as_u64).ok_or("bad end")? as u32,
    })
}

fn location_from_string(text: &str) -> Result<Location, String> {
    // The `line:start-end` form produced by Display.
    let (line, columns) = text.split_once(':').ok_or("bad location")?;
    let (start, end) = columns.split_once('-').ok_or("bad location")?;
    Ok(Location {
        line: line.parse().map_err(|_| "bad location line")?,
        start: start.parse().map_err(|_| "bad location start")?,
        end: end.parse().map_err(|_| "bad location end")?,
    })
}

fn label_to_json(label: &PathLabel) -> Value {
    match label {
        PathLabel::Index(index) => json!({"index": index}),
        PathLabel::Field(name) => json!({"field": name.as_str()}),
        PathLabel::AnyIndex => json!("any"),
        PathLabel::DictKeys => json!("keys"),
    }
}

fn label_from_json(value: &Value) -> Result<PathLabel, String> {
    if let Some(text) = value.as_str() {
        return match text {
            "any" => Ok(PathLabel::AnyIndex),
            "keys" => Ok(PathLabel::DictKeys),
            _ => Err(format!("unknown label `{text}`")),
        };
    }
    if let Some(index) = value.get("index").and_then(Value::as_u64) {
        return Ok(PathLabel::Index(index as u32));
    }
    if let Some(field) = value.get("field").and_then(Value::as_str) {
        return Ok(PathLabel::Field(CompactString::from(field)));
    }
    Err("unknown label".to_owned())
}

fn root_to_json(root: &Root) -> Value {
    match root {
        Root::PositionalParameter { position, name } => {
            json!({"positional": {"position": position, "name": name.as_str()}})
        }
        Root::NamedParameter(name) => json!({"named": name.as_str()}),
        Root::StarParameter => json!("star"),
        Root::StarStarParameter => json!("star_star"),
        Root::LocalResult => json!("result"),
        Root::Variable(name) => json!({"variable": name.as_str()}),
        Root::Captured(name) => json!({"captured": name.as_str()}),
    }
}

fn root_from_json(value: &Value) -> Result<Root, String> {
    if let Some(text) = value.as_str() {
        return match text {
            "star" => Ok(Root::StarParameter),
            "star_star" => Ok(Root::StarStarParameter),
            "result" => Ok(Root::LocalResult),
            _ => Err(format!("unknown root `{text}`")),
        };
    }
    if let Some(positional) = value.get("positional") {
        return Ok(Root::PositionalParameter {
            position: positional
                .get("position")
                .and_then(Value::as_u64)
                .ok_or("bad position")? as u32,
            name: CompactString::from(
                positional
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or("bad parameter name")?,
            ),
        });
    }
    if let Some(name) = value.get("named").and_then(Value::as_str) {
        return Ok(Root::NamedParameter(CompactString::from(name)));
    }
    if let Some(name) = value.get("variable").and_then(Value::as_str) {
        return Ok(Root::Variable(CompactString::from(name)));
    }
    if let Some(name) = value.get("captured").and_then(Value::as_str) {
        return Ok(Root::Captured(CompactString::from(name)));
    }
    Err("unknown root".to_owned())
}

fn target_to_json(target: &Target) -> Value {
    match target {
        Target::Function(name) => json!({"function": name.as_str()}),
        Target::Method { class, name } => {
            json!({"method": {"class": class.as_str(), "name": name.as_str()}})
        }
        Target::Object(name) => json!({"object": name.as_str()}),
        Target::Override { class, name } => {
            json!({"override": {"class": class.as_str(), "name": name.as_str()}})
        }
    }
}

fn target_from_json(value: &Value) -> Result<Target, String> {
    if let Some(name) = value.get("function").and_then(Value::as_str) {
        return Ok(Target::function(name));
    }
    if let Some(method) = value.get("method") {
        return Ok(Target::method(
            method
                .get("class")
                .and_then(Value::as_str)
                .ok_or("bad method class")?,
            method
                .get("name")
                .and_then(Value::as_str)
                .ok_or("bad method name")?,
        ));
    }
    if let Some(name) = value.get("object").and_then(Value::as_str) {
        return Ok(Target::Object(CompactString::from(name)));
    }
    if let Some(override_) = value.get("override") {
        return Ok(Target::override_(
            override_
                .get("class")
                .and_then(Value::as_str)
                .ok_or("bad override class")?,
            override_
                .get("name")
                .and_then(Value::as_str)
                .ok_or("bad override name")?,
        ));
    }
    Err("unknown target".to_owned())
}
