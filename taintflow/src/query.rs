//! The control-plane query protocol.
//!
//! A supervising process drives the engine over a JSON request/response
//! channel. Requests resolve against the read-only resolver surface;
//! responses are `{"response": ...}` or `{"error": ...}`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::resolver::{AstResolver, Resolver};
use crate::target::Target;

/// A single protocol request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Request {
    /// Subtyping test between two class names.
    LessOrEqual {
        /// Candidate subtype.
        left: String,
        /// Candidate supertype.
        right: String,
    },
    /// Transitive superclasses of each given type.
    Superclasses {
        /// Qualified class names.
        types: Vec<String>,
    },
    /// Declared attributes of a class.
    Attributes {
        /// Qualified class name.
        class: String,
    },
    /// Path a module was loaded from.
    PathOfModule {
        /// Dotted module name.
        module: String,
    },
    /// Callables a module defines.
    Defines {
        /// Dotted module name.
        module: String,
    },
    /// Classes and callables known in the module at a path.
    Types {
        /// Source path.
        path: String,
    },
    /// The callable defined at a line of a file.
    TypeAtLocation {
        /// Source path.
        path: String,
        /// 1-indexed line.
        line: u32,
    },
    /// Several requests answered in order.
    Batch {
        /// The nested requests.
        requests: Vec<Request>,
    },
}

/// Handles one request against the resolver.
#[must_use]
pub fn handle(resolver: &AstResolver, request: &Request) -> Value {
    match dispatch(resolver, request) {
        Ok(response) => json!({ "response": response }),
        Err(error) => json!({ "error": error }),
    }
}

/// Parses and handles a raw request line.
#[must_use]
pub fn handle_text(resolver: &AstResolver, text: &str) -> Value {
    match serde_json::from_str::<Request>(text) {
        Ok(request) => handle(resolver, &request),
        Err(error) => json!({ "error": format!("malformed query: {error}") }),
    }
}

fn dispatch(resolver: &AstResolver, request: &Request) -> Result<Value, String> {
    match request {
        Request::LessOrEqual { left, right } => {
            Ok(json!(resolver.is_subclass(left, right)))
        }
        Request::Superclasses { types } => {
            let response: Vec<Value> = types
                .iter()
                .map(|class| {
                    json!({
                        "type": class,
                        "superclasses": resolver
                            .superclasses(class)
                            .iter()
                            .map(|name| name.as_str())
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            Ok(Value::Array(response))
        }
        Request::Attributes { class } => {
            if resolver.class_record(class).is_none() {
                return Err(format!("unknown class `{class}`"));
            }
            Ok(json!(resolver
                .attributes(class)
                .iter()
                .map(|name| name.as_str())
                .collect::<Vec<_>>()))
        }
        Request::PathOfModule { module } => resolver
            .path_of_module(module)
            .map(|path| json!(path.display().to_string()))
            .ok_or_else(|| format!("unknown module `{module}`")),
        Request::Defines { module } => Ok(json!(resolver
            .defines(module)
            .iter()
            .map(Target::canonical)
            .collect::<Vec<_>>())),
        Request::Types { path } => {
            let module = module_for_path(resolver, path)
                .ok_or_else(|| format!("no module at `{path}`"))?;
            let mut names: Vec<String> = resolver
                .defines(&module)
                .iter()
                .map(Target::canonical)
                .collect();
            names.extend(
                resolver
                    .all_classes()
                    .iter()
                    .filter(|record| record.qualified.starts_with(&format!("{module}.")))
                    .map(|record| record.qualified.to_string()),
            );
            names.sort();
            Ok(json!(names))
        }
        Request::TypeAtLocation { path, line } => {
            let module = module_for_path(resolver, path)
                .ok_or_else(|| format!("no module at `{path}`"))?;
            for target in resolver.defines(&module) {
                if let Some(record) = resolver.define_record(&target) {
                    if record.line == *line {
                        return Ok(json!(target.canonical()));
                    }
                }
            }
            Err(format!("no callable at `{path}:{line}`"))
        }
        Request::Batch { requests } => Ok(Value::Array(
            requests
                .iter()
                .map(|nested| handle(resolver, nested))
                .collect(),
        )),
    }
}

fn module_for_path(resolver: &AstResolver, path: &str) -> Option<String> {
    let needle = std::path::Path::new(path);
    resolver
        .all_defines()
        .iter()
        .map(|record| record.module.to_string())
        .find(|module| {
            resolver
                .path_of_module(module)
                .is_some_and(|candidate| candidate == needle)
        })
}
