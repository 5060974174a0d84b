//! Result serialization: issue JSON and model JSON.

/// JSON rendering and parsing.
pub mod json;

pub use json::{
    issue_to_json, issues_to_json, model_from_json, model_to_json, write_issues, write_models,
};
