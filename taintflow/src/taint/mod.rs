//! Taint Domains
//!
//! The concrete lattices the analyses compute over: kind-indexed taint
//! maps with trace provenance and features, access-path trees of taint,
//! and per-callable taint environments.

/// Taint map operations (`singleton`, `apply_call`, `essential`).
pub mod domain;
/// Simple and complex features (breadcrumbs).
pub mod features;
/// Flow details: the product attached to each taint leaf.
pub mod flow;
/// Source and sink kinds.
pub mod kinds;
/// Trace provenance (declaration, origin, call sites).
pub mod trace;
/// Taint trees and environments.
pub mod tree;

pub use domain::{PartRef, Taint, TaintPart};
pub use features::{ComplexFeature, FeatureSet, SimpleFeature};
pub use flow::FlowDetails;
pub use kinds::{SinkKind, SourceKind, TaintKind};
pub use trace::TraceInfo;
pub use tree::{
    apply_call_to_tree, filter_by_leaf, BackwardTaint, BackwardTaintTree, ForwardTaint,
    ForwardTaintTree, TaintEnvironment,
};
