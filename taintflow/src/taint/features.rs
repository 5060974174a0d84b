//! Features (breadcrumbs): metadata attached to taint.
//!
//! Simple features live in an over-under set; complex features are an
//! unrestricted set of structured values.

use compact_str::CompactString;

use crate::access_path::{path_to_string, AccessPath};
use crate::domains::OverUnderSet;
use crate::utils::Location;

/// A simple feature, tracked with may/always precision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SimpleFeature {
    /// User-declared breadcrumb from a `Via[...]` annotation.
    Via(CompactString),
    /// Breadcrumb whose payload is the runtime value of an argument.
    ViaValue {
        /// The declared feature name.
        feature: CompactString,
        /// The parameter whose value is captured.
        argument: CompactString,
    },
    /// The taint passed through a widening collapse and lost precision.
    Broadening,
    /// The taint passed through a callable with no body or model.
    Obscure,
    /// Transient marker recording where taint-in-taint-out was applied.
    /// Stripped the next time the taint crosses a call site.
    TitoPosition(Location),
    /// The partial sink was triggered by the other half of a combined
    /// rule rather than declared on the callable itself.
    Triggered,
    /// The name of the leaf callable the taint was first reified at.
    LeafName(CompactString),
    /// The taint passed through the named transform.
    Transform(CompactString),
}

impl std::fmt::Display for SimpleFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimpleFeature::Via(name) => write!(f, "via:{name}"),
            SimpleFeature::ViaValue { feature, argument } => {
                write!(f, "via-value:{feature}:{argument}")
            }
            SimpleFeature::Broadening => write!(f, "broadening"),
            SimpleFeature::Obscure => write!(f, "obscure"),
            SimpleFeature::TitoPosition(location) => write!(f, "tito:{location}"),
            SimpleFeature::Triggered => write!(f, "triggered"),
            SimpleFeature::LeafName(name) => write!(f, "leaf:{name}"),
            SimpleFeature::Transform(name) => write!(f, "transform:{name}"),
        }
    }
}

/// The over-under set of simple features.
pub type FeatureSet = OverUnderSet<SimpleFeature>;

/// A complex feature: structured metadata with no over-under tracking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComplexFeature {
    /// The subpath of the return value that taint-in-taint-out writes to.
    ReturnAccessPath(AccessPath),
}

impl std::fmt::Display for ComplexFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexFeature::ReturnAccessPath(path) => {
                write!(f, "return-path:{}", path_to_string(path))
            }
        }
    }
}
