//! Taint kinds.
//!
//! Kinds are opaque names declared in the taint configuration, plus the
//! two internal sinks that encode taint-in-taint-out. They are totally
//! ordered so every traversal is deterministic.

use compact_str::CompactString;

/// Common surface of source and sink kinds.
pub trait TaintKind: Clone + Ord + Eq + std::fmt::Debug + std::fmt::Display {
    /// Whether this kind must never appear as a leaf in reported issues
    /// (true for the internal taint-in-taint-out sinks).
    fn ignore_leaf_at_call(&self) -> bool {
        false
    }
}

/// A source kind, e.g. `UserControlled`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKind(CompactString);

impl SourceKind {
    /// Builds a source kind from its configured name.
    #[must_use]
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self(name.into())
    }

    /// The configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TaintKind for SourceKind {}

/// A sink kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SinkKind {
    /// A configured sink, e.g. `RemoteCodeExecution`.
    Named(CompactString),
    /// One half of a combined-source rule.
    Partial {
        /// The configured partial sink name.
        kind: CompactString,
        /// Which half of the rule this is.
        label: CompactString,
    },
    /// Internal: taint-in-taint-out from a parameter to the return value.
    LocalReturn,
    /// Internal: taint-in-taint-out from a parameter to another parameter.
    ParameterUpdate(u32),
}

impl SinkKind {
    /// Builds a named sink kind.
    #[must_use]
    pub fn named(name: impl Into<CompactString>) -> Self {
        SinkKind::Named(name.into())
    }

    /// Builds a partial sink kind.
    #[must_use]
    pub fn partial(kind: impl Into<CompactString>, label: impl Into<CompactString>) -> Self {
        SinkKind::Partial {
            kind: kind.into(),
            label: label.into(),
        }
    }

    /// Whether this kind encodes taint-in-taint-out rather than a real sink.
    #[must_use]
    pub fn is_tito(&self) -> bool {
        matches!(self, SinkKind::LocalReturn | SinkKind::ParameterUpdate(_))
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkKind::Named(name) => write!(f, "{name}"),
            SinkKind::Partial { kind, label } => write!(f, "Partial[{kind}[{label}]]"),
            SinkKind::LocalReturn => write!(f, "LocalReturn"),
            SinkKind::ParameterUpdate(i) => write!(f, "ParameterUpdate({i})"),
        }
    }
}

impl TaintKind for SinkKind {
    fn ignore_leaf_at_call(&self) -> bool {
        self.is_tito()
    }
}
