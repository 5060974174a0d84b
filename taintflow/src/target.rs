//! Callable targets: the keys of the shared model table.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// A reference to something a call site can dispatch to.
///
/// Targets are totally ordered so that callee sets, model tables and issue
/// output traverse deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Target {
    /// A plain function, by qualified name (`module.func`).
    Function(CompactString),
    /// A method on a concrete class.
    Method {
        /// Qualified class name (`module.Class`).
        class: CompactString,
        /// Unqualified method name.
        name: CompactString,
    },
    /// A module-level attribute or other non-callable object carrying taint.
    Object(CompactString),
    /// The abstract join of a method and all of its overriders.
    Override {
        /// Qualified class name of the base method.
        class: CompactString,
        /// Unqualified method name.
        name: CompactString,
    },
}

impl Target {
    /// Builds a function target from a qualified name.
    #[must_use]
    pub fn function(name: impl Into<CompactString>) -> Self {
        Target::Function(name.into())
    }

    /// Builds a method target.
    #[must_use]
    pub fn method(class: impl Into<CompactString>, name: impl Into<CompactString>) -> Self {
        Target::Method {
            class: class.into(),
            name: name.into(),
        }
    }

    /// Builds an override target.
    #[must_use]
    pub fn override_(class: impl Into<CompactString>, name: impl Into<CompactString>) -> Self {
        Target::Override {
            class: class.into(),
            name: name.into(),
        }
    }

    /// The canonical string form used as shared-table key and in reports.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Target::Function(name) | Target::Object(name) => name.to_string(),
            Target::Method { class, name } => format!("{class}.{name}"),
            Target::Override { class, name } => format!("Overrides{{{class}.{name}}}"),
        }
    }

    /// The concrete method a virtual override target stands for, if any.
    #[must_use]
    pub fn corresponding_method(&self) -> Option<Target> {
        match self {
            Target::Override { class, name } => Some(Target::Method {
                class: class.clone(),
                name: name.clone(),
            }),
            _ => None,
        }
    }

    /// Whether this target is a virtual override join point.
    #[must_use]
    pub fn is_override(&self) -> bool {
        matches!(self, Target::Override { .. })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
