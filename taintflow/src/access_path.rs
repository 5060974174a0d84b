//! Access paths: symbolic paths into runtime values.
//!
//! A [`Root`] names where a value originates (a parameter, the return
//! value, a local). A path is a sequence of [`PathLabel`]s descending into
//! subfields. Together they address the tips of taint trees.

use compact_str::CompactString;
use ruff_python_ast as ast;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Where a tracked value lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Root {
    /// A positional parameter (position includes positional-only ones).
    PositionalParameter {
        /// 0-indexed position in the signature.
        position: u32,
        /// Declared name.
        name: CompactString,
    },
    /// A keyword-only parameter.
    NamedParameter(CompactString),
    /// The `*args` catch-all.
    StarParameter,
    /// The `**kwargs` catch-all.
    StarStarParameter,
    /// The callable's return value.
    LocalResult,
    /// A local variable inside the analyzed body.
    Variable(CompactString),
    /// A variable captured from an enclosing scope.
    Captured(CompactString),
}

impl Root {
    /// Whether this root is a formal parameter of any flavor.
    #[must_use]
    pub fn is_parameter(&self) -> bool {
        matches!(
            self,
            Root::PositionalParameter { .. }
                | Root::NamedParameter(_)
                | Root::StarParameter
                | Root::StarStarParameter
        )
    }

    /// The declared parameter name, if this root is a named formal.
    #[must_use]
    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Root::PositionalParameter { name, .. } => Some(name),
            Root::NamedParameter(name) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Root::PositionalParameter { name, .. } => write!(f, "formal({name})"),
            Root::NamedParameter(name) => write!(f, "formal({name})"),
            Root::StarParameter => write!(f, "formal(*args)"),
            Root::StarStarParameter => write!(f, "formal(**kwargs)"),
            Root::LocalResult => write!(f, "result"),
            Root::Variable(name) => write!(f, "local({name})"),
            Root::Captured(name) => write!(f, "captured({name})"),
        }
    }
}

/// One step of an access path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathLabel {
    /// A concrete positional index, e.g. `x[3]`.
    Index(u32),
    /// A named field or string key, e.g. `x.name` or `x["name"]`.
    Field(CompactString),
    /// Any index: the summary of all positions, e.g. every list element.
    AnyIndex,
    /// The keys of a dictionary (as opposed to its values).
    DictKeys,
}

impl PathLabel {
    /// Whether a read of `self` may observe data stored under `stored`.
    ///
    /// `AnyIndex` is a wildcard on both sides; concrete labels match
    /// themselves only.
    #[must_use]
    pub fn matches(&self, stored: &PathLabel) -> bool {
        self == stored || *self == PathLabel::AnyIndex || *stored == PathLabel::AnyIndex
    }
}

impl std::fmt::Display for PathLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathLabel::Index(i) => write!(f, "[{i}]"),
            PathLabel::Field(name) => write!(f, "[{name}]"),
            PathLabel::AnyIndex => write!(f, "[*]"),
            PathLabel::DictKeys => write!(f, "[**keys]"),
        }
    }
}

/// An ordered sequence of labels. Short in practice; stack-allocated.
pub type AccessPath = SmallVec<[PathLabel; 4]>;

/// Renders a path in the `[a][b]` form used by ports and reports.
#[must_use]
pub fn path_to_string(path: &[PathLabel]) -> String {
    path.iter().map(ToString::to_string).collect()
}

/// A formal parameter as seen by call-site matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formal {
    /// The root this formal binds.
    pub root: Root,
    /// Declared name (empty for star roots).
    pub name: CompactString,
}

/// A normalized view of one declared parameter.
#[derive(Debug, Clone)]
pub struct NormalizedParameter<'a> {
    /// The root assigned to this parameter.
    pub root: Root,
    /// Declared name, without star prefixes.
    pub name: CompactString,
    /// The annotation expression, when present.
    pub annotation: Option<&'a ast::Expr>,
    /// Whether the parameter has a default value.
    pub has_default: bool,
}

/// Assigns roots to a parameter list: positions for positional parameters,
/// named roots for keyword-only ones, star roots for the catch-alls.
#[must_use]
pub fn normalize_parameters(parameters: &ast::Parameters) -> Vec<NormalizedParameter<'_>> {
    let mut normalized = Vec::new();
    let mut position: u32 = 0;

    for param in parameters.posonlyargs.iter().chain(&parameters.args) {
        let name = CompactString::from(param.parameter.name.as_str());
        normalized.push(NormalizedParameter {
            root: Root::PositionalParameter {
                position,
                name: name.clone(),
            },
            name,
            annotation: param.parameter.annotation.as_deref(),
            has_default: param.default.is_some(),
        });
        position += 1;
    }

    if let Some(vararg) = &parameters.vararg {
        normalized.push(NormalizedParameter {
            root: Root::StarParameter,
            name: CompactString::from(vararg.name.as_str()),
            annotation: vararg.annotation.as_deref(),
            has_default: false,
        });
    }

    for param in &parameters.kwonlyargs {
        let name = CompactString::from(param.parameter.name.as_str());
        normalized.push(NormalizedParameter {
            root: Root::NamedParameter(name.clone()),
            name,
            annotation: param.parameter.annotation.as_deref(),
            has_default: param.default.is_some(),
        });
    }

    if let Some(kwarg) = &parameters.kwarg {
        normalized.push(NormalizedParameter {
            root: Root::StarStarParameter,
            name: CompactString::from(kwarg.name.as_str()),
            annotation: kwarg.annotation.as_deref(),
            has_default: false,
        });
    }

    normalized
}

/// How one call-site argument binds to one formal root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentMatch {
    /// The formal root the argument feeds.
    pub root: Root,
    /// The path to read on the actual to obtain the bound value.
    ///
    /// Empty for ordinary arguments; `[i]` when a starred actual unfolds
    /// into the i-th remaining positional formal, `[name]` when a
    /// double-starred actual feeds a named formal.
    pub actual_path: AccessPath,
}

/// One call-site argument with the formals it binds to, in source order.
#[derive(Debug, Clone)]
pub struct MatchedArgument<'a> {
    /// The argument expression (the inner expression for starred args).
    pub value: &'a ast::Expr,
    /// Keyword name, when the argument was passed by keyword.
    pub keyword: Option<CompactString>,
    /// The formals this argument feeds. Empty when nothing matches.
    pub matches: Vec<ArgumentMatch>,
}

/// Matches the actual arguments of a call against a callee's formals.
///
/// Positional actuals align with positional formals; keywords match by
/// name (falling back to `**kwargs`); a starred actual unfolds into every
/// positional formal not yet consumed; a double-starred actual feeds every
/// named formal still open. Argument order is preserved.
#[must_use]
pub fn match_actuals_to_formals<'a>(
    arguments: &'a ast::Arguments,
    formals: &[Formal],
) -> Vec<MatchedArgument<'a>> {
    let positional: Vec<&Formal> = formals
        .iter()
        .filter(|formal| matches!(formal.root, Root::PositionalParameter { .. }))
        .collect();
    let star = formals.iter().find(|f| f.root == Root::StarParameter);
    let star_star = formals.iter().find(|f| f.root == Root::StarStarParameter);

    let mut matched = Vec::new();
    let mut next_position: usize = 0;

    for arg in &arguments.args {
        if let ast::Expr::Starred(starred) = arg {
            // A `*xs` actual covers every remaining positional formal; each
            // binding reads one element of the unpacked iterable.
            let mut matches = Vec::new();
            for formal in positional.iter().skip(next_position) {
                matches.push(ArgumentMatch {
                    root: formal.root.clone(),
                    actual_path: smallvec::smallvec![PathLabel::AnyIndex],
                });
            }
            if let Some(star) = star {
                matches.push(ArgumentMatch {
                    root: star.root.clone(),
                    actual_path: AccessPath::new(),
                });
            }
            next_position = positional.len();
            matched.push(MatchedArgument {
                value: &starred.value,
                keyword: None,
                matches,
            });
            continue;
        }

        let mut matches = Vec::new();
        if let Some(formal) = positional.get(next_position) {
            matches.push(ArgumentMatch {
                root: formal.root.clone(),
                actual_path: AccessPath::new(),
            });
        } else if let Some(star) = star {
            let overflow = (next_position - positional.len()) as u32;
            matches.push(ArgumentMatch {
                root: star.root.clone(),
                actual_path: smallvec::smallvec![PathLabel::Index(overflow)],
            });
        }
        next_position += 1;
        matched.push(MatchedArgument {
            value: arg,
            keyword: None,
            matches,
        });
    }

    for keyword in &arguments.keywords {
        let Some(name) = &keyword.arg else {
            // A `**kwargs` actual feeds every named formal; each binding
            // reads the matching key out of the mapping.
            let mut matches = Vec::new();
            for formal in formals {
                match &formal.root {
                    Root::PositionalParameter { .. } | Root::NamedParameter(_) => {
                        matches.push(ArgumentMatch {
                            root: formal.root.clone(),
                            actual_path: smallvec::smallvec![PathLabel::Field(formal.name.clone())],
                        });
                    }
                    _ => {}
                }
            }
            if let Some(star_star) = star_star {
                matches.push(ArgumentMatch {
                    root: star_star.root.clone(),
                    actual_path: AccessPath::new(),
                });
            }
            matched.push(MatchedArgument {
                value: &keyword.value,
                keyword: None,
                matches,
            });
            continue;
        };

        let name = CompactString::from(name.as_str());
        let by_name = formals.iter().find(|formal| {
            formal.name == name
                && matches!(
                    formal.root,
                    Root::PositionalParameter { .. } | Root::NamedParameter(_)
                )
        });
        let mut matches = Vec::new();
        if let Some(formal) = by_name {
            matches.push(ArgumentMatch {
                root: formal.root.clone(),
                actual_path: AccessPath::new(),
            });
        } else if let Some(star_star) = star_star {
            matches.push(ArgumentMatch {
                root: star_star.root.clone(),
                actual_path: smallvec::smallvec![PathLabel::Field(name.clone())],
            });
        }
        matched.push(MatchedArgument {
            value: &keyword.value,
            keyword: Some(name),
            matches,
        });
    }

    matched
}
