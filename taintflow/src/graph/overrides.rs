//! The override graph.
//!
//! Maps each method to its concrete overriders so that dynamically
//! dispatched calls can join over them. Methods whose override fan-out
//! exceeds the configured bound collapse into an obscure placeholder;
//! the elision is recorded as a diagnostic.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::resolver::{AstResolver, Resolver};
use crate::target::Target;

/// One recorded elision of an oversized override set.
#[derive(Debug, Clone)]
pub struct ElidedOverride {
    /// The override join point that was collapsed.
    pub target: Target,
    /// How many overriders it had.
    pub count: usize,
}

/// Method override recording, built once before the fixpoint and
/// read-only thereafter.
#[derive(Debug, Default)]
pub struct OverrideGraph {
    /// Override target -> base method plus every concrete overrider.
    members: BTreeMap<Target, Vec<Target>>,
    /// Override targets whose fan-out exceeded the bound.
    collapsed: FxHashSet<Target>,
    /// Diagnostics for collapsed sets.
    pub elided: Vec<ElidedOverride>,
}

impl OverrideGraph {
    /// Builds the override graph over every class method, collapsing
    /// sets larger than `maximum_overrides_to_analyze` and skipping the
    /// user-listed methods entirely.
    #[must_use]
    pub fn build(
        resolver: &AstResolver,
        maximum_overrides_to_analyze: usize,
        skip_overrides: &[String],
    ) -> Self {
        let mut graph = Self::default();
        let skipped: FxHashSet<&str> = skip_overrides.iter().map(String::as_str).collect();

        for class in resolver.all_classes() {
            for method in &class.methods {
                let qualified = format!("{}.{}", class.qualified, method);
                if skipped.contains(qualified.as_str()) {
                    tracing::debug!(method = %qualified, "overrides skipped by configuration");
                    continue;
                }
                let overrides = resolver.overrides(&class.qualified, method);
                if overrides.is_empty() {
                    continue;
                }
                let target = Target::override_(class.qualified.clone(), method.clone());
                if overrides.len() > maximum_overrides_to_analyze {
                    tracing::info!(
                        method = %qualified,
                        count = overrides.len(),
                        "override set too large; treating as obscure"
                    );
                    graph.elided.push(ElidedOverride {
                        target: target.clone(),
                        count: overrides.len(),
                    });
                    graph.collapsed.insert(target.clone());
                    graph.members.insert(target, Vec::new());
                    continue;
                }
                let mut members = vec![Target::method(class.qualified.clone(), method.clone())];
                members.extend(overrides);
                graph.members.insert(target, members);
            }
        }
        graph
    }

    /// The members an override target joins over: the base method and
    /// every analyzed overrider. Empty for collapsed targets.
    #[must_use]
    pub fn members(&self, target: &Target) -> &[Target] {
        self.members
            .get(target)
            .map_or(&[], std::vec::Vec::as_slice)
    }

    /// Whether the override target was collapsed for size.
    #[must_use]
    pub fn is_collapsed(&self, target: &Target) -> bool {
        self.collapsed.contains(target)
    }

    /// Every override target, in canonical order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.members.keys()
    }
}
