//! Semantic verification of parsed models.
//!
//! A model's parameter list must agree with the real signature of the
//! callable it annotates: anonymous positional parameters by count and
//! position, named parameters by presence, star parameters by coverage.
//! Extra optional parameters on the real signature are tolerated.

use crate::access_path::{NormalizedParameter, Root};
use crate::resolver::AstResolver;
use crate::target::Target;

/// The result of matching a model against a real signature.
#[derive(Debug, Clone)]
pub struct ResolvedSignature {
    /// The callable the model annotates.
    pub target: Target,
    /// For each model parameter (by index into the declared list), the
    /// real root it binds to.
    pub bindings: Vec<(usize, Root)>,
}

/// Resolves a model's dotted name to a target and verifies its parameter
/// list against the real signature.
pub fn resolve_and_verify(
    name: &str,
    declared: &[NormalizedParameter<'_>],
    resolver: &AstResolver,
) -> Result<ResolvedSignature, String> {
    let target = resolve_target(name, resolver)
        .ok_or_else(|| format!("`{name}` is not part of the analyzed sources"))?;
    let record = resolver
        .define_record(&target)
        .ok_or_else(|| format!("`{name}` has no known signature"))?;

    let real = &record.parameters;
    let real_positional: Vec<_> = real
        .iter()
        .filter(|formal| matches!(formal.root, Root::PositionalParameter { .. }))
        .collect();
    let declared_positional: Vec<(usize, &NormalizedParameter<'_>)> = declared
        .iter()
        .enumerate()
        .filter(|(_, param)| matches!(param.root, Root::PositionalParameter { .. }))
        .collect();

    // Heuristic: a model shorter by exactly one whose counterpart starts
    // with `self`/`cls` is assumed to have elided the receiver. This can
    // mis-accept an off-by-one model on a plain function; surface it.
    let offset = if declared_positional.len() + 1 == real_positional.len()
        && real_positional
            .first()
            .is_some_and(|formal| formal.name == "self" || formal.name == "cls")
    {
        tracing::warn!(
            callable = %target,
            "model omits `{}`; assuming an elided receiver",
            real_positional[0].name
        );
        1
    } else {
        0
    };

    if declared_positional.len() + offset > real_positional.len() {
        return Err(format!(
            "model for `{name}` declares {} positional parameters, signature has {}",
            declared_positional.len(),
            real_positional.len()
        ));
    }

    let mut bindings = Vec::new();

    for (slot, (index, param)) in declared_positional.iter().enumerate() {
        let counterpart = real_positional[slot + offset];
        // Names must agree unless the model marks the parameter anonymous
        // with a double underscore.
        if !param.name.starts_with("__") && param.name != counterpart.name {
            return Err(format!(
                "model for `{name}`: parameter `{}` does not match signature parameter `{}`",
                param.name, counterpart.name
            ));
        }
        bindings.push((*index, counterpart.root.clone()));
    }

    for (index, param) in declared.iter().enumerate() {
        match &param.root {
            Root::NamedParameter(model_name) => {
                let counterpart = real.iter().find(|formal| {
                    formal.name == *model_name
                        && matches!(
                            formal.root,
                            Root::PositionalParameter { .. } | Root::NamedParameter(_)
                        )
                });
                match counterpart {
                    Some(formal) => bindings.push((index, formal.root.clone())),
                    None => {
                        return Err(format!(
                            "model for `{name}` names `{model_name}`, which the signature lacks"
                        ))
                    }
                }
            }
            Root::StarParameter => {
                if !real.iter().any(|formal| formal.root == Root::StarParameter) {
                    return Err(format!("model for `{name}` declares `*args`, signature has none"));
                }
                bindings.push((index, Root::StarParameter));
            }
            Root::StarStarParameter => {
                if !real
                    .iter()
                    .any(|formal| formal.root == Root::StarStarParameter)
                {
                    return Err(format!(
                        "model for `{name}` declares `**kwargs`, signature has none"
                    ));
                }
                bindings.push((index, Root::StarStarParameter));
            }
            _ => {}
        }
    }

    Ok(ResolvedSignature { target, bindings })
}

/// Resolves a dotted model name: a plain function first, then a method on
/// the longest class prefix.
fn resolve_target(name: &str, resolver: &AstResolver) -> Option<Target> {
    let function = Target::function(name);
    if resolver.define_record(&function).is_some() {
        return Some(function);
    }
    let (class, method) = name.rsplit_once('.')?;
    if resolver.class_record(class).is_some() {
        let target = Target::method(class, method);
        if resolver.define_record(&target).is_some() {
            return Some(target);
        }
    }
    None
}
