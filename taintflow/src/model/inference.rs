//! Constructor-model inference for record-like classes.
//!
//! Dataclass-decorated classes and named-tuple subclasses get an
//! `__init__` model even without a user model: each positional field
//! parameter propagates into the matching attribute of the constructed
//! object, expressed as taint-in-taint-out with a return access path
//! naming the attribute.

use std::collections::BTreeMap;

use compact_str::CompactString;
use smallvec::smallvec;

use crate::access_path::{PathLabel, Root};
use crate::model::Model;
use crate::resolver::AstResolver;
use crate::taint::{FlowDetails, SinkKind};
use crate::target::Target;

/// Whether the class is a dataclass or named tuple by shape.
fn is_record_like(record: &crate::resolver::ClassRecord) -> bool {
    let dataclass = record
        .decorators
        .iter()
        .any(|decorator| decorator == "dataclass" || decorator == "dataclasses.dataclass");
    let named_tuple = record
        .bases
        .iter()
        .any(|base| base == "NamedTuple" || base == "typing.NamedTuple");
    dataclass || named_tuple
}

/// Infers `__init__` models for record-like classes that do not define
/// their own constructor. Existing user models take precedence through
/// the ordinary model join.
#[must_use]
pub fn infer_constructor_models(resolver: &AstResolver) -> BTreeMap<Target, Model> {
    let mut models = BTreeMap::new();

    for record in resolver.all_classes() {
        if !is_record_like(record) {
            continue;
        }
        if record.methods.iter().any(|method| method == "__init__") {
            continue;
        }
        if record.attributes.is_empty() {
            continue;
        }

        let mut model = Model::empty();
        for (index, attribute) in record.attributes.iter().enumerate() {
            // Field i binds to positional parameter i + 1; position 0 is
            // the receiver.
            let root = Root::PositionalParameter {
                position: (index + 1) as u32,
                name: attribute.clone(),
            };
            model.add_tito(
                root,
                &[],
                SinkKind::LocalReturn,
                smallvec![PathLabel::Field(CompactString::from(attribute.as_str()))],
                FlowDetails::declaration(),
            );
        }

        let target = Target::method(record.qualified.clone(), "__init__");
        tracing::debug!(class = %record.qualified, "inferred constructor model");
        models.insert(target, model);
    }

    models
}
