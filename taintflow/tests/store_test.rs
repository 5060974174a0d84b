//! Shared Model Table Tests

use taintflow::errors::StoreError;
use taintflow::model::Model;
use taintflow::store::SharedModelTable;
use taintflow::taint::{FlowDetails, SourceKind};
use taintflow::target::Target;

fn non_empty_model() -> Model {
    let mut model = Model::empty();
    model.add_source(
        taintflow::access_path::Root::LocalResult,
        &[],
        SourceKind::new("Test"),
        FlowDetails::declaration(),
    );
    model
}

#[test]
fn put_then_get_returns_snapshot() {
    let table = SharedModelTable::with_capacity(16);
    let target = Target::function("m.f");
    table.put(target.clone(), non_empty_model()).expect("put");
    let snapshot = table.get(&target).expect("present");
    assert!(!snapshot.is_empty());
    assert!(table.get(&Target::function("m.g")).is_none());
}

#[test]
fn capacity_exhaustion_is_fatal() {
    let table = SharedModelTable::with_capacity(2);
    table
        .put(Target::function("m.a"), Model::empty())
        .expect("first");
    table
        .put(Target::function("m.b"), Model::empty())
        .expect("second");
    let result = table.put(Target::function("m.c"), Model::empty());
    assert!(matches!(result, Err(StoreError::TableFull { capacity: 2 })));

    // Overwriting an existing key is still allowed at capacity.
    table
        .put(Target::function("m.a"), non_empty_model())
        .expect("overwrite");
}

#[test]
fn compare_and_swap_requires_expected_value() {
    let table = SharedModelTable::with_capacity(16);
    let target = Target::function("m.f");

    // Vacant + expected none: swap happens.
    assert!(table
        .compare_and_swap(&target, None, non_empty_model())
        .expect("cas"));
    // Wrong expectation: no swap.
    assert!(!table
        .compare_and_swap(&target, Some(&Model::empty()), Model::empty())
        .expect("cas"));
    // Matching expectation: swap happens.
    let current = table.get(&target).expect("present");
    assert!(table
        .compare_and_swap(&target, Some(&current), Model::empty())
        .expect("cas"));
    assert!(table.get(&target).expect("present").is_empty());
}

#[test]
fn snapshot_is_sorted_by_target() {
    let table = SharedModelTable::with_capacity(16);
    table.put(Target::function("m.z"), Model::empty()).expect("put");
    table.put(Target::function("m.a"), Model::empty()).expect("put");
    let snapshot = table.snapshot();
    let names: Vec<String> = snapshot.iter().map(|(t, _)| t.canonical()).collect();
    assert_eq!(names, vec!["m.a".to_owned(), "m.z".to_owned()]);
}
