//! Lattice Law Tests
//!
//! Universal invariants of the domain kernel and the taint domains.

use compact_str::CompactString;
use smallvec::smallvec;

use taintflow::access_path::{AccessPath, PathLabel, Root};
use taintflow::domains::{AbstractDomain, OverUnderSet, PathTree};
use taintflow::taint::{
    filter_by_leaf, FlowDetails, ForwardTaint, PartRef, SimpleFeature, SourceKind, Taint,
    TaintPart, TraceInfo,
};
use taintflow::target::Target;
use taintflow::utils::Location;

fn kind(name: &str) -> SourceKind {
    SourceKind::new(name)
}

fn leaf(name: &str) -> PathTree<ForwardTaint> {
    PathTree::leaf(Taint::singleton(kind(name)))
}

fn field(name: &str) -> PathLabel {
    PathLabel::Field(CompactString::from(name))
}

fn location(line: u32) -> Location {
    Location {
        line,
        start: 0,
        end: 4,
    }
}

// ============================================================================
// Over-under sets
// ============================================================================

#[test]
fn over_under_join_demotes_one_sided_always() {
    let mut left: OverUnderSet<&str> = OverUnderSet::new();
    left.add_always("a");
    let mut right = OverUnderSet::new();
    right.add_may("b");

    left.join(&right);
    assert!(left.contains(&"a"));
    assert!(!left.is_always(&"a"), "absent on one side means may-only");
    assert!(left.contains(&"b"));
}

#[test]
fn over_under_join_keeps_shared_always() {
    let mut left: OverUnderSet<&str> = OverUnderSet::new();
    left.add_always("a");
    let mut right = OverUnderSet::new();
    right.add_always("a");

    left.join(&right);
    assert!(left.is_always(&"a"));
}

#[test]
fn over_under_order_laws() {
    let mut a: OverUnderSet<&str> = OverUnderSet::new();
    a.add_always("x");
    let mut b = a.clone();
    b.add_may("y");

    let mut joined = a.clone();
    joined.join(&b);
    assert!(a.less_or_equal(&joined));
    assert!(b.less_or_equal(&joined));
    assert!(OverUnderSet::<&str>::bottom().less_or_equal(&a));
}

// ============================================================================
// Path trees
// ============================================================================

#[test]
fn read_empty_path_is_collapse() {
    let mut tree = leaf("A");
    tree.join_at(&[field("f")], &leaf("B"));

    let read = tree.read(&[]);
    let collapsed = tree.collapse();
    assert_eq!(read, collapsed);
    assert!(read.contains(&kind("A")));
    assert!(read.contains(&kind("B")));
}

#[test]
fn read_longer_path_is_smaller() {
    let mut tree = PathTree::bottom();
    tree.join_at(&[field("f")], &leaf("A"));
    tree.join_at(&[field("f"), field("g")], &leaf("B"));

    let at_prefix = tree.read(&[field("f")]);
    let at_full = tree.read(&[field("f"), field("g")]);
    assert!(at_full.less_or_equal(&at_prefix));
}

#[test]
fn ancestors_cover_deeper_reads() {
    // Taint on the whole value applies to each of its fields.
    let tree = leaf("A");
    let read = tree.read(&[field("anything")]);
    assert!(read.contains(&kind("A")));
}

#[test]
fn assign_then_read_recovers_subtree() {
    let mut tree: PathTree<ForwardTaint> = PathTree::bottom();
    let subtree = leaf("A");
    tree.assign(&[field("f"), field("g")], subtree.clone());

    let read = tree.read_tree(&[field("f"), field("g")]);
    assert!(subtree.less_or_equal(&read));
}

#[test]
fn bottom_join_stays_bottom() {
    let mut a: PathTree<ForwardTaint> = PathTree::bottom();
    let b = PathTree::bottom();
    a.join(&b);
    assert!(a.is_bottom());
}

#[test]
fn join_is_upper_bound() {
    let mut a = leaf("A");
    a.join_at(&[field("f")], &leaf("B"));
    let mut b = PathTree::bottom();
    b.join_at(&[PathLabel::Index(0)], &leaf("C"));

    let mut joined = a.clone();
    joined.join(&b);
    assert!(a.less_or_equal(&joined));
    assert!(b.less_or_equal(&joined));
}

#[test]
fn wildcard_read_covers_concrete_indices() {
    let mut tree: PathTree<ForwardTaint> = PathTree::bottom();
    tree.join_at(&[PathLabel::AnyIndex], &leaf("A"));

    let read = tree.read(&[PathLabel::Index(3)]);
    assert!(read.contains(&kind("A")));
}

#[test]
fn collapse_to_depth_joins_deep_tips() {
    let mut tree: PathTree<ForwardTaint> = PathTree::bottom();
    tree.join_at(&[field("a"), field("b"), field("c")], &leaf("Deep"));
    tree.join_at(&[field("a")], &leaf("Shallow"));
    assert_eq!(tree.depth(), 3);

    tree.collapse_to_depth(2, &|taint| {
        taint.add_feature(&SimpleFeature::Broadening);
    });
    assert_eq!(tree.depth(), 2);

    // The deep tip folded into the depth-2 node, marked as broadened.
    let at_boundary = tree.read(&[field("a"), field("b")]);
    let deep = at_boundary.get(&kind("Deep")).expect("deep taint folded up");
    assert!(deep.features.contains(&SimpleFeature::Broadening));
    // The shallow tip is untouched.
    let shallow = tree.read(&[field("a")]);
    assert!(!shallow
        .get(&kind("Shallow"))
        .expect("shallow tip kept")
        .features
        .contains(&SimpleFeature::Broadening));
}

#[test]
fn collapsed_tree_is_upper_bound_of_original() {
    let mut tree: PathTree<ForwardTaint> = PathTree::bottom();
    tree.join_at(&[field("a"), field("b"), field("c")], &leaf("A"));
    let mut widened = tree.clone();
    widened.collapse_to_depth(1, &|_| {});
    assert!(tree.less_or_equal(&widened));
}

#[test]
fn partition_tips_reassembles_by_key() {
    let mut tree: PathTree<ForwardTaint> = PathTree::bottom();
    tree.join_at(&[field("f")], &leaf("A"));
    tree.join_at(&[field("g")], &leaf("B"));

    let partitions = tree.partition_tips(&|tip| {
        tip.iter()
            .map(|(kind, flow)| {
                (
                    kind.name().to_owned(),
                    Taint::singleton_with(kind.clone(), flow.clone()),
                )
            })
            .collect()
    });
    assert_eq!(partitions.len(), 2);
    assert!(partitions["A"].read(&[field("f")]).contains(&kind("A")));
    assert!(!partitions["A"].read(&[field("g")]).contains(&kind("B")));
}

// ============================================================================
// Taint maps
// ============================================================================

#[test]
fn singleton_order_iff_contains() {
    let single = ForwardTaint::singleton(kind("A"));
    let mut with = ForwardTaint::singleton(kind("A"));
    with.add(kind("B"), FlowDetails::declaration());
    let without = ForwardTaint::singleton(kind("B"));

    assert!(single.less_or_equal(&with));
    assert!(!single.less_or_equal(&without));
    assert!(with.contains(&kind("A")));
    assert!(!without.contains(&kind("A")));
}

#[test]
fn apply_call_advances_trace_lengths() {
    let callees = vec![Target::function("m.f")];
    let port = Root::PositionalParameter {
        position: 0,
        name: CompactString::from("x"),
    };
    let path: AccessPath = smallvec![];

    let declared = ForwardTaint::singleton(kind("A"));
    let once = declared.apply_call(location(1), &callees, &port, &path, 100);
    let flow = once.get(&kind("A")).expect("kind preserved");
    assert!(flow.trace.contains(&TraceInfo::Origin(location(1))));

    let twice = once.apply_call(location(2), &callees, &port, &path, 100);
    assert_eq!(twice.get(&kind("A")).expect("kind preserved").min_trace_length(), 1);

    let thrice = twice.apply_call(location(3), &callees, &port, &path, 100);
    assert_eq!(thrice.get(&kind("A")).expect("kind preserved").min_trace_length(), 2);
}

#[test]
fn apply_call_caps_trace_length() {
    let callees = vec![Target::function("m.f")];
    let port = Root::LocalResult;
    let path: AccessPath = smallvec![];

    let mut taint = ForwardTaint::singleton(kind("A"));
    for line in 1..10 {
        taint = taint.apply_call(location(line), &callees, &port, &path, 3);
    }
    assert!(taint.get(&kind("A")).expect("kind preserved").min_trace_length() <= 3);
}

#[test]
fn apply_call_attaches_leaf_names_on_reification() {
    let callees = vec![Target::function("m.source")];
    let port = Root::LocalResult;
    let path: AccessPath = smallvec![];

    let declared = ForwardTaint::singleton(kind("A"));
    let applied = declared.apply_call(location(1), &callees, &port, &path, 100);
    let flow = applied.get(&kind("A")).expect("kind preserved");
    assert!(flow
        .features
        .contains(&SimpleFeature::LeafName(CompactString::from("m.source"))));
}

#[test]
fn apply_call_strips_tito_positions() {
    let callees = vec![Target::function("m.f")];
    let port = Root::LocalResult;
    let path: AccessPath = smallvec![];

    let mut flow = FlowDetails::origin(location(9));
    flow.add_feature(SimpleFeature::TitoPosition(location(9)));
    let taint = ForwardTaint::singleton_with(kind("A"), flow);

    let applied = taint.apply_call(location(1), &callees, &port, &path, 100);
    let applied_flow = applied.get(&kind("A")).expect("kind preserved");
    assert!(!applied_flow
        .features
        .iter()
        .any(|(feature, _)| matches!(feature, SimpleFeature::TitoPosition(_))));
}

#[test]
fn filter_by_leaf_keeps_one_kind_collapsed() {
    let mut tree = leaf("A");
    tree.join_at(&[field("f")], &leaf("B"));

    let filtered = filter_by_leaf(&kind("B"), &tree);
    assert!(filtered.contains(&kind("B")));
    assert!(!filtered.contains(&kind("A")));
}

#[test]
fn fold_part_visits_each_projection() {
    let mut flow = FlowDetails::declaration();
    flow.add_feature(SimpleFeature::Obscure);
    let mut taint = ForwardTaint::singleton(kind("A"));
    taint.add(kind("B"), flow);

    let traces = taint.fold_part(TaintPart::TraceInfo, 0, |acc, _, _| acc + 1);
    assert_eq!(traces, 2, "one declaration trace per kind");

    let features = taint.fold_part(TaintPart::SimpleFeature, Vec::new(), |mut acc, kind, part| {
        if let PartRef::SimpleFeature(feature, always) = part {
            acc.push((kind.clone(), feature.clone(), always));
        }
        acc
    });
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].0, kind("B"));
    assert!(features[0].2, "declared features hold on every path");
}

#[test]
fn essential_caps_and_strips() {
    let callees = vec![Target::function("m.f")];
    let port = Root::LocalResult;
    let path: AccessPath = smallvec![];

    let mut taint = ForwardTaint::singleton(kind("A"));
    for line in 1..50 {
        taint = taint.apply_call(location(line), &callees, &port, &path, 1000);
    }
    let essential = taint.essential(10);
    assert!(essential.get(&kind("A")).expect("kind preserved").min_trace_length() <= 10);
}
