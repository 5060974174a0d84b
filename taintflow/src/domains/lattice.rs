//! The core abstract-domain trait.

/// A join-semilattice element with widening.
///
/// Every operation must preserve bottom-normalization: a composite element
/// never stores a sub-element equal to bottom explicitly. The kernel is
/// total; malformed uses are programmer errors caught at construction.
pub trait AbstractDomain: Clone + PartialEq {
    /// The least element.
    fn bottom() -> Self;

    /// Whether this element is the least element.
    fn is_bottom(&self) -> bool;

    /// In-place least upper bound.
    fn join(&mut self, other: &Self);

    /// In-place widening. Must be an upper bound of `join` and reach a
    /// fixed point after finitely many applications. Defaults to `join`
    /// for domains of finite height.
    fn widen(&mut self, other: &Self) {
        self.join(other);
    }

    /// Partial-order test.
    fn less_or_equal(&self, other: &Self) -> bool;
}
