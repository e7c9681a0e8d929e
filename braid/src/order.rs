//! Partial orders over timestamps and path summaries.

/// A partially ordered type.
///
/// Rust's `PartialOrd` would force `Ord` to agree with it, but timestamps must sort totally
/// (to consolidate and to order notifications) while comparing only partially for progress.
pub trait PartialOrder<Rhs: ?Sized = Self>: PartialEq<Rhs> {
    /// True iff `self` is less than or equal to `other`, and not equal to it.
    fn less_than(&self, other: &Rhs) -> bool {
        self.less_equal(other) && self != other
    }
    /// True iff `self` is less than or equal to `other`.
    fn less_equal(&self, other: &Rhs) -> bool;
}

macro_rules! implement_total {
    ($($index_type:ty,)*) => (
        $(
            impl PartialOrder for $index_type {
                #[inline] fn less_than(&self, other: &Self) -> bool { self < other }
                #[inline] fn less_equal(&self, other: &Self) -> bool { self <= other }
            }
        )*
    )
}

implement_total!(u32, u64, usize, i64, (),);
