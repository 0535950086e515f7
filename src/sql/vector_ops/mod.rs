//! Vectorized operation kernels.
//!
//! Every kernel follows the same iteration contract: when the input has no
//! TID-list filter it sweeps the raw contiguous buffer in `[0, size)`;
//! when filtered it visits the TID list in ascending order. NULL semantics
//! are SQL's: arithmetic propagates NULLs, selections never select them.

pub mod arithmetic;
pub mod cast;
pub mod comparisons;
pub mod copy;
pub mod fill;
pub mod gather;
pub mod hashing;
pub mod null_checks;
pub mod sort;

pub use arithmetic::{add, divide, modulo, multiply, subtract};
pub use cast::cast;
pub use comparisons::{
    select_between, select_eq, select_ge, select_gt, select_le, select_like, select_lt,
    select_ne, select_not_like,
};
pub use copy::copy;
pub use fill::{fill, fill_null, generate};
pub use gather::{gather, gather_and_select};
pub use hashing::{hash, hash_combine};
pub use null_checks::{is_not_null, is_null};
pub use sort::sort_to_selection;

use super::vector::Vector;

/// Apply `f` to every active tuple index of `vector`, in ascending order.
#[inline]
pub fn exec<F: FnMut(usize)>(vector: &Vector, mut f: F) {
    if let Some(list) = vector.filtered_tuple_id_list() {
        list.for_each(f);
    } else {
        for i in 0..vector.size() {
            f(i);
        }
    }
}

/// The non-constant operand of a binary kernel, used as the shape template
/// for the result.
#[inline]
pub(crate) fn shape_of<'a>(left: &'a Vector, right: &'a Vector) -> &'a Vector {
    if left.is_constant() {
        right
    } else {
        left
    }
}

/// Prepare `result` with the size and filter of `template`.
pub(crate) fn match_shape(template: &Vector, result: &mut Vector) {
    result.set_size(template.size());
    if let Some(filter) = template.filtered_tuple_id_list() {
        result.set_filtered_tuple_id_list(filter);
    }
}
