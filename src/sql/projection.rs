//! Vector projections: the batches that flow between operators.

use super::tuple_id_list::TupleIdList;
use super::vector::Vector;
use super::vector_ops;
use super::TypeId;

/// An ordered set of column vectors of identical logical size, optionally
/// sharing a single TID-list filter. Per-column NULL masks are independent;
/// the shared filter applies uniformly to every column.
#[derive(Debug, Default)]
pub struct VectorProjection {
    columns: Vec<Vector>,
    filter: Option<TupleIdList>,
}

impl VectorProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate one vector per column type, each with default capacity.
    pub fn setup(&mut self, column_types: &[TypeId]) {
        self.columns = column_types.iter().map(|&ty| Vector::new(ty)).collect();
        self.filter = None;
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Vector {
        &self.columns[index]
    }

    pub fn column_mut(&mut self, index: usize) -> &mut Vector {
        &mut self.columns[index]
    }

    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    /// Total tuples in the batch, ignoring the filter.
    pub fn total_tuple_count(&self) -> usize {
        self.columns.first().map_or(0, Vector::size)
    }

    /// Active tuples (filter applied).
    pub fn active_tuple_count(&self) -> usize {
        match &self.filter {
            Some(list) => list.len(),
            None => self.total_tuple_count(),
        }
    }

    pub fn filter(&self) -> Option<&TupleIdList> {
        self.filter.as_ref()
    }

    /// Reset every column to `size` unfiltered tuples.
    pub fn reset(&mut self, size: usize) {
        for column in &mut self.columns {
            column.set_size(size);
        }
        self.filter = None;
    }

    /// Apply `list` as the shared filter, pushing it into every column.
    pub fn set_filter(&mut self, list: &TupleIdList) {
        debug_assert_eq!(list.capacity(), self.total_tuple_count());
        for column in &mut self.columns {
            column.set_filtered_tuple_id_list(list);
        }
        self.filter = Some(list.clone());
    }

    /// Copy the projection's active-tuple set into `list`: the filter if one
    /// is present, else all TIDs.
    pub fn copy_selections_to(&self, list: &mut TupleIdList) {
        list.resize(self.total_tuple_count());
        match &self.filter {
            Some(filter) => list.assign_from(filter),
            None => list.add_all(),
        }
    }

    /// Hash the given key columns into `out` (a Hash vector): first column
    /// hashes, remaining columns fold in via hash-combine.
    pub fn hash(&self, key_columns: &[usize], out: &mut Vector) {
        debug_assert!(!key_columns.is_empty());
        vector_ops::hash(&self.columns[key_columns[0]], out);
        for &col in &key_columns[1..] {
            vector_ops::hash_combine(&self.columns[col], out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection_with_ints(values: &[&[i32]]) -> VectorProjection {
        let mut vp = VectorProjection::new();
        vp.setup(&vec![TypeId::Integer; values.len()]);
        let size = values[0].len();
        vp.reset(size);
        for (c, column_values) in values.iter().enumerate() {
            for (i, &v) in column_values.iter().enumerate() {
                vp.column_mut(c).set::<i32>(i, v);
            }
        }
        vp
    }

    #[test]
    fn test_counts() {
        let mut vp = projection_with_ints(&[&[1, 2, 3], &[4, 5, 6]]);
        assert_eq!(vp.num_columns(), 2);
        assert_eq!(vp.total_tuple_count(), 3);
        assert_eq!(vp.active_tuple_count(), 3);

        let mut list = TupleIdList::new(3);
        list.add(1);
        vp.set_filter(&list);
        assert_eq!(vp.total_tuple_count(), 3);
        assert_eq!(vp.active_tuple_count(), 1);
        assert_eq!(vp.column(0).count(), 1);
    }

    #[test]
    fn test_copy_selections() {
        let mut vp = projection_with_ints(&[&[1, 2, 3]]);
        let mut list = TupleIdList::new(3);
        vp.copy_selections_to(&mut list);
        assert!(list.is_full());

        let mut filter = TupleIdList::new(3);
        filter.add(0);
        filter.add(2);
        vp.set_filter(&filter);
        vp.copy_selections_to(&mut list);
        assert_eq!(list.to_vec(), vec![0, 2]);
    }

    #[test]
    fn test_multi_column_hash_differs_from_single() {
        let vp = projection_with_ints(&[&[1, 2], &[9, 9]]);
        let mut h1 = Vector::new(TypeId::Hash);
        let mut h2 = Vector::new(TypeId::Hash);
        vp.hash(&[0], &mut h1);
        vp.hash(&[0, 1], &mut h2);
        assert_ne!(h1.get::<u64>(0), h2.get::<u64>(0));
    }
}
