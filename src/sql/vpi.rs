//! The vector-projection iterator.
//!
//! Exposes a vector projection one tuple at a time to generated code, with
//! an accumulate-then-apply `match` protocol for in-place filtering: during
//! a pass the iterator collects match verdicts per tuple, and `reset`
//! installs the accumulated matches as the projection's new filter before
//! rewinding. Generated scan loops therefore read columns, call `match`,
//! and the surviving tuples become the batch the consumer sees.
//!
//! The iterator holds a raw pointer to its projection because both are
//! embedded in runtime state addressed from bytecode frames; the table
//! iterator that owns both keeps them alive together.

use super::projection::VectorProjection;
use super::runtime_types::VarlenEntry;
use super::tuple_id_list::TupleIdList;
use super::value::{
    BoolVal, DateVal, Integer, Real, StringVal,
};
use super::{TypeId, DEFAULT_VECTOR_SIZE};

#[derive(Debug)]
pub struct VectorProjectionIterator {
    vp: *mut VectorProjection,
    /// Active TIDs of the current batch, in iteration order.
    selection: Vec<u16>,
    /// Position within `selection`.
    position: usize,
    /// Whether the source batch arrived filtered.
    filtered: bool,
    /// Match verdicts accumulated during this pass.
    matches: TupleIdList,
    /// Whether any verdicts were recorded this pass.
    matched_any: bool,
}

impl VectorProjectionIterator {
    pub fn new() -> Self {
        VectorProjectionIterator {
            vp: std::ptr::null_mut(),
            selection: Vec::new(),
            position: 0,
            filtered: false,
            matches: TupleIdList::new(DEFAULT_VECTOR_SIZE),
            matched_any: false,
        }
    }

    /// Point the iterator at a (new) projection batch and rewind.
    pub fn set_vector_projection(&mut self, vp: *mut VectorProjection) {
        self.vp = vp;
        self.refresh();
    }

    fn projection(&self) -> &VectorProjection {
        debug_assert!(!self.vp.is_null());
        unsafe { &*self.vp }
    }

    /// The projection this iterator is positioned over. Callers that need
    /// the projection and the iterator simultaneously (batch kernels) read
    /// through this pointer.
    pub fn projection_ptr(&self) -> *mut VectorProjection {
        self.vp
    }

    fn projection_mut(&mut self) -> &mut VectorProjection {
        debug_assert!(!self.vp.is_null());
        unsafe { &mut *self.vp }
    }

    /// Re-read the projection's active set and rewind to the start.
    fn refresh(&mut self) {
        debug_assert!(!self.vp.is_null());
        let vp: &VectorProjection = unsafe { &*self.vp };
        self.selection.clear();
        match vp.filter() {
            Some(list) => {
                self.filtered = true;
                list.for_each(|tid| self.selection.push(tid as u16));
            }
            None => {
                self.filtered = false;
                self.selection.extend(0..vp.total_tuple_count() as u16);
            }
        }
        self.position = 0;
        self.matches.resize(vp.total_tuple_count());
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// Does the iterator have a current tuple?
    pub fn has_next(&self) -> bool {
        self.position < self.selection.len()
    }

    pub fn advance(&mut self) {
        self.position += 1;
    }

    /// The TID of the current tuple.
    pub fn current_tid(&self) -> usize {
        self.selection[self.position] as usize
    }

    /// Record whether the current tuple survives the filter being applied.
    pub fn match_tuple(&mut self, matched: bool) {
        self.matched_any = true;
        let tid = self.current_tid();
        if matched {
            self.matches.add(tid);
        } else {
            self.matches.remove(tid);
        }
    }

    /// Install accumulated matches as the projection's filter and rewind.
    /// Without intervening `match_tuple` calls this is a plain rewind.
    pub fn reset(&mut self) {
        if self.matched_any {
            let matches = self.matches.clone();
            self.projection_mut().set_filter(&matches);
        }
        self.matched_any = false;
        self.matches.clear();
        self.refresh();
    }

    /// The number of active tuples remaining in a full pass.
    pub fn active_tuple_count(&self) -> usize {
        self.selection.len()
    }

    // -----------------------------------------------------------------
    // Typed column access at the current position
    // -----------------------------------------------------------------

    fn column_value<T: Copy>(&self, col_idx: usize) -> (T, bool) {
        let tid = self.current_tid();
        let column = self.projection().column(col_idx);
        (column.get::<T>(tid), column.is_null(tid))
    }

    /// Read an integer-family column into a SQL Integer.
    pub fn get_integer(&self, col_idx: usize) -> Integer {
        let tid = self.current_tid();
        let column = self.projection().column(col_idx);
        if column.is_null(tid) {
            return Integer::null();
        }
        let value = match column.type_id() {
            TypeId::TinyInt => i64::from(column.get::<i8>(tid)),
            TypeId::SmallInt => i64::from(column.get::<i16>(tid)),
            TypeId::Integer => i64::from(column.get::<i32>(tid)),
            TypeId::BigInt => column.get::<i64>(tid),
            other => {
                debug_assert!(false, "get_integer on {other} column");
                0
            }
        };
        Integer::new(value)
    }

    /// Read a float-family column into a SQL Real.
    pub fn get_real(&self, col_idx: usize) -> Real {
        let tid = self.current_tid();
        let column = self.projection().column(col_idx);
        if column.is_null(tid) {
            return Real::null();
        }
        let value = match column.type_id() {
            TypeId::Float => f64::from(column.get::<f32>(tid)),
            TypeId::Double => column.get::<f64>(tid),
            other => {
                debug_assert!(false, "get_real on {other} column");
                0.0
            }
        };
        Real::new(value)
    }

    pub fn get_bool(&self, col_idx: usize) -> BoolVal {
        let (value, null) = self.column_value::<u8>(col_idx);
        if null {
            BoolVal::null()
        } else {
            BoolVal::new(value != 0)
        }
    }

    pub fn get_date(&self, col_idx: usize) -> DateVal {
        let (value, null) = self.column_value::<i32>(col_idx);
        if null {
            DateVal::null()
        } else {
            DateVal::new(super::runtime_types::Date::from_julian(value))
        }
    }

    pub fn get_string(&self, col_idx: usize) -> StringVal {
        let (value, null) = self.column_value::<VarlenEntry>(col_idx);
        if null {
            StringVal::null()
        } else {
            StringVal::new(value)
        }
    }

    // -----------------------------------------------------------------
    // Typed column writes at the current position
    // -----------------------------------------------------------------

    pub fn set_integer(&mut self, col_idx: usize, value: Integer) {
        let tid = self.current_tid();
        let column = self.projection_mut().column_mut(col_idx);
        if value.is_null {
            column.set_null(tid, true);
            return;
        }
        column.set_null(tid, false);
        match column.type_id() {
            TypeId::TinyInt => column.set::<i8>(tid, value.value as i8),
            TypeId::SmallInt => column.set::<i16>(tid, value.value as i16),
            TypeId::Integer => column.set::<i32>(tid, value.value as i32),
            TypeId::BigInt => column.set::<i64>(tid, value.value),
            other => debug_assert!(false, "set_integer on {other} column"),
        }
    }

    pub fn set_real(&mut self, col_idx: usize, value: Real) {
        let tid = self.current_tid();
        let column = self.projection_mut().column_mut(col_idx);
        if value.is_null {
            column.set_null(tid, true);
            return;
        }
        column.set_null(tid, false);
        match column.type_id() {
            TypeId::Float => column.set::<f32>(tid, value.value as f32),
            TypeId::Double => column.set::<f64>(tid, value.value),
            other => debug_assert!(false, "set_real on {other} column"),
        }
    }

    pub fn set_date(&mut self, col_idx: usize, value: DateVal) {
        let tid = self.current_tid();
        let column = self.projection_mut().column_mut(col_idx);
        if value.is_null {
            column.set_null(tid, true);
        } else {
            column.set_null(tid, false);
            column.set::<i32>(tid, value.value.julian());
        }
    }

    pub fn set_string(&mut self, col_idx: usize, value: StringVal) {
        let tid = self.current_tid();
        let column = self.projection_mut().column_mut(col_idx);
        if value.is_null {
            column.set_null(tid, true);
        } else {
            column.set_null(tid, false);
            let bytes = value.value;
            column.set_string(tid, bytes.as_bytes());
        }
    }
}

impl Default for VectorProjectionIterator {
    fn default() -> Self {
        Self::new()
    }
}

// The raw projection pointer is owned by the same runtime object that owns
// the iterator (the table iterator or operator state).
unsafe impl Send for VectorProjectionIterator {}
unsafe impl Sync for VectorProjectionIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_projection(values: &[Option<i32>]) -> VectorProjection {
        let mut vp = VectorProjection::new();
        vp.setup(&[TypeId::Integer]);
        vp.reset(values.len());
        for (i, v) in values.iter().enumerate() {
            match v {
                Some(v) => vp.column_mut(0).set::<i32>(i, *v),
                None => vp.column_mut(0).set_null(i, true),
            }
        }
        vp
    }

    #[test]
    fn test_iterate_all_tuples() {
        let mut vp = make_projection(&[Some(1), Some(2), Some(3)]);
        let mut vpi = VectorProjectionIterator::new();
        vpi.set_vector_projection(&mut vp);
        let mut seen = Vec::new();
        while vpi.has_next() {
            seen.push(vpi.get_integer(0).value);
            vpi.advance();
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_match_then_reset_filters_projection() {
        let mut vp = make_projection(&[Some(5), Some(10), Some(15), Some(20)]);
        let mut vpi = VectorProjectionIterator::new();
        vpi.set_vector_projection(&mut vp);
        while vpi.has_next() {
            let value = vpi.get_integer(0);
            vpi.match_tuple(value.value > 9);
            vpi.advance();
        }
        vpi.reset();
        // Second pass sees only the matching tuples.
        let mut seen = Vec::new();
        while vpi.has_next() {
            seen.push(vpi.get_integer(0).value);
            vpi.advance();
        }
        assert_eq!(seen, vec![10, 15, 20]);
        assert_eq!(vp.active_tuple_count(), 3);
    }

    #[test]
    fn test_null_reads() {
        let mut vp = make_projection(&[None, Some(2)]);
        let mut vpi = VectorProjectionIterator::new();
        vpi.set_vector_projection(&mut vp);
        assert!(vpi.get_integer(0).is_null);
        vpi.advance();
        assert!(!vpi.get_integer(0).is_null);
    }

    #[test]
    fn test_iterates_existing_filter() {
        let mut vp = make_projection(&[Some(0), Some(1), Some(2), Some(3)]);
        let mut list = TupleIdList::new(4);
        list.add(1);
        list.add(3);
        vp.set_filter(&list);
        let mut vpi = VectorProjectionIterator::new();
        vpi.set_vector_projection(&mut vp);
        assert!(vpi.is_filtered());
        let mut seen = Vec::new();
        while vpi.has_next() {
            seen.push(vpi.get_integer(0).value);
            vpi.advance();
        }
        assert_eq!(seen, vec![1, 3]);
    }
}
