//! Fixed-capacity column vectors.
//!
//! A vector is a dense, contiguously allocated buffer of typed values with a
//! same-length null bitmap and a *logical size*. A vector may carry a
//! tuple-id-list filter restricting which tuples are logically present; the
//! underlying buffer is unchanged. A *constant* vector stores one element
//! broadcast over any logical size.
//!
//! Varchar vectors own a string heap; their elements are [`VarlenEntry`]
//! handles whose out-of-line content lives in that heap, so entries stay
//! valid for the life of the vector.

use super::runtime_types::VarlenEntry;
use super::tuple_id_list::TupleIdList;
use super::value::GenericValue;
use super::{TypeId, DEFAULT_VECTOR_SIZE};
use crate::util::BitVector;

/// Bump-allocated storage for out-of-line string bytes.
#[derive(Debug, Default)]
pub struct StringHeap {
    chunks: Vec<Box<[u8]>>,
}

impl StringHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `bytes` into the heap and return a handle. Short values inline
    /// into the handle and never touch the heap.
    pub fn add(&mut self, bytes: &[u8]) -> VarlenEntry {
        if bytes.len() <= VarlenEntry::inline_threshold() {
            return VarlenEntry::create(bytes.as_ptr(), bytes.len() as u32);
        }
        let chunk: Box<[u8]> = bytes.into();
        let ptr = chunk.as_ptr();
        self.chunks.push(chunk);
        VarlenEntry::create(ptr, bytes.len() as u32)
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

/// A typed column of up to [`DEFAULT_VECTOR_SIZE`] values.
#[derive(Debug)]
pub struct Vector {
    type_id: TypeId,
    /// Backing buffer, u64-aligned.
    data: Box<[u64]>,
    /// Logical tuple count.
    size: usize,
    /// Active tuple count (`size` unless filtered).
    count: usize,
    null_mask: BitVector,
    filter: Option<TupleIdList>,
    heap: StringHeap,
    constant: bool,
}

impl Vector {
    /// An empty vector of the default capacity.
    pub fn new(type_id: TypeId) -> Self {
        Self::with_capacity(type_id, DEFAULT_VECTOR_SIZE)
    }

    /// An empty vector able to hold `capacity` elements.
    pub fn with_capacity(type_id: TypeId, capacity: usize) -> Self {
        let words = (capacity * type_id.size()).div_ceil(8);
        Vector {
            type_id,
            data: vec![0u64; words].into_boxed_slice(),
            size: 0,
            count: 0,
            null_mask: BitVector::new(capacity),
            filter: None,
            heap: StringHeap::new(),
            constant: false,
        }
    }

    /// A constant vector broadcasting `value` over `size` logical tuples.
    pub fn constant(value: &GenericValue, size: usize) -> Self {
        let mut vector = Self::with_capacity(value.type_id(), 1);
        vector.size = 1;
        vector.count = 1;
        vector.set_value(0, value);
        vector.constant = true;
        vector.size = size;
        vector.count = size;
        vector
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Total logical tuples, ignoring any filter.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Active tuples (filter applied).
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Physical capacity in elements.
    pub fn capacity(&self) -> usize {
        if self.constant {
            1
        } else {
            self.data.len() * 8 / self.type_id.size()
        }
    }

    /// Set the logical size. Clears any filter.
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(self.constant || size <= self.capacity());
        self.size = size;
        self.count = size;
        self.filter = None;
    }

    // -----------------------------------------------------------------
    // Filtering
    // -----------------------------------------------------------------

    pub fn filtered_tuple_id_list(&self) -> Option<&TupleIdList> {
        self.filter.as_ref()
    }

    /// Restrict the active tuples to `list`.
    pub fn set_filtered_tuple_id_list(&mut self, list: &TupleIdList) {
        debug_assert_eq!(list.capacity(), self.size);
        self.count = list.len();
        self.filter = Some(list.clone());
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.count = self.size;
    }

    // -----------------------------------------------------------------
    // Typed element access
    // -----------------------------------------------------------------

    fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr().cast()
    }

    fn data_ptr_mut(&mut self) -> *mut u8 {
        self.data.as_mut_ptr().cast()
    }

    /// Raw typed view over the physical buffer.
    ///
    /// The element type's size must match the vector's type size. Constant
    /// vectors expose a single element.
    pub fn as_slice<T: Copy>(&self) -> &[T] {
        debug_assert_eq!(std::mem::size_of::<T>(), self.type_id.size());
        let len = if self.constant { 1 } else { self.size };
        unsafe { std::slice::from_raw_parts(self.data_ptr().cast::<T>(), len) }
    }

    /// Mutable raw typed view over the physical buffer.
    pub fn as_slice_mut<T: Copy>(&mut self) -> &mut [T] {
        debug_assert_eq!(std::mem::size_of::<T>(), self.type_id.size());
        let len = if self.constant { 1 } else { self.capacity() };
        unsafe { std::slice::from_raw_parts_mut(self.data_ptr_mut().cast::<T>(), len) }
    }

    /// Read element `i`, mapping every index to 0 for constant vectors.
    #[inline]
    pub fn get<T: Copy>(&self, i: usize) -> T {
        debug_assert_eq!(std::mem::size_of::<T>(), self.type_id.size());
        let idx = if self.constant { 0 } else { i };
        debug_assert!(self.constant || idx < self.size);
        unsafe { *self.data_ptr().cast::<T>().add(idx) }
    }

    /// Write element `i`.
    #[inline]
    pub fn set<T: Copy>(&mut self, i: usize, value: T) {
        debug_assert_eq!(std::mem::size_of::<T>(), self.type_id.size());
        let idx = if self.constant { 0 } else { i };
        unsafe { *self.data_ptr_mut().cast::<T>().add(idx) = value }
    }

    // -----------------------------------------------------------------
    // NULLs
    // -----------------------------------------------------------------

    #[inline]
    pub fn is_null(&self, i: usize) -> bool {
        let idx = if self.constant { 0 } else { i };
        self.null_mask.test(idx)
    }

    #[inline]
    pub fn set_null(&mut self, i: usize, null: bool) {
        let idx = if self.constant { 0 } else { i };
        self.null_mask.set_to(idx, null);
    }

    pub fn has_nulls(&self) -> bool {
        !self.null_mask.is_empty()
    }

    pub fn null_mask(&self) -> &BitVector {
        &self.null_mask
    }

    pub fn null_mask_mut(&mut self) -> &mut BitVector {
        &mut self.null_mask
    }

    // -----------------------------------------------------------------
    // Strings
    // -----------------------------------------------------------------

    /// Copy `bytes` into this vector's heap and store the handle at `i`.
    pub fn set_string(&mut self, i: usize, bytes: &[u8]) {
        debug_assert_eq!(self.type_id, TypeId::Varchar);
        let entry = self.heap.add(bytes);
        self.set::<VarlenEntry>(i, entry);
    }

    pub fn heap_mut(&mut self) -> &mut StringHeap {
        &mut self.heap
    }

    // -----------------------------------------------------------------
    // Generic access
    // -----------------------------------------------------------------

    /// Read element `i` as an owned value.
    pub fn get_value(&self, i: usize) -> GenericValue {
        if self.is_null(i) {
            return GenericValue::null(self.type_id);
        }
        match self.type_id {
            TypeId::Boolean => GenericValue::Boolean(Some(self.get::<u8>(i) != 0)),
            TypeId::TinyInt => GenericValue::TinyInt(Some(self.get::<i8>(i))),
            TypeId::SmallInt => GenericValue::SmallInt(Some(self.get::<i16>(i))),
            TypeId::Integer => GenericValue::Integer(Some(self.get::<i32>(i))),
            TypeId::BigInt => GenericValue::BigInt(Some(self.get::<i64>(i))),
            TypeId::Float => GenericValue::Float(Some(self.get::<f32>(i))),
            TypeId::Double => GenericValue::Double(Some(self.get::<f64>(i))),
            TypeId::Date => GenericValue::Date(Some(super::runtime_types::Date::from_julian(
                self.get::<i32>(i),
            ))),
            TypeId::Timestamp => GenericValue::Timestamp(Some(
                super::runtime_types::Timestamp::from_micros(self.get::<i64>(i)),
            )),
            TypeId::Varchar => GenericValue::Varchar(Some(
                self.get::<VarlenEntry>(i).as_str_lossy().into_owned(),
            )),
            TypeId::Hash => GenericValue::Hash(Some(self.get::<u64>(i))),
            TypeId::Pointer => GenericValue::Pointer(Some(self.get::<usize>(i))),
        }
    }

    /// Write an owned value at `i`, setting the null bit as appropriate.
    pub fn set_value(&mut self, i: usize, value: &GenericValue) {
        debug_assert_eq!(value.type_id(), self.type_id);
        if value.is_null() {
            self.set_null(i, true);
            return;
        }
        self.set_null(i, false);
        match value {
            GenericValue::Boolean(Some(v)) => self.set::<u8>(i, u8::from(*v)),
            GenericValue::TinyInt(Some(v)) => self.set::<i8>(i, *v),
            GenericValue::SmallInt(Some(v)) => self.set::<i16>(i, *v),
            GenericValue::Integer(Some(v)) => self.set::<i32>(i, *v),
            GenericValue::BigInt(Some(v)) => self.set::<i64>(i, *v),
            GenericValue::Float(Some(v)) => self.set::<f32>(i, *v),
            GenericValue::Double(Some(v)) => self.set::<f64>(i, *v),
            GenericValue::Date(Some(v)) => self.set::<i32>(i, v.julian()),
            GenericValue::Timestamp(Some(v)) => self.set::<i64>(i, v.micros()),
            GenericValue::Varchar(Some(v)) => self.set_string(i, v.as_bytes()),
            GenericValue::Hash(Some(v)) => self.set::<u64>(i, *v),
            GenericValue::Pointer(Some(v)) => self.set::<usize>(i, *v),
            _ => unreachable!("null handled above"),
        }
    }

    /// Copy this vector's contents into `target`, re-homing any string
    /// content into the target's heap.
    pub fn clone_into(&self, target: &mut Vector) {
        debug_assert_eq!(self.type_id, target.type_id);
        debug_assert!(!self.constant);
        target.size = self.size;
        target.count = self.count;
        target.filter = self.filter.clone();
        target.null_mask = self.null_mask.clone();
        target.heap.clear();
        if self.type_id == TypeId::Varchar {
            for i in 0..self.size {
                if !self.is_null(i) {
                    let bytes = self.get::<VarlenEntry>(i);
                    target.set_string(i, bytes.as_bytes());
                }
            }
        } else {
            let bytes = self.size * self.type_id.size();
            unsafe {
                std::ptr::copy_nonoverlapping(self.data_ptr(), target.data_ptr_mut(), bytes);
            }
        }
    }
}

// The buffer is plain bytes plus an owned heap; vectors move across rayon
// workers with their batches.
unsafe impl Send for Vector {}
unsafe impl Sync for Vector {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_set_get() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(4);
        for i in 0..4 {
            v.set::<i32>(i, (i * 10) as i32);
        }
        assert_eq!(v.get::<i32>(2), 20);
        assert_eq!(v.as_slice::<i32>(), &[0, 10, 20, 30]);
    }

    #[test]
    fn test_null_mask() {
        let mut v = Vector::new(TypeId::BigInt);
        v.set_size(3);
        v.set::<i64>(0, 1);
        v.set_null(1, true);
        v.set::<i64>(2, 3);
        assert!(!v.is_null(0));
        assert!(v.is_null(1));
        assert!(v.has_nulls());
        assert_eq!(v.get_value(1), GenericValue::BigInt(None));
    }

    #[test]
    fn test_constant_vector_broadcasts() {
        let v = Vector::constant(&GenericValue::Integer(Some(7)), 100);
        assert!(v.is_constant());
        assert_eq!(v.size(), 100);
        assert_eq!(v.get::<i32>(0), 7);
        assert_eq!(v.get::<i32>(99), 7);
    }

    #[test]
    fn test_constant_null_vector() {
        let v = Vector::constant(&GenericValue::Integer(None), 10);
        assert!(v.is_null(5));
    }

    #[test]
    fn test_filter_changes_count_not_size() {
        let mut v = Vector::new(TypeId::Integer);
        v.set_size(8);
        let mut list = TupleIdList::new(8);
        list.add(1);
        list.add(5);
        v.set_filtered_tuple_id_list(&list);
        assert_eq!(v.size(), 8);
        assert_eq!(v.count(), 2);
        v.clear_filter();
        assert_eq!(v.count(), 8);
    }

    #[test]
    fn test_string_storage() {
        let mut v = Vector::new(TypeId::Varchar);
        v.set_size(2);
        v.set_string(0, b"tiny");
        v.set_string(1, b"a very long string that spills to the heap");
        assert_eq!(v.get::<VarlenEntry>(0).as_bytes(), b"tiny");
        assert_eq!(
            v.get::<VarlenEntry>(1).as_bytes(),
            b"a very long string that spills to the heap"
        );
    }

    #[test]
    fn test_clone_into_rehomes_strings() {
        let mut v = Vector::new(TypeId::Varchar);
        v.set_size(1);
        v.set_string(0, b"string long enough to live out-of-line here");
        let mut copy = Vector::new(TypeId::Varchar);
        v.clone_into(&mut copy);
        drop(v);
        assert_eq!(
            copy.get::<VarlenEntry>(0).as_bytes(),
            b"string long enough to live out-of-line here"
        );
    }

    #[test]
    fn test_get_set_value_round_trip() {
        let mut v = Vector::new(TypeId::Double);
        v.set_size(2);
        v.set_value(0, &GenericValue::Double(Some(1.5)));
        v.set_value(1, &GenericValue::Double(None));
        assert_eq!(v.get_value(0), GenericValue::Double(Some(1.5)));
        assert!(v.get_value(1).is_null());
    }
}
