//! In-memory column-oriented tables.
//!
//! A table is a sequence of blocks; each block holds one column segment per
//! schema column. Blocks are append-only and immutable once inserted, which
//! is what lets parallel scans hand disjoint block ranges to workers without
//! synchronization.

use super::runtime_types::VarlenEntry;
use super::schema::Schema;
use super::value::GenericValue;
use super::TypeId;
use crate::util::BitVector;

/// A contiguous run of values for one column within one block.
#[derive(Debug)]
pub struct ColumnSegment {
    type_id: TypeId,
    data: Vec<u8>,
    nulls: BitVector,
    /// Owned string content for Varchar segments.
    strings: Vec<Box<[u8]>>,
    count: usize,
}

impl ColumnSegment {
    pub fn new(type_id: TypeId, capacity: usize) -> Self {
        ColumnSegment {
            type_id,
            data: Vec::with_capacity(capacity * type_id.size()),
            nulls: BitVector::new(capacity),
            strings: Vec::new(),
            count: 0,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one value.
    pub fn push(&mut self, value: &GenericValue) {
        debug_assert_eq!(value.type_id(), self.type_id);
        if value.is_null() {
            self.nulls.set(self.count);
            self.data.resize(self.data.len() + self.type_id.size(), 0);
            self.count += 1;
            return;
        }
        match value {
            GenericValue::Boolean(Some(v)) => self.data.push(u8::from(*v)),
            GenericValue::TinyInt(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::SmallInt(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::Integer(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::BigInt(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::Float(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::Double(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::Date(Some(v)) => self.data.extend_from_slice(&v.julian().to_le_bytes()),
            GenericValue::Timestamp(Some(v)) => {
                self.data.extend_from_slice(&v.micros().to_le_bytes());
            }
            GenericValue::Hash(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::Pointer(Some(v)) => self.data.extend_from_slice(&v.to_le_bytes()),
            GenericValue::Varchar(Some(v)) => {
                let bytes: Box<[u8]> = v.as_bytes().into();
                let entry = VarlenEntry::create(bytes.as_ptr(), bytes.len() as u32);
                self.strings.push(bytes);
                let raw: [u8; std::mem::size_of::<VarlenEntry>()] =
                    unsafe { std::mem::transmute(entry) };
                self.data.extend_from_slice(&raw);
            }
            _ => unreachable!("null handled above"),
        }
        self.count += 1;
    }

    /// Is row `i` NULL?
    pub fn is_null(&self, i: usize) -> bool {
        self.nulls.test(i)
    }

    /// Raw bytes of row `i`.
    pub fn raw(&self, i: usize) -> &[u8] {
        let width = self.type_id.size();
        &self.data[i * width..(i + 1) * width]
    }
}

/// One horizontal slab of a table.
#[derive(Debug)]
pub struct Block {
    segments: Vec<ColumnSegment>,
    tuple_count: usize,
}

impl Block {
    pub fn segments(&self) -> &[ColumnSegment] {
        &self.segments
    }

    pub fn segment(&self, col: usize) -> &ColumnSegment {
        &self.segments[col]
    }

    pub fn tuple_count(&self) -> usize {
        self.tuple_count
    }
}

/// A table: schema plus blocks.
#[derive(Debug)]
pub struct Table {
    id: u16,
    name: String,
    schema: Schema,
    blocks: Vec<Block>,
    num_rows: usize,
}

impl Table {
    pub fn new(id: u16, name: impl Into<String>, schema: Schema) -> Self {
        Table {
            id,
            name: name.into(),
            schema,
            blocks: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, index: usize) -> &Block {
        &self.blocks[index]
    }

    /// Append a block of pre-built column segments. All segments must be the
    /// same length and match the schema's column order.
    pub fn bulk_insert(&mut self, segments: Vec<ColumnSegment>) {
        debug_assert_eq!(segments.len(), self.schema.num_columns());
        let count = segments.first().map_or(0, ColumnSegment::len);
        debug_assert!(segments.iter().all(|s| s.len() == count));
        self.num_rows += count;
        self.blocks.push(Block {
            segments,
            tuple_count: count,
        });
    }
}

/// An iterator over a contiguous range of a table's blocks.
#[derive(Debug)]
pub struct TableBlockIterator<'a> {
    table: &'a Table,
    current: usize,
    end: usize,
}

impl<'a> TableBlockIterator<'a> {
    /// Iterate blocks `[start, end)`; `end` is clamped to the block count.
    pub fn new(table: &'a Table, start: usize, end: usize) -> Self {
        TableBlockIterator {
            table,
            current: start,
            end: end.min(table.num_blocks()),
        }
    }

    pub fn table(&self) -> &Table {
        self.table
    }
}

impl<'a> Iterator for TableBlockIterator<'a> {
    type Item = &'a Block;

    fn next(&mut self) -> Option<&'a Block> {
        if self.current >= self.end {
            return None;
        }
        let block = self.table.block(self.current);
        self.current += 1;
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::schema::ColumnInfo;

    fn two_column_table(rows: &[(i32, i64)]) -> Table {
        let schema = Schema::new(vec![
            ColumnInfo::new("a", TypeId::Integer, false),
            ColumnInfo::new("b", TypeId::BigInt, true),
        ]);
        let mut table = Table::new(1, "t", schema);
        let mut a = ColumnSegment::new(TypeId::Integer, rows.len());
        let mut b = ColumnSegment::new(TypeId::BigInt, rows.len());
        for (x, y) in rows {
            a.push(&GenericValue::Integer(Some(*x)));
            b.push(&GenericValue::BigInt(Some(*y)));
        }
        table.bulk_insert(vec![a, b]);
        table
    }

    #[test]
    fn test_bulk_insert_and_counts() {
        let table = two_column_table(&[(1, 10), (2, 20), (3, 30)]);
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.num_blocks(), 1);
        let block = table.block(0);
        assert_eq!(block.tuple_count(), 3);
        assert_eq!(block.segment(0).raw(1), &2i32.to_le_bytes());
    }

    #[test]
    fn test_null_tracking() {
        let mut seg = ColumnSegment::new(TypeId::Integer, 4);
        seg.push(&GenericValue::Integer(Some(1)));
        seg.push(&GenericValue::Integer(None));
        assert!(!seg.is_null(0));
        assert!(seg.is_null(1));
    }

    #[test]
    fn test_block_iterator_range() {
        let mut table = two_column_table(&[(1, 10)]);
        let mut a = ColumnSegment::new(TypeId::Integer, 1);
        let mut b = ColumnSegment::new(TypeId::BigInt, 1);
        a.push(&GenericValue::Integer(Some(5)));
        b.push(&GenericValue::BigInt(Some(50)));
        table.bulk_insert(vec![a, b]);

        assert_eq!(TableBlockIterator::new(&table, 0, 2).count(), 2);
        assert_eq!(TableBlockIterator::new(&table, 1, 2).count(), 1);
        assert_eq!(TableBlockIterator::new(&table, 0, 99).count(), 2);
    }
}
