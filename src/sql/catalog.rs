//! The catalog: table-id and table-name lookup over the in-memory tables.
//!
//! There is no process-wide singleton; a catalog is constructed explicitly
//! and handed to compilation and execution through the execution context.
//! `Catalog::with_test_tables` seeds the synthetic tables the test suite and
//! the REPL scan out of the box.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::schema::{ColumnInfo, Schema};
use super::table::{ColumnSegment, Table};
use super::value::GenericValue;
use super::TypeId;

/// Table ids of the built-in test tables.
pub const TEST_1: u16 = 0;
pub const SMALL_1: u16 = 1;
pub const EMPTY_TABLE: u16 = 2;

const TEST_1_ROWS: usize = 200_000;
const SMALL_1_ROWS: usize = 500;
const INSERT_BATCH: usize = 10_000;

#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<u16, Arc<Table>>,
    name_to_id: HashMap<String, u16>,
    next_table_id: u16,
}

impl Catalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog pre-populated with the synthetic test tables.
    pub fn with_test_tables() -> Self {
        let mut catalog = Catalog::new();
        catalog.bootstrap();
        catalog
    }

    pub fn insert_table(&mut self, table: Table) -> u16 {
        let id = table.id();
        self.name_to_id.insert(table.name().to_string(), id);
        self.tables.insert(id, Arc::new(table));
        self.next_table_id = self.next_table_id.max(id + 1);
        id
    }

    pub fn allocate_table_id(&mut self) -> u16 {
        let id = self.next_table_id;
        self.next_table_id += 1;
        id
    }

    pub fn lookup_table_by_id(&self, id: u16) -> Option<Arc<Table>> {
        self.tables.get(&id).cloned()
    }

    pub fn lookup_table_by_name(&self, name: &str) -> Option<Arc<Table>> {
        self.name_to_id
            .get(name)
            .and_then(|id| self.tables.get(id).cloned())
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// Create and populate the built-in tables.
    fn bootstrap(&mut self) {
        info!("initializing catalog");

        // test_1: one serial column and three uniform columns.
        let schema = Schema::new(vec![
            ColumnInfo::new("colA", TypeId::Integer, false),
            ColumnInfo::new("colB", TypeId::Integer, false),
            ColumnInfo::new("colC", TypeId::Integer, false),
            ColumnInfo::new("colD", TypeId::Integer, false),
        ]);
        let mut table = Table::new(TEST_1, "test_1", schema);
        let mut rng = StdRng::seed_from_u64(0x7e11);
        let mut serial = 0i32;
        let mut remaining = TEST_1_ROWS;
        while remaining > 0 {
            let batch = remaining.min(INSERT_BATCH);
            let mut cols: Vec<ColumnSegment> = (0..4)
                .map(|_| ColumnSegment::new(TypeId::Integer, batch))
                .collect();
            for _ in 0..batch {
                cols[0].push(&GenericValue::Integer(Some(serial)));
                cols[1].push(&GenericValue::Integer(Some(rng.gen_range(0..=9))));
                cols[2].push(&GenericValue::Integer(Some(rng.gen_range(0..=9_999))));
                cols[3].push(&GenericValue::Integer(Some(rng.gen_range(0..=99_999))));
                serial += 1;
            }
            table.bulk_insert(cols);
            remaining -= batch;
        }
        info!(rows = table.num_rows(), "created table 'test_1'");
        self.insert_table(table);

        // small_1: a small two-column table handy for join tests.
        let schema = Schema::new(vec![
            ColumnInfo::new("colA", TypeId::Integer, false),
            ColumnInfo::new("colB", TypeId::BigInt, true),
        ]);
        let mut table = Table::new(SMALL_1, "small_1", schema);
        let mut a = ColumnSegment::new(TypeId::Integer, SMALL_1_ROWS);
        let mut b = ColumnSegment::new(TypeId::BigInt, SMALL_1_ROWS);
        for i in 0..SMALL_1_ROWS {
            a.push(&GenericValue::Integer(Some(i as i32)));
            if i % 10 == 0 {
                b.push(&GenericValue::BigInt(None));
            } else {
                b.push(&GenericValue::BigInt(Some((i * 2) as i64)));
            }
        }
        table.bulk_insert(vec![a, b]);
        info!(rows = table.num_rows(), "created table 'small_1'");
        self.insert_table(table);

        // empty_table: a schema with no rows.
        let schema = Schema::new(vec![ColumnInfo::new("colA", TypeId::Integer, false)]);
        let table = Table::new(EMPTY_TABLE, "empty_table", schema);
        self.insert_table(table);

        info!(tables = self.num_tables(), "catalog initialization complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id_and_name() {
        let catalog = Catalog::with_test_tables();
        let by_id = catalog.lookup_table_by_id(TEST_1).expect("test_1");
        let by_name = catalog.lookup_table_by_name("test_1").expect("test_1");
        assert_eq!(by_id.id(), by_name.id());
        assert!(catalog.lookup_table_by_name("no_such").is_none());
        assert!(catalog.lookup_table_by_id(999).is_none());
    }

    #[test]
    fn test_test_tables_shape() {
        let catalog = Catalog::with_test_tables();
        let t1 = catalog.lookup_table_by_id(TEST_1).expect("test_1");
        assert_eq!(t1.schema().num_columns(), 4);
        assert_eq!(t1.num_rows(), TEST_1_ROWS);
        assert!(t1.num_blocks() > 1);

        let empty = catalog.lookup_table_by_id(EMPTY_TABLE).expect("empty");
        assert_eq!(empty.num_rows(), 0);
    }

    #[test]
    fn test_serial_column_is_serial() {
        let catalog = Catalog::with_test_tables();
        let t1 = catalog.lookup_table_by_id(TEST_1).expect("test_1");
        let block = t1.block(0);
        assert_eq!(block.segment(0).raw(0), &0i32.to_le_bytes());
        assert_eq!(block.segment(0).raw(7), &7i32.to_le_bytes());
    }
}
