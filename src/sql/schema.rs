//! Table schemas.

use super::TypeId;

/// One column's name, physical type, and nullability.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub type_id: TypeId,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_id: TypeId, nullable: bool) -> Self {
        ColumnInfo {
            name: name.into(),
            type_id,
            nullable,
        }
    }
}

/// An ordered list of columns.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Schema { columns }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_types(&self) -> Vec<TypeId> {
        self.columns.iter().map(|c| c.type_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup() {
        let schema = Schema::new(vec![
            ColumnInfo::new("colA", TypeId::Integer, false),
            ColumnInfo::new("colB", TypeId::BigInt, true),
        ]);
        assert_eq!(schema.num_columns(), 2);
        assert_eq!(schema.column_index("colB"), Some(1));
        assert_eq!(schema.column_index("nope"), None);
        assert_eq!(schema.column_types(), vec![TypeId::Integer, TypeId::BigInt]);
    }
}
