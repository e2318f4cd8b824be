// Schema registry
//
// Read-only after construction. Table order is significant: a full run
// exports tables in registry order.

use std::collections::HashSet;

use super::{ColumnSpec, LogicalType, TableSchema};
use crate::error::{ExportError, Result};

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    /// Build a registry from explicit definitions, rejecting invalid ones
    pub fn new(tables: Vec<TableSchema>) -> Result<Self> {
        let mut seen = HashSet::new();
        for table in &tables {
            validate_table(table)?;
            if !seen.insert(table.name.as_str()) {
                return Err(ExportError::invalid_schema(
                    &table.name,
                    "table declared more than once",
                ));
            }
        }
        Ok(Self { tables })
    }

    /// Registry with the tables of the verified-contracts database
    pub fn builtin() -> Self {
        Self {
            tables: builtin_tables(),
        }
    }

    /// Layer configured tables on top of this registry.
    ///
    /// A table with an existing name replaces it in place; new names are
    /// appended in the order given.
    pub fn with_overrides(mut self, overrides: Vec<TableSchema>) -> Result<Self> {
        for table in overrides {
            match self.tables.iter_mut().find(|t| t.name == table.name) {
                Some(existing) => *existing = table,
                None => self.tables.push(table),
            }
        }
        Self::new(self.tables)
    }

    pub fn lookup(&self, table_name: &str) -> Result<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name == table_name)
            .ok_or_else(|| ExportError::unknown_table(table_name))
    }

    /// Tables to export: the selected one, or all of them in registry order
    pub fn select(&self, table_name: Option<&str>) -> Result<Vec<&TableSchema>> {
        match table_name {
            Some(name) => Ok(vec![self.lookup(name)?]),
            None => Ok(self.tables.iter().collect()),
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Check the chunking and column invariants every exported table must hold
pub(crate) fn validate_table(table: &TableSchema) -> Result<()> {
    if table.name.is_empty() {
        return Err(ExportError::invalid_schema("", "table name must not be empty"));
    }
    if table.chunk_size == 0 {
        return Err(ExportError::invalid_schema(
            &table.name,
            "chunk_size must be greater than 0",
        ));
    }
    if table.chunks_per_file == 0 {
        return Err(ExportError::invalid_schema(
            &table.name,
            "chunks_per_file must be greater than 0",
        ));
    }
    if table.columns.is_empty() {
        return Err(ExportError::invalid_schema(
            &table.name,
            "at least one column is required",
        ));
    }
    let mut names = HashSet::new();
    for column in &table.columns {
        if !names.insert(column.name.as_str()) {
            return Err(ExportError::invalid_schema(
                &table.name,
                format!("column '{}' declared more than once", column.name),
            ));
        }
    }
    Ok(())
}

fn builtin_tables() -> Vec<TableSchema> {
    use LogicalType::*;

    let cols = |specs: &[(&str, LogicalType)]| -> Vec<ColumnSpec> {
        specs
            .iter()
            .map(|(name, ty)| ColumnSpec::new(*name, *ty))
            .collect()
    };

    vec![
        TableSchema::new(
            "code",
            cols(&[("code_hash", Binary), ("code", Binary)]),
            10_000,
            10,
        ),
        TableSchema::new(
            "contracts",
            cols(&[
                ("id", Utf8),
                ("creation_code_hash", Binary),
                ("runtime_code_hash", Binary),
            ]),
            100_000,
            10,
        ),
        TableSchema::new(
            "contract_deployments",
            cols(&[
                ("id", Utf8),
                ("chain_id", Int64),
                ("address", Binary),
                ("transaction_hash", Binary),
                ("block_number", Int64),
                ("transaction_index", Int32),
                ("deployer", Binary),
                ("contract_id", Utf8),
            ]),
            100_000,
            10,
        ),
        TableSchema::new(
            "compiled_contracts",
            cols(&[
                ("id", Utf8),
                ("created_at", Timestamp),
                ("updated_at", Timestamp),
                ("created_by", Utf8),
                ("updated_by", Utf8),
                ("compiler", Utf8),
                ("version", Utf8),
                ("language", Utf8),
                ("name", Utf8),
                ("fully_qualified_name", Utf8),
                ("sources", Json),
                ("compiler_settings", Json),
                ("compilation_artifacts", Json),
                ("creation_code_hash", Binary),
                ("creation_code_artifacts", Json),
                ("runtime_code_hash", Binary),
                ("runtime_code_artifacts", Json),
            ]),
            1_000,
            10,
        ),
        TableSchema::new(
            "verified_contracts",
            cols(&[
                ("id", Int64),
                ("created_at", Timestamp),
                ("updated_at", Timestamp),
                ("created_by", Utf8),
                ("updated_by", Utf8),
                ("deployment_id", Utf8),
                ("compilation_id", Utf8),
                ("creation_match", Boolean),
                ("creation_values", Json),
                ("creation_transformations", Json),
                ("runtime_match", Boolean),
                ("runtime_values", Json),
                ("runtime_transformations", Json),
            ]),
            100_000,
            10,
        ),
    ]
}
