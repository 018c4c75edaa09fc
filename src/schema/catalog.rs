//! Data dictionary: table and index metadata with a soft byte budget, plus
//! the line-oriented bootstrap files under `<root>/meta/`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::common::errors::{DbError, DbResult};
use crate::common::{ColumnDefinition, ColumnType};
use crate::index::IndexDefinition;
use crate::schema::TableSchema;

const TABLE_ENTRY_BYTES: usize = 128;
const COLUMN_ENTRY_BYTES: usize = 64;
const INDEX_ENTRY_BYTES: usize = 96;

#[derive(Debug, Clone)]
struct TableInfo {
    schema: TableSchema,
    record_count: usize,
    block_count: usize,
}

#[derive(Debug, Clone)]
struct IndexInfo {
    definition: IndexDefinition,
    entries_per_page: usize,
}

/// Catalog of registered tables and indexes. Usage is tracked against a
/// capacity budget; overflow is flagged but never rejected.
#[derive(Debug)]
pub struct DataDictionary {
    capacity_bytes: usize,
    used_bytes: usize,
    overflowed: bool,
    tables: BTreeMap<String, TableInfo>,
    indexes: BTreeMap<String, IndexInfo>,
}

impl DataDictionary {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            used_bytes: 0,
            overflowed: false,
            tables: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn register_table(&mut self, schema: TableSchema) {
        self.tables.insert(
            schema.name().to_string(),
            TableInfo {
                schema,
                record_count: 0,
                block_count: 0,
            },
        );
        self.recalc_bytes();
    }

    pub fn register_index(&mut self, definition: IndexDefinition, entries_per_page: usize) {
        self.indexes.insert(
            definition.name.clone(),
            IndexInfo {
                definition,
                entries_per_page,
            },
        );
        self.recalc_bytes();
    }

    pub fn drop_index(&mut self, index_name: &str) {
        self.indexes.remove(index_name);
        self.recalc_bytes();
    }

    pub fn update_table_stats(&mut self, table_name: &str, records: usize, blocks: usize) {
        if let Some(info) = self.tables.get_mut(table_name) {
            info.record_count = records;
            info.block_count = blocks;
        }
    }

    pub fn table_schema(&self, table_name: &str) -> Option<&TableSchema> {
        self.tables.get(table_name).map(|info| &info.schema)
    }

    pub fn has_table(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    fn recalc_bytes(&mut self) {
        self.used_bytes = 0;
        for info in self.tables.values() {
            self.used_bytes += TABLE_ENTRY_BYTES;
            self.used_bytes += info.schema.columns().len() * COLUMN_ENTRY_BYTES;
        }
        self.used_bytes += self.indexes.len() * INDEX_ENTRY_BYTES;
        if self.used_bytes > self.capacity_bytes {
            self.overflowed = true;
        }
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "Data dictionary usage: {} / {} bytes\n",
            self.used_bytes, self.capacity_bytes
        );
        for info in self.tables.values() {
            out.push_str(&format!(
                "  * {} -> {} records in {} blocks\n",
                info.schema.name(),
                info.record_count,
                info.block_count
            ));
        }
        if !self.indexes.is_empty() {
            out.push_str(&format!(
                "Index catalog ({} index(es)):\n",
                self.indexes.len()
            ));
            for info in self.indexes.values() {
                out.push_str(&format!(
                    "  * {} ON {}({}) -> {} entry/entries per page\n",
                    info.definition.name,
                    info.definition.table_name,
                    info.definition.column_name,
                    info.entries_per_page
                ));
            }
        }
        out
    }

    pub fn describe_tables(&self) -> Vec<String> {
        self.tables
            .values()
            .map(|info| {
                format!(
                    "SYS_TABLES | {} | columns={} | recordSize={}",
                    info.schema.name(),
                    info.schema.columns().len(),
                    info.schema.record_size()
                )
            })
            .collect()
    }

    pub fn describe_index_catalog(&self) -> Vec<String> {
        if self.indexes.is_empty() {
            return vec!["SYS_INDEXES | [empty]".to_string()];
        }
        self.indexes
            .values()
            .map(|info| {
                format!(
                    "SYS_INDEXES | {} | table={} | column={} | entries/page={}",
                    info.definition.name,
                    info.definition.table_name,
                    info.definition.column_name,
                    info.entries_per_page
                )
            })
            .collect()
    }
}

/// Parses `indexes.meta`: one `name|table|column|columnIndex|keyLength|unique`
/// definition per line. Missing files yield an empty list.
pub fn load_index_catalog(path: impl AsRef<Path>) -> DbResult<Vec<IndexDefinition>> {
    let Ok(file) = File::open(path.as_ref()) else {
        return Ok(Vec::new());
    };
    let mut definitions = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 6 {
            continue;
        }
        let column_index = parts[3]
            .parse()
            .map_err(|_| DbError::Corrupted("bad column index in indexes.meta".into()))?;
        let key_length = parts[4]
            .parse()
            .map_err(|_| DbError::Corrupted("bad key length in indexes.meta".into()))?;
        definitions.push(IndexDefinition {
            name: parts[0].to_string(),
            table_name: parts[1].to_string(),
            column_name: parts[2].to_string(),
            column_index,
            key_length,
            unique: parts[5] == "1",
        });
    }
    Ok(definitions)
}

pub fn persist_index_catalog(
    path: impl AsRef<Path>,
    definitions: &[IndexDefinition],
) -> DbResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    for def in definitions {
        writeln!(
            file,
            "{}|{}|{}|{}|{}|{}",
            def.name,
            def.table_name,
            def.column_name,
            def.column_index,
            def.key_length,
            if def.unique { 1 } else { 0 }
        )?;
    }
    file.sync_all()?;
    Ok(())
}

/// Parses `schemas.meta`: one `name|col:type:length,…` table per line.
pub fn load_schemas(path: impl AsRef<Path>) -> DbResult<Vec<TableSchema>> {
    let Ok(file) = File::open(path.as_ref()) else {
        return Ok(Vec::new());
    };
    let mut schemas = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, column_list)) = line.split_once('|') else {
            continue;
        };
        let mut columns = Vec::new();
        for column_spec in column_list.split(',') {
            let fields: Vec<&str> = column_spec.split(':').collect();
            if fields.len() != 3 {
                return Err(DbError::Corrupted(format!(
                    "bad column spec '{}' in schemas.meta",
                    column_spec
                )));
            }
            let column_type = ColumnType::parse_keyword(fields[1]).ok_or_else(|| {
                DbError::Corrupted(format!("unknown column type '{}'", fields[1]))
            })?;
            let max_length = fields[2]
                .parse()
                .map_err(|_| DbError::Corrupted("bad column length in schemas.meta".into()))?;
            columns.push(ColumnDefinition::new(fields[0], column_type, max_length));
        }
        schemas.push(TableSchema::new(name, columns)?);
    }
    Ok(schemas)
}

pub fn persist_schemas(path: impl AsRef<Path>, schemas: &[&TableSchema]) -> DbResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    for schema in schemas {
        let columns = schema
            .columns()
            .iter()
            .map(|c| format!("{}:{}:{}", c.name, c.column_type.keyword(), c.max_length))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(file, "{}|{}", schema.name(), columns)?;
    }
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer, 16),
                ColumnDefinition::new("name", ColumnType::String, 64),
            ],
        )
        .unwrap()
    }

    fn sample_index() -> IndexDefinition {
        IndexDefinition {
            name: "idx_users_id".into(),
            table_name: "users".into(),
            column_name: "id".into(),
            column_index: 0,
            key_length: 16,
            unique: true,
        }
    }

    #[test]
    fn tracks_usage_and_flags_overflow() {
        let mut dict = DataDictionary::new(200);
        dict.register_table(users_schema());
        assert_eq!(dict.used_bytes(), 128 + 2 * 64);
        assert!(dict.overflowed());
        // Overflow is flagged, not rejected.
        assert!(dict.has_table("users"));
    }

    #[test]
    fn stats_and_describes() {
        let mut dict = DataDictionary::new(4096);
        dict.register_table(users_schema());
        dict.register_index(sample_index(), 12);
        dict.update_table_stats("users", 42, 3);
        let text = dict.describe();
        assert!(text.contains("users -> 42 records in 3 blocks"));
        assert!(text.contains("idx_users_id ON users(id)"));
        assert_eq!(dict.describe_tables().len(), 1);
        assert_eq!(dict.describe_index_catalog().len(), 1);
        dict.drop_index("idx_users_id");
        assert_eq!(
            dict.describe_index_catalog(),
            vec!["SYS_INDEXES | [empty]".to_string()]
        );
    }

    #[test]
    fn index_catalog_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/indexes.meta");
        let defs = vec![sample_index()];
        persist_index_catalog(&path, &defs).unwrap();
        let loaded = load_index_catalog(&path).unwrap();
        assert_eq!(loaded, defs);
    }

    #[test]
    fn schemas_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/schemas.meta");
        let schema = users_schema();
        persist_schemas(&path, &[&schema]).unwrap();
        let loaded = load_schemas(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], schema);
    }

    #[test]
    fn missing_meta_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_index_catalog(dir.path().join("nope")).unwrap().is_empty());
        assert!(load_schemas(dir.path().join("nope")).unwrap().is_empty());
    }
}
