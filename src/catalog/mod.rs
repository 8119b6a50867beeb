use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::common::{QuarryError, Result, TableId};
use crate::storage::heap::HeapFile;
use crate::tuple::{DataType, Schema, SchemaBuilder};

/// A registered table
struct TableInfo {
    file: Arc<HeapFile>,
    name: String,
    primary_key: String,
}

#[derive(Default)]
struct CatalogState {
    tables: HashMap<TableId, TableInfo>,
    names: HashMap<String, TableId>,
}

/// Catalog maps table ids and names to the heap files storing them.
///
/// Names and ids are kept one-to-one: registering a table under a name that
/// is already taken replaces the earlier table, and re-registering a file
/// under a new name drops its old name.
#[derive(Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a heap file under `name`. `primary_key` may be empty.
    /// Returns the table id, which is the file's id.
    pub fn add_table(
        &self,
        file: HeapFile,
        name: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> TableId {
        let name = name.into();
        let id = file.table_id();
        let mut state = self.state.write();

        if let Some(old) = state.names.insert(name.clone(), id) {
            if old != id {
                state.tables.remove(&old);
            }
        }
        let replaced = state.tables.insert(
            id,
            TableInfo {
                file: Arc::new(file),
                name: name.clone(),
                primary_key: primary_key.into(),
            },
        );
        if let Some(prev) = replaced {
            if prev.name != name {
                state.names.remove(&prev.name);
            }
        }
        id
    }

    /// Returns the id of the table called `name`.
    pub fn table_id(&self, name: &str) -> Result<TableId> {
        self.state
            .read()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| QuarryError::TableNameNotFound(name.to_string()))
    }

    /// Returns the heap file backing the table.
    pub fn heap_file(&self, id: TableId) -> Result<Arc<HeapFile>> {
        self.with_table(id, |t| Arc::clone(&t.file))
    }

    /// Returns the schema of the table.
    pub fn schema(&self, id: TableId) -> Result<Arc<Schema>> {
        self.with_table(id, |t| Arc::clone(t.file.schema()))
    }

    /// Returns the primary key column name, empty if none was declared.
    pub fn primary_key(&self, id: TableId) -> Result<String> {
        self.with_table(id, |t| t.primary_key.clone())
    }

    pub fn table_name(&self, id: TableId) -> Result<String> {
        self.with_table(id, |t| t.name.clone())
    }

    /// Returns the ids of all registered tables, sorted.
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.state.read().tables.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Forgets every table.
    pub fn clear(&self) {
        *self.state.write() = CatalogState::default();
    }

    fn with_table<T>(&self, id: TableId, f: impl FnOnce(&TableInfo) -> T) -> Result<T> {
        self.state
            .read()
            .tables
            .get(&id)
            .map(f)
            .ok_or(QuarryError::TableNotFound(id))
    }

    /// Loads table definitions from a catalog file and registers them.
    ///
    /// Each non-blank line reads `name (field type [pk], ...)` where `type`
    /// is `int` or `string`. Table `name` is stored in `name.dat` next to the
    /// catalog file, created if missing. Returns the ids in file order.
    pub fn load_schema<P: AsRef<Path>>(&self, path: P) -> Result<Vec<TableId>> {
        let path = path.as_ref();
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let text = fs::read_to_string(path)?;

        let mut ids = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let def = parse_table_line(line).map_err(|reason| QuarryError::InvalidCatalog {
                line: idx + 1,
                reason,
            })?;

            let schema = Arc::new(def.schema);
            let file = HeapFile::open(base.join(format!("{}.dat", def.name)), schema.clone())?;
            let id = self.add_table(file, def.name.clone(), def.primary_key);
            info!(table = %def.name, %id, %schema, "added table");
            ids.push(id);
        }
        Ok(ids)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_map()
            .entries(state.tables.iter().map(|(id, t)| (id, &t.name)))
            .finish()
    }
}

struct TableDef {
    name: String,
    schema: Schema,
    primary_key: String,
}

fn parse_table_line(line: &str) -> std::result::Result<TableDef, String> {
    let open = line.find('(').ok_or("missing '('")?;
    let close = line.rfind(')').ok_or("missing ')'")?;
    if close < open {
        return Err("')' before '('".into());
    }

    let name = line[..open].trim();
    if name.is_empty() {
        return Err("missing table name".into());
    }

    let mut builder = SchemaBuilder::new();
    let mut primary_key = String::new();
    for field in line[open + 1..close].split(',') {
        let parts: Vec<&str> = field.split_whitespace().collect();
        let (column, type_name, annotation) = match parts.as_slice() {
            [column, type_name] => (*column, *type_name, None),
            [column, type_name, annotation] => (*column, *type_name, Some(*annotation)),
            _ => return Err(format!("malformed field '{}'", field.trim())),
        };

        let data_type =
            DataType::parse(type_name).ok_or_else(|| format!("unknown type '{}'", type_name))?;
        match annotation {
            None => {}
            Some("pk") => primary_key = column.to_string(),
            Some(other) => return Err(format!("unknown annotation '{}'", other)),
        }
        builder = builder.column(column, data_type);
    }

    Ok(TableDef {
        name: name.to_string(),
        schema: builder.build(),
        primary_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn int_schema() -> Arc<Schema> {
        Arc::new(Schema::from_types(&[DataType::Integer]))
    }

    #[test]
    fn test_add_and_lookup() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        let file = HeapFile::open(dir.path().join("a.dat"), int_schema()).unwrap();
        let expected = file.table_id();

        let id = catalog.add_table(file, "a", "x");
        assert_eq!(id, expected);
        assert_eq!(catalog.table_id("a").unwrap(), id);
        assert_eq!(catalog.table_name(id).unwrap(), "a");
        assert_eq!(catalog.primary_key(id).unwrap(), "x");
        assert_eq!(*catalog.schema(id).unwrap(), *int_schema());
        assert_eq!(catalog.heap_file(id).unwrap().table_id(), id);
        assert_eq!(catalog.table_ids(), vec![id]);
    }

    #[test]
    fn test_missing_table() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.table_id("nope"),
            Err(QuarryError::TableNameNotFound(_))
        ));
        assert!(matches!(
            catalog.heap_file(TableId::new(1)),
            Err(QuarryError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_same_name_replaces() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        let first = catalog.add_table(
            HeapFile::open(dir.path().join("1.dat"), int_schema()).unwrap(),
            "t",
            "",
        );
        let second = catalog.add_table(
            HeapFile::open(dir.path().join("2.dat"), int_schema()).unwrap(),
            "t",
            "",
        );

        assert_eq!(catalog.table_id("t").unwrap(), second);
        assert!(catalog.heap_file(first).is_err());
        assert_eq!(catalog.table_ids(), vec![second]);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new();
        catalog.add_table(
            HeapFile::open(dir.path().join("a.dat"), int_schema()).unwrap(),
            "a",
            "",
        );
        catalog.clear();
        assert!(catalog.table_ids().is_empty());
        assert!(catalog.table_id("a").is_err());
    }

    #[test]
    fn test_parse_table_line() {
        let def = parse_table_line("users (id int pk, name string, age INT)").unwrap();
        assert_eq!(def.name, "users");
        assert_eq!(def.primary_key, "id");
        assert_eq!(def.schema.column_count(), 3);
        assert_eq!(def.schema.column_index("age"), Some(2));
        assert_eq!(
            *def.schema.column(1).unwrap().data_type(),
            DataType::String(crate::common::STRING_LEN)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_table_line("users id int").is_err());
        assert!(parse_table_line("(id int)").is_err());
        assert!(parse_table_line("t (id float)").is_err());
        assert!(parse_table_line("t (id int key)").is_err());
        assert!(parse_table_line("t (id)").is_err());
    }

    #[test]
    fn test_load_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.txt");
        fs::write(&path, "a (x int pk, y int)\n\nb (s string)\n").unwrap();

        let catalog = Catalog::new();
        let ids = catalog.load_schema(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(catalog.table_id("a").unwrap(), ids[0]);
        assert_eq!(catalog.primary_key(ids[0]).unwrap(), "x");
        assert_eq!(catalog.primary_key(ids[1]).unwrap(), "");
        assert!(dir.path().join("b.dat").exists());
    }

    #[test]
    fn test_load_schema_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.txt");
        fs::write(&path, "a (x int)\nb (y blob)\n").unwrap();

        let err = Catalog::new().load_schema(&path).unwrap_err();
        assert!(matches!(err, QuarryError::InvalidCatalog { line: 2, .. }));
    }
}
