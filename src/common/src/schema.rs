// Copyright 2024 Basalt Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Catalog contracts. The catalog itself is an external collaborator; the
//! engine only consumes these lookups.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::TypeRef;

pub type TableInfoRef = Arc<TableInfo>;
pub type ColumnInfoRef = Arc<ColumnInfo>;

/// Column id of the virtual `rowid` column present on every table.
pub const ROWID_COLUMN_ID: i32 = -2;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableInfo {
    pub db_id: i32,
    pub table_id: i32,
    pub name: String,
    pub fragments: usize,
}

impl TableInfo {
    /// Negative table ids address the temporary result-set registry and
    /// bypass the normal catalog path.
    pub fn is_temporary(&self) -> bool {
        self.table_id < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnInfo {
    pub db_id: i32,
    pub table_id: i32,
    pub column_id: i32,
    pub name: String,
    pub ty: TypeRef,
}

impl ColumnInfo {
    pub fn is_rowid(&self) -> bool {
        self.column_id == ROWID_COLUMN_ID
    }
}

/// External schema lookup capability.
pub trait SchemaProvider: Send + Sync {
    fn table_info(&self, db_id: i32, table_name: &str) -> Option<TableInfoRef>;

    fn table_info_by_id(&self, db_id: i32, table_id: i32) -> Option<TableInfoRef>;

    fn column_info(&self, table: &TableInfo, column_name: &str) -> Option<ColumnInfoRef>;

    /// All physical columns of `table`, in schema order, excluding `rowid`.
    fn table_columns(&self, table: &TableInfo) -> Vec<ColumnInfoRef>;
}

pub type SchemaProviderRef = Arc<dyn SchemaProvider>;

/// In-memory provider used by tests and by the temporary-table registry.
#[derive(Default)]
pub struct MemorySchemaProvider {
    inner: RwLock<MemorySchemaInner>,
}

#[derive(Default)]
struct MemorySchemaInner {
    tables: HashMap<(i32, String), TableInfoRef>,
    tables_by_id: HashMap<(i32, i32), TableInfoRef>,
    columns: HashMap<(i32, i32), Vec<ColumnInfoRef>>,
    next_table_id: i32,
}

impl MemorySchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(
        &self,
        db_id: i32,
        name: impl Into<String>,
        columns: Vec<(String, TypeRef)>,
    ) -> TableInfoRef {
        let mut inner = self.inner.write();
        inner.next_table_id += 1;
        let table_id = inner.next_table_id;
        let info = Arc::new(TableInfo {
            db_id,
            table_id,
            name: name.into(),
            fragments: 1,
        });
        let cols = columns
            .into_iter()
            .enumerate()
            .map(|(idx, (name, ty))| {
                Arc::new(ColumnInfo {
                    db_id,
                    table_id,
                    column_id: idx as i32 + 1,
                    name,
                    ty,
                })
            })
            .collect();
        inner
            .tables
            .insert((db_id, info.name.clone()), info.clone());
        inner.tables_by_id.insert((db_id, table_id), info.clone());
        inner.columns.insert((db_id, table_id), cols);
        info
    }
}

impl SchemaProvider for MemorySchemaProvider {
    fn table_info(&self, db_id: i32, table_name: &str) -> Option<TableInfoRef> {
        self.inner
            .read()
            .tables
            .get(&(db_id, table_name.to_owned()))
            .cloned()
    }

    fn table_info_by_id(&self, db_id: i32, table_id: i32) -> Option<TableInfoRef> {
        self.inner
            .read()
            .tables_by_id
            .get(&(db_id, table_id))
            .cloned()
    }

    fn column_info(&self, table: &TableInfo, column_name: &str) -> Option<ColumnInfoRef> {
        self.inner
            .read()
            .columns
            .get(&(table.db_id, table.table_id))?
            .iter()
            .find(|c| c.name == column_name)
            .cloned()
    }

    fn table_columns(&self, table: &TableInfo) -> Vec<ColumnInfoRef> {
        self.inner
            .read()
            .columns
            .get(&(table.db_id, table.table_id))
            .cloned()
            .unwrap_or_default()
    }
}
