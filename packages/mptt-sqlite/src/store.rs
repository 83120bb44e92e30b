use std::path::Path;
use std::sync::Arc;

use mptt_core::sql::{col, Dialect, SqlRenderer, SqlValue, Statement};
use mptt_core::{
    Error, NewRow, NodeId, NodeQuery, OrderValue, Result, TreeId, TreeNode, TreeOptions,
    TreeStore, TreeUpdate,
};
use rusqlite::types::{Type, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};

/// Order columns get BLOB (no) affinity so integers, text and blobs keep their
/// storage class instead of being coerced by the column type.
const ORDER_COLUMN_TYPE: &str = "BLOB";

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Int(v) => Value::Integer(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Bytes(v) => Value::Blob(v.clone()),
    }
}

fn decode_row(row: &Row<'_>, order_columns: usize) -> rusqlite::Result<TreeNode> {
    let mut order = Vec::with_capacity(order_columns);
    for idx in col::FIRST_ORDER..col::FIRST_ORDER + order_columns {
        order.push(match row.get_ref(idx)? {
            ValueRef::Null => OrderValue::Null,
            ValueRef::Integer(v) => OrderValue::Int(v),
            ValueRef::Text(v) => OrderValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => OrderValue::Bytes(v.to_vec()),
            ValueRef::Real(_) => {
                return Err(rusqlite::Error::InvalidColumnType(idx, String::new(), Type::Real))
            }
        });
    }
    Ok(TreeNode {
        id: NodeId(row.get(col::PK)?),
        parent: row.get::<_, Option<i64>>(col::PARENT)?.map(NodeId),
        tree_id: row.get(col::TREE_ID)?,
        left: row.get(col::LEFT)?,
        right: row.get(col::RIGHT)?,
        level: row.get(col::LEVEL)?,
        order,
    })
}

/// [`TreeStore`] over one table of a SQLite database.
///
/// The outermost unit of work runs as `BEGIN IMMEDIATE`, which takes the
/// database write lock up front; nested units become savepoints. When the
/// connection is already inside a caller's transaction every unit is a
/// savepoint and committing is left to the caller.
pub struct SqliteStore {
    conn: Connection,
    sql: SqlRenderer,
    depth: usize,
}

impl SqliteStore {
    pub fn new_in_memory(options: Arc<TreeOptions>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        let mut store = Self::from_connection(conn, options)?;
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open(path: impl AsRef<Path>, options: Arc<TreeOptions>) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        let mut store = Self::from_connection(conn, options)?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Wrap an existing connection without touching its schema.
    pub fn from_connection(conn: Connection, options: Arc<TreeOptions>) -> Result<Self> {
        Ok(Self {
            conn,
            sql: SqlRenderer::new(options, Dialect::Sqlite)?,
            depth: 0,
        })
    }

    /// Create the node table and its indexes if they do not exist.
    pub fn ensure_schema(&mut self) -> Result<()> {
        for ddl in self.sql.create_table(ORDER_COLUMN_TYPE) {
            self.conn.execute_batch(&ddl).map_err(storage_err)?;
        }
        Ok(())
    }

    pub fn options(&self) -> &Arc<TreeOptions> {
        self.sql.options()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn run(&self, stmt: &Statement) -> Result<u64> {
        let changed = self
            .conn
            .execute(&stmt.sql, params_from_iter(stmt.params.iter().map(to_value)))
            .map_err(storage_err)?;
        Ok(changed as u64)
    }
}

impl TreeStore for SqliteStore {
    fn execute(&mut self, update: &TreeUpdate) -> Result<u64> {
        let stmt = self.sql.update(update)?;
        self.run(&stmt)
    }

    fn max_tree_id(&mut self) -> Result<Option<TreeId>> {
        let stmt = self.sql.max_tree_id();
        self.conn
            .query_row(&stmt.sql, [], |row| row.get::<_, Option<i64>>(0))
            .map_err(storage_err)
    }

    fn select(&mut self, query: &NodeQuery) -> Result<Vec<TreeNode>> {
        let stmt = self.sql.select(query);
        let order_columns = self.sql.order_columns();
        let mut prepared = self.conn.prepare_cached(&stmt.sql).map_err(storage_err)?;
        let rows = prepared
            .query_map(params_from_iter(stmt.params.iter().map(to_value)), |row| {
                decode_row(row, order_columns)
            })
            .map_err(storage_err)?;
        let nodes = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)?;
        Ok(nodes)
    }

    fn insert(&mut self, row: &NewRow) -> Result<NodeId> {
        let stmt = self.sql.insert(row)?;
        self.conn
            .query_row(
                &stmt.sql,
                params_from_iter(stmt.params.iter().map(to_value)),
                |r| r.get::<_, i64>(0),
            )
            .map(NodeId)
            .map_err(storage_err)
    }

    fn delete_range(&mut self, tree_id: TreeId, left: i64, right: i64) -> Result<u64> {
        let stmt = self.sql.delete_range(tree_id, left, right);
        self.run(&stmt)
    }

    fn delete_nodes(&mut self, ids: &[NodeId]) -> Result<u64> {
        let stmt = self.sql.delete_nodes(ids);
        self.run(&stmt)
    }

    fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let transaction = self.depth == 0 && self.conn.is_autocommit();
        let savepoint = format!("mptt_unit_{}", self.depth);
        let (begin, commit, rollback) = if transaction {
            ("BEGIN IMMEDIATE".to_string(), "COMMIT".to_string(), "ROLLBACK".to_string())
        } else {
            (
                format!("SAVEPOINT {savepoint}"),
                format!("RELEASE {savepoint}"),
                format!("ROLLBACK TO {savepoint}; RELEASE {savepoint}"),
            )
        };

        self.conn.execute_batch(&begin).map_err(storage_err)?;
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;

        let result = match result {
            Ok(value) => match self.conn.execute_batch(&commit) {
                Ok(()) => return Ok(value),
                Err(e) => Err(storage_err(e)),
            },
            Err(err) => Err(err),
        };
        if let Err(e) = self.conn.execute_batch(&rollback) {
            tracing::warn!(error = %e, unit = %savepoint, "rollback failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new_in_memory(Arc::new(TreeOptions::new("genre"))).unwrap()
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let mut store = store();
        store.ensure_schema().unwrap();
        assert_eq!(store.max_tree_id().unwrap(), None);
    }

    #[test]
    fn units_nest_as_savepoints() {
        let mut store = store();
        store
            .atomic(|s| {
                assert!(!s.connection().is_autocommit());
                s.insert(&NewRow {
                    id: Some(NodeId(1)),
                    parent: None,
                    tree_id: 1,
                    left: 1,
                    right: 2,
                    level: 0,
                    order: Vec::new(),
                })?;
                let inner: Result<()> = s.atomic(|s| {
                    s.delete_nodes(&[NodeId(1)])?;
                    Err(Error::Storage("abort".into()))
                });
                assert!(inner.is_err());
                Ok(())
            })
            .unwrap();
        assert!(store.connection().is_autocommit());
        assert_eq!(store.select(&NodeQuery::all()).unwrap().len(), 1);
    }

    #[test]
    fn real_order_values_are_rejected() {
        let options = TreeOptions::new("scored")
            .order_insertion_by([mptt_core::OrderField::asc("score")]);
        let mut store = SqliteStore::new_in_memory(Arc::new(options)).unwrap();
        store
            .connection()
            .execute_batch(
                "INSERT INTO \"scored\" (\"id\", \"parent_id\", \"tree_id\", \"lft\", \"rght\", \"level\", \"score\") \
                 VALUES (1, NULL, 1, 1, 2, 0, 1.5)",
            )
            .unwrap();
        assert!(matches!(store.select(&NodeQuery::all()), Err(Error::Storage(_))));
    }
}
