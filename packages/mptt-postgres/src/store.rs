use std::sync::Arc;

use mptt_core::sql::{col, Dialect, SqlRenderer, Statement};
use mptt_core::{
    Error, NewRow, NodeId, NodeQuery, OrderValue, Result, TreeId, TreeNode, TreeOptions,
    TreeStore, TreeUpdate,
};
use postgres::types::Type;
use postgres::{Client, NoTls, Row};

use crate::params::{bind, refs};

const SCHEMA_LOCK_KEY: i64 = 0x6d70_7474; // "mptt"

/// Used by [`PgStore::ensure_schema`]. Mixed key types need a column type that
/// can hold them all, so ordered tables default to text keys.
const DEFAULT_ORDER_COLUMN_TYPE: &str = "TEXT";

fn storage_debug<E: std::fmt::Debug>(e: E) -> Error {
    Error::Storage(format!("{e:?}"))
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn decode_order(row: &Row, idx: usize) -> Result<OrderValue> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| v.map(|v| OrderValue::Int(v.into()))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| v.map(|v| OrderValue::Int(v.into()))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(OrderValue::Int)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(idx).map(|v| v.map(OrderValue::Text))
        }
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map(|v| v.map(OrderValue::Bytes)),
        _ => {
            return Err(Error::Storage(format!(
                "unsupported order column type {ty} at position {idx}"
            )))
        }
    };
    Ok(value.map_err(storage_debug)?.unwrap_or(OrderValue::Null))
}

fn decode_row(row: &Row, order_columns: usize) -> Result<TreeNode> {
    let int = |idx: usize| row.try_get::<_, i64>(idx).map_err(storage_debug);
    let order = (col::FIRST_ORDER..col::FIRST_ORDER + order_columns)
        .map(|idx| decode_order(row, idx))
        .collect::<Result<Vec<_>>>()?;
    Ok(TreeNode {
        id: NodeId(int(col::PK)?),
        parent: row
            .try_get::<_, Option<i64>>(col::PARENT)
            .map_err(storage_debug)?
            .map(NodeId),
        tree_id: int(col::TREE_ID)?,
        left: int(col::LEFT)?,
        right: int(col::RIGHT)?,
        level: int(col::LEVEL)?,
        order,
    })
}

/// [`TreeStore`] over one PostgreSQL table.
///
/// The store owns transaction control on its client: the outermost unit of
/// work is a transaction and nested units are savepoints. [`TreeStore::lock_tree`]
/// takes a transaction-scoped advisory lock on `(table, tree_id)`.
pub struct PgStore {
    client: Client,
    sql: SqlRenderer,
    depth: usize,
}

impl PgStore {
    /// Connect without TLS and create the table if needed.
    pub fn connect(url: &str, options: Arc<TreeOptions>) -> Result<Self> {
        let client = Client::connect(url, NoTls).map_err(storage_debug)?;
        let mut store = Self::new(client, options)?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Wrap an existing client without touching its schema.
    pub fn new(client: Client, options: Arc<TreeOptions>) -> Result<Self> {
        Ok(Self {
            client,
            sql: SqlRenderer::new(options, Dialect::Postgres)?,
            depth: 0,
        })
    }

    pub fn ensure_schema(&mut self) -> Result<()> {
        self.ensure_schema_with(DEFAULT_ORDER_COLUMN_TYPE)
    }

    /// Create the node table and its indexes, declaring order columns as
    /// `order_column_type`.
    pub fn ensure_schema_with(&mut self, order_column_type: &str) -> Result<()> {
        // Concurrent `CREATE TABLE IF NOT EXISTS` can still collide in the catalog.
        self.client
            .query_one("SELECT pg_advisory_lock($1)", &[&SCHEMA_LOCK_KEY])
            .map_err(storage_debug)?;
        let created = self
            .sql
            .create_table(order_column_type)
            .iter()
            .try_for_each(|ddl| self.client.batch_execute(ddl))
            .map_err(storage_debug);
        let unlocked = self
            .client
            .query_one("SELECT pg_advisory_unlock($1)", &[&SCHEMA_LOCK_KEY])
            .map_err(storage_debug);
        created?;
        unlocked.map(|_| ())
    }

    pub fn options(&self) -> &Arc<TreeOptions> {
        self.sql.options()
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }

    fn run(&mut self, stmt: &Statement) -> Result<u64> {
        let params = bind(&stmt.params);
        self.client
            .execute(stmt.sql.as_str(), &refs(&params))
            .map_err(storage_debug)
    }

    /// Keep the primary-key sequence ahead of explicitly supplied ids.
    fn bump_sequence(&mut self) -> Result<()> {
        let options = self.sql.options();
        let pk = quote(&options.pk_column);
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence($1, $2), (SELECT MAX({pk}) FROM {}))",
            quote(&options.table)
        );
        let table = quote(&options.table);
        let column = options.pk_column.clone();
        self.client
            .query_one(sql.as_str(), &[&table, &column])
            .map_err(storage_debug)?;
        Ok(())
    }
}

impl TreeStore for PgStore {
    fn execute(&mut self, update: &TreeUpdate) -> Result<u64> {
        let stmt = self.sql.update(update)?;
        self.run(&stmt)
    }

    fn max_tree_id(&mut self) -> Result<Option<TreeId>> {
        let stmt = self.sql.max_tree_id();
        let row = self
            .client
            .query_one(stmt.sql.as_str(), &[])
            .map_err(storage_debug)?;
        row.try_get::<_, Option<i64>>(0).map_err(storage_debug)
    }

    fn select(&mut self, query: &NodeQuery) -> Result<Vec<TreeNode>> {
        let stmt = self.sql.select(query);
        let order_columns = self.sql.order_columns();
        let params = bind(&stmt.params);
        let rows = self
            .client
            .query(stmt.sql.as_str(), &refs(&params))
            .map_err(storage_debug)?;
        rows.iter().map(|row| decode_row(row, order_columns)).collect()
    }

    fn insert(&mut self, row: &NewRow) -> Result<NodeId> {
        let stmt = self.sql.insert(row)?;
        let params = bind(&stmt.params);
        let id = self
            .client
            .query_one(stmt.sql.as_str(), &refs(&params))
            .and_then(|r| r.try_get::<_, i64>(0))
            .map_err(storage_debug)?;
        if row.id.is_some() {
            self.bump_sequence()?;
        }
        Ok(NodeId(id))
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
        let savepoint = format!("mptt_unit_{}", self.depth);
        let (begin, commit, rollback) = if self.depth == 0 {
            ("BEGIN".to_string(), "COMMIT".to_string(), "ROLLBACK".to_string())
        } else {
            (
                format!("SAVEPOINT {savepoint}"),
                format!("RELEASE SAVEPOINT {savepoint}"),
                format!("ROLLBACK TO SAVEPOINT {savepoint}; RELEASE SAVEPOINT {savepoint}"),
            )
        };

        self.client.batch_execute(&begin).map_err(storage_debug)?;
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;

        let result = match result {
            Ok(value) => match self.client.batch_execute(&commit) {
                Ok(()) => return Ok(value),
                Err(e) => Err(storage_debug(e)),
            },
            Err(err) => Err(err),
        };
        if let Err(e) = self.client.batch_execute(&rollback) {
            tracing::warn!(error = %e, unit = %savepoint, "rollback failed");
        }
        result
    }

    fn lock_tree(&mut self, tree_id: TreeId) -> Result<()> {
        let key = (tree_id % i64::from(i32::MAX)) as i32;
        self.client
            .query_one(
                "SELECT pg_advisory_xact_lock(hashtext($1), $2)",
                &[&self.sql.options().table, &key],
            )
            .map_err(storage_debug)?;
        Ok(())
    }
}
