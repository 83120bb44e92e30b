//! SQL rendering for relational stores.
//!
//! Each [`TreeUpdate`] becomes exactly one parameterized `UPDATE` whose `CASE`
//! arms are evaluated against the row's old values, so a store only needs to
//! run the statement inside its transaction. Identifiers come from validated
//! [`TreeOptions`] and are always double-quoted.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ids::{NodeId, TreeId};
use crate::interval::TreeUpdate;
use crate::node::OrderValue;
use crate::options::TreeOptions;
use crate::traits::{NewRow, NodeQuery, ParentFilter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// `?1`, `?2`, ...
    Sqlite,
    /// `$1`, `$2`, ...
    Postgres,
}

impl Dialect {
    fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{n}"),
            Dialect::Postgres => format!("${n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<NodeId> for SqlValue {
    fn from(value: NodeId) -> Self {
        SqlValue::Int(value.0)
    }
}

impl From<Option<NodeId>> for SqlValue {
    fn from(value: Option<NodeId>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

impl From<&OrderValue> for SqlValue {
    fn from(value: &OrderValue) -> Self {
        match value {
            OrderValue::Null => SqlValue::Null,
            OrderValue::Int(v) => SqlValue::Int(*v),
            OrderValue::Text(v) => SqlValue::Text(v.clone()),
            OrderValue::Bytes(v) => SqlValue::Bytes(v.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Column positions in every rendered `SELECT`. Order-key columns follow `LEVEL`.
pub mod col {
    pub const PK: usize = 0;
    pub const PARENT: usize = 1;
    pub const TREE_ID: usize = 2;
    pub const LEFT: usize = 3;
    pub const RIGHT: usize = 4;
    pub const LEVEL: usize = 5;
    pub const FIRST_ORDER: usize = 6;
}

struct Quoted {
    table: String,
    pk: String,
    parent: String,
    tree_id: String,
    left: String,
    right: String,
    level: String,
    order: Vec<String>,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Renders statements for one schema mapping in one placeholder dialect.
pub struct SqlRenderer {
    options: Arc<TreeOptions>,
    dialect: Dialect,
    q: Quoted,
}

/// Accumulates parameters and hands out their placeholders.
struct Params {
    dialect: Dialect,
    values: Vec<SqlValue>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        self.values.push(value.into());
        self.dialect.placeholder(self.values.len())
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.values,
        }
    }
}

impl SqlRenderer {
    pub fn new(options: Arc<TreeOptions>, dialect: Dialect) -> Result<Self> {
        options.validate()?;
        let q = Quoted {
            table: quote(&options.table),
            pk: quote(&options.pk_column),
            parent: quote(&options.parent_column),
            tree_id: quote(&options.tree_id_column),
            left: quote(&options.left_column),
            right: quote(&options.right_column),
            level: quote(&options.level_column),
            order: options
                .order_insertion_by
                .iter()
                .map(|f| quote(&f.column))
                .collect(),
        };
        Ok(Self {
            options,
            dialect,
            q,
        })
    }

    pub fn options(&self) -> &Arc<TreeOptions> {
        &self.options
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn order_columns(&self) -> usize {
        self.q.order.len()
    }

    /// `CREATE TABLE IF NOT EXISTS` plus the `(tree_id, left)` and parent indexes.
    pub fn create_table(&self, order_column_type: &str) -> Vec<String> {
        let q = &self.q;
        let pk = match self.dialect {
            Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY", q.pk),
            Dialect::Postgres => format!("{} BIGSERIAL PRIMARY KEY", q.pk),
        };
        let mut columns = vec![
            pk,
            format!("{} BIGINT NULL", q.parent),
            format!("{} BIGINT NOT NULL", q.tree_id),
            format!("{} BIGINT NOT NULL", q.left),
            format!("{} BIGINT NOT NULL", q.right),
            format!("{} BIGINT NOT NULL", q.level),
        ];
        columns.extend(q.order.iter().map(|c| format!("{c} {order_column_type} NULL")));
        let table = &self.options.table;
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                q.table,
                columns.join(", ")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {})",
                quote(&format!("{table}_tree_left")),
                q.table,
                q.tree_id,
                q.left
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("{table}_parent")),
                q.table,
                q.parent
            ),
        ]
    }

    pub fn update(&self, update: &TreeUpdate) -> Result<Statement> {
        let q = &self.q;
        let mut p = Params::new(self.dialect);
        let sql = match update {
            TreeUpdate::ManageSpace {
                tree_id,
                target,
                size,
            } => {
                let target = p.bind(*target);
                let size = p.bind(*size);
                let tree_id = p.bind(*tree_id);
                format!(
                    "UPDATE {t} SET \
                     {l} = CASE WHEN {l} > {target} THEN {l} + {size} ELSE {l} END, \
                     {r} = CASE WHEN {r} > {target} THEN {r} + {size} ELSE {r} END \
                     WHERE {tid} = {tree_id} AND ({l} > {target} OR {r} > {target})",
                    t = q.table,
                    l = q.left,
                    r = q.right,
                    tid = q.tree_id,
                )
            }
            TreeUpdate::InterTreeMove {
                tree_id,
                left,
                right,
                level_change,
                left_right_change,
                new_tree_id,
                gap_target_left,
                gap_size,
                node,
                new_parent,
            } => {
                let lo = p.bind(*left);
                let hi = p.bind(*right);
                let level_change = p.bind(*level_change);
                let new_tree_id = p.bind(*new_tree_id);
                let shift = p.bind(*left_right_change);
                let gap_target = p.bind(*gap_target_left);
                let gap = p.bind(*gap_size);
                let node = p.bind(*node);
                let new_parent = p.bind(*new_parent);
                let tree_id = p.bind(*tree_id);
                format!(
                    "UPDATE {t} SET \
                     {lvl} = CASE WHEN {l} >= {lo} AND {l} <= {hi} THEN {lvl} - {level_change} ELSE {lvl} END, \
                     {tid} = CASE WHEN {l} >= {lo} AND {l} <= {hi} THEN {new_tree_id} ELSE {tid} END, \
                     {l} = CASE WHEN {l} >= {lo} AND {l} <= {hi} THEN {l} - {shift} \
                     WHEN {l} > {gap_target} THEN {l} - {gap} ELSE {l} END, \
                     {r} = CASE WHEN {r} >= {lo} AND {r} <= {hi} THEN {r} - {shift} \
                     WHEN {r} > {gap_target} THEN {r} - {gap} ELSE {r} END, \
                     {par} = CASE WHEN {pk} = {node} THEN {new_parent} ELSE {par} END \
                     WHERE {tid} = {tree_id}",
                    t = q.table,
                    l = q.left,
                    r = q.right,
                    lvl = q.level,
                    tid = q.tree_id,
                    par = q.parent,
                    pk = q.pk,
                )
            }
            TreeUpdate::MoveSubtree {
                tree_id,
                left,
                right,
                level_change,
                left_right_change,
                left_boundary,
                right_boundary,
                gap_size,
                node,
                new_parent,
            } => {
                let lo = p.bind(*left);
                let hi = p.bind(*right);
                let level_change = p.bind(*level_change);
                let shift = p.bind(*left_right_change);
                let lb = p.bind(*left_boundary);
                let rb = p.bind(*right_boundary);
                let gap = p.bind(*gap_size);
                let node = p.bind(*node);
                let new_parent = p.bind(*new_parent);
                let tree_id = p.bind(*tree_id);
                format!(
                    "UPDATE {t} SET \
                     {lvl} = CASE WHEN {l} >= {lo} AND {l} <= {hi} THEN {lvl} - {level_change} ELSE {lvl} END, \
                     {l} = CASE WHEN {l} >= {lo} AND {l} <= {hi} THEN {l} + {shift} \
                     WHEN {l} >= {lb} AND {l} <= {rb} THEN {l} + {gap} ELSE {l} END, \
                     {r} = CASE WHEN {r} >= {lo} AND {r} <= {hi} THEN {r} + {shift} \
                     WHEN {r} >= {lb} AND {r} <= {rb} THEN {r} + {gap} ELSE {r} END, \
                     {par} = CASE WHEN {pk} = {node} THEN {new_parent} ELSE {par} END \
                     WHERE {tid} = {tree_id}",
                    t = q.table,
                    l = q.left,
                    r = q.right,
                    lvl = q.level,
                    tid = q.tree_id,
                    par = q.parent,
                    pk = q.pk,
                )
            }
            TreeUpdate::MoveTree {
                tree_id,
                left,
                right,
                level_change,
                left_right_change,
                new_tree_id,
                node,
                new_parent,
            } => {
                let level_change = p.bind(*level_change);
                let shift = p.bind(*left_right_change);
                let new_tree_id = p.bind(*new_tree_id);
                let node = p.bind(*node);
                let new_parent = p.bind(*new_parent);
                let lo = p.bind(*left);
                let hi = p.bind(*right);
                let tree_id = p.bind(*tree_id);
                format!(
                    "UPDATE {t} SET \
                     {lvl} = {lvl} - {level_change}, \
                     {l} = {l} - {shift}, \
                     {r} = {r} - {shift}, \
                     {tid} = {new_tree_id}, \
                     {par} = CASE WHEN {pk} = {node} THEN {new_parent} ELSE {par} END \
                     WHERE {l} >= {lo} AND {l} <= {hi} AND {tid} = {tree_id}",
                    t = q.table,
                    l = q.left,
                    r = q.right,
                    lvl = q.level,
                    tid = q.tree_id,
                    par = q.parent,
                    pk = q.pk,
                )
            }
            TreeUpdate::SetTreeFields {
                node,
                parent,
                tree_id,
                left,
                right,
                level,
            } => {
                let parent = p.bind(*parent);
                let tree_id = p.bind(*tree_id);
                let left = p.bind(*left);
                let right = p.bind(*right);
                let level = p.bind(*level);
                let node = p.bind(*node);
                format!(
                    "UPDATE {} SET {} = {parent}, {} = {tree_id}, {} = {left}, {} = {right}, {} = {level} \
                     WHERE {} = {node}",
                    q.table, q.parent, q.tree_id, q.left, q.right, q.level, q.pk
                )
            }
            TreeUpdate::SetOrder { node, values } => {
                if values.len() != q.order.len() || values.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "{} order values given for {} order_insertion_by columns",
                        values.len(),
                        q.order.len()
                    )));
                }
                let sets: Vec<String> = q
                    .order
                    .iter()
                    .zip(values)
                    .map(|(column, value)| format!("{column} = {}", p.bind(value)))
                    .collect();
                let node = p.bind(*node);
                format!("UPDATE {} SET {} WHERE {} = {node}", q.table, sets.join(", "), q.pk)
            }
        };
        Ok(p.finish(sql))
    }

    fn columns(&self) -> String {
        let q = &self.q;
        let mut columns = vec![
            q.pk.as_str(),
            q.parent.as_str(),
            q.tree_id.as_str(),
            q.left.as_str(),
            q.right.as_str(),
            q.level.as_str(),
        ];
        columns.extend(q.order.iter().map(String::as_str));
        columns.join(", ")
    }

    fn in_list(p: &mut Params, column: &str, ids: &[NodeId]) -> String {
        if ids.is_empty() {
            return "1 = 0".to_string();
        }
        let placeholders: Vec<String> = ids.iter().map(|id| p.bind(*id)).collect();
        format!("{column} IN ({})", placeholders.join(", "))
    }

    pub fn select(&self, query: &NodeQuery) -> Statement {
        let q = &self.q;
        let mut p = Params::new(self.dialect);
        let mut filters = Vec::new();
        if let Some(ids) = &query.ids {
            filters.push(Self::in_list(&mut p, &q.pk, ids));
        }
        if let Some(tree_id) = query.tree_id {
            filters.push(format!("{} = {}", q.tree_id, p.bind(tree_id)));
        }
        match &query.parent {
            ParentFilter::Any => {}
            ParentFilter::Root => filters.push(format!("{} IS NULL", q.parent)),
            ParentFilter::Of(parent) => filters.push(format!("{} = {}", q.parent, p.bind(*parent))),
            ParentFilter::In(parents) => filters.push(Self::in_list(&mut p, &q.parent, parents)),
        }
        for (column, min, max) in [
            (&q.left, query.left_min, query.left_max),
            (&q.right, query.right_min, query.right_max),
        ] {
            if let Some(min) = min {
                filters.push(format!("{column} >= {}", p.bind(min)));
            }
            if let Some(max) = max {
                filters.push(format!("{column} <= {}", p.bind(max)));
            }
        }
        if let Some(exclude) = query.exclude {
            filters.push(format!("{} <> {}", q.pk, p.bind(exclude)));
        }
        if query.leaves_only {
            filters.push(format!("{} = {} + 1", q.right, q.left));
        }

        let mut sql = format!("SELECT {} FROM {}", self.columns(), q.table);
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }
        let direction = if query.descending { " DESC" } else { "" };
        sql.push_str(&format!(
            " ORDER BY {}{direction}, {}{direction}, {}{direction}",
            q.tree_id, q.left, q.pk
        ));
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        p.finish(sql)
    }

    pub fn insert(&self, row: &NewRow) -> Result<Statement> {
        let q = &self.q;
        if row.order.len() > q.order.len() {
            return Err(Error::InvalidConfig(format!(
                "{} order values given for {} order_insertion_by columns",
                row.order.len(),
                q.order.len()
            )));
        }
        let mut p = Params::new(self.dialect);
        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = row.id {
            columns.push(q.pk.as_str());
            values.push(p.bind(id));
        }
        for (column, value) in [
            (&q.parent, SqlValue::from(row.parent)),
            (&q.tree_id, row.tree_id.into()),
            (&q.left, row.left.into()),
            (&q.right, row.right.into()),
            (&q.level, row.level.into()),
        ] {
            columns.push(column.as_str());
            values.push(p.bind(value));
        }
        for (column, value) in q.order.iter().zip(&row.order) {
            columns.push(column.as_str());
            values.push(p.bind(value));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            q.table,
            columns.join(", "),
            values.join(", "),
            q.pk
        );
        Ok(p.finish(sql))
    }

    pub fn max_tree_id(&self) -> Statement {
        Statement {
            sql: format!("SELECT MAX({}) FROM {}", self.q.tree_id, self.q.table),
            params: Vec::new(),
        }
    }

    pub fn delete_range(&self, tree_id: TreeId, left: i64, right: i64) -> Statement {
        let q = &self.q;
        let mut p = Params::new(self.dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} >= {} AND {} <= {}",
            q.table,
            q.tree_id,
            p.bind(tree_id),
            q.left,
            p.bind(left),
            q.left,
            p.bind(right)
        );
        p.finish(sql)
    }

    pub fn delete_nodes(&self, ids: &[NodeId]) -> Statement {
        let mut p = Params::new(self.dialect);
        let filter = Self::in_list(&mut p, &self.q.pk, ids);
        let sql = format!("DELETE FROM {} WHERE {filter}", self.q.table);
        p.finish(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OrderField;

    fn renderer(dialect: Dialect) -> SqlRenderer {
        let options = TreeOptions::new("genre").order_insertion_by([OrderField::asc("name")]);
        SqlRenderer::new(Arc::new(options), dialect).unwrap()
    }

    #[test]
    fn manage_space_is_one_statement_over_one_tree() {
        let stmt = renderer(Dialect::Sqlite)
            .update(&TreeUpdate::create_space(2, 5, 3))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"genre\" SET \
             \"lft\" = CASE WHEN \"lft\" > ?1 THEN \"lft\" + ?2 ELSE \"lft\" END, \
             \"rght\" = CASE WHEN \"rght\" > ?1 THEN \"rght\" + ?2 ELSE \"rght\" END \
             WHERE \"tree_id\" = ?3 AND (\"lft\" > ?1 OR \"rght\" > ?1)"
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(5), SqlValue::Int(2), SqlValue::Int(3)]);
    }

    #[test]
    fn postgres_uses_dollar_placeholders() {
        let stmt = renderer(Dialect::Postgres).delete_range(1, 2, 9);
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"genre\" WHERE \"tree_id\" = $1 AND \"lft\" >= $2 AND \"lft\" <= $3"
        );
    }

    #[test]
    fn select_renders_filters_in_order() {
        let query = NodeQuery::in_tree(2)
            .parent(ParentFilter::In(vec![NodeId(4), NodeId(5)]))
            .left_above(3)
            .reversed()
            .limit(1);
        let stmt = renderer(Dialect::Sqlite).select(&query);
        assert_eq!(
            stmt.sql,
            "SELECT \"id\", \"parent_id\", \"tree_id\", \"lft\", \"rght\", \"level\", \"name\" \
             FROM \"genre\" WHERE \"tree_id\" = ?1 AND \"parent_id\" IN (?2, ?3) AND \"lft\" >= ?4 \
             ORDER BY \"tree_id\" DESC, \"lft\" DESC, \"id\" DESC LIMIT 1"
        );
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn insert_skips_missing_pk_and_returns_it() {
        let row = NewRow {
            id: None,
            parent: None,
            tree_id: 1,
            left: 1,
            right: 2,
            level: 0,
            order: vec![OrderValue::from("rpg")],
        };
        let stmt = renderer(Dialect::Postgres).insert(&row).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"genre\" (\"parent_id\", \"tree_id\", \"lft\", \"rght\", \"level\", \"name\") \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING \"id\""
        );
        assert_eq!(stmt.params[0], SqlValue::Null);
        assert_eq!(stmt.params[5], SqlValue::Text("rpg".into()));
    }

    #[test]
    fn set_order_requires_matching_arity() {
        let r = renderer(Dialect::Sqlite);
        let bad = TreeUpdate::SetOrder {
            node: NodeId(1),
            values: Vec::new(),
        };
        assert!(matches!(r.update(&bad), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn empty_id_lists_match_nothing() {
        let stmt = renderer(Dialect::Sqlite).delete_nodes(&[]);
        assert_eq!(stmt.sql, "DELETE FROM \"genre\" WHERE 1 = 0");
    }
}
