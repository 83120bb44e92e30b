//! Per-class schema mapping and the explicit registry of tree classes.
//!
//! A class is registered once, at startup, with the column that plays each
//! structural role. Everything downstream (SQL rendering, ordered insertion,
//! deferred-update scopes) reads the resolved [`TreeOptions`] instead of looking
//! fields up by name at runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manager::TreeManager;
use crate::traits::TreeStore;

/// One `order_insertion_by` key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct OrderField {
    pub column: String,
    pub descending: bool,
}

impl OrderField {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

impl FromStr for OrderField {
    type Err = Error;

    /// `"name"` sorts ascending, `"-name"` descending.
    fn from_str(s: &str) -> Result<Self> {
        let (column, descending) = match s.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if column.is_empty() {
            return Err(Error::InvalidConfig("empty order_insertion_by field".into()));
        }
        Ok(Self {
            column: column.to_string(),
            descending,
        })
    }
}

impl TryFrom<String> for OrderField {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OrderField> for String {
    fn from(value: OrderField) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            f.write_str("-")?;
        }
        f.write_str(&self.column)
    }
}

/// Which column plays each structural role, plus ordered-insertion keys.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TreeOptions {
    pub table: String,
    pub pk_column: String,
    pub parent_column: String,
    pub tree_id_column: String,
    pub left_column: String,
    pub right_column: String,
    pub level_column: String,
    pub order_insertion_by: Vec<OrderField>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            pk_column: "id".into(),
            parent_column: "parent_id".into(),
            tree_id_column: "tree_id".into(),
            left_column: "lft".into(),
            right_column: "rght".into(),
            level_column: "level".into(),
            order_insertion_by: Vec::new(),
        }
    }
}

impl TreeOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn order_insertion_by<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = OrderField>,
    {
        self.order_insertion_by = fields.into_iter().collect();
        self
    }

    pub fn pk_column(mut self, column: impl Into<String>) -> Self {
        self.pk_column = column.into();
        self
    }

    pub fn parent_column(mut self, column: impl Into<String>) -> Self {
        self.parent_column = column.into();
        self
    }

    pub fn tree_id_column(mut self, column: impl Into<String>) -> Self {
        self.tree_id_column = column.into();
        self
    }

    pub fn left_column(mut self, column: impl Into<String>) -> Self {
        self.left_column = column.into();
        self
    }

    pub fn right_column(mut self, column: impl Into<String>) -> Self {
        self.right_column = column.into();
        self
    }

    pub fn level_column(mut self, column: impl Into<String>) -> Self {
        self.level_column = column.into();
        self
    }

    pub fn is_ordered(&self) -> bool {
        !self.order_insertion_by.is_empty()
    }

    fn structural_columns(&self) -> [(&'static str, &str); 6] {
        [
            ("pk", &self.pk_column),
            ("parent", &self.parent_column),
            ("tree_id", &self.tree_id_column),
            ("left", &self.left_column),
            ("right", &self.right_column),
            ("level", &self.level_column),
        ]
    }

    /// Check identifiers once so they can be spliced into SQL unquoted-safe.
    pub fn validate(&self) -> Result<()> {
        check_identifier("table", &self.table)?;
        let columns = self.structural_columns();
        for (role, column) in columns {
            check_identifier(role, column)?;
        }
        for (i, (role, column)) in columns.iter().enumerate() {
            if let Some((other, _)) = columns[i + 1..].iter().find(|(_, c)| c == column) {
                return Err(Error::InvalidConfig(format!(
                    "column {column:?} used for both {role} and {other}"
                )));
            }
        }
        for field in &self.order_insertion_by {
            check_identifier("order_insertion_by", &field.column)?;
            if columns.iter().any(|(_, c)| *c == field.column) {
                return Err(Error::InvalidConfig(format!(
                    "order_insertion_by column {:?} is a structural column",
                    field.column
                )));
            }
        }
        Ok(())
    }
}

fn check_identifier(role: &str, ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "invalid identifier for {role}: {ident:?}"
        )))
    }
}

/// A registered tree class: a name bound to a schema mapping.
///
/// A proxy class shares the schema of its concrete owner; it can run every tree
/// operation but cannot toggle deferred-update scopes.
#[derive(Debug)]
pub struct TreeClass {
    name: String,
    options: Arc<TreeOptions>,
    proxy_of: Option<String>,
}

impl TreeClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Arc<TreeOptions> {
        &self.options
    }

    pub fn proxy_of(&self) -> Option<&str> {
        self.proxy_of.as_deref()
    }

    /// Whether this class owns the concrete schema its rows live in.
    pub fn owns_schema(&self) -> bool {
        self.proxy_of.is_none()
    }
}

/// Explicit registry of tree classes, built once and passed by reference.
#[derive(Debug, Default)]
pub struct TreeRegistry {
    classes: BTreeMap<String, Arc<TreeClass>>,
}

impl TreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, options: TreeOptions) -> Result<Arc<TreeClass>> {
        if self.classes.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        options.validate()?;
        let class = Arc::new(TreeClass {
            name: name.to_string(),
            options: Arc::new(options),
            proxy_of: None,
        });
        self.classes.insert(name.to_string(), class.clone());
        tracing::debug!(class = name, table = %class.options.table, "registered tree class");
        Ok(class)
    }

    /// Register `name` as a view over an already registered class.
    pub fn register_proxy(&mut self, name: &str, of: &str) -> Result<Arc<TreeClass>> {
        if self.classes.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        let target = self.class(of)?;
        // Proxies of proxies resolve to the concrete owner.
        let owner = target.proxy_of.clone().unwrap_or_else(|| target.name.clone());
        let class = Arc::new(TreeClass {
            name: name.to_string(),
            options: target.options.clone(),
            proxy_of: Some(owner),
        });
        self.classes.insert(name.to_string(), class.clone());
        Ok(class)
    }

    pub fn class(&self, name: &str) -> Result<Arc<TreeClass>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Bind a registered class to a store.
    pub fn manager<S: TreeStore>(&self, name: &str, store: S) -> Result<TreeManager<S>> {
        Ok(TreeManager::new(self.class(name)?, store))
    }
}

/// One entry of a registry document.
#[cfg(feature = "serde")]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    #[serde(default)]
    pub options: Option<TreeOptions>,
    #[serde(default)]
    pub proxy_of: Option<String>,
}

/// Registry document, e.g.
///
/// ```json
/// { "classes": [
///     { "name": "genre", "options": { "table": "genre", "order_insertion_by": ["name"] } },
///     { "name": "genre_view", "proxy_of": "genre" }
/// ] }
/// ```
#[cfg(feature = "serde")]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub classes: Vec<ClassConfig>,
}

#[cfg(feature = "serde")]
impl TreeRegistry {
    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::new();
        for class in config.classes {
            match (class.options, class.proxy_of) {
                (Some(options), None) => {
                    registry.register(&class.name, options)?;
                }
                (None, Some(of)) => {
                    registry.register_proxy(&class.name, &of)?;
                }
                _ => {
                    return Err(Error::InvalidConfig(format!(
                        "class {:?} needs exactly one of `options` or `proxy_of`",
                        class.name
                    )))
                }
            }
        }
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: RegistryConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = TreeRegistry::new();
        registry.register("genre", TreeOptions::new("genre")).unwrap();
        let err = registry.register("genre", TreeOptions::new("genre")).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(name) if name == "genre"));
    }

    #[test]
    fn proxies_resolve_to_concrete_owner() {
        let mut registry = TreeRegistry::new();
        registry.register("genre", TreeOptions::new("genre")).unwrap();
        registry.register_proxy("single", "genre").unwrap();
        let double = registry.register_proxy("double", "single").unwrap();
        assert_eq!(double.proxy_of(), Some("genre"));
        assert!(!double.owns_schema());
        assert_eq!(double.options().table, "genre");
    }

    #[test]
    fn rejects_bad_identifiers_and_shared_columns() {
        let bad = TreeOptions::new("genre; DROP TABLE x");
        assert!(matches!(bad.validate(), Err(Error::InvalidConfig(_))));

        let shared = TreeOptions::new("genre").left_column("level");
        assert!(matches!(shared.validate(), Err(Error::InvalidConfig(_))));

        let ordered_on_structure =
            TreeOptions::new("genre").order_insertion_by([OrderField::asc("lft")]);
        assert!(matches!(ordered_on_structure.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn order_field_parses_direction_prefix() {
        assert_eq!("name".parse::<OrderField>().unwrap(), OrderField::asc("name"));
        assert_eq!("-rank".parse::<OrderField>().unwrap(), OrderField::desc("rank"));
        assert!("-".parse::<OrderField>().is_err());
        assert_eq!(OrderField::desc("rank").to_string(), "-rank");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn builds_registry_from_json() {
        let registry = TreeRegistry::from_json(
            r#"{ "classes": [
                { "name": "genre", "options": { "table": "genre", "order_insertion_by": ["name", "-rank"] } },
                { "name": "genre_view", "proxy_of": "genre" }
            ] }"#,
        )
        .unwrap();
        let genre = registry.class("genre").unwrap();
        assert_eq!(genre.options().left_column, "lft");
        assert_eq!(
            genre.options().order_insertion_by,
            vec![OrderField::asc("name"), OrderField::desc("rank")]
        );
        assert_eq!(registry.class("genre_view").unwrap().proxy_of(), Some("genre"));
    }
}
