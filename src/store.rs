//! Row store abstraction over the hosted backend.
//!
//! Defines the [`RowStore`] trait so the import executor can run against
//! Supabase in production and against [`MemoryStore`] in tests and dry runs.

use crate::error::StoreError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    /// Case-insensitive equality.
    ILike,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::ILike => "ilike",
        }
    }
}

/// Filter on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

pub fn eq(column: &str, value: impl Into<String>) -> Filter {
    Filter {
        column: column.to_string(),
        op: FilterOp::Eq,
        value: value.into(),
    }
}

pub fn ilike(column: &str, value: impl Into<String>) -> Filter {
    Filter {
        op: FilterOp::ILike,
        ..eq(column, value)
    }
}

impl Filter {
    /// Operand as the backend receives it. `ilike` values are escaped so
    /// they only ever match themselves.
    pub fn operand(&self) -> String {
        match self.op {
            FilterOp::Eq => self.value.clone(),
            FilterOp::ILike => like_escape(&self.value),
        }
    }

    fn matches(&self, row: &Value) -> bool {
        let Some(cell) = row.get(&self.column).map(cell_text) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => cell == self.value,
            FilterOp::ILike => {
                let pattern: Vec<char> = self.operand().to_lowercase().chars().collect();
                let text: Vec<char> = cell.to_lowercase().chars().collect();
                like_match(&pattern, &text)
            }
        }
    }
}

/// Escape `LIKE` wildcards in `value`.
///
/// PostgREST rewrites every `*` to `%` before escapes apply, so a literal
/// `*` can only be approximated by the one-character wildcard `_`.
pub fn like_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('_'),
            c => out.push(c),
        }
    }
    out
}

/// SQL `LIKE` over chars: `%` (or PostgREST's `*`), `_`, and backslash escapes.
fn like_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%' | '*', rest)) => (0..=text.len()).any(|i| like_match(rest, &text[i..])),
        Some(('_', rest)) => !text.is_empty() && like_match(rest, &text[1..]),
        Some(('\\', [escaped, rest @ ..])) => {
            text.first() == Some(escaped) && like_match(rest, &text[1..])
        }
        Some((c, rest)) => text.first() == Some(c) && like_match(rest, &text[1..]),
    }
}

/// Text form of a JSON cell, as it appears in a filter.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Async row store implemented by each backend.
#[async_trait::async_trait]
pub trait RowStore: Send + Sync {
    /// Rows of `table` matching every filter, restricted to `columns` (`*` for all).
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        columns: &str,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: &Value) -> Result<Value, StoreError>;

    /// Patch every row matching the filters. Fails with `NotFound` when none match.
    async fn update(&self, table: &str, filters: &[Filter], patch: &Value)
        -> Result<(), StoreError>;
}

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Select,
    Insert,
    Update,
}

/// Failure to return from the next matching call.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 503 from the backend.
    Unavailable,
    /// SQLSTATE 23505.
    Unique,
    /// 400 validation failure.
    Invalid,
}

#[cfg(test)]
impl Fault {
    fn into_error(self, table: &str) -> StoreError {
        match self {
            Fault::Unavailable => StoreError::Rejected {
                status: 503,
                message: format!("{table} temporarily unavailable"),
            },
            Fault::Unique => StoreError::UniqueViolation {
                message: format!("duplicate key value violates unique constraint on {table}"),
            },
            Fault::Invalid => StoreError::Rejected {
                status: 400,
                message: format!("invalid input for {table}"),
            },
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Value>>,
    unique: HashMap<String, Vec<Vec<String>>>,
    #[cfg(test)]
    faults: Vec<(Op, String, Fault)>,
    #[cfg(test)]
    calls: Vec<(Op, String)>,
}

/// In-memory row store enforcing declared unique constraints.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the catalog's unique constraints declared.
    pub fn with_catalog_constraints() -> Self {
        let store = Self::new();
        store.unique(crate::schema::PRODUCTS_TABLE, &["code_article"]);
        store.unique(crate::schema::VARIANTS_TABLE, &["product_code", "size"]);
        store.unique(crate::schema::USERS_TABLE, &["email"]);
        store.unique(crate::schema::USERS_TABLE, &["code_client"]);
        store
    }

    /// Declare a (possibly composite) unique constraint.
    pub fn unique(&self, table: &str, columns: &[&str]) {
        self.lock()
            .unique
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
    }

    #[cfg(test)]
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make the next `times` calls of `op` on `table` fail with `fault`.
    #[cfg(test)]
    pub fn fail_next(&self, op: Op, table: &str, fault: Fault, times: usize) {
        let mut state = self.lock();
        for _ in 0..times {
            state.faults.push((op, table.to_string(), fault));
        }
    }

    #[cfg(test)]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of calls of `op` made against `table`.
    #[cfg(test)]
    pub fn calls(&self, op: Op, table: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(o, t)| *o == op && t == table)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state for one call, firing any injected fault.
    #[cfg_attr(not(test), allow(unused_variables, unused_mut))]
    fn begin(&self, op: Op, table: &str) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        let mut state = self.lock();
        #[cfg(test)]
        {
            state.calls.push((op, table.to_string()));
            if let Some(pos) = state
                .faults
                .iter()
                .position(|(o, t, _)| *o == op && t == table)
            {
                let (_, _, fault) = state.faults.remove(pos);
                return Err(fault.into_error(table));
            }
        }
        Ok(state)
    }
}

fn project(row: &Value, columns: &str) -> Value {
    if columns.trim() == "*" {
        return row.clone();
    }
    let wanted: Vec<&str> = columns.split(',').map(str::trim).collect();
    let projected: Map<String, Value> = row
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(k, _)| wanted.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    Value::Object(projected)
}

#[async_trait::async_trait]
impl RowStore for MemoryStore {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        columns: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let state = self.begin(Op::Select, table)?;
        Ok(state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .map(|row| project(row, columns))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, row: &Value) -> Result<Value, StoreError> {
        let mut state = self.begin(Op::Insert, table)?;

        let mut row = row.clone();
        if let Some(obj) = row.as_object_mut() {
            obj.entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        }

        let constraints = state.unique.get(table).cloned().unwrap_or_default();
        let existing = state.tables.entry(table.to_string()).or_default();
        for columns in &constraints {
            let key: Vec<&Value> = columns.iter().filter_map(|c| row.get(c)).collect();
            if key.len() != columns.len() || key.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = existing.iter().any(|other| {
                columns
                    .iter()
                    .zip(&key)
                    .all(|(c, v)| other.get(c) == Some(*v))
            });
            if clash {
                return Err(StoreError::UniqueViolation {
                    message: format!("duplicate key on {table} ({})", columns.join(", ")),
                });
            }
        }

        existing.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &Value,
    ) -> Result<(), StoreError> {
        let mut state = self.begin(Op::Update, table)?;
        let rows = state.tables.entry(table.to_string()).or_default();

        let mut matched = 0;
        for row in rows.iter_mut().filter(|row| filters.iter().all(|f| f.matches(row))) {
            if let (Some(target), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
                for (k, v) in changes {
                    target.insert(k.clone(), v.clone());
                }
            }
            matched += 1;
        }

        if matched == 0 {
            return Err(StoreError::NotFound {
                table: table.to_string(),
                filter: describe(filters),
            });
        }
        Ok(())
    }
}

/// Human-readable form of a filter list, for error messages.
pub fn describe(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(|f| format!("{}={}.{}", f.column, f.op.as_str(), f.value))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_enforces_unique_constraint() {
        let store = MemoryStore::with_catalog_constraints();
        store
            .insert("products", &json!({"code_article": "L001"}))
            .await
            .unwrap();
        let err = store
            .insert("products", &json!({"code_article": "L001"}))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.rows("products").len(), 1);
    }

    #[tokio::test]
    async fn test_composite_constraint_allows_distinct_pairs() {
        let store = MemoryStore::with_catalog_constraints();
        let a = json!({"product_code": "L001", "size": "15ml"});
        let b = json!({"product_code": "L001", "size": "30ml"});
        store.insert("product_variants", &a).await.unwrap();
        store.insert("product_variants", &b).await.unwrap();
        assert!(store.insert("product_variants", &a).await.is_err());
    }

    #[tokio::test]
    async fn test_null_values_do_not_clash() {
        let store = MemoryStore::with_catalog_constraints();
        store
            .insert("profiles", &json!({"email": null, "code_client": "C1"}))
            .await
            .unwrap();
        store
            .insert("profiles", &json!({"email": null, "code_client": "C2"}))
            .await
            .unwrap();
        assert_eq!(store.rows("profiles").len(), 2);
    }

    #[tokio::test]
    async fn test_select_and_update() {
        let store = MemoryStore::new();
        store.seed(
            "products",
            vec![
                json!({"code_article": "L001", "name": "Nuit", "genre": "femme"}),
                json!({"code_article": "L002", "name": "Jour", "genre": "homme"}),
            ],
        );

        let rows = store
            .select("products", &[eq("code_article", "L002")], "code_article")
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"code_article": "L002"})]);

        store
            .update("products", &[eq("code_article", "L001")], &json!({"name": "Nuit d'été"}))
            .await
            .unwrap();
        assert_eq!(store.rows("products")[0]["name"], "Nuit d'été");

        let err = store
            .update("products", &[eq("code_article", "L999")], &json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let rows = store
            .select("products", &[ilike("genre", "FEMME")], "*")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["code_article"], "L001");
    }

    #[tokio::test]
    async fn test_ilike_matches_value_literally() {
        let store = MemoryStore::new();
        store.seed(
            "profiles",
            vec![
                json!({"email": "jeanxdupont@x.fr"}),
                json!({"email": "Jean_Dupont@X.fr"}),
                json!({"email": "remise100pct@x.fr"}),
            ],
        );

        let rows = store
            .select("profiles", &[ilike("email", "jean_dupont@x.fr")], "email")
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"email": "Jean_Dupont@X.fr"})]);

        let rows = store
            .select("profiles", &[ilike("email", "%@x.fr")], "email")
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("jean_dupont@x.fr"), "jean\\_dupont@x.fr");
        assert_eq!(like_escape("100%\\"), "100\\%\\\\");
        assert_eq!(like_escape("a*b"), "a_b");
        assert_eq!(ilike("email", "a_b").operand(), "a\\_b");
        assert_eq!(eq("email", "a_b").operand(), "a_b");
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once_per_count() {
        let store = MemoryStore::new();
        store.fail_next(Op::Insert, "profiles", Fault::Unavailable, 1);

        let err = store.insert("profiles", &json!({"email": "a@x.fr"})).await.unwrap_err();
        assert!(err.is_transient());
        store.insert("profiles", &json!({"email": "a@x.fr"})).await.unwrap();
        assert_eq!(store.calls(Op::Insert, "profiles"), 2);
    }
}
