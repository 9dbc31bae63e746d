use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params_from_iter};

use crate::error::{Error, Result};

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    fn flip(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    fn after(self) -> &'static str {
        match self {
            Direction::Asc => ">",
            Direction::Desc => "<",
        }
    }
}

/// A sortable column of an entity.
pub trait OrderField: Copy {
    /// SQL expression used for ordering and cursor comparison. Never evaluates to NULL.
    fn expr(self) -> &'static str;
}

/// Identity of a row, used as a pagination cursor.
pub trait RowKey: Clone {
    fn key_values(&self) -> Vec<Value>;
}

impl RowKey for String {
    fn key_values(&self) -> Vec<Value> {
        vec![Value::Text(self.clone())]
    }
}

impl RowKey for (String, String) {
    fn key_values(&self) -> Vec<Value> {
        vec![Value::Text(self.0.clone()), Value::Text(self.1.clone())]
    }
}

/// Filtered list query with ordering and cursor pagination.
///
/// `cursor` names the row to start from (inclusive; combine with `skip(1)` to start
/// after it). A negative `take` pages backward from the cursor; rows are still returned
/// in the requested order.
#[derive(Debug, Clone)]
pub struct FindMany<F, O, K = String> {
    pub filter: F,
    pub order_by: Vec<(O, Direction)>,
    pub cursor: Option<K>,
    pub take: Option<i64>,
    pub skip: Option<u64>,
}

impl<F: Default, O, K> Default for FindMany<F, O, K> {
    fn default() -> Self {
        Self::new(F::default())
    }
}

impl<F, O, K> FindMany<F, O, K> {
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            order_by: Vec::new(),
            cursor: None,
            take: None,
            skip: None,
        }
    }

    #[must_use]
    pub fn order_by(mut self, field: O, direction: Direction) -> Self {
        self.order_by.push((field, direction));
        self
    }

    #[must_use]
    pub fn cursor(mut self, key: K) -> Self {
        self.cursor = Some(key);
        self
    }

    #[must_use]
    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// A persisted entity: table name, selected columns, key columns and row mapping.
pub(crate) trait Table: Sized {
    const NAME: &'static str;
    const COLUMNS: &'static str;
    const KEY: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Conjunction of SQL predicates with positional parameters.
#[derive(Debug, Default)]
pub(crate) struct Predicates {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(value.into());
        self
    }

    pub fn is_null(&mut self, column: &str) -> &mut Self {
        self.clauses.push(format!("{column} IS NULL"));
        self
    }

    pub fn lt(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.clauses.push(format!("{column} < ?"));
        self.params.push(value.into());
        self
    }

    pub fn contains(&mut self, column: &str, needle: &str) -> &mut Self {
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        self.clauses.push(format!("{column} LIKE ? ESCAPE '\\'"));
        self.params.push(Value::Text(format!("%{escaped}%")));
        self
    }

    pub fn in_list(&mut self, column: &str, values: &[String]) -> &mut Self {
        if values.is_empty() {
            self.clauses.push("0".to_string());
            return self;
        }
        let marks = vec!["?"; values.len()].join(", ");
        self.clauses.push(format!("{column} IN ({marks})"));
        self.params
            .extend(values.iter().map(|v| Value::Text(v.clone())));
        self
    }

    pub fn raw(&mut self, clause: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.clauses.push(clause.into());
        self.params.extend(params);
        self
    }

    pub fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Builds the predicates for a filter type.
pub(crate) trait ToPredicates {
    fn predicates(&self) -> Predicates;
}

/// Column assignments for UPDATE statements.
#[derive(Debug, Default)]
pub(crate) struct Assignments {
    columns: Vec<&'static str>,
    params: Vec<Value>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<Value>) -> &mut Self {
        self.columns.push(column);
        self.params.push(value.into());
        self
    }

    pub fn set_opt<V: Into<Value> + Clone>(
        &mut self,
        column: &'static str,
        value: &Option<V>,
    ) -> &mut Self {
        if let Some(v) = value {
            self.set(column, v.clone());
        }
        self
    }

    pub fn execute(&self, conn: &Connection, table: &str, predicates: &Predicates) -> Result<usize> {
        let set = self
            .columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {table} SET {set}{}", predicates.sql());
        let params = self.params.iter().chain(predicates.params().iter());
        Ok(conn.execute(&sql, params_from_iter(params))?)
    }
}

pub(crate) fn key_predicates<T: Table>(key: &[Value]) -> Predicates {
    let mut preds = Predicates::new();
    for (column, value) in T::KEY.iter().zip(key) {
        preds.eq(column, value.clone());
    }
    preds
}

pub(crate) fn select_one<T: Table>(conn: &Connection, predicates: &Predicates) -> Result<Option<T>> {
    let sql = format!(
        "SELECT {} FROM {}{} LIMIT 1",
        T::COLUMNS,
        T::NAME,
        predicates.sql()
    );
    conn.query_row(&sql, params_from_iter(predicates.params()), T::from_row)
        .optional()
        .map_err(Error::from)
}

pub(crate) fn count<T: Table>(conn: &Connection, predicates: &Predicates) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}{}", T::NAME, predicates.sql());
    let n: i64 = conn.query_row(&sql, params_from_iter(predicates.params()), |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

pub(crate) fn delete<T: Table>(conn: &Connection, predicates: &Predicates) -> Result<usize> {
    let sql = format!("DELETE FROM {}{}", T::NAME, predicates.sql());
    Ok(conn.execute(&sql, params_from_iter(predicates.params()))?)
}

pub(crate) fn select_many<T, F, O, K>(conn: &Connection, query: &FindMany<F, O, K>) -> Result<Vec<T>>
where
    T: Table,
    F: ToPredicates,
    O: OrderField,
    K: RowKey,
{
    let backward = query.take.is_some_and(|t| t < 0);

    let mut order: Vec<(String, Direction)> = query
        .order_by
        .iter()
        .map(|(field, dir)| (field.expr().to_string(), *dir))
        .collect();
    for key in T::KEY {
        if !order.iter().any(|(expr, _)| expr == *key) {
            order.push(((*key).to_string(), Direction::Asc));
        }
    }
    if backward {
        for (_, dir) in &mut order {
            *dir = dir.flip();
        }
    }

    let mut predicates = query.filter.predicates();

    if let Some(cursor) = &query.cursor {
        let select = order
            .iter()
            .map(|(expr, _)| expr.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let key_preds = key_predicates::<T>(&cursor.key_values());
        let sql = format!("SELECT {select} FROM {}{}", T::NAME, key_preds.sql());
        let anchor: Option<Vec<Value>> = conn
            .query_row(&sql, params_from_iter(key_preds.params()), |row| {
                (0..order.len()).map(|i| row.get::<_, Value>(i)).collect()
            })
            .optional()?;

        let Some(anchor) = anchor else {
            return Ok(Vec::new());
        };

        // (a, b, ...) >= anchor under per-column direction, expanded lexicographically.
        let mut alternatives = Vec::new();
        let mut params = Vec::new();
        for i in 0..=order.len() {
            let mut parts = Vec::new();
            for (j, (expr, _)) in order.iter().take(i).enumerate() {
                parts.push(format!("{expr} = ?"));
                params.push(anchor[j].clone());
            }
            if let Some((expr, dir)) = order.get(i) {
                parts.push(format!("{expr} {} ?", dir.after()));
                params.push(anchor[i].clone());
            }
            alternatives.push(format!("({})", parts.join(" AND ")));
        }
        predicates.raw(format!("({})", alternatives.join(" OR ")), params);
    }

    let order_sql = order
        .iter()
        .map(|(expr, dir)| format!("{expr} {}", dir.keyword()))
        .collect::<Vec<_>>()
        .join(", ");
    let limit = query.take.map(i64::saturating_abs).unwrap_or(-1);
    let offset = i64::try_from(query.skip.unwrap_or(0)).unwrap_or(i64::MAX);

    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {order_sql} LIMIT ? OFFSET ?",
        T::COLUMNS,
        T::NAME,
        predicates.sql()
    );
    let params = predicates
        .params()
        .iter()
        .cloned()
        .chain([Value::Integer(limit), Value::Integer(offset)]);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), T::from_row)?;
    let mut items = rows.collect::<std::result::Result<Vec<_>, _>>()?;

    if backward {
        items.reverse();
    }
    Ok(items)
}
