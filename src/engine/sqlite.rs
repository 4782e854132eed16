use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};

use super::{RelationalEngine, Row};

/// SQLite-backed engine. One connection, serialized behind a mutex.
pub struct SqliteEngine {
    conn: Mutex<Connection>,
}

impl SqliteEngine {
    /// Opens `path`, or a private in-memory database for `:memory:`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path).with_context(|| format!("opening database {}", path))?
        };
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database connection lock poisoned"))
    }
}

impl RelationalEngine for SqliteEngine {
    fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                object.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            out.push(object);
        }
        Ok(out)
    }

    fn bulk_load(&self, table: &str, path: &Path, delimiter: u8) -> Result<usize> {
        let ident = quote_ident(table)?;
        let mut conn = self.lock()?;
        let width = table_columns(&conn, table)?.len();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;

        let tx = conn.transaction()?;
        let mut loaded = 0usize;
        {
            let placeholders = vec!["?"; width].join(", ");
            let mut stmt = tx.prepare(&format!("INSERT INTO {} VALUES ({})", ident, placeholders))?;
            for record in reader.records() {
                let record = record?;
                // The generator ends every row with a delimiter, leaving one empty extra field
                if record.len() < width {
                    anyhow::bail!(
                        "{}: row {} has {} fields, table {} has {} columns",
                        path.display(),
                        loaded + 1,
                        record.len(),
                        table,
                        width
                    );
                }
                stmt.execute(params_from_iter(record.iter().take(width)))?;
                loaded += 1;
            }
        }
        tx.commit()?;

        tracing::debug!("Loaded {} rows into {} from {}", loaded, table, path.display());
        Ok(loaded)
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let ident = quote_ident(table)?;
        let mut conn = self.lock()?;
        let columns = table_columns(&conn, table)?;

        let tx = conn.transaction()?;
        {
            let column_list = columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                ident, column_list, placeholders
            ))?;
            for row in rows {
                let values = columns
                    .iter()
                    .map(|column| from_json(row.get(column)));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn truncate(&self, table: &str) -> Result<()> {
        let ident = quote_ident(table)?;
        let conn = self.lock()?;
        conn.execute(&format!("DELETE FROM {}", ident), [])?;
        Ok(())
    }

    fn apply_schema(&self, ddl: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(ddl)?;
        Ok(())
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Validates `name` as a plain identifier and double-quotes it for splicing into SQL.
fn quote_ident(name: &str) -> Result<String> {
    if !identifier_pattern().is_match(name) {
        anyhow::bail!("invalid identifier {:?}", name);
    }
    Ok(format!("\"{}\"", name))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)?))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.is_empty() {
        anyhow::bail!("no such table: {}", table);
    }
    Ok(columns)
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn from_json(value: Option<&serde_json::Value>) -> Value {
    match value {
        None | Some(serde_json::Value::Null) => Value::Null,
        Some(serde_json::Value::Bool(b)) => Value::Integer(i64::from(*b)),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        Some(serde_json::Value::String(s)) => Value::Text(s.clone()),
        Some(other) => Value::Text(other.to_string()),
    }
}
