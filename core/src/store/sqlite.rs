use std::path::PathBuf;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use time::OffsetDateTime;

use super::{Document, DocumentFilter, DocumentStore, MemberRule};
use crate::errors::{EventItError, Result};

type DbPool = Pool<SqliteConnectionManager>;

pub const MEMORY_CONNECTION: &str = "sqlite::memory:";
const FILE_PREFIX: &str = "sqlite://";
const DEFAULT_POOL_SIZE: u32 = 8;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

/// Document store kept in a single SQLite database file (or in memory).
///
/// Every logical database/collection pair shares the `documents` table;
/// members are addressed with SQLite's JSON functions.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
    connection_string: String,
}

impl SqliteDocumentStore {
    /// Open `sqlite::memory:` or `sqlite://<path>` and apply migrations.
    pub fn open(connection_string: &str) -> Result<Self> {
        let target = parse_connection_string(connection_string)?;
        let builder = Pool::builder().connection_timeout(CONNECT_TIMEOUT);
        let (manager, builder) = match &target {
            // Every in-memory connection is its own database, so keep exactly one alive.
            Target::Memory => (
                SqliteConnectionManager::memory(),
                builder.max_size(1).max_lifetime(None).idle_timeout(None),
            ),
            Target::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    if !parent.is_dir() {
                        return Err(EventItError::Config(format!(
                            "document store directory {} does not exist",
                            parent.display()
                        )));
                    }
                }
                (
                    SqliteConnectionManager::file(path),
                    builder.max_size(DEFAULT_POOL_SIZE),
                )
            }
        };
        let manager = manager.with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let pool = builder.build(manager).map_err(|err| {
            EventItError::Config(format!("failed to open {connection_string}: {err}"))
        })?;
        {
            let conn = pool.get()?;
            apply_migrations(&conn)?;
        }
        log::debug!("opened document store {connection_string}");
        Ok(Self {
            pool,
            connection_string: connection_string.to_string(),
        })
    }

}

impl std::fmt::Debug for SqliteDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDocumentStore")
            .field("connection_string", &self.connection_string)
            .finish()
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn ping(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn drop_database(&self, database: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let removed = conn.execute("DELETE FROM documents WHERE database = ?1", params![database])?;
        log::warn!("dropped database {database} ({removed} documents removed)");
        Ok(())
    }

    fn insert_one(&self, database: &str, collection: &str, document: &Document) -> Result<()> {
        let body = serde_json::to_string(document)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO documents (database, collection, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![database, collection, body, now],
        )?;
        Ok(())
    }

    fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &DocumentFilter,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let (clause, values) = where_clause(database, collection, filter)?;
        let mut sql = format!(
            "SELECT body FROM documents WHERE {clause} ORDER BY json_extract(body, '$.timestamp') ASC, id ASC"
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;
        let mut documents = Vec::new();
        for row in rows {
            let body = row?;
            documents.push(serde_json::from_str(&body)?);
        }
        Ok(documents)
    }

    fn count(&self, database: &str, collection: &str, filter: &DocumentFilter) -> Result<u64> {
        let (clause, values) = where_clause(database, collection, filter)?;
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {clause}");
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn collection_names(&self, database: &str) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT collection FROM documents WHERE database = ?1 ORDER BY collection",
        )?;
        let rows = stmt.query_map(params![database], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

fn parse_connection_string(raw: &str) -> Result<Target> {
    let raw = raw.trim();
    if raw == MEMORY_CONNECTION {
        return Ok(Target::Memory);
    }
    match raw.strip_prefix(FILE_PREFIX) {
        Some(path) if !path.is_empty() => Ok(Target::File(PathBuf::from(path))),
        Some(_) => Err(EventItError::Config(format!(
            "connection string {raw} names no database file"
        ))),
        None => Err(EventItError::Config(format!(
            "unsupported connection string {raw}; expected {MEMORY_CONNECTION} or {FILE_PREFIX}<path>"
        ))),
    }
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    let migrations: &[(&str, &str)] = &[
        (
            "0001_documents.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0001_documents.sql"
            )),
        ),
        (
            "0002_documents_timestamp.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0002_documents_timestamp.sql"
            )),
        ),
    ];

    for (name, sql) in migrations {
        conn.execute_batch(sql).map_err(|err| {
            EventItError::Config(format!("failed to apply migration {name}: {err}"))
        })?;
    }
    Ok(())
}

fn where_clause(
    database: &str,
    collection: &str,
    filter: &DocumentFilter,
) -> Result<(String, Vec<SqlValue>)> {
    let mut clause = String::from("database = ?1 AND collection = ?2");
    let mut values = vec![
        SqlValue::Text(database.to_string()),
        SqlValue::Text(collection.to_string()),
    ];
    for (field, expected) in &filter.equals {
        values.push(SqlValue::Text(format!("$.{field}")));
        let path = values.len();
        match expected {
            Value::Null => clause.push_str(&format!(
                " AND (json_type(body, ?{path}) IS NULL OR json_type(body, ?{path}) = 'null')"
            )),
            Value::Bool(flag) => clause.push_str(&format!(
                " AND json_type(body, ?{path}) = '{}'",
                if *flag { "true" } else { "false" }
            )),
            Value::Number(number) => {
                let (kind, value) = match number.as_i64() {
                    Some(int) => ("integer", SqlValue::Integer(int)),
                    None => ("real", SqlValue::Real(number.as_f64().unwrap_or(f64::NAN))),
                };
                values.push(value);
                let param = values.len();
                clause.push_str(&format!(
                    " AND json_type(body, ?{path}) = '{kind}' AND json_extract(body, ?{path}) = ?{param}"
                ));
            }
            Value::String(text) => {
                values.push(SqlValue::Text(text.clone()));
                let param = values.len();
                clause.push_str(&format!(
                    " AND json_type(body, ?{path}) = 'text' AND json_extract(body, ?{path}) = ?{param}"
                ));
            }
            Value::Array(_) | Value::Object(_) => {
                let kind = if expected.is_array() { "array" } else { "object" };
                values.push(SqlValue::Text(serde_json::to_string(expected)?));
                let param = values.len();
                clause.push_str(&format!(
                    " AND json_type(body, ?{path}) = '{kind}' AND json_extract(body, ?{path}) = json(?{param})"
                ));
            }
        }
    }
    if let Some(rules) = &filter.members {
        push_member_rules(&mut clause, &mut values, rules);
    }
    if let Some((start, end)) = &filter.timestamp_range {
        values.push(SqlValue::Text(start.clone()));
        values.push(SqlValue::Text(end.clone()));
        let end_param = values.len();
        clause.push_str(&format!(
            " AND json_extract(body, '$.timestamp') BETWEEN ?{} AND ?{end_param}",
            end_param - 1
        ));
    }
    Ok((clause, values))
}

fn push_member_rules(clause: &mut String, values: &mut Vec<SqlValue>, rules: &[MemberRule]) {
    let mut names = Vec::with_capacity(rules.len());
    for rule in rules {
        values.push(SqlValue::Text(format!("$.{}", rule.name)));
        let path = values.len();
        let types = rule.json_types.map(|types| {
            types
                .iter()
                .map(|kind| format!("'{kind}'"))
                .collect::<Vec<_>>()
                .join(", ")
        });
        match (rule.required, types) {
            (true, Some(types)) => {
                clause.push_str(&format!(" AND json_type(body, ?{path}) IN ({types})"))
            }
            (true, None) => clause.push_str(&format!(
                " AND json_type(body, ?{path}) IS NOT NULL AND json_type(body, ?{path}) <> 'null'"
            )),
            (false, Some(types)) => clause.push_str(&format!(
                " AND (json_type(body, ?{path}) IS NULL OR json_type(body, ?{path}) IN ('null', {types}))"
            )),
            (false, None) => {}
        }
        values.push(SqlValue::Text(rule.name.clone()));
        names.push(format!("?{}", values.len()));
    }
    if names.is_empty() {
        clause.push_str(" AND NOT EXISTS (SELECT 1 FROM json_each(body))");
    } else {
        clause.push_str(&format!(
            " AND NOT EXISTS (SELECT 1 FROM json_each(body) WHERE json_each.key NOT IN ({}))",
            names.join(", ")
        ));
    }
}
