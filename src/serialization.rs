//! Metadata export/import: SQLite ↔ portable JSON.
//!
//! The export envelope is
//! `{bleepstore_export: {version, exported_at, schema_version, source},
//! buckets, objects, multipart_uploads, multipart_parts, credentials}`.
//! Secret keys are redacted unless explicitly included; redacted
//! credentials are skipped (with a warning) on import so a sanitized
//! export can never silently plant unusable credentials.

use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::util::now_iso8601;

/// Export format version. Bump on incompatible envelope changes.
pub const EXPORT_VERSION: i64 = 1;

/// Marker written in place of secret keys on sanitized exports.
const REDACTED: &str = "REDACTED";

/// Every exportable table, in dependency (insert) order.
pub const ALL_TABLES: &[&str] = &[
    "buckets",
    "objects",
    "multipart_uploads",
    "multipart_parts",
    "credentials",
];

/// Reverse order for `--replace` deletion (children first).
const DELETE_ORDER: &[&str] = &[
    "multipart_parts",
    "multipart_uploads",
    "objects",
    "buckets",
    "credentials",
];

/// Columns stored as JSON text in SQLite but expanded to objects in the
/// export.
const JSON_COLUMNS: &[&str] = &["acl", "user_metadata"];

/// Integer columns exported as booleans.
const BOOL_COLUMNS: &[&str] = &["delete_marker", "active"];

const TABLE_COLUMNS: &[(&str, &[&str])] = &[
    (
        "buckets",
        &["name", "region", "owner_id", "owner_display", "acl", "created_at"],
    ),
    (
        "objects",
        &[
            "bucket",
            "key",
            "size",
            "etag",
            "content_type",
            "content_encoding",
            "content_language",
            "content_disposition",
            "cache_control",
            "expires",
            "storage_class",
            "acl",
            "user_metadata",
            "last_modified",
            "delete_marker",
        ],
    ),
    (
        "multipart_uploads",
        &[
            "upload_id",
            "bucket",
            "key",
            "content_type",
            "content_encoding",
            "content_language",
            "content_disposition",
            "cache_control",
            "expires",
            "storage_class",
            "acl",
            "user_metadata",
            "owner_id",
            "owner_display",
            "initiated_at",
        ],
    ),
    (
        "multipart_parts",
        &["upload_id", "part_number", "size", "etag", "last_modified"],
    ),
    (
        "credentials",
        &[
            "access_key_id",
            "secret_key",
            "owner_id",
            "display_name",
            "active",
            "created_at",
        ],
    ),
];

const TABLE_ORDER_BY: &[(&str, &str)] = &[
    ("buckets", "name"),
    ("objects", "bucket, key"),
    ("multipart_uploads", "upload_id"),
    ("multipart_parts", "upload_id, part_number"),
    ("credentials", "access_key_id"),
];

pub struct ExportOptions {
    pub tables: Vec<String>,
    pub include_credentials: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            tables: ALL_TABLES.iter().map(|t| t.to_string()).collect(),
            include_credentials: false,
        }
    }
}

#[derive(Default)]
pub struct ImportOptions {
    /// Clear the target tables before inserting (otherwise merge, with
    /// existing rows winning).
    pub replace: bool,
}

pub struct ImportReport {
    pub inserted: BTreeMap<String, usize>,
    pub skipped: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

fn columns_of(table: &str) -> Option<&'static [&'static str]> {
    TABLE_COLUMNS
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, cols)| *cols)
}

fn order_by_of(table: &str) -> &'static str {
    TABLE_ORDER_BY
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, o)| *o)
        .unwrap_or("rowid")
}

fn schema_version_of(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(1)
}

/// Convert one SQLite column value to its JSON representation.
fn column_to_json(row: &rusqlite::Row<'_>, idx: usize, column: &str) -> Value {
    if JSON_COLUMNS.contains(&column) {
        match row.get::<_, Option<String>>(idx).ok().flatten() {
            Some(text) => serde_json::from_str(&text).unwrap_or_else(|_| Value::Object(Map::new())),
            None => Value::Null,
        }
    } else if BOOL_COLUMNS.contains(&column) {
        match row.get::<_, Option<i64>>(idx).ok().flatten() {
            Some(v) => Value::Bool(v != 0),
            None => Value::Null,
        }
    } else if let Ok(v) = row.get::<_, i64>(idx) {
        Value::Number(v.into())
    } else if let Ok(v) = row.get::<_, String>(idx) {
        Value::String(v)
    } else {
        Value::Null
    }
}

/// Convert a JSON value back to a SQL parameter for one column.
fn json_to_param(value: Value, column: &str) -> Box<dyn rusqlite::types::ToSql> {
    if JSON_COLUMNS.contains(&column) {
        match value {
            Value::Null => Box::new(Option::<String>::None),
            other => Box::new(
                serde_json::to_string(&other).unwrap_or_else(|_| "{}".to_string()),
            ),
        }
    } else if BOOL_COLUMNS.contains(&column) {
        match value {
            Value::Bool(b) => Box::new(b as i64),
            Value::Null => Box::new(Option::<i64>::None),
            _ => Box::new(0i64),
        }
    } else {
        match value {
            Value::Null => Box::new(Option::<String>::None),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Box::new(i)
                } else if let Some(f) = n.as_f64() {
                    Box::new(f)
                } else {
                    Box::new(n.to_string())
                }
            }
            Value::String(s) => Box::new(s),
            other => Box::new(serde_json::to_string(&other).unwrap_or_default()),
        }
    }
}

/// Export the requested tables to a pretty-printed JSON document.
pub fn export_metadata(db_path: &str, opts: &ExportOptions) -> anyhow::Result<String> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let mut document = BTreeMap::<String, Value>::new();
    document.insert(
        "bleepstore_export".to_string(),
        json!({
            "version": EXPORT_VERSION,
            "exported_at": now_iso8601(),
            "schema_version": schema_version_of(&conn),
            "source": format!("bleepstore/{}", env!("CARGO_PKG_VERSION")),
        }),
    );

    for table in &opts.tables {
        let Some(columns) = columns_of(table) else { continue };
        let sql = format!("SELECT * FROM {} ORDER BY {}", table, order_by_of(table));
        let mut stmt = conn.prepare(&sql)?;

        let mut exported = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut record = Map::new();
            for (idx, column) in columns.iter().enumerate() {
                record.insert(column.to_string(), column_to_json(row, idx, column));
            }
            if *table == "credentials" && !opts.include_credentials {
                record.insert("secret_key".to_string(), Value::String(REDACTED.to_string()));
            }
            exported.push(Value::Object(record));
        }
        document.insert(table.to_string(), Value::Array(exported));
    }

    Ok(serde_json::to_string_pretty(&document)?)
}

/// Import a JSON export into a database (whose schema already exists).
pub fn import_metadata(
    db_path: &str,
    json_text: &str,
    opts: &ImportOptions,
) -> anyhow::Result<ImportReport> {
    let document: BTreeMap<String, Value> = serde_json::from_str(json_text)?;

    let envelope = document
        .get("bleepstore_export")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow::anyhow!("missing bleepstore_export envelope"))?;
    let version = envelope.get("version").and_then(|v| v.as_i64()).unwrap_or(0);
    if !(1..=EXPORT_VERSION).contains(&version) {
        anyhow::bail!("unsupported export version: {version}");
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    let tx = conn.unchecked_transaction()?;

    let mut report = ImportReport {
        inserted: BTreeMap::new(),
        skipped: BTreeMap::new(),
        warnings: Vec::new(),
    };

    if opts.replace {
        for table in DELETE_ORDER {
            if document.contains_key(*table) {
                tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
        }
    }

    for table in ALL_TABLES {
        let Some(Value::Array(rows)) = document.get(*table) else { continue };
        let Some(columns) = columns_of(table) else { continue };

        let mut inserted = 0usize;
        let mut skipped = 0usize;

        for row in rows {
            let Some(record) = row.as_object() else {
                skipped += 1;
                continue;
            };

            if *table == "credentials"
                && record.get("secret_key").and_then(|v| v.as_str()) == Some(REDACTED)
            {
                skipped += 1;
                let access_key = record
                    .get("access_key_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                report.warnings.push(format!(
                    "skipped credential '{access_key}': redacted secret_key"
                ));
                continue;
            }

            let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
            let sql = format!(
                "INSERT {} INTO {} ({}) VALUES ({})",
                if opts.replace { "" } else { "OR IGNORE" },
                table,
                columns.join(", "),
                placeholders.join(", "),
            );

            let values: Vec<Box<dyn rusqlite::types::ToSql>> = columns
                .iter()
                .map(|col| json_to_param(record.get(*col).cloned().unwrap_or(Value::Null), col))
                .collect();
            let params: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();

            match tx.execute(&sql, params.as_slice()) {
                Ok(n) if n > 0 => inserted += 1,
                Ok(_) => skipped += 1,
                Err(e) => {
                    skipped += 1;
                    report.warnings.push(format!("skipped {table} row: {e}"));
                }
            }
        }

        report.inserted.insert(table.to_string(), inserted);
        report.skipped.insert(table.to_string(), skipped);
    }

    tx.commit()?;
    Ok(report)
}

// -- Tests -------------------------------------------------------------------
