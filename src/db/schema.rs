//! SQL DDL for the settings storage.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema with:
/// - `singles`: one row per (doctype, field); the primary key makes a second
///   record of the same single DocType unrepresentable
/// - `auth`: encrypted `Password` field values, never stored in `singles`
/// - `versions`: change history for DocTypes with `track_changes`
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS singles (
    doctype TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NULL,
    PRIMARY KEY (doctype, field)
);

CREATE TABLE IF NOT EXISTS auth (
    doctype TEXT NOT NULL,
    name TEXT NOT NULL,
    fieldname TEXT NOT NULL,
    password TEXT NOT NULL, -- Fernet token
    PRIMARY KEY (doctype, name, fieldname)
);

CREATE TABLE IF NOT EXISTS versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doctype TEXT NOT NULL,
    docname TEXT NOT NULL,
    data TEXT NOT NULL, -- JSON {"changed": [[field, old, new], ...]}
    created_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_versions_doc ON versions(doctype, docname, id);
"#;
