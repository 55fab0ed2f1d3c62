//! DocType definitions: the schema document, compiled field conditions and
//! role permissions.
//!
//! Layout:
//! - `schema.rs`: serde model of the DocType JSON
//! - `condition.rs`: `depends_on` / `mandatory_depends_on` parser and evaluator
//! - `permission.rs`: per-role permission rows

pub mod condition;
pub mod permission;
pub mod schema;

use std::collections::HashSet;

use serde_json::Value;

use crate::error::SettingsError;
pub use condition::Condition;
pub use permission::{DocPerm, PermType};
pub use schema::{DocField, DocType, FieldType};

/// A record's field values keyed by fieldname.
pub type Doc = serde_json::Map<String, Value>;

/// A field with its conditions compiled.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub field: DocField,
    pub depends_on: Option<Condition>,
    pub mandatory_depends_on: Option<Condition>,
}

/// Checked, ready-to-evaluate form of a [`DocType`].
#[derive(Debug, Clone)]
pub struct Meta {
    doctype: DocType,
    fields: Vec<FieldMeta>,
}

impl Meta {
    pub fn new(doctype: DocType) -> Result<Self, SettingsError> {
        let mut seen = HashSet::new();
        for df in &doctype.fields {
            if !seen.insert(df.fieldname.as_str()) {
                return Err(SettingsError::Schema(format!(
                    "{}: duplicate field `{}`",
                    doctype.name, df.fieldname
                )));
            }
        }

        let fields = doctype
            .fields
            .iter()
            .map(|df| {
                Ok(FieldMeta {
                    depends_on: compile(df, df.depends_on.as_deref(), &seen)?,
                    mandatory_depends_on: compile(df, df.mandatory_depends_on.as_deref(), &seen)?,
                    field: df.clone(),
                })
            })
            .collect::<Result<Vec<_>, SettingsError>>()?;

        Ok(Self { doctype, fields })
    }

    pub fn banking_settings() -> Result<Self, SettingsError> {
        Self::new(DocType::banking_settings()?)
    }

    pub fn name(&self) -> &str {
        &self.doctype.name
    }

    pub fn doctype(&self) -> &DocType {
        &self.doctype
    }

    pub fn is_single(&self) -> bool {
        self.doctype.issingle
    }

    pub fn track_changes(&self) -> bool {
        self.doctype.track_changes
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter()
    }

    pub fn field(&self, fieldname: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.field.fieldname == fieldname)
    }

    /// Fields whose values are persisted with the record.
    pub fn stored_fields(&self) -> impl Iterator<Item = &DocField> {
        self.fields
            .iter()
            .map(|f| &f.field)
            .filter(|df| df.fieldtype.is_stored())
    }

    pub fn secret_fields(&self) -> impl Iterator<Item = &DocField> {
        self.stored_fields().filter(|df| df.fieldtype.is_secret())
    }

    /// A fresh record with every stored field set to its schema default.
    pub fn defaults(&self) -> Doc {
        self.stored_fields()
            .map(|df| {
                let value = match (df.fieldtype, df.default.as_deref()) {
                    (_, Some(raw)) => value_from_text(df.fieldtype, raw),
                    (FieldType::Check | FieldType::Int, None) => Value::from(0),
                    (_, None) => Value::Null,
                };
                (df.fieldname.clone(), value)
            })
            .collect()
    }

    pub fn permits(&self, role: &str, ptype: PermType) -> bool {
        permission::has_permission(&self.doctype.permissions, role, ptype)
    }
}

/// Decode a persisted text value into its JSON form for the field type.
pub fn value_from_text(fieldtype: FieldType, raw: &str) -> Value {
    match fieldtype {
        FieldType::Check | FieldType::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(0)),
        _ => Value::String(raw.to_string()),
    }
}

/// Encode a value for persistence; `None` for null.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}

fn compile(
    df: &DocField,
    source: Option<&str>,
    known: &HashSet<&str>,
) -> Result<Option<Condition>, SettingsError> {
    let Some(source) = source else {
        return Ok(None);
    };
    let condition = Condition::parse(source).map_err(|error| SettingsError::Condition {
        field: df.fieldname.clone(),
        expression: source.to_string(),
        error,
    })?;
    if let Some(unknown) = condition.fields().into_iter().find(|f| !known.contains(f)) {
        return Err(SettingsError::Schema(format!(
            "condition on `{}` references unknown field `{unknown}`",
            df.fieldname
        )));
    }
    Ok(Some(condition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_follow_the_schema() {
        let meta = Meta::banking_settings().unwrap();
        let doc = meta.defaults();
        assert_eq!(doc["enabled"], json!(0));
        assert_eq!(doc["enable_klarna_kosma"], json!(1));
        assert_eq!(doc["use_test_environment"], json!(0));
        assert_eq!(doc["enable_ebics"], json!(0));
        assert_eq!(doc["admin_endpoint"], json!("https://banking.alyf.de"));
        assert_eq!(doc["customer_id"], Value::Null);
        assert!(!doc.contains_key("subscription"));
        assert!(!doc.contains_key("column_break_6"));
    }

    #[test]
    fn secret_fields_are_passwords() {
        let meta = Meta::banking_settings().unwrap();
        let secrets: Vec<_> = meta.secret_fields().map(|f| f.fieldname.as_str()).collect();
        assert_eq!(secrets, vec!["api_token", "fintech_license_key"]);
    }

    #[test]
    fn rejects_duplicate_fields() {
        let dt = DocType::from_json(
            r#"{"name": "X", "fields": [
                {"fieldname": "a", "fieldtype": "Check"},
                {"fieldname": "a", "fieldtype": "Data"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(Meta::new(dt), Err(SettingsError::Schema(_))));
    }

    #[test]
    fn rejects_conditions_on_unknown_fields() {
        let dt = DocType::from_json(
            r#"{"name": "X", "fields": [
                {"fieldname": "a", "fieldtype": "Check", "depends_on": "eval:doc.missing"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(Meta::new(dt), Err(SettingsError::Schema(msg)) if msg.contains("missing")));
    }

    #[test]
    fn rejects_malformed_conditions() {
        let dt = DocType::from_json(
            r#"{"name": "X", "fields": [
                {"fieldname": "a", "fieldtype": "Check", "mandatory_depends_on": "eval:doc.a &&"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            Meta::new(dt),
            Err(SettingsError::Condition { field, .. }) if field == "a"
        ));
    }

    #[test]
    fn text_round_trip_by_type() {
        assert_eq!(value_from_text(FieldType::Check, "1"), json!(1));
        assert_eq!(value_from_text(FieldType::Data, "1"), json!("1"));
        assert_eq!(value_to_text(&json!(true)).as_deref(), Some("1"));
        assert_eq!(value_to_text(&json!(0)).as_deref(), Some("0"));
        assert_eq!(value_to_text(&Value::Null), None);
    }
}
