//! Validation of submitted changes against the schema and the field states
//! they produce.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use url::Url;

use super::rules::field_states;
use crate::crypto;
use crate::doctype::{Doc, DocField, FieldType, Meta};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldErrorKind {
    Missing,
    UnknownField,
    NotEditable,
    InvalidType { expected: &'static str },
    InvalidUrl { reason: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: FieldErrorKind,
}

impl FieldError {
    pub fn new(df: &DocField, kind: FieldErrorKind) -> Self {
        Self {
            field: df.fieldname.clone(),
            label: df.label().to_string(),
            kind,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldErrorKind::Missing => write!(f, "{} is mandatory", self.label),
            FieldErrorKind::UnknownField => write!(f, "unknown field `{}`", self.field),
            FieldErrorKind::NotEditable => write!(f, "{} cannot be edited", self.label),
            FieldErrorKind::InvalidType { expected } => {
                write!(f, "{} must be {expected}", self.label)
            }
            FieldErrorKind::InvalidUrl { reason } => {
                write!(f, "{} is not a valid URL: {reason}", self.label)
            }
        }
    }
}

/// Every problem found in one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<FieldError> {
        self.0
    }

    pub fn has(&self, field: &str, kind: &FieldErrorKind) -> bool {
        self.0.iter().any(|e| e.field == field && &e.kind == kind)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "Validation failed: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<FieldError> for ValidationErrors {
    fn from(e: FieldError) -> Self {
        Self(vec![e])
    }
}

/// Who is writing. System writes may fill read-only or hidden fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    System,
}

/// A field change as recorded in the version history: `[field, old, new]`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Change(pub String, pub Value, pub Value);

/// Result of a successful validation, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpdate {
    /// Full record after the change; secrets hold masks.
    pub doc: Doc,
    /// New plaintext secrets; `None` clears the stored value.
    pub secrets: Vec<(String, Option<String>)>,
    pub changes: Vec<Change>,
}

/// Validate `patch` against `current` and return the merged record.
pub fn validate_update(
    meta: &Meta,
    current: &Doc,
    patch: &Doc,
    origin: Origin,
) -> Result<ValidatedUpdate, ValidationErrors> {
    let mut errors = Vec::new();
    let mut merged = current.clone();
    let mut secrets = Vec::new();
    let mut touched = Vec::new();

    for (fieldname, raw) in patch {
        let Some(fm) = meta.field(fieldname) else {
            errors.push(FieldError {
                field: fieldname.clone(),
                label: fieldname.clone(),
                kind: FieldErrorKind::UnknownField,
            });
            continue;
        };
        let df = &fm.field;
        if !df.fieldtype.is_stored() {
            errors.push(error(df, FieldErrorKind::NotEditable));
            continue;
        }

        let value = match normalize(df.fieldtype, raw) {
            Ok(v) => v,
            Err(expected) => {
                errors.push(error(df, FieldErrorKind::InvalidType { expected }));
                continue;
            }
        };

        let value = if df.fieldtype.is_secret() {
            match value {
                Value::String(s) if crypto::is_mask(&s) => continue,
                Value::String(s) => {
                    let masked = Value::String(crypto::mask(&s));
                    secrets.push((df.fieldname.clone(), Some(s)));
                    masked
                }
                _ => {
                    if current.get(fieldname).is_some_and(|v| !is_empty(v)) {
                        secrets.push((df.fieldname.clone(), None));
                    }
                    Value::Null
                }
            }
        } else {
            value
        };

        merged.insert(df.fieldname.clone(), value);
        touched.push(df);
    }

    let states = field_states(meta, &merged);
    let mut changes = Vec::new();

    for df in touched {
        let old = current.get(&df.fieldname).cloned().unwrap_or(Value::Null);
        let new = merged.get(&df.fieldname).cloned().unwrap_or(Value::Null);
        let secret_written = secrets.iter().any(|(f, _)| f == &df.fieldname);
        if old == new && !secret_written {
            continue;
        }
        let editable = states.get(&df.fieldname).is_some_and(|s| s.editable());
        if origin == Origin::User && !editable {
            errors.push(error(df, FieldErrorKind::NotEditable));
            continue;
        }
        changes.push(Change(df.fieldname.clone(), old, new));
    }

    for df in meta.stored_fields() {
        let value = merged.get(&df.fieldname).unwrap_or(&Value::Null);
        let required = states.get(&df.fieldname).is_some_and(|s| s.required);
        if required && is_empty(value) {
            errors.push(error(df, FieldErrorKind::Missing));
            continue;
        }
        if df.is_url() {
            if let Value::String(s) = value {
                if let Err(reason) = check_url(s) {
                    errors.push(error(df, FieldErrorKind::InvalidUrl { reason }));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(ValidatedUpdate {
            doc: merged,
            secrets,
            changes,
        })
    } else {
        Err(ValidationErrors(errors))
    }
}

fn error(df: &DocField, kind: FieldErrorKind) -> FieldError {
    FieldError::new(df, kind)
}

/// Coerce a submitted value into the stored representation for its type.
fn normalize(fieldtype: FieldType, raw: &Value) -> Result<Value, &'static str> {
    match fieldtype {
        FieldType::Check => match raw {
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                Ok(raw.clone())
            }
            _ => Err("0, 1, true or false"),
        },
        FieldType::Int => match raw {
            Value::Number(n) if n.is_i64() => Ok(raw.clone()),
            Value::Null => Ok(Value::from(0)),
            _ => Err("an integer"),
        },
        _ => match raw {
            Value::Null => Ok(Value::Null),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            // secrets are kept byte-exact
            Value::String(_) if fieldtype.is_secret() => Ok(raw.clone()),
            Value::String(s) => Ok(Value::String(s.trim().to_string())),
            _ => Err("a string"),
        },
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> Meta {
        Meta::banking_settings().unwrap()
    }

    fn patch(v: Value) -> Doc {
        v.as_object().cloned().unwrap()
    }

    fn enabled_record(meta: &Meta) -> Doc {
        validate_update(
            meta,
            &meta.defaults(),
            &patch(json!({"enabled": 1, "customer_id": "C-42", "api_token": "tok-123"})),
            Origin::User,
        )
        .unwrap()
        .doc
    }

    #[test]
    fn enabling_requires_credentials() {
        let meta = meta();
        let errs = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"enabled": true, "admin_endpoint": ""})),
            Origin::User,
        )
        .unwrap_err();

        for field in ["admin_endpoint", "customer_id", "api_token"] {
            assert!(errs.has(field, &FieldErrorKind::Missing), "{field} not reported");
        }
        assert_eq!(errs.errors().len(), 3);
    }

    #[test]
    fn enabling_with_credentials_succeeds() {
        let meta = meta();
        let update = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"enabled": true, "customer_id": " C-42 ", "api_token": "tok-123"})),
            Origin::User,
        )
        .unwrap();

        assert_eq!(update.doc["enabled"], json!(1));
        assert_eq!(update.doc["customer_id"], json!("C-42"));
        assert_eq!(update.doc["api_token"], json!("*******"));
        assert_eq!(
            update.secrets,
            vec![("api_token".to_string(), Some("tok-123".to_string()))]
        );
        assert_eq!(update.changes.len(), 3);
    }

    #[test]
    fn masked_secret_keeps_stored_value() {
        let meta = meta();
        let current = enabled_record(&meta);
        let update = validate_update(
            &meta,
            &current,
            &patch(json!({"api_token": "*******", "customer_id": "C-43"})),
            Origin::User,
        )
        .unwrap();

        assert!(update.secrets.is_empty());
        assert_eq!(update.doc["api_token"], json!("*******"));
        assert_eq!(
            update.changes,
            vec![Change("customer_id".into(), json!("C-42"), json!("C-43"))]
        );
    }

    #[test]
    fn secrets_are_not_trimmed() {
        let meta = meta();
        let current = enabled_record(&meta);
        let update = validate_update(
            &meta,
            &current,
            &patch(json!({"api_token": " tok ", "customer_id": "  C-44 "})),
            Origin::User,
        )
        .unwrap();

        assert_eq!(
            update.secrets,
            vec![("api_token".to_string(), Some(" tok ".to_string()))]
        );
        assert_eq!(update.doc["api_token"], json!("*****"));
        assert_eq!(update.doc["customer_id"], json!("C-44"));
    }

    #[test]
    fn clearing_a_required_secret_is_rejected() {
        let meta = meta();
        let current = enabled_record(&meta);
        let errs = validate_update(&meta, &current, &patch(json!({"api_token": ""})), Origin::User)
            .unwrap_err();
        assert!(errs.has("api_token", &FieldErrorKind::Missing));
    }

    #[test]
    fn hidden_test_environment_is_not_editable() {
        let meta = meta();
        let errs = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"enable_klarna_kosma": 0, "use_test_environment": 1})),
            Origin::User,
        )
        .unwrap_err();
        assert!(errs.has("use_test_environment", &FieldErrorKind::NotEditable));

        // resubmitting the unchanged value of a hidden field is harmless
        let ok = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"enable_klarna_kosma": 0, "use_test_environment": 0})),
            Origin::User,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn license_fields_are_not_user_editable() {
        let meta = meta();
        for flags in [json!({"enable_ebics": 0}), json!({"enable_ebics": 1})] {
            let mut p = patch(flags);
            p.insert("fintech_licensee_name".into(), json!("ALYF GmbH"));
            p.insert("fintech_license_key".into(), json!("LIC-1"));
            let errs = validate_update(&meta, &meta.defaults(), &p, Origin::User).unwrap_err();
            assert!(errs.has("fintech_licensee_name", &FieldErrorKind::NotEditable));
            assert!(errs.has("fintech_license_key", &FieldErrorKind::NotEditable));
        }
    }

    #[test]
    fn system_writes_fill_read_only_fields() {
        let meta = meta();
        let update = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"fintech_licensee_name": "ALYF GmbH", "fintech_license_key": "LIC-1"})),
            Origin::System,
        )
        .unwrap();
        assert_eq!(update.doc["fintech_licensee_name"], json!("ALYF GmbH"));
        assert_eq!(update.doc["fintech_license_key"], json!("*****"));
    }

    #[test]
    fn type_and_unknown_field_errors() {
        let meta = meta();
        let errs = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"enabled": "yes", "customer_id": 5, "colour": "red", "subscription": "x"})),
            Origin::User,
        )
        .unwrap_err();
        assert!(errs.has("enabled", &FieldErrorKind::InvalidType { expected: "0, 1, true or false" }));
        assert!(errs.has("customer_id", &FieldErrorKind::InvalidType { expected: "a string" }));
        assert!(errs.has("colour", &FieldErrorKind::UnknownField));
        assert!(errs.has("subscription", &FieldErrorKind::NotEditable));
    }

    #[test]
    fn admin_endpoint_must_be_http_url() {
        let meta = meta();
        let errs = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"admin_endpoint": "ftp://banking.example"})),
            Origin::User,
        )
        .unwrap_err();
        assert!(matches!(
            errs.errors()[0].kind,
            FieldErrorKind::InvalidUrl { .. }
        ));

        let errs = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"admin_endpoint": "not a url"})),
            Origin::User,
        )
        .unwrap_err();
        assert_eq!(errs.errors()[0].field, "admin_endpoint");
    }

    #[test]
    fn error_message_lists_labels() {
        let meta = meta();
        let errs = validate_update(
            &meta,
            &meta.defaults(),
            &patch(json!({"enabled": 1})),
            Origin::User,
        )
        .unwrap_err();
        let msg = errs.to_string();
        assert!(msg.contains("Customer ID is mandatory"));
        assert!(msg.contains("API Token is mandatory"));
    }
}
