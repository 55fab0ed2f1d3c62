//! Serde model of a DocType definition document.
//!
//! Flags are written as `0`/`1` in the JSON; [`flag`] also accepts booleans.

use serde::{Deserialize, Deserializer, Serialize};

use super::permission::DocPerm;
use crate::error::SettingsError;

const BANKING_SETTINGS_JSON: &str = include_str!("banking_settings.json");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocType {
    pub name: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub issingle: bool,
    #[serde(default, deserialize_with = "flag")]
    pub track_changes: bool,
    #[serde(default)]
    pub field_order: Vec<String>,
    pub fields: Vec<DocField>,
    #[serde(default)]
    pub permissions: Vec<DocPerm>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocField {
    pub fieldname: String,
    pub fieldtype: FieldType,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub mandatory_depends_on: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub read_only: bool,
    #[serde(default, deserialize_with = "flag")]
    pub reqd: bool,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldType {
    Check,
    Data,
    Int,
    Password,
    #[serde(rename = "Small Text")]
    SmallText,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "Section Break")]
    SectionBreak,
    #[serde(rename = "Column Break")]
    ColumnBreak,
}

impl FieldType {
    /// Layout-only fields carry neither value nor state.
    pub fn is_layout(self) -> bool {
        matches!(self, FieldType::SectionBreak | FieldType::ColumnBreak)
    }

    /// Whether values of this type are persisted with the record.
    pub fn is_stored(self) -> bool {
        !self.is_layout() && self != FieldType::Html
    }

    pub fn is_secret(self) -> bool {
        self == FieldType::Password
    }
}

impl DocField {
    /// `Data` fields declared with `options: "URL"`.
    pub fn is_url(&self) -> bool {
        self.fieldtype == FieldType::Data && self.options.as_deref() == Some("URL")
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.fieldname)
    }
}

impl DocType {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The bundled "Banking Settings" definition.
    pub fn banking_settings() -> Result<Self, SettingsError> {
        Self::from_json(BANKING_SETTINGS_JSON)
    }
}

/// A `0`/`1` or boolean flag.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_definition_parses() {
        let dt = DocType::banking_settings().unwrap();
        assert_eq!(dt.name, "Banking Settings");
        assert!(dt.issingle);
        assert!(dt.track_changes);
        assert_eq!(dt.fields.len(), dt.field_order.len());

        let key = dt
            .fields
            .iter()
            .find(|f| f.fieldname == "fintech_license_key")
            .unwrap();
        assert_eq!(key.fieldtype, FieldType::Password);
        assert!(key.read_only);
        assert_eq!(key.depends_on.as_deref(), Some("enable_ebics"));
    }

    #[test]
    fn flags_accept_ints_and_bools() {
        let dt = DocType::from_json(
            r#"{"name": "X", "issingle": true, "fields": [
                {"fieldname": "a", "fieldtype": "Check", "reqd": 1, "read_only": false}
            ]}"#,
        )
        .unwrap();
        assert!(dt.issingle);
        assert!(!dt.track_changes);
        assert!(dt.fields[0].reqd);
        assert!(!dt.fields[0].read_only);
    }

    #[test]
    fn unknown_field_type_is_rejected() {
        let err = DocType::from_json(
            r#"{"name": "X", "fields": [{"fieldname": "a", "fieldtype": "Geolocation"}]}"#,
        );
        assert!(matches!(err, Err(SettingsError::Json(_))));
    }

    #[test]
    fn storage_classes() {
        assert!(FieldType::Check.is_stored());
        assert!(FieldType::Password.is_stored() && FieldType::Password.is_secret());
        assert!(!FieldType::Html.is_stored());
        assert!(FieldType::SectionBreak.is_layout() && !FieldType::SectionBreak.is_stored());
    }
}
