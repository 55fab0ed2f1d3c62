use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::admin::Subscription;
use crate::doctype::Doc;
use crate::error::SettingsError;

pub const DEFAULT_ADMIN_ENDPOINT: &str = "https://banking.alyf.de";

/// Typed view of the Banking Settings record. Secret fields hold masks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BankingSettings {
    #[serde(with = "check")]
    pub enabled: bool,
    pub admin_endpoint: Option<String>,
    pub customer_id: Option<String>,
    pub api_token: Option<String>,
    #[serde(with = "check")]
    pub enable_klarna_kosma: bool,
    #[serde(with = "check")]
    pub use_test_environment: bool,
    #[serde(with = "check")]
    pub enable_ebics: bool,
    pub fintech_license_key: Option<String>,
    pub fintech_licensee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
}

impl Default for BankingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            admin_endpoint: Some(DEFAULT_ADMIN_ENDPOINT.to_string()),
            customer_id: None,
            api_token: None,
            enable_klarna_kosma: true,
            use_test_environment: false,
            enable_ebics: false,
            fintech_license_key: None,
            fintech_licensee_name: None,
            subscription: None,
        }
    }
}

/// Klarna Kosma environment selected by `use_test_environment`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KosmaEnvironment {
    Production,
    Playground,
}

impl BankingSettings {
    pub fn from_doc(doc: &Doc) -> Result<Self, SettingsError> {
        Ok(serde_json::from_value(Value::Object(doc.clone()))?)
    }

    pub fn has_api_token(&self) -> bool {
        self.api_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn is_kosma_active(&self) -> bool {
        self.enabled && self.enable_klarna_kosma
    }

    pub fn is_ebics_active(&self) -> bool {
        self.enabled && self.enable_ebics
    }

    pub fn kosma_environment(&self) -> KosmaEnvironment {
        if self.use_test_environment {
            KosmaEnvironment::Playground
        } else {
            KosmaEnvironment::Production
        }
    }
}

/// `Check` fields: stored as 0/1, read from 0/1 or booleans.
mod check {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(i64::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Check {
            Bool(bool),
            Int(i64),
            Null(()),
        }
        Ok(match Check::deserialize(deserializer)? {
            Check::Bool(b) => b,
            Check::Int(i) => i != 0,
            Check::Null(()) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctype::Meta;
    use serde_json::json;

    #[test]
    fn schema_defaults_match_typed_defaults() {
        let meta = Meta::banking_settings().unwrap();
        let settings = BankingSettings::from_doc(&meta.defaults()).unwrap();
        assert_eq!(settings, BankingSettings::default());
        assert!(!settings.enabled);
        assert!(settings.enable_klarna_kosma);
        assert!(!settings.enable_ebics);
        assert_eq!(settings.admin_endpoint.as_deref(), Some(DEFAULT_ADMIN_ENDPOINT));
    }

    #[test]
    fn decodes_checks_and_derives_flags() {
        let doc = json!({
            "enabled": 1,
            "enable_klarna_kosma": 1,
            "use_test_environment": true,
            "enable_ebics": 0,
            "api_token": "*****"
        });
        let settings = BankingSettings::from_doc(doc.as_object().unwrap()).unwrap();
        assert!(settings.is_kosma_active());
        assert!(!settings.is_ebics_active());
        assert!(settings.has_api_token());
        assert_eq!(settings.kosma_environment(), KosmaEnvironment::Playground);
    }

    #[test]
    fn serializes_checks_as_integers() {
        let value = serde_json::to_value(BankingSettings::default()).unwrap();
        assert_eq!(value["enabled"], json!(0));
        assert_eq!(value["enable_klarna_kosma"], json!(1));
        assert!(value.get("subscription").is_none());
    }
}
