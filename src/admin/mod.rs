//! Client side of the banking admin app: subscription lookup and error
//! translation.

pub mod client;
pub mod error;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use client::AdminClient;
pub use error::{BankingError, classify_error};

pub const SUBSCRIPTION_METHOD: &str = "banking_admin.api.get_subscription";
pub const AUTH_HEADER: &str = "Alyf-Banking-Authorization";

/// Subscription details as returned by the admin app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub valid_till: Option<NaiveDate>,
    /// EBICS license delivered alongside the subscription. Never echoed back.
    #[serde(default, skip_serializing)]
    pub fintech_license: Option<FintechLicense>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct FintechLicense {
    pub key: String,
    pub licensee_name: String,
}

impl std::fmt::Debug for FintechLicense {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FintechLicense")
            .field("key", &"<redacted>")
            .field("licensee_name", &self.licensee_name)
            .finish()
    }
}

/// What it takes to talk to the admin app on behalf of this site.
#[derive(Clone, PartialEq)]
pub struct AdminCredentials {
    pub endpoint: String,
    pub customer_id: String,
    pub api_token: String,
}

impl AdminCredentials {
    /// `{endpoint}/api/method/{method}`.
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/api/method/{method}", self.endpoint.trim_end_matches('/'))
    }

    pub fn auth_value(&self) -> String {
        format!("Token {}:{}", self.customer_id, self.api_token)
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("endpoint", &self.endpoint)
            .field("customer_id", &self.customer_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}
