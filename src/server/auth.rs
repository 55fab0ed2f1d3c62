use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::BasicConfig;
use crate::doctype::PermType;
use crate::doctype::permission::ADMINISTRATOR;
use crate::error::SettingsError;
use crate::server::router::SettingsState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Configured API keys and the role each one acts as.
#[derive(Clone, Default)]
pub struct AccessKeys {
    keys: Vec<(String, String)>,
}

impl AccessKeys {
    /// `admin_key` acts as `Administrator`; blank keys are ignored.
    pub fn from_config(cfg: &BasicConfig) -> Self {
        let mut keys = Vec::new();
        if let Some(admin) = cfg.admin_key.as_deref().filter(|k| !k.is_empty()) {
            keys.push((admin.to_string(), ADMINISTRATOR.to_string()));
        }
        keys.extend(
            cfg.access_keys
                .iter()
                .filter(|k| !k.key.is_empty())
                .map(|k| (k.key.clone(), k.role.clone())),
        );
        Self { keys }
    }

    pub fn with_key(mut self, key: impl Into<String>, role: impl Into<String>) -> Self {
        self.keys.push((key.into(), role.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Role of the first key equal to `presented`. Every configured key is
    /// compared so timing does not reveal which one matched.
    pub fn role_for(&self, presented: &str) -> Option<&str> {
        let mut role = None;
        for (key, key_role) in &self.keys {
            let matched = bool::from(key.as_bytes().ct_eq(presented.as_bytes()));
            if matched && role.is_none() {
                role = Some(key_role.as_str());
            }
        }
        role
    }
}

impl std::fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roles: Vec<&str> = self.keys.iter().map(|(_, r)| r.as_str()).collect();
        f.debug_struct("AccessKeys").field("roles", &roles).finish()
    }
}

/// Key presented via `x-api-key` or `Authorization: Bearer`.
fn presented_key(headers: &HeaderMap, bearer: Option<&str>) -> Option<String> {
    if let Some(hv) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        let hv = hv.trim();
        if !hv.is_empty() {
            return Some(hv.to_string());
        }
    }
    bearer.map(str::to_string)
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub role: String,
}

impl Caller {
    /// Fails with `Forbidden` unless the caller's role holds `perm` on the
    /// settings DocType.
    pub fn require(&self, state: &SettingsState, perm: PermType) -> Result<(), SettingsError> {
        let meta = state.handle.meta();
        if meta.permits(&self.role, perm) {
            return Ok(());
        }
        Err(SettingsError::Forbidden {
            role: self.role.clone(),
            perm,
            doctype: meta.name().to_string(),
        })
    }
}

impl FromRequestParts<SettingsState> for Caller {
    type Rejection = SettingsError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SettingsState,
    ) -> Result<Self, Self::Rejection> {
        let bearer =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .ok();
        let key = presented_key(&parts.headers, bearer.as_ref().map(|b| b.token()))
            .ok_or(SettingsError::Unauthorized)?;

        match state.access.role_for(&key) {
            Some(role) => Ok(Caller {
                role: role.to_string(),
            }),
            None => {
                debug!("rejected request with unknown API key");
                Err(SettingsError::Unauthorized)
            }
        }
    }
}
