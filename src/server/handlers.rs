use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::info;

use crate::db::DbVersion;
use crate::doctype::{Doc, DocType, PermType};
use crate::error::SettingsError;
use crate::server::auth::Caller;
use crate::server::router::SettingsState;
use crate::settings::{FieldStates, SettingsView};

const DEFAULT_VERSIONS: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct VersionsQuery {
    pub limit: Option<u32>,
}

/// Parse a JSON object body into a record patch.
fn parse_doc(body: &[u8]) -> Result<Doc, SettingsError> {
    serde_json::from_slice(body).map_err(|e| SettingsError::BadRequest(e.to_string()))
}

/// GET /api/doctype/banking-settings -> the schema document.
pub async fn get_doctype(
    State(state): State<SettingsState>,
    caller: Caller,
) -> Result<Json<DocType>, SettingsError> {
    caller.require(&state, PermType::Read)?;
    Ok(Json(state.handle.meta().doctype().clone()))
}

/// GET /api/settings -> record, field states and last save time.
pub async fn get_settings(
    State(state): State<SettingsState>,
    caller: Caller,
) -> Result<Json<SettingsView>, SettingsError> {
    caller.require(&state, PermType::Read)?;
    Ok(Json(state.handle.get().await?))
}

/// PUT /api/settings -> validate and save a partial record.
pub async fn update_settings(
    State(state): State<SettingsState>,
    caller: Caller,
    body: Bytes,
) -> Result<Json<SettingsView>, SettingsError> {
    caller.require(&state, PermType::Write)?;
    let patch = parse_doc(&body)?;
    let view = state.handle.update(patch).await?;
    info!(role = %caller.role, "settings updated");
    Ok(Json(view))
}

/// POST /api/settings/field-states -> field states for an unsaved draft.
pub async fn preview_field_states(
    State(state): State<SettingsState>,
    caller: Caller,
    body: Bytes,
) -> Result<Json<FieldStates>, SettingsError> {
    caller.require(&state, PermType::Read)?;
    let draft = parse_doc(&body)?;
    Ok(Json(state.handle.preview(draft).await?))
}

/// POST /api/settings/subscription -> fetch the subscription from the
/// admin app and show it on the record.
pub async fn refresh_subscription(
    State(state): State<SettingsState>,
    caller: Caller,
) -> Result<Json<SettingsView>, SettingsError> {
    caller.require(&state, PermType::Write)?;
    let creds = state.handle.admin_credentials().await?;
    let subscription = state.admin_client.fetch_subscription(&creds).await?;
    info!(
        role = %caller.role,
        plan = ?subscription.plan,
        "subscription refreshed"
    );
    Ok(Json(state.handle.set_subscription(subscription).await?))
}

/// GET /api/settings/versions?limit=N -> change history, newest first.
pub async fn list_versions(
    State(state): State<SettingsState>,
    caller: Caller,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<Vec<DbVersion>>, SettingsError> {
    caller.require(&state, PermType::Read)?;
    let limit = query.limit.unwrap_or(DEFAULT_VERSIONS);
    Ok(Json(state.handle.versions(limit).await?))
}
