use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;

use crate::admin::AdminClient;
use crate::server::auth::AccessKeys;
use crate::server::handlers;
use crate::service::settings_actor::SettingsHandle;

/// Settings documents are small; anything larger is a mistake.
const BODY_LIMIT: usize = 64 * 1024;

#[derive(Clone)]
pub struct SettingsState {
    pub handle: SettingsHandle,
    pub admin_client: AdminClient,
    pub access: Arc<AccessKeys>,
}

impl SettingsState {
    pub fn new(handle: SettingsHandle, admin_client: AdminClient, access: AccessKeys) -> Self {
        Self {
            handle,
            admin_client,
            access: Arc::new(access),
        }
    }
}

pub fn settings_router(state: SettingsState) -> Router {
    let api = Router::new()
        .route("/doctype/banking-settings", get(handlers::get_doctype))
        .route(
            "/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        )
        .route("/settings/field-states", post(handlers::preview_field_states))
        .route("/settings/subscription", post(handlers::refresh_subscription))
        .route("/settings/versions", get(handlers::list_versions));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}
