pub mod auth;
pub mod handlers;
pub mod router;

pub use auth::{AccessKeys, Caller};
pub use router::{SettingsState, settings_router};
