pub mod settings_actor;

pub use settings_actor::{SettingsHandle, spawn};
