pub mod admin;
pub mod config;
pub mod crypto;
pub mod db;
pub mod doctype;
pub mod error;
pub mod server;
pub mod service;
pub mod settings;

pub use error::SettingsError;
pub use settings::BankingSettings;
