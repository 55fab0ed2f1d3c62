use banking_settings::admin::AdminClient;
use banking_settings::config::CONFIG;
use banking_settings::crypto::SecretCipher;
use banking_settings::db::SettingsStorage;
use banking_settings::server::{AccessKeys, SettingsState, settings_router};
use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &*CONFIG;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.database.url,
        listen_addr = %cfg.basic.listen_addr,
        loglevel = %cfg.basic.loglevel,
        key_file = %cfg.encryption.key_file.display(),
    );

    let access = AccessKeys::from_config(&cfg.basic);
    if access.is_empty() {
        warn!("no API keys configured; every request will be rejected");
    }

    let cipher = SecretCipher::load_or_create(&cfg.encryption)?;
    let storage = SettingsStorage::connect(&cfg.database.url).await?;
    let handle = banking_settings::service::spawn(storage, cipher).await?;
    let admin_client = AdminClient::new(&cfg.admin)?;

    let state = SettingsState::new(handle, admin_client, access);
    let app = settings_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
