use std::sync::Arc;

use sitegate::{app, config::AppConfig, db, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    sitegate::init_tracing("sitegate=debug,axum=info,tower_http=info");

    let config = Arc::new(AppConfig::from_env()?);
    let pool = db::connect(&config).await?;
    db::migrate(&pool).await;

    if config.oauth.is_none() {
        tracing::warn!("OAUTH_SERVER_URL not set; external sign-on is disabled");
    }
    if config.owner_open_id.is_none() {
        tracing::info!("OWNER_OPEN_ID not set; no identity is auto-promoted");
    }

    let state = AppState::init(config, pool)?;
    app::serve(app::build_app(state)).await
}
