use userdesk::{app, state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "userdesk=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;
    tracing::info!(
        hash_cost = app_state.config.hash_cost,
        secure_cookies = app_state.config.cookie.secure,
        "application state ready"
    );

    let addr = app::bind_addr()?;
    let store = app_state.store.clone();
    app::serve(app::build_app(app_state), addr).await?;

    store.close().await;
    tracing::info!("shut down cleanly");
    Ok(())
}
