// FinSight - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use tracing::info;

use finsight::api::{build_router, AppState};
use finsight::{logging, open_database, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    println!("🌐 FinSight - Transaction Analytics Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = config.database_path();
    let conn = open_database(&db_path)?;
    println!("✓ Database opened: {:?}", db_path);

    let state = AppState::new(conn, config.model_settings());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;

    println!("\n🚀 Server running on http://{}", config.server.bind);
    println!("   API: http://{}/api/health", config.server.bind);
    println!("\n   Press Ctrl+C to stop\n");
    info!(bind = %config.server.bind, "listening");

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
