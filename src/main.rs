// =============================================================================
// Meridian Futures Engine — Main Entry Point
// =============================================================================
//
// The engine starts with auto-trading disabled unless the persisted settings
// say otherwise. Operators flip it on via the dashboard or API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod app_state;
mod binance;
mod clock;
mod engine;
mod error;
mod gate;
mod indicators;
mod notify;
mod reconcile;
mod settings;
mod sizing;
mod store;
mod strategies;
mod trailing;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::clock::{Clock, SystemClock};
use crate::engine::Engine;
use crate::gate::AccountGuard;
use crate::notify::{BusNotifier, EventBus, Notifier};
use crate::settings::Settings;
use crate::store::TradeStore;
use crate::types::LogLevel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Futures Engine — Starting Up            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let settings_path = PathBuf::from(
        std::env::var("MERIDIAN_SETTINGS_PATH")
            .unwrap_or_else(|_| "meridian_settings.json".to_string()),
    );

    let mut settings = Settings::load(&settings_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load settings, using defaults");
        Settings::default()
    });

    // Environment credentials take precedence over the persisted file so
    // secrets can stay out of it entirely.
    if let Ok(key) = std::env::var("BINANCE_API_KEY") {
        if !key.is_empty() {
            settings.api_key = key;
        }
    }
    if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
        if !secret.is_empty() {
            settings.api_secret = secret;
        }
    }
    if let Err(e) = settings.validate() {
        warn!(error = %e, "Persisted settings invalid — falling back to defaults");
        let configured = (settings.api_key.clone(), settings.api_secret.clone());
        settings = Settings::default();
        settings.api_key = configured.0;
        settings.api_secret = configured.1;
    }

    info!(
        pairs = ?settings.trading_pairs,
        testnet = settings.use_testnet,
        auto_trading = settings.auto_trading_enabled,
        configured = settings.is_configured(),
        "settings loaded"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let store = Arc::new(TradeStore::new(settings.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let guard = Arc::new(AccountGuard::new(clock.clone()));
    let bus = EventBus::new();
    let notifier: Arc<dyn Notifier> = Arc::new(BusNotifier::new(store.clone(), bus.clone()));

    let engine = Arc::new(Engine::new(
        store.clone(),
        guard,
        clock.clone(),
        notifier,
        bus.clone(),
    ));

    let state = Arc::new(AppState::new(
        store.clone(),
        engine.clone(),
        bus,
        clock,
        settings_path.clone(),
    ));

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    // ── 4. Launch the engine loop when credentials are present ───────────
    if settings.is_configured() {
        match engine.start(settings) {
            Ok(()) => info!("engine loop started"),
            Err(e) => error!(error = %e, "engine failed to start"),
        }
    } else {
        warn!("API credentials missing — engine idle until configured via the API");
        store.create_log(
            LogLevel::Warning,
            "Engine idle: exchange credentials not configured",
            None,
        );
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    engine.stop();
    if let Err(e) = store.get_settings().save(&settings_path) {
        error!(error = %e, "Failed to save settings on shutdown");
    }

    info!("Meridian Futures Engine shut down complete.");
    Ok(())
}
