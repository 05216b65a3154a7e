//! HTTP server assembly for clipduel.
//!
//! Wraps the API router from `clipduel-api` with request tracing, a
//! per-request timeout, and an optional static asset directory.

pub mod config;

pub use config::ServerConfig;

use axum::Router;
use clipduel_api::{AppState, api_router};
use clipduel_core::store::BallotStore;
use tower_http::{services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the complete application router.
pub fn app<S>(state: AppState<S>, config: &ServerConfig) -> Router
where
  S: BallotStore + 'static,
{
  let mut router = api_router(state);

  if let Some(dir) = &config.static_dir {
    info!(dir = %dir.display(), "serving static assets");
    router = router.fallback_service(ServeDir::new(dir));
  }

  router
    .layer(TimeoutLayer::new(config.request_timeout()))
    .layer(TraceLayer::new_for_http())
}

// ─── Shutdown ─────────────────────────────────────────────────────────────────

/// Resolve on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "failed to install Ctrl+C handler");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        tracing::error!(error = %e, "failed to install SIGTERM handler");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c    => info!("received Ctrl+C, shutting down"),
    _ = terminate => info!("received terminate signal, shutting down"),
  }
}
