use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use kameo::actor::ActorRef;
use std::sync::Arc;

use crate::actors::{DlqActor, HealthMonitorActor};
use crate::inventory::StockLedger;
use crate::metrics::Metrics;
use crate::publisher::SalePublisher;

mod routes;

// ============================================================================
// HTTP Surface
// ============================================================================
//
// Thin actix-web layer over the pipeline: sale intake (publisher), stock
// reads and restocks (ledger), dead letters, health and Prometheus metrics.
// Runs on its own actix System in a dedicated thread.
//
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<SalePublisher>,
    pub ledger: Arc<StockLedger>,
    pub metrics: Arc<Metrics>,
    pub dlq: Option<ActorRef<DlqActor>>,
    pub health: Option<ActorRef<HealthMonitorActor>>,
}

/// Register all routes on an app (shared by the server and tests)
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/sales", web::post().to(routes::create_sale))
        .route("/stock/{product_id}", web::get().to(routes::get_stock))
        .route("/stock/{product_id}", web::put().to(routes::set_stock))
        .route("/stock/{product_id}/adjust", web::post().to(routes::adjust_stock))
        .route("/dlq", web::get().to(routes::list_dead_letters))
        .route("/health", web::get().to(routes::health))
        .route("/metrics", web::get().to(routes::metrics));
}

/// Start the HTTP server on a dedicated thread and return its handle once bound.
pub async fn spawn_http_server(state: AppState, host: String, port: u16) -> anyhow::Result<ServerHandle> {
    let (handle_tx, handle_rx) = tokio::sync::oneshot::channel();

    std::thread::Builder::new()
        .name("http-server".to_string())
        .spawn(move || {
            let system = actix_web::rt::System::new();
            let result = system.block_on(async move {
                tracing::info!("Starting HTTP server on http://{}:{}", host, port);

                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(state.clone()))
                        .configure(configure)
                })
                .bind((host.as_str(), port));

                let server = match server {
                    Ok(server) => server.run(),
                    Err(e) => {
                        let _ = handle_tx.send(Err(e.to_string()));
                        return Ok(());
                    }
                };

                let _ = handle_tx.send(Ok(server.handle()));
                server.await
            });

            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        })?;

    match handle_rx.await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e)) => Err(anyhow::anyhow!("failed to bind HTTP server: {}", e)),
        Err(_) => Err(anyhow::anyhow!("HTTP server thread exited before binding")),
    }
}
