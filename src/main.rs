use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use produce_orders as api;
use api::ai::{DeliveryVerifier, EInvoiceGenerator, HttpFlowClient};
use api::config::{AppConfig, StorageBackend};
use api::handlers::{AppServices, Collaborators};
use api::notifications::{LogOnlyMessagingClient, MessagingClient, WhatsAppClient};
use api::payments::HttpBillGateway;
use api::repositories::{InMemoryOrderRepository, OrderRepository, SeaOrmOrderRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("loading configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::metrics::init();
    api::handlers::health::init_start_time();

    let repository = build_repository(&cfg).await?;
    let collaborators = Collaborators {
        repository,
        gateway: Arc::new(
            HttpBillGateway::new(cfg.payment_gateway.clone())
                .context("building payment gateway client")?,
        ),
        messaging: build_messaging(&cfg)?,
        delivery_verifier: None,
        e_invoicer: None,
    };
    let collaborators = with_ai_flows(collaborators, &cfg)?;

    let services = AppServices::new(collaborators, &cfg);
    let app_state = api::AppState {
        config: Arc::new(cfg.clone()),
        services,
    };
    let app = api::app(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("parsing listen address")?;
    info!(%addr, environment = %cfg.environment, "produce-orders listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("shutdown complete");
    Ok(())
}

async fn build_repository(cfg: &AppConfig) -> anyhow::Result<Arc<dyn OrderRepository>> {
    match cfg.storage_backend {
        StorageBackend::Memory => {
            warn!("using in-memory order storage; orders are lost on restart");
            Ok(Arc::new(InMemoryOrderRepository::new()))
        }
        StorageBackend::Database => {
            let db = api::db::establish_connection_with_config(&api::db::DbConfig::from(cfg))
                .await
                .context("connecting to the database")?;
            if cfg.auto_migrate {
                api::migrator::run_migrations(&db).await.map_err(|e| {
                    error!("Failed running migrations: {}", e);
                    e
                })?;
            }
            Ok(Arc::new(SeaOrmOrderRepository::new(Arc::new(db))))
        }
    }
}

fn build_messaging(cfg: &AppConfig) -> anyhow::Result<Arc<dyn MessagingClient>> {
    let messaging = &cfg.messaging;
    match (
        messaging.enabled,
        messaging.phone_number_id.as_deref(),
        messaging.access_token.as_deref(),
    ) {
        (true, Some(phone_number_id), Some(access_token)) => {
            info!("WhatsApp notifications enabled");
            Ok(Arc::new(
                WhatsAppClient::new(
                    messaging.api_base_url.clone(),
                    phone_number_id,
                    access_token,
                    Duration::from_secs(messaging.request_timeout_secs),
                )
                .context("building WhatsApp client")?,
            ))
        }
        _ => {
            info!("messaging disabled; notifications will only be logged");
            Ok(Arc::new(LogOnlyMessagingClient))
        }
    }
}

fn with_ai_flows(mut collaborators: Collaborators, cfg: &AppConfig) -> anyhow::Result<Collaborators> {
    let Some(base_url) = cfg.ai_flows.base_url.as_deref() else {
        info!("AI flows not configured; delivery verification and e-invoicing are unavailable");
        return Ok(collaborators);
    };
    let client = Arc::new(HttpFlowClient::new(base_url).context("building AI flow client")?);
    let verifier: Arc<dyn DeliveryVerifier> = client.clone();
    let invoicer: Arc<dyn EInvoiceGenerator> = client;
    collaborators.delivery_verifier = Some(verifier);
    collaborators.e_invoicer = Some(invoicer);
    Ok(collaborators)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
