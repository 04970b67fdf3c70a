use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod auth;
mod chain;
mod config;
mod controllers;
mod crypto;
mod db;
mod models;
mod notifications;
mod scheduler;

use auth::WalletAuthenticator;
use chain::RpcChainReader;
use config::Config;
use db::Database;
use notifications::{DeliveryPolicy, HttpWebhookTransport, NotificationService, WebhookDispatcher};
use scheduler::DeadlineSweeper;

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub auth: Arc<WalletAuthenticator>,
    pub notifications: Arc<NotificationService>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    log::info!("Using chain RPC endpoint for contract wallet checks");
    let chain = RpcChainReader::new(&config.rpc_url).expect("Failed to initialize RPC client");
    let chain = Arc::new(chain);
    let auth = Arc::new(WalletAuthenticator::new(db.clone(), chain, &config));

    log::info!("Initializing webhook dispatcher");
    let transport = HttpWebhookTransport::new().expect("Failed to initialize webhook client");
    let transport = Arc::new(transport);
    let dispatcher = Arc::new(WebhookDispatcher::new(
        db.clone(),
        transport,
        DeliveryPolicy::from(&config.webhook),
    ));
    let notifications = Arc::new(NotificationService::new(db.clone(), dispatcher));

    // Deadline sweeper (interval 0 disables it)
    let sweeper_shutdown_tx = if config.deadline_sweep_interval_secs > 0 {
        let sweeper = Arc::new(DeadlineSweeper::new(
            db.clone(),
            notifications.clone(),
            config.deadline_sweep_interval_secs,
        ));
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            sweeper.start(rx).await;
        });
        Some(tx)
    } else {
        log::info!("[Deadline] Sweeper disabled");
        None
    };

    log::info!("Starting {} backend on port {}", config.app_name, port);

    let state = web::Data::new(AppState {
        db,
        config,
        auth,
        notifications,
    });

    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config_routes)
            .configure(controllers::agents::config)
            .configure(controllers::notifications::config)
            .configure(controllers::tasks::config)
            .configure(controllers::webhooks::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await;

    if let Some(tx) = sweeper_shutdown_tx {
        let _ = tx.send(());
    }

    result
}
