use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;
use std::time::Duration;

use entitlement_engine::{
    config::Config,
    database::{create_pool, run_migrations},
    events::EventBus,
    external::HttpGateway,
    handlers,
    services::{
        CatalogService, EntitlementResolver, RenewalReconciler, SubscriptionService, UsageMeter,
    },
    store::OrmStore,
    tasks,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    let config = Config::from_toml().expect("Failed to load configuration file");

    let pool = create_pool(&config.database)
        .await
        .expect("Failed to create database connection pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let store = Arc::new(OrmStore::new(pool));
    let gateway = Arc::new(
        HttpGateway::new(config.gateway.clone()).expect("Failed to build payment gateway client"),
    );
    let events = EventBus::default();
    let engine = config.engine.clone();

    let catalog = Arc::new(CatalogService::new(
        store.clone(),
        engine.free_plan_id.clone(),
        Duration::from_secs(engine.catalog_ttl_secs),
    ));
    let meter = Arc::new(UsageMeter::new(store.clone()));
    let subscriptions = Arc::new(SubscriptionService::new(
        store.clone(),
        catalog.clone(),
        engine.clone(),
    ));
    let resolver = Arc::new(EntitlementResolver::new(
        subscriptions.clone(),
        catalog.clone(),
        meter.clone(),
    ));
    let reconciler = Arc::new(RenewalReconciler::new(
        store.clone(),
        subscriptions.clone(),
        catalog.clone(),
        gateway,
        events.clone(),
        engine.clone(),
    ));

    tasks::spawn_all(reconciler.clone(), events.clone(), engine.sweep_interval_secs);

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    let server_config = config.server.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::from(subscriptions.clone()))
            .app_data(web::Data::from(meter.clone()))
            .app_data(web::Data::from(resolver.clone()))
            .app_data(web::Data::from(reconciler.clone()))
            .configure(handlers::webhook_config)
            .configure(handlers::entitlement_config)
            .configure(handlers::subscription_config)
    })
    .bind((server_config.host.as_str(), server_config.port))?
    .run()
    .await
}
