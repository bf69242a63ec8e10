use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::mqtt::{BrokerEndpoint, MessageBus, RumqttBus};
use crate::app::broker::{BrokerConnection, BrokerSettings, ConnError, Roles};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::pipeline::IngestionPipeline;
use crate::app::publisher::PublishLoop;
use crate::app::services::{SqliteLogStore, StorePort};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::simulator::{SessionSimulator, SimulatorSettings};

const DELIVERY_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct BrokerHandle<B> {
    connection: BrokerConnection<B>,
    connector: JoinHandle<()>,
}

pub fn open_store(db_path: &str) -> Result<SqliteLogStore, AppError> {
    if let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(AppError::database_init)?;
    }

    let mut connection =
        crate::adapters::db::open_connection(db_path).map_err(AppError::database_init)?;
    crate::adapters::db::run_migrations(&mut connection).map_err(AppError::database_init)?;

    Ok(SqliteLogStore::new(Arc::new(Mutex::new(connection))))
}

fn broker_settings(config: &AppConfig) -> BrokerSettings {
    BrokerSettings {
        endpoint: BrokerEndpoint {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            keepalive: Duration::from_secs(config.mqtt_keepalive_secs),
            client_id: config.mqtt_client_id.clone(),
        },
        topic: config.mqtt_topic.clone(),
        qos: config.mqtt_qos,
        reconnect: config.reconnect_policy(),
        poll_interval: DELIVERY_POLL_INTERVAL,
        ingest_queue_capacity: config.ingest_queue_capacity,
        ingest_workers: config.ingest_workers,
    }
}

fn build_publish_loop(config: &AppConfig) -> Option<PublishLoop> {
    if !config.simulator_enabled {
        return None;
    }

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock);
    let settings = SimulatorSettings {
        device_count: config.simulator_devices,
        ..SimulatorSettings::default()
    };
    let simulator = SessionSimulator::new(
        config.simulator_session_id,
        settings,
        StdRng::from_entropy(),
        clock.now(),
    );

    Some(PublishLoop::new(
        simulator,
        clock,
        config.mqtt_topic.clone(),
        Duration::from_secs(config.publish_interval_secs),
    ))
}

fn build_connection<B: MessageBus + 'static>(
    bus: B,
    settings: BrokerSettings,
    store: SqliteLogStore,
    publish_loop: Option<PublishLoop>,
) -> BrokerConnection<B> {
    let pipeline = IngestionPipeline::new(store, SystemClock);
    BrokerConnection::new(
        bus,
        settings,
        Roles {
            ingestion: Some(Arc::new(pipeline)),
            publish_loop,
        },
    )
}

fn start_broker<B: MessageBus + 'static>(connection: BrokerConnection<B>) -> BrokerHandle<B> {
    let connector_connection = connection.clone();
    let connector = std::thread::spawn(move || match connector_connection.connect_with_retry() {
        Ok(()) => {}
        Err(ConnError::Cancelled) => tracing::info!("broker connect cancelled"),
        Err(error) => tracing::error!(error = %error, "broker connect gave up"),
    });

    BrokerHandle {
        connection,
        connector,
    }
}

fn shutdown<B: MessageBus + 'static>(handle: BrokerHandle<B>) -> Result<(), AppError> {
    handle.connection.disconnect().map_err(AppError::runtime)?;

    if handle.connector.join().is_err() {
        return Err(AppError::runtime("broker connector thread panicked"));
    }

    Ok(())
}

fn serve_http(store: SqliteLogStore, bind: &str) -> Result<(), AppError> {
    let store: Arc<dyn StorePort> = Arc::new(store);
    let api_state = ApiState { store };

    tracing::info!(bind = %bind, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                let cors = Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET"])
                    .allow_any_header();

                App::new()
                    .wrap(cors)
                    .app_data(web::Data::new(api_state.clone()))
                    .configure(configure_routes)
            })
            .bind(bind)?
            .run()
            .await
        })
        .map_err(AppError::runtime)
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let store = open_store(&config.db_path)?;
    let connection = build_connection(
        RumqttBus::new(),
        broker_settings(&config),
        store.clone(),
        build_publish_loop(&config),
    );
    let broker = start_broker(connection);

    let server_result = serve_http(store, &config.http_bind);
    let shutdown_result = shutdown(broker);

    server_result.and(shutdown_result)
}

pub fn run_service(config: AppConfig) -> Result<(), AppError> {
    let store = open_store(&config.db_path)?;
    let connection = build_connection(
        RumqttBus::new(),
        broker_settings(&config),
        store,
        build_publish_loop(&config),
    );
    let broker = start_broker(connection);

    let signal_result =
        actix_web::rt::System::new().block_on(async { actix_web::rt::signal::ctrl_c().await });
    tracing::info!("shutdown requested");

    let shutdown_result = shutdown(broker);
    signal_result.map_err(AppError::runtime)?;
    shutdown_result
}

pub fn run_api(config: AppConfig) -> Result<(), AppError> {
    let store = open_store(&config.db_path)?;
    serve_http(store, &config.http_bind)
}
