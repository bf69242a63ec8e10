pub mod broker;
pub mod config;
mod error;
mod logging;
pub mod pipeline;
pub mod publisher;
mod runtime;
pub mod services;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    let config = bootstrap("full")?;
    runtime::run(config)
}

pub fn run_service() -> Result<(), AppError> {
    let config = bootstrap("service")?;
    runtime::run_service(config)
}

pub fn run_api() -> Result<(), AppError> {
    let config = bootstrap("api")?;
    runtime::run_api(config)
}

fn bootstrap(mode: &'static str) -> Result<config::AppConfig, AppError> {
    let config = config::AppConfig::from_env()?;
    logging::init(config.log_format)?;

    tracing::info!(
        mode,
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        mqtt_topic = %config.mqtt_topic,
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        simulator_enabled = config.simulator_enabled,
        publish_interval_secs = config.publish_interval_secs,
        "application bootstrap initialized"
    );

    Ok(config)
}
