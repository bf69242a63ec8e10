pub mod clock;
pub mod models;
pub mod simulator;
pub mod telemetry;
