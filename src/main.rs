fn main() {
    if let Err(err) = charging_telemetry::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
