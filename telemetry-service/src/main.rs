fn main() {
    if let Err(err) = charging_telemetry::app::run_service() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
