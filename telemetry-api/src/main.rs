fn main() {
    if let Err(err) = charging_telemetry::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
