use rand::Rng;

use crate::domain::clock::TimestampMs;
use crate::domain::telemetry::SessionTelemetry;

pub const DEFAULT_DEVICE_COUNT: usize = 6;
pub const DEFAULT_ENERGY_RATE_KWH_PER_SECOND: f64 = 0.0001;
pub const DEFAULT_COST_CENTS_PER_KWH: f64 = 23.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorSettings {
    pub device_count: usize,
    pub energy_rate_kwh_per_second: f64,
    pub cost_cents_per_kwh: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            device_count: DEFAULT_DEVICE_COUNT,
            energy_rate_kwh_per_second: DEFAULT_ENERGY_RATE_KWH_PER_SECOND,
            cost_cents_per_kwh: DEFAULT_COST_CENTS_PER_KWH,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSimulator<R> {
    session_id: u64,
    settings: SimulatorSettings,
    rng: R,
    cumulative_energy_kwh: f64,
    cumulative_duration_seconds: f64,
    last_tick_at: TimestampMs,
}

impl<R: Rng> SessionSimulator<R> {
    pub fn new(
        session_id: u64,
        settings: SimulatorSettings,
        rng: R,
        started_at: TimestampMs,
    ) -> Self {
        Self {
            session_id,
            settings,
            rng,
            cumulative_energy_kwh: 0.0,
            cumulative_duration_seconds: 0.0,
            last_tick_at: started_at,
        }
    }

    pub fn step(&mut self, now: TimestampMs) -> SessionTelemetry {
        let elapsed = now.seconds_since(self.last_tick_at);

        let active_count = (0..self.settings.device_count)
            .filter(|_| self.rng.gen_bool(0.5))
            .count();
        let energy_rate = self.settings.energy_rate_kwh_per_second * active_count as f64;

        self.cumulative_energy_kwh += elapsed * energy_rate;
        self.cumulative_duration_seconds += elapsed;
        self.last_tick_at = now;

        tracing::debug!(
            session_id = self.session_id,
            active_count,
            elapsed_seconds = elapsed,
            cumulative_energy_kwh = self.cumulative_energy_kwh,
            "simulated session step"
        );

        SessionTelemetry {
            session_id: self.session_id,
            energy_delivered_kwh: round_to_cents(self.cumulative_energy_kwh),
            duration_seconds: self.cumulative_duration_seconds as u64,
            session_cost_cents: self.session_cost_cents(),
        }
    }

    pub fn session_cost_cents(&self) -> u64 {
        (self.cumulative_energy_kwh * self.settings.cost_cents_per_kwh).round() as u64
    }

    pub fn cumulative_energy_kwh(&self) -> f64 {
        self.cumulative_energy_kwh
    }

    pub fn cumulative_duration_seconds(&self) -> f64 {
        self.cumulative_duration_seconds
    }

    pub fn last_tick_at(&self) -> TimestampMs {
        self.last_tick_at
    }
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
