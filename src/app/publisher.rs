use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use thiserror::Error;

use crate::app::broker::{PubError, StopSignal, TelemetryPublisher};
use crate::domain::clock::Clock;
use crate::domain::simulator::SessionSimulator;
use crate::domain::telemetry::{CodecError, SessionTelemetry, encode};

#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error(transparent)]
    Publish(#[from] PubError),
}

pub struct PublishLoop {
    simulator: SessionSimulator<StdRng>,
    clock: Arc<dyn Clock + Send + Sync>,
    topic: String,
    interval: Duration,
}

impl PublishLoop {
    pub fn new(
        simulator: SessionSimulator<StdRng>,
        clock: Arc<dyn Clock + Send + Sync>,
        topic: String,
        interval: Duration,
    ) -> Self {
        Self {
            simulator,
            clock,
            topic,
            interval,
        }
    }

    pub fn tick(
        &mut self,
        publisher: &dyn TelemetryPublisher,
    ) -> Result<SessionTelemetry, TickError> {
        let telemetry = self.simulator.step(self.clock.now());
        let payload = encode(&telemetry)?;
        publisher.publish(&self.topic, &payload)?;
        Ok(telemetry)
    }

    // Returned on stop so a later connection resumes the same session.
    pub fn run(mut self, publisher: &dyn TelemetryPublisher, stop: &StopSignal) -> Self {
        tracing::info!(
            topic = %self.topic,
            interval_secs = self.interval.as_secs(),
            "publish loop started"
        );

        while !stop.is_triggered() {
            match self.tick(publisher) {
                Ok(telemetry) => tracing::debug!(
                    topic = %self.topic,
                    session_id = telemetry.session_id,
                    energy_delivered_kwh = telemetry.energy_delivered_kwh,
                    duration_seconds = telemetry.duration_seconds,
                    "published simulated telemetry"
                ),
                Err(error) => {
                    tracing::warn!(topic = %self.topic, error = %error, "publish tick failed")
                }
            }

            if stop.wait_timeout(self.interval) {
                break;
            }
        }

        tracing::info!(topic = %self.topic, "publish loop stopped");
        self
    }

    pub fn simulator(&self) -> &SessionSimulator<StdRng> {
        &self.simulator
    }
}
