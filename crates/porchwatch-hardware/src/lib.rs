//! Camera, proximity sensor and indicator LED abstractions.
//!
//! Driver calls block; the engine runs them on the blocking pool.

mod simulated;

use std::{sync::Arc, time::Duration};

use futures::stream::{BoxStream, StreamExt};
use porchwatch_types::{vision::Frame, PorchwatchError, Result};
use tracing::debug;

pub use simulated::{LoggingLeds, SimulatedCamera, SimulatedDistanceSensor};

pub trait Camera: Send + Sync {
    /// Acquire the device. Failure here is fatal for the engine.
    fn open(&self) -> Result<()>;
    fn capture_frame(&self) -> Result<Frame>;
    fn close(&self);
}

pub trait DistanceSensor: Send + Sync {
    /// One distance measurement in centimeters; `f64::INFINITY` when nothing is in range.
    fn read_distance_cm(&self) -> Result<f64>;
}

pub trait IndicatorLeds: Send + Sync {
    fn set_privacy(&self, on: bool);
    fn set_flood(&self, on: bool);
    fn release(&self) {}
}

/// Lazily polls `sensor` forever, one reading per `interval`.
///
/// Read failures are reported as `f64::INFINITY`. Each call starts a fresh
/// stream, so a consumer that drops it can simply ask again.
pub fn distance_readings(
    sensor: Arc<dyn DistanceSensor>,
    interval: Duration,
) -> BoxStream<'static, f64> {
    async_stream::stream! {
        loop {
            let handle = Arc::clone(&sensor);
            let reading = match tokio::task::spawn_blocking(move || handle.read_distance_cm()).await {
                Ok(Ok(distance)) => distance,
                Ok(Err(err)) => {
                    debug!("distance read failed: {err}");
                    f64::INFINITY
                }
                Err(err) => {
                    debug!("distance read task failed: {err}");
                    f64::INFINITY
                }
            };
            yield reading;
            tokio::time::sleep(interval).await;
        }
    }
    .boxed()
}

pub fn capture_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Capture(message.into())
}

pub fn sensor_error(message: impl Into<String>) -> PorchwatchError {
    PorchwatchError::Sensor(message.into())
}
