//! Generic `RangeSensor` trait for the forward-facing distance sensor.

use async_trait::async_trait;
use mower_types::{MowerError, SENSOR_TIMEOUT_DISTANCE_CM};

/// Outcome of a single distance measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeReading {
    /// Measured distance in centimetres.
    Distance(f32),
    /// The trigger or echo phase did not complete in time.
    Timeout,
}

impl RangeReading {
    /// Distance in centimetres, with a timeout read as "clear"
    /// ([`SENSOR_TIMEOUT_DISTANCE_CM`]).
    pub fn distance_cm(self) -> f32 {
        match self {
            RangeReading::Distance(d) => d,
            RangeReading::Timeout => SENSOR_TIMEOUT_DISTANCE_CM,
        }
    }
}

/// An ultrasonic (or equivalent) distance sensor.
///
/// Implementations bound each of the trigger and echo phases to 100 ms and
/// report [`RangeReading::Timeout`] when either overruns.
#[async_trait]
pub trait RangeSensor: Send + Sync {
    /// Stable identifier for this sensor, e.g. `"front_ultrasonic"`.
    fn id(&self) -> &str;

    /// Take one measurement.
    ///
    /// # Errors
    ///
    /// Returns [`MowerError::Sensor`] for failures other than a timeout
    /// (e.g. the GPIO line could not be driven).
    async fn measure_distance_cm(&mut self) -> Result<RangeReading, MowerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSensor {
        id: String,
        reading: RangeReading,
    }

    #[async_trait]
    impl RangeSensor for FixedSensor {
        fn id(&self) -> &str {
            &self.id
        }

        async fn measure_distance_cm(&mut self) -> Result<RangeReading, MowerError> {
            Ok(self.reading)
        }
    }

    #[test]
    fn timeout_reads_as_clear() {
        assert_eq!(RangeReading::Timeout.distance_cm(), 400.0);
        assert_eq!(RangeReading::Distance(21.5).distance_cm(), 21.5);
    }

    #[tokio::test]
    async fn fixed_sensor_reports_reading() {
        let mut sensor = FixedSensor {
            id: "front".to_string(),
            reading: RangeReading::Distance(42.0),
        };
        assert_eq!(sensor.id(), "front");
        let reading = sensor.measure_distance_cm().await.unwrap();
        assert_eq!(reading, RangeReading::Distance(42.0));
    }
}
