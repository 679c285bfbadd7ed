//! Plausibility guard for the companion location feed.
//!
//! A reported position implying travel faster than the configured limit
//! relative to the user's previous accepted reading is rejected and never
//! stored, so spoofed coordinates cannot feed location-gated gameplay.

use std::time::SystemTime;

use tracing::warn;
use uuid::Uuid;

use crate::{error::ServiceError, state::SharedState};

/// Mean earth radius used by the great-circle distance.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Last accepted reading for a user.
#[derive(Debug, Clone, Copy)]
pub struct GeoPosition {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// When the reading was taken.
    pub recorded_at: SystemTime,
}

/// Great-circle distance between two readings, in kilometres.
fn haversine_km(from: &GeoPosition, to: &GeoPosition) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Accept or reject a position report against the user's previous reading.
///
/// Accepted readings replace the stored one; rejected readings leave it
/// untouched so a spoofer cannot "walk" the baseline forward.
pub fn report_position(
    state: &SharedState,
    user_id: Uuid,
    position: GeoPosition,
) -> Result<(), ServiceError> {
    let limit_kmh = state.config().max_speed_kmh();

    if let Some(previous) = state.positions().get(&user_id) {
        let elapsed = position
            .recorded_at
            .duration_since(previous.recorded_at)
            .unwrap_or_default();
        // Floor at one second so rapid-fire reports do not divide by zero.
        let hours = elapsed.as_secs_f64().max(1.0) / 3600.0;
        let speed_kmh = haversine_km(&previous, &position) / hours;

        if speed_kmh > limit_kmh {
            warn!(
                %user_id,
                speed_kmh = format_args!("{speed_kmh:.1}"),
                limit_kmh,
                "rejecting implausible movement"
            );
            return Err(ServiceError::SuspiciousMovement {
                speed_kmh,
                limit_kmh,
            });
        }
    }

    state.positions().insert(user_id, position);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{config::AppConfig, state::memory_state};

    fn at(seconds: u64, latitude: f64, longitude: f64) -> GeoPosition {
        GeoPosition {
            latitude,
            longitude,
            recorded_at: SystemTime::UNIX_EPOCH + Duration::from_secs(seconds),
        }
    }

    #[tokio::test]
    async fn plausible_walk_is_accepted() {
        let state = memory_state(AppConfig::default()).await;
        let user = Uuid::new_v4();

        report_position(&state, user, at(0, 48.8566, 2.3522)).unwrap();
        // ~1.1 km in a minute is well under the limit.
        report_position(&state, user, at(60, 48.8666, 2.3522)).unwrap();
    }

    #[tokio::test]
    async fn teleport_is_rejected_and_not_stored() {
        let state = memory_state(AppConfig::default()).await;
        let user = Uuid::new_v4();

        report_position(&state, user, at(0, 48.0, 2.0)).unwrap();

        // One degree of latitude (~111 km) in a minute is ~6600 km/h.
        let err = report_position(&state, user, at(60, 49.0, 2.0)).unwrap_err();
        match err {
            ServiceError::SuspiciousMovement { speed_kmh, .. } => {
                assert!(speed_kmh > 5000.0, "speed was {speed_kmh}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The rejected reading must not become the new baseline.
        let stored = state.positions().get(&user).unwrap();
        assert_eq!(stored.latitude, 48.0);
    }

    #[tokio::test]
    async fn first_report_is_always_accepted() {
        let state = memory_state(AppConfig::default()).await;
        let user = Uuid::new_v4();
        // No baseline yet, even an aircraft-speed position lands.
        report_position(&state, user, at(0, -33.8688, 151.2093)).unwrap();
        assert!(state.positions().contains_key(&user));
    }
}
