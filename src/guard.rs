use crate::errors::{Rejection, RollcallError};
use crate::geo::{self, Coordinate, Geofence};
use crate::repository::Repository;
use crate::types::AttendanceEvent;
use chrono::NaiveDate;
use std::sync::Arc;

/// Result of testing a reported position against a class fence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FenceCheck {
    /// The class has no fence, so location cannot reject the attempt.
    Unfenced,
    Inside { distance_m: f64, radius_m: f64 },
    Outside { distance_m: f64, radius_m: f64 },
}

impl FenceCheck {
    pub fn passed(&self) -> bool {
        !matches!(self, FenceCheck::Outside { .. })
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match *self {
            FenceCheck::Outside {
                distance_m,
                radius_m,
            } => Some(Rejection::OutsideGeofence {
                distance_m,
                radius_m,
            }),
            _ => None,
        }
    }
}

/// Duplicate and geofence rules for a single attendance attempt.
pub struct AttendanceGuard<R> {
    repo: Arc<R>,
}

impl<R: Repository> AttendanceGuard<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// The committed record for this subject, class and day, if any.
    pub async fn existing_record(
        &self,
        subject: &str,
        class_id: i32,
        date: NaiveDate,
    ) -> Result<Option<AttendanceEvent>, RollcallError> {
        self.repo.find_attendance(subject, class_id, date).await
    }

    pub async fn already_marked(
        &self,
        subject: &str,
        class_id: i32,
        date: NaiveDate,
    ) -> Result<bool, RollcallError> {
        Ok(self.existing_record(subject, class_id, date).await?.is_some())
    }

    pub fn within_geofence(reported: &Coordinate, fence: &Geofence) -> bool {
        geo::distance_meters(reported, &fence.center) <= fence.radius_m
    }

    pub fn check_fence(reported: &Coordinate, fence: Option<&Geofence>) -> FenceCheck {
        let Some(fence) = fence else {
            return FenceCheck::Unfenced;
        };

        let distance_m = geo::distance_meters(reported, &fence.center);
        if distance_m <= fence.radius_m {
            FenceCheck::Inside {
                distance_m,
                radius_m: fence.radius_m,
            }
        } else {
            FenceCheck::Outside {
                distance_m,
                radius_m: fence.radius_m,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DatabaseConnection;

    type Guard = AttendanceGuard<DatabaseConnection>;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_within_geofence_boundary_cases() {
        let fence = Geofence::new(coord(40.0, -75.0), 50.0).unwrap();

        assert!(Guard::within_geofence(&coord(40.0, -75.0), &fence));
        assert!(Guard::within_geofence(&coord(40.0004, -75.0), &fence));
        assert!(!Guard::within_geofence(&coord(40.001, -75.0), &fence));
    }

    #[test]
    fn test_hundred_meter_fence_at_origin() {
        let fence = Geofence::new(coord(0.0, 0.0), 100.0).unwrap();
        // 0.00045 deg of latitude is about 50 m, 0.00135 deg about 150 m
        assert!(Guard::within_geofence(&coord(0.00045, 0.0), &fence));
        assert!(!Guard::within_geofence(&coord(0.00135, 0.0), &fence));
    }

    #[test]
    fn test_check_fence_reports_distance() {
        let fence = Geofence::new(coord(40.0, -75.0), 50.0).unwrap();

        match Guard::check_fence(&coord(40.001, -75.0), Some(&fence)) {
            FenceCheck::Outside {
                distance_m,
                radius_m,
            } => {
                assert!((distance_m - 111.2).abs() < 0.5);
                assert_eq!(radius_m, 50.0);
            }
            other => panic!("expected Outside, got {other:?}"),
        }

        let inside = Guard::check_fence(&coord(40.0004, -75.0), Some(&fence));
        assert!(inside.passed());
        assert!(inside.rejection().is_none());
    }

    #[test]
    fn test_unfenced_class_never_rejects() {
        let check = Guard::check_fence(&coord(-89.0, 179.0), None);
        assert_eq!(check, FenceCheck::Unfenced);
        assert!(check.passed());
    }
}
