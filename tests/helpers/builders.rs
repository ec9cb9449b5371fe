use chrono::Duration;
use rollcall::challenge::{ChallengeStore, MemoryChallengeStore};
use rollcall::engine::{AttendanceEngine, EnginePolicy};
use rollcall::geo::{Coordinate, Geofence};
use rollcall::repository::Repository;
use rollcall::storage;
use rollcall::types::{ClassRecord, DayBoundary};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Builder for creating test classes
pub struct ClassBuilder {
    name: String,
    geofence: Option<Geofence>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            geofence: None,
        }
    }

    pub fn with_geofence(mut self, latitude: f64, longitude: f64, radius_m: f64) -> Self {
        let center = Coordinate::new(latitude, longitude).expect("Invalid fence center");
        self.geofence = Some(Geofence::new(center, radius_m).expect("Invalid fence radius"));
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> ClassRecord {
        storage::create_class(db, &self.name, self.geofence)
            .await
            .expect("Failed to create test class")
    }
}

/// Builder for an engine whose challenge store stays reachable from the test
pub struct EngineBuilder {
    ttl: Duration,
    allow_test_marking: bool,
    day_boundary: DayBoundary,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            ttl: Duration::minutes(5),
            allow_test_marking: false,
            day_boundary: DayBoundary::Local,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn allow_test_marking(mut self) -> Self {
        self.allow_test_marking = true;
        self
    }

    pub fn with_day_boundary(mut self, day_boundary: DayBoundary) -> Self {
        self.day_boundary = day_boundary;
        self
    }

    pub fn build<R: Repository>(
        self,
        repo: Arc<R>,
    ) -> (AttendanceEngine<R>, Arc<MemoryChallengeStore>) {
        let store = Arc::new(MemoryChallengeStore::new(self.ttl, 4));
        let policy = EnginePolicy {
            allow_test_marking: self.allow_test_marking,
            day_boundary: self.day_boundary,
            ..EnginePolicy::default()
        };
        let engine = AttendanceEngine::new(
            repo,
            Arc::clone(&store) as Arc<dyn ChallengeStore>,
            policy,
        );
        (engine, store)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn coord(latitude: f64, longitude: f64) -> Coordinate {
    Coordinate::new(latitude, longitude).expect("Invalid coordinate")
}
