//! Persistence contract consumed by the attendance engine.

use crate::errors::RollcallError;
use crate::geo::Geofence;
use crate::storage;
use crate::types::{AttendanceEvent, AttendanceStatus, ClassRecord, Credential, NewAttendance};
use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::DatabaseConnection;

#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_attendance(
        &self,
        subject: &str,
        class_id: i32,
        date: NaiveDate,
    ) -> Result<Option<AttendanceEvent>, RollcallError>;

    /// Must fail with [`RollcallError::Duplicate`] when a record for the same
    /// subject, class and date already exists.
    async fn save_attendance(&self, event: NewAttendance) -> Result<AttendanceEvent, RollcallError>;

    async fn update_attendance(
        &self,
        id: i32,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<Option<AttendanceEvent>, RollcallError>;

    async fn list_class_attendance(
        &self,
        class_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, RollcallError>;

    async fn list_subject_attendance(
        &self,
        subject: &str,
    ) -> Result<Vec<AttendanceEvent>, RollcallError>;

    async fn find_class(&self, class_id: i32) -> Result<Option<ClassRecord>, RollcallError>;

    /// `Ok(None)` covers both an unknown class and an unfenced one.
    async fn find_class_geofence(&self, class_id: i32) -> Result<Option<Geofence>, RollcallError> {
        Ok(self.find_class(class_id).await?.and_then(|c| c.geofence))
    }

    async fn find_credential(&self, subject: &str) -> Result<Option<Credential>, RollcallError>;

    /// Store `credential` as the subject's only credential.
    async fn save_credential(&self, credential: &Credential) -> Result<Credential, RollcallError>;

    async fn touch_credential(&self, subject: &str, used_at: i64) -> Result<(), RollcallError>;

    async fn delete_credential(&self, subject: &str) -> Result<bool, RollcallError>;
}

#[async_trait]
impl Repository for DatabaseConnection {
    async fn find_attendance(
        &self,
        subject: &str,
        class_id: i32,
        date: NaiveDate,
    ) -> Result<Option<AttendanceEvent>, RollcallError> {
        storage::find_attendance(self, subject, class_id, date).await
    }

    async fn save_attendance(&self, event: NewAttendance) -> Result<AttendanceEvent, RollcallError> {
        storage::insert_attendance(self, event).await
    }

    async fn update_attendance(
        &self,
        id: i32,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<Option<AttendanceEvent>, RollcallError> {
        storage::update_attendance(self, id, status, note).await
    }

    async fn list_class_attendance(
        &self,
        class_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, RollcallError> {
        storage::list_class_attendance(self, class_id, date).await
    }

    async fn list_subject_attendance(
        &self,
        subject: &str,
    ) -> Result<Vec<AttendanceEvent>, RollcallError> {
        storage::list_subject_attendance(self, subject).await
    }

    async fn find_class(&self, class_id: i32) -> Result<Option<ClassRecord>, RollcallError> {
        storage::get_class(self, class_id).await
    }

    async fn find_credential(&self, subject: &str) -> Result<Option<Credential>, RollcallError> {
        storage::get_credential_by_subject(self, subject).await
    }

    async fn save_credential(&self, credential: &Credential) -> Result<Credential, RollcallError> {
        storage::replace_credential(self, credential).await
    }

    async fn touch_credential(&self, subject: &str, used_at: i64) -> Result<(), RollcallError> {
        storage::touch_credential(self, subject, used_at).await
    }

    async fn delete_credential(&self, subject: &str) -> Result<bool, RollcallError> {
        storage::delete_credential(self, subject).await
    }
}
