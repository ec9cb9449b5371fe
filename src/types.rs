use crate::errors::RollcallError;
use crate::geo::{Coordinate, Geofence};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Excused => "EXCUSED",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = RollcallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Older rows were written in lower case
        match s.to_ascii_uppercase().as_str() {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            "LATE" => Ok(AttendanceStatus::Late),
            "EXCUSED" => Ok(AttendanceStatus::Excused),
            other => Err(RollcallError::Validation(format!(
                "unknown attendance status `{other}`"
            ))),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How presence was established for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationMethod {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "geofence")]
    Geofence,
    #[serde(rename = "biometric+geofence")]
    BiometricGeofence,
    #[serde(rename = "testing")]
    Testing,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::Manual => "manual",
            VerificationMethod::Geofence => "geofence",
            VerificationMethod::BiometricGeofence => "biometric+geofence",
            VerificationMethod::Testing => "testing",
        }
    }
}

impl FromStr for VerificationMethod {
    type Err = RollcallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(VerificationMethod::Manual),
            "geofence" => Ok(VerificationMethod::Geofence),
            "biometric+geofence" => Ok(VerificationMethod::BiometricGeofence),
            "testing" => Ok(VerificationMethod::Testing),
            other => Err(RollcallError::Validation(format!(
                "unknown verification method `{other}`"
            ))),
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed attendance record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub id: i32,
    pub subject: String,
    pub class_id: i32,
    pub date: NaiveDate,
    pub timestamp: i64,
    pub status: AttendanceStatus,
    pub verification_method: VerificationMethod,
    pub note: Option<String>,
    pub coordinate: Option<Coordinate>,
}

/// Attendance record about to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendance {
    pub subject: String,
    pub class_id: i32,
    pub date: NaiveDate,
    pub timestamp: i64,
    pub status: AttendanceStatus,
    pub verification_method: VerificationMethod,
    pub note: Option<String>,
    pub coordinate: Option<Coordinate>,
}

/// Where one attendance day ends and the next begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBoundary {
    /// Calendar day in the server's local time zone.
    Local,
    /// Calendar day at a fixed offset from UTC.
    Fixed(FixedOffset),
}

impl DayBoundary {
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            DayBoundary::Local => instant.with_timezone(&chrono::Local).date_naive(),
            DayBoundary::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassRecord {
    pub id: i32,
    pub name: String,
    pub geofence: Option<Geofence>,
    pub created_at: i64,
}

/// Public-key credential bound to a single subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credential {
    pub subject: String,
    pub credential_id: String,
    pub public_key: String,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}
