use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RollcallError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(rollcall::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(rollcall::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(rollcall::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(rollcall::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Invalid input: {0}")]
    #[diagnostic(
        code(rollcall::validation),
        help("Latitude must lie in [-90, 90], longitude in [-180, 180] and identifiers must be non-empty")
    )]
    Validation(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(rollcall::not_found))]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    #[diagnostic(code(rollcall::duplicate))]
    Duplicate(String),

    #[error("{0}")]
    #[diagnostic(code(rollcall::other))]
    Other(String),
}

/// Broad family a [`Rejection`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    NotFound,
    ProtocolState,
    Geofence,
    Policy,
}

/// Expected business outcome that refuses an attendance attempt.
///
/// These never travel as `Err`; the engine reports them inside its outcome
/// types so callers can render the reason code and message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("You are {distance_m:.1} m from the class location; the allowed radius is {radius_m:.1} m")]
    OutsideGeofence { distance_m: f64, radius_m: f64 },

    #[error("No biometric credential is registered for `{subject}`; register one first")]
    NoCredentialRegistered { subject: String },

    #[error("Class {class_id} does not exist")]
    UnknownClass { class_id: i32 },

    #[error("The challenge expired or was never issued; start again")]
    ChallengeExpiredOrMissing,

    #[error("The asserted credential does not match the registered one")]
    CredentialMismatch,

    #[error("Credential `{credential_id}` is already registered to another subject")]
    CredentialInUse { credential_id: String },

    #[error("Test marking is disabled on this deployment")]
    TestMarkingDisabled,
}

impl Rejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Rejection::OutsideGeofence { .. } => "OUTSIDE_GEOFENCE",
            Rejection::NoCredentialRegistered { .. } => "NO_CREDENTIAL_REGISTERED",
            Rejection::UnknownClass { .. } => "UNKNOWN_CLASS",
            Rejection::ChallengeExpiredOrMissing => "CHALLENGE_EXPIRED_OR_MISSING",
            Rejection::CredentialMismatch => "CREDENTIAL_MISMATCH",
            Rejection::CredentialInUse { .. } => "CREDENTIAL_IN_USE",
            Rejection::TestMarkingDisabled => "TEST_MARKING_DISABLED",
        }
    }

    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::OutsideGeofence { .. } => RejectionKind::Geofence,
            Rejection::NoCredentialRegistered { .. } | Rejection::UnknownClass { .. } => {
                RejectionKind::NotFound
            }
            Rejection::ChallengeExpiredOrMissing
            | Rejection::CredentialMismatch
            | Rejection::CredentialInUse { .. } => RejectionKind::ProtocolState,
            Rejection::TestMarkingDisabled => RejectionKind::Policy,
        }
    }
}
