//! Attendance decision engine.
//!
//! Every attempt walks `Start -> DuplicateChecked -> ... -> Committed | Rejected`.
//! Business refusals come back as [`Rejection`] values inside the outcome;
//! only infrastructure failures surface as `Err`.

use crate::challenge::{ChallengePurpose, ChallengeStore, MemoryChallengeStore};
use crate::credentials::CredentialRegistry;
use crate::errors::{Rejection, RollcallError};
use crate::geo::Coordinate;
use crate::guard::{AttendanceGuard, FenceCheck};
use crate::repository::Repository;
use crate::settings::{RelyingParty, Settings};
use crate::types::{
    AttendanceEvent, AttendanceStatus, Credential, DayBoundary, NewAttendance,
    VerificationMethod,
};
use base64ct::Encoding;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Deployment knobs the engine needs at decision time.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub timeout_ms: u64,
    pub relying_party: RelyingParty,
    pub allow_test_marking: bool,
    pub day_boundary: DayBoundary,
}

impl EnginePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout_ms: settings.challenge.timeout_ms,
            relying_party: settings.relying_party.clone(),
            allow_test_marking: settings.attendance.allow_test_marking,
            day_boundary: settings.day_boundary(),
        }
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Pipeline position of a marking attempt, in the order checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    DuplicateChecked,
    GeofenceChecked,
    BiometricChecked,
    Committed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    /// A new record was written.
    Committed(AttendanceEvent),
    /// A record already existed for the day; nothing new was written.
    AlreadyMarked(AttendanceEvent),
    Rejected(Rejection),
}

impl MarkOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, MarkOutcome::Rejected(_))
    }

    pub fn event(&self) -> Option<&AttendanceEvent> {
        match self {
            MarkOutcome::Committed(e) | MarkOutcome::AlreadyMarked(e) => Some(e),
            MarkOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            MarkOutcome::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

/// Caller-facing shape of a marking result.
#[derive(Debug, Clone, Serialize)]
pub struct MarkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<AttendanceEvent>,
}

impl From<&MarkOutcome> for MarkResponse {
    fn from(outcome: &MarkOutcome) -> Self {
        match outcome {
            MarkOutcome::Committed(event) => MarkResponse {
                success: true,
                reason_code: None,
                message: "Attendance marked successfully".to_string(),
                event: Some(event.clone()),
            },
            MarkOutcome::AlreadyMarked(event) => MarkResponse {
                success: true,
                reason_code: None,
                message: "Attendance was already marked for this day".to_string(),
                event: Some(event.clone()),
            },
            MarkOutcome::Rejected(rejection) => MarkResponse {
                success: false,
                reason_code: Some(rejection.reason_code()),
                message: rejection.to_string(),
                event: None,
            },
        }
    }
}

/// Material handed to the client when a challenge phase starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeMaterial {
    pub challenge: String,
    pub purpose: ChallengePurpose,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
    pub relying_party: RelyingParty,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    Challenge(ChallengeMaterial),
    AlreadyMarked(AttendanceEvent),
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Registered(Credential),
    Rejected(Rejection),
}

/// Client answer to a registration challenge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Attestation {
    pub credential_id: String,
    pub public_key: String,
}

/// Client answer to a verification challenge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Assertion {
    pub credential_id: String,
}

struct Attempt<'a> {
    subject: &'a str,
    class_id: i32,
    stage: Stage,
}

impl<'a> Attempt<'a> {
    fn new(subject: &'a str, class_id: i32) -> Self {
        Self {
            subject,
            class_id,
            stage: Stage::Start,
        }
    }

    fn advance(&mut self, to: Stage) {
        debug_assert!(
            to >= self.stage,
            "attempt moved back from {:?} to {:?}",
            self.stage,
            to
        );
        debug!(
            subject = self.subject,
            class_id = self.class_id,
            from = ?self.stage,
            to = ?to,
            "Attendance attempt advanced"
        );
        self.stage = to;
    }

    fn reject(mut self, rejection: Rejection) -> Rejection {
        warn!(
            subject = self.subject,
            class_id = self.class_id,
            stage = ?self.stage,
            reason = rejection.reason_code(),
            "{}",
            rejection
        );
        self.stage = Stage::Rejected;
        rejection
    }
}

pub struct AttendanceEngine<R> {
    repo: Arc<R>,
    guard: AttendanceGuard<R>,
    credentials: CredentialRegistry<R>,
    challenges: Arc<dyn ChallengeStore>,
    policy: EnginePolicy,
}

impl<R: Repository> AttendanceEngine<R> {
    pub fn new(repo: Arc<R>, challenges: Arc<dyn ChallengeStore>, policy: EnginePolicy) -> Self {
        Self {
            guard: AttendanceGuard::new(Arc::clone(&repo)),
            credentials: CredentialRegistry::new(Arc::clone(&repo)),
            repo,
            challenges,
            policy,
        }
    }

    /// Engine backed by an in-memory challenge store sized from `settings`.
    pub fn from_settings(repo: Arc<R>, settings: &Settings) -> Self {
        let store = MemoryChallengeStore::new(settings.challenge_ttl(), settings.challenge.shards);
        Self::new(repo, Arc::new(store), EnginePolicy::from_settings(settings))
    }

    pub fn credentials(&self) -> &CredentialRegistry<R> {
        &self.credentials
    }

    /// The attendance day a mark made right now belongs to.
    pub fn today(&self) -> NaiveDate {
        self.policy.day_boundary.date_of(Utc::now())
    }

    // Geofence-only marking

    pub async fn mark_with_geofence(
        &self,
        subject: &str,
        class_id: i32,
        reported: Coordinate,
    ) -> Result<MarkOutcome, RollcallError> {
        require_non_empty("subject", subject)?;
        let now = Utc::now();
        let today = self.policy.day_boundary.date_of(now);
        let mut attempt = Attempt::new(subject, class_id);

        if let Some(existing) = self
            .guard
            .existing_record(subject, class_id, today)
            .await?
        {
            attempt.advance(Stage::Committed);
            return Ok(MarkOutcome::AlreadyMarked(existing));
        }
        attempt.advance(Stage::DuplicateChecked);

        let check = match self.fence_check(class_id, &reported).await? {
            Ok(check) => check,
            Err(rejection) => return Ok(MarkOutcome::Rejected(attempt.reject(rejection))),
        };
        attempt.advance(Stage::GeofenceChecked);

        let method = match check {
            FenceCheck::Unfenced => VerificationMethod::Manual,
            _ => VerificationMethod::Geofence,
        };

        self.commit(
            attempt,
            new_record(subject, class_id, today, now, method, Some(reported)),
        )
        .await
    }

    /// Record presence without location or biometrics. Only honoured when the
    /// deployment allows test marking.
    pub async fn mark_for_testing(
        &self,
        subject: &str,
        class_id: i32,
    ) -> Result<MarkOutcome, RollcallError> {
        require_non_empty("subject", subject)?;
        let now = Utc::now();
        let today = self.policy.day_boundary.date_of(now);
        let attempt = Attempt::new(subject, class_id);

        if !self.policy.allow_test_marking {
            return Ok(MarkOutcome::Rejected(
                attempt.reject(Rejection::TestMarkingDisabled),
            ));
        }

        let record = new_record(subject, class_id, today, now, VerificationMethod::Testing, None);
        self.record_unverified(attempt, record).await
    }

    /// Record a staff decision for any day and status. Location and
    /// biometrics play no part; the one-record-per-day rule still holds.
    pub async fn mark_manually(
        &self,
        subject: &str,
        class_id: i32,
        date: NaiveDate,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<MarkOutcome, RollcallError> {
        require_non_empty("subject", subject)?;
        let attempt = Attempt::new(subject, class_id);

        let record = NewAttendance {
            status,
            note: note.filter(|n| !n.trim().is_empty()),
            ..new_record(subject, class_id, date, Utc::now(), VerificationMethod::Manual, None)
        };
        self.record_unverified(attempt, record).await
    }

    // Credential registration

    pub async fn begin_registration(&self, subject: &str) -> Result<ChallengeMaterial, RollcallError> {
        require_non_empty("subject", subject)?;
        Ok(self.start_challenge(subject, ChallengePurpose::Register, None))
    }

    pub async fn complete_registration(
        &self,
        subject: &str,
        attestation: &Attestation,
    ) -> Result<RegistrationOutcome, RollcallError> {
        require_non_empty("subject", subject)?;
        require_non_empty("credential_id", &attestation.credential_id)?;
        require_non_empty("public_key", &attestation.public_key)?;

        if let Err(rejection) = self.settle_challenge(subject, ChallengePurpose::Register) {
            warn!(subject, reason = rejection.reason_code(), "Registration refused");
            return Ok(RegistrationOutcome::Rejected(rejection));
        }

        match self
            .credentials
            .register(subject, &attestation.credential_id, &attestation.public_key)
            .await
        {
            Ok(credential) => Ok(RegistrationOutcome::Registered(credential)),
            Err(RollcallError::Duplicate(_)) => {
                let rejection = Rejection::CredentialInUse {
                    credential_id: attestation.credential_id.clone(),
                };
                warn!(subject, reason = rejection.reason_code(), "Registration refused");
                Ok(RegistrationOutcome::Rejected(rejection))
            }
            Err(e) => Err(e),
        }
    }

    // Biometric + geofence marking

    pub async fn begin_verification(
        &self,
        subject: &str,
        class_id: i32,
        reported: Coordinate,
    ) -> Result<BeginOutcome, RollcallError> {
        require_non_empty("subject", subject)?;
        let now = Utc::now();
        let today = self.policy.day_boundary.date_of(now);
        let mut attempt = Attempt::new(subject, class_id);

        // No point spending a challenge on a day that is already recorded
        if let Some(existing) = self
            .guard
            .existing_record(subject, class_id, today)
            .await?
        {
            attempt.advance(Stage::Committed);
            return Ok(BeginOutcome::AlreadyMarked(existing));
        }
        attempt.advance(Stage::DuplicateChecked);

        let Some(credential) = self.credentials.find(subject).await? else {
            return Ok(BeginOutcome::Rejected(attempt.reject(
                Rejection::NoCredentialRegistered {
                    subject: subject.to_string(),
                },
            )));
        };

        if let Err(rejection) = self.fence_check(class_id, &reported).await? {
            return Ok(BeginOutcome::Rejected(attempt.reject(rejection)));
        }
        attempt.advance(Stage::GeofenceChecked);

        Ok(BeginOutcome::Challenge(self.start_challenge(
            subject,
            ChallengePurpose::Verify,
            Some(credential.credential_id),
        )))
    }

    /// Finish the biometric protocol. `reported` is the position sent with
    /// this phase; the one from the first phase is never reused.
    pub async fn complete_verification(
        &self,
        subject: &str,
        class_id: i32,
        assertion: &Assertion,
        reported: Coordinate,
    ) -> Result<MarkOutcome, RollcallError> {
        require_non_empty("subject", subject)?;
        let now = Utc::now();
        let today = self.policy.day_boundary.date_of(now);
        let mut attempt = Attempt::new(subject, class_id);

        if let Some(existing) = self
            .guard
            .existing_record(subject, class_id, today)
            .await?
        {
            attempt.advance(Stage::Committed);
            return Ok(MarkOutcome::AlreadyMarked(existing));
        }
        attempt.advance(Stage::DuplicateChecked);

        if let Err(rejection) = self.settle_challenge(subject, ChallengePurpose::Verify) {
            return Ok(MarkOutcome::Rejected(attempt.reject(rejection)));
        }

        let fence = self.fence_check(class_id, &reported).await?;
        let credential = match self.credentials.find(subject).await? {
            None => Err(Rejection::NoCredentialRegistered {
                subject: subject.to_string(),
            }),
            Some(c) if c.credential_id != assertion.credential_id => {
                Err(Rejection::CredentialMismatch)
            }
            Some(c) => Ok(c),
        };

        // A credential refusal outranks the position
        if let Err(rejection) = credential {
            return Ok(MarkOutcome::Rejected(attempt.reject(rejection)));
        }
        if let Err(rejection) = fence {
            return Ok(MarkOutcome::Rejected(attempt.reject(rejection)));
        }
        attempt.advance(Stage::GeofenceChecked);
        attempt.advance(Stage::BiometricChecked);

        self.credentials.touch(subject).await?;

        self.commit(
            attempt,
            new_record(
                subject,
                class_id,
                today,
                now,
                VerificationMethod::BiometricGeofence,
                Some(reported),
            ),
        )
        .await
    }

    // Record maintenance and queries

    /// Correct status and note of an existing record.
    pub async fn correct_attendance(
        &self,
        id: i32,
        status: AttendanceStatus,
        note: Option<String>,
    ) -> Result<AttendanceEvent, RollcallError> {
        let updated = self
            .repo
            .update_attendance(id, status, note)
            .await?
            .ok_or_else(|| RollcallError::NotFound(format!("attendance record {id}")))?;
        info!(id, status = %status, "Corrected attendance record");
        Ok(updated)
    }

    pub async fn class_roster(
        &self,
        class_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, RollcallError> {
        self.repo.list_class_attendance(class_id, date).await
    }

    pub async fn subject_history(&self, subject: &str) -> Result<Vec<AttendanceEvent>, RollcallError> {
        self.repo.list_subject_attendance(subject).await
    }

    pub async fn has_credential(&self, subject: &str) -> Result<bool, RollcallError> {
        self.credentials.exists(subject).await
    }

    pub async fn revoke_credential(&self, subject: &str) -> Result<bool, RollcallError> {
        self.credentials.revoke(subject).await
    }

    pub fn purge_expired_challenges(&self) -> usize {
        let purged = self.challenges.purge_expired();
        if purged > 0 {
            debug!(purged, "Purged expired challenges");
        }
        purged
    }

    // Shared protocol plumbing

    fn start_challenge(
        &self,
        subject: &str,
        purpose: ChallengePurpose,
        credential_ref: Option<String>,
    ) -> ChallengeMaterial {
        let challenge = self.challenges.issue(subject, purpose);
        info!(subject, purpose = purpose.as_str(), "Issued challenge");

        let user_handle = match purpose {
            ChallengePurpose::Register => {
                Some(base64ct::Base64UrlUnpadded::encode_string(subject.as_bytes()))
            }
            ChallengePurpose::Verify => None,
        };

        ChallengeMaterial {
            challenge: challenge.nonce,
            purpose,
            credential_ref,
            user_handle,
            relying_party: self.policy.relying_party.clone(),
            timeout_ms: self.policy.timeout_ms,
        }
    }

    fn settle_challenge(&self, subject: &str, purpose: ChallengePurpose) -> Result<(), Rejection> {
        match self.challenges.consume(subject, purpose) {
            Some(_) => Ok(()),
            None => Err(Rejection::ChallengeExpiredOrMissing),
        }
    }

    /// Outer `Err` is infrastructure failure; inner `Err` is a refusal.
    async fn fence_check(
        &self,
        class_id: i32,
        reported: &Coordinate,
    ) -> Result<Result<FenceCheck, Rejection>, RollcallError> {
        let Some(class) = self.repo.find_class(class_id).await? else {
            return Ok(Err(Rejection::UnknownClass { class_id }));
        };

        let check = AttendanceGuard::<R>::check_fence(reported, class.geofence.as_ref());
        Ok(match check.rejection() {
            Some(rejection) => Err(rejection),
            None => Ok(check),
        })
    }

    /// Duplicate and class checks for marks that skip location and biometrics.
    async fn record_unverified(
        &self,
        mut attempt: Attempt<'_>,
        record: NewAttendance,
    ) -> Result<MarkOutcome, RollcallError> {
        if let Some(existing) = self
            .guard
            .existing_record(&record.subject, record.class_id, record.date)
            .await?
        {
            attempt.advance(Stage::Committed);
            return Ok(MarkOutcome::AlreadyMarked(existing));
        }
        attempt.advance(Stage::DuplicateChecked);

        if self.repo.find_class(record.class_id).await?.is_none() {
            return Ok(MarkOutcome::Rejected(attempt.reject(Rejection::UnknownClass {
                class_id: record.class_id,
            })));
        }

        self.commit(attempt, record).await
    }

    async fn commit(
        &self,
        mut attempt: Attempt<'_>,
        record: NewAttendance,
    ) -> Result<MarkOutcome, RollcallError> {
        let (class_id, date) = (record.class_id, record.date);

        match self.repo.save_attendance(record).await {
            Ok(event) => {
                attempt.advance(Stage::Committed);
                info!(
                    subject = attempt.subject,
                    class_id,
                    method = %event.verification_method,
                    "Attendance committed"
                );
                Ok(MarkOutcome::Committed(event))
            }
            Err(RollcallError::Duplicate(_)) => {
                // A concurrent attempt won the unique index; report its record
                let existing = self
                    .guard
                    .existing_record(attempt.subject, class_id, date)
                    .await?
                    .ok_or_else(|| {
                        RollcallError::Other(format!(
                            "attendance for {} in class {class_id} on {date} vanished after a conflict",
                            attempt.subject
                        ))
                    })?;
                attempt.advance(Stage::Committed);
                Ok(MarkOutcome::AlreadyMarked(existing))
            }
            Err(e) => Err(e),
        }
    }
}

fn new_record(
    subject: &str,
    class_id: i32,
    date: NaiveDate,
    now: DateTime<Utc>,
    method: VerificationMethod,
    coordinate: Option<Coordinate>,
) -> NewAttendance {
    NewAttendance {
        subject: subject.to_string(),
        class_id,
        date,
        timestamp: now.timestamp(),
        status: AttendanceStatus::Present,
        verification_method: method,
        note: None,
        coordinate,
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), RollcallError> {
    if value.trim().is_empty() {
        return Err(RollcallError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_response_for_rejection() {
        let outcome = MarkOutcome::Rejected(Rejection::CredentialMismatch);
        let response = MarkResponse::from(&outcome);

        assert!(!response.success);
        assert_eq!(response.reason_code, Some("CREDENTIAL_MISMATCH"));
        assert!(response.event.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["reason_code"], "CREDENTIAL_MISMATCH");
        assert!(json.get("event").is_none());
    }

    #[test]
    fn test_already_marked_is_success() {
        let event = AttendanceEvent {
            id: 1,
            subject: "alice".to_string(),
            class_id: 3,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            timestamp: 1_741_600_000,
            status: AttendanceStatus::Present,
            verification_method: VerificationMethod::Geofence,
            note: None,
            coordinate: None,
        };
        let outcome = MarkOutcome::AlreadyMarked(event.clone());

        assert!(outcome.is_success());
        assert_eq!(outcome.event(), Some(&event));
        assert!(outcome.rejection().is_none());

        let response = MarkResponse::from(&outcome);
        assert!(response.success);
        assert!(response.reason_code.is_none());
    }

    #[test]
    fn test_attempt_stage_order() {
        let mut attempt = Attempt::new("alice", 3);
        for stage in [
            Stage::DuplicateChecked,
            Stage::GeofenceChecked,
            Stage::BiometricChecked,
            Stage::Committed,
        ] {
            attempt.advance(stage);
            assert_eq!(attempt.stage, stage);
        }
        assert!(Stage::GeofenceChecked < Stage::BiometricChecked);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "attempt moved back")]
    fn test_attempt_cannot_move_back() {
        let mut attempt = Attempt::new("alice", 3);
        attempt.advance(Stage::BiometricChecked);
        attempt.advance(Stage::GeofenceChecked);
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("subject", "alice").is_ok());
        assert!(matches!(
            require_non_empty("subject", "  "),
            Err(RollcallError::Validation(_))
        ));
    }
}
