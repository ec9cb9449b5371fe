use crate::errors::RollcallError;
use crate::repository::Repository;
use crate::types::Credential;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the one-credential-per-subject rule on top of the repository.
pub struct CredentialRegistry<R> {
    repo: Arc<R>,
}

impl<R: Repository> CredentialRegistry<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Register a credential, superseding whatever the subject had before.
    pub async fn register(
        &self,
        subject: &str,
        credential_id: &str,
        public_key: &str,
    ) -> Result<Credential, RollcallError> {
        let credential = Credential {
            subject: subject.to_string(),
            credential_id: credential_id.to_string(),
            public_key: public_key.to_string(),
            created_at: Utc::now().timestamp(),
            last_used_at: None,
        };

        let stored = self.repo.save_credential(&credential).await?;
        info!(subject, credential_id, "Registered biometric credential");
        Ok(stored)
    }

    pub async fn find(&self, subject: &str) -> Result<Option<Credential>, RollcallError> {
        self.repo.find_credential(subject).await
    }

    pub async fn exists(&self, subject: &str) -> Result<bool, RollcallError> {
        Ok(self.find(subject).await?.is_some())
    }

    /// Stamp `last_used_at`. Silently does nothing for an unknown subject.
    pub async fn touch(&self, subject: &str) -> Result<(), RollcallError> {
        debug!(subject, "Touching credential");
        self.repo
            .touch_credential(subject, Utc::now().timestamp())
            .await
    }

    pub async fn revoke(&self, subject: &str) -> Result<bool, RollcallError> {
        let removed = self.repo.delete_credential(subject).await?;
        if removed {
            info!(subject, "Revoked biometric credential");
        }
        Ok(removed)
    }
}
