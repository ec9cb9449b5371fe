//! Pending challenges for the two-phase credential protocols.
//!
//! Each subject has at most one pending challenge. Issuing a new one replaces
//! whatever was pending, and a challenge older than the configured TTL is
//! treated as absent even if it has not been swept yet.

use base64ct::Encoding;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Bytes of randomness in every nonce (256 bits).
pub const NONCE_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengePurpose {
    Register,
    Verify,
}

impl ChallengePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengePurpose::Register => "REGISTER",
            ChallengePurpose::Verify => "VERIFY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub subject: String,
    pub nonce: String,
    pub purpose: ChallengePurpose,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }
}

/// Keyed store of pending challenges shared by every request in the process.
pub trait ChallengeStore: Send + Sync {
    /// Create a fresh challenge for `subject`, replacing any pending one.
    fn issue(&self, subject: &str, purpose: ChallengePurpose) -> Challenge;

    /// Remove and return the pending challenge if it matches `purpose` and is
    /// still within its lifetime.
    fn consume(&self, subject: &str, purpose: ChallengePurpose) -> Option<Challenge>;

    /// Drop every expired challenge, returning how many were removed.
    fn purge_expired(&self) -> usize;
}

type Shard = Mutex<HashMap<String, Challenge>>;

/// In-memory [`ChallengeStore`] split into independently locked shards, so
/// subjects hashing to different shards never contend.
pub struct MemoryChallengeStore {
    shards: Vec<Shard>,
    ttl: Duration,
}

impl MemoryChallengeStore {
    pub fn new(ttl: Duration, shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self { shards, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue_at(&self, subject: &str, purpose: ChallengePurpose, now: DateTime<Utc>) -> Challenge {
        let challenge = Challenge {
            subject: subject.to_string(),
            nonce: random_nonce(),
            purpose,
            created_at: now,
        };

        let mut shard = self.shard_for(subject);
        // Abandoned challenges of neighbours go on the way
        shard.retain(|_, c| !c.is_expired(now, self.ttl));
        shard.insert(subject.to_string(), challenge.clone());

        challenge
    }

    pub fn consume_at(
        &self,
        subject: &str,
        purpose: ChallengePurpose,
        now: DateTime<Utc>,
    ) -> Option<Challenge> {
        let mut shard = self.shard_for(subject);

        let state = shard
            .get(subject)
            .map(|c| (c.is_expired(now, self.ttl), c.purpose == purpose));

        match state {
            Some((true, _)) => {
                shard.remove(subject);
                None
            }
            Some((false, true)) => shard.remove(subject),
            _ => None,
        }
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut guard = lock(shard);
                let before = guard.len();
                guard.retain(|_, c| !c.is_expired(now, self.ttl));
                before - guard.len()
            })
            .sum()
    }

    pub fn pending(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).len()).sum()
    }

    fn shard_for(&self, subject: &str) -> MutexGuard<'_, HashMap<String, Challenge>> {
        let mut hasher = DefaultHasher::new();
        subject.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        lock(&self.shards[idx])
    }
}

impl ChallengeStore for MemoryChallengeStore {
    fn issue(&self, subject: &str, purpose: ChallengePurpose) -> Challenge {
        self.issue_at(subject, purpose, Utc::now())
    }

    fn consume(&self, subject: &str, purpose: ChallengePurpose) -> Option<Challenge> {
        self.consume_at(subject, purpose, Utc::now())
    }

    fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }
}

// A panic while holding a shard cannot leave a map half-written
fn lock(shard: &Shard) -> MutexGuard<'_, HashMap<String, Challenge>> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}

fn random_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn store() -> MemoryChallengeStore {
        MemoryChallengeStore::new(Duration::minutes(5), 4)
    }

    #[test]
    fn test_issue_then_consume_once() {
        let store = store();
        let issued = store.issue("alice", ChallengePurpose::Verify);

        let consumed = store
            .consume("alice", ChallengePurpose::Verify)
            .expect("Challenge should be pending");
        assert_eq!(consumed, issued);

        assert!(store.consume("alice", ChallengePurpose::Verify).is_none());
    }

    #[test]
    fn test_consume_requires_matching_purpose() {
        let store = store();
        store.issue("alice", ChallengePurpose::Register);

        assert!(store.consume("alice", ChallengePurpose::Verify).is_none());
        // A purpose mismatch leaves the pending challenge alone
        assert!(store.consume("alice", ChallengePurpose::Register).is_some());
    }

    #[test]
    fn test_new_issue_supersedes_pending() {
        let store = store();
        let first = store.issue("alice", ChallengePurpose::Register);
        let second = store.issue("alice", ChallengePurpose::Verify);

        assert_ne!(first.nonce, second.nonce);
        assert!(store.consume("alice", ChallengePurpose::Register).is_none());
        assert_eq!(
            store.consume("alice", ChallengePurpose::Verify).map(|c| c.nonce),
            Some(second.nonce)
        );
    }

    #[test]
    fn test_expired_challenge_is_absent() {
        let store = store();
        let t0 = Utc::now();

        store.issue_at("alice", ChallengePurpose::Verify, t0);
        assert!(store
            .consume_at("alice", ChallengePurpose::Verify, t0 + Duration::minutes(5))
            .is_some());

        store.issue_at("alice", ChallengePurpose::Verify, t0);
        let too_late = t0 + Duration::minutes(5) + Duration::seconds(1);
        assert!(store
            .consume_at("alice", ChallengePurpose::Verify, too_late)
            .is_none());
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let store = store();
        let t0 = Utc::now();
        // Each sweep inside `issue_at` runs at that issue time, so none is dropped early
        store.issue_at("fresh", ChallengePurpose::Verify, t0);
        store.issue_at("old-1", ChallengePurpose::Verify, t0 - Duration::minutes(10));
        store.issue_at("old-2", ChallengePurpose::Register, t0 - Duration::minutes(6));

        assert_eq!(store.purge_expired_at(t0), 2);
        assert_eq!(store.pending(), 1);
        assert!(store.consume_at("fresh", ChallengePurpose::Verify, t0).is_some());
    }

    #[test]
    fn test_nonces_are_long_and_distinct() {
        let store = store();
        let mut seen = HashSet::new();
        for i in 0..200 {
            let c = store.issue(&format!("s{i}"), ChallengePurpose::Verify);
            let decoded = base64ct::Base64UrlUnpadded::decode_vec(&c.nonce).unwrap();
            assert_eq!(decoded.len(), NONCE_BYTES);
            assert!(seen.insert(c.nonce));
        }
    }

    #[test]
    fn test_concurrent_consume_succeeds_once() {
        let store = Arc::new(store());
        store.issue("alice", ChallengePurpose::Verify);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.consume("alice", ChallengePurpose::Verify).is_some())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
