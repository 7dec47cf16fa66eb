use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    sync::Arc,
};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum UnlockError {
    /// The user or the platform dismissed the prompt.
    #[error("key unlock was cancelled")]
    Cancelled,
    #[error("key unlock was denied: {0}")]
    Denied(String),
    #[error("key '{0}' not found")]
    KeyNotFound(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// What the unlock is for, shown to the user and bound into the proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockReason {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_transcript: Option<Vec<u8>>,
}

impl UnlockReason {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            session_transcript: None,
        }
    }

    /// Attach the encoded `SessionTranscript` the proof must cover.
    pub fn with_session_transcript(mut self, session_transcript: Vec<u8>) -> Self {
        self.session_transcript = Some(session_transcript);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn session_transcript(&self) -> Option<&[u8]> {
        self.session_transcript.as_deref()
    }
}

/// Opaque output of a successful unlock, consumed by whoever signs the device response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofMaterial {
    key_id: String,
    bytes: Vec<u8>,
}

impl ProofMaterial {
    pub fn new(key_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            key_id: key_id.into(),
            bytes,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Access to keys kept in a secure area (secure enclave, StrongBox, HSM...).
///
/// `unlock` may prompt the user and take seconds. Callers race it against their own
/// cancellation, so implementations do not need to observe one.
#[async_trait]
pub trait SecureKeyUnlocker: Debug + Send + Sync {
    async fn unlock(&self, key_id: &str, reason: &UnlockReason)
        -> Result<ProofMaterial, UnlockError>;
}

/// Answers unlock requests from a fixed table and records every call. Not for production use!
///
/// The proof material is SHA-256 over the key id followed by the session transcript, which
/// is enough for tests to tell proofs apart.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyUnlocker {
    denied: BTreeMap<String, String>,
    keys: BTreeSet<String>,
    calls: Arc<Mutex<Vec<String>>>,
    cancel_all: bool,
}

impl MemoryKeyUnlocker {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Unlocking `key_id` fails with [UnlockError::Denied].
    pub fn deny(mut self, key_id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.denied.insert(key_id.into(), reason.into());
        self
    }

    /// Every unlock fails with [UnlockError::Cancelled], as if the user dismissed the prompt.
    pub fn cancelling(mut self) -> Self {
        self.cancel_all = true;
        self
    }

    /// Key ids passed to `unlock`, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl SecureKeyUnlocker for MemoryKeyUnlocker {
    async fn unlock(
        &self,
        key_id: &str,
        reason: &UnlockReason,
    ) -> Result<ProofMaterial, UnlockError> {
        self.calls.lock().await.push(key_id.to_owned());

        if self.cancel_all {
            return Err(UnlockError::Cancelled);
        }
        if let Some(denied) = self.denied.get(key_id) {
            return Err(UnlockError::Denied(denied.clone()));
        }
        if !self.keys.contains(key_id) {
            return Err(UnlockError::KeyNotFound(key_id.to_owned()));
        }

        let mut hasher = Sha256::new();
        hasher.update(key_id.as_bytes());
        hasher.update(reason.session_transcript().unwrap_or_default());
        Ok(ProofMaterial::new(key_id, hasher.finalize().to_vec()))
    }
}
