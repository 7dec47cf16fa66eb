//! Drives a [DcqlResponse] through credential selection and key unlock.
//!
//! ```text
//! Evaluated -> AwaitingSelection -> Selected -> UnlockRequested -> ProofReady -> Finalized
//!                    |                               |
//!                    v                               v
//!                Cancelled                 UnlockFailed / Cancelled
//! ```
//!
//! `Finalized`, `UnlockFailed` and `Cancelled` are terminal. A coordinator is used for a
//! single presentment; a retry starts again from a fresh evaluation.

pub mod selection;

use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    core::dcql_match::DcqlResponse,
    holder::{ProofMaterial, SecureKeyUnlocker, UnlockError, UnlockReason},
};

pub use selection::{
    AutomaticChooser, CredentialChooser, CredentialPresentmentSelection, SelectedCredentialSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentmentState {
    /// Matching finished, nothing chosen yet.
    Evaluated,
    /// Waiting for the chooser.
    AwaitingSelection,
    Selected,
    /// Waiting for the secure area.
    UnlockRequested,
    ProofReady,
    UnlockFailed,
    Finalized,
    Cancelled,
}

impl PresentmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::UnlockFailed | Self::Cancelled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PresentmentError {
    #[error("operation not allowed in state {0:?}")]
    InvalidState(PresentmentState),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("presentment was cancelled")]
    Cancelled,
    #[error("failed to unlock key '{key_id}': {source}")]
    UnlockFailed {
        key_id: String,
        #[source]
        source: UnlockError,
    },
    #[error("credential chooser failed: {0}")]
    Chooser(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PresentmentConfig {
    /// Leave out optional credential sets whose key failed to unlock instead of failing.
    pub allow_partial_presentment: bool,
    /// Shown by the secure area when asking the user to unlock a key.
    pub unlock_prompt: String,
}

impl Default for PresentmentConfig {
    fn default() -> Self {
        Self {
            allow_partial_presentment: false,
            unlock_prompt: "Present your credentials".into(),
        }
    }
}

/// Result of a finalized presentment.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentmentOutcome {
    pub selection: CredentialPresentmentSelection,
    /// One per distinct key, in selection order.
    pub proofs: Vec<ProofMaterial>,
}

#[derive(Debug)]
pub struct PresentmentCoordinator {
    response: DcqlResponse,
    unlocker: Arc<dyn SecureKeyUnlocker>,
    config: PresentmentConfig,
    cancel: CancellationToken,
    session_transcript: Option<Vec<u8>>,
    state: PresentmentState,
    selection: Option<CredentialPresentmentSelection>,
    proofs: Vec<ProofMaterial>,
}

impl PresentmentCoordinator {
    pub fn new(
        response: DcqlResponse,
        unlocker: Arc<dyn SecureKeyUnlocker>,
        config: PresentmentConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            response,
            unlocker,
            config,
            cancel,
            session_transcript: None,
            state: PresentmentState::Evaluated,
            selection: None,
            proofs: Vec::new(),
        }
    }

    /// Encoded `SessionTranscript` passed along with every unlock.
    pub fn with_session_transcript(mut self, session_transcript: Vec<u8>) -> Self {
        self.session_transcript = Some(session_transcript);
        self
    }

    pub fn state(&self) -> PresentmentState {
        self.state
    }

    pub fn response(&self) -> &DcqlResponse {
        &self.response
    }

    pub fn selection(&self) -> Option<&CredentialPresentmentSelection> {
        self.selection.as_ref()
    }

    /// Proofs gathered by a successful [PresentmentCoordinator::unlock].
    pub fn proofs(&self) -> &[ProofMaterial] {
        &self.proofs
    }

    fn transition(&mut self, next: PresentmentState) {
        info!(from = ?self.state, to = ?next, "presentment state transition");
        self.state = next;
    }

    fn expect_state(&self, expected: PresentmentState) -> Result<(), PresentmentError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PresentmentError::InvalidState(self.state))
        }
    }

    /// Hand the response to `chooser` and commit to its choice.
    ///
    /// A decline, a chooser failure or cancellation ends the presentment. A choice that does
    /// not fit the response is rejected and the coordinator goes back to `Evaluated`, so the
    /// caller may ask again.
    pub async fn await_selection(
        &mut self,
        chooser: &dyn CredentialChooser,
    ) -> Result<&CredentialPresentmentSelection, PresentmentError> {
        self.expect_state(PresentmentState::Evaluated)?;
        self.transition(PresentmentState::AwaitingSelection);

        let choice = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            choice = chooser.choose(&self.response) => Some(choice),
        };

        let choice = match choice {
            None | Some(Ok(None)) => {
                self.transition(PresentmentState::Cancelled);
                return Err(PresentmentError::Cancelled);
            }
            Some(Err(e)) => {
                self.transition(PresentmentState::Cancelled);
                return Err(PresentmentError::Chooser(e));
            }
            Some(Ok(Some(choice))) => choice,
        };

        match CredentialPresentmentSelection::resolve(&self.response, &choice) {
            Ok(selection) => {
                debug!(sets = selection.sets().len(), "selection committed");
                self.transition(PresentmentState::Selected);
                Ok(self.selection.insert(selection))
            }
            Err(e) => {
                warn!(error = %e, "rejected selection");
                self.transition(PresentmentState::Evaluated);
                Err(e)
            }
        }
    }

    /// Unlock every distinct key of the selection, once each.
    pub async fn unlock(&mut self) -> Result<(), PresentmentError> {
        self.expect_state(PresentmentState::Selected)?;
        let Some(selection) = self.selection.clone() else {
            return Err(PresentmentError::InvalidState(self.state));
        };
        self.transition(PresentmentState::UnlockRequested);

        let mut reason = UnlockReason::new(self.config.unlock_prompt.clone());
        if let Some(session_transcript) = &self.session_transcript {
            reason = reason.with_session_transcript(session_transcript.clone());
        }

        let mut proofs = Vec::new();
        let mut first_failure: Option<(String, UnlockError)> = None;
        let mut failed = BTreeSet::new();
        for key_id in selection.key_ids() {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.unlocker.unlock(key_id, &reason) => Some(result),
            };

            match result {
                Some(Ok(proof)) => proofs.push(proof),
                None | Some(Err(UnlockError::Cancelled)) => {
                    self.transition(PresentmentState::Cancelled);
                    return Err(PresentmentError::Cancelled);
                }
                Some(Err(e)) => {
                    warn!(key_id, error = %e, "key unlock failed");
                    failed.insert(key_id.to_owned());
                    first_failure.get_or_insert((key_id.to_owned(), e));
                    // Nothing left to present once a required set has lost its key.
                    if !self.config.allow_partial_presentment
                        || selection.without_keys(&failed).is_none()
                    {
                        break;
                    }
                }
            }
        }

        let Some((key_id, source)) = first_failure else {
            self.proofs = proofs;
            self.transition(PresentmentState::ProofReady);
            return Ok(());
        };

        if self.config.allow_partial_presentment {
            if let Some(reduced) = selection
                .without_keys(&failed)
                .filter(|reduced| !reduced.is_empty())
            {
                info!(
                    dropped_sets = selection.sets().len() - reduced.sets().len(),
                    "presenting without optional credential sets"
                );
                let remaining: BTreeSet<&str> = reduced.key_ids().into_iter().collect();
                self.proofs = proofs
                    .into_iter()
                    .filter(|proof| remaining.contains(proof.key_id()))
                    .collect();
                self.selection = Some(reduced);
                self.transition(PresentmentState::ProofReady);
                return Ok(());
            }
        }

        self.transition(PresentmentState::UnlockFailed);
        Err(PresentmentError::UnlockFailed { key_id, source })
    }

    pub fn finalize(&mut self) -> Result<PresentmentOutcome, PresentmentError> {
        self.expect_state(PresentmentState::ProofReady)?;
        let Some(selection) = self.selection.take() else {
            return Err(PresentmentError::InvalidState(self.state));
        };
        self.transition(PresentmentState::Finalized);
        Ok(PresentmentOutcome {
            selection,
            proofs: std::mem::take(&mut self.proofs),
        })
    }

    /// Selection, unlock and finalization in one go.
    pub async fn run(
        &mut self,
        chooser: &dyn CredentialChooser,
    ) -> Result<PresentmentOutcome, PresentmentError> {
        self.await_selection(chooser).await?;
        self.unlock().await?;
        self.finalize()
    }
}
